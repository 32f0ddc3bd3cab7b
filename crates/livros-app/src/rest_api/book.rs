use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json,
};
use http::{header, StatusCode};
use livros_dal::{
    book::{Book, BookFilter},
    form::{BookSubmission, FieldErrors, FieldSpec, BOOK_FIELDS},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{BookCatalog, CatalogError, GenreOption},
    csrf::{CsrfToken, Protected, CSRF_FORM_FIELD},
    error::{ApiError, ApiResult},
    rest_api::{empty_string_as_none, Page, MAX_PAGE_SIZE},
    state::AppState,
};

pub const LIST_URL: &str = "/Livros";

fn redirect_to_list() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, LIST_URL)]).into_response()
}

/// Static part of the listing screen, rows are loaded from `/Livros/Listar`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageShell {
    title: &'static str,
    fields: &'static [FieldSpec],
    list_url: &'static str,
    create_url: &'static str,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    titulo: Option<String>,
    autor: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    ano_edicao: Option<i32>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    valor: Option<Decimal>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pagina: Option<u32>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    registros: Option<u32>,
}

impl ListQuery {
    fn filter(&self) -> BookFilter {
        BookFilter {
            title: self.titulo.clone(),
            author: self.autor.clone(),
            edition_year: self.ano_edicao.unwrap_or(0),
            price: self.valor.unwrap_or(Decimal::ZERO),
        }
    }

    fn page(&self) -> u32 {
        self.pagina.unwrap_or(1).max(1)
    }

    fn page_size(&self, default_page_size: u32) -> u32 {
        self.registros
            .unwrap_or(default_page_size)
            .clamp(1, MAX_PAGE_SIZE)
    }
}

/// Create and edit screens
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormModel {
    book: BookSubmission,
    genres: Vec<GenreOption>,
    fields: &'static [FieldSpec],
    errors: FieldErrors,
    csrf_field: &'static str,
    csrf_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteModel {
    book: Book,
    csrf_field: &'static str,
    csrf_token: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteForm {
    id: Option<String>,
}

pub async fn index(State(state): State<AppState>) -> impl IntoResponse {
    Json(PageShell {
        title: "Livros",
        fields: BOOK_FIELDS,
        list_url: "/Livros/Listar",
        create_url: "/Livros/Create",
        page_size: state.config().default_page_size,
    })
}

pub async fn list(
    mut catalog: BookCatalog,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let page_size = query.page_size(state.config().default_page_size);
    let batch = catalog
        .list(&query.filter(), query.page(), page_size)
        .await?;
    Ok((StatusCode::OK, Json(Page::from_batch(batch))))
}

pub async fn details(
    id: Option<Path<i64>>,
    mut catalog: BookCatalog,
) -> ApiResult<impl IntoResponse> {
    let book = catalog.get_by_id(id.map(|Path(id)| id)).await?;
    Ok((StatusCode::OK, Json(book)))
}

async fn form_model(
    catalog: &mut BookCatalog,
    book: BookSubmission,
    errors: FieldErrors,
    csrf_token: String,
) -> ApiResult<FormModel> {
    let selected = book
        .genre_id
        .as_deref()
        .and_then(|g| g.trim().parse::<i64>().ok());
    let genres = catalog.genre_options(selected).await?;
    Ok(FormModel {
        book,
        genres,
        fields: BOOK_FIELDS,
        errors,
        csrf_field: CSRF_FORM_FIELD,
        csrf_token,
    })
}

/// Invalid submission renders the form again with its errors, anything else is an error response
async fn rerender_or_fail(
    catalog: &mut BookCatalog,
    error: CatalogError,
    csrf_token: String,
) -> ApiResult<Response> {
    match error {
        CatalogError::ValidationFailed { submission, errors } => {
            let model = form_model(catalog, submission, errors, csrf_token).await?;
            Ok((StatusCode::OK, Json(model)).into_response())
        }
        other => Err(other.into()),
    }
}

pub async fn create_form(
    mut catalog: BookCatalog,
    CsrfToken(token): CsrfToken,
) -> ApiResult<impl IntoResponse> {
    let model = form_model(
        &mut catalog,
        BookSubmission::default(),
        FieldErrors::default(),
        token,
    )
    .await?;
    Ok((StatusCode::OK, Json(model)))
}

pub async fn create(
    State(state): State<AppState>,
    Protected(submission, CsrfToken(token)): Protected<BookSubmission>,
) -> ApiResult<Response> {
    let mut catalog = BookCatalog::acquire(state.pool()).await?;
    match catalog.create(submission).await {
        Ok(_) => Ok(redirect_to_list()),
        Err(e) => rerender_or_fail(&mut catalog, e, token).await,
    }
}

pub async fn edit_form(
    id: Option<Path<i64>>,
    mut catalog: BookCatalog,
    CsrfToken(token): CsrfToken,
) -> ApiResult<impl IntoResponse> {
    let book = catalog.get_by_id(id.map(|Path(id)| id)).await?;
    let model = form_model(
        &mut catalog,
        BookSubmission::from(&book),
        FieldErrors::default(),
        token,
    )
    .await?;
    Ok((StatusCode::OK, Json(model)))
}

pub async fn edit(
    State(state): State<AppState>,
    Protected(submission, CsrfToken(token)): Protected<BookSubmission>,
) -> ApiResult<Response> {
    let mut catalog = BookCatalog::acquire(state.pool()).await?;
    match catalog.update(submission).await {
        Ok(_) => Ok(redirect_to_list()),
        Err(e) => rerender_or_fail(&mut catalog, e, token).await,
    }
}

pub async fn delete_form(
    id: Option<Path<i64>>,
    mut catalog: BookCatalog,
    CsrfToken(token): CsrfToken,
) -> ApiResult<impl IntoResponse> {
    let book = catalog.delete(id.map(|Path(id)| id)).await?;
    Ok((
        StatusCode::OK,
        Json(DeleteModel {
            book,
            csrf_field: CSRF_FORM_FIELD,
            csrf_token: token,
        }),
    ))
}

pub async fn delete(
    State(state): State<AppState>,
    Protected(form, _): Protected<DeleteForm>,
) -> ApiResult<Response> {
    let id = match form.id.as_deref().map(str::trim) {
        None | Some("") => return Err(ApiError::MissingIdentifier),
        Some(id) => id
            .parse::<i64>()
            .map_err(|_| ApiError::InvalidQuery(format!("Invalid record identifier '{id}'")))?,
    };
    let mut catalog = BookCatalog::acquire(state.pool()).await?;
    catalog.delete_confirmed(id).await?;
    Ok(redirect_to_list())
}

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/", get(index))
        .route("/Listar", get(list))
        .route("/Details", get(details))
        .route("/Details/{id}", get(details))
        .route("/Create", get(create_form).post(create))
        .route("/Edit", get(edit_form).post(edit))
        .route("/Edit/{id}", get(edit_form))
        .route("/Delete", get(delete_form).post(delete))
        .route("/Delete/{id}", get(delete_form))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use futures::TryStreamExt as _;
    use http::Request;
    use serde_json::Value;
    use sqlx::Executor as _;
    use tower::ServiceExt as _;
    use tower_cookies::CookieManagerLayer;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        csrf::{AntiForgery, CSRF_COOKIE_NAME},
        state::AppConfig,
    };

    const TEST_DATA: &str = r#"
    INSERT INTO genre (id, name) VALUES (1, 'sci-fi');
    INSERT INTO genre (id, name) VALUES (2, 'fantasy');
    INSERT INTO book (id, title, author, edition_year, price, genre_id) VALUES (1, 'Dune', 'Frank Herbert', 1965, '9.99', 1);
    INSERT INTO book (id, title, author, edition_year, price, genre_id) VALUES (2, 'Dune Messiah', 'Frank Herbert', 1969, '0', 1);
    INSERT INTO book (id, title, author, edition_year, price, genre_id) VALUES (3, 'The Hobbit', 'J. R. R. Tolkien', 1937, '7.5', 2);
    "#;

    async fn test_state() -> AppState {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .acquire_timeout(Duration::from_millis(300))
            .connect("sqlite::memory:")
            .await
            .unwrap();
        pool.execute("PRAGMA foreign_keys = ON").await.unwrap();
        livros_dal::migrate(&pool).await.unwrap();
        pool.execute_many(TEST_DATA)
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        let anti_forgery = AntiForgery::new(b"test secret for anti forgery tokens").unwrap();
        AppState::new(AppConfig::default(), pool, anti_forgery)
    }

    fn app_with(state: AppState) -> axum::Router {
        axum::Router::new()
            .nest("/Livros", router())
            .layer(CookieManagerLayer::new())
            .with_state(state)
    }

    async fn app() -> axum::Router {
        app_with(test_state().await)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, body_json(response).await)
    }

    /// Loads a form page and returns the nonce cookie with the token
    async fn form_session(app: &axum::Router, uri: &str) -> (String, String) {
        let response = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with(CSRF_COOKIE_NAME));
        let body = body_json(response).await;
        let token = body["csrfToken"].as_str().unwrap().to_string();
        (cookie, token)
    }

    async fn post_form(app: &axum::Router, uri: &str, cookie: Option<&str>, form: &str) -> Response {
        let mut request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        app.clone()
            .oneshot(request.body(Body::from(form.to_string())).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_index() {
        let app = app().await;
        let (status, body) = get_json(&app, "/Livros").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pageSize"], 5);
        assert_eq!(body["fields"][3]["label"], "Edition Year");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_list_filter_and_paging() {
        let app = app().await;
        let (status, body) = get_json(&app, "/Livros/Listar").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["rows"][0]["title"], "Dune");
        assert_eq!(body["rows"][0]["genre"]["name"], "sci-fi");

        let (_, body) = get_json(&app, "/Livros/Listar?titulo=dune&pagina=2&registros=1").await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["page"], 2);
        assert_eq!(body["totalPages"], 2);
        assert_eq!(body["rows"][0]["title"], "Dune Messiah");

        let (status, body) =
            get_json(&app, "/Livros/Listar?titulo=&autor=&anoEdicao=&valor=&pagina=0&registros=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page"], 1);
        assert_eq!(body["pageSize"], 1);
        assert_eq!(body["total"], 3);

        let (_, body) = get_json(&app, "/Livros/Listar?anoEdicao=1937&valor=7.50").await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["rows"][0]["title"], "The Hobbit");
    }

    #[tokio::test]
    async fn test_details() {
        let app = app().await;
        let (status, body) = get_json(&app, "/Livros/Details/3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["author"], "J. R. R. Tolkien");

        let (status, _) = get_json(&app, "/Livros/Details").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get_json(&app, "/Livros/Details/42").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_create() {
        let app = app().await;
        let form = "title=Anathem&author=Neal+Stephenson&editionYear=2008&price=19.90&genreId=1";

        let response = post_form(&app, "/Livros/Create", None, form).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let (cookie, token) = form_session(&app, "/Livros/Create").await;
        let response = post_form(&app, "/Livros/Create", Some(&cookie), form).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = post_form(
            &app,
            "/Livros/Create",
            Some(&cookie),
            &format!("{form}&csrf_token=not-a-token"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = post_form(
            &app,
            "/Livros/Create",
            Some(&cookie),
            &format!("{form}&csrf_token={token}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/Livros");

        let (_, body) = get_json(&app, "/Livros/Listar?titulo=anathem").await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["rows"][0]["price"], "19.9");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_forged_post_does_not_touch_database() {
        let state = test_state().await;
        let app = app_with(state.clone());
        let (cookie, _token) = form_session(&app, "/Livros/Create").await;

        // the only connection is taken, so reaching the catalog would time out
        let held = state.pool().acquire().await.unwrap();
        let form = "id=1&title=Anathem&editionYear=2008&price=19&genreId=1&csrf_token=bad";
        for uri in ["/Livros/Create", "/Livros/Edit", "/Livros/Delete"] {
            let response = post_form(&app, uri, Some(&cookie), form).await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri}");
        }
        drop(held);

        let (_, body) = get_json(&app, "/Livros/Listar").await;
        assert_eq!(body["total"], 3);
    }

    #[tokio::test]
    async fn test_rejected_post_sets_no_cookie() {
        let app = app().await;
        let form = "title=Anathem&editionYear=2008&price=19&genreId=1";
        for uri in ["/Livros/Create", "/Livros/Edit", "/Livros/Delete"] {
            let response = post_form(&app, uri, None, form).await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri}");
            assert!(response.headers().get(header::SET_COOKIE).is_none(), "{uri}");
        }
    }

    #[tokio::test]
    async fn test_invalid_create_rerenders_form() {
        let app = app().await;
        let (cookie, token) = form_session(&app, "/Livros/Create").await;
        let response = post_form(
            &app,
            "/Livros/Create",
            Some(&cookie),
            &format!("title=Anathem&editionYear=soon&price=1&genreId=2&csrf_token={token}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["book"]["editionYear"], "soon");
        assert_eq!(body["book"]["title"], "Anathem");
        assert!(body["errors"]["editionYear"].is_array());
        assert_eq!(body["genres"][0]["selected"], true);

        let (_, body) = get_json(&app, "/Livros/Listar").await;
        assert_eq!(body["total"], 3);
    }

    #[tokio::test]
    async fn test_edit() {
        let app = app().await;
        let (status, _) = get_json(&app, "/Livros/Edit").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (cookie, token) = form_session(&app, "/Livros/Edit/2").await;
        let response = post_form(
            &app,
            "/Livros/Edit",
            Some(&cookie),
            &format!("id=2&title=Dune+Messiah&editionYear=1970&price=5&genreId=1&csrf_token={token}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);

        let (_, body) = get_json(&app, "/Livros/Details/2").await;
        assert_eq!(body["editionYear"], 1970);
        assert_eq!(body["author"], Value::Null);

        let response = post_form(
            &app,
            "/Livros/Edit",
            Some(&cookie),
            &format!("title=No+id&editionYear=1970&price=5&genreId=1&csrf_token={token}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete() {
        let app = app().await;
        let (status, body) = get_json(&app, "/Livros/Delete/1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["book"]["title"], "Dune");

        let (cookie, token) = form_session(&app, "/Livros/Delete/1").await;
        let response = post_form(
            &app,
            "/Livros/Delete",
            Some(&cookie),
            &format!("csrf_token={token}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let form = format!("id=1&csrf_token={token}");
        let response = post_form(&app, "/Livros/Delete", Some(&cookie), &form).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let response = post_form(&app, "/Livros/Delete", Some(&cookie), &form).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let (status, _) = get_json(&app, "/Livros/Delete/1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
