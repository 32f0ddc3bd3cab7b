use anyhow::{Result, anyhow};
use livros_app::state::AppState;
use reqwest::Url;
use serde_json::Value;
use tracing::info;

pub async fn seed_genres(state: &AppState, names: &[&str]) -> Result<()> {
    for name in names {
        sqlx::query("INSERT INTO genre (name) VALUES (?)")
            .bind(name)
            .execute(state.pool())
            .await?;
    }
    Ok(())
}

pub async fn get_json(client: &reqwest::Client, url: Url) -> Result<(u16, Value)> {
    let response = client.get(url).send().await?;
    info!("Response: {:#?}", response);
    let status = response.status().as_u16();
    let body: Value = response.json().await?;
    Ok((status, body))
}

/// Loads a form page, so the client gets the nonce cookie, and returns its token
pub async fn form_token(client: &reqwest::Client, form_url: Url) -> Result<String> {
    let (status, body) = get_json(client, form_url).await?;
    assert_eq!(status, 200);
    body.get("csrfToken")
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| anyhow!("Form has no token"))
}

pub async fn post_form(
    client: &reqwest::Client,
    url: Url,
    token: &str,
    fields: &[(&str, &str)],
) -> Result<reqwest::Response> {
    let mut form: Vec<(&str, &str)> = fields.to_vec();
    form.push(("csrf_token", token));
    let response = client.post(url).form(&form).send().await?;
    info!("Response: {:#?}", response);
    Ok(response)
}

pub async fn create_book(
    client: &reqwest::Client,
    base_url: &Url,
    fields: &[(&str, &str)],
) -> Result<reqwest::Response> {
    let url = base_url.join("Livros/Create")?;
    let token = form_token(client, url.clone()).await?;
    post_form(client, url, &token, fields).await
}

pub async fn list_books(
    client: &reqwest::Client,
    base_url: &Url,
    query: &[(&str, &str)],
) -> Result<Value> {
    let mut url = base_url.join("Livros/Listar")?;
    url.query_pairs_mut().extend_pairs(query);
    let (status, body) = get_json(client, url).await?;
    assert_eq!(status, 200);
    Ok(body)
}
