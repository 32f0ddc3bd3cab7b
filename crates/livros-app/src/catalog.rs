//! Book catalog operations behind the `/Livros` screens.
//!
//! [`BookCatalog`] is created per request and owns one pooled connection,
//! which goes back to the pool when the catalog is dropped, whatever way the
//! handler exits.

use axum::extract::FromRequestParts;
use http::request::Parts;
use livros_dal::{
    Batch, Connection, DbConnection, ListingParams, Pool,
    book::{Book, BookFilter, BookRepositoryImpl},
    form::{BookSubmission, FieldErrors},
    genre::GenreRepositoryImpl,
};
use serde::Serialize;
use tracing::{debug, error};

use crate::{error::ApiError, state::AppState};

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Missing record identifier")]
    MissingIdentifier,

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Submitted record is invalid")]
    ValidationFailed {
        submission: BookSubmission,
        errors: FieldErrors,
    },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[source] livros_dal::Error),
}

impl From<livros_dal::Error> for CatalogError {
    fn from(e: livros_dal::Error) -> Self {
        match e {
            livros_dal::Error::RecordNotFound(what) => CatalogError::RecordNotFound(what),
            other => CatalogError::PersistenceFailure(other),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GenreOption {
    pub id: i64,
    pub name: String,
    pub selected: bool,
}

pub struct BookCatalog {
    conn: Connection,
}

impl FromRequestParts<AppState> for BookCatalog {
    type Rejection = ApiError;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        BookCatalog::acquire(state.pool()).await
    }
}

impl BookCatalog {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Takes a connection from the pool for the rest of the request
    pub async fn acquire(pool: &Pool) -> Result<Self, ApiError> {
        let conn = pool.acquire().await.map_err(|e| {
            error!("Cannot acquire database connection: {e}");
            ApiError::DatabaseError(e.into())
        })?;
        Ok(BookCatalog::new(conn))
    }

    fn books(&mut self) -> BookRepositoryImpl<&mut DbConnection> {
        BookRepositoryImpl::new(&mut *self.conn)
    }

    fn genres(&mut self) -> GenreRepositoryImpl<&mut DbConnection> {
        GenreRepositoryImpl::new(&mut *self.conn)
    }

    /// Filtered, title-sorted page of books; `page` starts at 1
    pub async fn list(
        &mut self,
        filter: &BookFilter,
        page: u32,
        page_size: u32,
    ) -> CatalogResult<Batch<Book>> {
        let params = ListingParams::for_page(page, page_size);
        let batch = self.books().list(filter, params).await?;
        Ok(batch)
    }

    pub async fn get_by_id(&mut self, id: Option<i64>) -> CatalogResult<Book> {
        let id = id.ok_or(CatalogError::MissingIdentifier)?;
        let book = self.books().get(id).await?;
        Ok(book)
    }

    /// Stores new book, submitted id is ignored
    pub async fn create(&mut self, submission: BookSubmission) -> CatalogResult<Book> {
        let form = match submission.validate() {
            Ok(form) => form,
            Err(errors) => return Err(CatalogError::ValidationFailed { submission, errors }),
        };
        match self.books().create(form).await {
            Ok(book) => {
                debug!("Created book {}", book.id);
                Ok(book)
            }
            Err(e) => Err(write_error(e, submission)),
        }
    }

    /// Overwrites every editable field of the book identified by submitted id
    pub async fn update(&mut self, submission: BookSubmission) -> CatalogResult<Book> {
        let form = match submission.validate() {
            Ok(form) => form,
            Err(errors) => return Err(CatalogError::ValidationFailed { submission, errors }),
        };
        let id = form.id.ok_or(CatalogError::MissingIdentifier)?;
        match self.books().update(id, form).await {
            Ok(book) => {
                debug!("Updated book {}", book.id);
                Ok(book)
            }
            Err(e) => Err(write_error(e, submission)),
        }
    }

    /// Looks up the book to be confirmed for deletion
    pub async fn delete(&mut self, id: Option<i64>) -> CatalogResult<Book> {
        self.get_by_id(id).await
    }

    pub async fn delete_confirmed(&mut self, id: i64) -> CatalogResult<()> {
        self.books().delete(id).await?;
        debug!("Deleted book {id}");
        Ok(())
    }

    pub async fn genre_options(&mut self, selected: Option<i64>) -> CatalogResult<Vec<GenreOption>> {
        let genres = self.genres().list_all().await?;
        Ok(genres
            .into_iter()
            .map(|g| GenreOption {
                selected: Some(g.id) == selected,
                id: g.id,
                name: g.name,
            })
            .collect())
    }
}

/// Unknown genre is reported against the form field, other failures pass through
fn write_error(e: livros_dal::Error, submission: BookSubmission) -> CatalogError {
    if e.is_foreign_key_violation() {
        debug!("Rejected book with unknown genre: {e}");
        CatalogError::ValidationFailed {
            submission,
            errors: FieldErrors::single("genreId", "selected genre does not exist"),
        }
    } else {
        e.into()
    }
}
