pub mod book;
pub mod error;
pub mod form;
pub mod genre;

use std::str::FromStr as _;

pub use error::Error;
pub use sqlx::Error as SqlxError;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::error::Result;

pub type ChosenDB = sqlx::Sqlite;
pub type ChosenRow = sqlx::sqlite::SqliteRow;
pub type Pool = sqlx::Pool<ChosenDB>;
/// Raw connection, what repositories run their statements on
pub type DbConnection = sqlx::SqliteConnection;
/// Pooled connection, returned to the pool on drop
pub type Connection = sqlx::pool::PoolConnection<ChosenDB>;

pub const MAX_LIMIT: usize = 10_000;

pub async fn new_pool(database_url: &str) -> Result<Pool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(50)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Creates or upgrades the schema from the embedded migrations
pub async fn migrate(pool: &Pool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingParams {
    pub offset: i64,
    pub limit: i64,
}

impl Default for ListingParams {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: MAX_LIMIT as i64,
        }
    }
}

impl ListingParams {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self { offset, limit }
    }

    /// Skip `(page - 1) * page_size` records, take `page_size`.
    /// Page numbers start at 1.
    pub fn for_page(page: u32, page_size: u32) -> Self {
        let page_size = i64::from(page_size);
        let offset = i64::from(page.saturating_sub(1)) * page_size;
        Self {
            offset,
            limit: page_size,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Batch<T> {
    pub offset: i64,
    pub limit: i64,
    pub total: u64,
    pub rows: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_for_page() {
        assert_eq!(ListingParams::for_page(1, 5), ListingParams::new(0, 5));
        assert_eq!(ListingParams::for_page(2, 5), ListingParams::new(5, 5));
        assert_eq!(ListingParams::for_page(3, 1), ListingParams::new(2, 1));
        // page 0 behaves as first page
        assert_eq!(ListingParams::for_page(0, 10), ListingParams::new(0, 10));
    }
}
