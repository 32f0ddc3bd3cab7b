use std::ops::DerefMut;

use futures::{StreamExt as _, TryStreamExt as _};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::{Connection, DbConnection, Error, MAX_LIMIT, error::Result};

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct CreateGenre {
    #[garde(length(chars, min = 1, max = 255))]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

pub type GenreRepository = GenreRepositoryImpl<Connection>;

pub struct GenreRepositoryImpl<C> {
    conn: C,
}

impl<C> GenreRepositoryImpl<C>
where
    C: DerefMut<Target = DbConnection>,
{
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    pub async fn create(&mut self, payload: CreateGenre) -> Result<Genre> {
        let result = sqlx::query("INSERT INTO genre (name) VALUES (?)")
            .bind(&payload.name)
            .execute(&mut *self.conn)
            .await?;

        let id = result.last_insert_rowid();
        self.get(id).await
    }

    /// All genres ordered by name, max limit applies
    pub async fn list_all(&mut self) -> Result<Vec<Genre>> {
        let records =
            sqlx::query_as::<_, Genre>("SELECT id, name FROM genre ORDER BY name, id")
                .fetch(&mut *self.conn)
                .take(MAX_LIMIT)
                .try_collect::<Vec<_>>()
                .await?;
        Ok(records)
    }

    pub async fn get(&mut self, id: i64) -> Result<Genre> {
        sqlx::query_as::<_, Genre>("SELECT id, name FROM genre WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?
            .ok_or_else(|| Error::RecordNotFound("Genre".to_string()))
    }
}
