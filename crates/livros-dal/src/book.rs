use std::ops::DerefMut;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row as _};
use tracing::debug;

use crate::{
    Batch, ChosenDB, ChosenRow, Connection, DbConnection, Error, ListingParams, error::Result,
    form::BookForm, genre::Genre,
};

const SELECT_BOOKS: &str = r#"
SELECT b.id, b.title, b.author, b.edition_year, b.price, b.genre_id,
g.name AS genre_name
FROM book b
JOIN genre g ON b.genre_id = g.id
"#;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: i64,
    pub title: Option<String>,
    pub author: Option<String>,
    pub edition_year: i32,
    pub price: Decimal,
    pub genre_id: i64,
    pub genre: Genre,
}

impl sqlx::FromRow<'_, ChosenRow> for Book {
    fn from_row(row: &ChosenRow) -> Result<Self, sqlx::Error> {
        let price: String = row.try_get("price")?;
        let price = price
            .parse::<Decimal>()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "price".to_string(),
                source: Box::new(e),
            })?;
        let genre = Genre {
            id: row.try_get("genre_id")?,
            name: row.try_get("genre_name")?,
        };
        Ok(Book {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            author: row.try_get("author")?,
            edition_year: row.try_get("edition_year")?,
            price,
            genre_id: genre.id,
            genre,
        })
    }
}

/// Listing filter. Zero `edition_year` and `price` mean "not filtered",
/// so a book with a real zero year or price cannot be searched for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookFilter {
    pub title: Option<String>,
    pub author: Option<String>,
    pub edition_year: i32,
    pub price: Decimal,
}

impl BookFilter {
    fn title_term(&self) -> Option<&str> {
        non_blank(self.title.as_deref())
    }

    fn author_term(&self) -> Option<&str> {
        non_blank(self.author.as_deref())
    }

    fn push_conditions<'a>(&'a self, query: &mut QueryBuilder<'a, ChosenDB>) {
        query.push(" WHERE 1 = 1");
        if let Some(title) = self.title_term() {
            query
                .push(" AND b.title LIKE ")
                .push_bind(like_pattern(title))
                .push(" ESCAPE '\\'");
        }
        if let Some(author) = self.author_term() {
            query
                .push(" AND b.author LIKE ")
                .push_bind(like_pattern(author))
                .push(" ESCAPE '\\'");
        }
        if self.edition_year != 0 {
            query
                .push(" AND b.edition_year = ")
                .push_bind(self.edition_year);
        }
        if !self.price.is_zero() {
            query.push(" AND b.price = ").push_bind(price_to_db(self.price));
        }
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

/// Substring pattern for LIKE with `\` as escape character
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Prices are kept as normalized decimal text, so equal values have equal text
fn price_to_db(price: Decimal) -> String {
    price.normalize().to_string()
}

pub type BookRepository = BookRepositoryImpl<Connection>;

pub struct BookRepositoryImpl<C> {
    conn: C,
}

impl<C> BookRepositoryImpl<C>
where
    C: DerefMut<Target = DbConnection>,
{
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    /// Filtered page of books sorted by title, with genre attached
    pub async fn list(&mut self, filter: &BookFilter, params: ListingParams) -> Result<Batch<Book>> {
        let total = self.count(filter).await?;

        let mut query = QueryBuilder::<ChosenDB>::new(SELECT_BOOKS);
        filter.push_conditions(&mut query);
        query
            .push(" ORDER BY b.title COLLATE NOCASE, b.id LIMIT ")
            .push_bind(params.limit)
            .push(" OFFSET ")
            .push_bind(params.offset);
        debug!("Listing books: {}", query.sql());

        let rows = query
            .build_query_as::<Book>()
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(Batch {
            offset: params.offset,
            limit: params.limit,
            total,
            rows,
        })
    }

    pub async fn count(&mut self, filter: &BookFilter) -> Result<u64> {
        let mut query = QueryBuilder::<ChosenDB>::new("SELECT count(*) FROM book b");
        filter.push_conditions(&mut query);
        let count: i64 = query
            .build_query_scalar()
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn get(&mut self, id: i64) -> Result<Book> {
        let sql = format!("{SELECT_BOOKS} WHERE b.id = ?");
        sqlx::query_as::<_, Book>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?
            .ok_or_else(|| Error::RecordNotFound("Book".to_string()))
    }

    /// Inserts new record, identity is assigned by database, `payload.id` is ignored
    pub async fn create(&mut self, payload: BookForm) -> Result<Book> {
        let result = sqlx::query(
            "INSERT INTO book (title, author, edition_year, price, genre_id) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&payload.title)
        .bind(&payload.author)
        .bind(payload.edition_year)
        .bind(price_to_db(payload.price))
        .bind(payload.genre_id)
        .execute(&mut *self.conn)
        .await?;

        let id = result.last_insert_rowid();
        self.get(id).await
    }

    /// Overwrites all editable fields, previous values are not consulted
    pub async fn update(&mut self, id: i64, payload: BookForm) -> Result<Book> {
        let result = sqlx::query(
            "UPDATE book SET title = ?, author = ?, edition_year = ?, price = ?, genre_id = ? WHERE id = ?",
        )
        .bind(&payload.title)
        .bind(&payload.author)
        .bind(payload.edition_year)
        .bind(price_to_db(payload.price))
        .bind(payload.genre_id)
        .bind(id)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            Err(Error::RecordNotFound("Book".to_string()))
        } else {
            self.get(id).await
        }
    }

    pub async fn delete(&mut self, id: i64) -> Result<()> {
        let res = sqlx::query("DELETE FROM book WHERE id = ?")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;

        if res.rows_affected() == 0 {
            Err(Error::RecordNotFound("Book".to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("Dune"), "%Dune%");
        assert_eq!(like_pattern("100%_pure"), "%100\\%\\_pure%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn test_price_normalized() {
        let a: Decimal = "12.50".parse().unwrap();
        let b: Decimal = "12.5".parse().unwrap();
        assert_eq!(price_to_db(a), price_to_db(b));
        assert_eq!(price_to_db(Decimal::ZERO), "0");
    }

    #[test]
    fn test_blank_terms_ignored() {
        let filter = BookFilter {
            title: Some("   ".to_string()),
            author: Some(String::new()),
            ..Default::default()
        };
        assert!(filter.title_term().is_none());
        assert!(filter.author_term().is_none());

        let mut query = QueryBuilder::<ChosenDB>::new("SELECT count(*) FROM book b");
        filter.push_conditions(&mut query);
        assert_eq!(query.sql(), "SELECT count(*) FROM book b WHERE 1 = 1");
    }

    #[test]
    fn test_conditions_order() {
        let filter = BookFilter {
            title: Some("Dune".to_string()),
            author: Some("Herbert".to_string()),
            edition_year: 1965,
            price: "9.99".parse().unwrap(),
        };
        let mut query = QueryBuilder::<ChosenDB>::new("SELECT count(*) FROM book b");
        filter.push_conditions(&mut query);
        let sql = query.sql();
        let title = sql.find("b.title").unwrap();
        let author = sql.find("b.author").unwrap();
        let year = sql.find("b.edition_year").unwrap();
        let price = sql.find("b.price").unwrap();
        assert!(title < author && author < year && year < price);
    }
}
