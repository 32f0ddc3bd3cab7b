pub mod book;

use std::{fmt::Display, str::FromStr};

use livros_dal::Batch;
use serde::{de, Deserialize, Deserializer, Serialize};

pub const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    page: u64,
    page_size: u64,
    total_pages: u64,
    total: u64,
    rows: Vec<T>,
}

impl<T> Page<T>
where
    T: Serialize,
{
    pub fn from_batch(batch: Batch<T>) -> Self {
        let page_size = batch.limit.max(1) as u64;
        let offset = batch.offset.max(0) as u64;
        Self {
            page: offset / page_size + 1,
            page_size,
            total_pages: batch.total.div_ceil(page_size),
            total: batch.total,
            rows: batch.rows,
        }
    }
}

/// Empty query value is the same as missing one
pub(crate) fn empty_string_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let value = Option::<String>::deserialize(deserializer)?;
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(de::Error::custom),
    }
}
