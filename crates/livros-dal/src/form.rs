//! Book form handling: field metadata, raw submissions and their validation.
//!
//! A form is bound into [`BookSubmission`], which keeps the submitted text
//! untouched so that it can be shown again when invalid. [`BookSubmission::validate`]
//! converts it into a typed [`BookForm`] or returns [`FieldErrors`] keyed by
//! the field's wire name.

use std::collections::BTreeMap;

use garde::Validate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::book::Book;

/// Display and binding metadata of one record field
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct FieldSpec {
    /// Name of the field in forms and JSON
    pub name: &'static str,
    /// Name of the struct field, as reported by validation rules
    #[serde(skip)]
    pub field: &'static str,
    pub label: &'static str,
    /// Accepted from submitted forms
    pub bindable: bool,
}

impl FieldSpec {
    const fn new(
        name: &'static str,
        field: &'static str,
        label: &'static str,
        bindable: bool,
    ) -> Self {
        Self {
            name,
            field,
            label,
            bindable,
        }
    }
}

pub const BOOK_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("id", "id", "Id", true),
    FieldSpec::new("title", "title", "Title", true),
    FieldSpec::new("author", "author", "Author", true),
    FieldSpec::new("editionYear", "edition_year", "Edition Year", true),
    FieldSpec::new("price", "price", "Price", true),
    FieldSpec::new("genreId", "genre_id", "Genre", true),
    FieldSpec::new("genre", "genre", "Genre", false),
];

pub fn field_label(name: &str) -> Option<&'static str> {
    BOOK_FIELDS
        .iter()
        .find(|f| f.name == name)
        .map(|f| f.label)
}

fn wire_name(field: &str) -> String {
    BOOK_FIELDS
        .iter()
        .find(|f| f.field == field)
        .map(|f| f.name.to_string())
        .unwrap_or_else(|| field.to_string())
}

/// Validation failures, field name -> reasons
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(reason.into());
    }

    pub fn single(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, reason);
        errors
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(|v| v.as_slice())
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    fn add_report(&mut self, report: &garde::Report) {
        for (path, error) in report.iter() {
            self.add(wire_name(&path.to_string()), error.message());
        }
    }
}

/// Book form as submitted, only the allow-listed fields are bound
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSubmission {
    pub id: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub edition_year: Option<String>,
    pub price: Option<String>,
    pub genre_id: Option<String>,
}

impl From<&Book> for BookSubmission {
    fn from(book: &Book) -> Self {
        Self {
            id: Some(book.id.to_string()),
            title: book.title.clone(),
            author: book.author.clone(),
            edition_year: Some(book.edition_year.to_string()),
            price: Some(book.price.to_string()),
            genre_id: Some(book.genre_id.to_string()),
        }
    }
}

impl BookSubmission {
    /// Converts submitted text to typed values and checks field rules.
    pub fn validate(&self) -> Result<BookForm, FieldErrors> {
        let mut errors = FieldErrors::default();

        let id = parse_optional::<i64>(self.id.as_deref(), "id", &mut errors);
        let edition_year =
            parse_required::<i32>(self.edition_year.as_deref(), "editionYear", &mut errors);
        let price = parse_required::<Decimal>(self.price.as_deref(), "price", &mut errors);
        let genre_id = parse_required::<i64>(self.genre_id.as_deref(), "genreId", &mut errors);

        // Fields which failed conversion get values passing their rules,
        // so the rules report only on the remaining fields.
        let form = BookForm {
            id: id.flatten(),
            title: non_empty(self.title.as_deref()),
            author: non_empty(self.author.as_deref()),
            edition_year: edition_year.unwrap_or_default(),
            price: price.unwrap_or_default(),
            genre_id: genre_id.unwrap_or(1),
        };

        if let Err(report) = form.validate() {
            errors.add_report(&report);
        }

        if errors.is_empty() {
            Ok(form)
        } else {
            Err(errors)
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.to_string())
}

fn parse_required<T: std::str::FromStr>(
    value: Option<&str>,
    field: &str,
    errors: &mut FieldErrors,
) -> Option<T> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => {
            errors.add(field, "value is required");
            None
        }
        Some(v) => parse_value(v, field, errors),
    }
}

/// Outer `None` means invalid value
fn parse_optional<T: std::str::FromStr>(
    value: Option<&str>,
    field: &str,
    errors: &mut FieldErrors,
) -> Option<Option<T>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Some(None),
        Some(v) => parse_value(v, field, errors).map(Some),
    }
}

fn parse_value<T: std::str::FromStr>(value: &str, field: &str, errors: &mut FieldErrors) -> Option<T> {
    match value.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            errors.add(field, format!("'{value}' is not a valid value"));
            None
        }
    }
}

fn non_negative(value: &Decimal, _ctx: &()) -> garde::Result {
    if value.is_sign_negative() && !value.is_zero() {
        Err(garde::Error::new("must not be negative"))
    } else {
        Ok(())
    }
}

/// Validated book form, ready to be stored
#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BookForm {
    #[garde(skip)]
    pub id: Option<i64>,
    #[garde(length(chars, max = 255))]
    pub title: Option<String>,
    #[garde(length(chars, max = 255))]
    pub author: Option<String>,
    #[garde(range(min = 0, max = 9999))]
    pub edition_year: i32,
    #[garde(custom(non_negative))]
    pub price: Decimal,
    #[garde(range(min = 1))]
    pub genre_id: i64,
}
