use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::warning::{ParseWarning, RecordError};

/// One positioned run of text. Coordinates are page points with a top-left
/// origin, so `y0 < y1` and larger `y` is further down the page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextFragment {
    pub text: String,
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub page: u32,
}

impl TextFragment {
    #[must_use]
    pub fn new(text: impl Into<String>, x0: f32, y0: f32, x1: f32, y1: f32, page: u32) -> Self {
        Self {
            text: text.into(),
            x0,
            y0,
            x1,
            y1,
            page,
        }
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        (self.y1 - self.y0).abs()
    }

    #[must_use]
    pub fn center_y(&self) -> f32 {
        (self.y0 + self.y1) / 2.0
    }

    #[must_use]
    pub fn center_x(&self) -> f32 {
        (self.x0 + self.x1) / 2.0
    }
}

/// Cells of one visual line, left to right.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub page: u32,
    pub page_width: f32,
    pub cells: Vec<TextFragment>,
}

impl Row {
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.cells.iter().map(|cell| cell.text.clone()).collect()
    }

    #[must_use]
    pub fn text(&self) -> String {
        self.cells
            .iter()
            .map(|cell| cell.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[must_use]
    pub fn top(&self) -> f32 {
        self.cells.iter().map(|cell| cell.y0).fold(f32::MAX, f32::min)
    }

    #[must_use]
    pub fn bottom(&self) -> f32 {
        self.cells.iter().map(|cell| cell.y1).fold(f32::MIN, f32::max)
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        if self.cells.is_empty() {
            0.0
        } else {
            self.bottom() - self.top()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Decimal(Decimal),
    Integer(i64),
    Bool(bool),
    Null,
}

impl Value {
    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(value) => Some(*value),
            Self::Integer(value) => Some(Decimal::from(*value)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Decimal(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Null => Ok(()),
        }
    }
}

/// A typed row ready for the writer, tagged with its table and source page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub table: String,
    pub page: u32,
    pub fields: BTreeMap<String, Value>,
    #[serde(skip)]
    key_fields: Vec<String>,
}

impl Record {
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        page: u32,
        fields: BTreeMap<String, Value>,
        key_fields: Vec<String>,
    ) -> Self {
        Self {
            table: table.into(),
            page,
            fields,
            key_fields,
        }
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    #[must_use]
    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    /// Natural key values in `key_fields` order.
    #[must_use]
    pub fn key(&self) -> Vec<String> {
        self.key_fields
            .iter()
            .map(|field| self.fields.get(field).map(ToString::to_string).unwrap_or_default())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseResult {
    pub table_name: String,
    pub records: Vec<Record>,
    pub warnings: Vec<ParseWarning>,
    pub errors: Vec<RecordError>,
    pub pages_processed: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParseSummary {
    pub records: usize,
    pub warnings: usize,
    pub errors: usize,
    pub pages: usize,
}

impl ParseResult {
    #[must_use]
    pub fn empty(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            records: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            pages_processed: Vec::new(),
        }
    }

    #[must_use]
    pub fn summary(&self) -> ParseSummary {
        ParseSummary {
            records: self.records.len(),
            warnings: self.warnings.len(),
            errors: self.errors.len(),
            pages: self.pages_processed.len(),
        }
    }
}
