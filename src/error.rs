use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::RunState;

/// Fatal failure to open a document. A run that hits one of these produces no
/// partial result.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to load PDF: {0}")]
    Load(#[from] lopdf::Error),

    #[error("PDF is encrypted")]
    Encrypted,

    #[error("PDF contains no pages")]
    NoPages,

    #[error("timed out loading PDF after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("page {page} is outside the document (pages 1..={page_count})")]
pub struct PageRangeError {
    pub page: u32,
    pub page_count: u32,
}

/// Page-level failure. The run records it and moves on to the next page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error(transparent)]
    Range(#[from] PageRangeError),

    #[error("page {page} content cannot be read: {reason}")]
    Content { page: u32, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldNormalizationError {
    #[error("value is missing")]
    Missing,

    #[error("value is empty")]
    Empty,

    #[error("'{0}' is not a number")]
    NotNumeric(String),

    #[error("{value} is outside the accepted range {min}..={max}")]
    OutOfRange {
        value: String,
        min: String,
        max: String,
    },

    #[error("'{0}' is not a month/year date")]
    InvalidDate(String),

    #[error("'{0}' is not a recognised value")]
    Unrecognized(String),
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid option: {0}")]
    InvalidOption(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal run transition from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: RunState,
    pub to: RunState,
}
