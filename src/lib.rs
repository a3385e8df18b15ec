//! Table extraction for the Marshall Valuation Service manual.
//!
//! A [`Document`] yields positioned [`TextFragment`]s per page, which
//! [`reconstruct_rows`] groups into [`Row`]s. An [`Extractor`] interprets a
//! [`TableSpec`] over those rows to produce typed [`Record`]s, and
//! [`aggregate`] folds per-page results into one [`ParseResult`]. [`run`] and
//! [`parse_all`] drive the whole thing from a [`DocumentSource`].

mod aggregate;
mod error;
mod extract;
mod loader;
mod model;
mod options;
mod pipeline;
mod rows;
mod warning;
mod writer;

pub mod normalize;
pub mod regions;
pub mod spec;

pub use aggregate::aggregate;
pub use error::{
    DocumentError, ExtractError, FieldNormalizationError, PageError, PageRangeError,
    TransitionError,
};
pub use extract::{Extractor, extract};
pub use loader::{Document, DocumentSource};
pub use model::{ParseResult, ParseSummary, Record, Row, TextFragment, Value};
pub use options::{DEFAULT_OPEN_TIMEOUT, Geometry, PageRange, ParseOptions};
pub use pipeline::{Run, RunState, parse, parse_all, run};
pub use rows::reconstruct_rows;
pub use spec::{TableKind, TableSpec};
pub use warning::{ErrorCode, ParseWarning, RecordError, WarningCode};
pub use writer::{CsvWriter, MemoryWriter, SOURCE_PAGE_COLUMN, WriteFailure, WriteResult, Writer};
