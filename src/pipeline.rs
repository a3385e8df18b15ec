use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::aggregate;
use crate::error::{DocumentError, PageError, TransitionError};
use crate::extract::Extractor;
use crate::loader::{Document, DocumentSource};
use crate::model::ParseResult;
use crate::options::ParseOptions;
use crate::rows::reconstruct_rows;
use crate::spec::{TableKind, TableSpec};
use crate::warning::{ErrorCode, RecordError};

/// Progress of one table run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    NotStarted,
    Loading,
    Reconstructing,
    Extracting,
    Aggregated,
    Done,
    Failed,
}

impl RunState {
    /// Pages alternate between `Reconstructing` and `Extracting`; a document
    /// whose pages are all out of range goes straight from `Loading` to
    /// `Aggregated`. Only `Loading` can fail.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] for any other move.
    pub fn advance(self, next: Self) -> Result<Self, TransitionError> {
        let legal = matches!(
            (self, next),
            (Self::NotStarted, Self::Loading)
                | (Self::Loading, Self::Reconstructing | Self::Aggregated | Self::Failed)
                | (Self::Reconstructing, Self::Extracting)
                | (Self::Extracting, Self::Reconstructing | Self::Aggregated)
                | (Self::Aggregated, Self::Done)
        );
        if legal {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// One table extraction from load to aggregated result.
#[derive(Debug, Default)]
pub struct Run {
    state: RunState,
}

impl Run {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    fn enter(&mut self, next: RunState) {
        match self.state.advance(next) {
            Ok(state) => self.state = state,
            Err(error) => warn!(%error, "run state unchanged"),
        }
    }

    /// Opens the document, then extracts `spec` with `options` applied.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] when the document cannot be opened; the run
    /// ends in [`RunState::Failed`] and produces no partial result.
    pub fn execute(
        &mut self,
        source: &DocumentSource,
        spec: &TableSpec,
        options: &ParseOptions,
    ) -> Result<ParseResult, DocumentError> {
        self.enter(RunState::Loading);
        let spec = apply_options(spec, options);

        let document = match Document::open(source, options.open_timeout) {
            Ok(document) => document,
            Err(error) => {
                warn!(table = %spec.name, %error, "failed to open document");
                self.enter(RunState::Failed);
                return Err(error);
            }
        };

        let result = self.extract_document(&document, &spec);
        self.enter(RunState::Done);

        let summary = result.summary();
        info!(
            table = %spec.name,
            records = summary.records,
            warnings = summary.warnings,
            errors = summary.errors,
            pages = summary.pages,
            "table parsed"
        );
        Ok(result)
    }

    fn extract_document(&mut self, document: &Document, spec: &TableSpec) -> ParseResult {
        let mut extractor = Extractor::new(spec);
        let mut results = Vec::new();

        for page in spec.page_range.pages() {
            let page_data = document.fragments(page).and_then(|fragments| {
                let (width, _) = document.page_size(page)?;
                Ok((fragments, width))
            });
            let (fragments, width) = match page_data {
                Ok(page_data) => page_data,
                Err(error) => {
                    warn!(table = %spec.name, page, %error, "skipping page");
                    let mut skipped = ParseResult::empty(&spec.name);
                    skipped.errors.push(page_failure(page, &error));
                    results.push(skipped);
                    continue;
                }
            };

            self.enter(RunState::Reconstructing);
            let rows = reconstruct_rows(&fragments, width, &spec.geometry);
            debug!(table = %spec.name, page, fragments = fragments.len(), rows = rows.len(), "page reconstructed");

            self.enter(RunState::Extracting);
            results.push(extractor.feed_page(page, &rows));
        }
        results.push(extractor.finish());

        self.enter(RunState::Aggregated);
        aggregate(results)
    }
}

fn page_failure(page: u32, error: &PageError) -> RecordError {
    let code = match error {
        PageError::Range(_) => ErrorCode::PageRange,
        PageError::Content { .. } => ErrorCode::PageContent,
    };
    RecordError::new(code, error.to_string()).with_page(page)
}

fn apply_options(spec: &TableSpec, options: &ParseOptions) -> TableSpec {
    let mut spec = spec.clone();
    if let Some(pages) = options.pages {
        spec = spec.with_pages(pages);
    }
    if let Some(geometry) = options.geometry {
        spec = spec.with_geometry(geometry);
    }
    spec
}

/// Extracts `spec` from an already opened document. Pages outside the
/// document are reported as [`ErrorCode::PageRange`] errors and pages whose
/// content cannot be read as [`ErrorCode::PageContent`]; both are skipped.
#[must_use]
pub fn parse(document: &Document, spec: &TableSpec) -> ParseResult {
    let mut run = Run {
        state: RunState::Loading,
    };
    run.extract_document(document, spec)
}

/// Opens `source` and extracts one table.
///
/// # Errors
///
/// Returns [`DocumentError`] when the document cannot be opened.
pub fn run(
    source: &DocumentSource,
    spec: &TableSpec,
    options: &ParseOptions,
) -> Result<ParseResult, DocumentError> {
    Run::new().execute(source, spec, options)
}

/// Extracts every built-in table in parallel. Each table opens its own
/// document from the same bytes, so one table failing to load does not stop
/// the others. `options` apply to every table.
///
/// # Errors
///
/// Returns [`DocumentError::Io`] when a path source cannot be read.
pub fn parse_all(
    source: &DocumentSource,
    options: &ParseOptions,
) -> Result<Vec<(TableKind, Result<ParseResult, DocumentError>)>, DocumentError> {
    let shared = match source {
        DocumentSource::Path(path) => DocumentSource::Bytes(std::fs::read(path)?.into()),
        DocumentSource::Bytes(_) => source.clone(),
    };

    Ok(TableKind::ALL
        .par_iter()
        .map(|kind| (*kind, run(&shared, &kind.spec(), options)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{Run, RunState, page_failure};
    use crate::error::{PageError, PageRangeError};
    use crate::warning::ErrorCode;

    #[test]
    fn happy_path_transitions() {
        let mut state = RunState::NotStarted;
        for next in [
            RunState::Loading,
            RunState::Reconstructing,
            RunState::Extracting,
            RunState::Reconstructing,
            RunState::Extracting,
            RunState::Aggregated,
            RunState::Done,
        ] {
            state = state.advance(next).expect("transition should be legal");
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn only_loading_can_fail() {
        assert_eq!(
            RunState::Loading.advance(RunState::Failed),
            Ok(RunState::Failed)
        );
        assert!(RunState::Extracting.advance(RunState::Failed).is_err());
        assert!(RunState::Done.advance(RunState::Loading).is_err());
        assert!(RunState::NotStarted.advance(RunState::Extracting).is_err());
    }

    #[test]
    fn illegal_enter_keeps_state() {
        let mut run = Run::new();
        run.enter(RunState::Done);
        assert_eq!(run.state(), RunState::NotStarted);
        run.enter(RunState::Loading);
        assert_eq!(run.state(), RunState::Loading);
    }

    #[test]
    fn page_failures_keep_their_cause() {
        let unreadable = PageError::Content {
            page: 4,
            reason: "bad stream".to_string(),
        };
        let error = page_failure(4, &unreadable);
        assert_eq!(error.code, ErrorCode::PageContent);
        assert_eq!(error.page, Some(4));
        assert!(error.message.contains("bad stream"));

        let missing = PageError::from(PageRangeError {
            page: 9,
            page_count: 2,
        });
        assert_eq!(page_failure(9, &missing).code, ErrorCode::PageRange);
    }
}
