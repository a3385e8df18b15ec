use std::collections::HashMap;

use tracing::debug;

use crate::model::{ParseResult, Record};
use crate::warning::{ParseWarning, WarningCode};

/// Folds per-page results into one. Records keep first-seen order, except
/// that a record whose natural key repeats replaces the earlier one and moves
/// to the position of the later occurrence. Warnings and errors are kept in
/// input order, and pages are unioned.
#[must_use]
pub fn aggregate(results: Vec<ParseResult>) -> ParseResult {
    let table_name = results
        .first()
        .map(|result| result.table_name.clone())
        .unwrap_or_default();
    let mut merged = ParseResult::empty(table_name);

    let mut slots: Vec<Option<Record>> = Vec::new();
    let mut by_key: HashMap<Vec<String>, usize> = HashMap::new();

    for result in results {
        merged.warnings.extend(result.warnings);
        merged.errors.extend(result.errors);
        merged.pages_processed.extend(result.pages_processed);

        for record in result.records {
            let key = record.key();
            if let Some(previous_slot) = by_key.insert(key.clone(), slots.len()) {
                if let Some(previous) = slots[previous_slot].take() {
                    debug!(table = %record.table, ?key, replaced_page = previous.page, "duplicate key");
                    merged.warnings.push(
                        ParseWarning::new(
                            WarningCode::DuplicateKey,
                            format!(
                                "key ({}) from page {} replaced by page {}",
                                key.join(", "),
                                previous.page,
                                record.page
                            ),
                        )
                        .with_page(previous.page),
                    );
                }
            }
            slots.push(Some(record));
        }
    }

    merged.records = slots.into_iter().flatten().collect();
    merged.pages_processed.sort_unstable();
    merged.pages_processed.dedup();
    merged
}
