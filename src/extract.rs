use std::collections::BTreeMap;

use tracing::debug;

use crate::aggregate::aggregate;
use crate::error::FieldNormalizationError;
use crate::model::{ParseResult, Record, Row, TextFragment, Value};
use crate::normalize;
use crate::spec::{ColumnSpec, OverflowPolicy, Panel, Shape, TableSpec};
use crate::warning::{ErrorCode, ParseWarning, RecordError, WarningCode};

/// Top-to-top distance, in line pitches, that ends a data region.
const BLANK_RUN_PITCHES: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableState {
    SeekingHeader,
    Data,
}

#[derive(Debug, Clone)]
struct PivotLabel {
    value: Value,
    left: f32,
    center: f32,
}

#[derive(Debug, Clone)]
struct PendingRow {
    page: u32,
    row: usize,
    cells: Vec<TextFragment>,
}

#[derive(Debug, Default)]
struct Lane {
    labels: Vec<PivotLabel>,
    section: Option<String>,
    pending: Vec<PendingRow>,
}

/// Where one row attempt came from, for diagnostics.
#[derive(Debug, Clone, Copy)]
struct RowOrigin {
    page: u32,
    row: usize,
}

impl RowOrigin {
    fn error(self, code: ErrorCode, message: impl Into<String>, raw: &str) -> RecordError {
        RecordError::new(code, message)
            .with_page(self.page)
            .with_row(self.row)
            .with_raw(raw)
    }

    fn warning(self, code: WarningCode, message: impl Into<String>) -> ParseWarning {
        ParseWarning::new(code, message)
            .with_page(self.page)
            .with_row(self.row)
    }
}

fn lane_cells<'r>(row: &'r Row, panel: &Panel) -> Vec<&'r TextFragment> {
    row.cells
        .iter()
        .filter(|cell| {
            let fraction = if row.page_width > 0.0 {
                cell.center_x() / row.page_width
            } else {
                0.0
            };
            panel.contains(fraction)
        })
        .collect()
}

/// The page's usual distance between consecutive row tops: the lower median
/// of the positive steps.
fn line_pitch(rows: &[Row]) -> Option<f32> {
    let tops = rows
        .iter()
        .filter(|row| !row.cells.is_empty())
        .map(Row::top)
        .collect::<Vec<_>>();
    let mut steps = tops
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .filter(|step| *step > 0.0)
        .collect::<Vec<_>>();
    if steps.is_empty() {
        return None;
    }
    steps.sort_by(f32::total_cmp);
    Some(steps[(steps.len() - 1) / 2])
}

fn ends_data_region(previous: &Row, next: &Row, pitch: Option<f32>) -> bool {
    pitch.is_some_and(|pitch| next.top() - previous.top() >= BLANK_RUN_PITCHES * pitch)
}

/// Matches `markers` in order against consecutive rows starting at `start`.
/// Several markers may share a row; every row in the run must contribute at
/// least one. Returns the number of rows consumed.
fn match_header(markers: &[String], rows: &[Row], start: usize) -> Option<usize> {
    if markers.is_empty() {
        return None;
    }

    let mut next_marker = 0;
    for (offset, row) in rows[start..].iter().enumerate() {
        let text = row.text().to_uppercase();
        let mut cursor = 0;
        let mut hits = 0;
        while let Some(marker) = markers.get(next_marker) {
            let needle = marker.to_uppercase();
            let Some(position) = text[cursor..].find(&needle) else {
                break;
            };
            cursor += position + needle.len();
            next_marker += 1;
            hits += 1;
        }

        if hits == 0 {
            return None;
        }
        if next_marker == markers.len() {
            return Some(offset + 1);
        }
    }
    None
}

/// Applies the overflow policy to a row with more cells than `width`.
fn fit_to_width(
    mut texts: Vec<String>,
    width: usize,
    policy: OverflowPolicy,
    origin: RowOrigin,
    raw: &str,
) -> Result<(Vec<String>, Option<ParseWarning>), RecordError> {
    if texts.len() <= width {
        return Ok((texts, None));
    }

    let surplus = texts.len() - width;
    match policy {
        OverflowPolicy::AbsorbInto(index) if index < width => {
            let joined = texts
                .drain(index..=index + surplus)
                .collect::<Vec<_>>()
                .join(" ");
            texts.insert(index, joined);
            let warning = origin.warning(
                WarningCode::OverflowMerged,
                format!("{surplus} surplus cell(s) merged into column {}", index + 1),
            );
            Ok((texts, Some(warning)))
        }
        OverflowPolicy::Truncate => {
            texts.truncate(width);
            let warning = origin.warning(
                WarningCode::OverflowTruncated,
                format!("{surplus} surplus cell(s) dropped"),
            );
            Ok((texts, Some(warning)))
        }
        OverflowPolicy::Reject | OverflowPolicy::AbsorbInto(_) => Err(origin.error(
            ErrorCode::RowOverflow,
            format!("row has {} cells, expected at most {width}", width + surplus),
            raw,
        )),
    }
}

/// Normalizes one field into `fields`. Required failures are pushed to
/// `failures`; optional ones become `Null`, with a warning unless the cell was
/// simply absent.
fn apply_column(
    column: &ColumnSpec,
    raw_cell: Option<&str>,
    origin: RowOrigin,
    raw_row: &str,
    fields: &mut BTreeMap<String, Value>,
    failures: &mut Vec<RecordError>,
    warnings: &mut Vec<ParseWarning>,
) {
    match column.normalize(raw_cell) {
        Ok(value) => {
            fields.insert(column.field.clone(), value);
        }
        Err(err) if column.required => {
            let code = if err == FieldNormalizationError::Missing {
                ErrorCode::MissingField
            } else {
                ErrorCode::FieldNormalization
            };
            failures.push(
                origin
                    .error(code, format!("{}: {err}", column.field), raw_row)
                    .with_field(&column.field),
            );
        }
        Err(err) => {
            if err != FieldNormalizationError::Missing {
                warnings.push(
                    origin
                        .warning(WarningCode::OptionalField, format!("{}: {err}", column.field))
                        .with_field(&column.field),
                );
            }
            fields.insert(column.field.clone(), Value::Null);
        }
    }
}

/// Incremental extractor. Header state carries across pages, so a table whose
/// header is printed once keeps producing records on continuation pages.
#[derive(Debug)]
pub struct Extractor<'s> {
    spec: &'s TableSpec,
    panels: Vec<Panel>,
    lanes: Vec<Lane>,
    state: TableState,
    header_seen: bool,
    context: Option<String>,
}

impl<'s> Extractor<'s> {
    #[must_use]
    pub fn new(spec: &'s TableSpec) -> Self {
        let panels = if spec.panels.is_empty() {
            vec![Panel::full_width()]
        } else {
            spec.panels.clone()
        };
        let lanes = panels.iter().map(|_| Lane::default()).collect();
        let headerless = spec.header_markers.is_empty();

        Self {
            spec,
            panels,
            lanes,
            state: if headerless {
                TableState::Data
            } else {
                TableState::SeekingHeader
            },
            header_seen: headerless,
            context: None,
        }
    }

    /// Processes the reconstructed rows of one page, top to bottom.
    #[must_use]
    pub fn feed_page(&mut self, page: u32, rows: &[Row]) -> ParseResult {
        let mut result = ParseResult::empty(&self.spec.name);
        result.pages_processed.push(page);

        if let Some(rule) = &self.spec.page_context {
            let page_text = rows.iter().map(Row::text).collect::<Vec<_>>().join("\n");
            if let Some(context) = (rule.detect)(&page_text) {
                debug!(table = %self.spec.name, page, %context, "page context");
                self.context = Some(context);
            }
        }

        let pitch = line_pitch(rows);
        let mut previous: Option<&Row> = None;
        let mut index = 0;
        while index < rows.len() {
            let row = &rows[index];

            if self.state == TableState::Data {
                if previous.is_some_and(|previous| ends_data_region(previous, row, pitch)) {
                    debug!(table = %self.spec.name, page, row = index, "blank run ends data region");
                    self.end_region(&mut result);
                } else if self.spec.is_terminator(&row.text()) {
                    debug!(table = %self.spec.name, page, row = index, "terminator ends data region");
                    self.end_region(&mut result);
                    previous = Some(row);
                    index += 1;
                    continue;
                }
            }

            if let Some(consumed) = match_header(&self.spec.header_markers, rows, index) {
                if self.state == TableState::Data {
                    self.end_region(&mut result);
                }
                debug!(table = %self.spec.name, page, row = index, "header matched");
                self.header_seen = true;
                self.state = TableState::Data;

                let last = index + consumed - 1;
                self.collect_labels(&rows[last]);
                index = last + 1;
                while index < rows.len() && self.is_label_row(&rows[index]) {
                    self.collect_labels(&rows[index]);
                    index += 1;
                }
                previous = Some(&rows[index - 1]);
                continue;
            }

            if self.state == TableState::Data {
                self.data_row(page, index, row, &mut result);
            }
            previous = Some(row);
            index += 1;
        }

        result
    }

    /// Closes the run. Rows still waiting for a section label become errors,
    /// and a header that never matched is reported.
    #[must_use]
    pub fn finish(mut self) -> ParseResult {
        let mut result = ParseResult::empty(&self.spec.name);
        self.end_region(&mut result);

        if !self.header_seen {
            let markers = self.spec.header_markers.join(", ");
            result.warnings.push(ParseWarning::new(
                WarningCode::HeaderNotFound,
                format!(
                    "header [{markers}] not found on pages {}",
                    self.spec.page_range
                ),
            ));
        }
        result
    }

    fn end_region(&mut self, result: &mut ParseResult) {
        if self.state == TableState::Data && !self.spec.header_markers.is_empty() {
            self.state = TableState::SeekingHeader;
        }

        let section_field = self
            .spec
            .section
            .as_ref()
            .map_or("section", |section| section.field.as_str());
        for lane in &mut self.lanes {
            for pending in lane.pending.drain(..) {
                let raw = pending
                    .cells
                    .iter()
                    .map(|cell| cell.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                let origin = RowOrigin {
                    page: pending.page,
                    row: pending.row,
                };
                result.errors.push(
                    origin
                        .error(
                            ErrorCode::MissingField,
                            format!("{section_field}: no section label precedes this row"),
                            &raw,
                        )
                        .with_field(section_field),
                );
            }
            lane.section = None;
            lane.labels.clear();
        }
    }

    fn pivot(&self) -> Option<&ColumnSpec> {
        match &self.spec.shape {
            Shape::Flat => None,
            Shape::Matrix { pivot, .. } => Some(pivot),
        }
    }

    fn is_label_row(&self, row: &Row) -> bool {
        let Some(pivot) = self.pivot() else {
            return false;
        };
        let mut cells = row
            .cells
            .iter()
            .filter(|cell| !self.spec.is_noise(&cell.text))
            .peekable();
        cells.peek().is_some() && cells.all(|cell| pivot.normalize(Some(&cell.text)).is_ok())
    }

    fn collect_labels(&mut self, row: &Row) {
        let Some(pivot) = self.pivot().cloned() else {
            return;
        };

        for (panel, lane) in self.panels.iter().zip(&mut self.lanes) {
            let labels = lane_cells(row, panel)
                .into_iter()
                .filter_map(|cell| {
                    pivot.normalize(Some(&cell.text)).ok().map(|value| PivotLabel {
                        value,
                        left: cell.x0,
                        center: cell.center_x(),
                    })
                })
                .collect::<Vec<_>>();
            if !labels.is_empty() {
                lane.labels = labels;
            }
        }
    }

    fn data_row(&mut self, page: u32, index: usize, row: &Row, result: &mut ParseResult) {
        for lane_index in 0..self.panels.len() {
            let cells = lane_cells(row, &self.panels[lane_index])
                .into_iter()
                .filter(|cell| !self.spec.is_noise(&cell.text))
                .cloned()
                .collect::<Vec<_>>();
            if cells.is_empty() {
                continue;
            }
            self.lane_row(lane_index, RowOrigin { page, row: index }, cells, result);
        }
    }

    fn lane_row(
        &mut self,
        lane_index: usize,
        origin: RowOrigin,
        mut cells: Vec<TextFragment>,
        result: &mut ParseResult,
    ) {
        let spec = self.spec;
        let mut heading = false;
        if let Some(section) = &spec.section {
            if let Some(label) = cells.first().and_then(|cell| (section.matcher)(&cell.text)) {
                debug!(table = %spec.name, page = origin.page, row = origin.row, %label, "section");
                cells.remove(0);
                let pending = std::mem::take(&mut self.lanes[lane_index].pending);
                self.lanes[lane_index].section = Some(label);
                for row in pending {
                    let origin = RowOrigin {
                        page: row.page,
                        row: row.row,
                    };
                    self.map_cells(lane_index, origin, &row.cells, false, result);
                }
                if cells.is_empty() {
                    return;
                }
                heading = section.heading_record.is_some()
                    && cells.iter().all(|cell| normalize::looks_numeric(&cell.text));
            }
        }

        let texts = cells.iter().map(|cell| cell.text.clone()).collect::<Vec<_>>();
        if !(spec.row_filter)(&texts) {
            debug!(table = %spec.name, page = origin.page, row = origin.row, "row filtered");
            return;
        }

        if let Some(section) = &spec.section {
            if self.lanes[lane_index].section.is_none() {
                if section.wait_for_label {
                    self.lanes[lane_index].pending.push(PendingRow {
                        page: origin.page,
                        row: origin.row,
                        cells,
                    });
                } else {
                    result.errors.push(
                        origin
                            .error(
                                ErrorCode::MissingField,
                                format!("{}: no section label precedes this row", section.field),
                                &texts.join(" "),
                            )
                            .with_field(&section.field),
                    );
                }
                return;
            }
        }

        self.map_cells(lane_index, origin, &cells, heading, result);
    }

    /// Fields shared by every record from this lane: panel tag, section and
    /// the heading flag.
    fn lane_fields(&self, lane_index: usize) -> BTreeMap<String, Value> {
        let mut fields = BTreeMap::new();
        if let Some((field, value)) = &self.panels[lane_index].tag {
            fields.insert(field.clone(), Value::Text(value.clone()));
        }
        if let (Some(section), Some(label)) =
            (&self.spec.section, &self.lanes[lane_index].section)
        {
            fields.insert(section.field.clone(), Value::Text(label.clone()));
        }
        if let Some(heading) = self.spec.heading_record() {
            fields.insert(heading.flag.clone(), Value::Bool(false));
        }
        fields
    }

    fn record(&self, page: u32, mut fields: BTreeMap<String, Value>) -> Record {
        if let Some(rule) = &self.spec.page_context {
            let value = (rule.resolve)(self.context.as_deref(), &fields);
            fields.insert(rule.field.clone(), value);
        }
        Record::new(&self.spec.name, page, fields, self.spec.natural_key.clone())
    }

    /// `heading` marks a section heading row carrying its own values.
    fn map_cells(
        &self,
        lane_index: usize,
        origin: RowOrigin,
        cells: &[TextFragment],
        heading: bool,
        result: &mut ParseResult,
    ) {
        match &self.spec.shape {
            Shape::Flat => self.map_flat(lane_index, origin, cells, heading, result),
            Shape::Matrix { pivot, value } => {
                self.map_matrix(lane_index, origin, cells, (pivot, value), result);
            }
        }
    }

    fn map_flat(
        &self,
        lane_index: usize,
        origin: RowOrigin,
        cells: &[TextFragment],
        heading: bool,
        result: &mut ParseResult,
    ) {
        let texts = cells.iter().map(|cell| cell.text.clone()).collect::<Vec<_>>();
        let raw = texts.join(" ");
        let heading = self.spec.heading_record().filter(|_| heading);
        let columns = self
            .spec
            .columns
            .iter()
            .filter(|column| !heading.is_some_and(|heading| column.field == heading.blank))
            .collect::<Vec<_>>();

        let texts = match fit_to_width(texts, columns.len(), self.spec.overflow, origin, &raw) {
            Ok((texts, warning)) => {
                result.warnings.extend(warning);
                texts
            }
            Err(error) => {
                result.errors.push(error);
                return;
            }
        };

        let mut fields = self.lane_fields(lane_index);
        if let Some(heading) = heading {
            fields.insert(heading.blank.clone(), Value::Text(String::new()));
            fields.insert(heading.flag.clone(), Value::Bool(true));
        }
        let mut failures = Vec::new();
        for (position, column) in columns.into_iter().enumerate() {
            apply_column(
                column,
                texts.get(position).map(String::as_str),
                origin,
                &raw,
                &mut fields,
                &mut failures,
                &mut result.warnings,
            );
        }

        if failures.is_empty() {
            result.records.push(self.record(origin.page, fields));
        } else {
            result.errors.extend(failures);
        }
    }

    fn map_matrix(
        &self,
        lane_index: usize,
        origin: RowOrigin,
        cells: &[TextFragment],
        (pivot, value_column): (&ColumnSpec, &ColumnSpec),
        result: &mut ParseResult,
    ) {
        let raw = cells
            .iter()
            .map(|cell| cell.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let labels = &self.lanes[lane_index].labels;
        let key_width = self.spec.columns.len();

        // Cells left of the first label column are row keys.
        let (key_cells, value_cells): (Vec<&TextFragment>, Vec<&TextFragment>) =
            match labels.as_slice() {
                [] => {
                    let split = key_width.min(cells.len());
                    (cells[..split].iter().collect(), cells[split..].iter().collect())
                }
                [only] => {
                    let boundary = only.left - (only.center - only.left);
                    cells.iter().partition(|cell| cell.center_x() < boundary)
                }
                [first, second, ..] => {
                    let boundary = first.center - (second.center - first.center) / 2.0;
                    cells.iter().partition(|cell| cell.center_x() < boundary)
                }
            };

        let key_texts = key_cells.iter().map(|cell| cell.text.clone()).collect::<Vec<_>>();
        let mut key_texts =
            match fit_to_width(key_texts, key_width, self.spec.overflow, origin, &raw) {
                Ok((texts, warning)) => {
                    result.warnings.extend(warning);
                    texts
                }
                Err(error) => {
                    result.errors.push(error);
                    return;
                }
            };

        // Short key runs lose their leading (left-most) columns.
        let mut keys: Vec<Option<String>> = vec![None; key_width - key_texts.len()];
        keys.extend(key_texts.drain(..).map(Some));

        let mut base = self.lane_fields(lane_index);
        let mut failures = Vec::new();
        for (column, key) in self.spec.columns.iter().zip(&keys) {
            apply_column(
                column,
                key.as_deref(),
                origin,
                &raw,
                &mut base,
                &mut failures,
                &mut result.warnings,
            );
        }
        if !failures.is_empty() {
            result.errors.extend(failures);
            return;
        }

        if value_cells.is_empty() {
            result.errors.push(
                origin
                    .error(
                        ErrorCode::MissingField,
                        format!("{}: row has no value cells", value_column.field),
                        &raw,
                    )
                    .with_field(&value_column.field),
            );
            return;
        }

        let mut used = vec![false; labels.len()];
        for cell in value_cells {
            let nearest = labels
                .iter()
                .enumerate()
                .min_by(|(_, left), (_, right)| {
                    (left.center - cell.center_x())
                        .abs()
                        .total_cmp(&(right.center - cell.center_x()).abs())
                })
                .map(|(position, _)| position);

            let Some(position) = nearest.filter(|position| !used[*position]) else {
                result.warnings.push(
                    origin
                        .warning(
                            WarningCode::UnassignedCell,
                            format!("'{}' has no free {} column", cell.text, pivot.field),
                        )
                        .with_field(&pivot.field),
                );
                continue;
            };
            used[position] = true;

            let mut fields = base.clone();
            fields.insert(pivot.field.clone(), labels[position].value.clone());
            let mut failures = Vec::new();
            apply_column(
                value_column,
                Some(&cell.text),
                origin,
                &raw,
                &mut fields,
                &mut failures,
                &mut result.warnings,
            );
            if failures.is_empty() {
                result.records.push(self.record(origin.page, fields));
            } else {
                result.errors.extend(failures);
            }
        }
    }
}

/// Runs a whole table over rows from one or more pages. Rows are grouped by
/// page in ascending order; records from later pages replace earlier records
/// with the same natural key.
#[must_use]
pub fn extract(rows: &[Row], spec: &TableSpec) -> ParseResult {
    let mut pages: BTreeMap<u32, Vec<Row>> = BTreeMap::new();
    for row in rows {
        pages.entry(row.page).or_default().push(row.clone());
    }

    let mut extractor = Extractor::new(spec);
    let mut results = pages
        .iter()
        .map(|(page, rows)| extractor.feed_page(*page, rows))
        .collect::<Vec<_>>();
    results.push(extractor.finish());
    aggregate(results)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::{extract, match_header};
    use crate::model::{Row, TextFragment, Value};
    use crate::options::PageRange;
    use crate::spec::{ColumnSpec, FieldType, OverflowPolicy, TableKind, TableSpec};
    use crate::warning::{ErrorCode, WarningCode};

    const LINE: f32 = 14.0;

    /// Lays out `lines` of `(x0, text)` cells, 14pt apart, starting at `top`.
    fn rows_at(page: u32, top: f32, lines: &[&[(f32, &str)]]) -> Vec<Row> {
        lines
            .iter()
            .enumerate()
            .map(|(line, cells)| {
                let y0 = top + LINE * line as f32;
                Row {
                    page,
                    page_width: 600.0,
                    cells: cells
                        .iter()
                        .map(|(x0, text)| {
                            let width = 6.0 * text.chars().count() as f32;
                            TextFragment::new(*text, *x0, y0, x0 + width, y0 + 10.0, page)
                        })
                        .collect(),
                }
            })
            .collect()
    }

    fn simple_spec() -> TableSpec {
        TableSpec::flat(
            "local",
            PageRange::single(1).with_end(2),
            &["Region", "City", "Multiplier"],
            vec![
                ColumnSpec::new("region", FieldType::String),
                ColumnSpec::new("city", FieldType::String),
                ColumnSpec::new("multiplier", FieldType::Decimal),
            ],
            &["region", "city"],
        )
    }

    #[test]
    fn header_markers_may_span_rows() {
        let rows = rows_at(
            1,
            100.0,
            &[&[(50.0, "Region"), (150.0, "City")], &[(300.0, "Multiplier")]],
        );
        let markers = ["Region", "City", "Multiplier"].map(String::from);
        assert_eq!(match_header(&markers, &rows, 0), Some(2));
        assert_eq!(match_header(&markers, &rows, 1), None);
    }

    #[test]
    fn flat_rows_become_records() {
        let rows = rows_at(
            1,
            100.0,
            &[
                &[(50.0, "Region"), (150.0, "City"), (300.0, "Multiplier")],
                &[(50.0, "ALBERTA"), (150.0, "Calgary"), (300.0, "1.21")],
                &[(50.0, "ALBERTA"), (150.0, "Edmonton"), (300.0, "1.19%")],
            ],
        );

        let result = extract(&rows, &simple_spec());
        assert_eq!(result.records.len(), 2);
        assert!(result.errors.is_empty());
        assert_eq!(
            result.records[1].get("multiplier"),
            Some(&Value::Decimal(dec!(1.19)))
        );
        assert_eq!(result.records[1].key(), vec!["ALBERTA", "Edmonton"]);
        assert_eq!(result.pages_processed, vec![1]);
    }

    #[test]
    fn bad_required_field_excludes_only_that_row() {
        let rows = rows_at(
            1,
            100.0,
            &[
                &[(50.0, "Region"), (150.0, "City"), (300.0, "Multiplier")],
                &[(50.0, "ALBERTA"), (150.0, "Calgary"), (300.0, "n/a")],
                &[(50.0, "ALBERTA"), (150.0, "Edmonton"), (300.0, "1.19")],
                &[(50.0, "ALBERTA"), (150.0, "Red Deer")],
            ],
        );

        let result = extract(&rows, &simple_spec());
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].code, ErrorCode::FieldNormalization);
        assert_eq!(result.errors[0].row, Some(1));
        assert_eq!(result.errors[0].field.as_deref(), Some("multiplier"));
        assert_eq!(result.errors[1].code, ErrorCode::MissingField);
    }

    #[test]
    fn missing_header_yields_warning_and_no_records() {
        let rows = rows_at(1, 100.0, &[&[(50.0, "ALBERTA"), (150.0, "Calgary"), (300.0, "1.21")]]);

        let result = extract(&rows, &simple_spec());
        assert!(result.records.is_empty());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].code, WarningCode::HeaderNotFound);
    }

    #[test]
    fn header_state_carries_to_next_page() {
        let mut rows = rows_at(
            1,
            100.0,
            &[
                &[(50.0, "Region"), (150.0, "City"), (300.0, "Multiplier")],
                &[(50.0, "ALBERTA"), (150.0, "Calgary"), (300.0, "1.21")],
            ],
        );
        rows.extend(rows_at(2, 60.0, &[&[(50.0, "ONTARIO"), (150.0, "Ottawa"), (300.0, "1.15")]]));

        let result = extract(&rows, &simple_spec());
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[1].page, 2);
        assert_eq!(result.pages_processed, vec![1, 2]);
    }

    #[test]
    fn blank_run_ends_data_region() {
        let mut rows = rows_at(
            1,
            100.0,
            &[
                &[(50.0, "Region"), (150.0, "City"), (300.0, "Multiplier")],
                &[(50.0, "ALBERTA"), (150.0, "Calgary"), (300.0, "1.21")],
            ],
        );
        rows.extend(rows_at(1, 160.0, &[&[(50.0, "Note"), (150.0, "see"), (300.0, "1.00")]]));

        let result = extract(&rows, &simple_spec());
        assert_eq!(result.records.len(), 1);
    }

    #[test]
    fn overflow_absorbs_split_city_names() {
        let spec = TableSpec {
            overflow: OverflowPolicy::AbsorbInto(1),
            ..simple_spec()
        };
        let rows = rows_at(
            1,
            100.0,
            &[
                &[(50.0, "Region"), (150.0, "City"), (300.0, "Multiplier")],
                &[(50.0, "NEW YORK"), (150.0, "Staten"), (200.0, "Island"), (300.0, "1.31")],
            ],
        );

        let result = extract(&rows, &spec);
        assert_eq!(
            result.records[0].get("city"),
            Some(&Value::Text("Staten Island".to_string()))
        );
        assert_eq!(result.warnings[0].code, WarningCode::OverflowMerged);

        let rejected = extract(&rows, &simple_spec());
        assert!(rejected.records.is_empty());
        assert_eq!(rejected.errors[0].code, ErrorCode::RowOverflow);
    }

    #[test]
    fn duplicate_keys_keep_the_later_row() {
        let rows = rows_at(
            1,
            100.0,
            &[
                &[(50.0, "Region"), (150.0, "City"), (300.0, "Multiplier")],
                &[(50.0, "ALBERTA"), (150.0, "Calgary"), (300.0, "1.21")],
                &[(50.0, "ALBERTA"), (150.0, "Calgary"), (300.0, "1.25")],
            ],
        );

        let result = extract(&rows, &simple_spec());
        assert_eq!(result.records.len(), 1);
        assert_eq!(
            result.records[0].get("multiplier"),
            Some(&Value::Decimal(dec!(1.25)))
        );
        assert_eq!(result.warnings[0].code, WarningCode::DuplicateKey);
    }

    #[test]
    fn floor_area_matrix_pivots_on_perimeter_labels() {
        let spec = TableKind::FloorAreaPerimeterMultipliers.spec();
        let rows = rows_at(
            90,
            100.0,
            &[
                &[(150.0, "FLOOR AREA/PERIMETER MULTIPLIERS")],
                &[(200.0, "160"), (260.0, "180"), (320.0, "200")],
                &[(40.0, "139"), (100.0, "1,500"), (200.0, "1.217"), (260.0, "----"), (320.0, "1.185")],
                &[(100.0, "2,000"), (200.0, "1.190"), (260.0, "1.170"), (320.0, "1.150")],
                &[(150.0, "STORY HEIGHT MULTIPLIERS")],
                &[(200.0, "2.13"), (260.0, "7"), (320.0, "0.937")],
            ],
        );

        let result = extract(&rows, &spec);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.records.len(), 5);

        let first = &result.records[0];
        assert_eq!(first.get("area_sqm"), Some(&Value::Integer(139)));
        assert_eq!(first.get("area_bucket"), Some(&Value::Integer(1500)));
        assert_eq!(first.get("perimeter_bucket"), Some(&Value::Integer(160)));
        assert_eq!(first.get("multiplier"), Some(&Value::Decimal(dec!(1.217))));

        let second = &result.records[1];
        assert_eq!(second.get("perimeter_bucket"), Some(&Value::Integer(200)));

        let short_key = &result.records[2];
        assert_eq!(short_key.get("area_sqm"), Some(&Value::Null));
        assert_eq!(short_key.get("area_bucket"), Some(&Value::Integer(2000)));
    }

    #[test]
    fn current_cost_uses_panels_and_region_sections() {
        let spec = TableKind::CurrentCostMultipliers.spec();
        let rows = rows_at(
            717,
            100.0,
            &[
                &[
                    (20.0, "Class"),
                    (80.0, "(11/24)"),
                    (150.0, "(8/24)"),
                    (350.0, "Class"),
                    (410.0, "(11/24)"),
                    (480.0, "(8/24)"),
                ],
                &[(20.0, "EASTERN"), (350.0, "EASTERN")],
                &[(20.0, "A"), (80.0, "1.06"), (150.0, "1.05"), (350.0, "A"), (410.0, "1.07")],
                &[(0.0, "CENTRAL"), (50.0, "C"), (150.0, "1.02")],
            ],
        );

        let result = extract(&rows, &spec);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.records.len(), 4);

        let keys = result.records.iter().map(|record| record.key()).collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![
                vec!["calculator", "Eastern", "A", "2024-11"],
                vec!["calculator", "Eastern", "A", "2024-08"],
                vec!["segregated", "Eastern", "A", "2024-11"],
                vec!["calculator", "Central", "C", "2024-08"],
            ]
        );
    }

    #[test]
    fn rows_before_first_section_wait_for_it() {
        let spec = TableKind::CurrentCostMultipliers.spec();
        let rows = rows_at(
            717,
            100.0,
            &[
                &[(20.0, "Class"), (80.0, "(11/24)")],
                &[(20.0, "A"), (80.0, "1.06")],
                &[(20.0, "WESTERN")],
            ],
        );

        let result = extract(&rows, &spec);
        assert_eq!(result.records.len(), 1);
        assert_eq!(
            result.records[0].get("region"),
            Some(&Value::Text("Western".to_string()))
        );

        let unresolved = extract(&rows[..2], &spec);
        assert!(unresolved.records.is_empty());
        assert_eq!(unresolved.errors[0].code, ErrorCode::MissingField);
        assert_eq!(unresolved.errors[0].field.as_deref(), Some("region"));
    }

    #[test]
    fn story_height_reads_both_panels_and_drops_base_marker() {
        let spec = TableKind::StoryHeightMultipliers.spec();
        let rows = rows_at(
            90,
            100.0,
            &[
                &[(200.0, "STORY HEIGHT MULTIPLIERS")],
                &[
                    (20.0, "2.13"),
                    (80.0, "7"),
                    (140.0, "0.937"),
                    (200.0, "0.905"),
                    (320.0, "3.05"),
                    (380.0, "10"),
                    (420.0, "(base)"),
                    (480.0, "1.000"),
                    (540.0, "1.000"),
                ],
                &[(20.0, "2.44"), (80.0, "8"), (140.0, "0.958")],
            ],
        );

        let result = extract(&rows, &spec);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        let heights = result
            .records
            .iter()
            .map(|record| record.get("height_category").cloned())
            .collect::<Vec<_>>();
        assert_eq!(
            heights,
            vec![
                Some(Value::Integer(7)),
                Some(Value::Integer(10)),
                Some(Value::Integer(8))
            ]
        );
        assert_eq!(result.records[2].get("cubic_multiplier"), Some(&Value::Null));
    }

    /// One row per `(top, cells)` entry, for uneven line spacing.
    fn rows_at_tops(page: u32, lines: &[(f32, &[(f32, &str)])]) -> Vec<Row> {
        lines
            .iter()
            .flat_map(|(top, cells)| rows_at(page, *top, &[*cells]))
            .collect()
    }

    #[test]
    fn single_blank_line_keeps_data_region() {
        let rows = rows_at_tops(
            1,
            &[
                (100.0, &[(50.0, "Region"), (150.0, "City"), (300.0, "Multiplier")]),
                (116.0, &[(50.0, "ALBERTA"), (150.0, "Calgary"), (300.0, "1.21")]),
                (148.0, &[(50.0, "ALBERTA"), (150.0, "Edmonton"), (300.0, "1.19")]),
            ],
        );

        let result = extract(&rows, &simple_spec());
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.records.len(), 2);
    }

    #[test]
    fn gap_of_three_pitches_ends_data_region() {
        let rows = rows_at_tops(
            1,
            &[
                (100.0, &[(50.0, "Region"), (150.0, "City"), (300.0, "Multiplier")]),
                (116.0, &[(50.0, "ALBERTA"), (150.0, "Calgary"), (300.0, "1.21")]),
                (132.0, &[(50.0, "ALBERTA"), (150.0, "Edmonton"), (300.0, "1.19")]),
                (148.0, &[(50.0, "ALBERTA"), (150.0, "Red Deer"), (300.0, "1.18")]),
                (200.0, &[(50.0, "Note"), (150.0, "see"), (300.0, "1.00")]),
            ],
        );

        let result = extract(&rows, &simple_spec());
        assert_eq!(result.records.len(), 3);
        assert!(
            result
                .records
                .iter()
                .all(|record| record.get("region") == Some(&Value::Text("ALBERTA".to_string())))
        );
    }

    #[test]
    fn region_headings_label_the_cities_below() {
        let spec = TableKind::LocalMultipliers.spec();
        let rows = rows_at(
            719,
            100.0,
            &[
                &[(50.0, "Region"), (150.0, "City"), (300.0, "Multiplier")],
                &[(50.0, "ALBERTA")],
                &[(150.0, "Calgary"), (300.0, "1.21")],
                &[(150.0, "Edmonton"), (300.0, "1.19")],
                &[(50.0, "BRITISH COLUMBIA"), (200.0, "(Continued)")],
                &[(150.0, "Kelowna"), (300.0, "1.24")],
            ],
        );

        let result = extract(&rows, &spec);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        let keys = result.records.iter().map(|record| record.key()).collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![
                vec!["ALBERTA", "Calgary"],
                vec!["ALBERTA", "Edmonton"],
                vec!["BRITISH COLUMBIA", "Kelowna"],
            ]
        );
        assert_eq!(result.records[0].get("is_regional"), Some(&Value::Bool(false)));
        assert_eq!(result.records[0].get("country"), Some(&Value::Null));
        assert_eq!(
            result.records[1].get("multiplier"),
            Some(&Value::Decimal(dec!(1.19)))
        );

        let headless = extract(&[rows[0].clone(), rows[2].clone()], &spec);
        assert!(headless.records.is_empty());
        assert_eq!(headless.errors.len(), 1);
        assert_eq!(headless.errors[0].code, ErrorCode::MissingField);
        assert_eq!(headless.errors[0].field.as_deref(), Some("region"));
    }

    #[test]
    fn regional_rows_and_country_banner() {
        let spec = TableKind::LocalMultipliers.spec();
        let mut rows = rows_at(
            719,
            100.0,
            &[
                &[(200.0, "CANADA")],
                &[(50.0, "Region"), (150.0, "City"), (300.0, "Multiplier")],
                &[(50.0, "ALBERTA"), (300.0, "1.21")],
                &[(150.0, "Calgary"), (300.0, "1.25")],
            ],
        );
        rows.extend(rows_at(
            720,
            60.0,
            &[
                &[(50.0, "ONTARIO"), (150.0, "Ottawa"), (300.0, "1.15")],
                &[(50.0, "GUAM"), (300.0, "1.45")],
            ],
        ));

        let result = extract(&rows, &spec);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.records.len(), 4);

        let alberta = &result.records[0];
        assert_eq!(alberta.key(), vec!["ALBERTA", ""]);
        assert_eq!(alberta.get("city"), Some(&Value::Text(String::new())));
        assert_eq!(alberta.get("is_regional"), Some(&Value::Bool(true)));
        assert_eq!(alberta.get("multiplier"), Some(&Value::Decimal(dec!(1.21))));
        assert_eq!(alberta.get("country"), Some(&Value::Text("Canada".to_string())));

        let calgary = &result.records[1];
        assert_eq!(calgary.get("is_regional"), Some(&Value::Bool(false)));
        assert_eq!(calgary.get("region"), Some(&Value::Text("ALBERTA".to_string())));

        let ottawa = &result.records[2];
        assert_eq!(ottawa.get("country"), Some(&Value::Text("Canada".to_string())));

        let guam = &result.records[3];
        assert_eq!(guam.get("is_regional"), Some(&Value::Bool(true)));
        assert_eq!(
            guam.get("country"),
            Some(&Value::Text("United States".to_string()))
        );
    }

    #[test]
    fn extraction_is_idempotent() {
        let rows = rows_at(
            1,
            100.0,
            &[
                &[(50.0, "Region"), (150.0, "City"), (300.0, "Multiplier")],
                &[(50.0, "ALBERTA"), (150.0, "Calgary"), (300.0, "1.21")],
            ],
        );
        assert_eq!(extract(&rows, &simple_spec()), extract(&rows, &simple_spec()));
    }
}
