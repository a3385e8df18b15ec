//! Declarative table descriptions. One [`Extractor`](crate::extract::Extractor)
//! interprets any [`TableSpec`]; the four tables of the manual are built in.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::FieldNormalizationError;
use crate::model::Value;
use crate::normalize::{self, Normalizer};
use crate::options::{Geometry, PageRange};
use crate::regions::{self, CostRegion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Decimal,
    Percent,
    Integer,
}

impl FieldType {
    fn default_normalizer(self) -> Normalizer {
        match self {
            Self::String => normalize::text,
            Self::Decimal => normalize::decimal,
            Self::Percent => normalize::percent,
            Self::Integer => normalize::integer,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub field: String,
    pub field_type: FieldType,
    pub required: bool,
    pub normalizer: Normalizer,
    /// Inclusive range a numeric value must fall in.
    pub bounds: Option<(Decimal, Decimal)>,
}

impl ColumnSpec {
    #[must_use]
    pub fn new(field: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            field: field.into(),
            field_type,
            required: true,
            normalizer: field_type.default_normalizer(),
            bounds: None,
        }
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    #[must_use]
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    #[must_use]
    pub fn with_bounds(mut self, min: Decimal, max: Decimal) -> Self {
        self.bounds = Some((min, max));
        self
    }

    /// Runs the normalizer and the bounds check. `None` means the row had no
    /// cell for this column.
    ///
    /// # Errors
    ///
    /// Returns [`FieldNormalizationError::Missing`] for an absent cell, or the
    /// normalizer's error, or [`FieldNormalizationError::OutOfRange`].
    pub fn normalize(&self, raw: Option<&str>) -> Result<Value, FieldNormalizationError> {
        let raw = raw.ok_or(FieldNormalizationError::Missing)?;
        let value = (self.normalizer)(raw)?;

        if let (Some((min, max)), Some(number)) = (self.bounds, value.as_decimal()) {
            if number < min || number > max {
                return Err(FieldNormalizationError::OutOfRange {
                    value: number.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
        }
        Ok(value)
    }
}

/// `Flat` tables map cells to `columns` by position. `Matrix` tables use the
/// leading `columns` as row keys and spread the remaining cells over column
/// labels read from the header, producing one record per value cell.
#[derive(Debug, Clone)]
pub enum Shape {
    Flat,
    Matrix { pivot: ColumnSpec, value: ColumnSpec },
}

/// A vertical slice of the page, in fractions of the page width, read as an
/// independent table.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub start: f32,
    pub end: f32,
    /// Constant field stamped on every record from this panel.
    pub tag: Option<(String, String)>,
}

impl Panel {
    #[must_use]
    pub fn full_width() -> Self {
        Self {
            start: 0.0,
            end: 1.0,
            tag: None,
        }
    }

    #[must_use]
    pub fn new(start: f32, end: f32) -> Self {
        Self {
            start,
            end,
            tag: None,
        }
    }

    #[must_use]
    pub fn tagged(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.tag = Some((field.into(), value.into()));
        self
    }

    /// Half-open on the right, except the last panel which owns the page edge.
    #[must_use]
    pub fn contains(&self, fraction: f32) -> bool {
        fraction >= self.start && (fraction < self.end || (self.end >= 1.0 && fraction <= 1.0))
    }
}

/// A row whose first cell `matcher` recognises sets `field` for the rows that
/// follow it, until the next such row.
#[derive(Debug, Clone)]
pub struct SectionRule {
    pub field: String,
    pub matcher: fn(&str) -> Option<String>,
    /// Rows seen before the first label wait for it when set. Otherwise they
    /// fail with a missing field right away.
    pub wait_for_label: bool,
    pub heading_record: Option<HeadingRecord>,
}

/// A section heading printed with values of its own ("ALBERTA 1.21") becomes
/// a record for the whole section.
#[derive(Debug, Clone)]
pub struct HeadingRecord {
    /// Column left as empty text on heading records.
    pub blank: String,
    /// Set to `true` on heading records and `false` on every other record.
    pub flag: String,
}

/// A field taken from text anywhere on the page, such as a country banner.
/// The last detected value carries over to pages without one.
#[derive(Debug, Clone)]
pub struct PageContextRule {
    pub field: String,
    pub detect: fn(&str) -> Option<String>,
    /// Final value from the page context and the record's other fields.
    pub resolve: fn(Option<&str>, &BTreeMap<String, Value>) -> Value,
}

/// What to do with a flat row that has more cells than columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    Reject,
    /// Joins the surplus into the column at this index with single spaces.
    AbsorbInto(usize),
    Truncate,
}

pub type RowFilter = fn(&[String]) -> bool;

#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: String,
    pub page_range: PageRange,
    pub header_markers: Vec<String>,
    pub columns: Vec<ColumnSpec>,
    pub shape: Shape,
    pub panels: Vec<Panel>,
    pub section: Option<SectionRule>,
    pub page_context: Option<PageContextRule>,
    pub natural_key: Vec<String>,
    /// Rows for which this returns `false` are skipped without error.
    pub row_filter: RowFilter,
    pub overflow: OverflowPolicy,
    /// Cell texts dropped before mapping.
    pub noise: Vec<String>,
    /// Row texts that end the data region.
    pub terminators: Vec<String>,
    pub geometry: Geometry,
}

fn keep_all(_: &[String]) -> bool {
    true
}

impl TableSpec {
    /// A flat, single-panel table. Use struct update syntax or the `with_*`
    /// helpers for anything else.
    #[must_use]
    pub fn flat(
        name: impl Into<String>,
        page_range: PageRange,
        header_markers: &[&str],
        columns: Vec<ColumnSpec>,
        natural_key: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            page_range,
            header_markers: header_markers.iter().map(ToString::to_string).collect(),
            columns,
            shape: Shape::Flat,
            panels: vec![Panel::full_width()],
            section: None,
            page_context: None,
            natural_key: natural_key.iter().map(ToString::to_string).collect(),
            row_filter: keep_all,
            overflow: OverflowPolicy::Reject,
            noise: Vec::new(),
            terminators: Vec::new(),
            geometry: Geometry::default(),
        }
    }

    #[must_use]
    pub fn with_pages(mut self, page_range: PageRange) -> Self {
        self.page_range = page_range;
        self
    }

    #[must_use]
    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Every field a record of this table carries, in declaration order.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut push = |name: &str| {
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_string());
            }
        };

        for panel in &self.panels {
            if let Some((field, _)) = &panel.tag {
                push(field);
            }
        }
        if let Some(section) = &self.section {
            push(&section.field);
        }
        for column in &self.columns {
            push(&column.field);
        }
        if let Shape::Matrix { pivot, value } = &self.shape {
            push(&pivot.field);
            push(&value.field);
        }
        if let Some(heading) = self.heading_record() {
            push(&heading.flag);
        }
        if let Some(context) = &self.page_context {
            push(&context.field);
        }
        names
    }

    pub(crate) fn heading_record(&self) -> Option<&HeadingRecord> {
        self.section
            .as_ref()
            .and_then(|section| section.heading_record.as_ref())
    }

    pub(crate) fn is_noise(&self, text: &str) -> bool {
        let text = text.trim();
        self.noise.iter().any(|noise| noise == text)
    }

    pub(crate) fn is_terminator(&self, row_text: &str) -> bool {
        let upper = row_text.to_uppercase();
        self.terminators
            .iter()
            .any(|marker| upper.contains(&marker.to_uppercase()))
    }
}

/// The tables this crate knows how to find in the manual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    LocalMultipliers,
    CurrentCostMultipliers,
    StoryHeightMultipliers,
    FloorAreaPerimeterMultipliers,
}

impl TableKind {
    pub const ALL: [Self; 4] = [
        Self::LocalMultipliers,
        Self::CurrentCostMultipliers,
        Self::StoryHeightMultipliers,
        Self::FloorAreaPerimeterMultipliers,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LocalMultipliers => "local_multipliers",
            Self::CurrentCostMultipliers => "current_cost_multipliers",
            Self::StoryHeightMultipliers => "story_height_multipliers",
            Self::FloorAreaPerimeterMultipliers => "floor_area_perimeter_multipliers",
        }
    }

    #[must_use]
    pub fn spec(self) -> TableSpec {
        match self {
            Self::LocalMultipliers => local_multipliers(),
            Self::CurrentCostMultipliers => current_cost_multipliers(),
            Self::StoryHeightMultipliers => story_height_multipliers(),
            Self::FloorAreaPerimeterMultipliers => floor_area_perimeter_multipliers(),
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TableKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().replace('-', "_").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| {
                let names = Self::ALL.map(Self::name).join(", ");
                format!("unknown table '{value}', expected one of: {names}")
            })
    }
}

const TAX_NOTE_MARKERS: [&str; 6] = ["TAX", "GST", "PST", "HST", "EXAMPLE", "DEDUCTION"];
const LOCAL_BANNERS: [&str; 5] = [
    "CANADA",
    "UNITED STATES",
    "LOCAL MULTIPLIER",
    "SECTION 99",
    "MARSHALL",
];

/// Tax footnotes printed under the Canadian provinces, and the page banners.
fn is_local_note(text: &str) -> bool {
    let upper = text.to_uppercase();
    upper
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .any(|word| TAX_NOTE_MARKERS.contains(&word))
        || LOCAL_BANNERS.iter().any(|banner| upper.contains(banner))
}

fn local_multiplier_row(cells: &[String]) -> bool {
    !is_local_note(&cells.join(" "))
}

fn local_region_heading(text: &str) -> Option<String> {
    if is_local_note(text) {
        return None;
    }
    normalize::region_heading(text)
}

fn country_banner(page_text: &str) -> Option<String> {
    regions::country_banner(page_text).map(ToString::to_string)
}

fn local_country(banner: Option<&str>, fields: &BTreeMap<String, Value>) -> Value {
    let region = match fields.get("region") {
        Some(Value::Text(region)) => region.as_str(),
        _ => "",
    };
    regions::country_for_region(region, banner).map_or(Value::Null, Value::Text)
}

fn first_cell_numeric(cells: &[String]) -> bool {
    cells.first().is_some_and(|cell| normalize::looks_numeric(cell))
}

fn building_class_row(cells: &[String]) -> bool {
    cells
        .first()
        .is_some_and(|cell| normalize::building_class(cell).is_ok())
}

fn cost_region_heading(text: &str) -> Option<String> {
    CostRegion::from_heading(text).map(|region| region.as_str().to_string())
}

fn multiplier_bounds() -> (Decimal, Decimal) {
    (Decimal::new(5, 1), Decimal::new(25, 1))
}

/// Story height multipliers, square and cubic foot alike.
fn story_multiplier_bounds() -> (Decimal, Decimal) {
    (Decimal::new(4, 1), Decimal::new(2, 0))
}

fn floor_area_bounds() -> (Decimal, Decimal) {
    (Decimal::new(8, 1), Decimal::new(15, 1))
}

/// Region headings fill `region` for the city rows under them; a heading that
/// carries its own multiplier is a regional record with an empty city. Rows
/// that print the region in front of every city read the same way.
fn local_multipliers() -> TableSpec {
    let (min, max) = multiplier_bounds();
    TableSpec {
        section: Some(SectionRule {
            field: "region".to_string(),
            matcher: local_region_heading,
            wait_for_label: false,
            heading_record: Some(HeadingRecord {
                blank: "city".to_string(),
                flag: "is_regional".to_string(),
            }),
        }),
        page_context: Some(PageContextRule {
            field: "country".to_string(),
            detect: country_banner,
            resolve: local_country,
        }),
        row_filter: local_multiplier_row,
        overflow: OverflowPolicy::AbsorbInto(0),
        noise: vec!["(Continued)".to_string(), "(CONTINUED)".to_string()],
        ..TableSpec::flat(
            TableKind::LocalMultipliers.name(),
            PageRange::single(719).with_end(724),
            &["Region", "City", "Multiplier"],
            vec![
                ColumnSpec::new("city", FieldType::String),
                ColumnSpec::new("multiplier", FieldType::Decimal).with_bounds(min, max),
            ],
            &["region", "city"],
        )
    }
}

fn current_cost_multipliers() -> TableSpec {
    let (min, max) = multiplier_bounds();
    TableSpec {
        shape: Shape::Matrix {
            pivot: ColumnSpec::new("effective_date", FieldType::String)
                .with_normalizer(normalize::effective_date),
            value: ColumnSpec::new("multiplier", FieldType::Decimal).with_bounds(min, max),
        },
        panels: vec![
            Panel::new(0.0, 0.55).tagged("method", "calculator"),
            Panel::new(0.55, 1.0).tagged("method", "segregated"),
        ],
        section: Some(SectionRule {
            field: "region".to_string(),
            matcher: cost_region_heading,
            wait_for_label: true,
            heading_record: None,
        }),
        row_filter: building_class_row,
        ..TableSpec::flat(
            TableKind::CurrentCostMultipliers.name(),
            PageRange::single(717),
            &["Class"],
            vec![
                ColumnSpec::new("category", FieldType::String)
                    .with_normalizer(normalize::building_class),
            ],
            &["method", "region", "category", "effective_date"],
        )
    }
}

fn story_height_multipliers() -> TableSpec {
    let (min, max) = story_multiplier_bounds();
    TableSpec {
        panels: vec![Panel::new(0.0, 0.5), Panel::new(0.5, 1.0)],
        row_filter: first_cell_numeric,
        overflow: OverflowPolicy::Truncate,
        noise: vec!["(base)".to_string()],
        terminators: vec!["FLOOR AREA".to_string()],
        ..TableSpec::flat(
            TableKind::StoryHeightMultipliers.name(),
            PageRange::single(90),
            &["STORY HEIGHT"],
            vec![
                ColumnSpec::new("height_meters", FieldType::Decimal)
                    .optional()
                    .with_bounds(Decimal::new(15, 1), Decimal::TEN),
                ColumnSpec::new("height_category", FieldType::Integer)
                    .with_bounds(Decimal::new(5, 0), Decimal::new(30, 0)),
                ColumnSpec::new("multiplier", FieldType::Decimal).with_bounds(min, max),
                ColumnSpec::new("cubic_multiplier", FieldType::Decimal)
                    .optional()
                    .with_bounds(min, max),
            ],
            &["height_category"],
        )
    }
}

fn floor_area_perimeter_multipliers() -> TableSpec {
    let (min, max) = floor_area_bounds();
    TableSpec {
        shape: Shape::Matrix {
            pivot: ColumnSpec::new("perimeter_bucket", FieldType::Integer),
            value: ColumnSpec::new("multiplier", FieldType::Decimal).with_bounds(min, max),
        },
        row_filter: first_cell_numeric,
        noise: vec!["----".to_string(), "---".to_string(), "--".to_string()],
        terminators: vec!["STORY HEIGHT".to_string()],
        ..TableSpec::flat(
            TableKind::FloorAreaPerimeterMultipliers.name(),
            PageRange::single(90),
            &["FLOOR AREA", "PERIMETER"],
            vec![
                ColumnSpec::new("area_sqm", FieldType::Integer).optional(),
                ColumnSpec::new("area_bucket", FieldType::Integer),
            ],
            &["area_bucket", "perimeter_bucket"],
        )
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::{
        ColumnSpec, FieldType, Panel, Shape, TableKind, local_multiplier_row,
        local_region_heading,
    };
    use crate::error::FieldNormalizationError;
    use crate::model::Value;

    fn cells(texts: &[&str]) -> Vec<String> {
        texts.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn table_names_round_trip() {
        for kind in TableKind::ALL {
            assert_eq!(kind.name().parse::<TableKind>(), Ok(kind));
            assert_eq!(kind.spec().name, kind.name());
        }
        assert_eq!(
            "floor-area-perimeter-multipliers".parse::<TableKind>(),
            Ok(TableKind::FloorAreaPerimeterMultipliers)
        );
        assert!("base_costs".parse::<TableKind>().is_err());
    }

    #[test]
    fn default_page_ranges() {
        let local = TableKind::LocalMultipliers.spec();
        assert_eq!(local.page_range.to_string(), "719-724");
        assert_eq!(TableKind::CurrentCostMultipliers.spec().page_range.to_string(), "717");
        assert_eq!(TableKind::StoryHeightMultipliers.spec().page_range.to_string(), "90");
    }

    #[test]
    fn field_names_cover_tags_sections_and_pivots() {
        assert_eq!(
            TableKind::CurrentCostMultipliers.spec().field_names(),
            vec!["method", "region", "category", "effective_date", "multiplier"]
        );
        assert_eq!(
            TableKind::FloorAreaPerimeterMultipliers.spec().field_names(),
            vec!["area_sqm", "area_bucket", "perimeter_bucket", "multiplier"]
        );
        assert_eq!(
            TableKind::LocalMultipliers.spec().field_names(),
            vec!["region", "city", "multiplier", "is_regional", "country"]
        );
    }

    #[test]
    fn natural_keys_name_declared_fields() {
        for kind in TableKind::ALL {
            let spec = kind.spec();
            let fields = spec.field_names();
            for key in &spec.natural_key {
                assert!(fields.contains(key), "{key} missing from {}", spec.name);
            }
        }
    }

    #[test]
    fn bounds_reject_outliers() {
        let column =
            ColumnSpec::new("multiplier", FieldType::Decimal).with_bounds(dec!(0.5), dec!(2.5));
        assert_eq!(column.normalize(Some("1.05")), Ok(Value::Decimal(dec!(1.05))));
        assert!(matches!(
            column.normalize(Some("105")),
            Err(FieldNormalizationError::OutOfRange { .. })
        ));
        assert_eq!(column.normalize(None), Err(FieldNormalizationError::Missing));
    }

    #[test]
    fn local_filter_skips_tax_notes_and_banners() {
        assert!(local_multiplier_row(&cells(&["Calgary", "1.21"])));
        assert!(local_multiplier_row(&cells(&["Kingston", "1.15"])));
        assert!(!local_multiplier_row(&cells(&["GST", "5%", "applies"])));
        assert!(!local_multiplier_row(&cells(&["UNITED STATES"])));
        assert!(!local_multiplier_row(&cells(&["*See EXAMPLE below"])));
    }

    #[test]
    fn local_headings_exclude_banners_and_tax_notes() {
        assert_eq!(
            local_region_heading("BRITISH COLUMBIA"),
            Some("BRITISH COLUMBIA".to_string())
        );
        assert_eq!(local_region_heading("ALBERTA (Continued)"), Some("ALBERTA".to_string()));
        assert_eq!(local_region_heading("CANADA"), None);
        assert_eq!(local_region_heading("HST"), None);
        assert_eq!(local_region_heading("Calgary"), None);
    }

    #[test]
    fn story_height_and_floor_area_values_are_bounded() {
        let story = TableKind::StoryHeightMultipliers.spec();
        let multiplier = story
            .columns
            .iter()
            .find(|column| column.field == "multiplier")
            .expect("story height has a multiplier column");
        assert_eq!(multiplier.normalize(Some("0.937")), Ok(Value::Decimal(dec!(0.937))));
        assert!(matches!(
            multiplier.normalize(Some("9.37")),
            Err(FieldNormalizationError::OutOfRange { .. })
        ));

        let height = story
            .columns
            .iter()
            .find(|column| column.field == "height_category")
            .expect("story height has a height column");
        assert!(height.normalize(Some("107")).is_err());

        let Shape::Matrix { value, .. } = TableKind::FloorAreaPerimeterMultipliers.spec().shape
        else {
            panic!("floor area is a matrix table");
        };
        assert_eq!(value.normalize(Some("1.217")), Ok(Value::Decimal(dec!(1.217))));
        assert!(value.normalize(Some("12.17")).is_err());
    }

    #[test]
    fn last_panel_owns_right_edge() {
        let left = Panel::new(0.0, 0.5);
        let right = Panel::new(0.5, 1.0);
        assert!(left.contains(0.49));
        assert!(!left.contains(0.5));
        assert!(right.contains(0.5));
        assert!(right.contains(1.0));
    }
}
