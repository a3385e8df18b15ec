use std::cmp::Ordering;

use crate::model::{Row, TextFragment};
use crate::options::Geometry;

/// Used when no fragment has a usable height.
const FALLBACK_LINE_HEIGHT: f32 = 10.0;

pub(crate) fn estimate_line_height(fragments: &[TextFragment]) -> f32 {
    let mut heights = fragments
        .iter()
        .map(TextFragment::height)
        .filter(|height| height.is_finite() && *height > 0.0)
        .collect::<Vec<_>>();
    if heights.is_empty() {
        return FALLBACK_LINE_HEIGHT;
    }
    heights.sort_by(f32::total_cmp);
    heights[heights.len() / 2]
}

fn reading_order(left: &TextFragment, right: &TextFragment) -> Ordering {
    left.x0
        .total_cmp(&right.x0)
        .then_with(|| left.y0.total_cmp(&right.y0))
        .then_with(|| left.text.cmp(&right.text))
}

fn merge_cells(mut bucket: Vec<TextFragment>, merge_gap: f32) -> Vec<TextFragment> {
    bucket.sort_by(reading_order);

    let mut cells: Vec<TextFragment> = Vec::with_capacity(bucket.len());
    for fragment in bucket {
        match cells.last_mut() {
            Some(previous) if fragment.x0 - previous.x1 < merge_gap => {
                previous.text.push_str(&fragment.text);
                previous.x1 = previous.x1.max(fragment.x1);
                previous.y0 = previous.y0.min(fragment.y0);
                previous.y1 = previous.y1.max(fragment.y1);
            }
            _ => cells.push(fragment),
        }
    }
    cells
}

/// Groups one page's fragments into rows, top to bottom.
///
/// Fragments join a row while their vertical centre stays within
/// `row_tolerance × line height` of the centre of the fragment that opened the
/// row. Within a row, fragments closer than `merge_gap` are joined into one
/// cell with no separator, which undoes glyph-run splitting such as `1` `.05`.
#[must_use]
pub fn reconstruct_rows(fragments: &[TextFragment], page_width: f32, geometry: &Geometry) -> Vec<Row> {
    let Some(page) = fragments.first().map(|fragment| fragment.page) else {
        return Vec::new();
    };

    let tolerance = estimate_line_height(fragments) * geometry.row_tolerance;

    let mut ordered = fragments
        .iter()
        .filter(|fragment| !fragment.text.trim().is_empty())
        .cloned()
        .collect::<Vec<_>>();
    ordered.sort_by(|left, right| {
        left.center_y()
            .total_cmp(&right.center_y())
            .then_with(|| reading_order(left, right))
    });

    let mut buckets: Vec<(f32, Vec<TextFragment>)> = Vec::new();
    for fragment in ordered {
        let center = fragment.center_y();
        match buckets.last_mut() {
            Some((anchor, bucket)) if (center - *anchor).abs() < tolerance => bucket.push(fragment),
            _ => buckets.push((center, vec![fragment])),
        }
    }

    buckets
        .into_iter()
        .map(|(_, bucket)| Row {
            page,
            page_width,
            cells: merge_cells(bucket, geometry.merge_gap),
        })
        .collect()
}
