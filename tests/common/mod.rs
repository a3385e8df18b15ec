#![allow(dead_code)]

use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

/// One text cell: left edge in points and the string shown there.
pub type Cell<'a> = (f32, &'a str);

pub const PAGE_WIDTH: i64 = 595;
pub const PAGE_HEIGHT: i64 = 842;
pub const FONT_SIZE: i64 = 10;
pub const LINE_SPACING: f32 = 14.0;
const FIRST_BASELINE: f32 = 800.0;

fn page_operations(lines: &[Vec<Cell<'_>>]) -> Vec<Operation> {
    let mut operations = Vec::new();
    if lines.is_empty() {
        return operations;
    }

    operations.push(Operation::new("BT", vec![]));
    operations.push(Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]));
    for (index, cells) in lines.iter().enumerate() {
        let baseline = (FIRST_BASELINE - LINE_SPACING * index as f32).round() as i64;
        for (x, text) in cells {
            operations.push(Operation::new(
                "Tm",
                vec![
                    1.into(),
                    0.into(),
                    0.into(),
                    1.into(),
                    Object::Integer(x.round() as i64),
                    Object::Integer(baseline),
                ],
            ));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*text)]));
        }
    }
    operations.push(Operation::new("ET", vec![]));
    operations
}

/// Builds a PDF whose pages hold the given lines of positioned cells, 14pt
/// apart from the top of the page, in 10pt Courier.
pub fn build_table_pdf(pages: &[Vec<Vec<Cell<'_>>>]) -> Result<Document, Box<dyn std::error::Error>> {
    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut page_ids = Vec::new();
    for lines in pages {
        let content = Content {
            operations: page_operations(lines),
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.iter().map(|id| (*id).into()).collect::<Vec<_>>(),
            "Count" => i64::try_from(page_ids.len())?,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    Ok(doc)
}

pub fn table_pdf_bytes(pages: &[Vec<Vec<Cell<'_>>>]) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut doc = build_table_pdf(pages)?;
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

pub fn create_table_pdf(path: &Path, pages: &[Vec<Vec<Cell<'_>>>]) -> Result<(), Box<dyn std::error::Error>> {
    let mut doc = build_table_pdf(pages)?;
    doc.compress();
    doc.save(path)?;
    Ok(())
}

/// Two pages of local multipliers: a header and 50 rows, then 10 rows
/// without a header. Row 5 of the second page has an `n/a` multiplier.
pub fn local_multiplier_pages() -> Vec<Vec<Vec<Cell<'static>>>> {
    const REGIONS: [&str; 3] = ["ONTARIO", "QUEBEC", "ALBERTA"];
    const CITIES: [&str; 60] = [
        "Town 1", "Town 2", "Town 3", "Town 4", "Town 5", "Town 6", "Town 7", "Town 8",
        "Town 9", "Town 10", "Town 11", "Town 12", "Town 13", "Town 14", "Town 15",
        "Town 16", "Town 17", "Town 18", "Town 19", "Town 20", "Town 21", "Town 22",
        "Town 23", "Town 24", "Town 25", "Town 26", "Town 27", "Town 28", "Town 29",
        "Town 30", "Town 31", "Town 32", "Town 33", "Town 34", "Town 35", "Town 36",
        "Town 37", "Town 38", "Town 39", "Town 40", "Town 41", "Town 42", "Town 43",
        "Town 44", "Town 45", "Town 46", "Town 47", "Town 48", "Town 49", "Town 50",
        "Town 51", "Town 52", "Town 53", "Town 54", "Town 55", "Town 56", "Town 57",
        "Town 58", "Town 59", "Town 60",
    ];
    const MULTIPLIERS: [&str; 4] = ["1.05%", "$1.10", "0.98", "1.21"];

    let line = |index: usize| -> Vec<Cell<'static>> {
        let multiplier = if index == 54 { "n/a" } else { MULTIPLIERS[index % 4] };
        vec![
            (50.0, REGIONS[index % 3]),
            (200.0, CITIES[index]),
            (400.0, multiplier),
        ]
    };

    let mut first = vec![vec![(50.0, "Region"), (200.0, "City"), (400.0, "Multiplier")]];
    first.extend((0..50).map(line));
    let second = (50..60).map(line).collect();
    vec![first, second]
}
