//! PDF loading and positioned text extraction.
//!
//! Fragments come from walking each page's content stream and tracking the
//! text and graphics matrices, so every shown string keeps its position.
//! Glyph widths are estimated from the font size; the row reconstructor only
//! needs left edges and approximate extents.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use encoding_rs::UTF_16BE;
use lopdf::content::Content;
use lopdf::{Dictionary, Object, ObjectId};
use tracing::debug;

use crate::error::{DocumentError, PageError, PageRangeError};
use crate::model::TextFragment;

/// US Letter, used when a page has no usable MediaBox.
const DEFAULT_PAGE_SIZE: (f32, f32) = (612.0, 792.0);

/// Average glyph advance as a fraction of the font size.
const AVERAGE_ADVANCE: f32 = 0.5;

/// `TJ` adjustments (thousandths of an em) more negative than this start a new
/// fragment.
const TJ_SPLIT_THRESHOLD: f32 = -100.0;

const MAX_PARENT_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub enum DocumentSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

impl From<PathBuf> for DocumentSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<Vec<u8>> for DocumentSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl DocumentSource {
    fn load(&self) -> Result<lopdf::Document, DocumentError> {
        match self {
            Self::Path(path) => {
                let bytes = std::fs::read(path)?;
                Ok(lopdf::Document::load_mem(&bytes)?)
            }
            Self::Bytes(bytes) => Ok(lopdf::Document::load_mem(bytes)?),
        }
    }
}

pub struct Document {
    inner: lopdf::Document,
    pages: BTreeMap<u32, ObjectId>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("page_count", &self.pages.len())
            .finish_non_exhaustive()
    }
}

impl Document {
    /// Loads the source on a worker thread and gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] when the source cannot be read or parsed, is
    /// encrypted, has no pages, or takes longer than `timeout` to load.
    pub fn open(source: &DocumentSource, timeout: Duration) -> Result<Self, DocumentError> {
        let (sender, receiver) = mpsc::channel();
        let source = source.clone();
        thread::spawn(move || {
            // The receiver is gone once the caller timed out.
            let _ = sender.send(source.load());
        });

        let loaded = receiver
            .recv_timeout(timeout)
            .map_err(|_| DocumentError::Timeout(timeout))??;
        Self::from_loaded(loaded)
    }

    /// # Errors
    ///
    /// Same as [`Document::open`], without the timeout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocumentError> {
        Self::from_loaded(lopdf::Document::load_mem(bytes)?)
    }

    fn from_loaded(inner: lopdf::Document) -> Result<Self, DocumentError> {
        if inner.trailer.get(b"Encrypt").is_ok() {
            return Err(DocumentError::Encrypted);
        }

        let pages = inner.get_pages();
        if pages.is_empty() {
            return Err(DocumentError::NoPages);
        }

        debug!(pages = pages.len(), "loaded PDF");
        Ok(Self { inner, pages })
    }

    #[must_use]
    pub fn page_count(&self) -> u32 {
        u32::try_from(self.pages.len()).unwrap_or(u32::MAX)
    }

    fn page_id(&self, page: u32) -> Result<ObjectId, PageRangeError> {
        self.pages.get(&page).copied().ok_or(PageRangeError {
            page,
            page_count: self.page_count(),
        })
    }

    /// Width and height of the page in points.
    ///
    /// # Errors
    ///
    /// Returns [`PageRangeError`] when `page` is not in the document.
    pub fn page_size(&self, page: u32) -> Result<(f32, f32), PageRangeError> {
        let page_id = self.page_id(page)?;
        Ok(media_box(&self.inner, page_id).unwrap_or(DEFAULT_PAGE_SIZE))
    }

    /// Positioned text fragments of a 1-based page, in content-stream order.
    ///
    /// # Errors
    ///
    /// Returns [`PageError::Range`] when `page` is not in the document and
    /// [`PageError::Content`] when its content stream cannot be read or
    /// decoded.
    pub fn fragments(&self, page: u32) -> Result<Vec<TextFragment>, PageError> {
        let page_id = self.page_id(page)?;
        let (_, height) = self.page_size(page)?;

        let content_error = |error: lopdf::Error| PageError::Content {
            page,
            reason: error.to_string(),
        };
        let raw_content = self
            .inner
            .get_page_content(page_id)
            .map_err(content_error)?;
        let content = Content::decode(&raw_content).map_err(content_error)?;

        let encodings = self
            .inner
            .get_page_fonts(page_id)
            .into_iter()
            .map(|(name, font)| (name, font.get_font_encoding().to_string()))
            .collect::<BTreeMap<Vec<u8>, String>>();

        let mut walker = ContentWalker::new(page, height, &encodings);
        for operation in &content.operations {
            walker.apply(&operation.operator, &operation.operands);
        }
        debug!(page, fragments = walker.fragments.len(), "extracted fragments");
        Ok(walker.fragments)
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        #[allow(clippy::cast_precision_loss)]
        Object::Integer(value) => Some(*value as f32),
        #[allow(clippy::unnecessary_cast)]
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

fn resolve<'a>(document: &'a lopdf::Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

fn media_box(document: &lopdf::Document, page_id: ObjectId) -> Option<(f32, f32)> {
    let mut current: &Dictionary = document.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Some(rect) = current
            .get(b"MediaBox")
            .ok()
            .and_then(|object| resolve(document, object))
            .and_then(|object| object.as_array().ok())
        {
            let values = rect.iter().filter_map(number).collect::<Vec<_>>();
            if values.len() == 4 {
                return Some(((values[2] - values[0]).abs(), (values[3] - values[1]).abs()));
            }
        }

        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = document.get_dictionary(parent).ok()?;
    }
    None
}

fn looks_decoding_broken(text: &str) -> bool {
    if text.contains("?Identity-H Unimplemented?") {
        return true;
    }

    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let replacement = text.matches('\u{FFFD}').count();
    let control = text
        .chars()
        .filter(|ch| ch.is_control() && !matches!(ch, '\n' | '\r' | '\t'))
        .count();
    replacement * 8 > total || control * 5 > total
}

fn decode_pdf_bytes(encoding: Option<&str>, bytes: &[u8]) -> String {
    let decoded = lopdf::Document::decode_text(encoding, bytes);
    if !looks_decoding_broken(&decoded) {
        return decoded;
    }

    let utf16_hint = encoding.is_some_and(|name| {
        let lower = name.to_ascii_lowercase();
        lower.contains("utf16") || lower.contains("ucs2") || lower.contains("identity-h")
    });
    if utf16_hint || bytes.starts_with(&[0xFE, 0xFF]) {
        let body = bytes.strip_prefix(&[0xFE, 0xFF]).unwrap_or(bytes);
        let (utf16, had_errors) = UTF_16BE.decode_without_bom_handling(body);
        if !had_errors && !utf16.is_empty() {
            return utf16.into_owned();
        }
    }

    String::from_utf8_lossy(bytes).into_owned()
}

/// Affine transform in PDF row-vector convention: `[a b c d e f]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Matrix {
    const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    fn translate(tx: f32, ty: f32) -> Self {
        Self {
            e: tx,
            f: ty,
            ..Self::IDENTITY
        }
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        let values = operands.iter().filter_map(number).collect::<Vec<_>>();
        if values.len() != 6 {
            return None;
        }
        Some(Self {
            a: values[0],
            b: values[1],
            c: values[2],
            d: values[3],
            e: values[4],
            f: values[5],
        })
    }

    /// `self × other`.
    fn then(self, other: Self) -> Self {
        Self {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    fn scale_x(self) -> f32 {
        self.a.hypot(self.b)
    }

    fn scale_y(self) -> f32 {
        self.c.hypot(self.d)
    }
}

struct PendingText {
    text: String,
    start: Matrix,
}

struct ContentWalker<'a> {
    page: u32,
    page_height: f32,
    encodings: &'a BTreeMap<Vec<u8>, String>,
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    font_size: f32,
    leading: f32,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    encoding: Option<&'a str>,
    fragments: Vec<TextFragment>,
}

impl<'a> ContentWalker<'a> {
    fn new(page: u32, page_height: f32, encodings: &'a BTreeMap<Vec<u8>, String>) -> Self {
        Self {
            page,
            page_height,
            encodings,
            ctm: Matrix::IDENTITY,
            ctm_stack: Vec::new(),
            text_matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            font_size: 12.0,
            leading: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            encoding: None,
            fragments: Vec::new(),
        }
    }

    fn apply(&mut self, operator: &str, operands: &[Object]) {
        match operator {
            "q" => self.ctm_stack.push(self.ctm),
            "Q" => {
                if let Some(ctm) = self.ctm_stack.pop() {
                    self.ctm = ctm;
                }
            }
            "cm" => {
                if let Some(matrix) = Matrix::from_operands(operands) {
                    self.ctm = matrix.then(self.ctm);
                }
            }
            "BT" => {
                self.text_matrix = Matrix::IDENTITY;
                self.line_matrix = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(name) = operands.first().and_then(|operand| operand.as_name().ok()) {
                    self.encoding = self.encodings.get(name).map(String::as_str);
                }
                if let Some(size) = operands.get(1).and_then(number) {
                    self.font_size = size;
                }
            }
            "TL" => self.leading = operands.first().and_then(number).unwrap_or(self.leading),
            "Tc" => self.char_spacing = operands.first().and_then(number).unwrap_or(0.0),
            "Tw" => self.word_spacing = operands.first().and_then(number).unwrap_or(0.0),
            "Tz" => {
                self.horizontal_scale = operands.first().and_then(number).unwrap_or(100.0) / 100.0;
            }
            "Td" => {
                if let [tx, ty, ..] = operands {
                    self.move_line(number(tx).unwrap_or(0.0), number(ty).unwrap_or(0.0));
                }
            }
            "TD" => {
                if let [tx, ty, ..] = operands {
                    let ty = number(ty).unwrap_or(0.0);
                    self.leading = -ty;
                    self.move_line(number(tx).unwrap_or(0.0), ty);
                }
            }
            "Tm" => {
                if let Some(matrix) = Matrix::from_operands(operands) {
                    self.text_matrix = matrix;
                    self.line_matrix = matrix;
                }
            }
            "T*" => self.move_line(0.0, -self.leading),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(bytes);
                }
            }
            "'" => {
                self.move_line(0.0, -self.leading);
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(bytes);
                }
            }
            "\"" => {
                if let [word_spacing, char_spacing, Object::String(bytes, _)] = operands {
                    self.word_spacing = number(word_spacing).unwrap_or(0.0);
                    self.char_spacing = number(char_spacing).unwrap_or(0.0);
                    self.move_line(0.0, -self.leading);
                    self.show(bytes);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    self.show_array(items);
                }
            }
            _ => {}
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = Matrix::translate(tx, ty).then(self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    /// Horizontal advance of `text` in unscaled text space.
    #[allow(clippy::cast_precision_loss)]
    fn advance(&self, text: &str) -> f32 {
        let glyphs = text.chars().count() as f32;
        let spaces = text.chars().filter(|ch| *ch == ' ').count() as f32;
        (glyphs * (self.font_size * AVERAGE_ADVANCE + self.char_spacing)
            + spaces * self.word_spacing)
            * self.horizontal_scale
    }

    fn decode(&self, bytes: &[u8]) -> String {
        decode_pdf_bytes(self.encoding, bytes)
    }

    fn show(&mut self, bytes: &[u8]) {
        let text = self.decode(bytes);
        let start = self.text_matrix;
        let advance = self.advance(&text);
        self.text_matrix = Matrix::translate(advance, 0.0).then(self.text_matrix);
        self.emit(PendingText { text, start });
    }

    fn show_array(&mut self, items: &[Object]) {
        let mut pending: Option<PendingText> = None;
        for item in items {
            match item {
                Object::String(bytes, _) => {
                    let text = self.decode(bytes);
                    let advance = self.advance(&text);
                    match pending.as_mut() {
                        Some(current) => current.text.push_str(&text),
                        None => {
                            pending = Some(PendingText {
                                text,
                                start: self.text_matrix,
                            });
                        }
                    }
                    self.text_matrix = Matrix::translate(advance, 0.0).then(self.text_matrix);
                }
                other => {
                    let Some(adjustment) = number(other) else {
                        continue;
                    };
                    if adjustment < TJ_SPLIT_THRESHOLD {
                        if let Some(done) = pending.take() {
                            self.emit(done);
                        }
                    }
                    let shift = -adjustment / 1000.0 * self.font_size * self.horizontal_scale;
                    self.text_matrix = Matrix::translate(shift, 0.0).then(self.text_matrix);
                }
            }
        }
        if let Some(done) = pending {
            self.emit(done);
        }
    }

    fn emit(&mut self, pending: PendingText) {
        let trimmed = pending.text.trim();
        if trimmed.is_empty() {
            return;
        }

        let start = pending.start.then(self.ctm);
        let end = self.text_matrix.then(self.ctm);
        let height = (self.font_size * start.scale_y()).abs().max(f32::EPSILON);
        let baseline = self.page_height - start.f;

        let leading_blank =
            pending.text.chars().count() - pending.text.trim_start().chars().count();
        let mut x0 = start.e;
        if leading_blank > 0 {
            #[allow(clippy::cast_precision_loss)]
            let offset = leading_blank as f32 * self.font_size * AVERAGE_ADVANCE * start.scale_x();
            x0 += offset;
        }
        let x1 = end.e.max(x0);

        self.fragments.push(TextFragment::new(
            trimmed,
            x0,
            baseline - height,
            x1,
            baseline,
            self.page,
        ));
    }
}
