use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::ExtractError;

pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Inclusive, 1-based page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRange {
    start: u32,
    end: u32,
}

impl PageRange {
    /// # Errors
    ///
    /// Returns a message when either bound is zero or `end < start`.
    pub fn new(start: u32, end: u32) -> Result<Self, String> {
        if start == 0 || end == 0 {
            return Err("pages are 1-based".to_string());
        }
        if end < start {
            return Err(format!(
                "invalid range '{start}-{end}': end is smaller than start"
            ));
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn single(page: u32) -> Self {
        let page = page.max(1);
        Self {
            start: page,
            end: page,
        }
    }

    /// Extends the range to `end`; an `end` before the start is clamped.
    #[must_use]
    pub fn with_end(self, end: u32) -> Self {
        Self {
            start: self.start,
            end: end.max(self.start),
        }
    }

    #[must_use]
    pub fn start(&self) -> u32 {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> u32 {
        self.end
    }

    #[must_use]
    pub fn contains(&self, page: u32) -> bool {
        (self.start..=self.end).contains(&page)
    }

    pub fn pages(&self) -> impl Iterator<Item = u32> {
        self.start..=self.end
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for PageRange {
    type Err = String;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err("page range cannot be empty".to_string());
        }

        if let Some((start, end)) = spec.split_once('-') {
            let start: u32 = start
                .trim()
                .parse()
                .map_err(|_| format!("invalid page range start: '{start}'"))?;
            let end: u32 = end
                .trim()
                .parse()
                .map_err(|_| format!("invalid page range end: '{end}'"))?;
            return Self::new(start, end);
        }

        let page: u32 = spec
            .parse()
            .map_err(|_| format!("invalid page number: '{spec}'"))?;
        Self::new(page, page)
    }
}

/// Clustering tolerances for row reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Geometry {
    /// Fraction of the estimated line height within which two fragments'
    /// vertical centres belong to the same row.
    pub row_tolerance: f32,
    /// Horizontal gap in points below which adjacent fragments join into one
    /// cell.
    pub merge_gap: f32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            row_tolerance: 0.5,
            merge_gap: 1.0,
        }
    }
}

impl Geometry {
    /// # Errors
    ///
    /// Returns a message when a tolerance is negative or not finite.
    pub fn validate(&self) -> Result<(), String> {
        if !self.row_tolerance.is_finite() || self.row_tolerance <= 0.0 {
            return Err(format!(
                "row_tolerance must be positive, got {}",
                self.row_tolerance
            ));
        }
        if !self.merge_gap.is_finite() || self.merge_gap < 0.0 {
            return Err(format!(
                "merge_gap must be zero or positive, got {}",
                self.merge_gap
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseOptions {
    /// Replaces the table's own page range when set.
    pub pages: Option<PageRange>,
    /// Replaces the table's own geometry when set.
    pub geometry: Option<Geometry>,
    pub open_timeout: Duration,
}

impl ParseOptions {
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidOption`] for an unusable geometry or a
    /// zero open timeout.
    pub fn validate(&self) -> Result<(), ExtractError> {
        if let Some(geometry) = &self.geometry {
            geometry.validate().map_err(ExtractError::InvalidOption)?;
        }
        if self.open_timeout.is_zero() {
            return Err(ExtractError::InvalidOption(
                "open timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            pages: None,
            geometry: None,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }
}
