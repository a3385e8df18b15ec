//! US state to current-cost region mapping from the manual's district map, and
//! the country of a local multiplier region.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum CostRegion {
    Eastern,
    Central,
    Western,
}

impl CostRegion {
    pub const ALL: [Self; 3] = [Self::Eastern, Self::Central, Self::Western];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eastern => "Eastern",
            Self::Central => "Central",
            Self::Western => "Western",
        }
    }

    /// Matches the upper-case section headings printed in the cost table.
    #[must_use]
    pub fn from_heading(heading: &str) -> Option<Self> {
        let heading = heading.trim();
        Self::ALL
            .into_iter()
            .find(|region| region.as_str().eq_ignore_ascii_case(heading))
    }
}

impl fmt::Display for CostRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CostRegion {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_heading(value).ok_or_else(|| format!("unknown cost region: '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateRegion {
    pub code: &'static str,
    pub name: &'static str,
    pub region: CostRegion,
}

const fn state(code: &'static str, name: &'static str, region: CostRegion) -> StateRegion {
    StateRegion { code, name, region }
}

pub const STATE_REGIONS: [StateRegion; 51] = [
    state("ME", "MAINE", CostRegion::Eastern),
    state("NH", "NEW HAMPSHIRE", CostRegion::Eastern),
    state("VT", "VERMONT", CostRegion::Eastern),
    state("MA", "MASSACHUSETTS", CostRegion::Eastern),
    state("RI", "RHODE ISLAND", CostRegion::Eastern),
    state("CT", "CONNECTICUT", CostRegion::Eastern),
    state("NY", "NEW YORK", CostRegion::Eastern),
    state("NJ", "NEW JERSEY", CostRegion::Eastern),
    state("PA", "PENNSYLVANIA", CostRegion::Eastern),
    state("DE", "DELAWARE", CostRegion::Eastern),
    state("MD", "MARYLAND", CostRegion::Eastern),
    state("VA", "VIRGINIA", CostRegion::Eastern),
    state("WV", "WEST VIRGINIA", CostRegion::Eastern),
    state("NC", "NORTH CAROLINA", CostRegion::Eastern),
    state("SC", "SOUTH CAROLINA", CostRegion::Eastern),
    state("GA", "GEORGIA", CostRegion::Eastern),
    state("FL", "FLORIDA", CostRegion::Eastern),
    state("DC", "DISTRICT OF COLUMBIA", CostRegion::Eastern),
    state("ND", "NORTH DAKOTA", CostRegion::Central),
    state("SD", "SOUTH DAKOTA", CostRegion::Central),
    state("NE", "NEBRASKA", CostRegion::Central),
    state("KS", "KANSAS", CostRegion::Central),
    state("OK", "OKLAHOMA", CostRegion::Central),
    state("TX", "TEXAS", CostRegion::Central),
    state("MN", "MINNESOTA", CostRegion::Central),
    state("IA", "IOWA", CostRegion::Central),
    state("MO", "MISSOURI", CostRegion::Central),
    state("AR", "ARKANSAS", CostRegion::Central),
    state("LA", "LOUISIANA", CostRegion::Central),
    state("WI", "WISCONSIN", CostRegion::Central),
    state("IL", "ILLINOIS", CostRegion::Central),
    state("MI", "MICHIGAN", CostRegion::Central),
    state("IN", "INDIANA", CostRegion::Central),
    state("OH", "OHIO", CostRegion::Central),
    state("KY", "KENTUCKY", CostRegion::Central),
    state("TN", "TENNESSEE", CostRegion::Central),
    state("MS", "MISSISSIPPI", CostRegion::Central),
    state("AL", "ALABAMA", CostRegion::Central),
    state("WA", "WASHINGTON", CostRegion::Western),
    state("OR", "OREGON", CostRegion::Western),
    state("CA", "CALIFORNIA", CostRegion::Western),
    state("NV", "NEVADA", CostRegion::Western),
    state("ID", "IDAHO", CostRegion::Western),
    state("MT", "MONTANA", CostRegion::Western),
    state("WY", "WYOMING", CostRegion::Western),
    state("UT", "UTAH", CostRegion::Western),
    state("CO", "COLORADO", CostRegion::Western),
    state("AZ", "ARIZONA", CostRegion::Western),
    state("NM", "NEW MEXICO", CostRegion::Western),
    state("AK", "ALASKA", CostRegion::Western),
    state("HI", "HAWAII", CostRegion::Western),
];

/// Looks a state up by two-letter code or full name, case-insensitively.
#[must_use]
pub fn region_for_state(state: &str) -> Option<CostRegion> {
    let state = state.trim();
    STATE_REGIONS
        .iter()
        .find(|entry| entry.code.eq_ignore_ascii_case(state) || entry.name.eq_ignore_ascii_case(state))
        .map(|entry| entry.region)
}

pub const CANADA: &str = "Canada";
pub const UNITED_STATES: &str = "United States";

const US_TERRITORIES: [&str; 3] = ["GUAM", "PUERTO RICO", "VIRGIN ISLANDS"];

/// Country named by a page banner. `CANADA` wins when both appear.
#[must_use]
pub fn country_banner(page_text: &str) -> Option<&'static str> {
    let upper = page_text.to_uppercase();
    if upper.contains("CANADA") {
        Some(CANADA)
    } else if upper.contains("UNITED STATES") || upper.contains("U.S.") {
        Some(UNITED_STATES)
    } else {
        None
    }
}

/// Country of a local multiplier region. US states and territories are
/// always the United States; anything else falls back to the page banner.
#[must_use]
pub fn country_for_region(region: &str, banner: Option<&str>) -> Option<String> {
    let upper = region.trim().to_uppercase();
    let american = US_TERRITORIES
        .iter()
        .any(|territory| upper.contains(territory))
        || STATE_REGIONS.iter().any(|entry| entry.name == upper);
    if american {
        Some(UNITED_STATES.to_string())
    } else {
        banner.map(ToString::to_string)
    }
}
