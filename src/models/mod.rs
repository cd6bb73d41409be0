use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod price;
pub mod product;
pub mod retailer;

// Re-exports for convenience
pub use price::*;
pub use product::*;
pub use retailer::*;

/// Freshness bucket a product falls into, relative to the current year.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    CurrentYear,
    PreviousYear,
    Older,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::CurrentYear, Tier::PreviousYear, Tier::Older];

    /// Unknown and future release years land in `Older`, so the three tiers
    /// cover every possible value.
    pub fn classify(release_year: Option<i32>, current_year: i32) -> Tier {
        match release_year {
            Some(year) if year == current_year => Tier::CurrentYear,
            Some(year) if year == current_year - 1 => Tier::PreviousYear,
            _ => Tier::Older,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::CurrentYear => "current_year",
            Tier::PreviousYear => "previous_year",
            Tier::Older => "older",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "current_year" => Ok(Tier::CurrentYear),
            "previous_year" => Ok(Tier::PreviousYear),
            "older" => Ok(Tier::Older),
            other => Err(format!("unknown tier '{}', expected current_year, previous_year or older", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScrapingMethod {
    Ui,
    Api,
    Sitemap,
}

impl fmt::Display for ScrapingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScrapingMethod::Ui => "ui",
            ScrapingMethod::Api => "api",
            ScrapingMethod::Sitemap => "sitemap",
        })
    }
}

/// How the browser session is acquired: `uc` is the stealth profile,
/// `wire` records network traffic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrowserMode {
    #[default]
    Uc,
    Wire,
}

impl fmt::Display for BrowserMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BrowserMode::Uc => "uc",
            BrowserMode::Wire => "wire",
        })
    }
}
