use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One security's synthesis entry as published on the source page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub title: String,
    pub code: String,
    /// Analyst price-target consensus, verbatim (e.g. "60,33 DT")
    pub consensus: String,
    /// Potential as published (e.g. "+7.74%")
    pub potential: String,
    /// Potential parsed to a finite percentage, used for ranking
    pub potential_pct: f64,
    /// File name of the advice icon shown next to the row, if any
    #[serde(default)]
    pub recommendation: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

/// Actionable category attached to a row for one presentation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    Buy,
    Sell,
    Keep,
    TakeProfit,
    None,
}

impl Label {
    /// Human-readable label
    pub fn to_label(&self) -> &'static str {
        match self {
            Label::Buy => "BUY",
            Label::Sell => "SELL",
            Label::Keep => "KEEP",
            Label::TakeProfit => "TAKE PROFIT",
            Label::None => "NONE",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_label())
    }
}

/// The set of rows produced by one fetch + parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeBatch {
    pub scraped_at: DateTime<Utc>,
    pub rows: Vec<Row>,
    /// Candidate row containers found on the page
    pub candidates: usize,
    /// Candidates dropped because a field was missing or malformed
    pub skipped: usize,
}

impl ScrapeBatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Shareholder line from a company page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shareholder {
    pub company_code: String,
    pub name: String,
    pub percentage: String,
    pub scraped_at: DateTime<Utc>,
}

/// One metric of the yearly financials table, keyed by year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialMetric {
    pub company_code: String,
    pub metric: String,
    pub values: BTreeMap<String, String>,
    pub scraped_at: DateTime<Utc>,
}
