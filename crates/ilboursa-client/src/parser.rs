//! Synthesis page parser.
//!
//! The page carries one `table#tabQuotes`; every `tbody tr` is a candidate
//! row whose first cell links to the company (`.../CODE`), second cell holds
//! the consensus and third the potential. The advice icon is the first
//! `<img>` in the row whose file name the rule table knows; logos and
//! arrows before it are passed over.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use scraper::{ElementRef, Html, Selector};
use synthesis_core::{parse_potential, ParseError, Row, RuleTable, ScrapeBatch};

const CONTAINER: &str = "table#tabQuotes";

pub(crate) fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|e| ParseError::Selector {
        selector: css.to_string(),
        message: e.to_string(),
    })
}

/// Whitespace-normalised text of an element
pub(crate) fn text_of(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Clone)]
struct RowSelectors {
    cell: Selector,
    link: Selector,
    icon: Selector,
}

/// A parsed synthesis page. Rows are extracted lazily and [`SynthesisPage::rows`]
/// can be called any number of times; each call starts from the top.
pub struct SynthesisPage {
    document: Html,
    container: Option<Selector>,
    candidate: Selector,
    selectors: RowSelectors,
    known_icons: HashSet<String>,
}

impl SynthesisPage {
    /// Parse `html`. A blank body is a valid, empty page; a non-blank body
    /// without the quotes table is a [`ParseError::MissingContainer`].
    /// Advice icons are those of the default [`RuleTable`].
    pub fn parse(html: &str) -> Result<Self, ParseError> {
        Self::parse_with(html, &RuleTable::default())
    }

    /// Like [`SynthesisPage::parse`], recognising the icons of `rules`.
    pub fn parse_with(html: &str, rules: &RuleTable) -> Result<Self, ParseError> {
        let document = Html::parse_document(html);
        let container_sel = selector(CONTAINER)?;

        let container = if html.trim().is_empty() {
            None
        } else if document.select(&container_sel).next().is_some() {
            Some(container_sel)
        } else {
            return Err(ParseError::MissingContainer(CONTAINER.to_string()));
        };

        Ok(Self {
            document,
            container,
            candidate: selector("tbody tr")?,
            selectors: RowSelectors {
                cell: selector("td")?,
                link: selector("a[href]")?,
                icon: selector("img[src]")?,
            },
            known_icons: rules.icons.keys().cloned().collect(),
        })
    }

    fn candidates(&self) -> Vec<ElementRef<'_>> {
        let Some(container) = &self.container else {
            return Vec::new();
        };
        self.document
            .select(container)
            .next()
            .map(|table| table.select(&self.candidate).collect())
            .unwrap_or_default()
    }

    /// Number of candidate row containers on the page
    pub fn candidate_count(&self) -> usize {
        self.candidates().len()
    }

    /// Restartable iterator over the well-formed rows, stamped with `scraped_at`.
    pub fn rows(&self, scraped_at: DateTime<Utc>) -> Rows<'_> {
        Rows {
            candidates: self.candidates().into_iter(),
            selectors: self.selectors.clone(),
            known_icons: &self.known_icons,
            seen: HashSet::new(),
            scraped_at,
            skipped: 0,
        }
    }
}

/// Iterator over extracted rows. Malformed candidates are skipped and counted.
pub struct Rows<'a> {
    candidates: std::vec::IntoIter<ElementRef<'a>>,
    selectors: RowSelectors,
    known_icons: &'a HashSet<String>,
    seen: HashSet<String>,
    scraped_at: DateTime<Utc>,
    skipped: usize,
}

impl Rows<'_> {
    /// Candidates skipped so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for Rows<'_> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        loop {
            let tr = self.candidates.next()?;
            match extract_row(&tr, &self.selectors, self.known_icons, self.scraped_at) {
                Ok(row) if self.seen.insert(row.code.clone()) => return Some(row),
                Ok(row) => {
                    self.skipped += 1;
                    tracing::debug!("Skipping duplicate row for {}", row.code);
                }
                Err(reason) => {
                    self.skipped += 1;
                    tracing::debug!("Skipping synthesis row: {}", reason);
                }
            }
        }
    }
}

#[derive(Debug)]
enum SkipReason {
    NoLink,
    EmptyCode,
    EmptyTitle(String),
    MissingConsensus(String),
    MissingPotential(String),
    BadPotential { code: String, raw: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoLink => write!(f, "no company link"),
            SkipReason::EmptyCode => write!(f, "empty code in link"),
            SkipReason::EmptyTitle(code) => write!(f, "{code}: empty title"),
            SkipReason::MissingConsensus(code) => write!(f, "{code}: missing consensus"),
            SkipReason::MissingPotential(code) => write!(f, "{code}: missing potential"),
            SkipReason::BadPotential { code, raw } => {
                write!(f, "{code}: unparsable potential {raw:?}")
            }
        }
    }
}

fn extract_row(
    tr: &ElementRef<'_>,
    selectors: &RowSelectors,
    known_icons: &HashSet<String>,
    scraped_at: DateTime<Utc>,
) -> Result<Row, SkipReason> {
    let cells: Vec<ElementRef<'_>> = tr.select(&selectors.cell).collect();
    let link = cells
        .first()
        .and_then(|first| first.select(&selectors.link).next())
        .ok_or(SkipReason::NoLink)?;

    let href = link.value().attr("href").unwrap_or_default();
    let code = href
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_uppercase();
    if code.is_empty() {
        return Err(SkipReason::EmptyCode);
    }

    let title = text_of(&link);
    if title.is_empty() {
        return Err(SkipReason::EmptyTitle(code));
    }

    let consensus = cells
        .get(1)
        .map(text_of)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SkipReason::MissingConsensus(code.clone()))?;

    let potential = cells
        .get(2)
        .map(text_of)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SkipReason::MissingPotential(code.clone()))?;

    let potential_pct = parse_potential(&potential).ok_or_else(|| SkipReason::BadPotential {
        code: code.clone(),
        raw: potential.clone(),
    })?;

    let icons: Vec<String> = tr
        .select(&selectors.icon)
        .filter_map(|img| img.value().attr("src"))
        .filter_map(|src| src.rsplit('/').next())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    // Unknown images are kept only when no advice icon is present
    let recommendation = icons
        .iter()
        .find(|name| known_icons.contains(*name))
        .or_else(|| icons.first())
        .cloned();

    Ok(Row {
        title,
        code,
        consensus,
        potential,
        potential_pct,
        recommendation,
        scraped_at,
    })
}

/// Parse a synthesis page into a batch using the default advice icons.
pub fn parse_synthesis(html: &str, scraped_at: DateTime<Utc>) -> Result<ScrapeBatch, ParseError> {
    parse_synthesis_with(html, scraped_at, &RuleTable::default())
}

/// Parse a synthesis page into a batch. Every row carries the same timestamp,
/// truncated to whole microseconds so it survives a store round trip.
pub fn parse_synthesis_with(
    html: &str,
    scraped_at: DateTime<Utc>,
    rules: &RuleTable,
) -> Result<ScrapeBatch, ParseError> {
    let scraped_at = scraped_at.trunc_subsecs(6);
    let page = SynthesisPage::parse_with(html, rules)?;
    let candidates = page.candidate_count();

    let mut rows = page.rows(scraped_at);
    let collected: Vec<Row> = rows.by_ref().collect();
    let skipped = rows.skipped();

    if skipped > 0 {
        tracing::info!(
            "Synthesis page: {} rows extracted, {} of {} candidates skipped",
            collected.len(),
            skipped,
            candidates
        );
    }

    Ok(ScrapeBatch {
        scraped_at,
        rows: collected,
        candidates,
        skipped,
    })
}
