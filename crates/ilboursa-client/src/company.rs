//! Company page tables: shareholders and yearly financials.
//!
//! Both tables are optional on the site. A missing table yields no records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html};
use synthesis_core::{FinancialMetric, ParseError, Shareholder};

use crate::parser::{selector, text_of};

const SHAREHOLDERS_TABLE: &str = "table#tblactions";
const FINANCIALS_TABLE: &str = "table.tablenosort.tbl100_6.tabSociete";

/// Rows of the shareholder table: colour box, name, percentage.
pub fn parse_shareholders(
    html: &str,
    company_code: &str,
    scraped_at: DateTime<Utc>,
) -> Result<Vec<Shareholder>, ParseError> {
    let document = Html::parse_document(html);
    let table_sel = selector(SHAREHOLDERS_TABLE)?;
    let row_sel = selector("tbody tr")?;
    let cell_sel = selector("td")?;

    let Some(table) = document.select(&table_sel).next() else {
        return Ok(Vec::new());
    };

    let shareholders = table
        .select(&row_sel)
        .filter_map(|tr| {
            let cells: Vec<ElementRef<'_>> = tr.select(&cell_sel).collect();
            if cells.len() < 3 {
                return None;
            }
            let name = text_of(&cells[1]);
            let percentage = text_of(&cells[2]);
            if name.is_empty() || percentage.is_empty() {
                return None;
            }
            Some(Shareholder {
                company_code: company_code.to_string(),
                name,
                percentage,
                scraped_at,
            })
        })
        .collect();

    Ok(shareholders)
}

/// Yearly financials. Years come from the header (first header cell is the
/// metric column); `-` and empty cells are left out, and metrics without any
/// value are dropped.
pub fn parse_financials(
    html: &str,
    company_code: &str,
    scraped_at: DateTime<Utc>,
) -> Result<Vec<FinancialMetric>, ParseError> {
    let document = Html::parse_document(html);
    let table_sel = selector(FINANCIALS_TABLE)?;
    let header_sel = selector("thead th")?;
    let row_sel = selector("tbody tr")?;
    let cell_sel = selector("td")?;

    let Some(table) = document.select(&table_sel).next() else {
        return Ok(Vec::new());
    };

    let years: Vec<String> = table.select(&header_sel).skip(1).map(|th| text_of(&th)).collect();
    if years.is_empty() {
        return Ok(Vec::new());
    }

    let mut metrics = Vec::new();
    for tr in table.select(&row_sel) {
        let cells: Vec<ElementRef<'_>> = tr.select(&cell_sel).collect();
        let Some((name_cell, value_cells)) = cells.split_first() else {
            continue;
        };
        let metric = text_of(name_cell);
        if metric.is_empty() {
            continue;
        }

        let values: BTreeMap<String, String> = years
            .iter()
            .zip(value_cells)
            .map(|(year, cell)| (year.clone(), text_of(cell)))
            .filter(|(_, value)| !value.is_empty() && value != "-")
            .collect();

        if values.is_empty() {
            continue;
        }

        metrics.push(FinancialMetric {
            company_code: company_code.to_string(),
            metric,
            values,
            scraped_at,
        });
    }

    Ok(metrics)
}
