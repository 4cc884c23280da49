//! synthesis-scraper: one-shot job that stores the synthesis list and, for
//! each listed company, its shareholders and yearly financials.
//!
//! Usage:
//!   cargo run -p synthesis-scraper
//!   cargo run -p synthesis-scraper -- --skip-details
//!   cargo run -p synthesis-scraper -- --limit 10 --dry-run

use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use ilboursa_client::{parse_financials, parse_shareholders, parse_synthesis, IlboursaClient};
use rand::Rng;
use stock_store::StockStore;
use synthesis_core::{PageSource, Row};

const DEFAULT_DATABASE_URL: &str = "sqlite:stocks.db?mode=rwc";
/// Politeness delay between company pages, in milliseconds
const MIN_DELAY_MS: u64 = 1000;
const MAX_DELAY_MS: u64 = 3000;

#[derive(Debug, Default, PartialEq)]
struct Args {
    dry_run: bool,
    skip_details: bool,
    limit: Option<usize>,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dry-run" => parsed.dry_run = true,
            "--skip-details" => parsed.skip_details = true,
            "--limit" => {
                let value = iter.next().ok_or("--limit needs a value")?;
                let n = value
                    .parse()
                    .map_err(|_| format!("--limit expects a number, got `{}`", value))?;
                parsed.limit = Some(n);
            }
            other => return Err(format!("unknown argument `{}`", other)),
        }
    }

    Ok(parsed)
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  synthesis-scraper                   Synthesis list plus company details");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --dry-run          Scrape and log without writing to the database");
    eprintln!("  --skip-details     Only the synthesis list");
    eprintln!("  --limit N          Company pages for the first N companies only");
    eprintln!();
    eprintln!("Environment: DATABASE_URL (default {})", DEFAULT_DATABASE_URL);
}

/// Distinct codes in page order, capped at `limit`.
fn company_codes(rows: &[Row], limit: Option<usize>) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for row in rows {
        if !codes.contains(&row.code) {
            codes.push(row.code.clone());
        }
    }
    if let Some(limit) = limit {
        codes.truncate(limit);
    }
    codes
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "synthesis_scraper=info,ilboursa_client=info,stock_store=warn".into()),
        )
        .init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            std::process::exit(2);
        }
    };

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
    let fetch_timeout: u64 = std::env::var("FETCH_TIMEOUT_SECS")
        .unwrap_or_else(|_| "20".to_string())
        .parse()
        .context("Invalid FETCH_TIMEOUT_SECS")?;
    let base_url = std::env::var("ILBOURSA_BASE_URL").unwrap_or_else(|_| ilboursa_client::BASE_URL.to_string());
    let synthesis_url = std::env::var("SYNTH_URL")
        .unwrap_or_else(|_| format!("{}{}", base_url, ilboursa_client::SYNTHESIS_PATH));

    tracing::info!(
        "synthesis-scraper: dry_run={}, skip_details={}, limit={:?}",
        args.dry_run,
        args.skip_details,
        args.limit
    );

    let client = IlboursaClient::with_urls(&base_url, &synthesis_url, Duration::from_secs(fetch_timeout))?;

    let store = if args.dry_run {
        None
    } else {
        let store = StockStore::connect(&database_url)
            .await
            .with_context(|| format!("Cannot open database {}", database_url))?;
        Some(store)
    };

    // 1. Synthesis list
    tracing::info!("Fetching {}", client.synthesis_url());
    let html = client.fetch_synthesis().await?;
    let batch = parse_synthesis(&html, Utc::now())?;
    tracing::info!(
        "Parsed {} companies from {} rows ({} skipped)",
        batch.len(),
        batch.candidates,
        batch.skipped
    );
    if batch.is_empty() {
        bail!("No companies found on the synthesis page");
    }

    if let Some(store) = &store {
        let inserted = store.append_batch(&batch).await?;
        tracing::info!("Stored {} synthesis rows", inserted);
    }

    if args.skip_details {
        log_summary(store.as_ref()).await;
        return Ok(());
    }

    // 2. Company pages
    let codes = company_codes(&batch.rows, args.limit);
    let total = codes.len();
    let mut failed = 0usize;

    for (i, code) in codes.iter().enumerate() {
        match scrape_company(&client, store.as_ref(), code).await {
            Ok((holders, metrics)) => {
                tracing::info!(
                    "[{}/{}] {} => {} shareholders, {} metrics",
                    i + 1,
                    total,
                    code,
                    holders,
                    metrics
                );
            }
            Err(e) => {
                failed += 1;
                tracing::warn!("[{}/{}] {} failed: {:#}", i + 1, total, code, e);
            }
        }

        if i + 1 < total {
            let delay = rand::thread_rng().gen_range(MIN_DELAY_MS..=MAX_DELAY_MS);
            tracing::debug!("Sleeping {:.1}s before next company", delay as f64 / 1000.0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    tracing::info!("Done! {} companies processed ({} failed)", total, failed);
    log_summary(store.as_ref()).await;
    Ok(())
}

/// Fetch one company page and store both tables. Returns the record counts.
async fn scrape_company(
    client: &IlboursaClient,
    store: Option<&StockStore>,
    code: &str,
) -> anyhow::Result<(usize, usize)> {
    let html = client.fetch_company_page(code).await?;
    let scraped_at = Utc::now();
    let shareholders = parse_shareholders(&html, code, scraped_at)?;
    let financials = parse_financials(&html, code, scraped_at)?;

    if let Some(store) = store {
        store
            .upsert_shareholders(&shareholders)
            .await
            .context("storing shareholders")?;
        store
            .upsert_financials(&financials)
            .await
            .context("storing financials")?;
    }

    Ok((shareholders.len(), financials.len()))
}

async fn log_summary(store: Option<&StockStore>) {
    let Some(store) = store else {
        tracing::info!("Dry run, nothing written");
        return;
    };
    match store.counts().await {
        Ok(counts) => tracing::info!(
            "Database now holds {} synthesis rows, {} shareholders, {} financial metrics",
            counts.stocks,
            counts.shareholders,
            counts.financials
        ),
        Err(e) => tracing::warn!("Could not read table counts: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn row(code: &str) -> Row {
        Row {
            title: code.to_string(),
            code: code.to_string(),
            consensus: "1,00 DT".to_string(),
            potential: "+1.00%".to_string(),
            potential_pct: 1.0,
            recommendation: None,
            scraped_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args(&[]).unwrap(), Args::default());
        assert_eq!(
            parse_args(&args(&["--limit", "3", "--dry-run"])).unwrap(),
            Args {
                dry_run: true,
                skip_details: false,
                limit: Some(3),
            }
        );
        assert!(parse_args(&args(&["--skip-details"])).unwrap().skip_details);
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(parse_args(&args(&["--limit"])).is_err());
        assert!(parse_args(&args(&["--limit", "ten"])).is_err());
        assert!(parse_args(&args(&["--all"])).is_err());
    }

    #[test]
    fn test_company_codes_dedup_and_limit() {
        let rows = vec![row("SFBT"), row("BIAT"), row("SFBT"), row("SAH")];
        assert_eq!(company_codes(&rows, None), vec!["SFBT", "BIAT", "SAH"]);
        assert_eq!(company_codes(&rows, Some(2)), vec!["SFBT", "BIAT"]);
        assert!(company_codes(&[], Some(5)).is_empty());
    }
}
