//! The serialized executor: fetch, parse, classify, rank, notify.
//!
//! Scheduled pushes and chat commands arrive as [`Job`]s on one queue and are
//! run strictly one after another, so they never interleave and the batch
//! cache has a single user.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ilboursa_client::{parse_synthesis_with, Freshness};
use notification_service::MessageTemplate;
use synthesis_core::{rank, Classified, HistorySource, Label, PipelineError, ScrapeBatch};
use tokio::sync::{mpsc, watch};

use crate::commands::BotCommand;
use crate::context::AppContext;

/// Earlier potentials loaded per code for the history rule
const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub enum Job {
    Scheduled { at: DateTime<Utc> },
    Command { chat_id: String, command: BotCommand },
}

/// Consume jobs until the queue closes or shutdown is signalled. A job that
/// already started runs to completion.
pub async fn run_executor(
    ctx: Arc<AppContext>,
    mut jobs: mpsc::Receiver<Job>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            job = jobs.recv() => match job {
                Some(job) => execute(&ctx, job).await,
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    tracing::info!("Executor stopped");
}

pub async fn execute(ctx: &AppContext, job: Job) {
    match job {
        Job::Scheduled { at } => {
            if let Err(e) = run_scheduled(ctx, at).await {
                tracing::error!("Scheduled scan failed: {}", e);
            }
        }
        Job::Command { chat_id, command } => {
            let reply = command_reply(ctx, &command).await;
            if let Err(e) = ctx.notifier.deliver(&chat_id, &reply).await {
                tracing::error!("Failed to reply to {}: {}", chat_id, e);
            }
        }
    }
}

/// Push the BUY and SELL lists to every default destination.
pub async fn run_scheduled(ctx: &AppContext, at: DateTime<Utc>) -> Result<(), PipelineError> {
    let (batch, freshness) = snapshot(ctx).await?;
    let classified = classify(ctx, &batch).await;

    let buy = rank(classified.get(Label::Buy));
    let sell = rank(classified.get(Label::Sell));
    tracing::info!(
        "Scheduled scan ({:?}): {} rows, {} BUY, {} SELL",
        freshness,
        batch.len(),
        buy.len(),
        sell.len()
    );

    let local = at.with_timezone(&ctx.schedule.tz());
    let text = MessageTemplate::scheduled_digest(&local, &buy, &sell);
    ctx.notifier.broadcast(&ctx.destinations, &text).await?;
    Ok(())
}

pub async fn command_reply(ctx: &AppContext, command: &BotCommand) -> String {
    match command {
        BotCommand::Start => MessageTemplate::welcome(&ctx.schedule.describe()),
        BotCommand::Help => MessageTemplate::help(),
        BotCommand::Unknown(name) => {
            tracing::debug!("Unknown command /{}", name);
            MessageTemplate::unknown_command().to_string()
        }
        BotCommand::List(label) => match snapshot(ctx).await {
            Ok((batch, _)) => {
                let classified = classify(ctx, &batch).await;
                let rows = rank(classified.get(*label));
                MessageTemplate::command_reply(*label, &rows)
            }
            Err(e) => {
                tracing::error!("Failed to build {} list: {}", label, e);
                MessageTemplate::fetch_failed().to_string()
            }
        },
    }
}

/// Current batch: cached if still fresh, otherwise fetched and parsed. A
/// failed fetch falls back to the last batch when there is one. Fresh batches
/// are appended to the store.
pub async fn snapshot(ctx: &AppContext) -> Result<(ScrapeBatch, Freshness), PipelineError> {
    if let Some(batch) = ctx.cache.fresh().await {
        return Ok((batch, Freshness::Cached));
    }

    match refresh(ctx).await {
        Ok(batch) => {
            ctx.cache.store(batch.clone()).await;
            if let Some(store) = &ctx.store {
                match store.append_batch(&batch).await {
                    Ok(inserted) => tracing::debug!("Stored {} rows", inserted),
                    Err(e) => tracing::warn!("Failed to store batch: {}", e),
                }
            }
            Ok((batch, Freshness::Fresh))
        }
        Err(PipelineError::Fetch(e)) => match ctx.cache.last().await {
            Some(batch) => {
                tracing::warn!("Fetch failed, serving batch from {}: {}", batch.scraped_at, e);
                Ok((batch, Freshness::Stale))
            }
            None => Err(e.into()),
        },
        Err(e) => Err(e),
    }
}

async fn refresh(ctx: &AppContext) -> Result<ScrapeBatch, PipelineError> {
    let html = ctx.source.fetch_synthesis().await?;
    let batch = parse_synthesis_with(&html, Utc::now(), ctx.classifier.rules())?;
    if batch.is_empty() {
        tracing::warn!("Synthesis page yielded no rows");
    }
    tracing::info!(
        "Parsed {} rows from {} candidates ({} skipped)",
        batch.len(),
        batch.candidates,
        batch.skipped
    );
    Ok(batch)
}

async fn classify(ctx: &AppContext, batch: &ScrapeBatch) -> Classified {
    let mut histories = HashMap::new();

    if ctx.classifier.uses_history() {
        if let Some(store) = &ctx.store {
            for row in &batch.rows {
                match store.potential_history(&row.code, HISTORY_LIMIT).await {
                    Ok(history) => {
                        histories.insert(row.code.clone(), history);
                    }
                    Err(e) => tracing::warn!("No history for {}: {}", row.code, e),
                }
            }
        }
    }

    ctx.classifier.classify_all(&batch.rows, &histories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Schedule;
    use async_trait::async_trait;
    use chrono::{NaiveTime, TimeZone};
    use ilboursa_client::TtlCache;
    use notification_service::{NotificationChannel, NotificationService};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use stock_store::StockStore;
    use synthesis_core::{Classifier, DeliveryError, FetchError, PageSource, RuleTable, TakeProfitRule};
    use tokio::sync::Mutex;

    struct FakeSource {
        pages: Mutex<VecDeque<Result<String, FetchError>>>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(pages: Vec<Result<String, FetchError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageSource for FakeSource {
        async fn fetch_synthesis(&self) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages.lock().await.pop_front().unwrap_or_else(|| {
                Err(FetchError::Timeout {
                    url: "fake".to_string(),
                })
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl NotificationChannel for Recorder {
        async fn send(&self, destination: &str, text: &str) -> Result<(), DeliveryError> {
            self.sent.lock().await.push((destination.to_string(), text.to_string()));
            Ok(())
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    fn page(rows: &[(&str, &str, &str, &str)]) -> String {
        let body: String = rows
            .iter()
            .map(|(code, potential, icon, consensus)| {
                format!(
                    r#"<tr><td><a href="/marches/conseil/{code}">{code} SA</a></td><td>{consensus}</td><td>{potential}</td><td><img src="/images/{icon}"></td></tr>"#
                )
            })
            .collect();
        format!(r#"<html><body><table id="tabQuotes"><tbody>{body}</tbody></table></body></html>"#)
    }

    fn market_page() -> String {
        page(&[
            ("SFBT", "+4,10%", "f_1b.png", "14,20 DT"),
            ("BIAT", "+12.50%", "f_1b.png", "120,00 DT"),
            ("SOTE", "-3.00%", "f_3b.png", "5,00 DT"),
            ("TPR", "N/A", "f_1b.png", "7,00 DT"),
        ])
    }

    struct Harness {
        ctx: AppContext,
        source: Arc<FakeSource>,
        recorder: Arc<Recorder>,
    }

    fn harness(pages: Vec<Result<String, FetchError>>, ttl: Duration) -> Harness {
        let source = Arc::new(FakeSource::new(pages));
        let recorder = Arc::new(Recorder::default());
        let channel: Arc<dyn NotificationChannel> = recorder.clone();
        let page_source: Arc<dyn PageSource> = source.clone();

        let ctx = AppContext {
            source: page_source,
            cache: TtlCache::new(ttl),
            classifier: Classifier::default(),
            store: None,
            notifier: NotificationService::new(vec![channel]),
            destinations: vec!["100".to_string(), "200".to_string()],
            schedule: Schedule::weekdays(
                chrono_tz::Africa::Tunis,
                vec![NaiveTime::from_hms_opt(9, 30, 0).unwrap()],
            ),
        };
        Harness { ctx, source, recorder }
    }

    fn command(chat_id: &str, text: &str) -> Job {
        Job::Command {
            chat_id: chat_id.to_string(),
            command: BotCommand::parse(text).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_what_to_sell_with_no_sell_rows() {
        let h = harness(vec![Ok(market_page())], Duration::from_secs(300));
        execute(&h.ctx, command("7", "/what_to_sell")).await;

        let sent = h.recorder.sent.lock().await;
        assert_eq!(
            sent.as_slice(),
            &[("7".to_string(), "No SELL opportunities right now.".to_string())]
        );
    }

    #[tokio::test]
    async fn test_what_to_buy_is_ranked() {
        let h = harness(vec![Ok(market_page())], Duration::from_secs(300));
        execute(&h.ctx, command("7", "/what_to_buy@IlboursaBot")).await;

        let sent = h.recorder.sent.lock().await;
        assert_eq!(sent.len(), 1);
        let lines: Vec<&str> = sent[0].1.lines().collect();
        assert_eq!(lines[0], "BUY list (sorted by potential):");
        assert_eq!(lines[2], "BIAT SA (BIAT) | consensus 120,00 DT | +12.50%");
        assert_eq!(lines[3], "SFBT SA (SFBT) | consensus 14,20 DT | +4.10%");
        assert_eq!(lines.len(), 4);
    }

    #[tokio::test]
    async fn test_scheduled_push_reaches_every_destination() {
        let h = harness(vec![Ok(market_page())], Duration::from_secs(300));
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap();
        run_scheduled(&h.ctx, at).await.unwrap();

        let sent = h.recorder.sent.lock().await;
        let destinations: Vec<&str> = sent.iter().map(|(d, _)| d.as_str()).collect();
        assert_eq!(destinations, vec!["100", "200"]);

        let text = &sent[0].1;
        assert!(text.starts_with("📊 Market scan (2024-03-04 09:30 CET)"));
        assert!(text.contains("✅ BUY:\nBIAT SA (BIAT)"));
        assert!(!text.contains("SELL"));
        assert!(!text.contains("SOTE"));
    }

    #[tokio::test]
    async fn test_fetch_failure_without_cache() {
        let h = harness(
            vec![Err(FetchError::Status {
                url: "fake".to_string(),
                status: 503,
            })],
            Duration::from_secs(300),
        );
        execute(&h.ctx, command("7", "/what_to_keep")).await;

        let sent = h.recorder.sent.lock().await;
        assert_eq!(sent[0].1, "Error fetching data. Try again later.");

        let at = Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap();
        drop(sent);
        assert!(matches!(
            run_scheduled(&h.ctx, at).await,
            Err(PipelineError::Fetch(_))
        ));
        assert_eq!(h.recorder.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_structure_change_sends_nothing() {
        let h = harness(
            vec![Ok("<html><body><p>Maintenance</p></body></html>".to_string())],
            Duration::from_secs(300),
        );
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap();
        assert!(matches!(
            run_scheduled(&h.ctx, at).await,
            Err(PipelineError::Parse(_))
        ));
        assert!(h.recorder.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_cache_reused_within_ttl() {
        let h = harness(vec![Ok(market_page())], Duration::from_secs(300));
        execute(&h.ctx, command("7", "/what_to_buy")).await;
        execute(&h.ctx, command("7", "/what_to_keep")).await;

        assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);
        let sent = h.recorder.sent.lock().await;
        assert!(sent[1].1.contains("SOTE SA (SOTE)"));
    }

    #[tokio::test]
    async fn test_stale_batch_served_when_refresh_fails() {
        let h = harness(
            vec![
                Ok(market_page()),
                Err(FetchError::Timeout {
                    url: "fake".to_string(),
                }),
            ],
            Duration::ZERO,
        );

        let (_, first) = snapshot(&h.ctx).await.unwrap();
        let (batch, second) = snapshot(&h.ctx).await.unwrap();
        assert_eq!(first, Freshness::Fresh);
        assert_eq!(second, Freshness::Stale);
        assert_eq!(batch.len(), 3);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fresh_batches_are_stored_and_feed_history_rule() {
        let mut h = harness(
            vec![
                Ok(page(&[("SAH", "+25.00%", "f_3b.png", "9,00 DT")])),
                Ok(page(&[("SAH", "+4.00%", "f_3b.png", "9,00 DT")])),
            ],
            Duration::ZERO,
        );
        h.ctx.store = Some(StockStore::connect("sqlite::memory:").await.unwrap());
        h.ctx.classifier = Classifier::new(RuleTable::default().with_take_profit(TakeProfitRule {
            band_low: 0.0,
            band_high: 5.0,
            min_prior_peak: 20.0,
        }));

        execute(&h.ctx, command("7", "/what_to_take_profit")).await;
        execute(&h.ctx, command("7", "/what_to_take_profit")).await;

        let sent = h.recorder.sent.lock().await;
        assert_eq!(sent[0].1, "No TAKE PROFIT opportunities right now.");
        assert!(sent[1].1.contains("SAH SA (SAH)"));

        let counts = h.ctx.store.as_ref().unwrap().counts().await.unwrap();
        assert_eq!(counts.stocks, 2);
    }

    #[tokio::test]
    async fn test_start_and_unknown_commands_skip_fetch() {
        let h = harness(vec![], Duration::from_secs(300));
        execute(&h.ctx, command("7", "/start")).await;
        execute(&h.ctx, command("7", "/portfolio")).await;

        assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);
        let sent = h.recorder.sent.lock().await;
        assert!(sent[0].1.contains("09:30 Africa/Tunis"));
        assert!(sent[0].1.contains("/what_to_buy"));
        assert!(sent[1].1.starts_with("Unknown command"));
    }

    #[tokio::test]
    async fn test_executor_drains_queue_in_order() {
        let h = harness(vec![Ok(market_page())], Duration::from_secs(300));
        let recorder = h.recorder.clone();
        let ctx = Arc::new(h.ctx);
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(command("1", "/what_to_sell")).await.unwrap();
        tx.send(command("2", "/help")).await.unwrap();
        drop(tx);
        run_executor(ctx, rx, shutdown_rx).await;

        let sent = recorder.sent.lock().await;
        let chats: Vec<&str> = sent.iter().map(|(d, _)| d.as_str()).collect();
        assert_eq!(chats, vec!["1", "2"]);
    }
}
