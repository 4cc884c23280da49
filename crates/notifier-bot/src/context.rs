use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ilboursa_client::{IlboursaClient, TtlCache};
use notification_service::{NotificationChannel, NotificationService, TelegramClient};
use stock_store::StockStore;
use synthesis_core::{Classifier, PageSource, RuleTable, ScrapeBatch};

use crate::config::BotConfig;
use crate::scheduler::Schedule;

/// Process-wide state, built once at startup and handed to every task.
pub struct AppContext {
    pub source: Arc<dyn PageSource>,
    pub cache: TtlCache<ScrapeBatch>,
    pub classifier: Classifier,
    pub store: Option<StockStore>,
    pub notifier: NotificationService,
    /// Chats that receive scheduled pushes
    pub destinations: Vec<String>,
    pub schedule: Schedule,
}

impl AppContext {
    pub async fn from_config(config: &BotConfig, telegram: &TelegramClient) -> Result<Self> {
        let fetch_timeout = Duration::from_secs(config.fetch_timeout_secs);
        let client = IlboursaClient::with_urls(&config.base_url, &config.synthesis_url, fetch_timeout)
            .context("Failed to build HTTP client")?;
        tracing::info!("Synthesis source: {}", client.synthesis_url());

        let channel: Arc<dyn NotificationChannel> = Arc::new(telegram.clone());

        let store = match &config.database_url {
            Some(url) => {
                let store = StockStore::connect(url)
                    .await
                    .context("Failed to open DATABASE_URL")?;
                tracing::info!("History store connected");
                Some(store)
            }
            None => {
                tracing::info!("DATABASE_URL not set, running without history");
                None
            }
        };

        let mut rules = RuleTable::default();
        if let Some(rule) = config.take_profit {
            if store.is_none() {
                tracing::warn!("TAKE_PROFIT_BAND set without DATABASE_URL, history rule will never fire");
            }
            rules = rules.with_take_profit(rule);
        }

        Ok(Self {
            source: Arc::new(client),
            cache: TtlCache::new(Duration::from_secs(config.cache_ttl_secs)),
            classifier: Classifier::new(rules),
            store,
            notifier: NotificationService::new(vec![channel]),
            destinations: config.telegram_chat_ids.clone(),
            schedule: Schedule::weekdays(config.schedule_tz, config.schedule_times.clone()),
        })
    }
}
