use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use notification_service::NotificationConfig;
use std::env;
use synthesis_core::TakeProfitRule;

#[derive(Debug, Clone)]
pub struct BotConfig {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_chat_ids: Vec<String>,
    pub telegram_api_base: String,
    pub poll_timeout_secs: u64,

    // Source
    pub base_url: String,
    pub synthesis_url: String,
    pub fetch_timeout_secs: u64,
    pub cache_ttl_secs: u64,

    // Schedule
    pub schedule_tz: Tz,
    pub schedule_times: Vec<NaiveTime>,

    // Classification
    pub take_profit: Option<TakeProfitRule>,

    // Optional history store
    pub database_url: Option<String>,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        let notification = NotificationConfig::from_env();

        let telegram_bot_token = notification
            .telegram_bot_token
            .context("TELEGRAM_BOT_TOKEN not set")?;
        if notification.telegram_chat_ids.is_empty() {
            bail!("TELEGRAM_CHAT_ID not set");
        }

        let base_url = env::var("ILBOURSA_BASE_URL")
            .unwrap_or_else(|_| ilboursa_client::BASE_URL.to_string());
        let synthesis_url = env::var("SYNTH_URL")
            .unwrap_or_else(|_| format!("{}{}", base_url, ilboursa_client::SYNTHESIS_PATH));

        let take_profit = match env::var("TAKE_PROFIT_BAND") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.parse::<TakeProfitRule>()
                    .map_err(|e| anyhow!("Invalid TAKE_PROFIT_BAND: {}", e))?,
            ),
            _ => None,
        };

        let config = Self {
            telegram_bot_token,
            telegram_chat_ids: notification.telegram_chat_ids,
            telegram_api_base: notification.telegram_api_base,
            poll_timeout_secs: env::var("POLL_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid POLL_TIMEOUT_SECS")?,
            base_url,
            synthesis_url,
            fetch_timeout_secs: env::var("FETCH_TIMEOUT_SECS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid FETCH_TIMEOUT_SECS")?,
            cache_ttl_secs: env::var("CACHE_TTL")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("Invalid CACHE_TTL")?,
            schedule_tz: parse_timezone(
                &env::var("SCHEDULE_TZ").unwrap_or_else(|_| "Africa/Tunis".to_string()),
            )?,
            schedule_times: parse_schedule_times(
                &env::var("SCHEDULE_TIMES").unwrap_or_else(|_| "09:30,15:00".to_string()),
            )?,
            take_profit,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.fetch_timeout_secs == 0 {
            bail!("FETCH_TIMEOUT_SECS must be positive");
        }
        if self.schedule_times.is_empty() {
            bail!("SCHEDULE_TIMES must list at least one HH:MM slot");
        }
        Ok(())
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| anyhow!("Unknown time zone `{}`: {}", name, e))
}

/// Comma separated `HH:MM` list, sorted and deduplicated.
pub fn parse_schedule_times(raw: &str) -> Result<Vec<NaiveTime>> {
    let mut times = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            NaiveTime::parse_from_str(s, "%H:%M").with_context(|| format!("Invalid schedule time `{}`", s))
        })
        .collect::<Result<Vec<_>>>()?;
    times.sort();
    times.dedup();
    Ok(times)
}
