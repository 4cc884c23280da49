use chrono::{DateTime, TimeZone};
use std::fmt::Display;
use synthesis_core::{format_potential, Label, Row};

/// Telegram rejects texts over 4096 characters; keep some headroom.
pub const MAX_MESSAGE_CHARS: usize = 4000;

pub struct MessageTemplate;

impl MessageTemplate {
    pub fn format_line(row: &Row) -> String {
        format!(
            "{} ({}) | consensus {} | {}",
            row.title,
            row.code,
            row.consensus,
            format_potential(row.potential_pct)
        )
    }

    fn format_lines(rows: &[Row]) -> String {
        rows.iter().map(Self::format_line).collect::<Vec<_>>().join("\n")
    }

    /// Scheduled push. Empty sections are left out.
    pub fn scheduled_digest<Tz>(at: &DateTime<Tz>, buy: &[Row], sell: &[Row]) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let header = format!("📊 Market scan ({})", at.format("%Y-%m-%d %H:%M %Z"));

        if buy.is_empty() && sell.is_empty() {
            return format!("{}\nNo BUY/SELL opportunities found.", header);
        }

        let mut sections = vec![header];
        if !buy.is_empty() {
            sections.push(format!("✅ BUY:\n{}", Self::format_lines(buy)));
        }
        if !sell.is_empty() {
            sections.push(format!("🛑 SELL:\n{}", Self::format_lines(sell)));
        }
        sections.join("\n\n")
    }

    /// Reply to a list command. Rows are expected already ranked.
    pub fn command_reply(label: Label, rows: &[Row]) -> String {
        if rows.is_empty() {
            return format!("No {} opportunities right now.", label);
        }
        format!(
            "{} list (sorted by potential):\n\n{}",
            label,
            Self::format_lines(rows)
        )
    }

    pub fn welcome(schedule: &str) -> String {
        format!(
            "Hello! I send BUY/SELL notifications at {} on weekdays.\n\n{}",
            schedule,
            Self::help()
        )
    }

    pub fn help() -> String {
        [
            "Commands:",
            "/what_to_buy - BUY list",
            "/what_to_sell - SELL list",
            "/what_to_keep - KEEP list",
            "/what_to_take_profit - TAKE PROFIT list",
        ]
        .join("\n")
    }

    pub fn fetch_failed() -> &'static str {
        "Error fetching data. Try again later."
    }

    pub fn unknown_command() -> &'static str {
        "Unknown command. Send /help for the list."
    }
}

/// Split `text` on line boundaries so that each part holds at most `limit`
/// characters. A single line longer than `limit` is cut hard. Blank parts are
/// dropped.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    if text.chars().count() <= limit {
        return if text.trim().is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        };
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let line_len = line.chars().count();

        if line_len > limit {
            if current_len > 0 {
                parts.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = line.chars().collect();
            for chunk in chars.chunks(limit) {
                parts.push(chunk.iter().collect());
            }
            continue;
        }

        let needed = if current_len == 0 { line_len } else { current_len + 1 + line_len };
        if needed > limit {
            parts.push(std::mem::take(&mut current));
            current.push_str(line);
            current_len = line_len;
        } else {
            if current_len > 0 {
                current.push('\n');
            }
            current.push_str(line);
            current_len = needed;
        }
    }
    if current_len > 0 {
        parts.push(current);
    }

    parts.retain(|part| !part.trim().is_empty());
    parts
}
