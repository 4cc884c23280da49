use std::time::Duration;

use notification_service::{TelegramClient, Update};
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;

use crate::commands::BotCommand;
use crate::pipeline::Job;

const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Long-poll Telegram for commands and queue them for the executor. Never
/// waits on a pipeline run. Commands sent before startup are consumed
/// without a reply.
pub async fn run(
    telegram: TelegramClient,
    jobs: mpsc::Sender<Job>,
    poll_timeout_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut offset = 0;
    let started_at = chrono::Utc::now().timestamp();
    tracing::info!("Listening for commands (long-poll {}s)", poll_timeout_secs);

    loop {
        tokio::select! {
            result = telegram.get_updates(offset, poll_timeout_secs) => match result {
                Ok(updates) => {
                    for job in take_commands(updates, &mut offset, started_at) {
                        match jobs.try_send(job) {
                            Ok(()) => {}
                            Err(TrySendError::Full(job)) => {
                                tracing::warn!("Job queue full, dropping {:?}", job);
                            }
                            Err(TrySendError::Closed(_)) => {
                                tracing::warn!("Job queue closed, poller stopped");
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("getUpdates failed: {}, retrying in {}s", e, ERROR_BACKOFF.as_secs());
                    tokio::select! {
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            },
            _ = shutdown.changed() => break,
        }
    }
    tracing::info!("Poller stopped");
}

/// Turn updates into command jobs and advance `offset` past all of them,
/// including updates that carry no command. Messages dated before `since`
/// (unix seconds) are acknowledged but not answered.
pub fn take_commands(updates: Vec<Update>, offset: &mut i64, since: i64) -> Vec<Job> {
    let mut jobs = Vec::new();

    for update in updates {
        *offset = (*offset).max(update.update_id + 1);

        let Some(message) = update.message else {
            continue;
        };
        if message.date < since {
            tracing::debug!("Skipping update {} sent before startup", update.update_id);
            continue;
        }
        let Some(command) = message.text.as_deref().and_then(BotCommand::parse) else {
            continue;
        };

        tracing::info!("Command {:?} from chat {}", command, message.chat.id);
        jobs.push(Job::Command {
            chat_id: message.chat.id.to_string(),
            command,
        });
    }

    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use notification_service::{Chat, IncomingMessage};
    use synthesis_core::Label;

    /// Unix time the poller started in these tests
    const STARTED_AT: i64 = 1_709_541_000;

    fn update(update_id: i64, chat_id: i64, text: Option<&str>) -> Update {
        dated(update_id, chat_id, text, STARTED_AT + 5)
    }

    fn dated(update_id: i64, chat_id: i64, text: Option<&str>, date: i64) -> Update {
        Update {
            update_id,
            message: Some(IncomingMessage {
                chat: Chat { id: chat_id },
                date,
                text: text.map(str::to_string),
            }),
        }
    }

    #[test]
    fn test_take_commands_advances_offset() {
        let updates = vec![
            update(10, 42, Some("/what_to_buy")),
            update(11, 42, Some("thanks!")),
            Update {
                update_id: 12,
                message: None,
            },
            update(13, -100, Some("/help@IlboursaBot")),
            update(14, 42, None),
        ];

        let mut offset = 0;
        let jobs = take_commands(updates, &mut offset, STARTED_AT);
        assert_eq!(offset, 15);
        assert_eq!(jobs.len(), 2);

        match &jobs[0] {
            Job::Command { chat_id, command } => {
                assert_eq!(chat_id, "42");
                assert_eq!(command, &BotCommand::List(Label::Buy));
            }
            other => panic!("unexpected job {:?}", other),
        }
        assert!(matches!(
            &jobs[1],
            Job::Command { chat_id, command: BotCommand::Help } if chat_id == "-100"
        ));
    }

    #[test]
    fn test_empty_poll_keeps_offset() {
        let mut offset = 7;
        assert!(take_commands(Vec::new(), &mut offset, STARTED_AT).is_empty());
        assert_eq!(offset, 7);
    }

    #[test]
    fn test_commands_sent_while_down_are_not_answered() {
        let updates = vec![
            dated(20, 42, Some("/what_to_buy"), STARTED_AT - 3600),
            dated(21, 7, Some("/help"), STARTED_AT - 1),
            dated(22, 42, Some("/what_to_sell"), STARTED_AT),
        ];

        let mut offset = 0;
        let jobs = take_commands(updates, &mut offset, STARTED_AT);
        // The backlog is acknowledged so the next poll does not return it
        assert_eq!(offset, 23);
        assert_eq!(jobs.len(), 1);
        assert!(matches!(
            &jobs[0],
            Job::Command { chat_id, command: BotCommand::List(Label::Sell) } if chat_id == "42"
        ));

        let backlog_only = vec![dated(30, 42, Some("/what_to_buy"), STARTED_AT - 60)];
        assert!(take_commands(backlog_only, &mut offset, STARTED_AT).is_empty());
        assert_eq!(offset, 31);
    }
}
