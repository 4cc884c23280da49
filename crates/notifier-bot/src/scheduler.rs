use chrono::{DateTime, Datelike, Days, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use tokio::sync::{mpsc, watch};

use crate::pipeline::Job;

/// How far ahead to look for the next slot
const LOOKAHEAD_DAYS: u64 = 14;
/// Longest DST gap we step over, in minutes
const MAX_GAP_MINUTES: i64 = 180;

pub const WEEKDAYS: [Weekday; 5] = [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri];

/// Wall-clock slots in a named zone, on selected days of the week.
#[derive(Debug, Clone)]
pub struct Schedule {
    tz: Tz,
    slots: Vec<NaiveTime>,
    days: Vec<Weekday>,
}

impl Schedule {
    pub fn new(tz: Tz, mut slots: Vec<NaiveTime>, days: &[Weekday]) -> Self {
        slots.sort();
        slots.dedup();
        Self {
            tz,
            slots,
            days: days.to_vec(),
        }
    }

    /// Monday to Friday.
    pub fn weekdays(tz: Tz, slots: Vec<NaiveTime>) -> Self {
        Self::new(tz, slots, &WEEKDAYS)
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// e.g. "09:30 and 15:00 Africa/Tunis"
    pub fn describe(&self) -> String {
        let times: Vec<String> = self.slots.iter().map(|t| t.format("%H:%M").to_string()).collect();
        let joined = match times.split_last() {
            Some((last, rest)) if !rest.is_empty() => format!("{} and {}", rest.join(", "), last),
            Some((last, _)) => last.clone(),
            None => String::new(),
        };
        format!("{} {}", joined, self.tz.name())
    }

    /// First slot strictly after `after`. Local wall time is resolved again
    /// for every candidate day, so offsets follow DST changes.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_timezone(&self.tz).date_naive();

        (0..=LOOKAHEAD_DAYS)
            .filter_map(|offset| start.checked_add_days(Days::new(offset)))
            .filter(|date| self.days.contains(&date.weekday()))
            .flat_map(move |date| self.slots.iter().filter_map(move |slot| self.resolve(date, *slot)))
            .find(|fire| *fire > after)
    }

    /// Ambiguous times take the earlier instant; times inside a gap move to
    /// the first valid minute after it.
    fn resolve(&self, date: NaiveDate, slot: NaiveTime) -> Option<DateTime<Utc>> {
        let local = date.and_time(slot);
        (0..=MAX_GAP_MINUTES).find_map(|shift| {
            match self.tz.from_local_datetime(&(local + chrono::Duration::minutes(shift))) {
                LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
                LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
                LocalResult::None => None,
            }
        })
    }
}

/// Enqueue a scheduled job at every slot until shutdown. Missed slots are not
/// replayed.
pub async fn run(schedule: Schedule, jobs: mpsc::Sender<Job>, shutdown: watch::Receiver<bool>) {
    run_with_clock(schedule, jobs, shutdown, Utc::now).await
}

/// Timer loop reading wall time from `clock`.
pub async fn run_with_clock<F>(
    schedule: Schedule,
    jobs: mpsc::Sender<Job>,
    mut shutdown: watch::Receiver<bool>,
    clock: F,
) where
    F: Fn() -> DateTime<Utc>,
{
    let mut last_fire: Option<DateTime<Utc>> = None;

    loop {
        let now = clock();
        let after = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = schedule.next_fire(after) else {
            tracing::error!("No schedule slot found within {} days, timer stopped", LOOKAHEAD_DAYS);
            return;
        };

        tracing::info!(
            "Next scheduled scan at {}",
            next.with_timezone(&schedule.tz()).format("%Y-%m-%d %H:%M %Z")
        );
        let wait = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                last_fire = Some(next);
                if jobs.send(Job::Scheduled { at: next }).await.is_err() {
                    tracing::warn!("Job queue closed, timer stopped");
                    return;
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("Scheduler shutting down");
                return;
            }
        }
    }
}
