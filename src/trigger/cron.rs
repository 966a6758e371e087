// src/trigger/cron.rs

//! Cron schedules and the ticker tasks that drive them.
//!
//! Ticks are stamped with their nominal schedule time, not the time the
//! ticker woke up. If the ticker falls behind, the missed ticks are
//! delivered in order on the next wake-up.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::InboundEvent;

/// Catch-up ticks delivered per wake-up before skipping ahead.
const MAX_CATCH_UP: usize = 64;

#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl CronSchedule {
    /// Accepts five-field (minute precision) and six/seven-field
    /// (second precision) expressions.
    pub fn parse(expression: &str) -> Result<Self, String> {
        let trimmed = expression.trim();
        let fields = trimmed.split_whitespace().count();
        let normalized = match fields {
            5 => format!("0 {trimmed}"),
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(format!(
                    "invalid cron expression '{trimmed}': expected 5 to 7 fields, got {n}"
                ));
            }
        };
        let schedule = cron::Schedule::from_str(&normalized)
            .map_err(|e| format!("invalid cron expression '{trimmed}': {e}"))?;
        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Occurrences in `(after, until]`, oldest first.
    pub fn ticks_between(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&after)
            .take_while(|t| *t <= until)
            .take(MAX_CATCH_UP)
            .collect()
    }

    /// Spawn a ticker feeding `tx`. It exits when the receiver is dropped or
    /// the schedule has no further occurrence.
    pub fn spawn_ticker(self, tx: mpsc::Sender<InboundEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last = Utc::now();
            loop {
                let Some(next) = self.next_after(last) else {
                    debug!(cron = %self.expression, "schedule exhausted");
                    return;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;

                let now = Utc::now();
                let ticks = self.ticks_between(last, now);
                if ticks.len() > 1 {
                    warn!(cron = %self.expression, missed = ticks.len() - 1, "cron ticker fell behind");
                }
                for scheduled_at in ticks {
                    let event = InboundEvent::CronTick {
                        expression: self.expression.clone(),
                        scheduled_at,
                    };
                    if tx.send(event).await.is_err() {
                        return;
                    }
                    last = scheduled_at;
                }
                if self.next_after(last).is_some_and(|n| n <= now) {
                    // More backlog than MAX_CATCH_UP; skip it.
                    last = now;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expressions_get_seconds_prepended() {
        let every_minute = CronSchedule::parse("* * * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();
        assert_eq!(
            every_minute.next_after(start),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap())
        );
        assert_eq!(every_minute.expression(), "* * * * *");
    }

    #[test]
    fn ticks_between_is_half_open() {
        let every_ten = CronSchedule::parse("*/10 * * * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();
        let ticks = every_ten.ticks_between(start, end);
        assert_eq!(ticks.len(), 3);
        assert_eq!(ticks.last(), Some(&end));
    }

    #[test]
    fn rejects_garbage() {
        assert!(CronSchedule::parse("every tuesday").is_err());
        assert!(CronSchedule::parse("* * *").is_err());
        assert!(CronSchedule::parse("99 * * * *").is_err());
    }
}
