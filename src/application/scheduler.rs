use super::processor::DefaultProcessor;
use crate::domain::calendar::BusinessClock;
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use tracing::{info, warn};

/// Local hours at which the two daily jobs fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    pub sweep_hour: u32,
    pub notify_hour: u32,
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self {
            sweep_hour: 1,
            notify_hour: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Sweep,
    Notify,
}

/// First local `hour:00` strictly after `now`.
pub fn next_occurrence(clock: BusinessClock, now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let hour = i64::from(hour.min(23));
    let today = clock.start_of_day(now) + Duration::hours(hour);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

impl DailySchedule {
    /// The job due next and when; the sweep wins a tie.
    pub fn next_job(&self, clock: BusinessClock, now: DateTime<Utc>) -> (Job, DateTime<Utc>) {
        let sweep = next_occurrence(clock, now, self.sweep_hour);
        let notify = next_occurrence(clock, now, self.notify_hour);
        if sweep <= notify {
            (Job::Sweep, sweep)
        } else {
            (Job::Notify, notify)
        }
    }
}

/// Runs one job on `processor`, logging an unsuccessful outcome.
pub async fn run_job(processor: &DefaultProcessor, job: Job) {
    match job {
        Job::Sweep => {
            let result = processor.process_defaults(false).await;
            if !result.success {
                warn!(message = ?result.message, error = ?result.error_message, "scheduled sweep did not complete");
            }
        }
        Job::Notify => {
            let result = processor.process_default_notifications().await;
            if !result.success {
                warn!(message = ?result.message, error = ?result.error_message, "scheduled notification pass did not complete");
            }
        }
    }
}

/// Runs the daily jobs until `shutdown` resolves.
///
/// `execute` is awaited once per due job; it owns whatever resources the
/// job needs, so nothing stays open between jobs.
pub async fn run_daemon<E, J, F>(clock: BusinessClock, schedule: DailySchedule, mut execute: E, shutdown: F)
where
    E: FnMut(Job) -> J,
    J: Future<Output = ()>,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let now = Utc::now();
        let (job, at) = schedule.next_job(clock, now);
        let wait = (at - now).to_std().unwrap_or_default();
        info!(job = ?job, at = %clock.local(at), "next scheduled job");

        tokio::select! {
            _ = &mut shutdown => {
                info!("scheduler shutting down");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        execute(job).await;
    }
}
