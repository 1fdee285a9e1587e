use crate::domain::event::DefaultEvent;
use crate::domain::settings::ProcessorSettings;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

pub const MSG_LOCK_BUSY: &str = "default processing already in progress";
pub const MSG_NOTIFY_LOCK_BUSY: &str = "default notification dispatch already in progress";
pub const MSG_DISABLED: &str = "default processing disabled";
pub const MSG_ALREADY_PROCESSED: &str = "already processed today";

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Outcome of one `process_defaults` invocation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessingResult {
    pub success: bool,
    pub forced: bool,
    pub risk_flagged: u32,
    pub reminders_sent: u32,
    pub remedy_cured: u32,
    pub defaulted: u32,
    pub recovered: u32,
    pub notifications_sent: u32,
    pub notifications_failed: u32,
    pub loan_errors: u32,
    pub skipped_steps: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub message: Option<String>,
    pub error_message: Option<String>,
}

impl ProcessingResult {
    pub fn new(started_at: DateTime<Utc>, forced: bool) -> Self {
        Self {
            success: false,
            forced,
            risk_flagged: 0,
            reminders_sent: 0,
            remedy_cured: 0,
            defaulted: 0,
            recovered: 0,
            notifications_sent: 0,
            notifications_failed: 0,
            loan_errors: 0,
            skipped_steps: Vec::new(),
            started_at,
            duration_ms: 0,
            message: None,
            error_message: None,
        }
    }

    /// Result reported when another run holds the processing lock.
    pub fn busy(started_at: DateTime<Utc>, forced: bool) -> Self {
        Self {
            message: Some(MSG_LOCK_BUSY.to_string()),
            ..Self::new(started_at, forced)
        }
    }

    /// Number of loans whose state changed during the run.
    pub fn transitions(&self) -> u32 {
        self.risk_flagged + self.remedy_cured + self.defaulted + self.recovered
    }

    pub(crate) fn finish(mut self, timer: Instant) -> Self {
        self.duration_ms = duration_ms(timer.elapsed());
        self
    }
}

/// Outcome of one deferred notification pass.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NotificationResult {
    pub success: bool,
    pub risk_notices_sent: u32,
    pub final_notices_sent: u32,
    pub skipped: u32,
    pub failed: u32,
    pub duration_ms: u64,
    pub message: Option<String>,
    pub error_message: Option<String>,
}

impl NotificationResult {
    pub fn new() -> Self {
        Self {
            success: false,
            risk_notices_sent: 0,
            final_notices_sent: 0,
            skipped: 0,
            failed: 0,
            duration_ms: 0,
            message: None,
            error_message: None,
        }
    }

    pub fn busy() -> Self {
        Self {
            message: Some(MSG_NOTIFY_LOCK_BUSY.to_string()),
            ..Self::new()
        }
    }

    pub(crate) fn finish(mut self, timer: Instant) -> Self {
        self.duration_ms = duration_ms(timer.elapsed());
        self
    }
}

impl Default for NotificationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Dashboard snapshot of the default lifecycle.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessingStatus {
    pub last_event: Option<DefaultEvent>,
    pub processed_today: usize,
    pub defaulted_loans: usize,
    pub at_risk_loans: usize,
    pub settings: ProcessorSettings,
}
