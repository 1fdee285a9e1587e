use super::event::{ApplicationHistoryEntry, DefaultEvent, DefaultEventType, LoanTransition};
use super::loan::{Borrower, Loan, LoanStatus};
use super::notice::Notice;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn store_loan(&self, loan: Loan) -> Result<()>;
    async fn get_loan(&self, loan_id: &str) -> Result<Option<Loan>>;
    async fn loans_by_status(&self, status: LoanStatus) -> Result<Vec<Loan>>;
    async fn store_borrower(&self, borrower: Borrower) -> Result<()>;
    async fn get_borrower(&self, user_id: &str) -> Result<Option<Borrower>>;

    /// Applies the lifecycle change to the stored row and persists it with
    /// its event and history entry as one unit. Fails with
    /// `TransitionConflict`, writing nothing, when the row no longer qualifies.
    /// Returns the id assigned to the event.
    async fn apply_transition(&self, transition: LoanTransition) -> Result<u64>;

    /// Atomically bumps the loan's notice counter, never past `cap`.
    /// Returns the new count.
    async fn increment_notices(&self, loan_id: &str, cap: u32) -> Result<u32>;

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<DefaultEvent>>;
    async fn has_event_since(&self, event_type: DefaultEventType, since: DateTime<Utc>) -> Result<bool>;
    async fn latest_event(&self) -> Result<Option<DefaultEvent>>;
    async fn all_events(&self) -> Result<Vec<DefaultEvent>>;
    async fn attach_message_id(&self, event_id: u64, message_id: String) -> Result<()>;
    async fn history_for_application(&self, application_id: &str) -> Result<Vec<ApplicationHistoryEntry>>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn all_settings(&self) -> Result<HashMap<String, String>>;
    async fn put_setting(&self, key: String, value: String) -> Result<()>;
}

/// A cooperative, non-blocking mutex keyed by an integer.
#[async_trait]
pub trait BatchLock: Send + Sync {
    /// Returns `false` immediately if the key is already held.
    async fn try_acquire(&self, key: i64) -> Result<bool>;
    async fn release(&self, key: i64) -> Result<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends the notice and returns the provider's message id.
    async fn send(&self, notice: &Notice) -> Result<String>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub type LoanStoreRef = Arc<dyn LoanStore>;
pub type SettingsStoreRef = Arc<dyn SettingsStore>;
pub type BatchLockRef = Arc<dyn BatchLock>;
pub type NotifierRef = Arc<dyn Notifier>;
pub type ClockRef = Arc<dyn Clock>;
