use crate::domain::event::{ApplicationHistoryEntry, DefaultEvent, DefaultEventType, LoanTransition};
use crate::domain::loan::{Borrower, Loan, LoanStatus};
use crate::domain::ports::{LoanStore, SettingsStore};
use crate::error::{ProcessorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    loans: BTreeMap<String, Loan>,
    borrowers: HashMap<String, Borrower>,
    events: Vec<DefaultEvent>,
    history: Vec<ApplicationHistoryEntry>,
    settings: HashMap<String, String>,
}

/// A thread-safe in-memory store for loans, borrowers, the audit log and settings.
///
/// All collections sit behind one `RwLock` so a transition's loan row, event
/// and history entry become visible together.
/// Ideal for testing or for one-shot runs seeded from a portfolio file.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LoanStore for InMemoryStore {
    async fn store_loan(&self, loan: Loan) -> Result<()> {
        let mut state = self.state.write().await;
        state.loans.insert(loan.id.clone(), loan);
        Ok(())
    }

    async fn get_loan(&self, loan_id: &str) -> Result<Option<Loan>> {
        let state = self.state.read().await;
        Ok(state.loans.get(loan_id).cloned())
    }

    async fn loans_by_status(&self, status: LoanStatus) -> Result<Vec<Loan>> {
        let state = self.state.read().await;
        Ok(state
            .loans
            .values()
            .filter(|loan| loan.status == status)
            .cloned()
            .collect())
    }

    async fn store_borrower(&self, borrower: Borrower) -> Result<()> {
        let mut state = self.state.write().await;
        state.borrowers.insert(borrower.id.clone(), borrower);
        Ok(())
    }

    async fn get_borrower(&self, user_id: &str) -> Result<Option<Borrower>> {
        let state = self.state.read().await;
        Ok(state.borrowers.get(user_id).cloned())
    }

    async fn apply_transition(&self, transition: LoanTransition) -> Result<u64> {
        let mut state = self.state.write().await;
        let loan_id = transition.loan_id().to_string();
        let loan = state
            .loans
            .get_mut(&loan_id)
            .ok_or_else(|| ProcessorError::LoanNotFound(loan_id.clone()))?;
        if !transition.change.apply_to(loan, transition.event.processed_at) {
            return Err(ProcessorError::TransitionConflict {
                loan_id,
                change: transition.change,
            });
        }
        let application_id = loan.application_id.clone();

        let event_id = state.events.len() as u64 + 1;
        let history_id = state.history.len() as u64 + 1;
        state
            .history
            .push(transition.history_entry(&application_id, history_id));
        state.events.push(transition.event.with_id(event_id));
        Ok(event_id)
    }

    async fn increment_notices(&self, loan_id: &str, cap: u32) -> Result<u32> {
        let mut state = self.state.write().await;
        let loan = state
            .loans
            .get_mut(loan_id)
            .ok_or_else(|| ProcessorError::LoanNotFound(loan_id.to_string()))?;
        loan.default_notices_sent = (loan.default_notices_sent + 1).min(cap);
        Ok(loan.default_notices_sent)
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<DefaultEvent>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.processed_at >= since)
            .cloned()
            .collect())
    }

    async fn has_event_since(&self, event_type: DefaultEventType, since: DateTime<Utc>) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .any(|e| e.event_type == event_type && e.processed_at >= since))
    }

    async fn latest_event(&self) -> Result<Option<DefaultEvent>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .max_by_key(|e| (e.processed_at, e.id))
            .cloned())
    }

    async fn all_events(&self) -> Result<Vec<DefaultEvent>> {
        let state = self.state.read().await;
        Ok(state.events.clone())
    }

    async fn attach_message_id(&self, event_id: u64, message_id: String) -> Result<()> {
        let mut state = self.state.write().await;
        let event = state
            .events
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or(ProcessorError::EventNotFound(event_id))?;
        event.message_id = Some(message_id);
        Ok(())
    }

    async fn history_for_application(&self, application_id: &str) -> Result<Vec<ApplicationHistoryEntry>> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .filter(|h| h.application_id == application_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SettingsStore for InMemoryStore {
    async fn all_settings(&self) -> Result<HashMap<String, String>> {
        let state = self.state.read().await;
        Ok(state.settings.clone())
    }

    async fn put_setting(&self, key: String, value: String) -> Result<()> {
        let mut state = self.state.write().await;
        state.settings.insert(key, value);
        Ok(())
    }
}
