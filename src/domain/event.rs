use super::loan::{Loan, LoanStatus};
use super::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefaultEventType {
    RiskFlagged,
    NoticeSent,
    Defaulted,
    Recovered,
}

impl DefaultEventType {
    /// Event types covered by the once-per-business-day guard.
    pub const DAILY: [DefaultEventType; 3] = [Self::RiskFlagged, Self::Defaulted, Self::Recovered];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RiskFlagged => "RISK_FLAGGED",
            Self::NoticeSent => "NOTICE_SENT",
            Self::Defaulted => "DEFAULTED",
            Self::Recovered => "RECOVERED",
        }
    }
}

impl fmt::Display for DefaultEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of a lifecycle transition.
///
/// `message_id` is the only field ever written after creation: the deferred
/// notification pass back-fills it once the borrower has been messaged.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct DefaultEvent {
    pub id: u64,
    pub loan_id: String,
    pub event_type: DefaultEventType,
    pub days_overdue: u32,
    pub outstanding_amount: Money,
    pub outstanding_late_fees: Money,
    pub message_id: Option<String>,
    pub note: String,
    pub processed_at: DateTime<Utc>,
}

/// Event contents before the store assigns an id.
#[derive(Debug, PartialEq, Clone)]
pub struct NewDefaultEvent {
    pub loan_id: String,
    pub event_type: DefaultEventType,
    pub days_overdue: u32,
    pub outstanding_amount: Money,
    pub outstanding_late_fees: Money,
    pub message_id: Option<String>,
    pub note: String,
    pub processed_at: DateTime<Utc>,
}

impl NewDefaultEvent {
    pub fn with_id(self, id: u64) -> DefaultEvent {
        DefaultEvent {
            id,
            loan_id: self.loan_id,
            event_type: self.event_type,
            days_overdue: self.days_overdue,
            outstanding_amount: self.outstanding_amount,
            outstanding_late_fees: self.outstanding_late_fees,
            message_id: self.message_id,
            note: self.note,
            processed_at: self.processed_at,
        }
    }
}

/// Audit trail entry attached to the loan's originating application.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ApplicationHistoryEntry {
    pub id: u64,
    pub application_id: String,
    pub loan_id: String,
    pub action: DefaultEventType,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// The lifecycle fields a transition writes. Everything else on the loan
/// row (installments, repayments) belongs to other writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleChange {
    FlagRisk,
    RecordNotice { cap: u32 },
    /// Arrears cleared while still in the remedy period.
    Cure,
    Default,
    /// Arrears cleared after the loan went into DEFAULT.
    Recover,
}

impl LifecycleChange {
    /// Whether the current row still qualifies for this change at `now`.
    pub fn applies_to(&self, loan: &Loan, now: DateTime<Utc>) -> bool {
        let arrears = loan.arrears(now);
        match self {
            Self::FlagRisk => {
                loan.status == LoanStatus::Active
                    && loan.default_risk_flagged_at.is_none()
                    && arrears.total().is_positive()
            }
            Self::RecordNotice { .. } => loan.is_at_risk(),
            Self::Cure => loan.is_at_risk() && arrears.is_cleared(),
            Self::Default => {
                loan.status == LoanStatus::Active
                    && loan.defaulted_at.is_none()
                    && arrears.total().is_positive()
            }
            Self::Recover => loan.status == LoanStatus::Default && arrears.is_cleared(),
        }
    }

    /// Updates the lifecycle fields of `loan` in place. Returns `false` and
    /// leaves the loan untouched when it no longer qualifies.
    pub fn apply_to(&self, loan: &mut Loan, now: DateTime<Utc>) -> bool {
        if !self.applies_to(loan, now) {
            return false;
        }
        match *self {
            Self::FlagRisk => loan.flag_risk(now),
            Self::RecordNotice { cap } => loan.record_notice(cap),
            Self::Cure | Self::Recover => loan.restore(),
            Self::Default => loan.mark_defaulted(now),
        }
        true
    }
}

/// A lifecycle change together with the audit records that must be
/// persisted atomically with it.
///
/// Stores apply `change` to the row they hold at write time, so repayments
/// recorded while the sweep was working on its snapshot survive.
#[derive(Debug, Clone)]
pub struct LoanTransition {
    pub change: LifecycleChange,
    pub event: NewDefaultEvent,
    pub history_note: String,
}

impl LoanTransition {
    pub fn loan_id(&self) -> &str {
        &self.event.loan_id
    }

    pub fn history_entry(&self, application_id: &str, id: u64) -> ApplicationHistoryEntry {
        ApplicationHistoryEntry {
            id,
            application_id: application_id.to_string(),
            loan_id: self.event.loan_id.clone(),
            action: self.event.event_type,
            note: self.history_note.clone(),
            created_at: self.event.processed_at,
        }
    }
}
