//! Pure selection rules for each step of the default sweep.
//!
//! Every rule takes a loan snapshot plus its precomputed [`Arrears`] and
//! answers what, if anything, the sweep should do with it.

use super::calendar::BusinessClock;
use super::loan::{Arrears, Loan, LoanStatus};
use super::settings::ProcessorSettings;
use chrono::{DateTime, Duration, NaiveDate, Utc};

/// What the remedy step should do with a flagged loan today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemedyAction {
    /// Arrears were cleared before the deadline.
    Cure,
    Remind { day: u32 },
    Wait,
}

/// Inputs shared by all rules for one sweep.
#[derive(Debug, Clone, Copy)]
pub struct SweepContext<'a> {
    pub now: DateTime<Utc>,
    pub clock: BusinessClock,
    pub settings: &'a ProcessorSettings,
    pub reminder_days: &'a [u32],
    pub max_notices: u32,
}

impl<'a> SweepContext<'a> {
    pub fn new(
        now: DateTime<Utc>,
        clock: BusinessClock,
        settings: &'a ProcessorSettings,
        reminder_days: &'a [u32],
        max_notices: u32,
    ) -> Self {
        Self {
            now,
            clock,
            settings,
            reminder_days,
            max_notices,
        }
    }

    pub fn days_overdue(&self, arrears: &Arrears) -> u32 {
        arrears
            .earliest_due
            .map(|due| self.clock.days_overdue(due, self.now))
            .unwrap_or(0)
    }

    /// Calendar days since the loan entered its remedy period.
    pub fn remedy_day(&self, loan: &Loan) -> Option<i64> {
        loan.default_risk_flagged_at
            .map(|flagged| self.clock.days_between(flagged, self.now))
    }

    pub fn remedy_deadline(&self, loan: &Loan) -> Option<NaiveDate> {
        let flagged = loan.default_risk_flagged_at?;
        self.clock
            .local_date(flagged)
            .checked_add_signed(Duration::days(i64::from(self.settings.remedy_days)))
    }

    /// A threshold reaching back past the representable range is never crossed.
    fn overdue_beyond(&self, arrears: &Arrears, days: u32) -> bool {
        let Some(threshold) = Duration::try_days(i64::from(days))
            .and_then(|span| self.now.checked_sub_signed(span))
        else {
            return false;
        };
        arrears.earliest_due.is_some_and(|due| due < threshold)
    }

    /// An unflagged active loan with an unpaid installment older than the risk threshold.
    pub fn needs_risk_flag(&self, loan: &Loan, arrears: &Arrears) -> bool {
        loan.status == LoanStatus::Active
            && loan.default_risk_flagged_at.is_none()
            && arrears.total().is_positive()
            && self.overdue_beyond(arrears, self.settings.risk_days)
    }

    pub fn remedy_action(&self, loan: &Loan, arrears: &Arrears) -> RemedyAction {
        if !loan.is_at_risk() {
            return RemedyAction::Wait;
        }
        if arrears.is_cleared() {
            return RemedyAction::Cure;
        }
        match self.remedy_day(loan) {
            Some(day)
                if loan.default_notices_sent < self.max_notices
                    && self.reminder_days.iter().any(|d| i64::from(*d) == day) =>
            {
                RemedyAction::Remind { day: day as u32 }
            }
            _ => RemedyAction::Wait,
        }
    }

    /// Remedy deadline reached (flagged loans) or arrears older than risk plus
    /// remedy days (loans that were never flagged), with something still owed.
    pub fn needs_default(&self, loan: &Loan, arrears: &Arrears) -> bool {
        if loan.status != LoanStatus::Active || loan.defaulted_at.is_some() {
            return false;
        }
        if !arrears.total().is_positive() {
            return false;
        }
        let remedy_expired = self
            .remedy_day(loan)
            .is_some_and(|day| day >= i64::from(self.settings.remedy_days));
        remedy_expired || self.overdue_beyond(arrears, self.settings.default_after_days())
    }

    pub fn needs_recovery(&self, loan: &Loan, arrears: &Arrears) -> bool {
        loan.status == LoanStatus::Default && arrears.is_cleared()
    }
}
