use super::money::Money;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    Active,
    Default,
    Completed,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallmentStatus {
    Pending,
    Partial,
    Paid,
    Cancelled,
}

impl InstallmentStatus {
    pub fn is_unpaid(&self) -> bool {
        matches!(self, Self::Pending | Self::Partial)
    }
}

/// A scheduled repayment belonging to exactly one loan.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Installment {
    pub id: String,
    pub due_date: DateTime<Utc>,
    pub principal_amount: Decimal,
    pub interest_amount: Decimal,
    /// Amount paid toward principal and interest.
    #[serde(default)]
    pub amount_paid: Decimal,
    #[serde(default)]
    pub late_fee_amount: Decimal,
    #[serde(default)]
    pub late_fees_paid: Decimal,
    pub status: InstallmentStatus,
}

impl Installment {
    /// Principal plus interest still owed, never negative.
    pub fn outstanding(&self) -> Money {
        Money::new(self.principal_amount + self.interest_amount)
            .floor_sub(Money::new(self.amount_paid))
    }

    /// Late fees still owed, never negative.
    pub fn outstanding_late_fee(&self) -> Money {
        Money::new(self.late_fee_amount).floor_sub(Money::new(self.late_fees_paid))
    }

    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_unpaid() && self.due_date < now
    }
}

/// Aggregate arrears of a loan at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Arrears {
    pub principal_interest: Money,
    pub late_fees: Money,
    pub earliest_due: Option<DateTime<Utc>>,
    pub overdue_installments: usize,
}

impl Arrears {
    /// Sums outstanding amounts over the unpaid installments already due at `now`.
    pub fn compute(installments: &[Installment], now: DateTime<Utc>) -> Self {
        installments
            .iter()
            .filter(|i| i.is_overdue_at(now))
            .fold(Self::default(), |mut acc, i| {
                acc.principal_interest += i.outstanding();
                acc.late_fees += i.outstanding_late_fee();
                acc.earliest_due = Some(match acc.earliest_due {
                    Some(d) if d <= i.due_date => d,
                    _ => i.due_date,
                });
                acc.overdue_installments += 1;
                acc
            })
    }

    pub fn total(&self) -> Money {
        self.principal_interest + self.late_fees
    }

    pub fn is_cleared(&self) -> bool {
        self.principal_interest.is_zero() && self.late_fees.is_zero()
    }
}

/// A disbursed credit facility.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Loan {
    pub id: String,
    pub user_id: String,
    pub application_id: String,
    pub status: LoanStatus,
    #[serde(default)]
    pub default_risk_flagged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub defaulted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub default_notices_sent: u32,
    #[serde(default)]
    pub installments: Vec<Installment>,
}

impl Loan {
    pub fn arrears(&self, now: DateTime<Utc>) -> Arrears {
        Arrears::compute(&self.installments, now)
    }

    pub fn is_at_risk(&self) -> bool {
        self.status == LoanStatus::Active
            && self.default_risk_flagged_at.is_some()
            && self.defaulted_at.is_none()
    }

    pub fn flag_risk(&mut self, now: DateTime<Utc>) {
        self.default_risk_flagged_at = Some(now);
        self.default_notices_sent = 0;
    }

    /// Moves the loan to DEFAULT, back-filling the risk flag if it was never set.
    pub fn mark_defaulted(&mut self, now: DateTime<Utc>) {
        self.status = LoanStatus::Default;
        self.defaulted_at = Some(now);
        self.default_risk_flagged_at.get_or_insert(now);
    }

    /// Returns the loan to good standing.
    pub fn restore(&mut self) {
        self.status = LoanStatus::Active;
        self.default_risk_flagged_at = None;
        self.defaulted_at = None;
        self.default_notices_sent = 0;
    }

    pub fn record_notice(&mut self, cap: u32) {
        self.default_notices_sent = (self.default_notices_sent + 1).min(cap);
    }
}

/// The owner of a loan, as far as notifications are concerned.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Borrower {
    pub id: String,
    pub full_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
}
