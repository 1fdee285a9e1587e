use super::money::Money;
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum NoticeKind {
    RiskFlagged,
    RemedyReminder { day: u32 },
    FinalDefault,
}

impl NoticeKind {
    /// Name of the approved outbound message template.
    pub fn template(&self) -> &'static str {
        match self {
            Self::RiskFlagged => "default_risk_notice",
            Self::RemedyReminder { .. } => "default_remedy_reminder",
            Self::FinalDefault => "default_final_notice",
        }
    }
}

/// An outbound borrower notification about the default lifecycle.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct Notice {
    pub kind: NoticeKind,
    pub loan_id: String,
    pub recipient_name: String,
    pub phone_number: String,
    pub outstanding_amount: Money,
    pub outstanding_late_fees: Money,
    pub days_overdue: u32,
    pub remedy_deadline: Option<NaiveDate>,
}

impl Notice {
    /// Positional template parameters, in the order the templates expect.
    pub fn parameters(&self) -> Vec<String> {
        let mut params = vec![
            self.recipient_name.clone(),
            self.loan_id.clone(),
            self.outstanding_amount.to_string(),
            self.outstanding_late_fees.to_string(),
            self.days_overdue.to_string(),
        ];
        if let Some(deadline) = self.remedy_deadline {
            params.push(deadline.format("%d/%m/%Y").to_string());
        }
        params
    }
}
