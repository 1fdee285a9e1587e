use crate::domain::loan::{Borrower, Loan, LoanStatus};
use crate::domain::ports::{LoanStore, SettingsStore};
use crate::error::{ProcessorError, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::io::Read;

/// A snapshot of loans, borrowers and settings to seed a store with.
#[derive(Debug, Default, Deserialize)]
pub struct Portfolio {
    #[serde(default)]
    pub borrowers: Vec<Borrower>,
    #[serde(default)]
    pub loans: Vec<Loan>,
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

/// Counts of records written by [`Portfolio::load_into`].
#[derive(Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    pub borrowers: usize,
    pub loans: usize,
    pub settings: usize,
}

impl Portfolio {
    /// Parses and validates a portfolio document.
    pub fn from_reader<R: Read>(source: R) -> Result<Self> {
        let portfolio: Portfolio = serde_json::from_reader(source)?;
        portfolio.validate()?;
        Ok(portfolio)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for loan in &self.loans {
            if !seen.insert(loan.id.as_str()) {
                return Err(ProcessorError::ValidationError(format!(
                    "duplicate loan id {}",
                    loan.id
                )));
            }
            if loan.defaulted_at.is_some()
                && (loan.status != LoanStatus::Default || loan.default_risk_flagged_at.is_none())
            {
                return Err(ProcessorError::ValidationError(format!(
                    "loan {} has defaulted_at without DEFAULT status and a risk flag",
                    loan.id
                )));
            }
        }
        Ok(())
    }

    pub async fn load_into(
        self,
        loans: &dyn LoanStore,
        settings: &dyn SettingsStore,
    ) -> Result<ImportSummary> {
        let summary = ImportSummary {
            borrowers: self.borrowers.len(),
            loans: self.loans.len(),
            settings: self.settings.len(),
        };
        for borrower in self.borrowers {
            loans.store_borrower(borrower).await?;
        }
        for loan in self.loans {
            loans.store_loan(loan).await?;
        }
        for (key, value) in self.settings {
            settings.put_setting(key, value).await?;
        }
        Ok(summary)
    }
}
