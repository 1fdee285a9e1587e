use crate::domain::notice::Notice;
use crate::domain::ports::Notifier;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Notifier used when no messaging endpoint is configured: the notice is
/// written to the log and a local message id is returned.
#[derive(Default)]
pub struct LogNotifier {
    sent: AtomicU64,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notice: &Notice) -> Result<String> {
        let seq = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            loan_id = %notice.loan_id,
            template = notice.kind.template(),
            to = %notice.phone_number,
            outstanding = %notice.outstanding_amount,
            days_overdue = notice.days_overdue,
            "notice dispatched to log"
        );
        Ok(format!("log-{}-{}", notice.loan_id, seq))
    }
}
