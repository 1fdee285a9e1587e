use crate::domain::event::{ApplicationHistoryEntry, DefaultEvent, DefaultEventType, LoanTransition};
use crate::domain::loan::{Borrower, Loan, LoanStatus};
use crate::domain::ports::{LoanStore, SettingsStore};
use crate::error::{ProcessorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Column Family for loan rows (with their installments).
pub const CF_LOANS: &str = "loans";
/// Column Family for borrower contact records.
pub const CF_BORROWERS: &str = "borrowers";
/// Column Family for the default event log, keyed by big-endian event id.
pub const CF_EVENTS: &str = "default_events";
/// Column Family for application history, keyed by big-endian entry id.
pub const CF_HISTORY: &str = "application_history";
/// Column Family for system settings.
pub const CF_SETTINGS: &str = "settings";
/// Column Family for id sequences.
pub const CF_META: &str = "meta";

const SEQ_EVENTS: &[u8] = b"seq:events";
const SEQ_HISTORY: &[u8] = b"seq:history";

const ALL_CFS: [&str; 6] = [CF_LOANS, CF_BORROWERS, CF_EVENTS, CF_HISTORY, CF_SETTINGS, CF_META];

/// A persistent store implementation using RocksDB.
///
/// Each entity lives in its own Column Family. Transitions are written with a
/// single `WriteBatch`, and read-modify-write sequences are serialized by an
/// in-process mutex (RocksDB admits one process per database directory).
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            ProcessorError::InternalError(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                name
            ))))
        })
    }

    fn write_guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|e| ProcessorError::InternalError(e.to_string().into()))
    }

    fn put<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut items = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }

    fn next_seq(&self, key: &[u8]) -> Result<u64> {
        let current = self.get::<u64>(CF_META, key)?.unwrap_or(0);
        Ok(current + 1)
    }
}

#[async_trait]
impl LoanStore for RocksDBStore {
    async fn store_loan(&self, loan: Loan) -> Result<()> {
        self.put(CF_LOANS, loan.id.as_bytes(), &loan)
    }

    async fn get_loan(&self, loan_id: &str) -> Result<Option<Loan>> {
        self.get(CF_LOANS, loan_id.as_bytes())
    }

    async fn loans_by_status(&self, status: LoanStatus) -> Result<Vec<Loan>> {
        let loans: Vec<Loan> = self.scan(CF_LOANS)?;
        Ok(loans.into_iter().filter(|l| l.status == status).collect())
    }

    async fn store_borrower(&self, borrower: Borrower) -> Result<()> {
        self.put(CF_BORROWERS, borrower.id.as_bytes(), &borrower)
    }

    async fn get_borrower(&self, user_id: &str) -> Result<Option<Borrower>> {
        self.get(CF_BORROWERS, user_id.as_bytes())
    }

    async fn apply_transition(&self, transition: LoanTransition) -> Result<u64> {
        let _guard = self.write_guard()?;
        let loan_id = transition.loan_id().to_string();
        let mut loan: Loan = self
            .get(CF_LOANS, loan_id.as_bytes())?
            .ok_or_else(|| ProcessorError::LoanNotFound(loan_id.clone()))?;
        if !transition.change.apply_to(&mut loan, transition.event.processed_at) {
            return Err(ProcessorError::TransitionConflict {
                loan_id,
                change: transition.change,
            });
        }

        let event_id = self.next_seq(SEQ_EVENTS)?;
        let history_id = self.next_seq(SEQ_HISTORY)?;
        let history = transition.history_entry(&loan.application_id, history_id);
        let event = transition.event.with_id(event_id);

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_LOANS)?, loan_id.as_bytes(), serde_json::to_vec(&loan)?);
        batch.put_cf(self.cf(CF_EVENTS)?, event_id.to_be_bytes(), serde_json::to_vec(&event)?);
        batch.put_cf(self.cf(CF_HISTORY)?, history_id.to_be_bytes(), serde_json::to_vec(&history)?);
        batch.put_cf(self.cf(CF_META)?, SEQ_EVENTS, serde_json::to_vec(&event_id)?);
        batch.put_cf(self.cf(CF_META)?, SEQ_HISTORY, serde_json::to_vec(&history_id)?);
        self.db.write(batch)?;

        Ok(event_id)
    }

    async fn increment_notices(&self, loan_id: &str, cap: u32) -> Result<u32> {
        let _guard = self.write_guard()?;
        let mut loan: Loan = self
            .get(CF_LOANS, loan_id.as_bytes())?
            .ok_or_else(|| ProcessorError::LoanNotFound(loan_id.to_string()))?;
        loan.default_notices_sent = (loan.default_notices_sent + 1).min(cap);
        self.put(CF_LOANS, loan_id.as_bytes(), &loan)?;
        Ok(loan.default_notices_sent)
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<DefaultEvent>> {
        let events: Vec<DefaultEvent> = self.scan(CF_EVENTS)?;
        Ok(events.into_iter().filter(|e| e.processed_at >= since).collect())
    }

    async fn has_event_since(&self, event_type: DefaultEventType, since: DateTime<Utc>) -> Result<bool> {
        let events: Vec<DefaultEvent> = self.scan(CF_EVENTS)?;
        Ok(events
            .iter()
            .any(|e| e.event_type == event_type && e.processed_at >= since))
    }

    async fn latest_event(&self) -> Result<Option<DefaultEvent>> {
        let events: Vec<DefaultEvent> = self.scan(CF_EVENTS)?;
        Ok(events.into_iter().max_by_key(|e| (e.processed_at, e.id)))
    }

    async fn all_events(&self) -> Result<Vec<DefaultEvent>> {
        self.scan(CF_EVENTS)
    }

    async fn attach_message_id(&self, event_id: u64, message_id: String) -> Result<()> {
        let _guard = self.write_guard()?;
        let key = event_id.to_be_bytes();
        let mut event: DefaultEvent = self
            .get(CF_EVENTS, &key)?
            .ok_or(ProcessorError::EventNotFound(event_id))?;
        event.message_id = Some(message_id);
        self.put(CF_EVENTS, &key, &event)
    }

    async fn history_for_application(&self, application_id: &str) -> Result<Vec<ApplicationHistoryEntry>> {
        let history: Vec<ApplicationHistoryEntry> = self.scan(CF_HISTORY)?;
        Ok(history
            .into_iter()
            .filter(|h| h.application_id == application_id)
            .collect())
    }
}

#[async_trait]
impl SettingsStore for RocksDBStore {
    async fn all_settings(&self) -> Result<HashMap<String, String>> {
        let cf = self.cf(CF_SETTINGS)?;
        let mut settings = HashMap::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            settings.insert(
                String::from_utf8_lossy(&key).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            );
        }
        Ok(settings)
    }

    async fn put_setting(&self, key: String, value: String) -> Result<()> {
        let cf = self.cf(CF_SETTINGS)?;
        self.db.put_cf(cf, key.as_bytes(), value.as_bytes())?;
        Ok(())
    }
}
