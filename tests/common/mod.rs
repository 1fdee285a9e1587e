#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use loan_default_processor::application::config::ProcessorConfig;
use loan_default_processor::application::processor::DefaultProcessor;
use loan_default_processor::domain::event::{
    ApplicationHistoryEntry, DefaultEvent, DefaultEventType, LoanTransition,
};
use loan_default_processor::domain::loan::{
    Borrower, Installment, InstallmentStatus, Loan, LoanStatus,
};
use loan_default_processor::domain::notice::Notice;
use loan_default_processor::domain::ports::{Clock, LoanStore, Notifier, NotifierRef, SettingsStore};
use loan_default_processor::error::{ProcessorError, Result};
use loan_default_processor::infrastructure::in_memory::InMemoryStore;
use loan_default_processor::infrastructure::lock::ProcessLock;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// 2024-03-10 01:00 in Kuala Lumpur.
pub const SWEEP_TIME: &str = "2024-03-09T17:00:00Z";

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn sweep_time() -> DateTime<Utc> {
    at(SWEEP_TIME)
}

/// A clock tests can move forward.
#[derive(Clone)]
pub struct TestClock(Arc<Mutex<DateTime<Utc>>>);

impl TestClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(now)))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Records every notice and fails for phone numbers listed in `failing`.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notice>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notice> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to_loan(&self, loan_id: &str) -> Vec<Notice> {
        self.sent()
            .into_iter()
            .filter(|n| n.loan_id == loan_id)
            .collect()
    }

    pub fn fail_for(&self, phone: &str) {
        self.failing.lock().unwrap().insert(phone.to_string());
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notice: &Notice) -> Result<String> {
        if self.failing.lock().unwrap().contains(&notice.phone_number) {
            return Err(ProcessorError::NotificationError("gateway rejected".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(notice.clone());
        Ok(format!("wamid.{}", sent.len()))
    }
}

/// Wraps the in-memory store and injects failures.
#[derive(Clone, Default)]
pub struct FaultyStore {
    pub inner: InMemoryStore,
    pub fail_listing: Arc<AtomicBool>,
    pub panic_listing: Arc<AtomicBool>,
    pub fail_settings: Arc<AtomicBool>,
    pub fail_transition_for: Arc<Mutex<HashSet<String>>>,
}

impl FaultyStore {
    fn boom(what: &str) -> ProcessorError {
        ProcessorError::InternalError(format!("simulated {what} failure").into())
    }
}

#[async_trait]
impl LoanStore for FaultyStore {
    async fn store_loan(&self, loan: Loan) -> Result<()> {
        self.inner.store_loan(loan).await
    }
    async fn get_loan(&self, loan_id: &str) -> Result<Option<Loan>> {
        self.inner.get_loan(loan_id).await
    }
    async fn loans_by_status(&self, status: LoanStatus) -> Result<Vec<Loan>> {
        if self.panic_listing.load(Ordering::SeqCst) {
            panic!("simulated listing panic");
        }
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Self::boom("listing"));
        }
        self.inner.loans_by_status(status).await
    }
    async fn store_borrower(&self, borrower: Borrower) -> Result<()> {
        self.inner.store_borrower(borrower).await
    }
    async fn get_borrower(&self, user_id: &str) -> Result<Option<Borrower>> {
        self.inner.get_borrower(user_id).await
    }
    async fn apply_transition(&self, transition: LoanTransition) -> Result<u64> {
        if self
            .fail_transition_for
            .lock()
            .unwrap()
            .contains(transition.loan_id())
        {
            return Err(Self::boom("transition"));
        }
        self.inner.apply_transition(transition).await
    }
    async fn increment_notices(&self, loan_id: &str, cap: u32) -> Result<u32> {
        self.inner.increment_notices(loan_id, cap).await
    }
    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<DefaultEvent>> {
        self.inner.events_since(since).await
    }
    async fn has_event_since(&self, event_type: DefaultEventType, since: DateTime<Utc>) -> Result<bool> {
        self.inner.has_event_since(event_type, since).await
    }
    async fn latest_event(&self) -> Result<Option<DefaultEvent>> {
        self.inner.latest_event().await
    }
    async fn all_events(&self) -> Result<Vec<DefaultEvent>> {
        self.inner.all_events().await
    }
    async fn attach_message_id(&self, event_id: u64, message_id: String) -> Result<()> {
        self.inner.attach_message_id(event_id, message_id).await
    }
    async fn history_for_application(&self, application_id: &str) -> Result<Vec<ApplicationHistoryEntry>> {
        self.inner.history_for_application(application_id).await
    }
}

#[async_trait]
impl SettingsStore for FaultyStore {
    async fn all_settings(&self) -> Result<HashMap<String, String>> {
        if self.fail_settings.load(Ordering::SeqCst) {
            return Err(Self::boom("settings"));
        }
        self.inner.all_settings().await
    }
    async fn put_setting(&self, key: String, value: String) -> Result<()> {
        self.inner.put_setting(key, value).await
    }
}

/// A processor wired to test doubles.
pub struct Harness {
    pub store: FaultyStore,
    pub lock: ProcessLock,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: TestClock,
    pub processor: Arc<DefaultProcessor>,
}

impl Harness {
    pub fn new(now: DateTime<Utc>) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let recording = notifier.clone();
        Self::build(now, notifier, move |_| recording as NotifierRef)
    }

    /// Wires the processor to a notifier built around the harness store.
    /// `notifier` then stays empty.
    pub fn with_notifier(now: DateTime<Utc>, make: impl FnOnce(&FaultyStore) -> NotifierRef) -> Self {
        Self::build(now, Arc::new(RecordingNotifier::default()), make)
    }

    fn build(
        now: DateTime<Utc>,
        notifier: Arc<RecordingNotifier>,
        make: impl FnOnce(&FaultyStore) -> NotifierRef,
    ) -> Self {
        let store = FaultyStore::default();
        let lock = ProcessLock::new();
        let clock = TestClock::new(now);
        let processor = Arc::new(DefaultProcessor::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(lock.clone()),
            make(&store),
            Arc::new(clock.clone()),
            ProcessorConfig::default(),
        ));
        Self {
            store,
            lock,
            notifier,
            clock,
            processor,
        }
    }

    pub async fn add_borrower(&self, id: &str) {
        self.store
            .store_borrower(borrower(id))
            .await
            .unwrap();
    }

    pub async fn add_loan(&self, loan: Loan) {
        if self.store.get_borrower(&loan.user_id).await.unwrap().is_none() {
            self.add_borrower(&loan.user_id).await;
        }
        self.store.store_loan(loan).await.unwrap();
    }

    pub async fn loan(&self, id: &str) -> Loan {
        self.store.get_loan(id).await.unwrap().unwrap()
    }

    pub async fn set(&self, key: &str, value: &str) {
        self.store
            .put_setting(key.to_string(), value.to_string())
            .await
            .unwrap();
    }

    pub async fn events_for(&self, loan_id: &str) -> Vec<DefaultEvent> {
        self.store
            .all_events()
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.loan_id == loan_id)
            .collect()
    }

    pub async fn count_events(&self, loan_id: &str, event_type: DefaultEventType) -> usize {
        self.events_for(loan_id)
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

pub fn borrower(id: &str) -> Borrower {
    Borrower {
        id: id.to_string(),
        full_name: format!("Borrower {id}"),
        phone_number: Some(format!("+6012{:07}", id.len() * 1_000 + id.bytes().map(usize::from).sum::<usize>())),
    }
}

pub fn installment(id: &str, due: DateTime<Utc>) -> Installment {
    Installment {
        id: id.to_string(),
        due_date: due,
        principal_amount: dec!(500.00),
        interest_amount: dec!(25.00),
        amount_paid: Decimal::ZERO,
        late_fee_amount: dec!(10.00),
        late_fees_paid: Decimal::ZERO,
        status: InstallmentStatus::Pending,
    }
}

/// An ACTIVE loan with one unpaid installment `days` overdue at `now`
/// and one installment not yet due.
pub fn overdue_loan(id: &str, now: DateTime<Utc>, days: i64) -> Loan {
    let due = now - Duration::days(days);
    Loan {
        id: id.to_string(),
        user_id: format!("user-{id}"),
        application_id: format!("app-{id}"),
        status: LoanStatus::Active,
        default_risk_flagged_at: None,
        defaulted_at: None,
        default_notices_sent: 0,
        installments: vec![
            installment(&format!("{id}-1"), due),
            installment(&format!("{id}-2"), now + Duration::days(30)),
        ],
    }
}

/// Marks every installment of the loan as fully settled.
pub fn settle(loan: &mut Loan) {
    for i in &mut loan.installments {
        i.amount_paid = i.principal_amount + i.interest_amount;
        i.late_fees_paid = i.late_fee_amount;
        i.status = InstallmentStatus::Paid;
    }
}

/// Random ACTIVE loans overdue between 0 and 60 days, some partially paid.
pub fn random_portfolio(size: usize, now: DateTime<Utc>) -> Vec<Loan> {
    let mut rng = rand::thread_rng();
    (0..size)
        .map(|n| {
            let days = rng.gen_range(0..=60);
            let mut loan = overdue_loan(&format!("R{n}"), now, days);
            if rng.gen_bool(0.3) {
                let paid = Decimal::from(rng.gen_range(0..=525));
                loan.installments[0].amount_paid = paid;
                loan.installments[0].status = InstallmentStatus::Partial;
            }
            loan
        })
        .collect()
}

/// Writes a portfolio JSON document for CLI tests.
pub fn portfolio_json(loans: &[Loan], settings: &[(&str, &str)]) -> String {
    let borrowers: Vec<Borrower> = loans.iter().map(|l| borrower(&l.user_id)).collect();
    let settings: HashMap<&str, &str> = settings.iter().copied().collect();
    serde_json::json!({
        "borrowers": borrowers,
        "loans": loans,
        "settings": settings,
    })
    .to_string()
}
