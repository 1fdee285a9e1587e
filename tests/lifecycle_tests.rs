mod common;

use async_trait::async_trait;
use chrono::Duration;
use common::{FaultyStore, Harness, overdue_loan, settle, sweep_time};
use loan_default_processor::application::config::MAX_DEFAULT_NOTICES;
use loan_default_processor::domain::event::DefaultEventType;
use loan_default_processor::domain::loan::{InstallmentStatus, LoanStatus};
use loan_default_processor::domain::money::Money;
use loan_default_processor::domain::notice::{Notice, NoticeKind};
use loan_default_processor::domain::ports::{LoanStore, Notifier};
use loan_default_processor::error::Result;
use rust_decimal_macros::dec;
use std::sync::Arc;

/// A borrower who pays off the whole loan while the reminder is in flight.
struct RepayDuringSend {
    store: FaultyStore,
}

#[async_trait]
impl Notifier for RepayDuringSend {
    async fn send(&self, notice: &Notice) -> Result<String> {
        if let Some(mut loan) = self.store.get_loan(&notice.loan_id).await? {
            settle(&mut loan);
            self.store.store_loan(loan).await?;
        }
        Ok("wamid.repaid".to_string())
    }
}

#[tokio::test]
async fn test_loan_past_risk_threshold_is_flagged() {
    let now = sweep_time();
    let h = Harness::new(now);
    h.add_loan(overdue_loan("L1", now, 30)).await;
    h.add_loan(overdue_loan("L2", now, 10)).await;

    let result = h.processor.process_defaults(false).await;
    assert!(result.success);
    assert_eq!(result.risk_flagged, 1);
    assert_eq!(result.defaulted, 0);
    // Risk notices are deferred to the notification pass.
    assert_eq!(result.notifications_sent, 0);
    assert!(h.notifier.sent().is_empty());

    let loan = h.loan("L1").await;
    assert_eq!(loan.status, LoanStatus::Active);
    assert_eq!(loan.default_risk_flagged_at, Some(now));
    assert_eq!(loan.default_notices_sent, 0);
    assert_eq!(h.loan("L2").await.default_risk_flagged_at, None);

    let events = h.events_for("L1").await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.event_type, DefaultEventType::RiskFlagged);
    assert_eq!(event.days_overdue, 30);
    assert_eq!(event.outstanding_amount, Money::new(dec!(525.00)));
    assert_eq!(event.outstanding_late_fees, Money::new(dec!(10.00)));
    assert_eq!(event.message_id, None);
    assert_eq!(event.processed_at, now);

    let history = h.store.history_for_application("app-L1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].loan_id, "L1");
    assert!(history[0].note.contains("30 days overdue"));
}

#[tokio::test]
async fn test_risk_threshold_follows_settings() {
    let now = sweep_time();
    let h = Harness::new(now);
    h.set("default_risk_days", "35").await;
    h.add_loan(overdue_loan("L1", now, 30)).await;
    h.add_loan(overdue_loan("L2", now, 36)).await;

    let result = h.processor.process_defaults(false).await;
    assert_eq!(result.risk_flagged, 1);
    assert!(h.loan("L1").await.default_risk_flagged_at.is_none());
    assert!(h.loan("L2").await.default_risk_flagged_at.is_some());
}

#[tokio::test]
async fn test_expired_remedy_period_moves_loan_to_default() {
    let now = sweep_time();
    let h = Harness::new(now);
    let flagged_at = now - Duration::days(15);
    let mut loan = overdue_loan("L1", now, 40);
    loan.flag_risk(flagged_at);
    loan.default_notices_sent = MAX_DEFAULT_NOTICES;
    h.add_loan(loan).await;

    let result = h.processor.process_defaults(false).await;
    assert!(result.success);
    assert_eq!(result.defaulted, 1);
    assert_eq!(result.risk_flagged, 0);

    let loan = h.loan("L1").await;
    assert_eq!(loan.status, LoanStatus::Default);
    assert_eq!(loan.defaulted_at, Some(now));
    assert_eq!(loan.default_risk_flagged_at, Some(flagged_at));
    assert_eq!(h.count_events("L1", DefaultEventType::Defaulted).await, 1);
}

#[tokio::test]
async fn test_flagged_loan_within_remedy_period_stays_active() {
    let now = sweep_time();
    let h = Harness::new(now);
    let mut loan = overdue_loan("L1", now, 33);
    loan.flag_risk(now - Duration::days(5));
    h.add_loan(loan).await;

    let result = h.processor.process_defaults(false).await;
    assert_eq!(result.transitions(), 0);
    assert_eq!(h.loan("L1").await.status, LoanStatus::Active);
    assert!(h.events_for("L1").await.is_empty());
}

#[tokio::test]
async fn test_long_overdue_loan_defaults_in_one_sweep() {
    let now = sweep_time();
    let h = Harness::new(now);
    h.add_loan(overdue_loan("L1", now, 50)).await;

    let result = h.processor.process_defaults(false).await;
    assert_eq!(result.risk_flagged, 1);
    assert_eq!(result.defaulted, 1);

    let loan = h.loan("L1").await;
    assert_eq!(loan.status, LoanStatus::Default);
    assert_eq!(loan.default_risk_flagged_at, Some(now));
    assert_eq!(loan.defaulted_at, Some(now));

    let kinds: Vec<_> = h.events_for("L1").await.iter().map(|e| e.event_type).collect();
    assert_eq!(kinds, vec![DefaultEventType::RiskFlagged, DefaultEventType::Defaulted]);
}

#[tokio::test]
async fn test_repaid_defaulted_loan_recovers() {
    let now = sweep_time();
    let h = Harness::new(now);
    let mut loan = overdue_loan("L1", now, 60);
    loan.mark_defaulted(now - Duration::days(10));
    settle(&mut loan);
    h.add_loan(loan).await;

    let result = h.processor.process_defaults(false).await;
    assert!(result.success);
    assert_eq!(result.recovered, 1);

    let loan = h.loan("L1").await;
    assert_eq!(loan.status, LoanStatus::Active);
    assert_eq!(loan.default_risk_flagged_at, None);
    assert_eq!(loan.defaulted_at, None);
    assert_eq!(loan.default_notices_sent, 0);

    let events = h.events_for("L1").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, DefaultEventType::Recovered);
    assert!(events[0].outstanding_amount.is_zero());
}

#[tokio::test]
async fn test_defaulted_loan_with_late_fees_owed_does_not_recover() {
    let now = sweep_time();
    let h = Harness::new(now);
    let mut loan = overdue_loan("L1", now, 60);
    loan.mark_defaulted(now - Duration::days(10));
    settle(&mut loan);
    loan.installments[0].late_fees_paid = dec!(4.00);
    loan.installments[0].status = InstallmentStatus::Partial;
    h.add_loan(loan).await;

    let result = h.processor.process_defaults(false).await;
    assert_eq!(result.recovered, 0);
    assert_eq!(h.loan("L1").await.status, LoanStatus::Default);
}

#[tokio::test]
async fn test_arrears_cleared_during_remedy_period_cures_loan() {
    let now = sweep_time();
    let h = Harness::new(now);
    let mut loan = overdue_loan("L1", now, 35);
    loan.flag_risk(now - Duration::days(5));
    loan.default_notices_sent = 1;
    settle(&mut loan);
    h.add_loan(loan).await;

    let result = h.processor.process_defaults(false).await;
    assert_eq!(result.remedy_cured, 1);

    let loan = h.loan("L1").await;
    assert_eq!(loan.default_risk_flagged_at, None);
    assert_eq!(loan.default_notices_sent, 0);
    assert_eq!(h.count_events("L1", DefaultEventType::Recovered).await, 1);
}

#[tokio::test]
async fn test_remedy_reminders_follow_schedule_and_cap() {
    let now = sweep_time();
    let h = Harness::new(now);
    let mut loan = overdue_loan("L1", now, 35);
    loan.flag_risk(now - Duration::days(7));
    loan.default_notices_sent = 1;
    h.add_loan(loan).await;

    let result = h.processor.process_defaults(false).await;
    assert_eq!(result.reminders_sent, 1);
    assert_eq!(result.notifications_sent, 1);
    assert_eq!(h.loan("L1").await.default_notices_sent, 2);

    let sent = h.notifier.sent_to_loan("L1");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NoticeKind::RemedyReminder { day: 7 });
    assert_eq!(sent[0].days_overdue, 35);
    assert_eq!(
        sent[0].remedy_deadline,
        chrono::NaiveDate::from_ymd_opt(2024, 3, 17)
    );

    let reminders = h.events_for("L1").await;
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].event_type, DefaultEventType::NoticeSent);
    assert_eq!(reminders[0].message_id.as_deref(), Some("wamid.1"));

    // A forced rerun on the same day must not repeat the reminder.
    let rerun = h.processor.process_defaults(true).await;
    assert_eq!(rerun.reminders_sent, 0);
    assert_eq!(h.notifier.sent_to_loan("L1").len(), 1);

    // Nothing between the scheduled days.
    h.clock.advance(Duration::days(2));
    assert_eq!(h.processor.process_defaults(false).await.reminders_sent, 0);

    h.clock.advance(Duration::days(3));
    let day_twelve = h.processor.process_defaults(false).await;
    assert_eq!(day_twelve.reminders_sent, 1);
    assert_eq!(h.loan("L1").await.default_notices_sent, MAX_DEFAULT_NOTICES);
    assert_eq!(
        h.notifier.sent_to_loan("L1")[1].kind,
        NoticeKind::RemedyReminder { day: 12 }
    );
}

#[tokio::test]
async fn test_repayment_during_reminder_is_not_overwritten() {
    let now = sweep_time();
    let h = Harness::with_notifier(now, |store| {
        Arc::new(RepayDuringSend {
            store: store.clone(),
        })
    });
    let mut loan = overdue_loan("L1", now, 35);
    loan.flag_risk(now - Duration::days(7));
    loan.default_notices_sent = 1;
    h.add_loan(loan).await;

    let result = h.processor.process_defaults(false).await;
    assert!(result.success);
    assert_eq!(result.reminders_sent, 1);
    assert_eq!(result.loan_errors, 0);
    assert_eq!(result.defaulted, 0);

    let loan = h.loan("L1").await;
    assert!(
        loan.installments
            .iter()
            .all(|i| i.status == InstallmentStatus::Paid)
    );
    assert!(loan.arrears(now).is_cleared());
    assert_eq!(loan.default_notices_sent, 2);
    assert!(loan.is_at_risk());
    let events = h.events_for("L1").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message_id.as_deref(), Some("wamid.repaid"));

    // The next sweep sees the repayment and lifts the flag.
    h.clock.advance(Duration::days(1));
    let next = h.processor.process_defaults(false).await;
    assert_eq!(next.remedy_cured, 1);
    let loan = h.loan("L1").await;
    assert!(!loan.is_at_risk());
    assert!(loan.arrears(now).is_cleared());
}

#[tokio::test]
async fn test_reminder_not_sent_once_notice_cap_reached() {
    let now = sweep_time();
    let h = Harness::new(now);
    let mut loan = overdue_loan("L1", now, 40);
    loan.flag_risk(now - Duration::days(12));
    loan.default_notices_sent = MAX_DEFAULT_NOTICES;
    h.add_loan(loan).await;

    let result = h.processor.process_defaults(false).await;
    assert_eq!(result.reminders_sent, 0);
    assert!(h.notifier.sent().is_empty());
    assert_eq!(h.loan("L1").await.default_notices_sent, MAX_DEFAULT_NOTICES);
}

#[tokio::test]
async fn test_reminder_toggle_disables_reminders() {
    let now = sweep_time();
    let h = Harness::new(now);
    h.set("whatsapp_default_reminder_enabled", "false").await;
    let mut loan = overdue_loan("L1", now, 35);
    loan.flag_risk(now - Duration::days(7));
    h.add_loan(loan).await;

    let result = h.processor.process_defaults(false).await;
    assert!(result.success);
    assert_eq!(result.reminders_sent, 0);
    assert!(h.notifier.sent().is_empty());
    assert!(h.events_for("L1").await.is_empty());
}

#[tokio::test]
async fn test_failed_reminder_is_counted_without_event() {
    let now = sweep_time();
    let h = Harness::new(now);
    let mut loan = overdue_loan("L1", now, 35);
    loan.flag_risk(now - Duration::days(7));
    let phone = common::borrower(&loan.user_id).phone_number.unwrap();
    h.add_loan(loan).await;
    h.notifier.fail_for(&phone);

    let result = h.processor.process_defaults(false).await;
    assert!(result.success);
    assert_eq!(result.reminders_sent, 0);
    assert_eq!(result.notifications_failed, 1);
    assert!(h.events_for("L1").await.is_empty());
    assert_eq!(h.loan("L1").await.default_notices_sent, 0);
}

#[tokio::test]
async fn test_closed_loans_are_ignored() {
    let now = sweep_time();
    let h = Harness::new(now);
    let mut completed = overdue_loan("L1", now, 60);
    completed.status = LoanStatus::Completed;
    let mut cancelled = overdue_loan("L2", now, 60);
    cancelled.status = LoanStatus::Cancelled;
    h.add_loan(completed).await;
    h.add_loan(cancelled).await;

    let result = h.processor.process_defaults(false).await;
    assert!(result.success);
    assert_eq!(result.transitions(), 0);
    assert!(h.store.all_events().await.unwrap().is_empty());
}
