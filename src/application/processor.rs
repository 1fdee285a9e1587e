use super::config::ProcessorConfig;
use super::exclusive::run_exclusive;
use super::report::{
    MSG_ALREADY_PROCESSED, MSG_DISABLED, MSG_LOCK_BUSY, MSG_NOTIFY_LOCK_BUSY, NotificationResult,
    ProcessingResult, ProcessingStatus,
};
use crate::domain::event::{DefaultEvent, DefaultEventType, LifecycleChange, LoanTransition, NewDefaultEvent};
use crate::domain::lifecycle::{RemedyAction, SweepContext};
use crate::domain::loan::{Arrears, Loan, LoanStatus};
use crate::domain::notice::{Notice, NoticeKind};
use crate::domain::ports::{BatchLockRef, ClockRef, LoanStoreRef, NotifierRef, SettingsStoreRef};
use crate::domain::settings::ProcessorSettings;
use crate::error::{ProcessorError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Drives loans through the default lifecycle.
///
/// The processor owns its collaborators and reads thresholds from the
/// settings store on every run. Runs are serialized through the batch lock:
/// a second trigger while one is in flight returns immediately.
pub struct DefaultProcessor {
    loans: LoanStoreRef,
    settings: SettingsStoreRef,
    lock: BatchLockRef,
    notifier: NotifierRef,
    clock: ClockRef,
    config: ProcessorConfig,
}

impl DefaultProcessor {
    pub fn new(
        loans: LoanStoreRef,
        settings: SettingsStoreRef,
        lock: BatchLockRef,
        notifier: NotifierRef,
        clock: ClockRef,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            loans,
            settings,
            lock,
            notifier,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Runs one default sweep.
    ///
    /// Without `force`, steps whose event type was already logged today are
    /// skipped. The remedy step always runs.
    #[instrument(skip(self))]
    pub async fn process_defaults(&self, force: bool) -> ProcessingResult {
        let timer = Instant::now();
        let now = self.clock.now();
        let mut result = ProcessingResult::new(now, force);

        let sweep = self.run_sweep(now, force, &mut result);
        let outcome = run_exclusive(self.lock.as_ref(), self.config.lock_key, sweep).await;

        match outcome {
            Ok(None) => {
                warn!("default sweep requested while another is running");
                result.message = Some(MSG_LOCK_BUSY.to_string());
                return result.finish(timer);
            }
            Ok(Some(true)) => result.success = true,
            Ok(Some(false)) => result.message = Some(MSG_DISABLED.to_string()),
            Err(e) => {
                error!(error = %e, "default sweep aborted");
                result.error_message = Some(e.to_string());
            }
        }

        let result = result.finish(timer);
        info!(
            success = result.success,
            risk_flagged = result.risk_flagged,
            reminders_sent = result.reminders_sent,
            remedy_cured = result.remedy_cured,
            defaulted = result.defaulted,
            recovered = result.recovered,
            loan_errors = result.loan_errors,
            duration_ms = result.duration_ms,
            "default sweep finished"
        );
        result
    }

    /// Returns `Ok(false)` when processing is disabled in settings.
    async fn run_sweep(
        &self,
        now: DateTime<Utc>,
        force: bool,
        result: &mut ProcessingResult,
    ) -> Result<bool> {
        let settings = self.load_settings().await;
        if !settings.enabled {
            info!("default processing disabled in settings");
            return Ok(false);
        }

        let start_of_day = self.config.business_clock.start_of_day(now);
        let mut done_today = HashSet::new();
        if !force {
            for event_type in DefaultEventType::DAILY {
                if self.loans.has_event_since(event_type, start_of_day).await? {
                    done_today.insert(event_type);
                }
            }
        }
        if done_today.len() == DefaultEventType::DAILY.len() {
            info!("all daily default steps already ran today");
            result.message = Some(MSG_ALREADY_PROCESSED.to_string());
        }

        let ctx = self.sweep_context(now, &settings);

        if done_today.contains(&DefaultEventType::RiskFlagged) {
            result.skipped_steps.push("risk_flagging".to_string());
        } else {
            self.flag_at_risk_loans(&ctx, result).await?;
        }

        self.process_remedy_period(&ctx, start_of_day, result).await?;

        if done_today.contains(&DefaultEventType::Defaulted) {
            result.skipped_steps.push("default_transition".to_string());
        } else {
            self.transition_to_default(&ctx, result).await?;
        }

        if done_today.contains(&DefaultEventType::Recovered) {
            result.skipped_steps.push("recovery".to_string());
        } else {
            self.recover_loans(&ctx, result).await?;
        }

        Ok(true)
    }

    fn sweep_context<'a>(
        &'a self,
        now: DateTime<Utc>,
        settings: &'a ProcessorSettings,
    ) -> SweepContext<'a> {
        SweepContext::new(
            now,
            self.config.business_clock,
            settings,
            &self.config.reminder_days,
            self.config.max_notices,
        )
    }

    async fn load_settings(&self) -> ProcessorSettings {
        match self.settings.all_settings().await {
            Ok(values) => ProcessorSettings::from_map(&values),
            Err(e) => {
                warn!(error = %e, "settings store unavailable, using defaults");
                ProcessorSettings::default()
            }
        }
    }

    async fn flag_at_risk_loans(
        &self,
        ctx: &SweepContext<'_>,
        result: &mut ProcessingResult,
    ) -> Result<()> {
        let candidates = self.loans.loans_by_status(LoanStatus::Active).await?;
        for loan in candidates {
            let arrears = loan.arrears(ctx.now);
            if !ctx.needs_risk_flag(&loan, &arrears) {
                continue;
            }
            match self.flag_loan(ctx, &loan, &arrears).await {
                Ok(()) => result.risk_flagged += 1,
                Err(e @ ProcessorError::TransitionConflict { .. }) => skip_changed_loan(&e),
                Err(e) => {
                    error!(loan_id = %loan.id, error = %e, "failed to flag loan at risk");
                    result.loan_errors += 1;
                }
            }
        }
        Ok(())
    }

    async fn flag_loan(&self, ctx: &SweepContext<'_>, loan: &Loan, arrears: &Arrears) -> Result<()> {
        let days_overdue = ctx.days_overdue(arrears);
        let note = format!(
            "Loan flagged as default risk: {} days overdue, outstanding RM {} (late fees RM {}). Remedy period of {} days started.",
            days_overdue,
            arrears.principal_interest,
            arrears.late_fees,
            ctx.settings.remedy_days
        );
        self.apply(ctx, &loan.id, LifecycleChange::FlagRisk, arrears, None, note)
            .await?;
        debug!(days_overdue, "loan flagged at risk");
        Ok(())
    }

    async fn process_remedy_period(
        &self,
        ctx: &SweepContext<'_>,
        start_of_day: DateTime<Utc>,
        result: &mut ProcessingResult,
    ) -> Result<()> {
        let reminded_today: HashSet<String> = self
            .loans
            .events_since(start_of_day)
            .await?
            .into_iter()
            .filter(|e| e.event_type == DefaultEventType::NoticeSent)
            .map(|e| e.loan_id)
            .collect();

        let candidates = self.loans.loans_by_status(LoanStatus::Active).await?;
        for loan in candidates.into_iter().filter(Loan::is_at_risk) {
            let arrears = loan.arrears(ctx.now);
            let loan_id = loan.id.clone();
            let outcome = match ctx.remedy_action(&loan, &arrears) {
                RemedyAction::Wait => continue,
                RemedyAction::Cure => self.cure_loan(ctx, &loan, &arrears).await.map(|()| {
                    result.remedy_cured += 1;
                }),
                RemedyAction::Remind { day } => {
                    if reminded_today.contains(&loan_id) {
                        debug!(loan_id = %loan_id, day, "reminder already sent today");
                        continue;
                    }
                    if !ctx.settings.sends_reminder() {
                        debug!(loan_id = %loan_id, day, "reminders disabled, skipping");
                        continue;
                    }
                    self.send_reminder(ctx, &loan, &arrears, day, result).await
                }
            };
            match outcome {
                Ok(()) => {}
                Err(e @ ProcessorError::TransitionConflict { .. }) => skip_changed_loan(&e),
                Err(e) => {
                    error!(loan_id = %loan_id, error = %e, "failed to process remedy period");
                    result.loan_errors += 1;
                }
            }
        }
        Ok(())
    }

    async fn cure_loan(&self, ctx: &SweepContext<'_>, loan: &Loan, arrears: &Arrears) -> Result<()> {
        let note = "Arrears cleared during remedy period; default risk flag removed.".to_string();
        self.apply(ctx, &loan.id, LifecycleChange::Cure, arrears, None, note)
            .await?;
        Ok(())
    }

    async fn send_reminder(
        &self,
        ctx: &SweepContext<'_>,
        loan: &Loan,
        arrears: &Arrears,
        day: u32,
        result: &mut ProcessingResult,
    ) -> Result<()> {
        let notice = match self
            .build_notice(ctx, loan, NoticeKind::RemedyReminder { day }, arrears)
            .await
        {
            Ok(notice) => notice,
            Err(e) => {
                warn!(loan_id = %loan.id, error = %e, "cannot build remedy reminder");
                result.notifications_failed += 1;
                return Ok(());
            }
        };

        let message_id = match self.notifier.send(&notice).await {
            Ok(id) => id,
            Err(e) => {
                warn!(loan_id = %loan.id, error = %e, "remedy reminder not delivered");
                result.notifications_failed += 1;
                return Ok(());
            }
        };
        result.notifications_sent += 1;

        let change = LifecycleChange::RecordNotice {
            cap: ctx.max_notices,
        };
        let note = format!(
            "Remedy period reminder sent on day {} ({} of {} notices).",
            day,
            (loan.default_notices_sent + 1).min(ctx.max_notices),
            ctx.max_notices
        );
        self.apply(ctx, &loan.id, change, arrears, Some(message_id), note)
            .await?;
        result.reminders_sent += 1;
        Ok(())
    }

    async fn transition_to_default(
        &self,
        ctx: &SweepContext<'_>,
        result: &mut ProcessingResult,
    ) -> Result<()> {
        let candidates = self.loans.loans_by_status(LoanStatus::Active).await?;
        for loan in candidates {
            let arrears = loan.arrears(ctx.now);
            if !ctx.needs_default(&loan, &arrears) {
                continue;
            }
            match self.default_loan(ctx, &loan, &arrears).await {
                Ok(()) => result.defaulted += 1,
                Err(e @ ProcessorError::TransitionConflict { .. }) => skip_changed_loan(&e),
                Err(e) => {
                    error!(loan_id = %loan.id, error = %e, "failed to default loan");
                    result.loan_errors += 1;
                }
            }
        }
        Ok(())
    }

    async fn default_loan(&self, ctx: &SweepContext<'_>, loan: &Loan, arrears: &Arrears) -> Result<()> {
        let note = if loan.default_risk_flagged_at.is_some() {
            format!(
                "Remedy period expired with RM {} outstanding; loan moved to DEFAULT.",
                arrears.total()
            )
        } else {
            format!(
                "Loan moved directly to DEFAULT: {} days overdue with RM {} outstanding.",
                ctx.days_overdue(arrears),
                arrears.total()
            )
        };
        self.apply(ctx, &loan.id, LifecycleChange::Default, arrears, None, note)
            .await?;
        Ok(())
    }

    async fn recover_loans(&self, ctx: &SweepContext<'_>, result: &mut ProcessingResult) -> Result<()> {
        let candidates = self.loans.loans_by_status(LoanStatus::Default).await?;
        for loan in candidates {
            let arrears = loan.arrears(ctx.now);
            if !ctx.needs_recovery(&loan, &arrears) {
                continue;
            }
            let note = "Arrears fully repaid; loan restored to ACTIVE.".to_string();
            match self
                .apply(ctx, &loan.id, LifecycleChange::Recover, &arrears, None, note)
                .await
            {
                Ok(_) => result.recovered += 1,
                Err(e @ ProcessorError::TransitionConflict { .. }) => skip_changed_loan(&e),
                Err(e) => {
                    error!(loan_id = %loan.id, error = %e, "failed to recover loan");
                    result.loan_errors += 1;
                }
            }
        }
        Ok(())
    }

    async fn apply(
        &self,
        ctx: &SweepContext<'_>,
        loan_id: &str,
        change: LifecycleChange,
        arrears: &Arrears,
        message_id: Option<String>,
        note: String,
    ) -> Result<u64> {
        let event_type = match change {
            LifecycleChange::FlagRisk => DefaultEventType::RiskFlagged,
            LifecycleChange::RecordNotice { .. } => DefaultEventType::NoticeSent,
            LifecycleChange::Default => DefaultEventType::Defaulted,
            LifecycleChange::Cure | LifecycleChange::Recover => DefaultEventType::Recovered,
        };
        let event = NewDefaultEvent {
            loan_id: loan_id.to_string(),
            event_type,
            days_overdue: ctx.days_overdue(arrears),
            outstanding_amount: arrears.principal_interest,
            outstanding_late_fees: arrears.late_fees,
            message_id,
            note: note.clone(),
            processed_at: ctx.now,
        };
        let event_id = self
            .loans
            .apply_transition(LoanTransition {
                change,
                event,
                history_note: note,
            })
            .await?;
        info!(loan_id = %loan_id, event = %event_type, event_id, "default lifecycle transition recorded");
        Ok(event_id)
    }

    async fn build_notice(
        &self,
        ctx: &SweepContext<'_>,
        loan: &Loan,
        kind: NoticeKind,
        arrears: &Arrears,
    ) -> Result<Notice> {
        let borrower = self.loans.get_borrower(&loan.user_id).await?.ok_or_else(|| {
            ProcessorError::NotificationError(format!("no borrower record for user {}", loan.user_id))
        })?;
        let phone_number = borrower
            .phone_number
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                ProcessorError::NotificationError(format!("borrower {} has no phone number", borrower.id))
            })?;

        Ok(Notice {
            kind,
            loan_id: loan.id.clone(),
            recipient_name: borrower.full_name,
            phone_number,
            outstanding_amount: arrears.principal_interest,
            outstanding_late_fees: arrears.late_fees,
            days_overdue: ctx.days_overdue(arrears),
            remedy_deadline: match kind {
                NoticeKind::FinalDefault => None,
                _ => ctx.remedy_deadline(loan),
            },
        })
    }

    /// Sends the risk-flag and final-default notices held back by the
    /// overnight sweep.
    ///
    /// Picks up RISK_FLAGGED and DEFAULTED events logged since the start of
    /// the previous business day that carry no message id, and back-fills
    /// the id once delivered.
    #[instrument(skip(self))]
    pub async fn process_default_notifications(&self) -> NotificationResult {
        let timer = Instant::now();
        let mut result = NotificationResult::new();

        let pass = self.dispatch_pending_notices(&mut result);
        let outcome = run_exclusive(self.lock.as_ref(), self.config.notification_lock_key, pass).await;

        match outcome {
            Ok(None) => {
                warn!("notification pass requested while another is running");
                result.message = Some(MSG_NOTIFY_LOCK_BUSY.to_string());
                return result.finish(timer);
            }
            Ok(Some(())) => result.success = true,
            Err(e) => {
                error!(error = %e, "notification pass aborted");
                result.error_message = Some(e.to_string());
            }
        }

        let result = result.finish(timer);
        info!(
            success = result.success,
            risk_notices_sent = result.risk_notices_sent,
            final_notices_sent = result.final_notices_sent,
            skipped = result.skipped,
            failed = result.failed,
            duration_ms = result.duration_ms,
            "notification pass finished"
        );
        result
    }

    async fn dispatch_pending_notices(&self, result: &mut NotificationResult) -> Result<()> {
        let now = self.clock.now();
        let settings = self.load_settings().await;
        let ctx = self.sweep_context(now, &settings);
        let window_start = self.config.business_clock.start_of_yesterday(now);

        let pending: Vec<DefaultEvent> = self
            .loans
            .events_since(window_start)
            .await?
            .into_iter()
            .filter(|e| {
                matches!(
                    e.event_type,
                    DefaultEventType::RiskFlagged | DefaultEventType::Defaulted
                ) && e.message_id.is_none()
            })
            .collect();

        for event in pending {
            match self.dispatch_one(&ctx, &event).await {
                Ok(Some(kind)) => match kind {
                    NoticeKind::FinalDefault => result.final_notices_sent += 1,
                    _ => result.risk_notices_sent += 1,
                },
                Ok(None) => result.skipped += 1,
                Err(e) => {
                    warn!(loan_id = %event.loan_id, event_id = event.id, error = %e, "deferred notice not delivered");
                    result.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Returns the kind of notice sent, or `None` when the event no longer
    /// warrants one.
    async fn dispatch_one(
        &self,
        ctx: &SweepContext<'_>,
        event: &DefaultEvent,
    ) -> Result<Option<NoticeKind>> {
        let Some(loan) = self.loans.get_loan(&event.loan_id).await? else {
            return Ok(None);
        };

        let kind = match event.event_type {
            DefaultEventType::RiskFlagged if loan.is_at_risk() && ctx.settings.sends_risk_notice() => {
                NoticeKind::RiskFlagged
            }
            DefaultEventType::Defaulted
                if loan.status == LoanStatus::Default && ctx.settings.sends_final_notice() =>
            {
                NoticeKind::FinalDefault
            }
            _ => {
                debug!(loan_id = %loan.id, event_id = event.id, "deferred notice no longer applicable");
                return Ok(None);
            }
        };

        let arrears = loan.arrears(ctx.now);
        let notice = self.build_notice(ctx, &loan, kind, &arrears).await?;
        let message_id = self.notifier.send(&notice).await?;
        self.loans.attach_message_id(event.id, message_id).await?;
        if kind == NoticeKind::RiskFlagged {
            self.loans
                .increment_notices(&loan.id, ctx.max_notices)
                .await?;
        }
        Ok(Some(kind))
    }

    /// Aggregates the figures shown on the admin dashboard.
    pub async fn default_processing_status(&self) -> Result<ProcessingStatus> {
        let now = self.clock.now();
        let start_of_day = self.config.business_clock.start_of_day(now);

        let last_event = self.loans.latest_event().await?;
        let processed_today = self.loans.events_since(start_of_day).await?.len();
        let defaulted_loans = self.loans.loans_by_status(LoanStatus::Default).await?.len();
        let at_risk_loans = self
            .loans
            .loans_by_status(LoanStatus::Active)
            .await?
            .iter()
            .filter(|loan| loan.is_at_risk())
            .count();

        Ok(ProcessingStatus {
            last_event,
            processed_today,
            defaulted_loans,
            at_risk_loans,
            settings: self.load_settings().await,
        })
    }
}

/// A loan repaid or otherwise changed after the sweep read it no longer
/// qualifies; the next sweep re-evaluates it.
fn skip_changed_loan(e: &ProcessorError) {
    info!(error = %e, "loan changed during sweep, transition skipped");
}
