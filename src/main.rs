use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use loan_default_processor::application::config::ProcessorConfig;
use loan_default_processor::application::exclusive::run_exclusive;
use loan_default_processor::application::processor::DefaultProcessor;
use loan_default_processor::application::report::{NotificationResult, ProcessingResult};
use loan_default_processor::application::scheduler::{DailySchedule, Job, run_daemon, run_job};
use loan_default_processor::domain::calendar::BusinessClock;
use loan_default_processor::domain::ports::{
    BatchLockRef, ClockRef, FixedClock, LoanStore, LoanStoreRef, NotifierRef, SettingsStore,
    SettingsStoreRef, SystemClock,
};
use loan_default_processor::domain::settings::ProcessorSettings;
use loan_default_processor::error::ProcessorError;
use loan_default_processor::infrastructure::in_memory::InMemoryStore;
use loan_default_processor::infrastructure::lock::ProcessLock;
use loan_default_processor::infrastructure::log_notifier::LogNotifier;
use loan_default_processor::infrastructure::whatsapp::WhatsAppNotifier;
use loan_default_processor::interfaces::csv::event_writer::EventWriter;
use loan_default_processor::interfaces::json::portfolio_reader::Portfolio;
use loan_default_processor::telemetry;
use miette::{IntoDiagnostic, Result, miette};
use serde::Serialize;
use std::fs::File;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Portfolio JSON (borrowers, loans, settings) loaded before the command runs
    #[arg(long, global = true)]
    portfolio: Option<PathBuf>,

    /// Override the current time (RFC 3339), e.g. to replay a missed run
    #[arg(long, global = true)]
    now: Option<DateTime<Utc>>,

    /// Business timezone offset from UTC, in hours
    #[arg(long, global = true, env = "BUSINESS_UTC_OFFSET_HOURS", default_value_t = 8, allow_negative_numbers = true)]
    utc_offset_hours: i32,

    /// Messaging gateway endpoint; notices are only logged when unset
    #[arg(long, global = true, env = "WHATSAPP_API_URL")]
    whatsapp_url: Option<String>,

    /// Bearer token for the messaging gateway
    #[arg(long, global = true, env = "WHATSAPP_API_TOKEN", hide_env_values = true)]
    whatsapp_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the default sweep once
    Run {
        /// Ignore the once-per-day guard
        #[arg(long)]
        force: bool,
    },
    /// Send risk-flag and final-default notices held back by the sweep
    Notify,
    /// Show the dashboard status summary
    Status,
    /// Show the effective processor settings
    Settings,
    /// Export the default event log as CSV
    Events,
    /// Show the history trail of one loan application
    History { application_id: String },
    /// Load a portfolio file into the store
    Import { file: PathBuf },
    /// Run the sweep and notification pass daily at fixed local hours
    Daemon {
        #[arg(long, default_value_t = 1)]
        sweep_hour: u32,
        #[arg(long, default_value_t = 10)]
        notify_hour: u32,
    },
}

type Stores = (LoanStoreRef, SettingsStoreRef);

fn in_memory_stores(memory: &InMemoryStore) -> Stores {
    (Arc::new(memory.clone()), Arc::new(memory.clone()))
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(
    db_path: Option<&Path>,
    memory: &InMemoryStore,
) -> loan_default_processor::error::Result<Stores> {
    use loan_default_processor::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(path)?;
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => Ok(in_memory_stores(memory)),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(
    _db_path: Option<&Path>,
    memory: &InMemoryStore,
) -> loan_default_processor::error::Result<Stores> {
    Ok(in_memory_stores(memory))
}

/// Instances sharing a database serialize through lock files next to it.
#[cfg(feature = "storage-rocksdb")]
fn instance_lock(db_path: Option<&Path>) -> BatchLockRef {
    use loan_default_processor::infrastructure::file_lock::FileLock;

    match db_path {
        Some(path) => Arc::new(FileLock::for_database(path)),
        None => Arc::new(ProcessLock::new()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn instance_lock(db_path: Option<&Path>) -> BatchLockRef {
    if db_path.is_some() {
        warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
        );
    }
    Arc::new(ProcessLock::new())
}

/// Everything a command needs to open stores and build a processor.
///
/// A persistent database is opened per command or scheduled job, inside the
/// instance lock, and closed again afterwards.
struct Runtime {
    db_path: Option<PathBuf>,
    memory: InMemoryStore,
    instance_lock: BatchLockRef,
    notifier: NotifierRef,
    clock: ClockRef,
    config: ProcessorConfig,
}

impl Runtime {
    fn stores(&self) -> loan_default_processor::error::Result<Stores> {
        open_stores(self.db_path.as_deref(), &self.memory)
    }

    fn processor(&self) -> loan_default_processor::error::Result<DefaultProcessor> {
        let (loans, settings) = self.stores()?;
        Ok(DefaultProcessor::new(
            loans,
            settings,
            Arc::new(ProcessLock::new()),
            self.notifier.clone(),
            self.clock.clone(),
            self.config.clone(),
        ))
    }

    /// `Ok(None)` when another instance holds `key`.
    async fn exclusive<T, F>(&self, key: i64, job: F) -> Result<Option<T>>
    where
        F: Future<Output = loan_default_processor::error::Result<T>>,
    {
        run_exclusive(self.instance_lock.as_ref(), key, job)
            .await
            .into_diagnostic()
    }

    async fn sweep(&self, force: bool) -> Result<ProcessingResult> {
        let outcome = self
            .exclusive(self.config.lock_key, async {
                Ok::<_, ProcessorError>(self.processor()?.process_defaults(force).await)
            })
            .await?;
        Ok(outcome.unwrap_or_else(|| {
            warn!("default sweep requested while another instance is running");
            ProcessingResult::busy(self.clock.now(), force)
        }))
    }

    async fn notify(&self) -> Result<NotificationResult> {
        let outcome = self
            .exclusive(self.config.notification_lock_key, async {
                Ok::<_, ProcessorError>(self.processor()?.process_default_notifications().await)
            })
            .await?;
        Ok(outcome.unwrap_or_else(|| {
            warn!("notification pass requested while another instance is running");
            NotificationResult::busy()
        }))
    }

    async fn scheduled(&self, job: Job) {
        let key = match job {
            Job::Sweep => self.config.lock_key,
            Job::Notify => self.config.notification_lock_key,
        };
        let outcome = run_exclusive(self.instance_lock.as_ref(), key, async {
            run_job(&self.processor()?, job).await;
            Ok::<_, ProcessorError>(())
        })
        .await;
        match outcome {
            Ok(Some(())) => {}
            Ok(None) => warn!(job = ?job, "another instance holds the lock, job skipped"),
            Err(e) => error!(job = ?job, error = %e, "scheduled job failed"),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{}", text);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    let notifier: NotifierRef = match cli.whatsapp_url {
        Some(url) => Arc::new(WhatsAppNotifier::new(url, cli.whatsapp_token).into_diagnostic()?),
        None => Arc::new(LogNotifier::new()),
    };
    let clock: ClockRef = match cli.now {
        Some(now) => Arc::new(FixedClock(now)),
        None => Arc::new(SystemClock),
    };
    let config = ProcessorConfig::default()
        .with_business_clock(BusinessClock::from_offset_secs(cli.utc_offset_hours.saturating_mul(3600)));
    let runtime = Runtime {
        instance_lock: instance_lock(cli.db_path.as_deref()),
        db_path: cli.db_path,
        memory: InMemoryStore::new(),
        notifier,
        clock,
        config,
    };

    if let Some(path) = &cli.portfolio {
        let file = File::open(path).into_diagnostic()?;
        let portfolio = Portfolio::from_reader(file).into_diagnostic()?;
        let (loans, settings) = runtime.stores().into_diagnostic()?;
        let summary = portfolio
            .load_into(loans.as_ref(), settings.as_ref())
            .await
            .into_diagnostic()?;
        info!(loans = summary.loans, borrowers = summary.borrowers, "portfolio loaded");
    }

    match cli.command {
        Command::Run { force } => {
            let result = runtime.sweep(force).await?;
            print_json(&result)?;
            if let Some(err) = result.error_message {
                return Err(miette!("default sweep failed: {}", err));
            }
        }
        Command::Notify => {
            let result = runtime.notify().await?;
            print_json(&result)?;
            if let Some(err) = result.error_message {
                return Err(miette!("notification pass failed: {}", err));
            }
        }
        Command::Status => {
            let processor = runtime.processor().into_diagnostic()?;
            let status = processor.default_processing_status().await.into_diagnostic()?;
            print_json(&status)?;
        }
        Command::Settings => {
            let (_, settings) = runtime.stores().into_diagnostic()?;
            let values = settings.all_settings().await.into_diagnostic()?;
            print_json(&ProcessorSettings::from_map(&values))?;
        }
        Command::Events => {
            let (loans, _) = runtime.stores().into_diagnostic()?;
            let events = loans.all_events().await.into_diagnostic()?;
            let stdout = io::stdout();
            EventWriter::new(stdout.lock())
                .write_events(events)
                .into_diagnostic()?;
        }
        Command::History { application_id } => {
            let (loans, _) = runtime.stores().into_diagnostic()?;
            let history = loans
                .history_for_application(&application_id)
                .await
                .into_diagnostic()?;
            print_json(&history)?;
        }
        Command::Import { file } => {
            let portfolio = Portfolio::from_reader(File::open(file).into_diagnostic()?).into_diagnostic()?;
            let (loans, settings) = runtime.stores().into_diagnostic()?;
            let summary = portfolio
                .load_into(loans.as_ref(), settings.as_ref())
                .await
                .into_diagnostic()?;
            print_json(&summary)?;
        }
        Command::Daemon {
            sweep_hour,
            notify_hour,
        } => {
            let schedule = DailySchedule {
                sweep_hour,
                notify_hour,
            };
            let runtime = &runtime;
            run_daemon(
                runtime.config.business_clock,
                schedule,
                move |job| runtime.scheduled(job),
                async {
                    let _ = tokio::signal::ctrl_c().await;
                },
            )
            .await;
        }
    }

    Ok(())
}
