//! yatco-sync - YATCO listing import tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use yatco_common::logging::{init_logging, LogConfig, LogLevel};
use yatco_common::{CachedKvStore, FileKvStore, KvStore};
use yatco_sync::api::{ReqwestHttpClient, VesselFetcher};
use yatco_sync::{
    FileLock, ImportCoordinator, ImportError, JobType, JsonDirRecordStore, StatusStore, StopSignal,
    SyncConfig, API_TOKEN_KEY,
};

#[derive(Parser, Debug)]
#[command(name = "yatco-sync")]
#[command(author, version, about = "Import yacht listings from the YATCO API")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YATCO API base URL (overrides YATCO_API_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// State directory (overrides YATCO_STATE_DIR)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an import
    Run {
        #[arg(long, value_enum, default_value_t = JobType::Full)]
        job: JobType,

        /// Cap on vessels for a full import (0 = unlimited)
        #[arg(long)]
        max_records: Option<usize>,
    },

    /// Ask a running import to stop at its next checkpoint
    Stop,

    /// Show the status of a job
    Status {
        #[arg(long, value_enum, default_value_t = JobType::Full)]
        job: JobType,
    },

    /// Delete the status record of a job
    ClearStatus {
        #[arg(long, value_enum)]
        job: JobType,
    },

    /// Show who holds a job's lock
    LockStatus {
        #[arg(long, value_enum, default_value_t = JobType::Full)]
        job: JobType,
    },

    /// Remove a job's lock file
    ClearLock {
        #[arg(long, value_enum, default_value_t = JobType::Full)]
        job: JobType,
    },

    /// Check that the API answers with the configured token
    TestConnection,
}

/// Option stores shared by every command
struct Stores {
    durable: Arc<dyn KvStore>,
    transient: Arc<dyn KvStore>,
}

impl Stores {
    fn open(config: &SyncConfig) -> Result<Self> {
        let durable = FileKvStore::new(config.options_dir())
            .with_context(|| format!("Failed to open option store in {}", config.options_dir().display()))?;
        let transient = FileKvStore::new(config.transient_dir()).with_context(|| {
            format!("Failed to open transient store in {}", config.transient_dir().display())
        })?;

        let stores = Self {
            durable: Arc::new(CachedKvStore::new(durable)),
            transient: Arc::new(transient),
        };

        if let Some(token) = &config.api_token {
            stores
                .durable
                .set(API_TOKEN_KEY, Value::String(token.clone()))
                .context("Failed to store API token")?;
        }

        Ok(stores)
    }

    fn token(&self) -> Result<Option<String>> {
        Ok(match self.durable.get(API_TOKEN_KEY)? {
            Some(Value::String(token)) if !token.trim().is_empty() => Some(token),
            _ => None,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("yatco-sync")
        .filter_directives("hyper=warn,reqwest=warn")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    let mut config = SyncConfig::from_env()?;
    if let Some(url) = cli.base_url {
        config.base_url = url;
    }
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }
    config.validate()?;

    let stores = Stores::open(&config)?;
    let lock = FileLock::new(&config.lock_dir);

    match cli.command {
        Command::Run { job, max_records } => {
            let mut options = config.import_options();
            if let Some(max) = max_records {
                options.max_records = max;
            }

            let fetcher = VesselFetcher::new(Arc::new(ReqwestHttpClient::new()), &config.base_url);
            let records = Arc::new(JsonDirRecordStore::new(&config.output_dir));
            let coordinator = ImportCoordinator::new(
                fetcher,
                records,
                lock,
                stores.durable.clone(),
                stores.transient.clone(),
            )
            .with_options(options);

            match coordinator.run(job).await {
                Ok(summary) => {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                },
                Err(ImportError::LockTimeout { job, source }) => {
                    warn!(job = %job, "Skipping run, another import holds the lock");
                    println!("Skipped: {source}");
                },
                Err(e) => return Err(e.into()),
            }
        },

        Command::Stop => {
            StopSignal::new(stores.durable.clone(), stores.transient.clone()).request_stop()?;
            println!("Stop requested. A running import stops before its next API call.");
        },

        Command::Status { job } => {
            let status_store = StatusStore::new(stores.durable.clone(), stores.transient.clone());
            match status_store.load_status(job)? {
                Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
                None => println!("No status recorded for {job}"),
            }
            if let Some(message) = status_store.load_status_message()? {
                println!("{message}");
            }
        },

        Command::ClearStatus { job } => {
            StatusStore::new(stores.durable.clone(), stores.transient.clone()).clear_status(job)?;
            info!(job = %job, "Status cleared");
            println!("Cleared {job} status");
        },

        Command::LockStatus { job } => match lock.check_lock(job.lock_name()) {
            Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
            None => println!("{job} is not locked"),
        },

        Command::ClearLock { job } => {
            if lock.clear_lock(job.lock_name()) {
                println!("Removed {}", lock.lock_path(job.lock_name()).display());
            } else {
                println!("No lock file for {job}");
            }
        },

        Command::TestConnection => {
            let token = stores
                .token()?
                .context("No API token configured. Set YATCO_API_TOKEN.")?;
            let fetcher = VesselFetcher::new(Arc::new(ReqwestHttpClient::new()), &config.base_url);
            let report = fetcher.test_connection(&token).await;
            println!("{report}");
        },
    }

    Ok(())
}
