//! sift - notification triage from the command line.

use anyhow::{bail, Context};
use chrono::{DateTime, FixedOffset, Local};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sift_core::{
    DatasetLogger, DeviceState, FeedbackLog, Message, PipelineContext, PriorityLabel,
    SharedConfig, SiftConfig, SqliteStore, StaticDeviceState, Submission, TaskScheduler,
    TemporalResolver, TrainingJob, TriagePipeline, TriageStore,
};
use sift_inference::{BackendFactory, BackendKind, LlamaServerConfig};

/// Energy-aware notification triage and task extraction.
#[derive(Parser)]
#[command(name = "sift", version, about)]
struct Cli {
    /// Path to a TOML, JSON or YAML configuration file. Defaults to SIFT_* variables.
    #[arg(short, long, env = "SIFT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    backend: BackendArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct BackendArgs {
    /// Generative backend: null or llama-server.
    #[arg(long, env = "SIFT_BACKEND", default_value = "null", global = true)]
    backend: BackendKind,

    /// llama.cpp server root URL.
    #[arg(long, env = "SIFT_LLAMA_URL", default_value = "http://127.0.0.1:8080", global = true)]
    llama_url: String,

    /// Bearer key for the llama.cpp server.
    #[arg(long, env = "SIFT_LLAMA_API_KEY", hide_env_values = true, global = true)]
    llama_api_key: Option<String>,
}

/// Device conditions the scheduler's gates see.
#[derive(Args)]
struct DeviceArgs {
    /// Battery level, percent.
    #[arg(long, default_value_t = 100)]
    battery: u8,

    /// Device is charging.
    #[arg(long)]
    charging: bool,

    /// Screen is on and unlocked.
    #[arg(long)]
    screen_on: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Triage one notification text and print the result as JSON.
    Triage {
        /// Notification text.
        #[arg(required = true)]
        text: Vec<String>,

        /// Reference time for relative dates (RFC 3339). Defaults to now.
        #[arg(long)]
        at: Option<DateTime<FixedOffset>>,
    },

    /// Resolve a natural-language time expression.
    Resolve {
        #[arg(required = true)]
        expr: Vec<String>,

        /// Reference time (RFC 3339). Defaults to now.
        #[arg(long)]
        at: Option<DateTime<FixedOffset>>,
    },

    /// Submit JSON-lines messages to the scheduler and run the admitted work.
    Run {
        /// Input file, one message object per line. Reads stdin when omitted.
        input: Option<PathBuf>,

        /// Keep running the periodic sweep and nightly training until Ctrl+C.
        #[arg(long)]
        watch: bool,

        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Record a user priority correction for a stored message.
    Feedback {
        message_id: String,
        /// high, medium or low (Chinese labels accepted).
        #[arg(value_parser = parse_label)]
        label: PriorityLabel,
    },

    /// Retrain the statistical priority model from collected feedback.
    Train {
        /// Train even outside the nightly window.
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Triage { text, at } => {
            let pipeline = build_pipeline(&cli.backend, &config)?;
            let text = text.join(" ");
            let result = match at {
                Some(now) => pipeline.triage_at(&text, now).await?,
                None => pipeline.triage(&text).await?,
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Resolve { expr, at } => {
            let expr = expr.join(" ");
            let now = at.unwrap_or_else(|| Local::now().fixed_offset());
            match TemporalResolver::new().resolve(&expr, &now) {
                Some(resolved) => println!("{}", resolved.to_rfc3339()),
                None => bail!("could not resolve {expr:?}"),
            }
        }
        Command::Run { input, watch, device } => {
            let pipeline = build_pipeline(&cli.backend, &config)?;
            run(pipeline, &config, input.as_deref(), watch, &device).await?;
        }
        Command::Feedback { message_id, label } => {
            let store = open_store(&config)?;
            let log = FeedbackLog::new(config.snapshot().feedback_log_path());
            DatasetLogger::new(store, log)
                .record_correction(&message_id, label)
                .await?;
            info!(message_id = %message_id, %label, "Correction recorded");
        }
        Command::Train { force, device } => {
            let pipeline = build_pipeline(&cli.backend, &config)?;
            let job = Arc::new(TrainingJob::new(
                config.clone(),
                pipeline.context().statistical.clone(),
            ));
            let outcome = if force {
                Some(job.run().await?)
            } else {
                let scheduler = TaskScheduler::new(pipeline, open_store(&config)?, device_state(&device))
                    .with_training(job);
                scheduler.train_if_allowed().await?
            };
            match outcome {
                Some(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
                None => println!("{}", json!({"outcome": "skipped", "reason": "outside nightly window"})),
            }
        }
        Command::Config => {
            let snapshot = config.snapshot();
            print!("{}", toml::to_string_pretty(snapshot.as_ref())?);
        }
    }

    Ok(())
}

fn parse_label(value: &str) -> Result<PriorityLabel, String> {
    PriorityLabel::from_label(value)
        .ok_or_else(|| format!("unknown priority {value:?}, expected high, medium or low"))
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SharedConfig> {
    let config = match path {
        Some(path) => SiftConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SiftConfig::from_env(),
    };
    Ok(SharedConfig::new(config))
}

fn build_pipeline(args: &BackendArgs, config: &SharedConfig) -> anyhow::Result<TriagePipeline> {
    let mut llama = LlamaServerConfig::new(&args.llama_url)?;
    if let Some(key) = &args.llama_api_key {
        llama = llama.with_api_key(key.clone());
    }
    let backend = BackendFactory::create(args.backend, llama)?;
    let ctx = PipelineContext::builder(config.clone()).backend(backend).build();
    Ok(TriagePipeline::new(Arc::new(ctx)))
}

fn open_store(config: &SharedConfig) -> anyhow::Result<Arc<dyn TriageStore>> {
    let path = config.snapshot().database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = SqliteStore::new(&path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(store))
}

fn device_state(args: &DeviceArgs) -> Arc<StaticDeviceState> {
    Arc::new(StaticDeviceState::with_local_clock(DeviceState {
        battery_pct: args.battery,
        charging: args.charging,
        screen_interactive: args.screen_on,
        keyguard_locked: !args.screen_on,
        ..DeviceState::default()
    }))
}

#[derive(Debug, Default)]
struct RunSummary {
    read: usize,
    skipped: usize,
    high: usize,
    medium: usize,
    archived: usize,
    already_processed: usize,
}

async fn run(
    pipeline: TriagePipeline,
    config: &SharedConfig,
    input: Option<&Path>,
    watch: bool,
    device: &DeviceArgs,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let job = Arc::new(TrainingJob::new(
        config.clone(),
        pipeline.context().statistical.clone(),
    ));
    let mut scheduler = TaskScheduler::new(pipeline, store, device_state(device)).with_training(job);

    let summary = match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            submit_lines(&scheduler, BufReader::new(file)).await?
        }
        None => submit_lines(&scheduler, BufReader::new(tokio::io::stdin())).await?,
    };
    info!(?summary, "Input submitted");

    if watch {
        scheduler.start().await?;
        info!("Scheduler running, press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
    }
    scheduler.shutdown().await?;

    println!(
        "{}",
        json!({
            "read": summary.read,
            "skipped": summary.skipped,
            "high": summary.high,
            "medium": summary.medium,
            "archived": summary.archived,
            "already_processed": summary.already_processed,
        })
    );
    Ok(())
}

async fn submit_lines<R>(scheduler: &TaskScheduler, reader: R) -> anyhow::Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = RunSummary::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        summary.read += 1;

        let message: Message = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed message");
                summary.skipped += 1;
                continue;
            }
        };

        match scheduler.submit(message).await? {
            Submission::Admitted {
                priority: PriorityLabel::High,
                ..
            } => summary.high += 1,
            Submission::Admitted { .. } => summary.medium += 1,
            Submission::Archived => summary.archived += 1,
            Submission::AlreadyProcessed => summary.already_processed += 1,
        }
    }

    Ok(summary)
}
