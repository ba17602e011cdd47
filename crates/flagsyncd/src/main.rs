//! flagsyncd - flagsync daemon
//!
//! Hosts the event delivery pipeline and exposes operator commands over the
//! same SurrealDB state.
//!
//! ## Commands
//!
//! - `serve`: deliver buffered events; newline-delimited events on stdin are enqueued
//! - `apply`: reconcile the mirror against a full snapshot file
//! - `patch`: apply a single flag or segment
//! - `generate-token`: issue the webhook token (once)
//! - `status`: show mirror, queue and schedule state

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use flagsync_core::{
    DeliveryArgs, DeliveryOptions, DeliveryPipeline, HttpTransport, Kind, Mirror,
    ReconcileReport, Snapshot, StoredTokenValidator, SyncError, UpsertOutcome,
};
use flagsync_state::{
    ConnectionConfig, EventStore, JobId, ScheduleStore, StorageError, SurrealStore,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};

/// Upper bound for the queue length reported by `status`.
const STATUS_COUNT_LIMIT: usize = 100_000;

#[derive(Parser)]
#[command(name = "flagsyncd")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Feature flag mirror and event delivery daemon", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// SurrealDB endpoint (mem://, surrealkv://<path>, ws://, wss://)
    #[arg(long, global = true, env = "FLAGSYNC_DB_URL", default_value = "surrealkv://.flagsync/db")]
    db_url: String,

    /// SurrealDB namespace
    #[arg(long, global = true, env = "FLAGSYNC_DB_NAMESPACE", default_value = "flagsync")]
    namespace: String,

    /// SurrealDB database
    #[arg(long, global = true, env = "FLAGSYNC_DB_DATABASE", default_value = "main")]
    database: String,

    /// Root user for remote servers
    #[arg(long, global = true, env = "FLAGSYNC_DB_USER", requires = "db_pass")]
    db_user: Option<String>,

    /// Root password for remote servers
    #[arg(long, global = true, env = "FLAGSYNC_DB_PASS", hide_env_values = true)]
    db_pass: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the delivery pipeline until interrupted
    Serve {
        /// Key sent as the Authorization header on delivery
        #[arg(long, env = "FLAGSYNC_SDK_KEY", hide_env_values = true)]
        sdk_key: String,

        /// JSON file with delivery options (camelCase field names)
        #[arg(long)]
        options: Option<PathBuf>,

        /// Per-request timeout for the collector, in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// Reconcile the mirror against a full snapshot
    Apply {
        /// Snapshot file: {"flags": {...}, "segments": {...}}
        file: PathBuf,
    },

    /// Apply one flag or segment, gated by version
    Patch {
        #[arg(long, value_enum)]
        kind: KindArg,

        /// JSON file holding the item
        file: PathBuf,
    },

    /// Issue the webhook token; prints it once
    GenerateToken,

    /// Show mirror, queue and schedule state
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Flags,
    Segments,
}

impl From<KindArg> for Kind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Flags => Kind::Flag,
            KindArg::Segments => Kind::Segment,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    flagsync_core::telemetry::init_tracing(cli.json, level);

    let store = Arc::new(
        SurrealStore::connect(&connection_config(&cli))
            .await
            .context("Failed to connect to flagsync database")?,
    );

    match cli.command {
        Commands::Serve {
            sdk_key,
            options,
            timeout_secs,
        } => {
            let args = DeliveryArgs::new(sdk_key, load_options(options.as_deref())?);
            cmd_serve(store, args, Duration::from_secs(timeout_secs)).await
        }
        Commands::Apply { file } => {
            let report = cmd_apply(store, &file).await?;
            println!(
                "Applied {:?}: {} inserted, {} replaced, {} unchanged, {} deleted, {} skipped",
                file,
                report.inserted,
                report.replaced,
                report.unchanged,
                report.deleted,
                report.skipped
            );
            Ok(())
        }
        Commands::Patch { kind, file } => {
            let kind = Kind::from(kind);
            let outcome = cmd_patch(store, kind, &file).await?;
            println!("{} patch from {:?}: {:?}", kind, file, outcome);
            Ok(())
        }
        Commands::GenerateToken => {
            let token = cmd_generate_token(store).await?;
            println!("{}", token);
            Ok(())
        }
        Commands::Status => {
            let status = cmd_status(store).await?;
            print!("{}", status.render());
            Ok(())
        }
    }
}

fn connection_config(cli: &Cli) -> ConnectionConfig {
    let mut config = ConnectionConfig::new(cli.db_url.clone())
        .with_namespace(cli.namespace.clone())
        .with_database(cli.database.clone());
    if let (Some(user), Some(pass)) = (&cli.db_user, &cli.db_pass) {
        config = config.with_root(user.clone(), pass.clone());
    }
    config
}

fn load_options(path: Option<&Path>) -> Result<DeliveryOptions> {
    let Some(path) = path else {
        return Ok(DeliveryOptions::default());
    };
    let raw = std::fs::read_to_string(path)
        .context(format!("Failed to read options file: {:?}", path))?;
    let options: DeliveryOptions =
        serde_json::from_str(&raw).context("Failed to parse delivery options")?;
    options.validate()?;
    Ok(options)
}

/// Start delivery and feed stdin into the queue until ctrl-c.
async fn cmd_serve(store: Arc<SurrealStore>, args: DeliveryArgs, timeout: Duration) -> Result<()> {
    args.options.validate()?;
    let transport = Arc::new(HttpTransport::new(timeout)?);
    let pipeline = DeliveryPipeline::new(store.clone(), store, transport)
        .context("Failed to start delivery pipeline")?;

    // Events left over from a previous run have no live job behind them.
    if pipeline.processor.queue().has_backlog().await? {
        let decision = pipeline.processor.flush(&args).await?;
        info!(job_id = %decision.job_id(), "resuming delivery of stored events");
    }

    info!(events_uri = %args.options.events_uri(), "flagsyncd serving");
    let stdin = BufReader::new(tokio::io::stdin());
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
    };
    let accepted = serve_events(&pipeline, &args, stdin, shutdown).await?;
    info!(accepted, "flagsyncd stopped");
    Ok(())
}

/// Enqueue one event per non-empty line of `reader`.
///
/// Returns the number of accepted events once `shutdown` resolves. End of
/// input does not stop serving; delivery keeps running until shutdown.
async fn serve_events<R, F>(
    pipeline: &DeliveryPipeline,
    args: &DeliveryArgs,
    reader: R,
    shutdown: F,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut lines = reader.lines();
    let mut accepted = 0;

    loop {
        tokio::select! {
            biased;
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read event input")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match pipeline
                    .processor
                    .enqueue(
                        vec![line.to_string()],
                        &args.delivery_key,
                        Some(args.options.clone()),
                    )
                    .await
                {
                    Ok(outcome) => accepted += outcome.accepted,
                    Err(e) => error!(error = %e, "failed to enqueue event"),
                }
            }
            _ = &mut shutdown => return Ok(accepted),
        }
    }

    shutdown.await;
    Ok(accepted)
}

async fn cmd_apply(store: Arc<SurrealStore>, file: &Path) -> Result<ReconcileReport> {
    let body =
        std::fs::read_to_string(file).context(format!("Failed to read snapshot: {:?}", file))?;
    let snapshot = Snapshot::from_json(&body)?;
    let report = Mirror::new(store).reconcile(&snapshot).await?;
    Ok(report)
}

async fn cmd_patch(store: Arc<SurrealStore>, kind: Kind, file: &Path) -> Result<UpsertOutcome> {
    let body = std::fs::read_to_string(file).context(format!("Failed to read item: {:?}", file))?;
    let item: serde_json::Value =
        serde_json::from_str(&body).context("Failed to parse item as JSON")?;
    let outcome = Mirror::new(store).apply_patch(kind, &item).await?;
    if outcome == UpsertOutcome::Ignored {
        warn!(%kind, "stored version is newer or equal; patch ignored");
    }
    Ok(outcome)
}

async fn cmd_generate_token(store: Arc<SurrealStore>) -> Result<String> {
    match StoredTokenValidator::new(store).generate().await {
        Ok(token) => Ok(token),
        Err(SyncError::Storage(StorageError::TokenExists)) => {
            anyhow::bail!("A webhook token has already been issued")
        }
        Err(e) => Err(e).context("Failed to issue webhook token"),
    }
}

/// Point-in-time view of the daemon's state.
#[derive(Debug, PartialEq)]
struct Status {
    initialized: bool,
    flags: usize,
    segments: usize,
    queued: usize,
    delivery_job: Option<JobId>,
}

impl Status {
    fn render(&self) -> String {
        let queued = if self.queued >= STATUS_COUNT_LIMIT {
            format!("{}+", STATUS_COUNT_LIMIT)
        } else {
            self.queued.to_string()
        };
        let job = self
            .delivery_job
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!(
            "Initialized:   {}\nFlags:         {}\nSegments:      {}\nQueued events: {}\nDelivery job:  {}\n",
            self.initialized, self.flags, self.segments, queued, job
        )
    }
}

async fn cmd_status(store: Arc<SurrealStore>) -> Result<Status> {
    let mirror = Mirror::new(store.clone());
    Ok(Status {
        initialized: mirror.is_initialized().await?,
        flags: mirror.get_all(Kind::Flag).await?.len(),
        segments: mirror.get_all(Kind::Segment).await?.len(),
        queued: store.count(STATUS_COUNT_LIMIT).await?,
        delivery_job: store.current().await?.map(|s| s.job_id),
    })
}
