//! chainingest CLI: run an ingestion stream and manage its checkpoint.
//!
//! # Commands
//! ```bash
//! CHAIN_RPC=https://... CONTRACT_ADDRESS=0x... chainingest run
//! chainingest run --config stream.yaml --from-block 6082465 --to-block 6100000
//! chainingest status --stream default
//! chainingest reset  --stream default
//! chainingest info
//! ```

mod handler;
mod logging;
mod rules;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chainingest_core::{
    CheckpointStore, ErrorMode, LedgerSource, PipelineBuilder, PipelineConfig, RateLimiter,
    RateLimiterConfig,
};
use chainingest_evm::{AbiEvent, AbiEventRule};
use chainingest_rpc::{redact_url, EvmRpcSource, HttpTransport};
use chainingest_storage::SqliteStorage;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::handler::RecordHandler;
use crate::logging::{init_tracing, LogConfig};
use crate::rules::{is_address, StreamFile};

const DEFAULT_START_BLOCK: u64 = 6_082_465;

#[derive(Parser)]
#[command(
    name = "chainingest",
    about = "Checkpointed, finality-aware event log ingestion",
    long_about = "
Ingest contract event logs from an EVM JSON-RPC endpoint into SQLite.
Blocks are delivered only once they are behind the confirmation depth; the
cursor advances in the same transaction as the records.

ENVIRONMENT VARIABLES:
  CHAIN_RPC          JSON-RPC endpoint (required for `run`)
  CONTRACT_ADDRESS   Contract to index when no --config is given
  RUST_LOG           Overrides --log-level
",
    version
)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, default_value = "./chainingest.db")]
    db: String,

    /// Default log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion pipeline until Ctrl-C (or --to-block)
    Run(RunArgs),

    /// Show stored checkpoints and record counts
    Status,

    /// Delete a stream's checkpoint so it restarts from its start block
    Reset {
        #[arg(long, default_value = "ethereum")]
        chain: String,
        #[arg(long, default_value = "default")]
        stream: String,
    },

    /// Show defaults and capabilities
    Info,
}

#[derive(Args)]
struct RunArgs {
    /// JSON-RPC endpoint
    #[arg(long, env = "CHAIN_RPC")]
    rpc_url: String,

    /// Fallback endpoints, tried in order after the primary fails
    #[arg(long = "fallback-rpc")]
    fallback_rpc: Vec<String>,

    /// Contract whose ERC-20 Transfer events are ingested (ignored with --config)
    #[arg(long, env = "CONTRACT_ADDRESS")]
    contract: Option<String>,

    /// YAML stream file with rules (see README)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "ethereum")]
    chain: String,

    #[arg(long, default_value = "default")]
    stream: String,

    /// First block when no checkpoint exists
    #[arg(long, default_value_t = DEFAULT_START_BLOCK)]
    from_block: u64,

    /// Inclusive last block; stop once it is committed
    #[arg(long)]
    to_block: Option<u64>,

    /// Blocks behind head before a block is final
    #[arg(long, default_value_t = 75)]
    finality_confirmation: u64,

    /// Upstream requests per second (0 = unlimited)
    #[arg(long, default_value_t = 10)]
    rate_limit: u32,

    /// Maximum heights per committed batch
    #[arg(long, default_value_t = 1000)]
    batch_size: u64,

    /// Heights per upstream request
    #[arg(long, default_value_t = 100)]
    request_span: u64,

    /// Concurrent upstream requests per batch
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// skip | abort
    #[arg(long)]
    decode_errors: Option<ErrorMode>,

    /// Poll interval when caught up, in milliseconds
    #[arg(long, default_value_t = 2_000)]
    poll_ms: u64,

    /// Fail a batch whose handler runs longer than this many seconds
    #[arg(long)]
    handler_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => cmd_run(args, &cli.db, cli.log_level, cli.log_json).await,
        Commands::Status => {
            init_tracing(&log_config(cli.log_level, cli.log_json))?;
            cmd_status(&cli.db).await
        }
        Commands::Reset { chain, stream } => {
            init_tracing(&log_config(cli.log_level, cli.log_json))?;
            cmd_reset(&cli.db, &chain, &stream).await
        }
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

fn log_config(level: String, json: bool) -> LogConfig {
    LogConfig {
        level,
        json,
        ..LogConfig::default()
    }
}

// ─── run ─────────────────────────────────────────────────────────────────────

async fn cmd_run(args: RunArgs, db: &str, log_level: String, log_json: bool) -> Result<()> {
    let file = match &args.config {
        Some(path) => StreamFile::load(path)?,
        None => StreamFile::default(),
    };

    // Flags win over the file's logging section, except for component overrides.
    let mut logging = file.logging.clone().unwrap_or_default();
    logging.level = log_level;
    logging.json |= log_json;
    init_tracing(&logging)?;

    let rules = resolve_rules(&file, args.contract.as_deref())?;
    let config = pipeline_config(&args, &file);
    let limiter = (config.requests_per_second > 0)
        .then(|| Arc::new(RateLimiter::new(RateLimiterConfig::per_second(config.requests_per_second))));
    let sources = build_sources(&args, limiter.as_ref())?;
    let store = Arc::new(SqliteStorage::open(db).await?);

    let mut builder = PipelineBuilder::<AbiEvent>::new().config(config);
    if let Some(limiter) = limiter {
        builder = builder.rate_limiter(limiter);
    }
    for source in sources {
        builder = builder.source(source);
    }
    for (address, rule) in rules {
        builder = builder.rule(address, Arc::new(rule));
    }
    let mut pipeline = builder.build(store, RecordHandler)?;

    tracing::info!(
        chain = %pipeline.config().chain,
        stream = %pipeline.config().stream_id,
        addresses = ?pipeline.filter().addresses,
        topics = ?pipeline.filter().topic0_values,
        depth = pipeline.config().confirmation_depth,
        "Starting pipeline"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping after the current batch");
            on_signal.cancel();
        }
    });

    let stats = pipeline.run(cancel).await?;
    tracing::info!(
        cursor = pipeline.cursor(),
        batches = stats.batches_committed,
        events = stats.events_delivered,
        skipped = stats.logs_skipped,
        cycle_failures = stats.cycle_failures,
        "Pipeline stopped"
    );
    Ok(())
}

/// Rules from the stream file, or the ERC-20 `Transfer` rule for
/// `--contract` when the file lists none.
fn resolve_rules(file: &StreamFile, contract: Option<&str>) -> Result<Vec<(String, AbiEventRule)>> {
    if !file.rules.is_empty() {
        return file.build_rules();
    }
    let Some(contract) = contract else {
        bail!("CONTRACT_ADDRESS (or --contract / --config with rules) is required");
    };
    if !is_address(contract) {
        bail!("CONTRACT_ADDRESS '{contract}' is not a contract address");
    }
    Ok(vec![(contract.to_string(), AbiEventRule::erc20_transfer())])
}

fn pipeline_config(args: &RunArgs, file: &StreamFile) -> PipelineConfig {
    let mut config = PipelineConfig {
        chain: file.chain.clone().unwrap_or_else(|| args.chain.clone()),
        stream_id: file.stream_id.clone().unwrap_or_else(|| args.stream.clone()),
        start_height: args.from_block,
        end_height: args.to_block,
        confirmation_depth: args.finality_confirmation,
        max_batch_size: args.batch_size,
        requests_per_second: args.rate_limit,
        poll_interval: Duration::from_millis(args.poll_ms),
        handler_timeout: args.handler_timeout_secs.map(Duration::from_secs),
        ..PipelineConfig::default()
    };
    config.fetcher.request_span = args.request_span;
    config.fetcher.concurrency = args.concurrency;
    if let Some(mode) = args.decode_errors.or(file.decode_errors) {
        config.decode_errors = mode;
    }
    config
}

/// One source per endpoint, all drawing from the same request budget.
fn build_sources(
    args: &RunArgs,
    limiter: Option<&Arc<RateLimiter>>,
) -> Result<Vec<Arc<dyn LedgerSource>>> {
    std::iter::once(&args.rpc_url)
        .chain(args.fallback_rpc.iter())
        .map(|url| {
            let transport = HttpTransport::default_for(url.as_str())
                .with_context(|| format!("invalid RPC endpoint '{}'", redact_url(url)))?;
            let mut source = EvmRpcSource::new(Arc::new(transport)).with_name(redact_url(url));
            if let Some(limiter) = limiter {
                source = source.with_rate_limiter(limiter.clone());
            }
            Ok(Arc::new(source) as Arc<dyn LedgerSource>)
        })
        .collect()
}

// ─── status / reset / info ───────────────────────────────────────────────────

async fn cmd_status(db: &str) -> Result<()> {
    let store = SqliteStorage::open(db).await?;
    let checkpoints = store.checkpoints().await?;
    if checkpoints.is_empty() {
        println!("No checkpoints in {db}");
    }
    for cp in checkpoints {
        let last = cp
            .last_block()
            .map(|b| b.to_string())
            .unwrap_or_else(|| "none".into());
        println!(
            "{}/{}  cursor={}  last_block={}  updated_at={}",
            cp.chain_id, cp.stream_id, cp.cursor, last, cp.updated_at
        );
    }
    for (collection, count) in store.record_counts().await? {
        println!("  {collection}: {count} records");
    }
    Ok(())
}

async fn cmd_reset(db: &str, chain: &str, stream: &str) -> Result<()> {
    let store = SqliteStorage::open(db).await?;
    if store.load(chain, stream).await?.is_none() {
        println!("No checkpoint for {chain}/{stream}");
        return Ok(());
    }
    store.reset(chain, stream).await?;
    println!("Checkpoint for {chain}/{stream} deleted; records are kept and will be overwritten on replay");
    Ok(())
}

fn cmd_info() {
    let defaults = PipelineConfig::default();
    println!("ChainIngest v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default start block: {DEFAULT_START_BLOCK}");
    println!("  Default confirmation depth: {} blocks", defaults.confirmation_depth);
    println!("  Default batch size: {} blocks", defaults.max_batch_size);
    println!("  Default rate limit: {} requests/s", defaults.requests_per_second);
    println!("  Default decode error mode: {:?}", defaults.decode_errors);
    println!("  Storage: SQLite");
    println!("  Chains: EVM JSON-RPC (eth_blockNumber, eth_getBlockByNumber, eth_getLogs)");
}
