//! PurposePay CLI
//!
//! The `purposepay` command drives the verification-gated disbursement
//! pipeline and inspects journaled runs.
//!
//! ## Commands
//!
//! - `run`: verify, pay and recover for one request; prints the settlement
//! - `show`: print a journaled run record
//! - `list`: list journaled runs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::{info, Level};
use uuid::Uuid;

use purposepay_core::{
    init_tracing, DisbursementRequest, FsRunJournal, LogFormat, Orchestrator, PurposePayConfig,
    RunJournal, SettlementResponse,
};

#[derive(Parser)]
#[command(name = "purposepay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Verification-gated input-credit disbursement", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one disbursement: verify the price, pay the vendor, recover the loan
    Run(RunArgs),

    /// Print a journaled run record
    Show {
        /// Journal root directory
        #[arg(long, env = "PURPOSEPAY_JOURNAL_DIR")]
        journal_dir: PathBuf,

        /// Run ID to show
        run_id: Uuid,
    },

    /// List journaled runs, oldest first
    List {
        /// Journal root directory
        #[arg(long, env = "PURPOSEPAY_JOURNAL_DIR")]
        journal_dir: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Agricultural input to buy (e.g. "Urea Fertilizer")
    #[arg(long)]
    item: String,

    /// Number of units
    #[arg(long)]
    quantity: u32,

    /// Vendor receiving the payment
    #[arg(long)]
    vendor_id: String,

    /// Farmer whose harvest repays the loan
    #[arg(long)]
    farmer_id: String,

    /// Borrower credit score; screens the run through the risk gate first
    #[arg(long)]
    credit_score: Option<u32>,

    /// JSON config file
    #[arg(long, env = "PURPOSEPAY_CONFIG")]
    config: Option<PathBuf>,

    /// Per-capability timeout in milliseconds
    #[arg(long, env = "PURPOSEPAY_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Fail verification when no market rate matches the item
    #[arg(long)]
    require_market_rate: bool,

    /// Journal the completed run under this directory
    #[arg(long, env = "PURPOSEPAY_JOURNAL_DIR")]
    journal_dir: Option<PathBuf>,

    /// Print the full run record instead of the settlement payload
    #[arg(long)]
    record: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(LogFormat::from_json_flag(cli.json), level);

    match cli.command {
        Commands::Run(args) => {
            let (output, succeeded) = cmd_run(&args).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
            if !succeeded {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Show {
            journal_dir,
            run_id,
        } => cmd_show(&journal_dir, run_id).await,
        Commands::List { journal_dir } => cmd_list(&journal_dir).await,
    }
}

/// Config file (if any) with flag overrides applied.
fn load_config(args: &RunArgs) -> Result<PurposePayConfig> {
    let mut config = match &args.config {
        Some(path) => PurposePayConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PurposePayConfig::default(),
    };
    if let Some(ms) = args.timeout_ms {
        config.orchestrator.capability_timeout_ms = ms;
    }
    if args.require_market_rate {
        config.collaborators.require_market_rate = true;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Returns the JSON to print and whether the run settled.
async fn cmd_run(args: &RunArgs) -> Result<(Value, bool)> {
    let config = load_config(args)?;
    let (mut orchestrator, _collaborators) =
        Orchestrator::from_config(&config).context("Failed to build orchestrator")?;

    if let Some(dir) = &args.journal_dir {
        let journal = FsRunJournal::open(dir)
            .with_context(|| format!("Failed to open journal at {}", dir.display()))?;
        orchestrator = orchestrator.with_journal(Arc::new(journal));
    }

    let mut request = DisbursementRequest::new(
        args.item.clone(),
        args.quantity,
        args.vendor_id.clone(),
        args.farmer_id.clone(),
    );
    request.credit_score = args.credit_score;

    match orchestrator.run(request).await {
        Ok(record) => {
            info!(run_id = %record.run_id, status = %record.overall_status, "run complete");
            let succeeded = record.succeeded();
            let output = if args.record {
                serde_json::to_value(&record)?
            } else {
                serde_json::to_value(record.to_response())?
            };
            Ok((output, succeeded))
        }
        Err(err) => {
            let response = SettlementResponse::error(format!("configuration error: {err}"));
            Ok((serde_json::to_value(response)?, false))
        }
    }
}

async fn cmd_show(journal_dir: &Path, run_id: Uuid) -> Result<()> {
    let journal = FsRunJournal::open_existing(journal_dir)
        .with_context(|| format!("Failed to open journal at {}", journal_dir.display()))?;
    let record = journal
        .get(run_id)
        .await
        .with_context(|| format!("Failed to read run {run_id}"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn cmd_list(journal_dir: &Path) -> Result<()> {
    let journal = FsRunJournal::open_existing(journal_dir)
        .with_context(|| format!("Failed to open journal at {}", journal_dir.display()))?;
    let records = journal.list().await.context("Failed to list runs")?;

    if records.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {:<9}  {}  {:>6}ms  {} x{} -> {}",
            record.run_id,
            record.overall_status.to_string(),
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            record.duration_ms(),
            record.request.item,
            record.request.quantity,
            record.request.vendor_id,
        );
    }
    Ok(())
}
