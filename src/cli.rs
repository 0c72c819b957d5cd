use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use latexgate::config::{AppConfig, DeliveryKind};
use latexgate::export::usage_table;
use latexgate::gate::Identifier;
use latexgate::integrity::{verify_annotation, verify_report};
use latexgate::ledger::UsageLedger;
use latexgate::logging::{current_error_log_path, current_log_path};
use latexgate::report::schedule::run_periodic;
use latexgate::report::{Delivery, ReportOutcome, ReportScheduler};
use latexgate::session::{ConversionSession, InkInput, Stroke, TypedEntry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Parser)]
#[command(
    name = "latexgate",
    about = "Allow-list gate, usage ledger and reporting for handwriting-to-LaTeX conversion"
)]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true, env = "LATEXGATE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check an identifier against the allow-list and record the access
    Check {
        /// Identifier as entered by the student
        id: String,
    },
    /// Sign in, convert input to LaTeX and print it with its integrity tag
    Convert {
        #[arg(long)]
        id: String,

        /// LaTeX typed by hand
        #[arg(long, conflicts_with = "strokes", required_unless_present = "strokes")]
        latex: Option<String>,

        /// JSON file holding handwriting strokes
        #[arg(long)]
        strokes: Option<PathBuf>,
    },
    /// Check the integrity tag on annotated LaTeX
    Verify {
        #[arg(long)]
        id: String,

        /// LaTeX followed by its `  % NNNNN` tag comment
        annotated: String,
    },
    /// Show the usage ledger
    Log,
    /// Run one report cycle now
    Report,
    /// Run report cycles periodically until interrupted
    Schedule {
        /// Seconds between cycles. Defaults to the configured interval.
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Verify a delivered report against its receipt
    VerifyReport {
        /// Path to the `.receipt.json` file
        receipt: PathBuf,
    },
    /// Write a config file with default settings
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Commands {
    /// Reject settings this command cannot run with, before touching any state.
    fn validate(&self, config: &AppConfig) -> latexgate::error::Result<()> {
        match self {
            Self::Check { .. } | Self::Convert { .. } => config.validate_gate(),
            Self::Report | Self::Schedule { .. } => config.validate_report(),
            Self::Verify { .. } | Self::Log | Self::VerifyReport { .. } | Self::InitConfig { .. } => {
                Ok(())
            }
        }
    }
}

pub fn run_command(config: &AppConfig, config_path: &Path, command: Commands) -> Result<()> {
    command.validate(config).context("Invalid configuration")?;

    match command {
        Commands::Check { id } => handle_check(config, &id),
        Commands::Convert {
            id,
            latex,
            strokes,
        } => handle_convert(config, &id, latex, strokes.as_deref()),
        Commands::Verify { id, annotated } => handle_verify(config, &id, &annotated),
        Commands::Log => handle_log(config),
        Commands::Report => handle_report(config),
        Commands::Schedule { interval_secs } => handle_schedule(config, interval_secs),
        Commands::VerifyReport { receipt } => handle_verify_report(&receipt),
        Commands::InitConfig { force } => handle_init_config(config_path, force),
    }
}

fn open_ledger(config: &AppConfig) -> Result<Arc<UsageLedger>> {
    let ledger = UsageLedger::open(&config.ledger_path).with_context(|| {
        format!("Failed to open usage ledger at {}", config.ledger_path.display())
    })?;
    Ok(Arc::new(ledger))
}

fn open_session(config: &AppConfig) -> Result<ConversionSession<TypedEntry>> {
    let gate = config.gate().context("Invalid allow-list")?;
    Ok(ConversionSession::new(gate, open_ledger(config)?, TypedEntry))
}

fn sign_in(session: &ConversionSession<TypedEntry>, id: &str) -> Result<Identifier> {
    session
        .sign_in(id)?
        .ok_or_else(|| anyhow::anyhow!("Please enter your student identifier."))
}

fn handle_check(config: &AppConfig, id: &str) -> Result<()> {
    let session = open_session(config)?;
    let identifier = sign_in(&session, id)?;
    println!("Access granted for {identifier}.");
    Ok(())
}

fn handle_convert(
    config: &AppConfig,
    id: &str,
    latex: Option<String>,
    strokes: Option<&Path>,
) -> Result<()> {
    let input = match (latex, strokes) {
        (Some(latex), _) => InkInput::Typed(latex),
        (None, Some(path)) => InkInput::Strokes(load_strokes(path)?),
        (None, None) => anyhow::bail!("Provide --latex or --strokes"),
    };

    let session = open_session(config)?;
    let identifier = sign_in(&session, id)?;
    let tagged = session.convert(&identifier, &input)?;
    println!("{}", tagged.annotated);
    Ok(())
}

fn load_strokes(path: &Path) -> Result<Vec<Stroke>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read strokes file: {}", path.display()))?;
    serde_json::from_str(&content).context("Failed to parse strokes JSON")
}

fn handle_verify(config: &AppConfig, id: &str, annotated: &str) -> Result<()> {
    let identifier = Identifier::parse(id, config.identifier_length)?;
    let result = verify_annotation(&identifier, annotated);
    println!("{}", result.format_cli());
    if !result.passed {
        anyhow::bail!("Integrity check failed");
    }
    Ok(())
}

fn handle_log(config: &AppConfig) -> Result<()> {
    let ledger = open_ledger(config)?;
    let events = ledger.snapshot()?;
    if events.is_empty() {
        println!("Usage ledger is empty.");
        return Ok(());
    }
    let table = usage_table(&events)?;
    println!("{table}");
    println!("{} access event(s) in {}", events.len(), ledger.path().display());
    Ok(())
}

fn build_delivery(config: &AppConfig) -> Result<Arc<dyn Delivery>> {
    Ok(match config.report.delivery {
        DeliveryKind::Outbox => Arc::new(config.outbox_delivery()),
        DeliveryKind::Webhook => Arc::new(config.webhook_delivery()?),
        DeliveryKind::Email => Arc::new(config.email_delivery()?),
    })
}

fn handle_report(config: &AppConfig) -> Result<()> {
    let delivery = build_delivery(config)?;
    let scheduler = ReportScheduler::new(open_ledger(config)?);

    match scheduler.run_report_cycle(delivery.as_ref())? {
        ReportOutcome::NothingToReport => println!("Nothing to report."),
        ReportOutcome::Delivered { events } => {
            println!("Delivered {events} access event(s); ledger cleared.");
        }
        ReportOutcome::DeliveryFailed { cause } => {
            anyhow::bail!("Report not delivered, ledger kept: {cause}")
        }
    }
    Ok(())
}

fn handle_schedule(config: &AppConfig, interval_secs: Option<u64>) -> Result<()> {
    let interval = interval_secs
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| config.report.interval());

    // Built before the runtime starts and dropped after it stops; the
    // blocking HTTP client must not be created or dropped on a runtime thread.
    let delivery = build_delivery(config)?;
    let scheduler = Arc::new(ReportScheduler::new(open_ledger(config)?));

    println!(
        "Reporting every {}s. Logs: {} (warnings: {}). Ctrl-C to stop.",
        interval.as_secs(),
        current_log_path(&config.log_dir).display(),
        current_error_log_path(&config.log_dir).display()
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let summary = runtime.block_on(async {
        let (stop_tx, stop_rx) = oneshot::channel();
        let periodic = tokio::spawn(run_periodic(
            scheduler,
            Arc::clone(&delivery),
            interval,
            stop_rx,
        ));

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        let _stopped: std::result::Result<(), ()> = stop_tx.send(());
        periodic.await.context("Report schedule task failed")
    })?;
    drop(runtime);

    println!(
        "Ran {} cycle(s): {} event(s) delivered, {} failed deliveries, {} storage errors.",
        summary.cycles, summary.delivered_events, summary.failed_deliveries, summary.storage_errors
    );
    Ok(())
}

fn handle_verify_report(receipt: &Path) -> Result<()> {
    let result = verify_report(receipt)?;
    println!("{}", result.format_cli());
    if !result.passed {
        anyhow::bail!("Report verification failed");
    }
    Ok(())
}

fn handle_init_config(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            config_path.display()
        );
    }
    AppConfig::default().save(config_path)?;
    println!("Wrote default config to {}", config_path.display());
    Ok(())
}
