//! CLI command definitions, routing and tracing setup.

use std::path::PathBuf;

use chrono::{Datelike, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use filingdesk_bucket::BucketClient;
use filingdesk_core::{SubmissionLimiter, SubmitRequest, Worker, submit_filing};
use filingdesk_shared::metadata::{countries, fiscal_year_options, legal_forms};
use filingdesk_shared::{
    AppConfig, BucketConfig, FilingDeskError, JobStatus, Period, StoredLine, UploadMetadata,
    WorkerConfig, database_path, init_config, load_config,
};
use filingdesk_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// FilingDesk: submit annual accounts and extract their key figures.
#[derive(Parser)]
#[command(
    name = "filingdesk",
    version,
    about = "Submit financial filings, queue extraction, and review the extracted statements.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Acting user. Overrides FILINGDESK_USER and `[account] user_id`.
    #[arg(long, global = true)]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Upload a PDF filing and queue it for extraction.
    Submit {
        /// Path to the PDF.
        file: PathBuf,

        #[command(flatten)]
        metadata: MetadataArgs,

        /// Extraction ruleset to record on the job.
        #[arg(long)]
        ruleset: Option<String>,

        /// Print the receipt as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Work the extraction queue.
    Worker {
        /// Process at most one job, then exit.
        #[arg(long)]
        once: bool,
    },

    /// List your filings, newest first.
    List {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show a filing with its latest job and extracted lines.
    Show {
        /// Filing ID.
        filing_id: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print reference data used by upload metadata.
    Reference {
        #[arg(value_enum)]
        kind: ReferenceKind,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Optional upload metadata flags.
#[derive(clap::Args, Debug, Default)]
pub(crate) struct MetadataArgs {
    /// Registry number, e.g. B123456.
    #[arg(long)]
    pub rcs_number: Option<String>,

    #[arg(long)]
    pub company_name: Option<String>,

    #[arg(long)]
    pub fiscal_year: Option<i32>,

    /// Legal form code (see `reference legal-forms`).
    #[arg(long)]
    pub legal_form: Option<String>,

    #[arg(long)]
    pub parent_company_name: Option<String>,

    /// ISO country code of the parent (see `reference countries`).
    #[arg(long)]
    pub parent_country: Option<String>,
}

impl From<MetadataArgs> for UploadMetadata {
    fn from(args: MetadataArgs) -> Self {
        Self {
            rcs_number: args.rcs_number,
            company_name: args.company_name,
            fiscal_year: args.fiscal_year,
            legal_form: args.legal_form,
            parent_company_name: args.parent_company_name,
            parent_country: args.parent_country,
        }
    }
}

/// Reference tables.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum ReferenceKind {
    LegalForms,
    Countries,
    FiscalYears,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "filingdesk=info",
        1 => "filingdesk=debug",
        _ => "filingdesk=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so `--json` output on stdout stays parseable.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

/// Process exit code for a failed command.
pub(crate) fn exit_code(report: &color_eyre::Report) -> i32 {
    match report
        .downcast_ref::<FilingDeskError>()
        .map(FilingDeskError::http_status)
    {
        Some(400) => 2,
        Some(401) => 3,
        Some(404) => 4,
        Some(429) => 5,
        Some(502) => 6,
        _ => 1,
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let user = cli.user;
    match cli.command {
        Command::Submit {
            file,
            metadata,
            ruleset,
            json,
        } => cmd_submit(user, file, metadata.into(), ruleset, json).await,
        Command::Worker { once } => cmd_worker(once).await,
        Command::List { json } => cmd_list(user, json).await,
        Command::Show { filing_id, json } => cmd_show(user, &filing_id, json).await,
        Command::Reference { kind } => cmd_reference(kind),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// `--user` wins over the configured account.
fn acting_user(flag: Option<String>, config: &AppConfig) -> String {
    flag.or_else(|| config.account.user_id.clone())
        .unwrap_or_default()
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let path = database_path(config)?;
    Ok(Storage::open(&path).await?)
}

async fn open_storage_readonly(config: &AppConfig) -> Result<Storage> {
    let path = database_path(config)?;
    if !path.exists() {
        return Err(eyre!(
            "no database at {}; submit a filing first",
            path.display()
        ));
    }
    Ok(Storage::open_readonly(&path).await?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_submit(
    user: Option<String>,
    file: PathBuf,
    metadata: UploadMetadata,
    ruleset_id: Option<String>,
    json: bool,
) -> Result<()> {
    let config = load_config()?;
    let owner_id = acting_user(user, &config);
    let bucket = BucketClient::new(&BucketConfig::from_app(&config)?)?;
    let storage = open_storage(&config).await?;
    let limiter = SubmissionLimiter::from(&config.limits);

    info!(file = %file.display(), "submitting filing");

    let spinner = spinner(format!("Uploading {}", file.display()));
    let result = submit_filing(
        &storage,
        &bucket,
        &limiter,
        SubmitRequest {
            owner_id,
            file_path: file,
            metadata,
            ruleset_id,
        },
    )
    .await;
    spinner.finish_and_clear();
    let receipt = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
        return Ok(());
    }

    println!();
    println!("  Filing submitted.");
    println!("  Filing: {}", receipt.filing_id);
    println!("  Job:    {}", receipt.job_id);
    println!("  Path:   {}", receipt.storage_path);
    println!("  SHA256: {}", receipt.file_hash);
    println!("  Size:   {} bytes", receipt.bytes);
    println!();

    Ok(())
}

async fn cmd_worker(once: bool) -> Result<()> {
    let config = load_config()?;
    let bucket = BucketClient::new(&BucketConfig::from_app(&config)?)?;
    let storage = open_storage(&config).await?;
    let worker = Worker::new(&storage, &bucket, WorkerConfig::from(&config));

    if once {
        match worker.run_once().await? {
            Some(outcome) => match outcome.status {
                JobStatus::Succeeded => {
                    println!("Job {} succeeded: {} lines", outcome.job_id, outcome.lines);
                }
                _ => {
                    println!(
                        "Job {} failed: {}",
                        outcome.job_id,
                        outcome.error.unwrap_or_default()
                    );
                }
            },
            None => println!("No queued jobs."),
        }
        return Ok(());
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    };

    let stats = worker.run(shutdown).await?;
    println!(
        "Worker stopped: {} succeeded, {} failed",
        stats.succeeded, stats.failed
    );
    Ok(())
}

async fn cmd_list(user: Option<String>, json: bool) -> Result<()> {
    let config = load_config()?;
    let owner_id = require_user(user, &config)?;
    let storage = open_storage_readonly(&config).await?;

    let filings = storage.list_filings(&owner_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&filings)?);
        return Ok(());
    }

    if filings.is_empty() {
        println!("No filings yet.");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<10} {:<8} FILE", "ID", "SUBMITTED", "RCS", "YEAR");
    for filing in &filings {
        println!(
            "{:<38} {:<20} {:<10} {:<8} {}",
            filing.id,
            filing.created_at.format("%Y-%m-%d %H:%M:%S"),
            filing.metadata.rcs_number.as_deref().unwrap_or("-"),
            filing
                .metadata
                .fiscal_year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "-".into()),
            filing.file_name,
        );
    }
    Ok(())
}

async fn cmd_show(user: Option<String>, filing_id: &str, json: bool) -> Result<()> {
    let config = load_config()?;
    let owner_id = require_user(user, &config)?;
    let storage = open_storage_readonly(&config).await?;

    // Owner scoping: another user's filing is indistinguishable from a missing one.
    let filing = storage
        .get_filing(&owner_id, filing_id)
        .await?
        .ok_or_else(|| FilingDeskError::NotFound(format!("filing {filing_id}")))?;
    let job = storage.latest_job_for_filing(&filing.id).await?;
    let lines = storage.list_statement_lines(&filing.id).await?;

    if json {
        let view = serde_json::json!({
            "filing": filing,
            "job": job,
            "lines": lines,
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!();
    println!("  Filing:    {}", filing.id);
    println!("  File:      {}", filing.file_name);
    println!("  Submitted: {}", filing.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(name) = &filing.metadata.company_name {
        println!("  Company:   {name}");
    }
    if let Some(rcs) = &filing.metadata.rcs_number {
        println!("  RCS:       {rcs}");
    }
    match &job {
        Some(job) => {
            println!("  Job:       {} ({})", job.id, job.status);
            if let Some(error) = &job.error {
                println!("  Error:     {error}");
            }
        }
        None => println!("  Job:       none"),
    }
    println!();

    if lines.is_empty() {
        println!("  No statement lines extracted yet.");
    } else {
        for stored in &lines {
            print_line(stored);
        }
    }
    println!();
    Ok(())
}

fn print_line(stored: &StoredLine) {
    let line = &stored.line;
    let value = line
        .value
        .map(|v| format!("{v:>18.2} {}", line.unit))
        .unwrap_or_else(|| format!("{:>18} {}", "-", line.unit));
    let period = match line.period {
        Period::Current => "current",
        Period::Previous => "previous",
    };
    let pages: Vec<String> = stored.anchors.iter().map(|a| format!("p{}", a.page)).collect();
    println!(
        "  {:<14} {:<30} {:<9} {value}  {:<10} {}",
        line.statement_type.as_str(),
        line.caption,
        period,
        line.status.as_str(),
        pages.join(",")
    );
}

fn require_user(user: Option<String>, config: &AppConfig) -> Result<String> {
    let owner_id = acting_user(user, config);
    if owner_id.trim().is_empty() {
        return Err(FilingDeskError::Unauthorized(
            "no acting user; pass --user or set FILINGDESK_USER".into(),
        )
        .into());
    }
    Ok(owner_id)
}

fn cmd_reference(kind: ReferenceKind) -> Result<()> {
    match kind {
        ReferenceKind::LegalForms => {
            for form in legal_forms() {
                println!("{:<8} {}", form.code, form.label);
            }
        }
        ReferenceKind::Countries => {
            for country in countries() {
                println!("{:<4} {}", country.code, country.name);
            }
        }
        ReferenceKind::FiscalYears => {
            for year in fiscal_year_options(Utc::now().year()) {
                println!("{year}");
            }
        }
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}
