//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use leadscout_core::{
    Orchestrator, ProgressEvent, ProgressSink, RunReport, RunRequest, restore_usage, spawn_run,
};
use leadscout_governor::Governor;
use leadscout_shared::{
    AppConfig, CapabilityProfile, SearchRequest, ServiceOffering, SessionId, SubscriptionTier,
    expand_home, init_config, load_config, load_config_from,
};
use leadscout_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// LeadScout: find and rank contractor leads from public listing sources.
#[derive(Parser)]
#[command(
    name = "leadscout",
    version,
    about = "Find, qualify, and rank contractor leads from public listing sources.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.leadscout/leadscout.toml.
    #[arg(long, global = true, env = "LEADSCOUT_CONFIG")]
    pub config: Option<PathBuf>,

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
    /// Run one lead discovery search.
    Search(SearchArgs),

    /// Show the leads stored for a past search session.
    Leads {
        /// Search session id printed by `search`.
        #[arg(long)]
        session: String,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show the progress record for a tracking id.
    Status {
        /// Tracking id passed to `search --tracking-id`.
        tracking_id: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
pub(crate) struct SearchArgs {
    /// Geography to search, e.g. "Austin, TX". Defaults to the profile's service area.
    #[arg(short, long)]
    pub geography: Option<String>,

    /// Category to search (repeatable). Defaults to every service in the profile.
    #[arg(short, long = "category")]
    pub categories: Vec<String>,

    /// Categories the contractor treats as primary (repeatable).
    #[arg(long = "primary")]
    pub primary: Vec<String>,

    /// Capability profile TOML file. Flags fill in a profile when omitted.
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Account the run is charged to.
    #[arg(long, default_value = "local")]
    pub account: String,

    /// Subscription tier, used when no profile file is given.
    #[arg(long, default_value = "scale")]
    pub tier: SubscriptionTier,

    /// Contractor's minimum project value in dollars.
    #[arg(long)]
    pub min_value: Option<f64>,

    /// Maximum number of leads returned.
    #[arg(short = 'n', long)]
    pub max_results: Option<usize>,

    /// Tracking id for the polling progress record.
    #[arg(long)]
    pub tracking_id: Option<String>,

    /// Wall-clock ceiling in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print the full report as JSON.
    #[arg(long)]
    pub json: bool,
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
        0 => "leadscout=info",
        1 => "leadscout=debug",
        _ => "leadscout=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    let config = || -> Result<AppConfig> {
        Ok(match &config_path {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        })
    };

    match cli.command {
        Command::Search(args) => cmd_search(config()?, args).await,
        Command::Leads { session, json } => cmd_leads(&config()?, &session, json).await,
        Command::Status { tracking_id } => cmd_status(&config()?, &tracking_id).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config()?).await,
        },
    }
}

// ---------------------------------------------------------------------------
// search
// ---------------------------------------------------------------------------

async fn cmd_search(config: AppConfig, args: SearchArgs) -> Result<()> {
    let profile = build_profile(&args)?;
    let search = SearchRequest {
        geography: args.geography.clone().unwrap_or_default(),
        categories: args.categories.clone(),
        max_results: args.max_results.unwrap_or(config.defaults.max_results),
        session_tracking_id: args.tracking_id.clone(),
    };

    let db_path = database_path(&config)?;
    let storage = Arc::new(Storage::open(&db_path).await?);
    let governor = Arc::new(Governor::new(config.governor.clone()));
    restore_usage(&governor, &storage, &args.account).await?;

    let mut orchestrator = Orchestrator::new(&config, governor, storage)?;
    if let Some(secs) = args.timeout {
        orchestrator = orchestrator.with_timeout(Duration::from_secs(secs));
    }

    info!(
        account = %args.account,
        geography = %search.geography,
        categories = ?search.categories,
        "starting search"
    );

    let progress = Arc::new(CliProgress::new(!args.json));
    let handle = spawn_run(
        Arc::new(orchestrator),
        RunRequest {
            account_id: args.account.clone(),
            profile,
            search,
        },
        progress.clone(),
    );

    let token = handle.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current source");
            token.cancel();
        }
    });

    let report = handle.join().await;
    progress.finish();
    let report = report?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    match &report.error {
        None => Ok(()),
        Some(e) => Err(eyre!("run ended as {}: {}", report.status(), e.message)),
    }
}

/// Profile from `--profile`, or assembled from the search flags.
fn build_profile(args: &SearchArgs) -> Result<CapabilityProfile> {
    let mut profile = match &args.profile {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| eyre!("cannot read profile {}: {e}", path.display()))?;
            toml::from_str::<CapabilityProfile>(&content)
                .map_err(|e| eyre!("invalid profile {}: {e}", path.display()))?
        }
        None => {
            let mut services: Vec<ServiceOffering> = args
                .primary
                .iter()
                .map(|c| ServiceOffering {
                    category: c.clone(),
                    primary: true,
                })
                .collect();
            for c in &args.categories {
                if !services.iter().any(|s| s.category.eq_ignore_ascii_case(c)) {
                    services.push(ServiceOffering {
                        category: c.clone(),
                        primary: false,
                    });
                }
            }
            CapabilityProfile {
                contractor_id: args.account.clone(),
                contractor_name: args.account.clone(),
                services,
                service_area: args.geography.clone().unwrap_or_default(),
                tier: args.tier,
                min_project_value: 0.0,
            }
        }
    };

    if let Some(min) = args.min_value {
        profile.min_project_value = min;
    }
    Ok(profile)
}

fn print_report(report: &RunReport) {
    println!();
    println!("  Session:  {}", report.session.id);
    println!("  Status:   {}", report.status());
    println!(
        "  Found:    {} candidates, {} duplicates, {} spam, {} below floor",
        report.metrics.candidates_found,
        report.metrics.duplicates_removed,
        report.metrics.spam_removed,
        report.metrics.below_floor_removed
    );
    println!(
        "  Quota:    {}/{} sessions this month",
        report.quota.monthly_used, report.quota.monthly_limit
    );
    for failure in &report.source_errors {
        println!("  Skipped:  {} ({})", failure.source_id, failure.error.message);
    }
    println!();

    for (i, lead) in report.leads.iter().enumerate() {
        println!(
            "  {:>2}. [{:>5.1}] {}",
            i + 1,
            lead.relevance_score,
            lead.title
        );
        println!(
            "      ${:.0}{} | {} | {} | {}",
            lead.estimated_value,
            if lead.value_confident { "" } else { " (est.)" },
            lead.category,
            lead.posted_text,
            lead.source_id
        );
        println!("      {}", lead.url);
    }
    if report.leads.is_empty() {
        println!("  No qualified leads.");
    }
    println!();
}

// ---------------------------------------------------------------------------
// leads / status
// ---------------------------------------------------------------------------

async fn cmd_leads(config: &AppConfig, session: &str, json: bool) -> Result<()> {
    let session_id: SessionId = session
        .parse()
        .map_err(|e| eyre!("invalid session id '{session}': {e}"))?;
    let storage = Storage::open_readonly(&database_path(config)?).await?;

    let record = storage
        .get_search_session(&session_id)
        .await?
        .ok_or_else(|| eyre!("no search session '{session}'"))?;
    let leads = storage.list_leads(&session_id).await?;

    if json {
        let leads: Vec<_> = leads
            .iter()
            .map(|s| {
                serde_json::json!({
                    "rank": s.rank,
                    "lead": s.lead,
                    "search_metadata": s.metadata,
                })
            })
            .collect();
        let out = serde_json::json!({ "session": record, "leads": leads });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  Session:    {}", record.id);
    println!("  Account:    {}", record.account_id);
    println!("  Geography:  {}", record.geography);
    println!("  Categories: {}", record.categories.join(", "));
    println!("  Status:     {}", record.status);
    println!("  Started:    {}", record.started_at.to_rfc3339());
    println!();
    for stored in &leads {
        println!(
            "  {:>2}. [{:>5.1}] {}  ${:.0}",
            stored.rank, stored.lead.relevance_score, stored.lead.title, stored.lead.estimated_value
        );
        println!("      {}", stored.lead.url);
    }
    if leads.is_empty() {
        println!("  No leads stored for this session.");
    }
    println!();
    Ok(())
}

async fn cmd_status(config: &AppConfig, tracking_id: &str) -> Result<()> {
    let storage = Storage::open_readonly(&database_path(config)?).await?;
    let record = storage
        .get_execution_session(tracking_id)
        .await?
        .ok_or_else(|| eyre!("no progress record for '{tracking_id}'"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn database_path(config: &AppConfig) -> Result<PathBuf> {
    Ok(expand_home(&config.defaults.database_path)?)
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new(visible: bool) -> Self {
        let spinner = if visible {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} [{pos:>3}%] {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.set_length(100);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

#[async_trait]
impl ProgressSink for CliProgress {
    async fn emit(&self, event: &ProgressEvent) {
        self.spinner.set_position(u64::from(event.percent));
        self.spinner.set_message(event.stage.clone());
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
