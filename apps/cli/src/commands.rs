//! CLI definition, tracing setup, and the run entry point.

use std::path::PathBuf;

use chrono::Datelike;
use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use csrledger_core::{ProgressReporter, RunSummary, SilentProgress, bootstrap};
use csrledger_shared::{AppConfig, EntityId, Outcome, init_config, load_config, load_config_from};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// csrledger: fill the gaps in a per-year sustainability report ledger.
#[derive(Parser)]
#[command(
    name = "csrledger",
    version,
    about = "Locate missing sustainability reports for every tracked entity and archive them.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.csrledger/csrledger.toml).
    #[arg(long, env = "CSRLEDGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write a default config file and exit.
    #[arg(long)]
    pub init_config: bool,

    /// Disable the progress spinner.
    #[arg(long)]
    pub quiet: bool,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "csrledger=info",
        1 => "csrledger=debug",
        _ => "csrledger=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Run the CLI.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if cli.init_config {
        let path = init_config()?;
        println!("Config initialized at: {}", path.display());
        return Ok(());
    }

    let config = resolve_config(cli.config.as_deref())?;
    let current_year = chrono::Utc::now().year();

    info!(current_year, "starting csrledger run");

    // Either backend unreachable ends the run here with a non-zero exit
    let runtime = bootstrap(config)
        .await
        .wrap_err("startup failed")?;

    let summary = if cli.quiet {
        runtime.run(current_year, &SilentProgress).await?
    } else {
        let reporter = CliProgress::new();
        runtime.run(current_year, &reporter).await?
    };

    print_summary(&summary);
    info!(
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "csrledger run completed"
    );
    Ok(())
}

fn resolve_config(path: Option<&std::path::Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)
            .wrap_err_with(|| format!("cannot load config {}", path.display()))?,
        None => load_config()?,
    };
    Ok(config)
}

fn print_summary(summary: &RunSummary) {
    let pass = &summary.population;
    let refresh = &summary.refresh;

    println!();
    println!("  Population pass ({})", pass.run_id);
    println!("  Processed:          {}", pass.processed);
    println!("  Processed w/ gaps:  {}", pass.processed_with_gaps);
    println!("  Errored:            {}", pass.errored);
    println!("  Pending:            {}", pass.pending);
    if pass.pruned > 0 {
        println!("  Pruned from tracker: {}", pass.pruned);
    }
    println!(
        "  Archived:           {} ({} failed)",
        pass.uploaded, pass.upload_failures
    );
    if let Some((path, count)) = &summary.snapshot {
        println!("  Snapshot:           {count} records → {}", path.display());
    }
    println!();
    println!("  Refresh pass");
    println!("  Checked:            {}", refresh.checked);
    println!("  Resolved:           {}", refresh.resolved);
    println!("  Still missing:      {}", refresh.still_missing);
    println!("  Already current:    {}", refresh.skipped);
    println!("  Errored:            {}", refresh.errored);
    println!();
    println!("  Time:               {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn entity_started(&self, id: &EntityId, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Reconciling [{current}/{total}] {id}"));
    }

    fn entity_finished(&self, id: &EntityId, outcome: Outcome) {
        if outcome == Outcome::Error {
            self.spinner.println(format!("  ✗ {id}: reconciliation failed"));
        }
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn runs_without_flags() {
        let cli = Cli::try_parse_from(["csrledger"]).expect("parse");
        assert!(!cli.init_config);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn parses_flags() {
        let cli = Cli::try_parse_from([
            "csrledger",
            "--config",
            "ops/csrledger.toml",
            "-vv",
            "--log-format",
            "json",
        ])
        .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("ops/csrledger.toml")));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.log_format, LogFormat::Json));
    }

    #[test]
    fn rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["csrledger", "add", "x"]).is_err());
    }
}
