//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use salesetl_core::{ProgressReporter, RunSummary, Stage};
use salesetl_shared::{
    AppConfig, DataLayout, RunConfig, init_config, load_config, load_config_from,
    validate_config,
};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// salesetl: Northwind sales ETL into layered parquet.
#[derive(Parser)]
#[command(
    name = "salesetl",
    version,
    about = "Extract, clean, model and aggregate the Northwind sales dataset.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.salesetl/salesetl.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Pipeline stage selectable from the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum StageArg {
    Extract,
    Load,
    Transform,
    Build,
    All,
}

impl From<StageArg> for Stage {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Extract => Stage::Extract,
            StageArg::Load => Stage::Load,
            StageArg::Transform => Stage::Transform,
            StageArg::Build => Stage::Build,
            StageArg::All => Stage::All,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the pipeline up to a stage.
    Run {
        /// Last stage to run; upstream stages always run first.
        #[arg(long, value_enum, default_value = "all")]
        stage: StageArg,

        /// Exclude the optional products table.
        #[arg(long)]
        no_products: bool,

        /// Use only raw files already on disk.
        #[arg(long)]
        offline: bool,

        /// Root data directory.
        #[arg(long, env = "SALESETL_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },

    /// Show recent data-quality runs.
    Dq {
        /// Number of runs to list.
        #[arg(long, default_value = "10")]
        limit: usize,

        /// Root data directory.
        #[arg(long, env = "SALESETL_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Create the default config file.
    Init,
    /// Print the effective configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "salesetl=info",
        1 => "salesetl=debug",
        _ => "salesetl=trace",
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
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            stage,
            no_products,
            offline,
            data_dir,
        } => {
            let mut config = read_config(config_path)?;
            if let Some(dir) = data_dir {
                config.paths.data_dir = dir.to_string_lossy().into_owned();
            }
            if no_products {
                config.pipeline.include_products = false;
            }
            if offline {
                config.source.auto_download = false;
            }
            validate_config(&config)?;
            cmd_run(&config, stage.into()).await
        }
        Command::Dq { limit, data_dir } => {
            let config = read_config(config_path)?;
            let root = data_dir.unwrap_or_else(|| PathBuf::from(&config.paths.data_dir));
            cmd_dq(&root, limit)
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn read_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig, stage: Stage) -> Result<()> {
    let mut run_config = RunConfig::from(config);
    run_config.tool_version = env!("CARGO_PKG_VERSION").to_string();

    info!(
        %stage,
        data_dir = %run_config.data_dir.display(),
        include_products = run_config.include_products,
        "running pipeline"
    );

    let reporter = CliProgress::new();
    let summary = salesetl_core::run(&run_config, stage, &reporter).await?;

    println!();
    println!("  Pipeline finished (stage: {})", summary.stage);
    println!("  Raw files:  {}", summary.raw_files.join(", "));
    if !summary.downloaded.is_empty() {
        println!("  Downloaded: {}", summary.downloaded.join(", "));
    }
    for (table, rows) in &summary.tables {
        println!("  {table:<28} {rows:>8} rows");
    }
    if let Some(dq) = &summary.dq {
        println!("  DQ:         {} ({} issues)", dq.status, dq.issues.len());
        for issue in &dq.issues {
            println!("    - {issue}");
        }
    }
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();

    Ok(())
}

fn cmd_dq(data_dir: &Path, limit: usize) -> Result<()> {
    let layout = DataLayout::new(data_dir);
    let runs = salesetl_quality::read_dq_runs(&layout.dq_dir())?;

    if runs.is_empty() {
        println!("No DQ runs recorded under {}", layout.dq_dir().display());
        return Ok(());
    }

    println!("{:<30} {:<6} {:>6}", "run_ts", "status", "issues");
    for run in runs.iter().rev().take(limit) {
        println!("{:<30} {:<6} {:>6}", run.run_ts, run.status, run.issues.len());
    }

    if let Some(latest) = runs.last() {
        if !latest.issues.is_empty() {
            println!();
            println!("Issues in latest run ({}):", latest.run_ts);
            for issue in &latest.issues {
                println!("  - {issue}");
            }
        }
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = read_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
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
    fn run_flags_parse() {
        let cli = Cli::parse_from([
            "salesetl",
            "run",
            "--stage",
            "load",
            "--no-products",
            "--offline",
            "--data-dir",
            "/tmp/nw",
        ]);
        match cli.command {
            Command::Run {
                stage,
                no_products,
                offline,
                data_dir,
            } => {
                assert_eq!(Stage::from(stage), Stage::Load);
                assert!(no_products);
                assert!(offline);
                assert_eq!(data_dir, Some(PathBuf::from("/tmp/nw")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["salesetl", "dq", "--limit", "3", "-vv", "--log-format", "json"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert!(matches!(cli.command, Command::Dq { limit: 3, .. }));
    }
}
