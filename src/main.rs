//! MX Sweep CLI
//!
//! Resolve MX records for a domain list and report the dead ones.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mx_sweep::{build_runtime, run_pipeline, Config, StopController};

#[derive(Parser)]
#[command(name = "mx-sweep")]
#[command(about = "Resolve MX records for a domain list and report failures", long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a domain file
    Process {
        /// CSV file of `name,popularity` rows with a header line
        domain_file: Option<PathBuf>,

        /// Comma-separated nameservers (`ip` or `ip:port`)
        #[arg(long, value_delimiter = ',')]
        nameservers: Vec<String>,

        /// Resolver replicas per nameserver
        #[arg(short, long)]
        workers: Option<usize>,

        /// Debug logging; disables the progress monitor
        #[arg(long)]
        debug: bool,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let debug = matches!(cli.command, Commands::Process { debug: true, .. });
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    match cli.command {
        Commands::Process {
            domain_file,
            nameservers,
            workers,
            debug,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let config = apply_overrides(config, domain_file, nameservers, workers, debug);
            process_command(config)?;
        }

        Commands::Validate => {
            validate_command(cli.config.as_ref())?;
        }

        Commands::GenerateConfig { output } => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

fn apply_overrides(
    mut config: Config,
    domain_file: Option<PathBuf>,
    nameservers: Vec<String>,
    workers: Option<usize>,
    debug: bool,
) -> Config {
    if let Some(path) = domain_file {
        config.input.path = path.display().to_string();
    }
    if !nameservers.is_empty() {
        config.resolver.nameservers = nameservers;
    }
    if let Some(w) = workers {
        config.processing.workers = w;
    }
    if debug {
        config.processing.enable_monitor = false;
    }
    config
}

fn process_command(config: Config) -> Result<()> {
    config.validate()?;

    let runtime = build_runtime(config.processing.worker_threads)?;
    runtime.block_on(async {
        let stop = StopController::new();
        let signal = stop.signal();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping the reader; queued domains will still be resolved and reported");
                stop.stop();
            }
        });
        run_pipeline(config, signal).await
    })?;

    Ok(())
}

fn validate_command(config_path: Option<&PathBuf>) -> Result<()> {
    let Some(path) = config_path else {
        anyhow::bail!("validate requires --config");
    };
    let config = Config::from_file(path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let yaml = r#"# MX Sweep Configuration

# === INPUT: Domain list ===
input:
  # CSV with a header line, then `name,popularity` rows
  path: "domains.csv"

  # Bytes sampled to detect the delimiter (, ; tab |)
  sniff_bytes: 2048

# === OUTPUT: Report ===
output:
  # Domains whose outcome is listed below are written here
  report_path: "report.csv"

  # Outcomes to report: OK, NXDOMAIN, NoAnswer, Timeout, NoNameservers, Error
  report_outcomes: ["NXDOMAIN"]

  # Save run statistics as JSON
  # stats_path: "stats.json"

# === RESOLVER: Upstream nameservers ===
resolver:
  # `ip` or `ip:port`; leave empty to use the system configuration
  nameservers: []

  # Per-query timeout in milliseconds
  timeout_ms: 5000

  # Attempts per query
  attempts: 1

# === PROCESSING: Concurrency ===
processing:
  # Resolver replicas per nameserver
  workers: 1

  # Channel capacities (reader -> resolvers, resolvers -> writer)
  source_buffer: 65536
  result_buffer: 65536

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 8

  # Log progress while running
  enable_monitor: true
  monitor_interval_ms: 1000

  # Stop everything when a single worker fails
  abort_on_worker_failure: false
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["mx-sweep"]).is_err());
    }

    #[test]
    fn test_cli_parse_process() {
        let cli = Cli::try_parse_from([
            "mx-sweep",
            "process",
            "domains.csv",
            "--nameservers",
            "8.8.8.8,1.1.1.1",
            "--workers",
            "4",
            "--debug",
        ])
        .unwrap();

        let Commands::Process {
            domain_file,
            nameservers,
            workers,
            debug,
        } = cli.command
        else {
            panic!("expected process command");
        };
        assert_eq!(domain_file, Some(PathBuf::from("domains.csv")));
        assert_eq!(nameservers, vec!["8.8.8.8", "1.1.1.1"]);
        assert_eq!(workers, Some(4));
        assert!(debug);
    }

    #[test]
    fn test_cli_parse_with_config() {
        let cli = Cli::try_parse_from(["mx-sweep", "process", "-c", "other.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("other.yaml")));
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["mx-sweep", "validate", "-c", "test.json"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_overrides_win_over_config() {
        let mut config = Config::default();
        config.input.path = "from-file.csv".to_string();
        config.resolver.nameservers = vec!["9.9.9.9".to_string()];

        let config = apply_overrides(
            config,
            Some(PathBuf::from("cli.csv")),
            vec!["8.8.8.8".to_string()],
            Some(3),
            true,
        );
        assert_eq!(config.input.path, "cli.csv");
        assert_eq!(config.resolver.nameservers, vec!["8.8.8.8".to_string()]);
        assert_eq!(config.processing.workers, 3);
        assert!(!config.processing.enable_monitor);
    }

    #[test]
    fn test_generated_config_is_valid() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        generate_config_command(path.clone()).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.output.report_outcomes, vec!["NXDOMAIN".to_string()]);
    }
}
