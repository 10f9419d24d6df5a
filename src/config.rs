//! Configuration for the MX sweep pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Input configuration
    #[serde(default)]
    pub input: InputConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Resolver configuration
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Input CSV configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// CSV file of `name,popularity` rows, with a header line
    #[serde(default)]
    pub path: String,

    /// Bytes sampled for delimiter detection
    #[serde(default = "default_sniff_bytes")]
    pub sniff_bytes: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            sniff_bytes: default_sniff_bytes(),
        }
    }
}

/// Report configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// CSV report of `name,popularity` rows
    #[serde(default = "default_report_path")]
    pub report_path: String,

    /// Outcome labels written to the report
    #[serde(default = "default_report_outcomes")]
    pub report_outcomes: Vec<String>,

    /// Optional path to save run stats as JSON
    #[serde(default)]
    pub stats_path: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            report_path: default_report_path(),
            report_outcomes: default_report_outcomes(),
            stats_path: None,
        }
    }
}

/// Upstream DNS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Nameservers as `ip` or `ip:port`.
    /// Empty means the system resolver configuration.
    #[serde(default)]
    pub nameservers: Vec<String>,

    /// Per-query timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts per query
    #[serde(default = "default_attempts")]
    pub attempts: usize,
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            nameservers: Vec::new(),
            timeout_ms: default_timeout_ms(),
            attempts: default_attempts(),
        }
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Resolver replicas per nameserver
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the reader → resolver channel
    #[serde(default = "default_buffer")]
    pub source_buffer: usize,

    /// Capacity of the resolver → writer channel
    #[serde(default = "default_buffer")]
    pub result_buffer: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Enable the progress monitor
    #[serde(default = "default_true")]
    pub enable_monitor: bool,

    /// Monitor polling interval in milliseconds
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Stop the whole run on the first worker failure
    #[serde(default)]
    pub abort_on_worker_failure: bool,
}

impl ProcessingConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            source_buffer: 65536,
            result_buffer: 65536,
            worker_threads: None,
            enable_monitor: true,
            monitor_interval_ms: 1000,
            abort_on_worker_failure: false,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input.path.trim().is_empty() {
            anyhow::bail!("Input path must be set");
        }
        if self.input.sniff_bytes == 0 {
            anyhow::bail!("Sniff sample size must be > 0");
        }
        if self.output.report_path.trim().is_empty() {
            anyhow::bail!("Report path must be set");
        }
        if self.processing.workers == 0 {
            anyhow::bail!("Workers must be > 0");
        }
        if self.processing.source_buffer == 0 || self.processing.result_buffer == 0 {
            anyhow::bail!("Channel buffers must be > 0");
        }
        if self.processing.monitor_interval_ms == 0 {
            anyhow::bail!("Monitor interval must be > 0");
        }
        if self.resolver.timeout_ms == 0 {
            anyhow::bail!("Resolver timeout must be > 0");
        }
        if self.resolver.attempts == 0 {
            anyhow::bail!("Resolver attempts must be > 0");
        }
        for ns in &self.resolver.nameservers {
            crate::transform::parse_target(ns)?;
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_sniff_bytes() -> usize { 2048 }
fn default_report_path() -> String { "report.csv".to_string() }
fn default_report_outcomes() -> Vec<String> { vec![crate::domain::outcome::NXDOMAIN.to_string()] }
fn default_timeout_ms() -> u64 { 5000 }
fn default_attempts() -> usize { 1 }
fn default_workers() -> usize { 1 }
fn default_buffer() -> usize { 65536 }
fn default_true() -> bool { true }
fn default_monitor_interval_ms() -> u64 { 1000 }
