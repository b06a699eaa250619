// src/cli.rs

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::config::Settings;
use crate::core::checker::DEFAULT_CHECKS;
use crate::core::fetch::RetryPolicy;
use crate::core::models::{Ipv4Range, parse_ipv4};
use crate::core::store::DEFAULT_URL_BATCH;
use crate::error::ConfigError;

pub const DEFAULT_STORE: &str = "file://./sweep-data";

#[derive(Parser, Debug)]
#[command(name = "sweep", version)]
#[command(about = "Sweeps the IPv4 space and Common Crawl origins for exposed resources.")]
pub struct CommandLine {
    #[command(flatten)]
    pub tuning: Tuning,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run checkers against targets and store the findings
    #[command(subcommand)]
    Scan(ScanCommand),
    /// Collect origins into target stores without checking them
    #[command(subcommand)]
    Import(ImportCommand),
    /// Split a future run into batches
    #[command(subcommand)]
    Prepare(PrepareCommand),
    /// List Common Crawl datasets, newest first
    Datasets,
}

#[derive(Subcommand, Debug)]
pub enum ScanCommand {
    /// Check http://<ip> for every address of a range
    Ipv4 {
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        checks: CheckArgs,
        #[command(flatten)]
        stores: StoreArgs,
    },
    /// Check every origin found in Common Crawl archives
    #[command(name = "commoncrawl")]
    CommonCrawl {
        #[command(flatten)]
        source: CrawlArgs,
        #[command(flatten)]
        checks: CheckArgs,
        #[command(flatten)]
        stores: StoreArgs,
    },
    /// Check origins previously imported into a store
    Datastore {
        /// Store read for targets; findings are written back to it
        #[arg(long)]
        store: String,
        #[arg(long, default_value_t = 0)]
        skip: u64,
        #[arg(long)]
        read: Option<u64>,
        #[command(flatten)]
        checks: CheckArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum ImportCommand {
    /// Probe every address of a range and import the live origins
    Ipv4 {
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        stores: StoreArgs,
    },
    /// Import every origin found in Common Crawl archives
    #[command(name = "commoncrawl")]
    CommonCrawl {
        #[command(flatten)]
        source: CrawlArgs,
        #[command(flatten)]
        stores: StoreArgs,
        #[arg(long, env = "SWEEP_BATCH_SIZE", default_value_t = DEFAULT_URL_BATCH)]
        batch_size: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum PrepareCommand {
    #[command(subcommand)]
    Import(PrepareImport),
    #[command(subcommand)]
    Scan(PrepareScan),
}

#[derive(Subcommand, Debug)]
pub enum PrepareImport {
    /// Print contiguous ranges covering the whole IPv4 space
    Ipv4 {
        #[arg(long)]
        split_into_batches: u32,
    },
    /// Write the archive file list of a dataset, optionally chunked
    #[command(name = "commoncrawl")]
    CommonCrawl {
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        split_list_every: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
pub enum PrepareScan {
    /// Print record windows covering the origins of a store
    Datastore {
        #[arg(long)]
        store: String,
        #[arg(long)]
        split_into_batches: u64,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RangeArgs {
    #[arg(long, value_parser = parse_ipv4, default_value = "0.0.0.0")]
    pub from: Ipv4Addr,
    #[arg(long, value_parser = parse_ipv4, default_value = "255.255.255.255")]
    pub to: Ipv4Addr,
}

impl RangeArgs {
    pub fn range(&self) -> Result<Ipv4Range, ConfigError> {
        Ipv4Range::new(self.from, self.to).map_err(|e| ConfigError::Invalid {
            field: "from/to".to_string(),
            reason: e.to_string(),
        })
    }
}

/// Where Common Crawl origins come from: a whole dataset or a prepared file list.
#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("crawl-source").required(true).args(["dataset", "from_batch_file"])))]
pub struct CrawlArgs {
    /// Dataset id, or `latest`
    #[arg(long, conflicts_with = "from_batch_file")]
    pub dataset: Option<String>,
    /// File list written by `prepare import commoncrawl`
    #[arg(long)]
    pub from_batch_file: Option<PathBuf>,
    /// Batch of the file list to stream
    #[arg(long, requires = "from_batch_file", conflicts_with = "dataset")]
    pub batch_id: Option<usize>,
    /// Archive files to skip before streaming
    #[arg(long, default_value_t = 0)]
    pub skip: usize,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Checkers to run, by name
    #[arg(long = "check", value_delimiter = ',', default_values_t = DEFAULT_CHECKS.iter().map(|c| c.to_string()))]
    pub checks: Vec<String>,
    /// Also try `git clone` on exposed repositories
    #[arg(long, env = "SWEEP_PROBE_CLONE")]
    pub probe_clone: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Store URI (`file://<dir>` or `memory://`); repeat for several
    #[arg(long = "store", default_value = DEFAULT_STORE)]
    pub stores: Vec<String>,
}

/// Run-wide tunables. Unset values keep their defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct Tuning {
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[arg(long, global = true, env = "SWEEP_CONCURRENCY")]
    pub concurrency: Option<usize>,
    #[arg(long, global = true, env = "SWEEP_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,
    #[arg(long, global = true, env = "SWEEP_TARGET_BUDGET_MS")]
    pub target_budget_ms: Option<u64>,
    #[arg(long, global = true, env = "SWEEP_QUEUE_HIGH")]
    pub queue_high: Option<usize>,
    #[arg(long, global = true, env = "SWEEP_QUEUE_RESUME")]
    pub queue_resume: Option<usize>,
    #[arg(long, global = true, env = "SWEEP_GENERATOR_HIGH")]
    pub generator_high: Option<u64>,
    #[arg(long, global = true, env = "SWEEP_GENERATOR_LOW")]
    pub generator_low: Option<u64>,
    #[arg(long, global = true, env = "SWEEP_EMIT_DELAY_MS")]
    pub emit_delay_ms: Option<u64>,
    #[arg(long, global = true, env = "SWEEP_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,
    #[arg(long, global = true, env = "SWEEP_FILE_CONCURRENCY")]
    pub file_concurrency: Option<usize>,
    #[arg(long, global = true, env = "SWEEP_RETRY_ATTEMPTS")]
    pub retry_attempts: Option<u32>,
    #[arg(long, global = true, env = "SWEEP_RETRY_DELAY_MS")]
    pub retry_delay_ms: Option<u64>,
    #[arg(long, global = true, env = "SWEEP_PROGRESS_EVERY")]
    pub progress_every: Option<u64>,
    #[arg(long, global = true, env = "SWEEP_CLONE_TIMEOUT_SECS")]
    pub clone_timeout_secs: Option<u64>,
    /// Abort an archive download that delivers nothing for this long
    #[arg(long, global = true, env = "SWEEP_STREAM_IDLE_TIMEOUT_MS")]
    pub stream_idle_timeout_ms: Option<u64>,
    /// Reject invalid TLS certificates instead of ignoring them
    #[arg(long, global = true, env = "SWEEP_VERIFY_TLS")]
    pub verify_tls: bool,
    #[arg(long, global = true, env = "SWEEP_USER_AGENT")]
    pub user_agent: Option<String>,
}

impl Tuning {
    pub fn settings(&self) -> Settings {
        let defaults = Settings::default();
        let millis = Duration::from_millis;
        Settings {
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            request_timeout: self.request_timeout_ms.map(millis).unwrap_or(defaults.request_timeout),
            target_budget: self.target_budget_ms.map(millis).unwrap_or(defaults.target_budget),
            queue_high: self.queue_high.unwrap_or(defaults.queue_high),
            queue_resume: self.queue_resume.unwrap_or(defaults.queue_resume),
            generator_high: self.generator_high.unwrap_or(defaults.generator_high),
            generator_low: self.generator_low.unwrap_or(defaults.generator_low),
            emit_delay: self.emit_delay_ms.map(millis).unwrap_or(defaults.emit_delay),
            poll_interval: self.poll_interval_ms.map(millis).unwrap_or(defaults.poll_interval),
            file_concurrency: self.file_concurrency.unwrap_or(defaults.file_concurrency),
            retry: RetryPolicy {
                max_attempts: self.retry_attempts.unwrap_or(defaults.retry.max_attempts),
                base_delay: self.retry_delay_ms.map(millis).unwrap_or(defaults.retry.base_delay),
            },
            progress_every: self.progress_every.unwrap_or(defaults.progress_every),
            probe_clone: defaults.probe_clone,
            clone_timeout: self
                .clone_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.clone_timeout),
            stream_idle_timeout: self
                .stream_idle_timeout_ms
                .map(millis)
                .unwrap_or(defaults.stream_idle_timeout),
            accept_invalid_certs: !self.verify_tls,
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            verbose: self.verbose,
        }
    }
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
