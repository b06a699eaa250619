// src/config.rs

//! Run-wide tunables.
//!
//! `Settings` is plain data. The command line fills it from flags and
//! `SWEEP_*` environment variables, then asks it to build the runtime pieces.

use std::sync::Arc;
use std::time::Duration;

use crate::core::checker::clone_probe::{CloneProbe, DEFAULT_CLONE_TIMEOUT, GitCloneProbe};
use crate::core::checker::runner::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_TARGET_BUDGET};
use crate::core::domains::StreamOptions;
use crate::core::fetch::{DEFAULT_STREAM_IDLE_TIMEOUT, ReqwestFetcher, RetryPolicy};
use crate::core::generator::GeneratorConfig;
use crate::core::orchestrator::ScanSettings;
use crate::core::queue::{BoundedQueue, DEFAULT_CONCURRENCY};
use crate::error::{ConfigError, FetchError};

pub const DEFAULT_USER_AGENT: &str = concat!("SurfaceSweep/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct Settings {
    /// Targets checked at the same time.
    pub concurrency: usize,
    pub request_timeout: Duration,
    /// Wall-clock budget for all fetches of one target.
    pub target_budget: Duration,
    pub queue_high: usize,
    pub queue_resume: usize,
    pub generator_high: u64,
    pub generator_low: u64,
    pub emit_delay: Duration,
    pub poll_interval: Duration,
    pub file_concurrency: usize,
    pub retry: RetryPolicy,
    pub progress_every: u64,
    pub probe_clone: bool,
    pub clone_timeout: Duration,
    /// Longest gap between two chunks of an archive download.
    pub stream_idle_timeout: Duration,
    pub accept_invalid_certs: bool,
    pub user_agent: String,
    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let scan = ScanSettings::default();
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            target_budget: DEFAULT_TARGET_BUDGET,
            queue_high: scan.queue_high,
            queue_resume: scan.queue_resume,
            generator_high: scan.generator_high,
            generator_low: scan.generator_low,
            emit_delay: scan.generator.emit_delay,
            poll_interval: Duration::from_secs(1),
            file_concurrency: StreamOptions::default().file_concurrency,
            retry: RetryPolicy::default(),
            progress_every: scan.progress_every,
            probe_clone: false,
            clone_timeout: DEFAULT_CLONE_TIMEOUT,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
            accept_invalid_certs: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            verbose: false,
        }
    }
}

impl Settings {
    /// Rejects combinations that would stall or spin a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        };
        if self.concurrency == 0 {
            return Err(invalid("concurrency", "must be greater than zero"));
        }
        if self.file_concurrency == 0 {
            return Err(invalid("file-concurrency", "must be greater than zero"));
        }
        if self.queue_resume > self.queue_high {
            return Err(invalid("queue-resume", "must not exceed queue-high"));
        }
        if self.generator_low > self.generator_high {
            return Err(invalid("generator-low", "must not exceed generator-high"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry-attempts", "must be greater than zero"));
        }
        if self.stream_idle_timeout.is_zero() {
            return Err(invalid("stream-idle-timeout", "must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll-interval", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            queue_high: self.queue_high,
            queue_resume: self.queue_resume,
            generator_high: self.generator_high,
            generator_low: self.generator_low,
            generator: GeneratorConfig {
                emit_delay: self.emit_delay,
                pause_poll: self.poll_interval,
                ..GeneratorConfig::default()
            },
            progress_every: self.progress_every,
            verbose: self.verbose,
        }
    }

    pub fn stream_options(&self, skip: usize) -> StreamOptions {
        StreamOptions {
            skip,
            file_concurrency: self.file_concurrency,
            retry: self.retry,
        }
    }

    pub fn queue(&self) -> BoundedQueue {
        BoundedQueue::new(self.concurrency, self.poll_interval)
    }

    pub fn fetcher(&self) -> Result<ReqwestFetcher, FetchError> {
        ReqwestFetcher::new(&self.user_agent, self.accept_invalid_certs, self.stream_idle_timeout)
    }

    /// The `git clone` probe, when enabled.
    pub fn clone_probe(&self) -> Option<Arc<dyn CloneProbe>> {
        if !self.probe_clone {
            return None;
        }
        let probe: Arc<dyn CloneProbe> = Arc::new(GitCloneProbe::new(self.clone_timeout));
        Some(probe)
    }
}
