// src/core/models.rs

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{ConfigError, GeneratorError};

// --- Targets ---

/// One candidate to be checked: an IPv4 address or a normalized origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Address(Ipv4Addr),
    Origin(String),
}

impl Target {
    /// The `scheme://host` string the checkers are run against.
    pub fn origin(&self) -> String {
        match self {
            Target::Address(addr) => format!("http://{addr}"),
            Target::Origin(origin) => origin.clone(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Address(addr) => write!(f, "{addr}"),
            Target::Origin(origin) => f.write_str(origin),
        }
    }
}

/// An inclusive range of IPv4 addresses, validated so that `from <= to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Range {
    pub from: Ipv4Addr,
    pub to: Ipv4Addr,
}

#[allow(clippy::len_without_is_empty)]
impl Ipv4Range {
    pub fn new(from: Ipv4Addr, to: Ipv4Addr) -> Result<Self, GeneratorError> {
        if u32::from(from) > u32::from(to) {
            return Err(GeneratorError::InvalidRange {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(Self { from, to })
    }

    /// The whole IPv4 space, `0.0.0.0` to `255.255.255.255`.
    pub fn full() -> Self {
        Self {
            from: Ipv4Addr::UNSPECIFIED,
            to: Ipv4Addr::BROADCAST,
        }
    }

    /// Number of addresses in the range. Can reach 2^32, hence `u64`.
    pub fn len(&self) -> u64 {
        u64::from(u32::from(self.to)) - u64::from(u32::from(self.from)) + 1
    }

    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + use<> {
        let start: u32 = self.from.into();
        let end: u32 = self.to.into();
        (start..=end).map(Ipv4Addr::from)
    }
}

/// Parses a dotted-quad address, rejecting anything that is not exactly four octets.
pub fn parse_ipv4(value: &str) -> Result<Ipv4Addr, ConfigError> {
    value
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| ConfigError::InvalidAddress(value.to_string()))
}

// --- Checker data ---

/// A single metadata value reported by a checker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Int(value)
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<Vec<String>> for MetaValue {
    fn from(value: Vec<String>) -> Self {
        MetaValue::List(value)
    }
}

/// Structured payload of a successful check.
pub type Meta = BTreeMap<String, MetaValue>;

/// Everything a checker gets to see for one fetched path.
#[derive(Debug, Clone)]
pub struct CheckerContext {
    pub url: String,
    pub body: Option<Bytes>,
}

impl CheckerContext {
    /// Body decoded as UTF-8, lossily. Empty when there is no body.
    pub fn text(&self) -> String {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }
}

/// Result of running one checker against one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    NoMatch,
    Match(Meta),
}

impl CheckOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CheckOutcome::Match(_))
    }
}

/// A successful check tagged with the name of the checker that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResult {
    pub checker: String,
    pub meta: Meta,
}

/// A finding as handed to result sinks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScannedSite {
    pub url: String,
    pub checker: String,
    pub meta: Meta,
    pub found_at: DateTime<Utc>,
}

impl ScannedSite {
    /// Lifts `meta.url` into the record's url, falling back to the scanned origin.
    pub fn from_result(origin: &str, result: CheckResult) -> Self {
        let mut meta = result.meta;
        let url = match meta.remove("url") {
            Some(MetaValue::Text(url)) => url,
            Some(other) => {
                meta.insert("url".to_string(), other);
                origin.to_string()
            }
            None => origin.to_string(),
        };
        Self {
            url,
            checker: result.checker,
            meta,
            found_at: Utc::now(),
        }
    }
}

// --- Scheduling state ---

/// Snapshot of a bounded queue. `in_flight` never exceeds the concurrency limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueState {
    pub in_flight: usize,
    pub queued: usize,
}

impl QueueState {
    pub fn is_idle(&self) -> bool {
        self.in_flight == 0 && self.queued == 0
    }
}

/// Produced vs. consumed counters of the IPv4 generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationWatermark {
    pub generated: u64,
    pub processed: u64,
}

impl GenerationWatermark {
    pub fn backlog(&self) -> u64 {
        self.generated.saturating_sub(self.processed)
    }
}

/// Per-file progress of an archive import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
}

impl Progress {
    pub fn percent(&self) -> u64 {
        if self.total == 0 {
            return 100;
        }
        ((self.processed as f64 / self.total as f64) * 100.0).round() as u64
    }
}
