// src/core/mod.rs

// Everything that does the actual sweeping lives under `core`. The binary only
// parses arguments, wires these pieces together and reports.

/// Plain data shared across modules: targets, findings, metadata values.
pub mod models;

/// HTTP seam and retry helper.
pub mod fetch;

/// Bounded-concurrency task queue.
pub mod queue;

pub mod progress;

/// The IPv4 generator thread and its pause/resume control channel.
pub mod generator;

/// Gzip archive streaming, line by line.
pub mod archive;
pub mod crawl;

/// Origin extraction from WET records.
pub mod domains;

/// Checker plugins, their registry and the runner that applies them to a target.
pub mod checker;

pub mod ip_probe;
pub mod store;
pub mod batch;

/// Scan and import drivers tying the generator, archives and stores to the queue.
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod testing;
