//! Metrics instrumentation for nb-dns.
//!
//! All metrics are prefixed with `nb_dns.`

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use std::time::Instant;

/// Register descriptions for every `nb_dns.` series with the installed recorder.
pub fn describe() {
    describe_counter!("nb_dns.query.count", "Queries seen by the records authority");
    describe_histogram!(
        "nb_dns.query.duration.seconds",
        Unit::Seconds,
        "Time spent resolving a query from the store"
    );
    describe_counter!("nb_dns.store.write.count", "Record writes by outcome");
    describe_counter!("nb_dns.store.reload.count", "Snapshot reloads by outcome");
    describe_gauge!("nb_dns.store.domains.count", "Domains in the store");
    describe_gauge!("nb_dns.store.records.count", "Records in the store");
    describe_counter!("nb_dns.process.exit.count", "Managed process exits");
    describe_counter!("nb_dns.process.forced_kill.count", "Processes killed after the grace period");
    describe_counter!("nb_dns.shutdown.timeout.count", "Shutdowns that overran the grace period");
}

/// Record a DNS query handled by the records authority.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    let result_str = match result {
        QueryResult::Cname => "cname",
        QueryResult::A => "a",
        QueryResult::Declined => "declined",
    };

    counter!("nb_dns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("nb_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy)]
pub enum QueryResult {
    /// Answered with a CNAME record.
    Cname,
    /// Answered with an A record.
    A,
    /// Passed on to the next resolution stage, or refused when there is none.
    Declined,
}

/// Record a store mutation and whether it was persisted.
pub fn record_store_write(operation: &'static str, persisted: bool) {
    let outcome = if persisted { "ok" } else { "error" };
    counter!("nb_dns.store.write.count", "op" => operation, "outcome" => outcome).increment(1);
}

/// Record a reload from disk.
pub fn record_reload(outcome: ReloadOutcome) {
    let outcome_str = match outcome {
        ReloadOutcome::Loaded => "loaded",
        ReloadOutcome::Missing => "missing",
        ReloadOutcome::Failed => "failed",
    };

    counter!("nb_dns.store.reload.count", "outcome" => outcome_str).increment(1);
}

/// Reload outcomes.
#[derive(Debug, Clone, Copy)]
pub enum ReloadOutcome {
    /// Snapshot read and swapped in.
    Loaded,
    /// No snapshot on disk yet.
    Missing,
    /// Read or decode failed; previous state kept.
    Failed,
}

/// Record store size.
pub fn record_store_counts(domains: usize, records: usize) {
    gauge!("nb_dns.store.domains.count").set(domains as f64);
    gauge!("nb_dns.store.records.count").set(records as f64);
}

/// Record a managed process exit.
pub fn record_process_exit(name: &str, fatal: bool) {
    let kind = if fatal { "unexpected" } else { "expected" };
    counter!("nb_dns.process.exit.count", "name" => name.to_string(), "kind" => kind).increment(1);
}

/// Record a forced kill during shutdown.
pub fn record_forced_kill(name: &str) {
    counter!("nb_dns.process.forced_kill.count", "name" => name.to_string()).increment(1);
}

/// Record a graceful shutdown that overran its deadline.
pub fn record_shutdown_timeout() {
    counter!("nb_dns.shutdown.timeout.count").increment(1);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
