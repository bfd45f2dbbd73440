//! File-backed custom record store.
//!
//! The in-memory index is guarded by one reader/writer lock. Every mutation
//! is persisted through [`snapshot::write`] while the write lock is held, so
//! snapshots reach disk in mutation order. A failed persist rolls the
//! in-memory change back, keeping memory equal to the last good snapshot.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::DnsError;
use crate::metrics::{self, ReloadOutcome};
use crate::record::{Record, DEFAULT_TTL};
use crate::snapshot::{self, DomainRecords, Snapshot};

/// Thread-safe record store mirrored to a snapshot file.
#[derive(Debug, Clone)]
pub struct RecordStore {
    inner: Arc<RwLock<Snapshot>>,
    path: Arc<PathBuf>,
}

impl RecordStore {
    /// Open the store at `path`, creating its directory and loading any
    /// existing snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DnsError> {
        let path = path.into();
        snapshot::ensure_parent(&path)?;

        let records = snapshot::read(&path)?.unwrap_or_default();
        info!(
            path = %path.display(),
            domains = records.len(),
            "opened records store"
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(records)),
            path: Arc::new(path),
        })
    }

    /// Snapshot file backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lookup a record by domain and name.
    pub fn get(&self, domain: &str, name: &str) -> Result<Record, DnsError> {
        let inner = self.inner.read();
        inner
            .get(domain)
            .and_then(|records| records.get(name))
            .cloned()
            .ok_or_else(|| DnsError::not_found(domain, name))
    }

    /// Independent copy of every record.
    pub fn list_all(&self) -> Snapshot {
        self.inner.read().clone()
    }

    /// Independent copy of one domain's records; empty if the domain is unknown.
    pub fn list_by_domain(&self, domain: &str) -> DomainRecords {
        self.inner.read().get(domain).cloned().unwrap_or_default()
    }

    /// Insert or replace a record and persist the snapshot.
    ///
    /// Returns the record as stored (with the default TTL applied).
    pub fn set(&self, mut record: Record) -> Result<Record, DnsError> {
        record.validate()?;
        if record.ttl == 0 {
            record.ttl = DEFAULT_TTL;
        }

        let mut inner = self.inner.write();
        let previous = inner
            .entry(record.domain.clone())
            .or_default()
            .insert(record.name.clone(), record.clone());

        if let Err(e) = snapshot::write(&self.path, &inner) {
            restore(&mut inner, &record.domain, &record.name, previous);
            metrics::record_store_write("set", false);
            return Err(e);
        }

        debug!(
            domain = %record.domain,
            name = %record.name,
            rtype = %record.record_type(),
            "stored record"
        );
        metrics::record_store_write("set", true);
        emit_counts(&inner);
        Ok(record)
    }

    /// Remove a record and persist the snapshot.
    ///
    /// The domain entry is dropped once its last record is gone.
    pub fn delete(&self, domain: &str, name: &str) -> Result<(), DnsError> {
        let mut inner = self.inner.write();

        let records = inner
            .get_mut(domain)
            .ok_or_else(|| DnsError::not_found(domain, name))?;
        let removed = records
            .remove(name)
            .ok_or_else(|| DnsError::not_found(domain, name))?;
        if records.is_empty() {
            inner.remove(domain);
        }

        if let Err(e) = snapshot::write(&self.path, &inner) {
            restore(&mut inner, domain, name, Some(removed));
            metrics::record_store_write("delete", false);
            return Err(e);
        }

        debug!(domain, name, "deleted record");
        metrics::record_store_write("delete", true);
        emit_counts(&inner);
        Ok(())
    }

    /// Replace the in-memory index with the snapshot on disk.
    ///
    /// A missing file is not an error. On any other failure the previously
    /// loaded records stay in place.
    pub fn reload(&self) -> Result<(), DnsError> {
        let records = match snapshot::read(&self.path) {
            Ok(Some(records)) => records,
            Ok(None) => {
                debug!(path = %self.path.display(), "no records snapshot on disk yet");
                metrics::record_reload(ReloadOutcome::Missing);
                return Ok(());
            }
            Err(e) => {
                metrics::record_reload(ReloadOutcome::Failed);
                return Err(e);
            }
        };

        let mut inner = self.inner.write();
        *inner = records;
        metrics::record_reload(ReloadOutcome::Loaded);
        emit_counts(&inner);
        Ok(())
    }

    /// Number of domains with at least one record.
    pub fn domains_count(&self) -> usize {
        self.inner.read().len()
    }

    /// Total number of records.
    pub fn records_count(&self) -> usize {
        self.inner.read().values().map(|records| records.len()).sum()
    }
}

/// Put `(domain, name)` back to `previous`, undoing a mutation.
fn restore(inner: &mut Snapshot, domain: &str, name: &str, previous: Option<Record>) {
    match previous {
        Some(record) => {
            inner
                .entry(domain.to_string())
                .or_default()
                .insert(name.to_string(), record);
        }
        None => {
            if let Some(records) = inner.get_mut(domain) {
                records.remove(name);
                if records.is_empty() {
                    inner.remove(domain);
                }
            }
        }
    }
}

fn emit_counts(inner: &Snapshot) {
    let records = inner.values().map(|records| records.len()).sum();
    metrics::record_store_counts(inner.len(), records);
}
