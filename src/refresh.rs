//! Background reload of the records store.
//!
//! Another process (the API side) owns writes to the snapshot file; this
//! loop is how its changes become visible to the resolver. Staleness is
//! bounded by the refresh interval.

use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::store::RecordStore;

/// Reload `store` every `interval` until `cancel` fires.
///
/// The first reload happens immediately. Failures are logged and the loop
/// keeps going.
pub async fn run_refresh_loop(store: RecordStore, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                refresh(&store).await;
            }
            _ = cancel.cancelled() => {
                debug!("refresh loop shutting down");
                return;
            }
        }
    }
}

async fn refresh(store: &RecordStore) {
    let store = store.clone();
    match tokio::task::spawn_blocking(move || store.reload().map(|()| store)).await {
        Ok(Ok(store)) => {
            debug!(
                domains = store.domains_count(),
                records = store.records_count(),
                "reloaded custom DNS records from disk"
            );
        }
        Ok(Err(e)) => {
            error!(error = %e, "failed to reload records from disk");
        }
        Err(e) => {
            error!(error = %e, "records reload task failed");
        }
    }
}
