//! Logging and metrics export for nb-dns.
//!
//! `RUST_LOG` wins when set. Otherwise the configured `log_level` applies to
//! nb-dns itself while the Hickory crates stay at `warn`, since they log every
//! request and every upstream exchange at `debug`.

#[cfg(feature = "prometheus")]
use std::net::SocketAddr;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

/// Hickory crates kept quiet unless `RUST_LOG` asks for them.
const QUIET_TARGETS: &[&str] = &["hickory_server", "hickory_proto", "hickory_resolver"];

/// Filter directives for `level` when `RUST_LOG` is unset.
fn default_directives(level: &str) -> String {
    let mut directives = level.to_string();
    for target in QUIET_TARGETS {
        directives.push_str(&format!(",{target}=warn"));
    }
    directives
}

/// Install the global subscriber and, with the `prometheus` feature, the
/// metrics exporter.
pub fn init(config: &TelemetryConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (env_filter, source) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, "RUST_LOG"),
        Err(_) => (
            EnvFilter::try_new(default_directives(&config.log_level))?,
            "config",
        ),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;
    debug!(source, level = %config.log_level, "logging initialized");

    #[cfg(feature = "prometheus")]
    if let Some(addr) = config.prometheus_addr {
        start_prometheus_exporter(addr)?;
    }

    Ok(())
}

#[cfg(feature = "prometheus")]
fn start_prometheus_exporter(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    crate::metrics::describe();
    tracing::info!(%addr, "serving nb_dns metrics");
    Ok(())
}
