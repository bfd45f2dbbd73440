//! nb-dns - custom DNS records for a mesh-networked resolver.
//!
//! This crate runs a small DNS service made of cooperating processes: a
//! mesh-network daemon that makes the host reachable, and a DNS engine that
//! answers custom A/CNAME records and forwards everything else upstream.
//! Records are managed over an HTTP API and shared with the engine through a
//! crash-safe snapshot file.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── nb-dns run ────────────────────────────┐
//! │                                                                     │
//! │  HTTP client ──▶ Management API ──▶ RecordStore ──▶ records.json    │
//! │                                                          │          │
//! │  Supervisor ── mesh-daemon (optional)                    │ reload   │
//! │       │                                                  ▼          │
//! │       └────── dns-engine (nb-dns serve-dns) ──▶ RecordStore         │
//! │                     │                                               │
//! │            RecordsAuthority ──(declined)──▶ forwarder ◀── UDP/TCP   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! api.example.com.  (served domain "example.com")
//!   → store lookup ("example.com", "api")
//!   → CNAME record: CNAME answer, for A and CNAME queries
//!   → A record: A answer, for A queries
//!   → otherwise: forwarded upstream, or answered with REFUSED / NXDOMAIN /
//!     empty NOERROR when no forwarder is configured
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use nb_dns::{Config, DnsServer, RecordStore};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), nb_dns::DnsError> {
//! let config = Config::load(None)?;
//! config.validate()?;
//! let dns = config.dns()?;
//!
//! let store = RecordStore::open(&dns.records_file)?;
//! let cancel = CancellationToken::new();
//! DnsServer::new(dns, store).run(cancel).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod authority;
pub mod config;
pub mod error;
pub mod metrics;
pub mod plan;
pub mod record;
pub mod refresh;
pub mod server;
pub mod snapshot;
pub mod store;
pub mod supervisor;
pub mod telemetry;

// Re-export main types
pub use config::{Config, DnsConfig, MeshConfig, ShutdownPolicy, TelemetryConfig};
pub use error::DnsError;
pub use record::{Record, RecordData, RecordType};
pub use server::DnsServer;
pub use store::RecordStore;
pub use supervisor::{LaunchStep, StepKind, Supervisor};
