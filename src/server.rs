//! DNS engine setup and lifecycle management.

use hickory_resolver::config::NameServerConfigGroup;
use hickory_server::authority::{AuthorityObject, Catalog};
use hickory_server::proto::rr::{LowerName, Name};
use hickory_server::store::forwarder::{ForwardAuthority, ForwardConfig};
use hickory_server::ServerFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::authority::RecordsAuthority;
use crate::config::DnsConfig;
use crate::error::DnsError;
use crate::refresh::run_refresh_loop;
use crate::store::RecordStore;

/// Idle timeout for TCP DNS connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the catalog: custom records first, then forwarding to `forward_to`.
///
/// Without a forwarder the records authority ends the chain and answers
/// declined queries itself (`REFUSED`, `NXDOMAIN` or an empty `NOERROR`).
pub fn build_catalog(
    domains: Vec<String>,
    store: RecordStore,
    forward_to: Option<SocketAddr>,
) -> Result<Catalog, DnsError> {
    let chain: Vec<Arc<dyn AuthorityObject>> = match forward_to {
        Some(upstream) => {
            let forwarder = ForwardAuthority::builder_tokio(ForwardConfig {
                name_servers: NameServerConfigGroup::from_ips_clear(
                    &[upstream.ip()],
                    upstream.port(),
                    true,
                ),
                options: None,
            })
            .with_origin(Name::root())
            .build()
            .map_err(DnsError::Config)?;
            let records: Arc<dyn AuthorityObject> =
                Arc::new(RecordsAuthority::new(domains, store));
            let forwarder: Arc<dyn AuthorityObject> = Arc::new(forwarder);
            vec![records, forwarder]
        }
        None => {
            let records: Arc<dyn AuthorityObject> =
                Arc::new(RecordsAuthority::standalone(domains, store));
            vec![records]
        }
    };

    let mut catalog = Catalog::new();
    catalog.upsert(LowerName::from(Name::root()), chain);
    Ok(catalog)
}

/// DNS engine serving custom records with upstream fallback.
pub struct DnsServer {
    config: DnsConfig,
    store: RecordStore,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: DnsConfig, store: RecordStore) -> Self {
        Self { config, store }
    }

    /// Get a reference to the records store.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Run the DNS server until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DnsError> {
        info!(
            listen_addr = %self.config.listen_addr,
            domains = ?self.config.domains,
            forward_to = ?self.config.forward_to,
            "Starting DNS engine"
        );

        let catalog = build_catalog(
            self.config.domains.clone(),
            self.store.clone(),
            self.config.forward_to,
        )?;

        let mut server = ServerFuture::new(catalog);

        // Bind UDP
        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        // Bind TCP
        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        let refresh_handle = tokio::spawn(run_refresh_loop(
            self.store.clone(),
            self.config.refresh_interval,
            cancel.child_token(),
        ));

        info!(
            records = self.store.records_count(),
            refresh_interval = ?self.config.refresh_interval,
            "DNS engine ready to serve queries"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("DNS engine shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
            }
        }

        cancel.cancel();
        let _ = refresh_handle.await;

        info!("DNS engine stopped");
        Ok(())
    }
}
