//! Connection configuration (C5): the per-cluster object a dialer consults
//! for contact points, TLS, and (in managed mode) a live view of an Astra
//! SNI proxy's routing state.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cloud::{read_bundle, AstraMetadataClient, MetadataClient, ScbLimits};
use crate::cluster::endpoint::Endpoint;
use crate::cluster::host::{ClusterType, Host};
use crate::errors::ConnectionConfigError;
use crate::network::tls::TlsConfig;

/// Parameters accepted by [`initialize_connection_config`].
///
/// Not `serde::Deserialize` itself: `secure_connect_bundle_path` is a
/// filesystem path an operator supplies directly, and the two modes
/// (generic vs. managed) are selected by which optional fields are
/// present rather than by a tagged variant, matching how the bundle path
/// is typically threaded through from a CLI flag or a single config
/// section (see SPEC_FULL.md §11).
#[derive(Debug, Clone)]
pub struct ConnectionConfigParams {
    /// Which of the two fronted clusters this configuration belongs to.
    pub cluster_type: ClusterType,
    /// Per-request timeout applied to dials and, in managed mode, to
    /// metadata fetches.
    pub connection_timeout_ms: u64,
    /// Hostnames/IPs of the fixed contact points, used only in generic
    /// mode. Each is wrapped as a default endpoint at `port` by the
    /// factory; callers never construct `Endpoint` values themselves.
    pub contact_points: Vec<String>,
    /// Port paired with each entry of `contact_points` in generic mode.
    pub port: u16,
    /// Local datacenter, used only in generic mode and returned verbatim
    /// by [`ConnectionConfig::local_datacenter`]: a generic cluster has
    /// no metadata service to report one, so it is taken from config.
    pub datacenter: Option<String>,
    /// Path to a secure connect bundle; presence selects managed mode.
    pub secure_connect_bundle_path: Option<String>,
    /// Limits enforced while reading the bundle, if present.
    pub scb_limits: ScbLimits,
}

/// A resolved connection configuration for one fronted cluster.
///
/// Two modes, matching the two ways a cluster is reached (§4.1):
/// - [`ConnectionConfig::Generic`]: a fixed list of default endpoints.
/// - [`ConnectionConfig::Managed`]: contact points and SNI routing are
///   discovered from an Astra-style metadata service and can be refreshed.
///
/// Modeled as an enum rather than a trait object: the two modes have
/// disjoint internal state (no shared fields beyond `cluster_type` and
/// `connection_timeout_ms`) and callers always know which mode they asked
/// for, so dynamic dispatch buys nothing here (see SPEC_FULL.md §9).
#[derive(Debug, Clone)]
pub enum ConnectionConfig {
    /// Fixed contact points, no SNI, no metadata service.
    Generic(Arc<GenericConnectionConfig>),
    /// Contact points and SNI proxy address discovered from a metadata
    /// service and refreshable at runtime.
    Managed(Arc<ManagedConnectionConfig>),
}

impl ConnectionConfig {
    /// Which of the two fronted clusters this configuration belongs to.
    pub fn cluster_type(&self) -> ClusterType {
        match self {
            ConnectionConfig::Generic(c) => c.cluster_type,
            ConnectionConfig::Managed(c) => c.cluster_type,
        }
    }

    /// Per-request timeout applied to dials and metadata fetches.
    pub fn connection_timeout_ms(&self) -> u64 {
        match self {
            ConnectionConfig::Generic(c) => c.connection_timeout_ms,
            ConnectionConfig::Managed(c) => c.connection_timeout_ms,
        }
    }

    /// Whether endpoints from this configuration route through an SNI
    /// proxy (managed mode) or connect directly (generic mode).
    pub fn uses_sni(&self) -> bool {
        matches!(self, ConnectionConfig::Managed(_))
    }

    /// Cluster-level TLS configuration, if any. `None` in generic mode:
    /// generic contact points carry no TLS override (§4.1).
    pub fn tls_config(&self) -> Option<&TlsConfig> {
        match self {
            ConnectionConfig::Generic(_) => None,
            ConnectionConfig::Managed(c) => Some(&c.tls_config),
        }
    }

    /// Local datacenter name. In generic mode this is whatever was
    /// configured (taken verbatim, no metadata service involved); in
    /// managed mode, it is set by the first successful bootstrap/refresh,
    /// which by invariant 5 has already happened by the time a caller can
    /// observe a `Managed` value at all.
    pub async fn local_datacenter(&self) -> Option<String> {
        match self {
            ConnectionConfig::Generic(c) => c.datacenter.clone(),
            ConnectionConfig::Managed(c) => c.local_datacenter.get().cloned(),
        }
    }

    /// Current contact points.
    pub async fn contact_points(&self) -> Vec<Endpoint> {
        match self {
            ConnectionConfig::Generic(c) => c.contact_points.clone(),
            ConnectionConfig::Managed(c) => c.state.read().await.contact_points.clone(),
        }
    }

    /// Re-fetches metadata and atomically replaces contact points, SNI
    /// proxy address, and SNI proxy endpoint, returning the resulting
    /// contact point list. A no-op in generic mode, returning the fixed
    /// list unchanged. On failure, leaves all three fields exactly as
    /// they were (invariant 4).
    pub async fn refresh_contact_points(&self) -> Result<Vec<Endpoint>, crate::errors::MetadataError> {
        match self {
            ConnectionConfig::Generic(c) => Ok(c.contact_points.clone()),
            ConnectionConfig::Managed(c) => c.refresh_contact_points().await,
        }
    }

    /// Builds a fresh endpoint for `host`. In generic mode this is a
    /// direct `address:port` endpoint; in managed mode it is an SNI
    /// endpoint labeled with `host.host_id`, independent of the
    /// currently-cached contact points.
    pub fn create_endpoint(&self, host: &Host) -> Endpoint {
        match self {
            ConnectionConfig::Generic(_) => Endpoint::new_default(host.address.to_string(), host.port),
            ConnectionConfig::Managed(c) => c.create_endpoint(host),
        }
    }

    /// Current SNI proxy host, as last reported by the metadata service.
    /// `None` in generic mode.
    pub async fn sni_proxy_addr(&self) -> Option<String> {
        match self {
            ConnectionConfig::Generic(_) => None,
            ConnectionConfig::Managed(c) => Some(c.state.read().await.sni_proxy_addr.clone()),
        }
    }

    /// Current SNI proxy `host:port`, as last reported by the metadata
    /// service. `None` in generic mode.
    pub async fn sni_proxy_endpoint(&self) -> Option<String> {
        match self {
            ConnectionConfig::Generic(_) => None,
            ConnectionConfig::Managed(c) => Some(c.state.read().await.sni_proxy_endpoint.clone()),
        }
    }
}

/// Generic-mode configuration: a fixed set of contact points, no SNI.
#[derive(Debug, Clone)]
pub struct GenericConnectionConfig {
    cluster_type: ClusterType,
    connection_timeout_ms: u64,
    contact_points: Vec<Endpoint>,
    datacenter: Option<String>,
}

/// The mutable triple a managed configuration refreshes atomically.
///
/// Grouped into one struct behind a single `RwLock` specifically so a
/// reader can never observe `contact_points` from one refresh alongside
/// `sni_proxy_addr`/`sni_proxy_endpoint` from another (invariant 3).
#[derive(Debug, Clone)]
struct ManagedState {
    contact_points: Vec<Endpoint>,
    sni_proxy_addr: String,
    sni_proxy_endpoint: String,
}

/// Managed-mode configuration: contact points and SNI routing discovered
/// from an Astra-style metadata service.
pub struct ManagedConnectionConfig {
    cluster_type: ClusterType,
    connection_timeout_ms: u64,
    tls_config: TlsConfig,
    metadata_host: String,
    metadata_port: u16,
    sni_domain: String,
    /// Set exactly once, on the first successful metadata fetch. Frozen
    /// afterwards: the metadata service reports the same local DC for
    /// the lifetime of a bundle (§4.2), so later refreshes only assert
    /// consistency with the value already observed rather than
    /// overwriting it.
    local_datacenter: OnceLock<String>,
    state: RwLock<ManagedState>,
    metadata_client: Arc<dyn MetadataClient>,
}

impl std::fmt::Debug for ManagedConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnectionConfig")
            .field("cluster_type", &self.cluster_type)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("metadata_host", &self.metadata_host)
            .field("metadata_port", &self.metadata_port)
            .field("sni_domain", &self.sni_domain)
            .finish_non_exhaustive()
    }
}

impl ManagedConnectionConfig {
    /// Reads `sni_proxy_addr` and the port half of `sni_proxy_endpoint`
    /// as a single snapshot, so a concurrent refresh can't be observed
    /// half-applied (invariant 3; mirrors `Endpoint::address_and_port`).
    pub(crate) async fn current_sni_proxy_address(&self) -> (String, u16) {
        let state = self.state.read().await;
        let port = state
            .sni_proxy_endpoint
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or(self.metadata_port);
        (state.sni_proxy_addr.clone(), port)
    }

    /// Builds a fresh SNI endpoint for `host`, independent of the
    /// currently-cached contact points list.
    fn create_endpoint(self: &Arc<Self>, host: &Host) -> Endpoint {
        let label = host.host_id.to_string();
        let server_name = format!("{label}.{}", self.sni_domain);
        let tls_config = self
            .tls_config
            .with_server_name(server_name)
            .unwrap_or_else(|_| self.tls_config.clone());
        Endpoint::new_sni(Arc::downgrade(self), label, tls_config)
    }

    /// Fetches metadata and atomically replaces contact points, SNI proxy
    /// address, and SNI proxy endpoint, returning the new contact point
    /// list. Leaves state untouched on error.
    pub(crate) async fn refresh_contact_points(
        self: &Arc<Self>,
    ) -> Result<Vec<Endpoint>, crate::errors::MetadataError> {
        let timeout = Duration::from_millis(self.connection_timeout_ms);
        let metadata = self
            .metadata_client
            .retrieve(&self.metadata_host, self.metadata_port, timeout)
            .await?;

        if let Err(existing) = self.local_datacenter.set(metadata.local_dc.clone()) {
            if existing != metadata.local_dc {
                warn!(
                    target: "cluster_connect::connection_config",
                    previous = %existing,
                    reported = %metadata.local_dc,
                    "metadata service reported a different local datacenter than bootstrap; keeping the original"
                );
            }
        }

        let contact_points = metadata
            .contact_points
            .iter()
            .map(|label| {
                let server_name = format!("{label}.{}", self.sni_domain);
                let tls_config = self
                    .tls_config
                    .with_server_name(server_name)
                    .unwrap_or_else(|_| self.tls_config.clone());
                Endpoint::new_sni(Arc::downgrade(self), label.clone(), tls_config)
            })
            .collect();

        let mut state = self.state.write().await;
        state.contact_points = contact_points;
        state.sni_proxy_addr = metadata.sni_proxy_addr;
        state.sni_proxy_endpoint = metadata.sni_proxy_endpoint;
        debug!(
            target: "cluster_connect::connection_config",
            cluster_type = %self.cluster_type,
            contact_point_count = state.contact_points.len(),
            "refreshed contact points"
        );
        Ok(state.contact_points.clone())
    }
}

/// Bootstraps a [`ConnectionConfig`] from `params`.
///
/// Generic mode (`params.secure_connect_bundle_path` is `None`) never
/// performs I/O and never fails. Managed mode reads the bundle,
/// materializes TLS, and performs one metadata fetch before returning;
/// any failure in that chain is returned without ever publishing a
/// `ConnectionConfig::Managed` value (invariant 5 — bootstrap is
/// all-or-nothing).
///
/// `metadata_client_override` lets a caller substitute a fake
/// [`MetadataClient`] (used by this crate's own tests); production
/// callers should pass `None` to get the real Astra HTTPS client.
pub async fn initialize_connection_config(
    params: ConnectionConfigParams,
    metadata_client_override: Option<Arc<dyn MetadataClient>>,
) -> Result<ConnectionConfig, ConnectionConfigError> {
    let Some(bundle_path) = params.secure_connect_bundle_path.as_ref() else {
        debug!(
            target: "cluster_connect::connection_config",
            cluster_type = %params.cluster_type,
            "initializing generic connection config"
        );
        let contact_points = params
            .contact_points
            .into_iter()
            .map(|host| Endpoint::new_default(host, params.port))
            .collect();
        return Ok(ConnectionConfig::Generic(Arc::new(GenericConnectionConfig {
            cluster_type: params.cluster_type,
            connection_timeout_ms: params.connection_timeout_ms,
            contact_points,
            datacenter: params.datacenter,
        })));
    };

    debug!(
        target: "cluster_connect::connection_config",
        cluster_type = %params.cluster_type,
        bundle_path = %bundle_path,
        "initializing managed connection config from secure connect bundle"
    );

    let bundle = read_bundle(bundle_path, params.scb_limits)?;
    let tls_config = TlsConfig::materialize(
        bundle.ca_cert(),
        bundle.client_cert(),
        bundle.client_key(),
        bundle.metadata_host.clone(),
    )?;

    let metadata_client: Arc<dyn MetadataClient> = match metadata_client_override {
        Some(client) => client,
        None => Arc::new(AstraMetadataClient::new(tls_config.clone())),
    };

    let config = Arc::new_cyclic(|_weak: &Weak<ManagedConnectionConfig>| ManagedConnectionConfig {
        cluster_type: params.cluster_type,
        connection_timeout_ms: params.connection_timeout_ms,
        tls_config,
        metadata_host: bundle.metadata_host.clone(),
        metadata_port: bundle.metadata_port,
        sni_domain: bundle.metadata_host,
        local_datacenter: OnceLock::new(),
        state: RwLock::new(ManagedState {
            contact_points: Vec::new(),
            sni_proxy_addr: String::new(),
            sni_proxy_endpoint: String::new(),
        }),
        metadata_client,
    });

    config.refresh_contact_points().await?;

    Ok(ConnectionConfig::Managed(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MetadataError;
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Debug)]
    struct FakeMetadataClient {
        responses: Vec<crate::cloud::AstraMetadata>,
        call_count: AtomicUsize,
    }

    #[async_trait]
    impl MetadataClient for FakeMetadataClient {
        async fn retrieve(
            &self,
            _host: &str,
            _port: u16,
            _timeout: Duration,
        ) -> Result<crate::cloud::AstraMetadata, MetadataError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(idx)
                .cloned()
                .ok_or(MetadataError::MissingLocalDc)
        }
    }

    fn sample_metadata(dc: &str, points: &[&str], sni: &str) -> crate::cloud::AstraMetadata {
        crate::cloud::AstraMetadata {
            local_dc: dc.to_string(),
            contact_points: points.iter().map(|s| s.to_string()).collect(),
            sni_proxy_addr: sni.split(':').next().unwrap().to_string(),
            sni_proxy_endpoint: sni.to_string(),
        }
    }

    #[tokio::test]
    async fn generic_mode_returns_fixed_contact_points() {
        let params = ConnectionConfigParams {
            cluster_type: ClusterType::Origin,
            connection_timeout_ms: 5000,
            contact_points: vec![
                "10.0.0.1".to_string(),
                "10.0.0.2".to_string(),
                "10.0.0.3".to_string(),
            ],
            port: 9042,
            datacenter: Some("dc1".to_string()),
            secure_connect_bundle_path: None,
            scb_limits: ScbLimits::default(),
        };

        let config = initialize_connection_config(params, None).await.unwrap();
        assert_eq!(config.cluster_type(), ClusterType::Origin);
        assert!(!config.uses_sni());
        let points = config.contact_points().await;
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].address().await, "10.0.0.1");
        assert_eq!(points[0].port().await, 9042);
        assert_eq!(config.local_datacenter().await.as_deref(), Some("dc1"));
        assert!(config.refresh_contact_points().await.is_ok());
    }

    #[tokio::test]
    async fn generic_mode_create_endpoint_is_direct() {
        let params = ConnectionConfigParams {
            cluster_type: ClusterType::Target,
            connection_timeout_ms: 5000,
            contact_points: vec![],
            port: 9042,
            datacenter: None,
            secure_connect_bundle_path: None,
            scb_limits: ScbLimits::default(),
        };
        let config = initialize_connection_config(params, None).await.unwrap();
        let host = Host::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), 9042, Uuid::nil());
        let endpoint = config.create_endpoint(&host);
        assert_eq!(endpoint.address().await, "10.0.0.9");
        assert_eq!(endpoint.port().await, 9042);
        assert!(endpoint.server_name().is_none());
    }

    fn managed_params(bundle_path: &str) -> ConnectionConfigParams {
        ConnectionConfigParams {
            cluster_type: ClusterType::Target,
            connection_timeout_ms: 5000,
            contact_points: vec![],
            port: 9042,
            datacenter: None,
            secure_connect_bundle_path: Some(bundle_path.to_string()),
            scb_limits: ScbLimits::default(),
        }
    }

    fn write_sample_bundle() -> tempfile::NamedTempFile {
        use std::io::Write;

        let ca = rcgen::generate_simple_self_signed(vec!["test-ca".to_string()]).unwrap();
        let ca_pem = ca.cert.pem();
        let mut leaf_params = rcgen::CertificateParams::new(vec!["metadata.example".to_string()]).unwrap();
        leaf_params.is_ca = rcgen::IsCa::NoCa;
        let leaf_key = rcgen::KeyPair::generate().unwrap();
        let leaf = leaf_params.signed_by(&leaf_key, &ca.cert, &ca.key_pair).unwrap();

        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut writer = zip::ZipWriter::new(cursor);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            let entries: [(&str, Vec<u8>); 4] = [
                ("ca.crt", ca_pem.into_bytes()),
                ("cert", leaf.pem().into_bytes()),
                ("key", leaf_key.serialize_pem().into_bytes()),
                (
                    "config.json",
                    br#"{"host":"metadata.example","port":31443}"#.to_vec(),
                ),
            ];
            for (name, contents) in entries {
                writer.start_file(name, options).unwrap();
                writer.write_all(&contents).unwrap();
            }
            writer.finish().unwrap();
        }

        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&buf).unwrap();
        f
    }

    #[tokio::test]
    async fn managed_mode_happy_path_publishes_bootstrap_metadata() {
        let bundle = write_sample_bundle();
        let fake = Arc::new(FakeMetadataClient {
            responses: vec![sample_metadata(
                "dc1",
                &["host-a", "host-b"],
                "sni.example:29042",
            )],
            call_count: AtomicUsize::new(0),
        });

        let config = initialize_connection_config(
            managed_params(bundle.path().to_str().unwrap()),
            Some(fake),
        )
        .await
        .unwrap();

        assert!(config.uses_sni());
        assert_eq!(config.local_datacenter().await.as_deref(), Some("dc1"));
        assert_eq!(config.contact_points().await.len(), 2);
        assert_eq!(config.sni_proxy_addr().await.as_deref(), Some("sni.example"));
        assert_eq!(
            config.sni_proxy_endpoint().await.as_deref(),
            Some("sni.example:29042")
        );
    }

    #[tokio::test]
    async fn refresh_rotates_contact_points_and_sni_address() {
        let bundle = write_sample_bundle();
        let fake = Arc::new(FakeMetadataClient {
            responses: vec![
                sample_metadata("dc1", &["host-a", "host-b"], "sni-old.example:29042"),
                sample_metadata("dc1", &["host-c"], "sni-new.example:29042"),
            ],
            call_count: AtomicUsize::new(0),
        });

        let config = initialize_connection_config(
            managed_params(bundle.path().to_str().unwrap()),
            Some(fake),
        )
        .await
        .unwrap();
        assert_eq!(config.contact_points().await.len(), 2);

        config.refresh_contact_points().await.unwrap();
        assert_eq!(config.contact_points().await.len(), 1);
        assert_eq!(
            config.sni_proxy_addr().await.as_deref(),
            Some("sni-new.example")
        );
        // local DC is frozen at the value observed during bootstrap
        assert_eq!(config.local_datacenter().await.as_deref(), Some("dc1"));
    }

    #[tokio::test]
    async fn failed_refresh_preserves_previous_state() {
        let bundle = write_sample_bundle();
        let fake = Arc::new(FakeMetadataClient {
            responses: vec![sample_metadata("dc1", &["host-a"], "sni.example:29042")],
            call_count: AtomicUsize::new(0),
        });

        let config = initialize_connection_config(
            managed_params(bundle.path().to_str().unwrap()),
            Some(fake),
        )
        .await
        .unwrap();

        let err = config.refresh_contact_points().await.unwrap_err();
        assert!(matches!(err, MetadataError::MissingLocalDc));
        assert_eq!(config.contact_points().await.len(), 1);
        assert_eq!(
            config.sni_proxy_addr().await.as_deref(),
            Some("sni.example")
        );
    }

    #[tokio::test]
    async fn bootstrap_fails_without_publishing_on_bad_bundle() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        {
            use std::io::Write;
            f.write_all(b"not a zip").unwrap();
        }
        let fake: Arc<dyn MetadataClient> = Arc::new(FakeMetadataClient {
            responses: vec![],
            call_count: AtomicUsize::new(0),
        });

        let err = initialize_connection_config(
            managed_params(f.path().to_str().unwrap()),
            Some(fake),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectionConfigError::Scb(_)));
    }

    #[tokio::test]
    async fn concurrent_readers_observe_consistent_snapshots_during_refresh() {
        let bundle = write_sample_bundle();
        let fake = Arc::new(FakeMetadataClient {
            responses: vec![
                sample_metadata("dc1", &["host-a"], "sni-old.example:29042"),
                sample_metadata("dc1", &["host-b", "host-c"], "sni-new.example:29042"),
            ],
            call_count: AtomicUsize::new(0),
        });

        let config = initialize_connection_config(
            managed_params(bundle.path().to_str().unwrap()),
            Some(fake),
        )
        .await
        .unwrap();

        let refresh_config = config.clone();
        let refresh_task = tokio::spawn(async move {
            refresh_config.refresh_contact_points().await.unwrap();
        });

        let mut readers = Vec::new();
        for _ in 0..100 {
            let reader_config = config.clone();
            readers.push(tokio::spawn(async move {
                let addr = reader_config.sni_proxy_addr().await.unwrap();
                let endpoint = reader_config.sni_proxy_endpoint().await.unwrap();
                assert!(
                    (addr == "sni-old.example" && endpoint == "sni-old.example:29042")
                        || (addr == "sni-new.example" && endpoint == "sni-new.example:29042"),
                    "observed a torn mix: {addr} / {endpoint}"
                );
            }));
        }

        refresh_task.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
