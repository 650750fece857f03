//! Endpoint model (C1): a value identifying one network destination that
//! `ConnectionConfig` can hand a dialer.

use std::sync::Weak;

use crate::cluster::connection_config::ManagedConnectionConfig;
use crate::network::tls::TlsConfig;

/// One network destination a caller can dial.
///
/// Two flavors, both produced only by `ConnectionConfig` (see
/// [`Endpoint::new_default`] and the crate-private SNI constructor used by
/// managed mode):
/// - a *default* endpoint: a fixed `address:port`, no TLS override;
/// - an *SNI* endpoint: resolves its network address through a back
///   reference to the managed config on every read (so a previously
///   handed-out endpoint automatically follows a later refresh), and
///   carries its own [`TlsConfig`] pinned to `<host-id>.<sni-domain>`.
///
/// Constructors never fail and never perform I/O.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// A fixed host:port with no TLS server-name override.
    Default(DefaultEndpoint),
    /// An SNI-routed endpoint through a single SNI-terminating proxy.
    Sni(SniEndpoint),
}

/// A fixed `address:port` contact point, used by generic mode and by
/// [`ConnectionConfig::create_endpoint`](crate::cluster::ConnectionConfig::create_endpoint)
/// in generic mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultEndpoint {
    address: String,
    port: u16,
}

/// An endpoint routed through a managed cluster's SNI proxy.
///
/// `label` is the SNI leading label (normally a host-id, UUID-shaped).
/// `parent` is a non-owning back-reference: the managed config outlives
/// every endpoint derived from it by construction, so `Weak::upgrade`
/// is expected to always succeed while the endpoint is reachable.
#[derive(Debug, Clone)]
pub struct SniEndpoint {
    label: String,
    tls_config: TlsConfig,
    parent: Weak<ManagedConnectionConfig>,
}

impl PartialEq for SniEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && Weak::ptr_eq(&self.parent, &other.parent)
    }
}
impl Eq for SniEndpoint {}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Endpoint::Default(a), Endpoint::Default(b)) => a == b,
            (Endpoint::Sni(a), Endpoint::Sni(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Endpoint {}

impl Endpoint {
    /// Builds a default endpoint: a fixed `address:port`, no SNI.
    pub fn new_default(address: impl Into<String>, port: u16) -> Self {
        Endpoint::Default(DefaultEndpoint {
            address: address.into(),
            port,
        })
    }

    pub(crate) fn new_sni(
        parent: Weak<ManagedConnectionConfig>,
        label: String,
        tls_config: TlsConfig,
    ) -> Self {
        Endpoint::Sni(SniEndpoint {
            label,
            tls_config,
            parent,
        })
    }

    /// Network address to dial.
    ///
    /// For a default endpoint this is fixed. For an SNI endpoint this
    /// resolves the *current* `sni_proxy_addr` through the parent config,
    /// so a stale endpoint automatically follows later refreshes.
    pub async fn address(&self) -> String {
        self.address_and_port().await.0
    }

    /// Port to dial. See [`Endpoint::address`] for SNI-endpoint semantics.
    pub async fn port(&self) -> u16 {
        self.address_and_port().await.1
    }

    /// Reads `(address, port)` as a single atomic snapshot, rather than two
    /// independent lock acquisitions — this is what avoids a torn read
    /// between [`Endpoint::address`] and [`Endpoint::port`] when a refresh
    /// races a caller resolving both.
    pub async fn address_and_port(&self) -> (String, u16) {
        match self {
            Endpoint::Default(d) => (d.address.clone(), d.port),
            Endpoint::Sni(s) => {
                let parent = s
                    .parent
                    .upgrade()
                    .expect("parent ConnectionConfig outlives endpoints derived from it");
                parent.current_sni_proxy_address().await
            }
        }
    }

    /// TLS server name pinned on this endpoint's own TLS configuration,
    /// when it has one. `None` for a default endpoint.
    pub fn server_name(&self) -> Option<String> {
        match self {
            Endpoint::Default(_) => None,
            Endpoint::Sni(s) => Some(s.tls_config.server_name().to_string()),
        }
    }

    /// Per-endpoint TLS configuration. `None` means the caller should fall
    /// back to cluster-level TLS, if any.
    pub fn tls_config(&self) -> Option<&TlsConfig> {
        match self {
            Endpoint::Default(_) => None,
            Endpoint::Sni(s) => Some(&s.tls_config),
        }
    }
}
