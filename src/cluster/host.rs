//! External input types consumed by this subsystem but produced elsewhere
//! (the CQL host-discovery layer).

use std::net::IpAddr;

use uuid::Uuid;

/// A cluster member as discovered over the CQL wire protocol.
///
/// `Host` is immutable for the lifetime of one endpoint construction; this
/// crate only reads it, it never produces one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Host {
    /// Address broadcast or reported by the node.
    pub address: IpAddr,
    /// Native transport port reported by the node.
    pub port: u16,
    /// Opaque UUID-shaped node identifier, also used as the SNI label in
    /// managed mode.
    pub host_id: Uuid,
}

impl Host {
    /// Creates a new `Host` value.
    pub fn new(address: IpAddr, port: u16, host_id: Uuid) -> Self {
        Self {
            address,
            port,
            host_id,
        }
    }
}

/// Enumerated tag distinguishing which of the two fronted clusters a
/// `ConnectionConfig` belongs to.
///
/// Opaque to this subsystem: it is stored at construction and returned
/// verbatim by [`ConnectionConfig::cluster_type`](crate::cluster::ConnectionConfig::cluster_type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum ClusterType {
    /// The cluster being migrated away from.
    Origin,
    /// The cluster being migrated to.
    Target,
}

impl std::fmt::Display for ClusterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterType::Origin => write!(f, "origin"),
            ClusterType::Target => write!(f, "target"),
        }
    }
}
