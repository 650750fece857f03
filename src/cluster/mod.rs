//! Cluster-facing types: host input, endpoints, and connection
//! configuration (C1, C5).

pub mod connection_config;
pub mod endpoint;
pub mod host;

pub use connection_config::{
    ConnectionConfig, ConnectionConfigParams, GenericConnectionConfig, ManagedConnectionConfig,
};
pub use endpoint::{DefaultEndpoint, Endpoint, SniEndpoint};
pub use host::{ClusterType, Host};
