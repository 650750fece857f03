//! Cluster connection-configuration subsystem for a dual-cluster CQL
//! migration proxy.
//!
//! Resolves, for each of the origin and target clusters independently,
//! where to dial and what TLS identity to present — either a fixed set of
//! contact points ([`cluster::ConnectionConfig::Generic`]) or a
//! refreshable view discovered from an Astra-style secure connect bundle
//! and its metadata service ([`cluster::ConnectionConfig::Managed`]).
//!
//! Entry point: [`cluster::connection_config::initialize_connection_config`].

pub mod cloud;
pub mod cluster;
pub mod errors;
pub mod network;

pub use cluster::connection_config::{initialize_connection_config, ConnectionConfig, ConnectionConfigParams};
pub use cluster::endpoint::Endpoint;
pub use cluster::host::{ClusterType, Host};
pub use cloud::ScbLimits;
pub use network::tls::TlsConfig;
