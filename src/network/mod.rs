//! Low-level network-facing types: TLS configuration materialization.

pub mod tls;

pub use tls::TlsConfig;
