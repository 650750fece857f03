//! Errors returned by the cluster connection-configuration subsystem.

use thiserror::Error;

/// Error that occurred while reading or validating a secure connect bundle (C2).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ScbError {
    /// The bundle path could not be opened.
    #[error("secure connect bundle not found at {path}: {source}")]
    NotFound {
        /// Path that was passed to the bundle reader.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The bundle is not a valid zip archive, or violates a size limit.
    #[error("secure connect bundle is malformed: {reason}")]
    Malformed {
        /// Human-readable reason (not-a-zip, oversized entry, oversized archive, duplicate entry).
        reason: String,
    },

    /// A required entry is missing from the bundle.
    #[error("secure connect bundle is missing required entry '{0}'")]
    MissingEntry(&'static str),

    /// `config.json` could not be parsed as JSON.
    #[error("failed to parse config.json in secure connect bundle: {0}")]
    ConfigParseError(#[from] serde_json::Error),

    /// `config.json` was parsed but lacks a usable host/port pair.
    #[error("incomplete metadata service contact information in secure connect bundle")]
    IncompleteMetadata,
}

/// Error that occurred while materializing a TLS configuration (C3).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TlsError {
    /// The supplied CA certificate bytes are not a valid PEM certificate.
    #[error("invalid CA certificate: {0}")]
    CaInvalid(String),

    /// The supplied client certificate/key bytes do not form a valid key pair.
    #[error("invalid client certificate/key pair: {0}")]
    KeyPairInvalid(String),
}

/// Error that occurred while retrieving or parsing Astra-style cluster metadata (C4).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetadataError {
    /// Transport-level failure reaching the metadata service.
    #[error("failed to reach metadata service: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// TLS handshake with the metadata service failed.
    #[error("TLS handshake with metadata service failed: {0}")]
    TlsError(String),

    /// Metadata service responded with a non-200 status.
    #[error("metadata service returned HTTP status {0}")]
    HttpError(u16),

    /// Response body could not be parsed as the expected JSON shape.
    #[error("failed to parse metadata service response: {0}")]
    ParseError(#[from] serde_json::Error),

    /// `sni_proxy_address` did not split cleanly into `host:port`.
    #[error("metadata service returned a malformed sni_proxy_address: '{0}'")]
    BadSniAddress(String),

    /// `local_dc` was present but empty.
    #[error("metadata service response is missing a local datacenter")]
    MissingLocalDc,

    /// The request did not complete within `connection_timeout_ms`.
    #[error("metadata service request timed out after {0}ms")]
    Timeout(u64),
}

/// Error that occurred during `ConnectionConfig` bootstrap.
///
/// Bootstrap is all-or-nothing (see invariant 5): any of these aborts
/// construction before a `ConnectionConfig` is ever handed to a caller.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConnectionConfigError {
    /// Failed to read or validate the secure connect bundle.
    #[error(transparent)]
    Scb(#[from] ScbError),

    /// Failed to materialize a TLS configuration from bundle contents.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// The first metadata fetch performed during bootstrap failed.
    #[error("initial metadata fetch failed during bootstrap: {0}")]
    Metadata(#[from] MetadataError),
}
