//! Astra-style metadata client (C4): retrieves and parses the cluster
//! metadata document describing the SNI proxy and current contact points.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::MetadataError;
use crate::network::tls::TlsConfig;

/// Parsed `/metadata` response.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AstraMetadata {
    /// Local datacenter name reported by the metadata service.
    pub local_dc: String,
    /// Opaque host-id strings identifying current contact points.
    pub contact_points: Vec<String>,
    /// Host portion of `sni_proxy_address` (port intentionally dropped —
    /// see `sni_proxy_endpoint` and the REDESIGN note in SPEC_FULL.md §9).
    pub sni_proxy_addr: String,
    /// Full `host:port` string as reported by the metadata service.
    pub sni_proxy_endpoint: String,
}

#[derive(Deserialize)]
struct MetadataResponse {
    contact_info: ContactInfo,
}

#[derive(Deserialize)]
struct ContactInfo {
    local_dc: String,
    contact_points: Vec<String>,
    sni_proxy_address: String,
}

/// Parses a `/metadata` response body into an [`AstraMetadata`] value.
///
/// Factored out of the transport call so the wire format can be exercised
/// without a live TLS connection (see SPEC_FULL.md §13).
pub fn parse_metadata_response(body: &[u8]) -> Result<AstraMetadata, MetadataError> {
    let response: MetadataResponse = serde_json::from_slice(body)?;

    if response.contact_info.local_dc.is_empty() {
        return Err(MetadataError::MissingLocalDc);
    }

    let sni_proxy_address = response.contact_info.sni_proxy_address;
    let (sni_proxy_addr, _port) = sni_proxy_address
        .rsplit_once(':')
        .filter(|(host, port)| !host.is_empty() && !port.is_empty())
        .ok_or_else(|| MetadataError::BadSniAddress(sni_proxy_address.clone()))?;

    Ok(AstraMetadata {
        local_dc: response.contact_info.local_dc,
        contact_points: response.contact_info.contact_points,
        sni_proxy_addr: sni_proxy_addr.to_string(),
        sni_proxy_endpoint: sni_proxy_address,
    })
}

/// A source of Astra-style cluster metadata.
///
/// Abstracted behind a trait so `ConnectionConfig`'s refresh logic can be
/// exercised against a fake implementation in tests, without a real
/// network round-trip or TLS handshake.
#[async_trait]
pub trait MetadataClient: Send + Sync + std::fmt::Debug {
    /// Performs one metadata fetch against `host:port`.
    async fn retrieve(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<AstraMetadata, MetadataError>;
}

/// The real [`MetadataClient`]: an HTTPS GET to `https://<host>:<port>/metadata`,
/// authenticated with the bundle's mutual-TLS configuration.
#[derive(Debug)]
pub struct AstraMetadataClient {
    tls_config: TlsConfig,
}

impl AstraMetadataClient {
    /// Creates a client that will use `tls_config` for every request.
    pub fn new(tls_config: TlsConfig) -> Self {
        Self { tls_config }
    }
}

#[async_trait]
impl MetadataClient for AstraMetadataClient {
    async fn retrieve(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<AstraMetadata, MetadataError> {
        let client = reqwest::Client::builder()
            .use_preconfigured_tls((*self.tls_config.client_config()).clone())
            .timeout(timeout)
            .build()
            .map_err(MetadataError::NetworkError)?;

        let url = format!("https://{host}:{port}/metadata");
        let response = client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                MetadataError::Timeout(timeout.as_millis() as u64)
            } else if e.is_connect() {
                MetadataError::TlsError(e.to_string())
            } else {
                MetadataError::NetworkError(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::HttpError(status.as_u16()));
        }

        let body = response.bytes().await.map_err(MetadataError::NetworkError)?;
        parse_metadata_response(&body)
    }
}
