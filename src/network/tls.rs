//! TLS materializer (C3): builds an immutable, mutual-TLS configuration
//! pinned to a single server name from raw PEM bytes.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::errors::TlsError;

/// An immutable, mutual-TLS configuration pinned to a single server name.
///
/// Reused by the Astra metadata client (C4) to talk to the metadata
/// service, and cloned with a rewritten server name for every endpoint
/// produced through the SNI proxy (see [`TlsConfig::with_server_name`]).
/// Rewriting never mutates the original: it produces a fresh value.
#[derive(Clone)]
pub struct TlsConfig {
    client_config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
    server_name_str: String,
    roots: Arc<RootCertStore>,
    client_cert_chain: Vec<CertificateDer<'static>>,
    client_key: Arc<PrivateKeyDer<'static>>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl TlsConfig {
    /// Builds a TLS configuration from CA certificate, client certificate,
    /// and client key bytes (all PEM-encoded), pinned to `server_name`.
    ///
    /// The root certificate pool contains only the supplied CA. Minimum
    /// TLS version is 1.2.
    pub fn materialize(
        ca_cert_pem: &[u8],
        client_cert_pem: &[u8],
        client_key_pem: &[u8],
        server_name: impl Into<String>,
    ) -> Result<Self, TlsError> {
        let ca_certs = parse_certs(ca_cert_pem)
            .map_err(|e| TlsError::CaInvalid(format!("failed to parse CA certificate: {e}")))?;
        if ca_certs.is_empty() {
            return Err(TlsError::CaInvalid(
                "no certificates found in ca.crt".to_string(),
            ));
        }

        let mut roots = RootCertStore::empty();
        for cert in &ca_certs {
            roots
                .add(cert.clone())
                .map_err(|e| TlsError::CaInvalid(format!("CA certificate rejected: {e}")))?;
        }
        let roots = Arc::new(roots);

        let client_cert_chain = parse_certs(client_cert_pem).map_err(|e| {
            TlsError::KeyPairInvalid(format!("failed to parse client certificate: {e}"))
        })?;
        if client_cert_chain.is_empty() {
            return Err(TlsError::KeyPairInvalid(
                "no certificates found in client cert".to_string(),
            ));
        }

        let client_key = parse_private_key(client_key_pem)
            .map_err(|e| TlsError::KeyPairInvalid(format!("failed to parse client key: {e}")))?;
        let client_key = Arc::new(client_key);

        let server_name_str = server_name.into();
        let server_name = ServerName::try_from(server_name_str.clone())
            .map_err(|e| TlsError::CaInvalid(format!("invalid server name: {e}")))?;

        let client_config = build_client_config(
            &roots,
            client_cert_chain.clone(),
            clone_private_key(&client_key),
            server_name.clone(),
        )?;

        Ok(Self {
            client_config: Arc::new(client_config),
            server_name,
            server_name_str,
            roots,
            client_cert_chain,
            client_key,
        })
    }

    /// The `rustls::ClientConfig` to hand to a connector. Its verifier
    /// enforces [`TlsConfig::server_name`] regardless of what name the
    /// dialer passes in.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.client_config)
    }

    /// The server name this configuration's verifier pins, used as the
    /// TLS SNI value when present on an endpoint.
    pub fn server_name(&self) -> &str {
        &self.server_name_str
    }

    /// The pinned name as a `rustls` [`ServerName`], for handing directly
    /// to a connector that wants the typed form.
    pub fn server_name_typed(&self) -> &ServerName<'static> {
        &self.server_name
    }

    /// Produces a new `TlsConfig`, sharing the same CA/client credentials,
    /// pinned to a different server name.
    ///
    /// Used when rewriting the bundle's base TLS config for a specific
    /// `<host-id>.<sni-domain>` endpoint. The receiver is left untouched:
    /// this always clones, it never mutates `self` or any previously
    /// handed-out `TlsConfig`.
    pub fn with_server_name(&self, server_name: impl Into<String>) -> Result<Self, TlsError> {
        let server_name_str = server_name.into();
        let server_name = ServerName::try_from(server_name_str.clone())
            .map_err(|e| TlsError::CaInvalid(format!("invalid server name: {e}")))?;

        let client_config = build_client_config(
            &self.roots,
            self.client_cert_chain.clone(),
            clone_private_key(&self.client_key),
            server_name.clone(),
        )?;

        Ok(Self {
            client_config: Arc::new(client_config),
            server_name,
            server_name_str,
            roots: Arc::clone(&self.roots),
            client_cert_chain: self.client_cert_chain.clone(),
            client_key: Arc::clone(&self.client_key),
        })
    }
}

fn clone_private_key(key: &PrivateKeyDer<'static>) -> PrivateKeyDer<'static> {
    key.clone_key()
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, std::io::Error> {
    let mut reader = std::io::BufReader::new(pem);
    rustls_pemfile::certs(&mut reader).collect()
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, std::io::Error> {
    let mut reader = std::io::BufReader::new(pem);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| std::io::Error::other("no private key found in PEM input"))
}

fn build_client_config(
    roots: &Arc<RootCertStore>,
    client_cert_chain: Vec<CertificateDer<'static>>,
    client_key: PrivateKeyDer<'static>,
    pinned_name: ServerName<'static>,
) -> Result<ClientConfig, TlsError> {
    let webpki_verifier = WebPkiServerVerifier::builder(Arc::clone(roots))
        .build()
        .map_err(|e| TlsError::CaInvalid(format!("failed to build certificate verifier: {e}")))?;
    let verifier = Arc::new(PinnedNameVerifier {
        inner: webpki_verifier,
        pinned_name,
    });

    let mut config = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(client_cert_chain, client_key)
        .map_err(|e| TlsError::KeyPairInvalid(format!("rejected client certificate/key: {e}")))?;
    config.enable_sni = true;

    Ok(config)
}

/// A [`ServerCertVerifier`] that delegates to ordinary webpki path
/// validation, but always verifies against a fixed, pinned server name
/// rather than whatever name the dialer supplies.
///
/// This is how "server name pinned, verification rejects any other name"
/// (§4.3) is implemented: a connection attempted with a different SNI
/// still gets validated against `pinned_name`, so a caller cannot silently
/// widen trust by changing the name it dials with.
#[derive(Debug)]
struct PinnedNameVerifier {
    inner: Arc<WebPkiServerVerifier>,
    pinned_name: ServerName<'static>,
}

impl ServerCertVerifier for PinnedNameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.inner.verify_server_cert(
            end_entity,
            intermediates,
            &self.pinned_name,
            ocsp_response,
            now,
        )
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
