//! TLS sessions with `https` hops.

use std::sync::Arc;

use proxychain_core::Host;
use rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use crate::error::HopFailure;
use crate::transport::TunnelStream;

/// Pre-built TLS client configurations, one verifying against the webpki
/// roots and one accepting any certificate for `skip_verify` hops.
#[derive(Clone)]
pub struct TlsConnectors {
    verified: TlsConnector,
    insecure: TlsConnector,
}

impl std::fmt::Debug for TlsConnectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnectors").finish_non_exhaustive()
    }
}

impl Default for TlsConnectors {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsConnectors {
    pub fn new() -> Self {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let verified = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let insecure = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();

        Self {
            verified: TlsConnector::from(Arc::new(verified)),
            insecure: TlsConnector::from(Arc::new(insecure)),
        }
    }

    /// Use a custom verifying configuration, e.g. one trusting a private CA.
    pub fn with_verified_config(mut self, config: rustls::ClientConfig) -> Self {
        self.verified = TlsConnector::from(Arc::new(config));
        self
    }

    /// Run a TLS client handshake with the proxy at the far end of `stream`.
    pub(crate) async fn attach(
        &self,
        stream: TunnelStream,
        host: &Host,
        skip_verify: bool,
    ) -> Result<TunnelStream, HopFailure> {
        let sni = server_name(host)?;
        let connector = if skip_verify {
            &self.insecure
        } else {
            &self.verified
        };
        let tls = connector
            .connect(sni, stream)
            .await
            .map_err(|e| HopFailure::Tls(e.to_string()))?;
        Ok(TunnelStream::Layered(Box::new(tls)))
    }
}

fn server_name(host: &Host) -> Result<ServerName<'static>, HopFailure> {
    match host {
        Host::Ip(ip) => Ok(ServerName::from(*ip)),
        Host::Domain(d) => ServerName::try_from(d.clone())
            .map_err(|e| HopFailure::Tls(format!("invalid SNI hostname: {e}"))),
    }
}

/// Certificate verifier that accepts any certificate (for skip_verify hops).
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::CryptoProvider::get_default()
            .map(|provider| {
                provider
                    .signature_verification_algorithms
                    .supported_schemes()
            })
            .unwrap_or_default()
    }
}
