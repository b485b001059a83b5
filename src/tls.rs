//! Self-signed certificate generation and rustls wiring for the QUIC leg.
//!
//! The QUIC transport only ever carries already-encrypted bytes (the
//! session's stream cipher runs on top of it), so the TLS layer here
//! exists to satisfy QUIC's mandatory-encryption requirement, not to
//! provide the tunnel's actual confidentiality. That is why the client
//! side skips server certificate verification entirely: there is no
//! certificate authority for a point-to-point tunnel to trust.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use rsa::pkcs8::EncodePrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};

use crate::error::ConfigError;

pub const ALPN_PROTOCOL: &[u8] = b"qtunnel-quic";

/// `rustls::ServerConfig::builder()`/`ClientConfig::builder()` resolve the
/// process-level default `CryptoProvider`, which the `ring` feature does
/// not install on its own. Call this before either builder runs; safe to
/// call more than once or from both the server and client path.
fn ensure_crypto_provider_installed() {
    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Long idle timeout applied to every QUIC connection so a stuck half-open
/// stream is eventually detected instead of pinning resources forever.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

fn transport_config() -> Arc<quinn::TransportConfig> {
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(
        IDLE_TIMEOUT
            .try_into()
            .expect("30 minutes fits in quinn's idle timeout range"),
    ));
    Arc::new(transport)
}

/// Generates a fresh 2048-bit RSA self-signed certificate valid for one
/// year, with the loopback SANs the frontend listener is always reached
/// through.
pub fn generate_self_signed_cert(
) -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>), ConfigError> {
    let rsa_key = rsa::RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048)
        .map_err(|e| ConfigError::Certificate(e.to_string()))?;
    let pkcs8_der = rsa_key
        .to_pkcs8_der()
        .map_err(|e| ConfigError::Certificate(e.to_string()))?;
    let key_pair = KeyPair::try_from(pkcs8_der.as_bytes())
        .map_err(|e| ConfigError::Certificate(e.to_string()))?;

    let mut params = CertificateParams::new(Vec::new())
        .map_err(|e| ConfigError::Certificate(e.to_string()))?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "qtunnel");
    dn.push(DnType::CountryName, "US");
    params.distinguished_name = dn;
    params.not_before = SystemTime::now().into();
    params.not_after = (SystemTime::now() + Duration::from_secs(365 * 24 * 60 * 60)).into();
    params.subject_alt_names = vec![
        SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        SanType::DnsName("localhost".try_into().map_err(|_| {
            ConfigError::Certificate("invalid localhost SAN".into())
        })?),
    ];

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| ConfigError::Certificate(e.to_string()))?;

    Ok((
        cert.der().clone(),
        PrivateKeyDer::Pkcs8(pkcs8_der.as_bytes().to_vec().into()),
    ))
}

/// Loads a PEM certificate chain and private key from disk.
pub fn load_cert_material(
    cert_path: &Path,
    key_path: &Path,
) -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>), ConfigError> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| ConfigError::Certificate(format!("reading {cert_path:?}: {e}")))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| ConfigError::Certificate(format!("reading {key_path:?}: {e}")))?;

    let cert = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .next()
        .ok_or_else(|| ConfigError::Certificate("no certificate found in PEM file".into()))?
        .map_err(|e| ConfigError::Certificate(e.to_string()))?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| ConfigError::Certificate(e.to_string()))?
        .ok_or_else(|| ConfigError::Certificate("no private key found in PEM file".into()))?;

    Ok((cert, key))
}

/// Builds the `quinn::ServerConfig` the frontend QUIC listener accepts
/// connections with.
pub fn server_config(
    cert: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
) -> Result<quinn::ServerConfig, ConfigError> {
    ensure_crypto_provider_installed();
    let mut crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .map_err(|e| ConfigError::Certificate(e.to_string()))?;
    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
        .map_err(|e| ConfigError::Certificate(e.to_string()))?;
    let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_crypto));
    server_config.transport_config(transport_config());
    Ok(server_config)
}

/// Builds the `quinn::ClientConfig` the backend-dialing side connects
/// with. Certificate verification is disabled: a point-to-point tunnel
/// has no certificate authority to anchor trust in.
pub fn insecure_client_config() -> quinn::ClientConfig {
    ensure_crypto_provider_installed();
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoServerVerification))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .expect("rustls config for QUIC client is always valid");
    let mut client_config = quinn::ClientConfig::new(Arc::new(quic_crypto));
    client_config.transport_config(transport_config());
    client_config
}

/// Accepts any certificate the peer presents. Sound only because the
/// session's own stream cipher is the actual confidentiality boundary;
/// QUIC's TLS handshake here is load-bearing for framing, not trust.
#[derive(Debug)]
struct NoServerVerification;

impl rustls::client::danger::ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_cert_generates_without_error() {
        let (cert, _key) = generate_self_signed_cert().unwrap();
        assert!(!cert.as_ref().is_empty());
    }
}
