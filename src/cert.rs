//! Certificate provider: picks between an operator-supplied PEM pair and a
//! freshly generated self-signed certificate for the QUIC frontend.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::config::TunnelConfig;
use crate::error::ConfigError;
use crate::tls;

/// Loads the configured certificate material, or generates a self-signed
/// one if none was supplied on the command line.
pub fn load_or_generate(
    cfg: &TunnelConfig,
) -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>), ConfigError> {
    match &cfg.cert_material {
        Some((cert_path, key_path)) => tls::load_cert_material(cert_path, key_path),
        None => tls::generate_self_signed_cert(),
    }
}
