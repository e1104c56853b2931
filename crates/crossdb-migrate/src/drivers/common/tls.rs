//! TLS setup shared by the PostgreSQL and MySQL drivers.
//!
//! Both engines honor the same four `ssl_mode` values. PostgreSQL pools get a
//! rustls connector; MySQL pools get `mysql_async`'s native `SslOpts`.

use std::sync::Arc;

use mysql_async::SslOpts;
use rustls::ClientConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::config::SslMode;
use crate::error::Result;

/// Builder for PostgreSQL TLS connectors.
///
/// Centralizes TLS configuration so the reader and writer pools stay in sync.
pub struct TlsBuilder {
    ssl_mode: SslMode,
}

impl TlsBuilder {
    /// Create a new TLS builder with the given SSL mode.
    pub fn new(ssl_mode: SslMode) -> Self {
        Self { ssl_mode }
    }

    /// Build a MakeRustlsConnect instance for use with deadpool-postgres.
    ///
    /// Returns None if TLS is disabled; the caller connects with `NoTls`.
    pub fn build(&self) -> Result<Option<MakeRustlsConnect>> {
        let config = match self.build_client_config() {
            Some(config) => config,
            None => return Ok(None),
        };
        Ok(Some(MakeRustlsConnect::new(config)))
    }

    fn build_client_config(&self) -> Option<ClientConfig> {
        let config = match self.ssl_mode {
            SslMode::Disable => return None,
            SslMode::Require => {
                warn!("ssl_mode=require: TLS enabled but server certificate is not verified");
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth()
            }
            SslMode::VerifyCa | SslMode::VerifyFull => {
                info!(
                    "ssl_mode={}: certificate verification enabled",
                    self.ssl_mode
                );
                let mut root_store = rustls::RootCertStore::empty();
                root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            }
        };

        Some(config)
    }
}

/// Map `ssl_mode` onto `mysql_async` SSL options.
///
/// Returns None for [`SslMode::Disable`].
pub fn mysql_ssl_opts(ssl_mode: SslMode) -> Option<SslOpts> {
    match ssl_mode {
        SslMode::Disable => {
            warn!("TLS is disabled. Credentials will be transmitted in plaintext.");
            None
        }
        SslMode::Require => {
            warn!("ssl_mode=require: TLS enabled but server certificate is not verified");
            Some(SslOpts::default().with_danger_accept_invalid_certs(true))
        }
        SslMode::VerifyCa | SslMode::VerifyFull => {
            info!("ssl_mode={}: certificate verification enabled", ssl_mode);
            Some(SslOpts::default())
        }
    }
}

/// Certificate verifier that accepts any certificate.
///
/// Used only for `ssl_mode=require`, matching libpq semantics: the channel is
/// encrypted but the peer is not authenticated.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disable_builds_no_connector() {
        let tls = TlsBuilder::new(SslMode::Disable).build().unwrap();
        assert!(tls.is_none());
    }

    #[test]
    fn test_require_builds_connector() {
        let tls = TlsBuilder::new(SslMode::Require).build().unwrap();
        assert!(tls.is_some());
    }

    #[test]
    fn test_verify_modes_build_connector() {
        assert!(TlsBuilder::new(SslMode::VerifyCa)
            .build()
            .unwrap()
            .is_some());
        assert!(TlsBuilder::new(SslMode::VerifyFull)
            .build()
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_mysql_disable_builds_no_opts() {
        assert!(mysql_ssl_opts(SslMode::Disable).is_none());
    }

    #[test]
    fn test_mysql_require_accepts_invalid_certs() {
        let opts = mysql_ssl_opts(SslMode::Require).unwrap();
        assert!(opts.accept_invalid_certs());
    }

    #[test]
    fn test_mysql_verify_modes_verify_certs() {
        let opts = mysql_ssl_opts(SslMode::VerifyCa).unwrap();
        assert!(!opts.accept_invalid_certs());
        let opts = mysql_ssl_opts(SslMode::VerifyFull).unwrap();
        assert!(!opts.accept_invalid_certs());
    }
}
