//! PostgreSQL connection pools for the source adapter and registry backend.

use std::sync::Arc;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use rustls::ClientConfig;
use tokio_postgres::Config as PgConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::config::PgConnectionConfig;
use crate::error::{MigrateError, Result};

/// PostgreSQL `sslmode` values we understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP.
    #[default]
    Disable,
    /// TLS without certificate verification.
    Require,
    /// Certificate verification. rustls always checks the hostname too.
    VerifyCa,
    /// Certificate and hostname verification.
    VerifyFull,
}

impl SslMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "disable" | "" => Ok(SslMode::Disable),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(MigrateError::Config(format!(
                "Invalid ssl_mode '{}'. Valid values: disable, require, verify-ca, verify-full",
                other
            ))),
        }
    }

    fn tls_config(self) -> Result<Option<ClientConfig>> {
        let builder = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| MigrateError::Config(format!("TLS setup failed: {}", e)))?;

        let config = match self {
            SslMode::Disable => return Ok(None),
            SslMode::Require => {
                warn!(
                    "ssl_mode=require: TLS enabled but the server certificate is not verified. \
                     Use verify-full outside trusted networks."
                );
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
                    .with_no_client_auth()
            }
            SslMode::VerifyCa | SslMode::VerifyFull => {
                let mut roots = rustls::RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                builder
                    .with_root_certificates(roots)
                    .with_no_client_auth()
            }
        };
        Ok(Some(config))
    }
}

/// Build a pool and check that a connection can be opened.
///
/// `purpose` names the pool in log lines and error context.
pub async fn connect(config: &PgConnectionConfig, purpose: &str) -> Result<Pool> {
    let mut pg_config = PgConfig::new();
    pg_config.host(&config.host);
    pg_config.port(config.port);
    pg_config.dbname(&config.database);
    pg_config.user(&config.user);
    pg_config.password(&config.password);

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let mgr = match SslMode::parse(&config.ssl_mode)?.tls_config()? {
        Some(tls) => Manager::from_config(pg_config, MakeRustlsConnect::new(tls), mgr_config),
        None => Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config),
    };

    let pool = Pool::builder(mgr)
        .max_size(config.max_connections)
        .build()
        .map_err(|e| MigrateError::pool(e, format!("creating {} pool", purpose)))?;

    let client = pool
        .get()
        .await
        .map_err(|e| MigrateError::pool(e, format!("testing {} connection", purpose)))?;
    client.simple_query("SELECT 1").await?;

    info!(
        "Connected to {} PostgreSQL: {}:{}/{}",
        purpose, config.host, config.port, config.database
    );

    Ok(pool)
}

/// Certificate verifier for `ssl_mode=require`: encryption without authentication.
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
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
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_parsing() {
        assert_eq!(SslMode::parse("disable").unwrap(), SslMode::Disable);
        assert_eq!(SslMode::parse("REQUIRE").unwrap(), SslMode::Require);
        assert_eq!(SslMode::parse("verify-ca").unwrap(), SslMode::VerifyCa);
        assert_eq!(SslMode::parse("verify-full").unwrap(), SslMode::VerifyFull);
        assert_eq!(SslMode::parse("").unwrap(), SslMode::Disable);
        assert!(SslMode::parse("prefer").is_err());
    }

    #[test]
    fn test_disable_builds_no_tls_config() {
        assert!(SslMode::Disable.tls_config().unwrap().is_none());
    }

    #[test]
    fn test_verify_full_builds_tls_config() {
        assert!(SslMode::VerifyFull.tls_config().unwrap().is_some());
    }
}
