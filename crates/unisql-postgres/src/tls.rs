//! TLS support for PostgreSQL connections (feature-gated).
//!
//! PostgreSQL TLS is negotiated by sending an `SSLRequest` message, reading a
//! single `S`/`N` byte and then running the TLS handshake on the same socket
//! before the startup packet. Certificates are only checked when
//! [`PgConfig::verifies_server`] says so.

use unisql_core::{Error, Result, SslMode};

#[cfg(feature = "tls")]
use crate::config::PgConfig;
#[cfg(feature = "tls")]
use std::sync::Arc;

/// What the client does after the server answers an `SSLRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslResponse {
    /// Run the TLS handshake
    Upgrade,
    /// Continue in plaintext
    Plain,
}

/// Interpret the one-byte answer to `SSLRequest` under `mode`.
pub fn interpret_ssl_response(mode: SslMode, byte: u8) -> Result<SslResponse> {
    match byte {
        b'S' => Ok(SslResponse::Upgrade),
        b'N' if mode.is_required() => Err(tls_error("server does not support SSL")),
        b'N' => Ok(SslResponse::Plain),
        other => Err(tls_error(format!(
            "unexpected SSL response: 0x{other:02x}"
        ))),
    }
}

/// Whether to send `SSLRequest` at all, failing early when the crate
/// cannot do TLS but the policy demands it.
pub fn should_request_ssl(mode: SslMode) -> Result<bool> {
    if !mode.should_try_ssl() {
        return Ok(false);
    }
    if cfg!(feature = "tls") {
        return Ok(true);
    }
    if mode.is_required() {
        return Err(tls_error(
            "TLS requested but unisql-postgres was built without the `tls` feature",
        ));
    }
    Ok(false)
}

fn tls_error(message: impl Into<String>) -> Error {
    Error::connection(message)
}

#[cfg(feature = "tls")]
pub(crate) fn server_name(host: &str) -> Result<rustls::pki_types::ServerName<'static>> {
    host.to_string()
        .try_into()
        .map_err(|e| tls_error(format!("invalid server name '{host}': {e}")))
}

#[cfg(feature = "tls")]
pub(crate) fn build_client_config(config: &PgConfig) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("failed to set TLS versions: {e}")))?;

    if !config.verifies_server() {
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth());
    }

    let mut roots = rustls::RootCertStore::empty();
    match &config.ca_cert {
        Some(path) => {
            let file = std::fs::File::open(path).map_err(|e| {
                tls_error(format!("failed to open CA bundle '{}': {e}", path.display()))
            })?;
            let mut reader = std::io::BufReader::new(file);
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| tls_error(format!("failed to parse CA bundle: {e}")))?;
                roots
                    .add(cert)
                    .map_err(|e| tls_error(format!("failed to add CA certificate: {e}")))?;
            }
            if roots.is_empty() {
                return Err(tls_error(format!(
                    "no certificates found in '{}'",
                    path.display()
                )));
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    Ok(builder.with_root_certificates(roots).with_no_client_auth())
}

/// Accepts any server certificate.
#[cfg(feature = "tls")]
#[derive(Debug)]
struct NoVerifier;

#[cfg(feature = "tls")]
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
        use rustls::SignatureScheme;
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
