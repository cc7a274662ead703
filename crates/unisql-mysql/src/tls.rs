//! TLS upgrade for MySQL connections.
//!
//! MySQL negotiates TLS in-band:
//!
//! 1. Server sends the initial handshake with `CLIENT_SSL`
//! 2. Client sends a short SSL request packet:
//!    - 4 bytes: capability flags (with `CLIENT_SSL`)
//!    - 4 bytes: max packet size
//!    - 1 byte: collation
//!    - 23 bytes: reserved (zeros)
//! 3. Client performs the TLS handshake on the same socket
//! 4. The full handshake response and auth exchange continue over TLS
//!
//! Certificates are not verified unless `MySqlConfig::verifies_server`
//! says so. The stream type only exists with the `tls` feature; without it
//! any mode that would negotiate TLS fails at connect time.

#![allow(clippy::cast_possible_truncation)]

#[cfg(feature = "tls")]
use crate::config::MySqlConfig;
use crate::protocol::{PacketWriter, capabilities};
use unisql_core::{Error, Result, SslMode};

#[cfg(feature = "tls")]
use std::io::{Read, Write};
#[cfg(feature = "tls")]
use std::sync::Arc;

/// Build the SSL request payload sent before the TLS handshake.
pub fn build_ssl_request_packet(client_caps: u32, max_packet_size: u32, collation: u8) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(32);
    writer.write_u32_le(client_caps | capabilities::CLIENT_SSL);
    writer.write_u32_le(max_packet_size);
    writer.write_u8(collation);
    writer.write_zeros(23);
    writer.into_bytes()
}

pub const fn server_supports_ssl(server_caps: u32) -> bool {
    server_caps & capabilities::CLIENT_SSL != 0
}

/// Decide whether to upgrade, given the policy and what the server offers.
///
/// Fails when TLS is required but the server cannot do it, or when the
/// crate was built without the `tls` feature.
pub fn should_upgrade(ssl_mode: SslMode, server_caps: u32) -> Result<bool> {
    let wanted = match ssl_mode {
        SslMode::Disable => false,
        SslMode::Prefer => server_supports_ssl(server_caps) && cfg!(feature = "tls"),
        SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => {
            if !server_supports_ssl(server_caps) {
                return Err(tls_error("TLS required but the server does not offer it"));
            }
            true
        }
    };
    if wanted && !cfg!(feature = "tls") {
        return Err(tls_error(
            "TLS requested but unisql-mysql was built without the `tls` feature",
        ));
    }
    Ok(wanted)
}

fn tls_error(message: impl Into<String>) -> Error {
    Error::connection(message)
}

/// Blocking TLS stream over an already connected socket.
#[cfg(feature = "tls")]
pub struct TlsStream<S: Read + Write> {
    conn: rustls::ClientConnection,
    stream: S,
}

#[cfg(feature = "tls")]
impl<S: Read + Write> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("protocol_version", &self.conn.protocol_version())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> TlsStream<S> {
    /// Run the TLS handshake on `stream`.
    pub fn new(mut stream: S, config: &MySqlConfig) -> Result<Self> {
        let client_config = build_client_config(config)?;

        let server_name = config
            .host
            .clone()
            .try_into()
            .map_err(|e| tls_error(format!("invalid server name '{}': {}", config.host, e)))?;

        let mut conn = rustls::ClientConnection::new(Arc::new(client_config), server_name)
            .map_err(|e| tls_error(format!("failed to create TLS session: {e}")))?;

        while conn.is_handshaking() {
            while conn.wants_write() {
                conn.write_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake write error: {e}")))?;
            }
            if conn.wants_read() {
                conn.read_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake read error: {e}")))?;
                conn.process_new_packets()
                    .map_err(|e| tls_error(format!("TLS handshake error: {e}")))?;
            }
        }

        tracing::debug!(version = ?conn.protocol_version(), "TLS established");
        Ok(TlsStream { conn, stream })
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if !self.conn.wants_read() {
                return Ok(0);
            }
            if self.conn.read_tls(&mut self.stream)? == 0 {
                return Ok(0);
            }
            self.conn
                .process_new_packets()
                .map_err(|e| std::io::Error::other(format!("TLS error: {e}")))?;
        }
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.conn.writer().flush()?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        self.stream.flush()
    }
}

#[cfg(feature = "tls")]
fn build_client_config(config: &MySqlConfig) -> Result<rustls::ClientConfig> {
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
            let certs = rustls_pemfile::certs(&mut reader)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| tls_error(format!("failed to parse CA bundle: {e}")))?;
            if certs.is_empty() {
                return Err(tls_error(format!(
                    "no certificates found in '{}'",
                    path.display()
                )));
            }
            for cert in certs {
                roots
                    .add(cert)
                    .map_err(|e| tls_error(format!("failed to add CA certificate: {e}")))?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::charset;

    #[test]
    fn test_build_ssl_request_packet() {
        let payload = build_ssl_request_packet(
            capabilities::DEFAULT_CLIENT_FLAGS,
            16 * 1024 * 1024,
            charset::DEFAULT_CHARSET,
        );
        assert_eq!(payload.len(), 32);
        let caps = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        assert!(caps & capabilities::CLIENT_SSL != 0);
        assert_eq!(payload[8], charset::DEFAULT_CHARSET);
        assert!(payload[9..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_server_supports_ssl() {
        assert!(server_supports_ssl(capabilities::CLIENT_SSL));
        assert!(!server_supports_ssl(capabilities::CLIENT_PROTOCOL_41));
    }

    #[test]
    fn test_should_upgrade_disable() {
        assert!(!should_upgrade(SslMode::Disable, capabilities::CLIENT_SSL).unwrap());
    }

    #[test]
    fn test_should_upgrade_required_without_server_support() {
        assert!(should_upgrade(SslMode::Require, 0).unwrap_err().is_connection_error());
        assert!(should_upgrade(SslMode::VerifyFull, 0).is_err());
    }

    #[test]
    fn test_should_upgrade_prefer() {
        assert!(!should_upgrade(SslMode::Prefer, 0).unwrap());
        let offered = should_upgrade(SslMode::Prefer, capabilities::CLIENT_SSL).unwrap();
        assert_eq!(offered, cfg!(feature = "tls"));
    }

    #[cfg(not(feature = "tls"))]
    #[test]
    fn test_required_tls_needs_feature() {
        assert!(should_upgrade(SslMode::Require, capabilities::CLIENT_SSL).is_err());
    }
}
