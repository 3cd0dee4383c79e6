//! TLS support for MySQL connections.
//!
//! The upgrade happens in the middle of the handshake:
//!
//! 1. Server sends its greeting with `CLIENT_SSL` in the capability flags
//! 2. Client sends the short SSL request (capabilities, max packet size,
//!    collation, 23 zero bytes)
//! 3. Client performs the TLS handshake on the same socket
//! 4. The handshake response and everything after it travel encrypted
//!
//! [`TlsStream`] wraps a blocking stream and [`AsyncTlsStream`] an
//! asupersync `TcpStream`. Both need the `tls` feature:
//!
//! ```toml
//! [dependencies]
//! mywire-client = { version = "0.2", features = ["tls"] }
//! ```

use crate::config::{SslMode, TlsConfig};
use crate::protocol::capabilities;
use mywire_core::{ConnectionErrorKind, Error};

#[cfg(feature = "tls")]
use crate::config::MySqlConfig;
#[cfg(feature = "tls")]
use crate::transport::{flush_plain, read_some_plain, write_all_plain};
#[cfg(feature = "tls")]
use asupersync::net::TcpStream;
#[cfg(feature = "tls")]
use std::io::{Read, Write};
#[cfg(feature = "tls")]
use std::sync::Arc;

/// Check if the server supports SSL/TLS.
///
/// # Arguments
///
/// * `server_caps` - Server capability flags from handshake
///
/// # Returns
///
/// `true` if the server has the CLIENT_SSL capability flag set.
pub const fn server_supports_ssl(server_caps: u32) -> bool {
    server_caps & capabilities::CLIENT_SSL != 0
}

/// Validate SSL mode against server capabilities.
///
/// # Returns
///
/// - `Ok(true)` if SSL should be used
/// - `Ok(false)` if SSL should not be used
/// - `Err(_)` if SSL is required but not supported by server
pub fn validate_ssl_mode(ssl_mode: SslMode, server_caps: u32) -> Result<bool, Error> {
    let server_supports = server_supports_ssl(server_caps);

    match ssl_mode {
        SslMode::Disable => Ok(false),
        SslMode::Preferred => Ok(server_supports),
        SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if server_supports {
                Ok(true)
            } else {
                Err(tls_error("SSL required but server does not support it"))
            }
        }
    }
}

/// Decide whether to upgrade, given what the transport can do.
///
/// A transport without TLS support (the `tls` feature is off, or the
/// stream is not a socket) behaves like a server without `CLIENT_SSL`.
pub fn negotiate_tls(
    ssl_mode: SslMode,
    server_caps: u32,
    transport_supports_tls: bool,
) -> Result<bool, Error> {
    if transport_supports_tls || ssl_mode == SslMode::Disable {
        return validate_ssl_mode(ssl_mode, server_caps);
    }
    if ssl_mode.is_required() {
        return Err(tls_error(
            "SSL required but the transport does not support TLS \
             (is the 'tls' feature enabled?)",
        ));
    }
    Ok(false)
}

/// Validate TLS configuration for the given SSL mode.
///
/// # Arguments
///
/// * `ssl_mode` - The requested SSL mode
/// * `tls_config` - The TLS configuration
///
/// # Returns
///
/// `Ok(())` if configuration is valid, `Err(_)` with details if not.
pub fn validate_tls_config(ssl_mode: SslMode, tls_config: &TlsConfig) -> Result<(), Error> {
    match ssl_mode {
        SslMode::Disable | SslMode::Preferred | SslMode::Required => {
            // No certificate validation required for these modes
            Ok(())
        }
        SslMode::VerifyCa | SslMode::VerifyIdentity => {
            // Need CA certificate for server verification
            if tls_config.ca_cert_path.is_none() && !tls_config.danger_skip_verify {
                return Err(tls_error(
                    "CA certificate required for VerifyCa/VerifyIdentity mode. \
                     Set ca_cert_path or danger_skip_verify.",
                ));
            }

            // If client cert is provided, key must also be provided
            if tls_config.client_cert_path.is_some() && tls_config.client_key_path.is_none() {
                return Err(tls_error(
                    "Client certificate provided without client key. \
                     Both must be set for mutual TLS.",
                ));
            }

            Ok(())
        }
    }
}

/// Create a TLS-related connection error.
fn tls_error(message: impl Into<String>) -> Error {
    Error::connection(ConnectionErrorKind::Ssl, message)
}

// ============================================================================
// Blocking TLS stream
// ============================================================================

/// Blocking TLS connection wrapper using rustls.
///
/// Wraps an already connected stream and implements `Read` and `Write`
/// over the decrypted data.
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
            .field("is_handshaking", &self.conn.is_handshaking())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> TlsStream<S> {
    /// Perform the TLS handshake over `stream`.
    ///
    /// `server_name` is used for SNI and certificate checks unless
    /// `tls_config.server_name` overrides it.
    pub fn new(
        mut stream: S,
        tls_config: &TlsConfig,
        server_name: &str,
        ssl_mode: SslMode,
    ) -> Result<Self, Error> {
        let mut conn = new_client_connection(tls_config, server_name, ssl_mode)?;

        while conn.is_handshaking() {
            while conn.wants_write() {
                conn.write_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake write error: {e}")))?;
            }
            stream
                .flush()
                .map_err(|e| tls_error(format!("TLS handshake write error: {e}")))?;

            if conn.wants_read() {
                let n = conn
                    .read_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake read error: {e}")))?;
                if n == 0 {
                    return Err(tls_error("connection closed during TLS handshake"));
                }
                conn.process_new_packets()
                    .map_err(|e| tls_error(format!("TLS handshake error: {e}")))?;
            }
        }

        tracing::debug!(version = ?conn.protocol_version(), "TLS handshake complete");
        Ok(TlsStream { conn, stream })
    }

    /// Get the negotiated protocol version.
    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// Queue a close_notify alert; it goes out with the next flush.
    pub fn close_notify(&mut self) {
        self.conn.send_close_notify();
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

// ============================================================================
// Async TLS stream
// ============================================================================

/// TLS over an asupersync `TcpStream`.
///
/// rustls does no I/O itself: encrypted records are moved between the
/// `ClientConnection` and the socket by the methods below.
#[cfg(feature = "tls")]
pub struct AsyncTlsStream {
    tcp: TcpStream,
    tls: rustls::ClientConnection,
}

#[cfg(feature = "tls")]
impl AsyncTlsStream {
    /// Perform the TLS handshake over `tcp`.
    pub async fn handshake(mut tcp: TcpStream, config: &MySqlConfig) -> Result<Self, Error> {
        let mut tls = new_client_connection(&config.tls, &config.host, config.ssl_mode)?;

        while tls.is_handshaking() {
            while tls.wants_write() {
                let mut out = Vec::new();
                tls.write_tls(&mut out)
                    .map_err(|e| tls_error(format!("TLS handshake write error: {e}")))?;
                if !out.is_empty() {
                    write_all_plain(&mut tcp, &out)
                        .await
                        .map_err(|e| tls_error(format!("TLS handshake write error: {e}")))?;
                }
            }

            if tls.wants_read() {
                let mut buf = [0u8; 8192];
                let n = read_some_plain(&mut tcp, &mut buf)
                    .await
                    .map_err(|e| tls_error(format!("TLS handshake read error: {e}")))?;
                if n == 0 {
                    return Err(tls_error("connection closed during TLS handshake"));
                }
                let mut cursor = std::io::Cursor::new(&buf[..n]);
                tls.read_tls(&mut cursor)
                    .map_err(|e| tls_error(format!("TLS handshake read error: {e}")))?;
                tls.process_new_packets()
                    .map_err(|e| tls_error(format!("TLS handshake error: {e}")))?;
            }
        }

        tracing::debug!(version = ?tls.protocol_version(), "TLS handshake complete");
        Ok(Self { tcp, tls })
    }

    /// Read decrypted bytes, pulling records from the socket as needed.
    /// Returns 0 at end of stream.
    pub async fn read_plain(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.tls.reader().read(out) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if !self.tls.wants_read() {
                return Ok(0);
            }

            let mut enc = [0u8; 8192];
            let n = read_some_plain(&mut self.tcp, &mut enc).await?;
            if n == 0 {
                return Ok(0);
            }

            let mut cursor = std::io::Cursor::new(&enc[..n]);
            self.tls.read_tls(&mut cursor)?;
            self.tls
                .process_new_packets()
                .map_err(|e| std::io::Error::other(format!("TLS error: {e}")))?;
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.tls.writer().write(&buf[written..])?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "TLS write zero",
                ));
            }
            written += n;
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.tls.writer().flush()?;
        while self.tls.wants_write() {
            let mut out = Vec::new();
            self.tls.write_tls(&mut out)?;
            if !out.is_empty() {
                write_all_plain(&mut self.tcp, &out).await?;
            }
        }
        flush_plain(&mut self.tcp).await
    }

    /// Send close_notify and flush.
    pub async fn close(&mut self) -> std::io::Result<()> {
        self.tls.send_close_notify();
        self.flush().await
    }
}

#[cfg(feature = "tls")]
fn new_client_connection(
    tls_config: &TlsConfig,
    host: &str,
    ssl_mode: SslMode,
) -> Result<rustls::ClientConnection, Error> {
    let config = build_client_config(tls_config, ssl_mode)?;
    let sni_name = tls_config.server_name.as_deref().unwrap_or(host);
    let server_name = sni_name
        .to_string()
        .try_into()
        .map_err(|e| tls_error(format!("Invalid server name '{sni_name}': {e}")))?;
    rustls::ClientConnection::new(Arc::new(config), server_name)
        .map_err(|e| tls_error(format!("Failed to create TLS connection: {e}")))
}

/// Build a rustls ClientConfig based on TLS configuration and SSL mode.
///
/// `Preferred` and `Required` only ask for encryption, as MySQL clients
/// do, so self-signed server certificates are accepted. The verifying
/// modes check the chain against the configured CA, or the webpki roots
/// when none is set.
#[cfg(feature = "tls")]
fn build_client_config(
    tls_config: &TlsConfig,
    ssl_mode: SslMode,
) -> Result<rustls::ClientConfig, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    match ssl_mode {
        SslMode::Disable => Err(tls_error("TLS requested with SslMode::Disable")),
        SslMode::Preferred | SslMode::Required => build_no_verify_config(&provider, tls_config),
        SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if tls_config.danger_skip_verify {
                build_no_verify_config(&provider, tls_config)
            } else if let Some(ca_path) = &tls_config.ca_cert_path {
                build_custom_ca_config(&provider, tls_config, ca_path)
            } else {
                build_webpki_config(&provider, tls_config)
            }
        }
    }
}

#[cfg(feature = "tls")]
fn build_no_verify_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig, Error> {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error as RustlsError, SignatureScheme};

    /// A certificate verifier that accepts any certificate (insecure!).
    #[derive(Debug)]
    struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, RustlsError> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
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

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier));

    add_client_auth(builder, tls_config)
}

/// Build a ClientConfig using webpki-roots CA bundle.
#[cfg(feature = "tls")]
fn build_webpki_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig, Error> {
    use rustls::RootCertStore;

    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {}", e)))?
        .with_root_certificates(root_store);

    // Add client certificate if configured
    let config = add_client_auth(builder, tls_config)?;

    Ok(config)
}

/// Build a ClientConfig using a custom CA certificate.
#[cfg(feature = "tls")]
fn build_custom_ca_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls_config: &TlsConfig,
    ca_path: &std::path::Path,
) -> Result<rustls::ClientConfig, Error> {
    use rustls::RootCertStore;
    use std::fs::File;
    use std::io::BufReader;

    // Load CA certificate(s)
    let ca_file = File::open(ca_path).map_err(|e| {
        tls_error(format!(
            "Failed to open CA certificate '{}': {}",
            ca_path.display(),
            e
        ))
    })?;
    let mut reader = BufReader::new(ca_file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("Failed to parse CA certificate: {}", e)))?;

    if certs.is_empty() {
        return Err(tls_error(format!(
            "No certificates found in CA file '{}'",
            ca_path.display()
        )));
    }

    let mut root_store = RootCertStore::empty();
    for cert in certs {
        root_store
            .add(cert)
            .map_err(|e| tls_error(format!("Failed to add CA certificate: {}", e)))?;
    }

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {}", e)))?
        .with_root_certificates(root_store);

    // Add client certificate if configured
    let config = add_client_auth(builder, tls_config)?;

    Ok(config)
}

/// Add client authentication if configured.
#[cfg(feature = "tls")]
fn add_client_auth(
    builder: rustls::ConfigBuilder<rustls::ClientConfig, rustls::client::WantsClientCert>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig, Error> {
    use std::fs::File;
    use std::io::BufReader;

    if let (Some(cert_path), Some(key_path)) =
        (&tls_config.client_cert_path, &tls_config.client_key_path)
    {
        // Load client certificate
        let cert_file = File::open(cert_path).map_err(|e| {
            tls_error(format!(
                "Failed to open client cert '{}': {}",
                cert_path.display(),
                e
            ))
        })?;
        let mut cert_reader = BufReader::new(cert_file);

        let certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| tls_error(format!("Failed to parse client certificate: {}", e)))?;

        if certs.is_empty() {
            return Err(tls_error(format!(
                "No certificates found in client cert file '{}'",
                cert_path.display()
            )));
        }

        // Load client private key
        let key_file = File::open(key_path).map_err(|e| {
            tls_error(format!(
                "Failed to open client key '{}': {}",
                key_path.display(),
                e
            ))
        })?;
        let mut key_reader = BufReader::new(key_file);

        let key = rustls_pemfile::private_key(&mut key_reader)
            .map_err(|e| tls_error(format!("Failed to parse client key: {}", e)))?
            .ok_or_else(|| {
                tls_error(format!("No private key found in '{}'", key_path.display()))
            })?;

        builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| tls_error(format!("Failed to configure client auth: {}", e)))
    } else {
        Ok(builder.with_no_client_auth())
    }
}
