//! MySQL connection configuration.
//!
//! Provides connection parameters for establishing MySQL connections
//! including authentication, SSL, and connection options.

use std::path::PathBuf;
use std::time::Duration;

use crate::charset::{self, CharacterSet};

/// SSL mode for MySQL connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Do not use SSL
    Disable,
    /// Prefer SSL if available, fall back to non-SSL
    #[default]
    Preferred,
    /// Require SSL connection
    Required,
    /// Require SSL and verify server certificate
    VerifyCa,
    /// Require SSL and verify server certificate matches hostname
    VerifyIdentity,
}

impl SslMode {
    /// Check if SSL should be attempted.
    pub const fn should_try_ssl(self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    /// Check if SSL is required.
    pub const fn is_required(self) -> bool {
        matches!(
            self,
            SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity
        )
    }
}

/// Certificates and verification options for TLS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM file with the CA certificate(s) used to verify the server
    pub ca_cert_path: Option<PathBuf>,
    /// PEM client certificate for mutual TLS
    pub client_cert_path: Option<PathBuf>,
    /// PEM private key matching `client_cert_path`
    pub client_key_path: Option<PathBuf>,
    /// Name used for SNI and identity checks instead of the host
    pub server_name: Option<String>,
    /// Accept any server certificate
    pub danger_skip_verify: bool,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(path.into());
        self
    }

    pub fn client_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_key_path = Some(path.into());
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Disable certificate verification.
    ///
    /// # Security Warning
    /// The connection is encrypted but the server is not authenticated.
    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.danger_skip_verify = skip;
        self
    }
}

/// MySQL connection configuration.
#[derive(Debug, Clone)]
pub struct MySqlConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: Option<String>,
    /// Database name to connect to (optional at connect time)
    pub database: Option<String>,
    /// Connection collation id (default: utf8mb4_general_ci)
    pub collation: u16,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// SSL mode
    pub ssl_mode: SslMode,
    /// Certificates used when TLS is negotiated
    pub tls: TlsConfig,
    /// Additional connection attributes, sent in order
    pub attributes: Vec<(String, String)>,
    /// Allow several statements separated by `;` in one query
    pub multi_statements: bool,
    /// Max allowed packet size (default: 64MB)
    pub max_packet_size: u32,
    /// Server RSA public key (PEM) for `caching_sha2_password` and
    /// `sha256_password` over plaintext connections
    pub server_public_key: Option<Vec<u8>>,
    /// Initial size of the read buffer
    pub read_buffer_size: usize,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            collation: charset::UTF8MB4_GENERAL_CI,
            connect_timeout: Duration::from_secs(30),
            ssl_mode: SslMode::default(),
            tls: TlsConfig::default(),
            attributes: Vec::new(),
            multi_statements: false,
            max_packet_size: 64 * 1024 * 1024, // 64MB
            server_public_key: None,
            read_buffer_size: 8 * 1024,
        }
    }
}

impl MySqlConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hostname.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the connection collation.
    pub fn collation(mut self, collation: u16) -> Self {
        self.collation = collation;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the SSL mode.
    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    /// Set the TLS certificates and verification options.
    pub fn tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Set a connection attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((key, value)),
        }
        self
    }

    /// Enable or disable multi-statement queries.
    pub fn multi_statements(mut self, enabled: bool) -> Self {
        self.multi_statements = enabled;
        self
    }

    /// Set the max allowed packet size.
    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Provide the server's RSA public key in PEM form.
    pub fn server_public_key(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.server_public_key = Some(pem.into());
        self
    }

    /// Set the initial read buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Get the socket address string for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Character set implied by the configured collation.
    pub fn character_set(&self) -> Option<CharacterSet> {
        charset::by_collation(self.collation)
    }

    /// Build capability flags based on configuration.
    ///
    /// `CLIENT_SSL` is not included here; it is added only when TLS is
    /// actually negotiated with the server.
    pub fn capability_flags(&self) -> u32 {
        use crate::protocol::capabilities::{
            CLIENT_CONNECT_ATTRS, CLIENT_CONNECT_WITH_DB, CLIENT_MULTI_STATEMENTS,
            DEFAULT_CLIENT_FLAGS,
        };

        let mut flags = DEFAULT_CLIENT_FLAGS;

        if self.database.is_some() {
            flags |= CLIENT_CONNECT_WITH_DB;
        }

        if self.multi_statements {
            flags |= CLIENT_MULTI_STATEMENTS;
        }

        if !self.attributes.is_empty() {
            flags |= CLIENT_CONNECT_ATTRS;
        }

        flags
    }
}
