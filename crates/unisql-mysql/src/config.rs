//! MySQL connection configuration.
//!
//! [`MySqlConfig`] is the wire client's own view of a [`DatabaseConfig`]:
//! resolved port, timeouts as `Duration`s and the session settings applied
//! right after authentication.

use std::path::PathBuf;
use std::time::Duration;

use unisql_core::{DatabaseConfig, SslMode};

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
    /// Database selected at connect time
    pub database: Option<String>,
    /// Collation id sent in the handshake response
    pub collation: u8,
    /// Character set applied with `SET NAMES` after login
    pub charset: Option<String>,
    /// Connection timeout, also used as socket read/write timeout
    pub connect_timeout: Duration,
    /// TLS policy
    pub ssl_mode: SslMode,
    /// Verify the server certificate chain when TLS is negotiated
    pub verify_certificates: bool,
    /// PEM bundle to trust instead of the built-in web roots
    pub ca_cert: Option<PathBuf>,
    /// Row lock wait bound, applied as `innodb_lock_wait_timeout`
    pub lock_wait_timeout: Option<Duration>,
    /// Max allowed packet size (default: 64MB)
    pub max_packet_size: u32,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            collation: crate::protocol::charset::DEFAULT_CHARSET,
            charset: None,
            connect_timeout: Duration::from_secs(30),
            ssl_mode: SslMode::default(),
            verify_certificates: false,
            ca_cert: None,
            lock_wait_timeout: None,
            max_packet_size: 64 * 1024 * 1024,
        }
    }
}

impl MySqlConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the character set applied with `SET NAMES`.
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    pub fn verify_certificates(mut self, verify: bool) -> Self {
        self.verify_certificates = verify;
        self
    }

    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    /// Whether the server certificate chain is checked during TLS setup.
    pub fn verifies_server(&self) -> bool {
        self.verify_certificates || self.ssl_mode.verifies_certificates()
    }

    pub fn lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = Some(timeout);
        self
    }

    /// Get the socket address string for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `innodb_lock_wait_timeout` takes whole seconds; round up, minimum 1.
    pub fn lock_wait_timeout_secs(&self) -> Option<u64> {
        self.lock_wait_timeout
            .map(|d| u64::try_from(d.as_millis().div_ceil(1000).max(1)).unwrap_or(u64::MAX))
    }

    /// Build capability flags based on configuration.
    pub fn capability_flags(&self) -> u32 {
        use crate::protocol::capabilities::{
            CLIENT_CONNECT_WITH_DB, CLIENT_SSL, DEFAULT_CLIENT_FLAGS,
        };

        let mut flags = DEFAULT_CLIENT_FLAGS & !CLIENT_CONNECT_WITH_DB;

        if self.database.is_some() {
            flags |= CLIENT_CONNECT_WITH_DB;
        }

        if self.ssl_mode.should_try_ssl() {
            flags |= CLIENT_SSL;
        }

        flags
    }
}

impl From<&DatabaseConfig> for MySqlConfig {
    fn from(config: &DatabaseConfig) -> Self {
        let mut out = MySqlConfig::new()
            .host(config.host.clone())
            .port(config.port_or_default())
            .user(config.user.clone())
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .ssl_mode(config.ssl_mode)
            .verify_certificates(config.verify_certificates);
        out.password = config.password.clone();
        if !config.database.is_empty() {
            out.database = Some(config.database.clone());
        }
        out.charset = config.charset.clone();
        out.lock_wait_timeout = config.transaction_timeout_ms.map(Duration::from_millis);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unisql_core::DriverKind;

    #[test]
    fn test_config_builder() {
        let config = MySqlConfig::new()
            .host("db.example.com")
            .port(3307)
            .user("myuser")
            .password("secret")
            .database("testdb")
            .charset("latin1")
            .connect_timeout(Duration::from_secs(10))
            .ssl_mode(SslMode::Require);

        assert_eq!(config.host, "db.example.com");
        assert_eq!(config.port, 3307);
        assert_eq!(config.user, "myuser");
        assert_eq!(config.password, Some("secret".to_string()));
        assert_eq!(config.database, Some("testdb".to_string()));
        assert_eq!(config.charset.as_deref(), Some("latin1"));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.ssl_mode, SslMode::Require);
    }

    #[test]
    fn test_socket_addr() {
        let config = MySqlConfig::new().host("db.example.com").port(3307);
        assert_eq!(config.socket_addr(), "db.example.com:3307");
    }

    #[test]
    fn test_capability_flags() {
        use crate::protocol::capabilities::*;

        let flags = MySqlConfig::new().database("test").capability_flags();
        assert!(flags & CLIENT_CONNECT_WITH_DB != 0);
        assert!(flags & CLIENT_PROTOCOL_41 != 0);
        assert!(flags & CLIENT_SECURE_CONNECTION != 0);
        assert!(flags & CLIENT_SSL == 0);

        let flags = MySqlConfig::new().ssl_mode(SslMode::Prefer).capability_flags();
        assert!(flags & CLIENT_CONNECT_WITH_DB == 0);
        assert!(flags & CLIENT_SSL != 0);
    }

    #[test]
    fn test_lock_wait_rounds_up() {
        let config = MySqlConfig::new().lock_wait_timeout(Duration::from_millis(1500));
        assert_eq!(config.lock_wait_timeout_secs(), Some(2));
        let config = MySqlConfig::new().lock_wait_timeout(Duration::from_millis(10));
        assert_eq!(config.lock_wait_timeout_secs(), Some(1));
        assert_eq!(MySqlConfig::new().lock_wait_timeout_secs(), None);
    }

    #[test]
    fn test_from_database_config() {
        let db = DatabaseConfig::new(DriverKind::WireSql)
            .host("10.0.0.5")
            .user("app")
            .password("pw")
            .database("shop")
            .charset("utf8mb4")
            .transaction_timeout(5000);
        let config = MySqlConfig::from(&db);
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 3306);
        assert_eq!(config.database.as_deref(), Some("shop"));
        assert_eq!(config.charset.as_deref(), Some("utf8mb4"));
        assert_eq!(config.lock_wait_timeout_secs(), Some(5));
        assert!(!config.verify_certificates);
        assert!(!config.verifies_server());
    }

    #[test]
    fn test_verify_modes() {
        assert!(MySqlConfig::new().verify_certificates(true).verifies_server());
        assert!(MySqlConfig::new().ssl_mode(SslMode::VerifyFull).verifies_server());
        assert!(!MySqlConfig::new().ssl_mode(SslMode::Require).verifies_server());
    }
}
