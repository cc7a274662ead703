//! PostgreSQL connection configuration.
//!
//! Provides connection parameters for establishing PostgreSQL connections
//! including authentication, TLS, and the runtime parameters sent in the
//! startup packet.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use unisql_core::{DatabaseConfig, SslMode};

/// Encoding sent when none is configured.
pub const DEFAULT_CLIENT_ENCODING: &str = "UTF8";

/// PostgreSQL connection configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 5432)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password for authentication (optional for trust auth)
    pub password: Option<String>,
    /// Database name to connect to
    pub database: String,
    /// Application name (visible in pg_stat_activity)
    pub application_name: Option<String>,
    /// Connection timeout, also used as socket timeout during startup
    pub connect_timeout: Duration,
    /// TLS policy
    pub ssl_mode: SslMode,
    /// Verify the server certificate chain when TLS is negotiated
    pub verify_certificates: bool,
    /// PEM bundle to trust instead of the built-in web roots
    pub ca_cert: Option<PathBuf>,
    /// Explicit `client_encoding`; `None` sends UTF8
    pub client_encoding: Option<String>,
    /// Sent as `idle_in_transaction_session_timeout`
    pub idle_in_transaction_timeout: Option<Duration>,
    /// Additional runtime parameters for the startup packet
    pub options: BTreeMap<String, String>,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: String::new(),
            password: None,
            database: String::new(),
            application_name: None,
            connect_timeout: Duration::from_secs(30),
            ssl_mode: SslMode::default(),
            verify_certificates: false,
            ca_cert: None,
            client_encoding: None,
            idle_in_transaction_timeout: None,
            options: BTreeMap::new(),
        }
    }
}

impl PgConfig {
    /// Create a new configuration with the given connection string components.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
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

    /// Set the character set the server converts text to.
    pub fn client_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.client_encoding = Some(encoding.into());
        self
    }

    pub fn idle_in_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.idle_in_transaction_timeout = Some(timeout);
        self
    }

    /// Set an additional runtime parameter.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Whether the server certificate chain is checked during TLS setup.
    pub fn verifies_server(&self) -> bool {
        self.verify_certificates || self.ssl_mode.verifies_certificates()
    }

    /// Build the startup parameters to send to the server.
    pub fn startup_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("user".to_string(), self.user.clone()),
            (
                "client_encoding".to_string(),
                self.client_encoding
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CLIENT_ENCODING.to_string()),
            ),
        ];

        if !self.database.is_empty() {
            params.push(("database".to_string(), self.database.clone()));
        }

        if let Some(app_name) = &self.application_name {
            params.push(("application_name".to_string(), app_name.clone()));
        }

        if let Some(timeout) = self.idle_in_transaction_timeout {
            // Milliseconds; 0 would disable the limit
            let ms = timeout.as_millis().max(1);
            params.push((
                "idle_in_transaction_session_timeout".to_string(),
                ms.to_string(),
            ));
        }

        for (k, v) in &self.options {
            params.push((k.clone(), v.clone()));
        }

        params
    }

    /// Get the socket address string for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&DatabaseConfig> for PgConfig {
    fn from(config: &DatabaseConfig) -> Self {
        let mut out = PgConfig::new(
            config.host.clone(),
            config.user.clone(),
            config.database.clone(),
        )
        .port(config.port_or_default())
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .ssl_mode(config.ssl_mode)
        .verify_certificates(config.verify_certificates);
        out.password = config.password.clone();
        out.client_encoding = config.charset.clone();
        out.idle_in_transaction_timeout = config.transaction_timeout_ms.map(Duration::from_millis);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unisql_core::DriverKind;

    fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_config_builder() {
        let config = PgConfig::new("localhost", "postgres", "testdb")
            .port(5433)
            .password("secret")
            .application_name("myapp")
            .connect_timeout(Duration::from_secs(10))
            .ssl_mode(SslMode::Prefer)
            .option("timezone", "UTC");

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5433);
        assert_eq!(config.user, "postgres");
        assert_eq!(config.database, "testdb");
        assert_eq!(config.password, Some("secret".to_string()));
        assert_eq!(config.application_name, Some("myapp".to_string()));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.ssl_mode, SslMode::Prefer);
        assert_eq!(config.options.get("timezone"), Some(&"UTC".to_string()));
    }

    #[test]
    fn test_startup_params() {
        let config = PgConfig::new("localhost", "postgres", "testdb")
            .application_name("myapp")
            .option("timezone", "UTC");

        let params = config.startup_params();

        assert_eq!(param(&params, "user"), Some("postgres"));
        assert_eq!(param(&params, "database"), Some("testdb"));
        assert_eq!(param(&params, "client_encoding"), Some("UTF8"));
        assert_eq!(param(&params, "application_name"), Some("myapp"));
        assert_eq!(param(&params, "timezone"), Some("UTC"));
        assert_eq!(param(&params, "idle_in_transaction_session_timeout"), None);
    }

    #[test]
    fn test_startup_params_session_settings() {
        let params = PgConfig::new("localhost", "postgres", "")
            .client_encoding("LATIN1")
            .idle_in_transaction_timeout(Duration::from_millis(2500))
            .startup_params();

        assert_eq!(param(&params, "client_encoding"), Some("LATIN1"));
        assert_eq!(
            param(&params, "idle_in_transaction_session_timeout"),
            Some("2500")
        );
        // Empty database name falls back to the user name on the server
        assert_eq!(param(&params, "database"), None);
    }

    #[test]
    fn test_socket_addr() {
        let config = PgConfig::new("db.example.com", "user", "db").port(5433);
        assert_eq!(config.socket_addr(), "db.example.com:5433");
    }

    #[test]
    fn test_from_database_config() {
        let db = DatabaseConfig::new(DriverKind::PooledSql)
            .host("10.0.0.7")
            .user("app")
            .password("pw")
            .database("shop")
            .charset("UTF8")
            .transaction_timeout(30_000)
            .ssl_mode(SslMode::Require);
        let config = PgConfig::from(&db);
        assert_eq!(config.host, "10.0.0.7");
        assert_eq!(config.port, 5432);
        assert_eq!(config.user, "app");
        assert_eq!(config.password.as_deref(), Some("pw"));
        assert_eq!(config.client_encoding.as_deref(), Some("UTF8"));
        assert_eq!(
            config.idle_in_transaction_timeout,
            Some(Duration::from_secs(30))
        );
        assert!(!config.verifies_server());
    }

    #[test]
    fn test_verify_modes() {
        assert!(PgConfig::default().verify_certificates(true).verifies_server());
        assert!(PgConfig::default().ssl_mode(SslMode::VerifyCa).verifies_server());
        assert!(!PgConfig::default().ssl_mode(SslMode::Prefer).verifies_server());
    }
}
