//! PostgreSQL connection implementation.
//!
//! This module implements a blocking client for the PostgreSQL frontend/backend
//! protocol: connection establishment, authentication, simple and extended
//! queries, and the state tracking the pool relies on.
//!
//! Statements without parameters use the simple query protocol. Statements
//! with parameters are sent as one Parse/Bind/Describe/Execute/Sync batch on
//! the unnamed statement, with every parameter and result in text format.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use unisql_core::{Error, NativeError, ResultSet, Result, Value};

use crate::auth::{SCRAM_SHA_256, ScramClient, md5_password};
use crate::config::PgConfig;
use crate::protocol::{
    BackendMessage, DescribeKind, ErrorFields, FieldDescription, FrontendMessage, MessageReader,
    MessageWriter, PROTOCOL_VERSION, TransactionStatus,
};
use crate::sql::rewrite_placeholders;
use crate::tls::{self, SslResponse};
use crate::types;

/// `invalid_parameter_value`, raised for a bad `client_encoding`
const INVALID_PARAMETER_VALUE: &str = "22023";
/// `out_of_memory`
const OUT_OF_MEMORY: &str = "53200";

enum PgStream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Read for PgStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            PgStream::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            PgStream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for PgStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            PgStream::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            PgStream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            PgStream::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            PgStream::Tls(s) => s.flush(),
        }
    }
}

/// Connection state in the PostgreSQL protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP connection established, negotiating TLS or sending startup
    Connecting,
    /// Performing authentication handshake
    Authenticating,
    /// Ready for queries
    Ready,
    /// I/O or protocol failure; the session cannot be reused
    Broken,
    /// Terminate sent or the connection was dropped
    Closed,
}

/// Which step of a request an `ErrorResponse` answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Startup,
    Parse,
    Execute,
}

/// PostgreSQL connection.
///
/// Manages a TCP connection to a PostgreSQL server, handling the wire protocol,
/// authentication, and transaction status tracking.
pub struct PgConnection {
    stream: PgStream,
    /// Handle to the same socket, for timeouts and shutdown under TLS
    socket: TcpStream,
    state: ConnectionState,
    transaction_status: TransactionStatus,
    /// Backend process ID (for query cancellation)
    process_id: i32,
    secret_key: i32,
    /// Server parameters received during startup and later ParameterStatus
    parameters: HashMap<String, String>,
    last_insert_id: Option<i64>,
    config: PgConfig,
    reader: MessageReader,
    writer: MessageWriter,
    read_buf: Vec<u8>,
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("state", &self.state)
            .field("transaction_status", &self.transaction_status)
            .field("process_id", &self.process_id)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

impl PgConnection {
    /// Establish a new connection to the PostgreSQL server.
    ///
    /// This performs the complete connection handshake:
    /// 1. TCP connection
    /// 2. SSL negotiation (if configured)
    /// 3. Startup message with `client_encoding` and session settings
    /// 4. Authentication (cleartext, MD5 or SCRAM-SHA-256)
    /// 5. Receive server parameters and ReadyForQuery
    #[tracing::instrument(level = "debug", skip(config), fields(host = %config.host, port = config.port))]
    pub fn connect(config: PgConfig) -> Result<Self> {
        let stream = open_socket(&config)?;
        let socket = stream
            .try_clone()
            .map_err(|e| Error::io("failed to clone socket", e))?;

        let mut conn = Self {
            stream: PgStream::Plain(stream),
            socket,
            state: ConnectionState::Connecting,
            transaction_status: TransactionStatus::Idle,
            process_id: 0,
            secret_key: 0,
            parameters: HashMap::new(),
            last_insert_id: None,
            config,
            reader: MessageReader::new(),
            writer: MessageWriter::new(),
            read_buf: vec![0u8; 8192],
        };

        if tls::should_request_ssl(conn.config.ssl_mode)? {
            conn.negotiate_ssl()?;
        }

        conn.send_message(&FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params: conn.config.startup_params(),
        })?;
        conn.state = ConnectionState::Authenticating;

        conn.handle_auth()?;
        conn.read_startup_messages()?;

        // Startup timeouts must not cut off long-running statements
        conn.socket.set_read_timeout(None).ok();
        conn.socket.set_write_timeout(None).ok();

        tracing::debug!(
            process_id = conn.process_id,
            server_version = conn.parameter("server_version").unwrap_or("unknown"),
            "PostgreSQL session ready"
        );
        Ok(conn)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn is_tls(&self) -> bool {
        match self.stream {
            PgStream::Plain(_) => false,
            #[cfg(feature = "tls")]
            PgStream::Tls(_) => true,
        }
    }

    /// Get the backend process ID (for query cancellation).
    pub fn process_id(&self) -> i32 {
        self.process_id
    }

    pub fn secret_key(&self) -> i32 {
        self.secret_key
    }

    /// Get a server parameter value such as `server_version`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Whether the server reports an open (possibly failed) transaction block.
    pub fn in_transaction(&self) -> bool {
        self.transaction_status != TransactionStatus::Idle
    }

    /// Id returned by the most recent `INSERT ... RETURNING` of an integer.
    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    /// Run a statement and materialize its rows.
    ///
    /// `?` placeholders are rewritten to `$n`; statements already written
    /// with `$n` are sent unchanged.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        self.ensure_ready()?;
        let result = if params.is_empty() {
            self.simple_query(sql)
        } else {
            self.extended_query(sql, params)
        };
        let result = result.map_err(|e| e.with_sql(sql))?;
        if result.last_insert_id.is_some() {
            self.last_insert_id = result.last_insert_id;
        }
        Ok(result)
    }

    /// Run a statement and return the affected row count.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self.query(sql, params)?.affected_rows)
    }

    /// Round-trip an empty query.
    pub fn ping(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.simple_query("").map(|_| ())
    }

    /// Send Terminate and shut the socket down.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Closed => return Ok(()),
            ConnectionState::Broken => {
                self.state = ConnectionState::Closed;
                self.socket.shutdown(Shutdown::Both).ok();
                return Ok(());
            }
            _ => {}
        }
        let sent = self.send_message(&FrontendMessage::Terminate);
        self.state = ConnectionState::Closed;
        self.socket.shutdown(Shutdown::Both).ok();
        sent
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Closed => Err(Error::connection("connection is closed")),
            ConnectionState::Broken => Err(Error::connection("connection is broken")),
            ConnectionState::Connecting | ConnectionState::Authenticating => {
                Err(Error::connection("connection is still being established"))
            }
        }
    }

    // ==================== SSL Negotiation ====================

    fn negotiate_ssl(&mut self) -> Result<()> {
        self.send_message(&FrontendMessage::SSLRequest)?;

        let mut response = [0u8; 1];
        self.stream
            .read_exact(&mut response)
            .map_err(|e| Error::io("failed to read SSL response", e))?;

        match tls::interpret_ssl_response(self.config.ssl_mode, response[0])? {
            SslResponse::Upgrade => self.upgrade_tls(),
            SslResponse::Plain => {
                tracing::debug!("server declined SSL, continuing in plaintext");
                Ok(())
            }
        }
    }

    #[cfg(feature = "tls")]
    fn upgrade_tls(&mut self) -> Result<()> {
        let client_config = tls::build_client_config(&self.config)?;
        let server_name = tls::server_name(&self.config.host)?;
        let session = rustls::ClientConnection::new(std::sync::Arc::new(client_config), server_name)
            .map_err(|e| Error::connection(format!("failed to create TLS session: {e}")))?;
        let plain = self
            .socket
            .try_clone()
            .map_err(|e| Error::io("failed to clone socket", e))?;

        let mut tls_stream = rustls::StreamOwned::new(session, plain);
        while tls_stream.conn.is_handshaking() {
            tls_stream
                .conn
                .complete_io(&mut tls_stream.sock)
                .map_err(|e| Error::io("TLS handshake failed", e))?;
        }

        tracing::debug!(version = ?tls_stream.conn.protocol_version(), "TLS established");
        self.stream = PgStream::Tls(Box::new(tls_stream));
        Ok(())
    }

    #[cfg(not(feature = "tls"))]
    fn upgrade_tls(&mut self) -> Result<()> {
        Err(Error::connection(
            "TLS requested but unisql-postgres was built without the `tls` feature",
        ))
    }

    // ==================== Authentication ====================

    fn password(&self, method: &str) -> Result<String> {
        self.config
            .password
            .clone()
            .ok_or_else(|| Error::connection(format!("server requested {method} authentication but no password is configured")))
    }

    fn handle_auth(&mut self) -> Result<()> {
        loop {
            match self.receive_message()? {
                BackendMessage::AuthenticationOk => return Ok(()),
                BackendMessage::AuthenticationCleartextPassword => {
                    let password = self.password("cleartext")?;
                    self.send_message(&FrontendMessage::PasswordMessage(password))?;
                }
                BackendMessage::AuthenticationMD5Password(salt) => {
                    let password = self.password("MD5")?;
                    let hash = md5_password(&self.config.user, &password, salt);
                    self.send_message(&FrontendMessage::PasswordMessage(hash))?;
                }
                BackendMessage::AuthenticationSASL(mechanisms) => {
                    if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
                        self.state = ConnectionState::Broken;
                        return Err(Error::connection(format!(
                            "unsupported SASL mechanisms: {mechanisms:?}"
                        )));
                    }
                    return self.scram_auth();
                }
                BackendMessage::ErrorResponse(fields) => return Err(self.startup_error(&fields)),
                BackendMessage::NoticeResponse(notice) => log_notice(&notice),
                other => {
                    return Err(self.fail_protocol(&format!(
                        "unexpected message during authentication: {other:?}"
                    )));
                }
            }
        }
    }

    fn scram_auth(&mut self) -> Result<()> {
        let password = self.password(SCRAM_SHA_256)?;
        let mut client = ScramClient::new(&self.config.user, &password);

        self.send_message(&FrontendMessage::SASLInitialResponse {
            mechanism: SCRAM_SHA_256.to_string(),
            data: client.client_first(),
        })?;

        let server_first = match self.receive_message()? {
            BackendMessage::AuthenticationSASLContinue(data) => data,
            BackendMessage::ErrorResponse(fields) => return Err(self.startup_error(&fields)),
            other => {
                return Err(
                    self.fail_protocol(&format!("expected SASL continue, got {other:?}"))
                );
            }
        };

        let client_final = client.process_server_first(&server_first)?;
        self.send_message(&FrontendMessage::SASLResponse(client_final))?;

        let server_final = match self.receive_message()? {
            BackendMessage::AuthenticationSASLFinal(data) => data,
            BackendMessage::ErrorResponse(fields) => return Err(self.startup_error(&fields)),
            other => {
                return Err(self.fail_protocol(&format!("expected SASL final, got {other:?}")));
            }
        };
        client.verify_server_final(&server_final)?;

        match self.receive_message()? {
            BackendMessage::AuthenticationOk => Ok(()),
            BackendMessage::ErrorResponse(fields) => Err(self.startup_error(&fields)),
            other => Err(self.fail_protocol(&format!(
                "expected AuthenticationOk, got {other:?}"
            ))),
        }
    }

    fn read_startup_messages(&mut self) -> Result<()> {
        loop {
            match self.receive_message()? {
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.process_id = process_id;
                    self.secret_key = secret_key;
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::ReadyForQuery(status) => {
                    self.transaction_status = status;
                    self.state = ConnectionState::Ready;
                    return Ok(());
                }
                BackendMessage::ErrorResponse(fields) => return Err(self.startup_error(&fields)),
                BackendMessage::NoticeResponse(notice) => log_notice(&notice),
                BackendMessage::NegotiateProtocolVersion { newest_minor, .. } => {
                    tracing::debug!(newest_minor, "server negotiated protocol version");
                }
                other => {
                    return Err(
                        self.fail_protocol(&format!("unexpected startup message: {other:?}"))
                    );
                }
            }
        }
    }

    /// Errors before ReadyForQuery end the session.
    fn startup_error(&mut self, fields: &ErrorFields) -> Error {
        self.state = ConnectionState::Broken;
        log_server_error(fields);
        if fields.code == INVALID_PARAMETER_VALUE && self.config.client_encoding.is_some() {
            return Error::CharsetFailed(native_error(fields));
        }
        error_from_fields(fields, Phase::Startup)
    }

    // ==================== Queries ====================

    fn simple_query(&mut self, sql: &str) -> Result<ResultSet> {
        tracing::trace!(sql, "simple query");
        self.send_message(&FrontendMessage::Query(sql.to_string()))?;
        self.collect_results(false)
    }

    fn extended_query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        let (statement, placeholders) = rewrite_placeholders(sql);
        if placeholders != 0 && placeholders != params.len() {
            return Err(Error::query(format!(
                "statement expects {placeholders} parameters, got {}",
                params.len()
            )));
        }
        if i16::try_from(params.len()).is_err() {
            return Err(Error::query(format!(
                "too many parameters: {}",
                params.len()
            )));
        }
        tracing::trace!(sql = %statement, params = params.len(), "extended query");

        self.writer.clear();
        self.writer.push(&FrontendMessage::Parse {
            name: String::new(),
            query: statement,
            param_types: Vec::new(),
        });
        self.writer.push(&FrontendMessage::Bind {
            portal: String::new(),
            statement: String::new(),
            param_formats: Vec::new(),
            params: params
                .iter()
                .map(|v| v.to_text().map(String::into_bytes))
                .collect(),
            result_formats: Vec::new(),
        });
        self.writer.push(&FrontendMessage::Describe {
            kind: DescribeKind::Portal,
            name: String::new(),
        });
        self.writer.push(&FrontendMessage::Execute {
            portal: String::new(),
            max_rows: 0,
        });
        self.writer.push(&FrontendMessage::Sync);
        self.flush_writer()?;

        self.collect_results(true)
    }

    /// Read responses up to ReadyForQuery.
    ///
    /// The first non-fatal error is returned after the server has resynced,
    /// so the session stays usable.
    fn collect_results(&mut self, extended: bool) -> Result<ResultSet> {
        let mut fields: Vec<FieldDescription> = Vec::new();
        let mut rows: Vec<Vec<Option<String>>> = Vec::new();
        let mut tag = String::new();
        let mut parsed = !extended;
        let mut failure = None;

        loop {
            match self.receive_message()? {
                BackendMessage::ParseComplete => parsed = true,
                BackendMessage::RowDescription(desc) => {
                    fields = desc;
                    rows.clear();
                }
                BackendMessage::DataRow(cells) => rows.push(decode_row(&fields, cells)),
                BackendMessage::CommandComplete(t) => tag = t,
                BackendMessage::EmptyQueryResponse => tag.clear(),
                BackendMessage::BindComplete
                | BackendMessage::NoData
                | BackendMessage::ParameterDescription(_)
                | BackendMessage::CloseComplete
                | BackendMessage::PortalSuspended
                | BackendMessage::NotificationResponse { .. } => {}
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::NoticeResponse(notice) => log_notice(&notice),
                BackendMessage::ErrorResponse(err) => {
                    log_server_error(&err);
                    // Simple queries report no phase; syntax and access
                    // errors (class 42) are what Parse would have rejected
                    let phase = if !parsed || (!extended && err.error_class() == "42") {
                        Phase::Parse
                    } else {
                        Phase::Execute
                    };
                    if err.is_fatal() {
                        self.state = ConnectionState::Broken;
                        return Err(error_from_fields(&err, phase));
                    }
                    if failure.is_none() {
                        failure = Some(error_from_fields(&err, phase));
                    }
                }
                BackendMessage::ReadyForQuery(status) => {
                    self.transaction_status = status;
                    break;
                }
                other => {
                    return Err(self.fail_protocol(&format!("unexpected message: {other:?}")));
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        let last_insert_id = if tag.starts_with("INSERT")
            && fields.first().is_some_and(|f| types::is_integer(f.type_oid))
        {
            rows.first()
                .and_then(|row| row.first())
                .and_then(|cell| cell.as_deref())
                .and_then(|cell| cell.parse().ok())
        } else {
            None
        };

        let columns = fields.into_iter().map(|f| f.name).collect();
        let mut result = ResultSet::from_cells(columns, rows);
        result.affected_rows = command_rows(&tag);
        result.last_insert_id = last_insert_id;
        Ok(result)
    }

    // ==================== Low-Level I/O ====================

    fn fail_protocol(&mut self, message: &str) -> Error {
        self.state = ConnectionState::Broken;
        Error::connection(format!("protocol error: {message}"))
    }

    fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        self.writer.clear();
        self.writer.push(msg);
        self.flush_writer()
    }

    fn flush_writer(&mut self) -> Result<()> {
        let sent = self
            .stream
            .write_all(self.writer.as_bytes())
            .and_then(|()| self.stream.flush());
        self.writer.clear();
        sent.map_err(|e| {
            self.state = ConnectionState::Broken;
            Error::io("failed to write to server", e)
        })
    }

    fn receive_message(&mut self) -> Result<BackendMessage> {
        loop {
            match self.reader.next_message() {
                Ok(Some(msg)) => return Ok(msg),
                Ok(None) => {}
                Err(e) => {
                    self.state = ConnectionState::Broken;
                    return Err(e.into());
                }
            }

            let n = match self.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    self.state = ConnectionState::Broken;
                    return Err(Error::connection("connection closed by server"));
                }
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.state = ConnectionState::Broken;
                    return Err(Error::io("failed to read from server", e));
                }
            };
            self.reader.feed(&self.read_buf[..n]);
        }
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::trace!(error = %e, "Terminate failed on drop");
        }
    }
}

fn open_socket(config: &PgConfig) -> Result<TcpStream> {
    let addr = config.socket_addr();
    let addrs = addr
        .to_socket_addrs()
        .map_err(|e| Error::io(&format!("failed to resolve {addr}"), e))?;

    let mut last_err = None;
    for sock in addrs {
        match TcpStream::connect_timeout(&sock, config.connect_timeout) {
            Ok(stream) => {
                stream.set_nodelay(true).ok();
                stream.set_read_timeout(Some(config.connect_timeout)).ok();
                stream.set_write_timeout(Some(config.connect_timeout)).ok();
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(match last_err {
        Some(e) => Error::io(&format!("failed to connect to {addr}"), e),
        None => Error::connection(format!("{addr} resolved to no addresses")),
    })
}

fn decode_row(fields: &[FieldDescription], cells: Vec<Option<Vec<u8>>>) -> Vec<Option<String>> {
    cells
        .into_iter()
        .enumerate()
        .map(|(i, cell)| {
            let type_oid = fields.get(i).map_or(0, |f| f.type_oid);
            cell.map(|raw| types::decode_text_cell(type_oid, &raw))
        })
        .collect()
}

/// Row count from a command tag such as `INSERT 0 3` or `UPDATE 2`.
fn command_rows(tag: &str) -> u64 {
    let mut words = tag.split_whitespace();
    match words.next() {
        Some("INSERT" | "UPDATE" | "DELETE" | "MERGE" | "COPY") => words
            .next_back()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0),
        _ => 0,
    }
}

fn native_error(fields: &ErrorFields) -> NativeError {
    NativeError::new(fields.to_string()).with_sqlstate(fields.code.clone())
}

/// Map a server error onto the shared taxonomy.
fn error_from_fields(fields: &ErrorFields, phase: Phase) -> Error {
    let native = native_error(fields);
    match fields.error_class() {
        // connection_exception, invalid_authorization_specification
        "08" | "28" => return Error::ConnectionFailed(native),
        _ => {}
    }
    if fields.code == OUT_OF_MEMORY {
        return Error::OutOfMemory(native);
    }
    if fields.is_fatal() {
        return Error::ConnectionFailed(native);
    }
    match phase {
        Phase::Startup => Error::ConnectionFailed(native),
        Phase::Parse => Error::PrepareFailed(native),
        Phase::Execute => Error::QueryFailed(native),
    }
}

fn log_server_error(err: &ErrorFields) {
    tracing::debug!(
        severity = %err.severity,
        sqlstate = %err.code,
        message = %err.message,
        "PostgreSQL server error"
    );
}

fn log_notice(notice: &ErrorFields) {
    tracing::debug!(sqlstate = %notice.code, message = %notice.message, "PostgreSQL notice");
}
