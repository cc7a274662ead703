//! Blocking MySQL session.
//!
//! One [`MySqlConnection`] owns one socket. It performs the v10 handshake,
//! authenticates, applies session settings and then runs statements either
//! through the text protocol (no parameters) or as prepared statements with
//! bound parameters. Every result is copied into a [`ResultSet`] before the
//! call returns.

// MySQL protocol uses well-defined packet sizes that fit in u32 (max 16MB)
#![allow(clippy::cast_possible_truncation)]

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use unisql_core::{Error, NativeError, Result, ResultSet, Value};

use crate::auth::{self, AuthPlugin};
use crate::config::MySqlConfig;
use crate::protocol::{
    Command, EofPacket, ErrPacket, ErrorPhase, MAX_PACKET_SIZE, OkPacket, PacketHeader, PacketReader,
    PacketType, PacketWriter, StmtPrepareOk, capabilities, frame_packets, prepared,
    server_status,
};
#[cfg(feature = "tls")]
use crate::tls::TlsStream;
use crate::types::{ColumnDef, decode_text_cell};

/// Connection state in the MySQL protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP connection established, awaiting handshake
    Connecting,
    /// Performing authentication handshake
    Authenticating,
    /// Ready for statements
    Ready,
    /// An I/O or protocol failure left the session unusable
    Broken,
    /// `COM_QUIT` was sent
    Closed,
}

/// Server capabilities received during handshake.
#[derive(Debug, Clone)]
pub struct ServerCapabilities {
    pub capabilities: u32,
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Authentication plugin name
    pub auth_plugin: String,
    /// Authentication data (scramble)
    pub auth_data: Vec<u8>,
    /// Default collation
    pub charset: u8,
    pub status_flags: u16,
}

/// How rows of a result set are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowFormat {
    Text,
    Binary,
}

enum Stream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<TlsStream<TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// MySQL connection.
///
/// Manages a TCP connection to a MySQL server, handling the wire protocol,
/// authentication, and state tracking.
pub struct MySqlConnection {
    stream: Stream,
    /// Second handle on the socket, for socket options once TLS owns `stream`
    socket: TcpStream,
    state: ConnectionState,
    server_caps: Option<ServerCapabilities>,
    /// Capabilities both sides agreed on
    client_caps: u32,
    connection_id: u32,
    status_flags: u16,
    affected_rows: u64,
    last_insert_id: u64,
    warnings: u16,
    config: MySqlConfig,
    sequence_id: u8,
    /// Scramble of the plugin currently authenticating
    auth_seed: Vec<u8>,
    tls: bool,
}

impl std::fmt::Debug for MySqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("state", &self.state)
            .field("connection_id", &self.connection_id)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

impl MySqlConnection {
    /// Establish a new connection to the MySQL server.
    ///
    /// 1. TCP connection
    /// 2. Receive server handshake, optionally upgrade to TLS
    /// 3. Send handshake response with authentication
    /// 4. Handle auth result (possibly auth switch or full auth)
    /// 5. Apply `SET NAMES` and the lock wait timeout
    #[tracing::instrument(level = "debug", skip(config), fields(host = %config.host, port = config.port))]
    pub fn connect(config: MySqlConfig) -> Result<Self> {
        let stream = open_socket(&config)?;
        let socket = stream
            .try_clone()
            .map_err(|e| Error::io("failed to clone socket", e))?;

        let mut conn = Self {
            stream: Stream::Plain(stream),
            socket,
            state: ConnectionState::Connecting,
            server_caps: None,
            client_caps: 0,
            connection_id: 0,
            status_flags: 0,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: 0,
            config,
            sequence_id: 0,
            auth_seed: Vec::new(),
            tls: false,
        };

        let server_caps = conn.read_handshake()?;
        conn.connection_id = server_caps.connection_id;
        conn.client_caps = conn.config.capability_flags() & server_caps.capabilities;
        conn.auth_seed.clone_from(&server_caps.auth_data);
        let upgrade = crate::tls::should_upgrade(conn.config.ssl_mode, server_caps.capabilities)?;
        conn.server_caps = Some(server_caps);
        conn.state = ConnectionState::Authenticating;

        if upgrade {
            conn.upgrade_tls()?;
        } else {
            conn.client_caps &= !capabilities::CLIENT_SSL;
        }

        conn.send_handshake_response()?;
        conn.handle_auth_result()?;
        conn.state = ConnectionState::Ready;

        conn.apply_session_settings()?;

        // The connect timeout only bounds the handshake
        conn.socket.set_read_timeout(None).ok();
        conn.socket.set_write_timeout(None).ok();

        tracing::debug!(
            connection_id = conn.connection_id,
            server_version = conn.server_version().unwrap_or_default(),
            tls = conn.tls,
            "MySQL session established"
        );
        Ok(conn)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the connection can run statements.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, ConnectionState::Ready)
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn server_version(&self) -> Option<&str> {
        self.server_caps
            .as_ref()
            .map(|caps| caps.server_version.as_str())
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Get the number of affected rows from the last statement.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// Id generated by the last statement, `None` when it generated none.
    pub fn last_insert_id(&self) -> Option<i64> {
        (self.last_insert_id != 0).then_some(self.last_insert_id as i64)
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    /// Whether the server reports an open transaction on this session.
    pub fn in_transaction(&self) -> bool {
        self.status_flags & server_status::SERVER_STATUS_IN_TRANS != 0
    }

    /// Run a statement and materialize its rows.
    ///
    /// Without parameters the statement goes through `COM_QUERY`; with
    /// parameters it is prepared, executed with bound values and closed.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        self.ensure_ready()?;
        let result = if params.is_empty() {
            self.query_text(sql)
        } else {
            self.query_prepared(sql, params)
        };
        result.map_err(|e| e.with_sql(sql))
    }

    /// Run a statement and return the number of affected rows.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self.query(sql, params)?.affected_rows)
    }

    /// Ping the server to check connection.
    pub fn ping(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.sequence_id = 0;
        self.write_packet(&[Command::Ping as u8])?;

        let (payload, _) = self.read_packet()?;
        match payload.first() {
            Some(0x00) => Ok(()),
            Some(0xFF) => Err(self.server_error(&payload, ErrorPhase::Query)),
            _ => {
                self.state = ConnectionState::Broken;
                Err(Error::connection("unexpected reply to COM_PING"))
            }
        }
    }

    /// Send `COM_QUIT`. The socket is closed when the value drops.
    pub fn close(&mut self) -> Result<()> {
        if matches!(self.state, ConnectionState::Closed | ConnectionState::Broken) {
            self.state = ConnectionState::Closed;
            return Ok(());
        }
        self.sequence_id = 0;
        // The server just hangs up; nothing to read
        let sent = self.write_packet(&[Command::Quit as u8]);
        self.state = ConnectionState::Closed;
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

    fn apply_session_settings(&mut self) -> Result<()> {
        if let Some(charset) = self.config.charset.clone() {
            self.set_names(&charset)?;
        }
        if let Some(secs) = self.config.lock_wait_timeout_secs() {
            self.query_text(&format!("SET SESSION innodb_lock_wait_timeout = {secs}"))?;
        }
        Ok(())
    }

    /// Select the session character set.
    ///
    /// Fails with [`Error::CharsetFailed`] for names the server rejects.
    pub fn set_names(&mut self, charset: &str) -> Result<()> {
        if charset.is_empty() || !charset.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::CharsetFailed(NativeError::new(format!(
                "invalid character set name '{charset}'"
            ))));
        }
        match self.query_text(&format!("SET NAMES {charset}")) {
            Ok(_) => {
                tracing::debug!(charset, "Applied session character set");
                Ok(())
            }
            Err(e) if e.is_connection_error() => Err(e),
            Err(e) => Err(Error::CharsetFailed(e.into_native())),
        }
    }

    /// Read the server handshake packet.
    fn read_handshake(&mut self) -> Result<ServerCapabilities> {
        let (payload, _) = self.read_packet()?;
        if payload.first() == Some(&0xFF) {
            return Err(self.server_error(&payload, ErrorPhase::Connect));
        }
        let mut reader = PacketReader::new(&payload);

        let protocol_version = reader
            .read_u8()
            .ok_or_else(|| protocol_error("missing protocol version"))?;
        if protocol_version != 10 {
            return Err(protocol_error(format!(
                "unsupported protocol version: {protocol_version}"
            )));
        }

        let server_version = reader.read_null_string();
        let connection_id = reader
            .read_u32_le()
            .ok_or_else(|| protocol_error("missing connection id"))?;
        let auth_data_1 = reader
            .read_bytes(8)
            .ok_or_else(|| protocol_error("missing auth data"))?;

        // Filler
        reader.skip(1);

        let caps_lower = reader
            .read_u16_le()
            .ok_or_else(|| protocol_error("missing capability flags"))?;
        let charset = reader
            .read_u8()
            .unwrap_or(crate::protocol::charset::DEFAULT_CHARSET);
        let status_flags = reader.read_u16_le().unwrap_or(0);
        let caps_upper = reader.read_u16_le().unwrap_or(0);
        let capabilities = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

        let auth_data_len = if capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            usize::from(reader.read_u8().unwrap_or(0))
        } else {
            0
        };

        // Reserved
        reader.skip(10);

        let mut auth_data = auth_data_1.to_vec();
        if capabilities & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            let len2 = if auth_data_len > 8 {
                auth_data_len - 8
            } else {
                13
            };
            if let Some(data2) = reader.read_bytes(len2) {
                let data2 = data2.strip_suffix(&[0]).unwrap_or(data2);
                auth_data.extend_from_slice(data2);
            }
        }

        let auth_plugin = if capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            reader.read_null_string()
        } else {
            AuthPlugin::NativePassword.name().to_string()
        };

        Ok(ServerCapabilities {
            capabilities,
            protocol_version,
            server_version,
            connection_id,
            auth_plugin,
            auth_data,
            charset,
            status_flags,
        })
    }

    #[cfg(feature = "tls")]
    fn upgrade_tls(&mut self) -> Result<()> {
        let request = crate::tls::build_ssl_request_packet(
            self.client_caps,
            self.config.max_packet_size,
            self.config.collation,
        );
        self.write_packet(&request)?;

        if self.tls {
            return Err(protocol_error("TLS already negotiated"));
        }
        // The TLS session takes its own handle on the socket
        let tcp = self
            .socket
            .try_clone()
            .map_err(|e| Error::io("failed to clone socket", e))?;
        let tls = TlsStream::new(tcp, &self.config)?;
        self.stream = Stream::Tls(Box::new(tls));
        self.client_caps |= capabilities::CLIENT_SSL;
        self.tls = true;
        Ok(())
    }

    #[cfg(not(feature = "tls"))]
    fn upgrade_tls(&mut self) -> Result<()> {
        Err(Error::connection(
            "TLS requested but unisql-mysql was built without the `tls` feature",
        ))
    }

    /// Send the handshake response packet.
    fn send_handshake_response(&mut self) -> Result<()> {
        let server_caps = self
            .server_caps
            .as_ref()
            .ok_or_else(|| protocol_error("no server handshake received"))?;
        let client_caps = self.client_caps;
        let plugin = server_caps.auth_plugin.clone();
        let auth_response = self.compute_auth_response(&plugin, &server_caps.auth_data);

        let mut writer = PacketWriter::new();
        writer.write_u32_le(client_caps);
        writer.write_u32_le(self.config.max_packet_size);
        writer.write_u8(self.config.collation);
        writer.write_zeros(23);
        writer.write_null_string(&self.config.user);

        if client_caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            writer.write_lenenc_bytes(&auth_response);
        } else if client_caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            // scrambles are 20 or 32 bytes
            writer.write_u8(u8::try_from(auth_response.len()).unwrap_or(u8::MAX));
            writer.write_bytes(&auth_response);
        } else {
            writer.write_bytes(&auth_response);
            writer.write_u8(0);
        }

        if client_caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            writer.write_null_string(self.config.database.as_deref().unwrap_or(""));
        }

        if client_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            writer.write_null_string(&plugin);
        }

        self.write_packet(writer.as_bytes())
    }

    /// Compute authentication response based on the plugin.
    fn compute_auth_response(&self, plugin: &str, auth_data: &[u8]) -> Vec<u8> {
        let password = self.config.password.as_deref().unwrap_or("");

        AuthPlugin::from_name(plugin).scramble(password, auth_data)
    }

    /// Handle authentication result, auth switch and extra auth rounds.
    fn handle_auth_result(&mut self) -> Result<()> {
        let (payload, _) = self.read_packet()?;

        match payload.first() {
            None => Err(protocol_error("empty authentication response")),
            Some(0x00) => {
                if let Some(ok) = OkPacket::parse(&payload) {
                    self.status_flags = ok.status_flags;
                }
                Ok(())
            }
            Some(0xFF) => Err(self.server_error(&payload, ErrorPhase::Connect)),
            Some(0xFE) => self.handle_auth_switch(&payload[1..]),
            // AuthMoreData
            Some(0x01) => self.handle_additional_auth(&payload[1..]),
            Some(other) => Err(protocol_error(format!(
                "unknown auth response: {other:02X}"
            ))),
        }
    }

    /// Handle auth switch request.
    fn handle_auth_switch(&mut self, data: &[u8]) -> Result<()> {
        let mut reader = PacketReader::new(data);
        let plugin = reader.read_null_string();
        if plugin.is_empty() {
            return Err(protocol_error("missing plugin name in auth switch"));
        }
        let seed = reader.read_rest();
        let seed = seed.strip_suffix(&[0]).unwrap_or(seed).to_vec();

        tracing::debug!(plugin = %plugin, "Server requested auth switch");
        let response = self.compute_auth_response(&plugin, &seed);
        self.auth_seed = seed;
        self.write_packet(&response)?;
        self.handle_auth_result()
    }

    /// Handle `caching_sha2_password` follow-up rounds.
    fn handle_additional_auth(&mut self, data: &[u8]) -> Result<()> {
        match data.first() {
            Some(&auth::caching_sha2::FAST_AUTH_SUCCESS) => self.handle_auth_result(),
            Some(&auth::caching_sha2::PERFORM_FULL_AUTH) => {
                let password = self.config.password.clone().unwrap_or_default();
                if self.tls {
                    self.write_packet(&auth::cleartext_password(&password))?;
                } else {
                    self.write_packet(&[auth::caching_sha2::REQUEST_PUBLIC_KEY])?;
                    let (key_packet, _) = self.read_packet()?;
                    if key_packet.first() == Some(&0xFF) {
                        return Err(self.server_error(&key_packet, ErrorPhase::Connect));
                    }
                    // AuthMoreData carrying the PEM key
                    let pem = key_packet.get(1..).unwrap_or_default();
                    let encrypted =
                        auth::sha256_password_rsa(&password, &self.auth_seed, pem, true)?;
                    self.write_packet(&encrypted)?;
                }
                self.handle_auth_result()
            }
            _ => Err(protocol_error("unexpected auth continuation data")),
        }
    }

    /// Run a `COM_QUERY` and read its text result.
    fn query_text(&mut self, sql: &str) -> Result<ResultSet> {
        tracing::trace!(sql, "COM_QUERY");
        self.sequence_id = 0;
        let mut payload = Vec::with_capacity(sql.len() + 1);
        payload.push(Command::Query as u8);
        payload.extend_from_slice(sql.as_bytes());
        self.write_packet(&payload)?;
        self.read_response(RowFormat::Text, None)
    }

    /// Prepare, execute with bound parameters, close.
    fn query_prepared(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        tracing::trace!(sql, params = params.len(), "COM_STMT_EXECUTE");
        let (prep, columns) = self.prepare(sql)?;

        let result = if usize::from(prep.num_params) == params.len() {
            self.sequence_id = 0;
            let packet = prepared::build_stmt_execute_packet(prep.statement_id, params);
            self.write_packet(&packet)
                .and_then(|()| self.read_response(RowFormat::Binary, Some(columns.as_slice())))
        } else {
            Err(Error::query(format!(
                "statement expects {} parameters, got {}",
                prep.num_params,
                params.len()
            )))
        };

        if self.state == ConnectionState::Ready {
            self.sequence_id = 0;
            let close = prepared::build_stmt_close_packet(prep.statement_id);
            if let Err(e) = self.write_packet(&close) {
                tracing::warn!(error = %e, "Failed to close prepared statement");
            }
        }
        result
    }

    fn prepare(&mut self, sql: &str) -> Result<(StmtPrepareOk, Vec<ColumnDef>)> {
        self.sequence_id = 0;
        self.write_packet(&prepared::build_stmt_prepare_packet(sql))?;

        let (payload, _) = self.read_packet()?;
        if payload.first() == Some(&0xFF) {
            return Err(self.server_error(&payload, ErrorPhase::Prepare));
        }
        let prep = prepared::parse_stmt_prepare_ok(&payload)
            .ok_or_else(|| self.fail_protocol("invalid COM_STMT_PREPARE response"))?;

        // Parameter definitions carry no information we use
        let _params = self.read_column_defs(usize::from(prep.num_params))?;
        let columns = self.read_column_defs(usize::from(prep.num_columns))?;
        Ok((prep, columns))
    }

    /// Read `count` column definitions plus the EOF that follows them on
    /// servers without `CLIENT_DEPRECATE_EOF`.
    fn read_column_defs(&mut self, count: usize) -> Result<Vec<ColumnDef>> {
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            let (payload, _) = self.read_packet()?;
            let column = ColumnDef::parse(&payload)
                .ok_or_else(|| self.fail_protocol("invalid column definition"))?;
            columns.push(column);
        }
        if count > 0 && !self.deprecate_eof() {
            let (payload, _) = self.read_packet()?;
            if payload.first() != Some(&0xFE) {
                return Err(self.fail_protocol("expected EOF after column definitions"));
            }
        }
        Ok(columns)
    }

    /// Read the reply to a statement: OK, ERR or a result set.
    ///
    /// Extra result sets (stored procedures) are drained and dropped.
    fn read_response(
        &mut self,
        format: RowFormat,
        prepared_columns: Option<&[ColumnDef]>,
    ) -> Result<ResultSet> {
        let mut result = self.read_one_response(format, prepared_columns)?;
        while self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0 {
            let extra = self.read_one_response(format, prepared_columns)?;
            if result.columns().is_empty() {
                result = extra;
            }
        }
        Ok(result)
    }

    fn read_one_response(
        &mut self,
        format: RowFormat,
        prepared_columns: Option<&[ColumnDef]>,
    ) -> Result<ResultSet> {
        let (payload, _) = self.read_packet()?;
        let Some(&first) = payload.first() else {
            return Err(self.fail_protocol("empty response"));
        };

        match PacketType::from_first_byte(first, payload.len()) {
            PacketType::Ok => {
                let ok = OkPacket::parse(&payload)
                    .ok_or_else(|| self.fail_protocol("invalid OK packet"))?;
                self.apply_ok(&ok);
                Ok(ResultSet::empty(ok.affected_rows, self.last_insert_id()))
            }
            PacketType::Error => Err(self.server_error(&payload, ErrorPhase::Query)),
            PacketType::LocalInfile => {
                // Refuse by sending an empty file
                self.write_packet(&[])?;
                let (payload, _) = self.read_packet()?;
                if payload.first() == Some(&0xFF) {
                    return Err(self.server_error(&payload, ErrorPhase::Query));
                }
                Err(Error::query("LOAD DATA LOCAL INFILE is not supported"))
            }
            PacketType::Eof | PacketType::Data => {
                let column_count = PacketReader::new(&payload)
                    .read_lenenc_int()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| self.fail_protocol("invalid column count"))?;
                let mut columns = self.read_column_defs(column_count)?;
                if let Some(prepared) = prepared_columns {
                    if columns.is_empty() {
                        columns = prepared.to_vec();
                    }
                }
                self.read_rows(format, &columns)
            }
        }
    }

    fn read_rows(&mut self, format: RowFormat, columns: &[ColumnDef]) -> Result<ResultSet> {
        let mut cells = Vec::new();
        loop {
            let (payload, _) = self.read_packet()?;
            match payload.first() {
                None => return Err(self.fail_protocol("empty row packet")),
                Some(0xFE) if payload.len() < 9 => {
                    self.read_terminator(&payload);
                    break;
                }
                Some(0xFF) => return Err(self.server_error(&payload, ErrorPhase::Query)),
                Some(_) => {
                    let row = match format {
                        RowFormat::Text => parse_text_row(&payload, columns.len()),
                        RowFormat::Binary => prepared::parse_binary_row(&payload, columns),
                    };
                    let row = row.ok_or_else(|| self.fail_protocol("truncated row packet"))?;
                    cells.push(row);
                }
            }
        }

        let names = columns.iter().map(|c| c.name.clone()).collect();
        Ok(ResultSet::from_cells(names, cells))
    }

    /// Parse the packet closing a result set (EOF, or OK with 0xFE header).
    fn read_terminator(&mut self, payload: &[u8]) {
        if self.deprecate_eof() {
            if let Some(ok) = OkPacket::parse(payload) {
                self.status_flags = ok.status_flags;
                self.warnings = ok.warnings;
            }
        } else if let Some(eof) = EofPacket::parse(payload) {
            self.status_flags = eof.status_flags;
            self.warnings = eof.warnings;
        }
    }

    fn apply_ok(&mut self, ok: &OkPacket) {
        self.affected_rows = ok.affected_rows;
        self.last_insert_id = ok.last_insert_id;
        self.status_flags = ok.status_flags;
        self.warnings = ok.warnings;
    }

    fn deprecate_eof(&self) -> bool {
        self.client_caps & capabilities::CLIENT_DEPRECATE_EOF != 0
    }

    /// Turn an ERR packet into an error, marking the session broken if the
    /// server considers it unusable.
    fn server_error(&mut self, payload: &[u8], phase: ErrorPhase) -> Error {
        let Some(err) = ErrPacket::parse(payload) else {
            return self.fail_protocol("invalid error packet");
        };
        if phase == ErrorPhase::Connect || err.is_fatal() {
            self.state = ConnectionState::Broken;
        }
        log_server_error(&err);
        err.into_error(phase)
    }

    fn fail_protocol(&mut self, message: &str) -> Error {
        self.state = ConnectionState::Broken;
        protocol_error(message)
    }

    /// Read a complete packet from the stream, joining split payloads.
    fn read_packet(&mut self) -> Result<(Vec<u8>, u8)> {
        let mut payload = Vec::new();
        let mut last_seq;
        loop {
            let mut header_buf = [0u8; PacketHeader::SIZE];
            if let Err(e) = self.stream.read_exact(&mut header_buf) {
                self.state = ConnectionState::Broken;
                return Err(Error::io("failed to read packet header", e));
            }
            let header = PacketHeader::from_bytes(&header_buf);
            let len = header.payload_length as usize;
            last_seq = header.sequence_id;
            self.sequence_id = header.sequence_id.wrapping_add(1);

            let start = payload.len();
            payload.resize(start + len, 0);
            if let Err(e) = self.stream.read_exact(&mut payload[start..]) {
                self.state = ConnectionState::Broken;
                return Err(Error::io("failed to read packet payload", e));
            }

            if len < MAX_PACKET_SIZE {
                break;
            }
        }
        Ok((payload, last_seq))
    }

    /// Frame and write a payload.
    fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let (packet, next_seq) = frame_packets(payload, self.sequence_id);
        self.sequence_id = next_seq;

        let written = self
            .stream
            .write_all(&packet)
            .and_then(|()| self.stream.flush());
        if let Err(e) = written {
            self.state = ConnectionState::Broken;
            return Err(Error::io("failed to write packet", e));
        }
        Ok(())
    }
}

/// Resolve the host and connect to the first address that answers.
fn open_socket(config: &MySqlConfig) -> Result<TcpStream> {
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

/// Parse a text protocol row into cells. `None` if truncated.
fn parse_text_row(data: &[u8], column_count: usize) -> Option<Vec<Option<String>>> {
    let mut reader = PacketReader::new(data);
    (0..column_count)
        .map(|_| reader.read_text_cell().map(|cell| cell.map(decode_text_cell)))
        .collect()
}

fn log_server_error(err: &ErrPacket) {
    tracing::debug!(
        code = err.error_code,
        sqlstate = %err.sql_state,
        message = %err.error_message,
        "MySQL server error"
    );
}

fn protocol_error(msg: impl Into<String>) -> Error {
    Error::connection(format!("protocol error: {}", msg.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_row() {
        let data = [0x01, b'7', 0xFB, 0x03, b'a', b'b', b'c'];
        let row = parse_text_row(&data, 3).unwrap();
        assert_eq!(
            row,
            vec![Some("7".to_string()), None, Some("abc".to_string())]
        );
    }

    #[test]
    fn test_parse_text_row_truncated() {
        let data = [0x01, b'7', 0x05, b'a'];
        assert!(parse_text_row(&data, 2).is_none());
    }

    #[test]
    fn test_protocol_error_is_connection_error() {
        let err = protocol_error("bad packet");
        assert!(err.is_connection_error());
        assert!(err.message().contains("bad packet"));
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = MySqlConfig::new()
            .host("127.0.0.1")
            .port(port)
            .connect_timeout(std::time::Duration::from_millis(500));
        let err = MySqlConnection::connect(config).unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
    }
}
