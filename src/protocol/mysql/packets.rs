//! MySQL packet structures
//!
//! This module defines the wire protocol structures for MySQL communication.
//! Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html>

/// MySQL Handshake V10 packet (server -> client)
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake_v10.html>
#[derive(Debug, Clone)]
pub struct HandshakeV10 {
    /// Protocol version (always 10)
    pub protocol_version: u8,
    /// Server version string (null-terminated)
    pub server_version: String,
    /// Connection ID
    pub connection_id: u32,
    /// First 8 bytes of auth plugin data (scramble)
    pub auth_plugin_data_part_1: [u8; 8],
    /// Capability flags (lower 2 bytes)
    pub capability_flags_lower: u16,
    /// Character set
    pub character_set: u8,
    /// Status flags
    pub status_flags: u16,
    /// Capability flags (upper 2 bytes)
    pub capability_flags_upper: u16,
    /// Length of auth plugin data (if CLIENT_PLUGIN_AUTH)
    pub auth_plugin_data_length: u8,
    /// Reserved (10 bytes of zeros)
    pub reserved: [u8; 10],
    /// Rest of auth plugin data (if CLIENT_SECURE_CONNECTION)
    pub auth_plugin_data_part_2: Vec<u8>,
    /// Auth plugin name (if CLIENT_PLUGIN_AUTH)
    pub auth_plugin_name: String,
}

impl Default for HandshakeV10 {
    fn default() -> Self {
        Self {
            protocol_version: 10,
            server_version: "8.0.0-roamdb-proxy".to_string(),
            connection_id: 1,
            auth_plugin_data_part_1: [0u8; 8],
            capability_flags_lower: 0,
            character_set: 0x21,  // utf8_general_ci
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            capability_flags_upper: 0,
            auth_plugin_data_length: 21,
            reserved: [0u8; 10],
            auth_plugin_data_part_2: vec![0u8; 12],
            auth_plugin_name: "mysql_native_password".to_string(),
        }
    }
}

impl HandshakeV10 {
    /// Get the full 20-byte scramble (auth_plugin_data_part_1 + auth_plugin_data_part_2)
    pub fn get_scramble(&self) -> Vec<u8> {
        let mut scramble = Vec::with_capacity(20);
        scramble.extend_from_slice(&self.auth_plugin_data_part_1);
        // Take first 12 bytes of part 2 to make 20 total
        let part2_len = std::cmp::min(12, self.auth_plugin_data_part_2.len());
        scramble.extend_from_slice(&self.auth_plugin_data_part_2[..part2_len]);
        scramble
    }

    /// Get combined capability flags (32-bit)
    pub fn capability_flags(&self) -> u32 {
        (self.capability_flags_upper as u32) << 16 | self.capability_flags_lower as u32
    }

    /// Set capability flags from 32-bit value
    pub fn set_capability_flags(&mut self, flags: u32) {
        self.capability_flags_lower = (flags & 0xFFFF) as u16;
        self.capability_flags_upper = ((flags >> 16) & 0xFFFF) as u16;
    }
}

/// MySQL Handshake Response 41 packet (client -> server)
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake_response.html>
#[derive(Debug, Clone)]
pub struct HandshakeResponse41 {
    /// Capability flags (4 bytes)
    pub capability_flags: u32,
    /// Max packet size
    pub max_packet_size: u32,
    /// Character set
    pub character_set: u8,
    /// Reserved (23 bytes of zeros)
    pub reserved: [u8; 23],
    /// Username (null-terminated)
    pub username: String,
    /// Auth response (length-encoded)
    pub auth_response: Vec<u8>,
    /// Database name (if CLIENT_CONNECT_WITH_DB)
    pub database: Option<String>,
    /// Auth plugin name (if CLIENT_PLUGIN_AUTH)
    pub auth_plugin_name: Option<String>,
    /// Connection attributes (if CLIENT_CONNECT_ATTRS), client order preserved
    pub connect_attrs: Option<Vec<(String, String)>>,
}

impl Default for HandshakeResponse41 {
    fn default() -> Self {
        Self {
            capability_flags: 0,
            max_packet_size: 0x00FF_FFFF,
            character_set: 0x21, // utf8_general_ci
            reserved: [0u8; 23],
            username: String::new(),
            auth_response: Vec::new(),
            database: None,
            auth_plugin_name: None,
            connect_attrs: None,
        }
    }
}

/// Auth switch request (server -> client, header 0xFE)
///
/// A mid-handshake instruction to re-sign the auth response using a
/// different plugin and salt.
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest {
    /// Name of the plugin the client must switch to
    pub plugin_name: String,
    /// Plugin-provided data, usually the salt
    pub plugin_data: Vec<u8>,
}

/// COM_CHANGE_USER payload (client -> server)
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_change_user.html>
#[derive(Debug, Clone)]
pub struct ChangeUser {
    /// New username
    pub username: String,
    /// Auth response for the new user
    pub auth_response: Vec<u8>,
    /// Database to select, empty for none
    pub database: String,
    /// Character set
    pub character_set: u16,
    /// Auth plugin name (if CLIENT_PLUGIN_AUTH)
    pub auth_plugin_name: Option<String>,
    /// Connection attributes (if CLIENT_CONNECT_ATTRS)
    pub connect_attrs: Option<Vec<(String, String)>>,
}

/// MySQL OK Packet (server -> client)
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_ok_packet.html>
#[derive(Debug, Clone)]
pub struct OkPacket {
    /// Header (0x00, or 0xFE when sent in place of EOF)
    pub header: u8,
    /// Affected rows (length-encoded int)
    pub affected_rows: u64,
    /// Last insert ID (length-encoded int)
    pub last_insert_id: u64,
    /// Status flags (if CLIENT_PROTOCOL_41)
    pub status_flags: u16,
    /// Warnings (if CLIENT_PROTOCOL_41)
    pub warnings: u16,
    /// Human-readable status info
    pub info: String,
}

impl Default for OkPacket {
    fn default() -> Self {
        Self {
            header: OK_HEADER,
            affected_rows: 0,
            last_insert_id: 0,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            warnings: 0,
            info: String::new(),
        }
    }
}

/// MySQL ERR Packet (server -> client)
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_err_packet.html>
#[derive(Debug, Clone)]
pub struct ErrPacket {
    /// Header (0xFF)
    pub header: u8,
    /// Error code
    pub error_code: u16,
    /// SQL state marker (if CLIENT_PROTOCOL_41)
    pub sql_state_marker: char,
    /// SQL state (5 characters, if CLIENT_PROTOCOL_41)
    pub sql_state: [u8; 5],
    /// Error message
    pub error_message: String,
}

impl Default for ErrPacket {
    fn default() -> Self {
        Self {
            header: ERR_HEADER,
            error_code: 0,
            sql_state_marker: '#',
            sql_state: *b"HY000",
            error_message: String::new(),
        }
    }
}

impl ErrPacket {
    /// Create a new error packet with the given code and message
    pub fn new(error_code: u16, error_message: impl Into<String>) -> Self {
        Self {
            error_code,
            error_message: error_message.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Capability Flags
// Reference: https://dev.mysql.com/doc/dev/mysql-server/latest/group__group__cs__capabilities__flags.html
// ============================================================================

/// Client can handle long passwords
pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
/// Found instead of affected rows
pub const CLIENT_FOUND_ROWS: u32 = 0x0000_0002;
/// Get all column flags
pub const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
/// Can specify db on connect
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
/// Don't allow database.table.column
pub const CLIENT_NO_SCHEMA: u32 = 0x0000_0010;
/// Can use compression protocol
pub const CLIENT_COMPRESS: u32 = 0x0000_0020;
/// ODBC client
pub const CLIENT_ODBC: u32 = 0x0000_0040;
/// Can use LOAD DATA LOCAL
pub const CLIENT_LOCAL_FILES: u32 = 0x0000_0080;
/// Ignore spaces before '('
pub const CLIENT_IGNORE_SPACE: u32 = 0x0000_0100;
/// New 4.1 protocol
pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
/// This is an interactive client
pub const CLIENT_INTERACTIVE: u32 = 0x0000_0400;
/// Switch to SSL after handshake
pub const CLIENT_SSL: u32 = 0x0000_0800;
/// Ignore sigpipes
pub const CLIENT_IGNORE_SIGPIPE: u32 = 0x0000_1000;
/// Client knows about transactions
pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
/// Old flag for 4.1 protocol (deprecated)
pub const CLIENT_RESERVED: u32 = 0x0000_4000;
/// New 4.1 authentication (deprecated, use CLIENT_PLUGIN_AUTH)
pub const CLIENT_RESERVED2: u32 = 0x0000_8000;
/// Enable/disable multi-stmt support
pub const CLIENT_MULTI_STATEMENTS: u32 = 0x0001_0000;
/// Enable/disable multi-results
pub const CLIENT_MULTI_RESULTS: u32 = 0x0002_0000;
/// Multi-results in PS-protocol
pub const CLIENT_PS_MULTI_RESULTS: u32 = 0x0004_0000;
/// Client supports plugin authentication
pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
/// Client supports connection attributes
pub const CLIENT_CONNECT_ATTRS: u32 = 0x0010_0000;
/// Length of auth response can be > 255
pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x0020_0000;
/// Don't close connection for user account with expired password
pub const CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS: u32 = 0x0040_0000;
/// Capable of handling server state change info
pub const CLIENT_SESSION_TRACK: u32 = 0x0080_0000;
/// Client no longer needs EOF packet
pub const CLIENT_DEPRECATE_EOF: u32 = 0x0100_0000;
/// Client supports optional resultset metadata
pub const CLIENT_OPTIONAL_RESULTSET_METADATA: u32 = 0x0200_0000;
/// Compression extended protocol
pub const CLIENT_ZSTD_COMPRESSION_ALGORITHM: u32 = 0x0400_0000;
/// Query attributes
pub const CLIENT_QUERY_ATTRIBUTES: u32 = 0x0800_0000;

/// Older flag name for secure connection
pub const CLIENT_SECURE_CONNECTION: u32 = CLIENT_RESERVED2;

// ============================================================================
// Status Flags
// ============================================================================

/// Server status: in transaction
pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
/// Server status: auto-commit enabled
pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
/// Server status: more results available
pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;

// ============================================================================
// Response Headers
// ============================================================================

/// First byte of an OK packet
pub const OK_HEADER: u8 = 0x00;
/// First byte of an auth-more-data packet
pub const AUTH_MORE_DATA_HEADER: u8 = 0x01;
/// First byte of a LOCAL INFILE request
pub const LOCAL_INFILE_HEADER: u8 = 0xFB;
/// First byte of an EOF packet, and of an auth switch request
pub const EOF_HEADER: u8 = 0xFE;
/// First byte of an ERR packet
pub const ERR_HEADER: u8 = 0xFF;

/// caching_sha2_password: fast auth succeeded
pub const CACHING_SHA2_FAST_AUTH_SUCCESS: u8 = 0x03;
/// caching_sha2_password: full auth required
pub const CACHING_SHA2_FULL_AUTH_REQUIRED: u8 = 0x04;

// ============================================================================
// MySQL Command Types
// Reference: https://dev.mysql.com/doc/dev/mysql-server/latest/my__command_8h.html
// ============================================================================

/// Quit connection (COM_QUIT)
pub const COM_QUIT: u8 = 0x01;

/// Switch database (COM_INIT_DB)
pub const COM_INIT_DB: u8 = 0x02;

/// Execute SQL query (COM_QUERY)
pub const COM_QUERY: u8 = 0x03;

/// Get field list (COM_FIELD_LIST) - deprecated but still used
pub const COM_FIELD_LIST: u8 = 0x04;

/// Get server statistics (COM_STATISTICS)
pub const COM_STATISTICS: u8 = 0x09;

/// Ping server (COM_PING)
pub const COM_PING: u8 = 0x0e;

/// Re-authenticate as another user (COM_CHANGE_USER)
pub const COM_CHANGE_USER: u8 = 0x11;

/// Prepare statement (COM_STMT_PREPARE)
pub const COM_STMT_PREPARE: u8 = 0x16;

/// Execute prepared statement (COM_STMT_EXECUTE)
pub const COM_STMT_EXECUTE: u8 = 0x17;

/// Send long parameter data (COM_STMT_SEND_LONG_DATA)
pub const COM_STMT_SEND_LONG_DATA: u8 = 0x18;

/// Close prepared statement (COM_STMT_CLOSE)
pub const COM_STMT_CLOSE: u8 = 0x19;

/// Reset prepared statement (COM_STMT_RESET)
pub const COM_STMT_RESET: u8 = 0x1a;

/// Set option (COM_SET_OPTION)
pub const COM_SET_OPTION: u8 = 0x1b;

/// Fetch cursor rows (COM_STMT_FETCH)
pub const COM_STMT_FETCH: u8 = 0x1c;

/// Reset connection (COM_RESET_CONNECTION)
pub const COM_RESET_CONNECTION: u8 = 0x1f;

// ============================================================================
// Proxy-synthesized error codes
// ============================================================================

/// No backend could be reached while re-binding a session
pub const ER_PROXY_NO_BACKEND: u16 = 9105;
/// The requested operation cannot run while a migration is pending
pub const ER_PROXY_REDIRECT_PENDING: u16 = 9106;

/// Check if a command byte expects no response from the server.
///
/// The client fires these and immediately moves on; the proxy must not
/// wait for a backend packet after forwarding them.
#[inline]
pub fn command_expects_no_response(cmd: u8) -> bool {
    matches!(cmd, COM_STMT_SEND_LONG_DATA | COM_STMT_CLOSE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_constants_values() {
        // Command constants match the MySQL protocol
        assert_eq!(COM_QUIT, 0x01);
        assert_eq!(COM_INIT_DB, 0x02);
        assert_eq!(COM_QUERY, 0x03);
        assert_eq!(COM_FIELD_LIST, 0x04);
        assert_eq!(COM_STATISTICS, 0x09);
        assert_eq!(COM_PING, 0x0e);
        assert_eq!(COM_CHANGE_USER, 0x11);
        assert_eq!(COM_STMT_PREPARE, 0x16);
        assert_eq!(COM_STMT_EXECUTE, 0x17);
        assert_eq!(COM_STMT_SEND_LONG_DATA, 0x18);
        assert_eq!(COM_STMT_CLOSE, 0x19);
        assert_eq!(COM_STMT_FETCH, 0x1c);
        assert_eq!(COM_RESET_CONNECTION, 0x1f);
    }

    #[test]
    fn test_command_expects_no_response() {
        assert!(command_expects_no_response(COM_STMT_SEND_LONG_DATA));
        assert!(command_expects_no_response(COM_STMT_CLOSE));
        assert!(!command_expects_no_response(COM_QUERY));
        assert!(!command_expects_no_response(COM_PING));
    }

    #[test]
    fn test_handshake_capability_flags_round_trip() {
        let mut handshake = HandshakeV10::default();
        let caps = CLIENT_PROTOCOL_41 | CLIENT_PLUGIN_AUTH | CLIENT_DEPRECATE_EOF;
        handshake.set_capability_flags(caps);
        assert_eq!(handshake.capability_flags(), caps);
    }

    #[test]
    fn test_scramble_is_twenty_bytes() {
        let handshake = HandshakeV10 {
            auth_plugin_data_part_1: [1, 2, 3, 4, 5, 6, 7, 8],
            auth_plugin_data_part_2: vec![9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20],
            ..Default::default()
        };
        let scramble = handshake.get_scramble();
        assert_eq!(scramble.len(), 20);
        assert_eq!(scramble[0], 1);
        assert_eq!(scramble[19], 20);
    }
}
