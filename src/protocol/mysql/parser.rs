//! MySQL packet parser
//!
//! Parse and build routines for the packets the proxy must understand or
//! rewrite. Everything here operates on payload bytes with the 4-byte
//! framing header already stripped.
//! Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html>

use super::packets::*;
use crate::error::{ProxyError, Result};
use crate::net::MAX_PAYLOAD_LEN;

// ============================================================================
// Handshake packets
// ============================================================================

/// Parse a HandshakeV10 packet from payload bytes
pub fn parse_handshake_v10(payload: &[u8]) -> Result<HandshakeV10> {
    let mut cursor = 0;

    if payload.is_empty() {
        return Err(ProxyError::Protocol("empty handshake packet".into()));
    }
    let protocol_version = payload[cursor];
    cursor += 1;

    if protocol_version != 10 {
        return Err(ProxyError::Protocol(format!(
            "unsupported protocol version: {}",
            protocol_version
        )));
    }

    // Server version (null-terminated string)
    let (server_version, bytes_read) = read_null_terminated_string(&payload[cursor..])?;
    cursor += bytes_read;

    // Connection ID (4 bytes)
    let connection_id = read_u32_le(&payload[cursor..])?;
    cursor += 4;

    // Auth plugin data part 1 (8 bytes)
    if payload.len() < cursor + 9 {
        return Err(ProxyError::Protocol("truncated handshake packet".into()));
    }
    let mut auth_plugin_data_part_1 = [0u8; 8];
    auth_plugin_data_part_1.copy_from_slice(&payload[cursor..cursor + 8]);
    cursor += 8;

    // Filler (1 byte, always 0x00)
    cursor += 1;

    // Capability flags lower (2 bytes)
    let capability_flags_lower = read_u16_le(&payload[cursor..])?;
    cursor += 2;

    // The following fields might not be present in older servers
    let mut character_set = 0x21u8;
    let mut status_flags = 0u16;
    let mut capability_flags_upper = 0u16;
    let mut auth_plugin_data_length = 0u8;
    let mut reserved = [0u8; 10];
    let mut auth_plugin_data_part_2 = Vec::new();
    let mut auth_plugin_name = String::new();

    if cursor + 6 <= payload.len() {
        character_set = payload[cursor];
        cursor += 1;

        status_flags = read_u16_le(&payload[cursor..])?;
        cursor += 2;

        capability_flags_upper = read_u16_le(&payload[cursor..])?;
        cursor += 2;

        auth_plugin_data_length = payload[cursor];
        cursor += 1;

        if cursor + 10 <= payload.len() {
            reserved.copy_from_slice(&payload[cursor..cursor + 10]);
            cursor += 10;
        }

        let combined_caps = (capability_flags_upper as u32) << 16 | capability_flags_lower as u32;
        if combined_caps & CLIENT_SECURE_CONNECTION != 0 {
            // Length is max(13, auth_plugin_data_length - 8)
            let part2_len = if auth_plugin_data_length > 8 {
                (auth_plugin_data_length - 8) as usize
            } else {
                13
            };
            let actual_len = std::cmp::min(part2_len, payload.len() - cursor);
            auth_plugin_data_part_2 = payload[cursor..cursor + actual_len].to_vec();
            // Remove trailing null if present
            if auth_plugin_data_part_2.last() == Some(&0) {
                auth_plugin_data_part_2.pop();
            }
            cursor += actual_len;
        }

        if combined_caps & CLIENT_PLUGIN_AUTH != 0 && cursor < payload.len() {
            let (name, _) = read_null_terminated_string(&payload[cursor..])?;
            auth_plugin_name = name;
        }
    }

    Ok(HandshakeV10 {
        protocol_version,
        server_version,
        connection_id,
        auth_plugin_data_part_1,
        capability_flags_lower,
        character_set,
        status_flags,
        capability_flags_upper,
        auth_plugin_data_length,
        reserved,
        auth_plugin_data_part_2,
        auth_plugin_name,
    })
}

/// Build a HandshakeV10 packet payload
pub fn build_handshake_v10(handshake: &HandshakeV10) -> Vec<u8> {
    let caps = handshake.capability_flags();
    let mut payload = Vec::with_capacity(128);

    payload.push(handshake.protocol_version);

    payload.extend_from_slice(handshake.server_version.as_bytes());
    payload.push(0);

    payload.extend_from_slice(&handshake.connection_id.to_le_bytes());

    payload.extend_from_slice(&handshake.auth_plugin_data_part_1);

    // Filler
    payload.push(0);

    payload.extend_from_slice(&handshake.capability_flags_lower.to_le_bytes());
    payload.push(handshake.character_set);
    payload.extend_from_slice(&handshake.status_flags.to_le_bytes());
    payload.extend_from_slice(&handshake.capability_flags_upper.to_le_bytes());
    payload.push(handshake.auth_plugin_data_length);
    payload.extend_from_slice(&handshake.reserved);

    if caps & CLIENT_SECURE_CONNECTION != 0 {
        payload.extend_from_slice(&handshake.auth_plugin_data_part_2);
        payload.push(0);
    }

    if caps & CLIENT_PLUGIN_AUTH != 0 {
        payload.extend_from_slice(handshake.auth_plugin_name.as_bytes());
        payload.push(0);
    }

    payload
}

/// Parse a HandshakeResponse41 packet from payload bytes
pub fn parse_handshake_response41(payload: &[u8]) -> Result<HandshakeResponse41> {
    if payload.len() < 32 {
        return Err(ProxyError::Protocol(
            "handshake response too short".into(),
        ));
    }

    let mut cursor = 0;

    let capability_flags = read_u32_le(&payload[cursor..])?;
    cursor += 4;

    let max_packet_size = read_u32_le(&payload[cursor..])?;
    cursor += 4;

    let character_set = payload[cursor];
    cursor += 1;

    let mut reserved = [0u8; 23];
    reserved.copy_from_slice(&payload[cursor..cursor + 23]);
    cursor += 23;

    // Username (null-terminated)
    let (username, bytes_read) = read_null_terminated_string(&payload[cursor..])?;
    cursor += bytes_read;

    // Auth response
    let auth_response = if capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        let (len, len_bytes) = read_length_encoded_int(&payload[cursor..])?;
        cursor += len_bytes;
        let end = cursor + len as usize;
        if end > payload.len() {
            return Err(ProxyError::Protocol("truncated auth response".into()));
        }
        let data = payload[cursor..end].to_vec();
        cursor = end;
        data
    } else if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
        if cursor >= payload.len() {
            return Err(ProxyError::Protocol("truncated auth response".into()));
        }
        let len = payload[cursor] as usize;
        cursor += 1;
        let end = cursor + len;
        if end > payload.len() {
            return Err(ProxyError::Protocol("truncated auth response".into()));
        }
        let data = payload[cursor..end].to_vec();
        cursor = end;
        data
    } else {
        let (data_str, bytes_read) = read_null_terminated_string(&payload[cursor..])?;
        cursor += bytes_read;
        data_str.into_bytes()
    };

    // Database (if CLIENT_CONNECT_WITH_DB)
    let database = if capability_flags & CLIENT_CONNECT_WITH_DB != 0 && cursor < payload.len() {
        let (db, bytes_read) = read_null_terminated_string(&payload[cursor..])?;
        cursor += bytes_read;
        Some(db)
    } else {
        None
    };

    // Auth plugin name (if CLIENT_PLUGIN_AUTH)
    let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 && cursor < payload.len() {
        let (name, bytes_read) = read_null_terminated_string(&payload[cursor..])?;
        cursor += bytes_read;
        Some(name)
    } else {
        None
    };

    // Connection attributes (if CLIENT_CONNECT_ATTRS)
    let connect_attrs = if capability_flags & CLIENT_CONNECT_ATTRS != 0 && cursor < payload.len() {
        match parse_connect_attrs(&payload[cursor..]) {
            Ok(attrs) => Some(attrs),
            Err(e) => {
                warn!("failed to parse connect attributes: {}", e);
                None
            }
        }
    } else {
        None
    };

    Ok(HandshakeResponse41 {
        capability_flags,
        max_packet_size,
        character_set,
        reserved,
        username,
        auth_response,
        database,
        auth_plugin_name,
        connect_attrs,
    })
}

/// Build a HandshakeResponse41 packet payload
pub fn build_handshake_response41(response: &HandshakeResponse41) -> Vec<u8> {
    let caps = response.capability_flags;
    let mut payload = Vec::with_capacity(128);

    payload.extend_from_slice(&caps.to_le_bytes());
    payload.extend_from_slice(&response.max_packet_size.to_le_bytes());
    payload.push(response.character_set);
    payload.extend_from_slice(&response.reserved);

    payload.extend_from_slice(response.username.as_bytes());
    payload.push(0);

    if caps & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        write_length_encoded_int(&mut payload, response.auth_response.len() as u64);
        payload.extend_from_slice(&response.auth_response);
    } else if caps & CLIENT_SECURE_CONNECTION != 0 {
        payload.push(response.auth_response.len() as u8);
        payload.extend_from_slice(&response.auth_response);
    } else {
        payload.extend_from_slice(&response.auth_response);
        payload.push(0);
    }

    if caps & CLIENT_CONNECT_WITH_DB != 0 {
        if let Some(ref db) = response.database {
            payload.extend_from_slice(db.as_bytes());
            payload.push(0);
        }
    }

    if caps & CLIENT_PLUGIN_AUTH != 0 {
        if let Some(ref name) = response.auth_plugin_name {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
        }
    }

    if caps & CLIENT_CONNECT_ATTRS != 0 {
        if let Some(ref attrs) = response.connect_attrs {
            build_connect_attrs(&mut payload, attrs);
        }
    }

    payload
}

/// Build an SSL request: the 32-byte prefix of a handshake response sent
/// before upgrading to TLS.
pub fn build_ssl_request(capability_flags: u32, max_packet_size: u32, character_set: u8) -> Vec<u8> {
    let mut payload = Vec::with_capacity(32);
    payload.extend_from_slice(&(capability_flags | CLIENT_SSL).to_le_bytes());
    payload.extend_from_slice(&max_packet_size.to_le_bytes());
    payload.push(character_set);
    payload.extend_from_slice(&[0u8; 23]);
    payload
}

/// Check if a client packet is an SSL request.
///
/// An SSL request is a handshake response truncated after the fixed
/// 32-byte prefix, with the SSL capability bit set.
pub fn is_ssl_request(payload: &[u8]) -> bool {
    payload.len() == 32 && read_u32_le(payload).is_ok_and(|caps| caps & CLIENT_SSL != 0)
}

// ============================================================================
// Auth switch
// ============================================================================

/// Parse an AuthSwitchRequest (0xFE + plugin name + plugin data)
pub fn parse_auth_switch_request(payload: &[u8]) -> Result<AuthSwitchRequest> {
    if payload.first() != Some(&EOF_HEADER) || payload.len() < 2 {
        return Err(ProxyError::Protocol("not an auth switch request".into()));
    }
    let (plugin_name, bytes_read) = read_null_terminated_string(&payload[1..])?;
    let mut plugin_data = payload[1 + bytes_read..].to_vec();
    if plugin_data.last() == Some(&0) {
        plugin_data.pop();
    }
    Ok(AuthSwitchRequest {
        plugin_name,
        plugin_data,
    })
}

/// Build an AuthSwitchRequest payload
pub fn build_auth_switch_request(request: &AuthSwitchRequest) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + request.plugin_name.len() + request.plugin_data.len());
    payload.push(EOF_HEADER);
    payload.extend_from_slice(request.plugin_name.as_bytes());
    payload.push(0);
    payload.extend_from_slice(&request.plugin_data);
    payload.push(0);
    payload
}

// ============================================================================
// COM_CHANGE_USER
// ============================================================================

/// Parse a COM_CHANGE_USER command payload (including the command byte)
pub fn parse_change_user(payload: &[u8], capability_flags: u32) -> Result<ChangeUser> {
    if payload.first() != Some(&COM_CHANGE_USER) {
        return Err(ProxyError::Protocol("not a COM_CHANGE_USER packet".into()));
    }
    let mut cursor = 1;

    let (username, bytes_read) = read_null_terminated_string(&payload[cursor..])?;
    cursor += bytes_read;

    if cursor >= payload.len() {
        return Err(ProxyError::Protocol("truncated COM_CHANGE_USER".into()));
    }
    let auth_len = payload[cursor] as usize;
    cursor += 1;
    if cursor + auth_len > payload.len() {
        return Err(ProxyError::Protocol("truncated COM_CHANGE_USER".into()));
    }
    let auth_response = payload[cursor..cursor + auth_len].to_vec();
    cursor += auth_len;

    let (database, bytes_read) = read_null_terminated_string(&payload[cursor..])?;
    cursor += bytes_read;

    let character_set = if cursor + 2 <= payload.len() {
        let cs = read_u16_le(&payload[cursor..])?;
        cursor += 2;
        cs
    } else {
        0x21
    };

    let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 && cursor < payload.len() {
        let (name, bytes_read) = read_null_terminated_string(&payload[cursor..])?;
        cursor += bytes_read;
        Some(name)
    } else {
        None
    };

    let connect_attrs = if capability_flags & CLIENT_CONNECT_ATTRS != 0 && cursor < payload.len() {
        parse_connect_attrs(&payload[cursor..]).ok()
    } else {
        None
    };

    Ok(ChangeUser {
        username,
        auth_response,
        database,
        character_set,
        auth_plugin_name,
        connect_attrs,
    })
}

// ============================================================================
// OK / ERR packets
// ============================================================================

/// Parse an OK packet from payload bytes
pub fn parse_ok_packet(payload: &[u8], capabilities: u32) -> Result<OkPacket> {
    if payload.is_empty() {
        return Err(ProxyError::Protocol("empty OK packet".into()));
    }
    let mut cursor = 0;

    let header = payload[cursor];
    cursor += 1;

    if header != OK_HEADER && header != EOF_HEADER {
        return Err(ProxyError::Protocol(format!(
            "invalid OK packet header: 0x{:02X}",
            header
        )));
    }

    let (affected_rows, bytes_read) = read_length_encoded_int(&payload[cursor..])?;
    cursor += bytes_read;

    let (last_insert_id, bytes_read) = read_length_encoded_int(&payload[cursor..])?;
    cursor += bytes_read;

    let (status_flags, warnings) = if capabilities & CLIENT_PROTOCOL_41 != 0 {
        let status = read_u16_le(&payload[cursor..])?;
        cursor += 2;
        let warns = read_u16_le(&payload[cursor..])?;
        cursor += 2;
        (status, warns)
    } else {
        (0, 0)
    };

    let info = if cursor < payload.len() {
        String::from_utf8_lossy(&payload[cursor..]).to_string()
    } else {
        String::new()
    };

    Ok(OkPacket {
        header,
        affected_rows,
        last_insert_id,
        status_flags,
        warnings,
        info,
    })
}

/// Build an OK packet payload
pub fn build_ok_packet(ok: &OkPacket, capabilities: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(32);

    payload.push(ok.header);
    write_length_encoded_int(&mut payload, ok.affected_rows);
    write_length_encoded_int(&mut payload, ok.last_insert_id);

    if capabilities & CLIENT_PROTOCOL_41 != 0 {
        payload.extend_from_slice(&ok.status_flags.to_le_bytes());
        payload.extend_from_slice(&ok.warnings.to_le_bytes());
    }

    if !ok.info.is_empty() {
        payload.extend_from_slice(ok.info.as_bytes());
    }

    payload
}

/// Parse an ERR packet from payload bytes
pub fn parse_err_packet(payload: &[u8], capabilities: u32) -> Result<ErrPacket> {
    if payload.len() < 3 {
        return Err(ProxyError::Protocol("truncated ERR packet".into()));
    }
    let mut cursor = 0;

    let header = payload[cursor];
    cursor += 1;

    if header != ERR_HEADER {
        return Err(ProxyError::Protocol(format!(
            "invalid ERR packet header: 0x{:02X}",
            header
        )));
    }

    let error_code = read_u16_le(&payload[cursor..])?;
    cursor += 2;

    let (sql_state_marker, sql_state) =
        if capabilities & CLIENT_PROTOCOL_41 != 0 && cursor + 6 <= payload.len() {
            let marker = payload[cursor] as char;
            cursor += 1;
            let mut state = [0u8; 5];
            state.copy_from_slice(&payload[cursor..cursor + 5]);
            cursor += 5;
            (marker, state)
        } else {
            ('#', *b"HY000")
        };

    let error_message = String::from_utf8_lossy(&payload[cursor..]).to_string();

    Ok(ErrPacket {
        header,
        error_code,
        sql_state_marker,
        sql_state,
        error_message,
    })
}

/// Build an ERR packet payload
pub fn build_err_packet(err: &ErrPacket, capabilities: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(64);

    payload.push(err.header);
    payload.extend_from_slice(&err.error_code.to_le_bytes());

    if capabilities & CLIENT_PROTOCOL_41 != 0 {
        payload.push(err.sql_state_marker as u8);
        payload.extend_from_slice(&err.sql_state);
    }

    payload.extend_from_slice(err.error_message.as_bytes());

    payload
}

// ============================================================================
// Response classification
// ============================================================================

/// Check if a packet is an OK packet
pub fn is_ok_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&OK_HEADER)
}

/// Check if a packet is an ERR packet
pub fn is_err_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&ERR_HEADER)
}

/// Check if a packet is an EOF packet (pre-deprecate-EOF encoding)
pub fn is_eof_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&EOF_HEADER) && payload.len() < 9
}

/// Check if a packet terminates a row/definition stream.
///
/// With `CLIENT_DEPRECATE_EOF` the terminator is an OK packet wearing the
/// 0xFE header; its length distinguishes it from a row whose first column
/// is a length-encoded integer (such rows are at least 9 bytes of prefix
/// and the full packet approaches the chunk limit before ambiguity
/// arises). Without the capability the terminator is a classic EOF.
pub fn is_result_set_terminator(payload: &[u8], deprecate_eof: bool) -> bool {
    if payload.first() != Some(&EOF_HEADER) {
        return false;
    }
    if deprecate_eof {
        payload.len() < MAX_PAYLOAD_LEN
    } else {
        payload.len() < 9
    }
}

/// Extract the status flags from a response-terminating packet (OK, ERR,
/// EOF, or OK-as-EOF). ERR packets carry no status flags and yield 0.
pub fn response_status_flags(payload: &[u8], deprecate_eof: bool, capabilities: u32) -> u16 {
    match payload.first() {
        Some(&OK_HEADER) => parse_ok_packet(payload, capabilities)
            .map(|ok| ok.status_flags)
            .unwrap_or(0),
        Some(&EOF_HEADER) if is_eof_packet(payload) => {
            if capabilities & CLIENT_PROTOCOL_41 != 0 && payload.len() >= 5 {
                u16::from_le_bytes([payload[3], payload[4]])
            } else {
                0
            }
        }
        Some(&EOF_HEADER) if deprecate_eof => parse_ok_packet(payload, capabilities)
            .map(|ok| ok.status_flags)
            .unwrap_or(0),
        _ => 0,
    }
}

/// Read the column count announced by the first packet of a result set
pub fn column_count(payload: &[u8]) -> Result<u64> {
    let (count, _) = read_length_encoded_int(payload)?;
    Ok(count)
}

// ============================================================================
// Connection attributes
// ============================================================================

/// Parse connection attributes from the remaining handshake response bytes.
///
/// Format: a length-encoded total length followed by pairs of
/// length-encoded strings. Client ordering is preserved.
pub fn parse_connect_attrs(data: &[u8]) -> Result<Vec<(String, String)>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let mut cursor = 0;
    let mut attrs = Vec::new();

    let (total_len, len_bytes) = read_length_encoded_int(data)?;
    cursor += len_bytes;

    if total_len == 0 {
        return Ok(attrs);
    }

    let end_pos = cursor + total_len as usize;
    if end_pos > data.len() {
        // Truncated - return what parses cleanly
        return Ok(attrs);
    }

    while cursor < end_pos {
        let (key_len, key_len_bytes) = read_length_encoded_int(&data[cursor..])?;
        cursor += key_len_bytes;

        if cursor + key_len as usize > end_pos {
            break;
        }

        let key = String::from_utf8_lossy(&data[cursor..cursor + key_len as usize]).to_string();
        cursor += key_len as usize;

        let (val_len, val_len_bytes) = read_length_encoded_int(&data[cursor..])?;
        cursor += val_len_bytes;

        if cursor + val_len as usize > end_pos {
            break;
        }

        let value = String::from_utf8_lossy(&data[cursor..cursor + val_len as usize]).to_string();
        cursor += val_len as usize;

        attrs.push((key, value));
    }

    Ok(attrs)
}

/// Append connection attributes in wire format
pub fn build_connect_attrs(payload: &mut Vec<u8>, attrs: &[(String, String)]) {
    let mut blob = Vec::new();
    for (key, value) in attrs {
        write_length_encoded_int(&mut blob, key.len() as u64);
        blob.extend_from_slice(key.as_bytes());
        write_length_encoded_int(&mut blob, value.len() as u64);
        blob.extend_from_slice(value.as_bytes());
    }
    write_length_encoded_int(payload, blob.len() as u64);
    payload.extend_from_slice(&blob);
}

// ============================================================================
// Primitive helpers
// ============================================================================

/// Read a null-terminated string from a byte slice
/// Returns the string and the number of bytes consumed (including null terminator)
fn read_null_terminated_string(data: &[u8]) -> Result<(String, usize)> {
    let null_pos = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ProxyError::Protocol("missing null terminator".into()))?;

    let s = String::from_utf8_lossy(&data[..null_pos]).to_string();
    Ok((s, null_pos + 1))
}

/// Read a little-endian u16
fn read_u16_le(data: &[u8]) -> Result<u16> {
    if data.len() < 2 {
        return Err(ProxyError::Protocol("not enough bytes for u16".into()));
    }
    Ok(u16::from_le_bytes([data[0], data[1]]))
}

/// Read a little-endian u32
fn read_u32_le(data: &[u8]) -> Result<u32> {
    if data.len() < 4 {
        return Err(ProxyError::Protocol("not enough bytes for u32".into()));
    }
    Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

/// Read a length-encoded integer
/// Returns the value and the number of bytes consumed
pub fn read_length_encoded_int(data: &[u8]) -> Result<(u64, usize)> {
    if data.is_empty() {
        return Err(ProxyError::Protocol(
            "empty data for length-encoded int".into(),
        ));
    }

    match data[0] {
        // NULL (only in row data)
        0xFB => Ok((0, 1)),
        // 2-byte integer
        0xFC => {
            if data.len() < 3 {
                return Err(ProxyError::Protocol(
                    "not enough bytes for 2-byte length".into(),
                ));
            }
            Ok((u16::from_le_bytes([data[1], data[2]]) as u64, 3))
        }
        // 3-byte integer
        0xFD => {
            if data.len() < 4 {
                return Err(ProxyError::Protocol(
                    "not enough bytes for 3-byte length".into(),
                ));
            }
            Ok((u32::from_le_bytes([data[1], data[2], data[3], 0]) as u64, 4))
        }
        // 8-byte integer
        0xFE => {
            if data.len() < 9 {
                return Err(ProxyError::Protocol(
                    "not enough bytes for 8-byte length".into(),
                ));
            }
            Ok((
                u64::from_le_bytes([
                    data[1], data[2], data[3], data[4], data[5], data[6], data[7], data[8],
                ]),
                9,
            ))
        }
        // 0xFF is reserved for ERR packet header
        0xFF => Err(ProxyError::Protocol(
            "invalid length-encoded int marker 0xFF".into(),
        )),
        // 1-byte integer (0x00-0xFA)
        n => Ok((n as u64, 1)),
    }
}

/// Write a length-encoded integer
pub fn write_length_encoded_int(buf: &mut Vec<u8>, value: u64) {
    if value < 251 {
        buf.push(value as u8);
    } else if value < 65536 {
        buf.push(0xFC);
        buf.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value < 16777216 {
        buf.push(0xFD);
        buf.push((value & 0xFF) as u8);
        buf.push(((value >> 8) & 0xFF) as u8);
        buf.push(((value >> 16) & 0xFF) as u8);
    } else {
        buf.push(0xFE);
        buf.extend_from_slice(&value.to_le_bytes());
    }
}
