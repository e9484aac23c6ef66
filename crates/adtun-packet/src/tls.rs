//! TLS ClientHello SNI Extraction
//!
//! Walks a TLS record far enough to find the `server_name` extension of a
//! ClientHello. The input is attacker-influenced, so every length prefix is
//! checked against the bytes that are actually present before it is used.
//! Anything malformed, truncated, or simply not a ClientHello yields `None`.

use crate::reader::ByteReader;
use tracing::trace;

/// TLS record content type: handshake
pub const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;

/// Handshake message type: ClientHello
pub const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;

/// Extension type: server_name (RFC 6066)
pub const EXTENSION_SERVER_NAME: u16 = 0x0000;

/// ServerName name_type: host_name
pub const NAME_TYPE_HOST_NAME: u8 = 0x00;

/// Upper bound on the returned hostname, in bytes
pub const MAX_HOSTNAME_LEN: usize = 2048;

const CLIENT_RANDOM_LEN: usize = 32;

/// Extract the SNI hostname from the start of a TCP payload.
///
/// Only the first entry of the server name list is considered, and only if
/// it is a `host_name`. Names longer than [`MAX_HOSTNAME_LEN`] bytes are
/// truncated. Invalid UTF-8 is replaced rather than rejected, since the
/// result is only ever compared against the denylist.
pub fn extract_sni(payload: &[u8]) -> Option<String> {
    let mut reader = ByteReader::new(payload);

    // Record header: type, version, length
    if reader.u8()? != CONTENT_TYPE_HANDSHAKE {
        return None;
    }
    reader.skip(2 + 2)?;

    // Handshake header: type, 24-bit length
    if reader.u8()? != HANDSHAKE_CLIENT_HELLO {
        return None;
    }
    reader.skip(3)?;

    // ClientHello body up to the extensions
    reader.skip(2 + CLIENT_RANDOM_LEN)?;
    reader.skip_u8_prefixed()?; // session id
    reader.skip_u16_prefixed()?; // cipher suites
    reader.skip_u8_prefixed()?; // compression methods

    let extensions_len = usize::from(reader.u16()?);
    let extensions_end = reader.position() + extensions_len;

    while reader.position() < extensions_end && !reader.is_empty() {
        let extension_type = reader.u16()?;
        let extension_len = usize::from(reader.u16()?);
        let body = reader.take(extension_len)?;

        if extension_type == EXTENSION_SERVER_NAME {
            match parse_server_name(body) {
                Some(ServerName::HostName(host)) => return Some(host),
                Some(ServerName::Other(name_type)) => {
                    trace!("server_name entry of type {} skipped", name_type);
                }
                None => {
                    trace!("truncated server_name extension");
                    return None;
                }
            }
        }
    }

    None
}

/// First entry of a `server_name` list
enum ServerName {
    HostName(String),
    /// Entry of another name_type; the extension is skipped
    Other(u8),
}

/// Parse the body of a `server_name` extension.
///
/// `None` means a length ran past the bytes present, which aborts the
/// whole ClientHello.
fn parse_server_name(body: &[u8]) -> Option<ServerName> {
    let mut reader = ByteReader::new(body);

    let list_len = usize::from(reader.u16()?);
    if list_len > reader.remaining() {
        return None;
    }

    let name_type = reader.u8()?;
    if name_type != NAME_TYPE_HOST_NAME {
        return Some(ServerName::Other(name_type));
    }

    let name_len = usize::from(reader.u16()?);
    let name = reader.take(name_len)?;
    let capped = &name[..name.len().min(MAX_HOSTNAME_LEN)];

    Some(ServerName::HostName(String::from_utf8_lossy(capped).into_owned()))
}
