//! DNS Query Name Extraction
//!
//! Reads the first question name out of a DNS message carried in a UDP
//! payload. Only uncompressed labels are understood, which is what the
//! question section of a client query contains.

use crate::reader::ByteReader;
use tracing::trace;

/// Fixed DNS header length
pub const DNS_HEADER_LEN: usize = 12;

/// Longest label allowed by RFC 1035; larger length bytes are pointers or reserved
pub const MAX_LABEL_LEN: usize = 63;

/// Longest name we are willing to assemble, in bytes
pub const MAX_NAME_LEN: usize = 255;

/// Most labels a name of [`MAX_NAME_LEN`] bytes can hold
pub const MAX_LABELS: usize = 127;

/// Extract the query name from a DNS message.
///
/// Labels are joined with `.` until a zero-length label or the end of the
/// payload. Returns `None` when the header is incomplete, a label is cut
/// short by the end of the payload, a label length exceeds 63 (compression
/// pointers included), the name grows past [`MAX_NAME_LEN`] bytes or
/// [`MAX_LABELS`] labels, or no label was read at all.
pub fn extract_query_name(payload: &[u8]) -> Option<String> {
    let mut reader = ByteReader::new(payload);
    reader.skip(DNS_HEADER_LEN)?;

    let mut name = String::new();
    let mut labels = 0usize;

    while let Some(len) = reader.u8() {
        let len = usize::from(len);
        if len == 0 {
            break;
        }
        if len > MAX_LABEL_LEN {
            trace!(len, "unsupported DNS label length");
            return None;
        }

        let label = reader.take(len)?;
        labels += 1;
        if labels > MAX_LABELS {
            return None;
        }

        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(label));

        if name.len() > MAX_NAME_LEN {
            return None;
        }
    }

    if name.is_empty() { None } else { Some(name) }
}
