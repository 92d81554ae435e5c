//! Motion-controller serial status query.
//!
//! Controllers answer `?ST\r` with a line starting `ST` (status report) or
//! `OK`, or with a bare ACK byte.

use super::pendant::ACK;

/// Status query.
pub const STATUS_QUERY: &[u8] = b"?ST\r";

/// Response prefixes that identify a motion controller.
const SIGNATURES: [&[u8]; 2] = [b"ST", b"OK"];

/// True if `bytes` is an acceptable answer to [`STATUS_QUERY`].
pub fn is_status_response(bytes: &[u8]) -> bool {
    if bytes.first() == Some(&ACK) {
        return true;
    }
    SIGNATURES.iter().any(|sig| bytes.starts_with(sig))
}
