//! Small helpers shared by the cipher modules.

use base64::{engine::general_purpose::STANDARD, Engine};
use constant_time_eq::constant_time_eq;

/// Compare two byte slices without leaking the position of the first difference.
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    constant_time_eq(a, b)
}

/// Fixed-size variant of [`constant_time_compare`], used for key material.
pub fn constant_time_compare_array<const N: usize>(a: &[u8; N], b: &[u8; N]) -> bool {
    constant_time_eq(a, b)
}

/// Decode standard base64, tolerating surrounding whitespace.
pub fn decode_b64(s: &str) -> Option<Vec<u8>> {
    STANDARD.decode(s.trim()).ok()
}

pub fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
