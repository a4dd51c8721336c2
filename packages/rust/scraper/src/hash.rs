//! Content hashing for change detection.

use sha2::{Digest, Sha256};

/// Field separator (ASCII unit separator), never present in page text.
const FIELD_SEPARATOR: char = '\u{1f}';

/// SHA-256 over whitespace-normalized fields, hex encoded.
///
/// Runs of whitespace collapse to one space and ends are trimmed, so
/// re-indented markup hashes the same.
pub fn compute_content_hash(fields: &[&str]) -> String {
    let mut canonical = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            canonical.push(FIELD_SEPARATOR);
        }
        canonical.push_str(&normalize_whitespace(field));
    }
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
