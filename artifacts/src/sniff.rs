//! Content type detection from the first bytes of a file, for files whose extension doesn't
//! tell us anything.
//!
//! Known file formats are recognized by their magic numbers with `infer`.  Anything else is
//! classified as text or binary depending on whether it contains control characters that never
//! appear in text.

/// Maximum number of bytes the sniffer looks at
pub(crate) const SNIFF_LEN: usize = 512;

pub(crate) const OCTET_STREAM: &str = "application/octet-stream";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Guess the content type of `data`.  Only the first [`SNIFF_LEN`] bytes are considered.
pub(crate) fn sniff(data: &[u8]) -> String {
    let data = &data[..data.len().min(SNIFF_LEN)];

    if let Some(kind) = infer::get(data) {
        let mime_type = kind.mime_type();

        return if mime_type.starts_with("text/") {
            format!("{mime_type}; charset=utf-8")
        } else {
            mime_type.to_string()
        };
    }

    if data.iter().copied().any(is_binary_byte) {
        OCTET_STREAM.to_string()
    } else {
        TEXT_PLAIN.to_string()
    }
}

/// Control characters that never appear in text
fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}
