//! Database-name ↔ filename escaping (spec.md §4.9 "Filename escaping").
//!
//! Database names are arbitrary 1-31 byte strings; filenames are not. Any
//! byte that isn't printable ASCII, or is `/` or `%`, becomes `%HH`
//! (upper-hex). The inverse rejects anything not ending in a recognized
//! extension, and any `%HH` escape with a non-hex digit.

use crate::error::{Result, SyncError};

const RECOGNIZED_EXTENSIONS: [&str; 3] = [".pdb", ".prc", ".pqa"];

fn needs_escape(b: u8) -> bool {
    !(0x20..=0x7e).contains(&b) || b == b'/' || b == b'%'
}

/// Escape a database name into a filesystem-safe stem (without
/// extension).
pub fn escape(name: &[u8]) -> String {
    let mut out = String::with_capacity(name.len());
    for &b in name {
        if needs_escape(b) {
            out.push_str(&format!("%{b:02X}"));
        } else {
            out.push(b as char);
        }
    }
    out
}

/// Escape and append the appropriate extension.
pub fn escape_with_extension(name: &[u8], extension: &str) -> String {
    format!("{}{extension}", escape(name))
}

/// Parse a filename back into the raw database-name bytes. Rejects
/// filenames that don't end in `.pdb`, `.prc`, or `.pqa`, and any `%HH`
/// with a non-hex digit.
pub fn unescape(filename: &str) -> Result<Vec<u8>> {
    let stem = RECOGNIZED_EXTENSIONS
        .iter()
        .find_map(|ext| filename.strip_suffix(ext))
        .ok_or_else(|| SyncError::BadFilename(filename.to_string()))?;

    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .ok_or_else(|| SyncError::BadFilename(filename.to_string()))?;
            let hex_str = std::str::from_utf8(hex).map_err(|_| SyncError::BadFilename(filename.to_string()))?;
            let value = u8::from_str_radix(hex_str, 16)
                .map_err(|_| SyncError::BadFilename(filename.to_string()))?;
            out.push(value);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_ascii_passes_through() {
        assert_eq!(escape(b"AddressDB"), "AddressDB");
    }

    #[test]
    fn escapes_slash_percent_and_control_bytes() {
        assert_eq!(escape(b"a/b%c\x01"), "a%2Fb%25c%01");
    }

    #[test]
    fn bijection_holds_for_arbitrary_bytes() {
        for name in [
            b"Simple".to_vec(),
            b"has/slash".to_vec(),
            b"has%percent".to_vec(),
            vec![0x00, 0x01, 0xff, b'A'],
            (0u8..=255).collect::<Vec<u8>>(),
        ] {
            let filename = escape_with_extension(&name, ".pdb");
            let recovered = unescape(&filename).unwrap();
            assert_eq!(recovered, name);
        }
    }

    #[test]
    fn rejects_unrecognized_extension() {
        assert!(unescape("AddressDB.txt").is_err());
    }

    #[test]
    fn rejects_bad_hex_digits() {
        assert!(unescape("bad%zzescape.pdb").is_err());
        assert!(unescape("truncated%4.pdb").is_err());
    }
}
