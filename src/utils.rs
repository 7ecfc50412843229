//! Key normalization and small text helpers shared across the engine.

use std::path::Path;

use crate::types::NormalizedKey;

/// Canonical lookup form of a category or set identifier: trimmed, then lowercased.
///
/// Idempotent: `normalize_key(normalize_key(x)) == normalize_key(x)`.
pub fn normalize_key<T: AsRef<str>>(raw: T) -> NormalizedKey {
    raw.as_ref().trim().to_lowercase()
}

/// Derive a stimulus label from its source path (file stem, else the full source).
pub fn label_from_src(src: &str) -> String {
    Path::new(src)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| src.to_string())
}

/// Decode one `application/x-www-form-urlencoded` component.
///
/// Malformed escapes are kept verbatim.
pub fn decode_query_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'+' => {
                decoded.push(b' ');
                idx += 1;
            }
            b'%' if idx + 2 < bytes.len() => {
                match (hex_value(bytes[idx + 1]), hex_value(bytes[idx + 2])) {
                    (Some(hi), Some(lo)) => {
                        decoded.push(hi << 4 | lo);
                        idx += 3;
                    }
                    _ => {
                        decoded.push(b'%');
                        idx += 1;
                    }
                }
            }
            other => {
                decoded.push(other);
                idx += 1;
            }
        }
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

/// Percent-encode a value the way browsers encode URI components.
pub fn encode_uri_component(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_key_trims_and_lowercases() {
        assert_eq!(normalize_key("  Male-Asian-Adult-Neutral\t"), "male-asian-adult-neutral");
        assert_eq!(normalize_key(""), "");
    }

    #[test]
    fn label_from_src_uses_file_stem() {
        assert_eq!(label_from_src("stimuli/face/m_asian_017.jpg"), "m_asian_017");
        assert_eq!(label_from_src("plain"), "plain");
    }

    #[test]
    fn decode_query_component_handles_escapes() {
        assert_eq!(decode_query_component("Simple%2Dsymmetric"), "Simple-symmetric");
        assert_eq!(decode_query_component("a+b"), "a b");
        assert_eq!(decode_query_component("100%"), "100%");
        assert_eq!(decode_query_component("%zz"), "%zz");
    }

    #[test]
    fn decode_query_component_handles_truncated_and_non_utf8_escapes() {
        assert_eq!(decode_query_component("abc%4"), "abc%4");
        assert_eq!(decode_query_component("%"), "%");
        assert_eq!(decode_query_component("%41"), "A");
        assert_eq!(decode_query_component("p%FFq"), "p\u{FFFD}q");
        assert_eq!(decode_query_component("%C3%A9t%C3%A9"), "été");
        assert_eq!(decode_query_component("%C3"), "\u{FFFD}");
    }

    #[test]
    fn encoded_components_decode_back() {
        let raw = "cc=DONE 42/été";
        assert_eq!(decode_query_component(&encode_uri_component(raw)), raw);
    }

    #[test]
    fn encode_uri_component_escapes_reserved_bytes() {
        assert_eq!(encode_uri_component("C165LFSB"), "C165LFSB");
        assert_eq!(encode_uri_component("a b&c"), "a%20b%26c");
    }
}
