//! Staging keys
//!
//! Every file placed in the staging area is named by a digest of its
//! relative path. Master and slaves compute the key independently, so the
//! canonical text fed to the digest must be identical on every node.
//!
//! The `legacy` scheme matches staging areas written by the first
//! generation of the tool: MD5 over the quoted, backslash-escaped form of
//! the path (the repr of a Python 2 unicode string, without its `u`
//! prefix). The `sha256` scheme hashes the raw UTF-8 bytes instead and is
//! not readable by legacy nodes.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::crawler::RelativePath;

/// Digest used to derive staging keys and the lock content hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyScheme {
    /// MD5 of the escaped, quoted representation
    #[default]
    Legacy,
    /// SHA-256 of the raw bytes
    Sha256,
}

/// Name of a staged file inside the flat staging directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StagingKey(String);

impl StagingKey {
    /// Wrap an existing staged file name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StagingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl KeyScheme {
    /// Digest a piece of text (a relative path)
    pub fn digest_text(self, text: &str) -> String {
        match self {
            KeyScheme::Legacy => md5_hex(legacy_repr_text(text).as_bytes()),
            KeyScheme::Sha256 => sha256_hex(text.as_bytes()),
        }
    }

    /// Digest a byte string (the concatenated staged names)
    pub fn digest_bytes(self, bytes: &[u8]) -> String {
        match self {
            KeyScheme::Legacy => md5_hex(legacy_repr_bytes(bytes).as_bytes()),
            KeyScheme::Sha256 => sha256_hex(bytes),
        }
    }
}

/// Compute the staging key for a relative path
pub fn staging_key(path: &RelativePath, scheme: KeyScheme) -> StagingKey {
    StagingKey(scheme.digest_text(path.as_str()))
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Single quotes unless the text has a single quote and no double quote
fn pick_quote(has_single: bool, has_double: bool) -> char {
    if has_single && !has_double {
        '"'
    } else {
        '\''
    }
}

/// Escaped form of a unicode string. The legacy producer stripped the
/// leading `u` marker, so none is emitted here.
pub fn legacy_repr_text(text: &str) -> String {
    let quote = pick_quote(text.contains('\''), text.contains('"'));
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);

    for ch in text.chars() {
        let code = ch as u32;
        if ch == quote || ch == '\\' {
            out.push('\\');
            out.push(ch);
        } else if code >= 0x10000 {
            out.push_str(&format!("\\U{:08x}", code));
        } else if code >= 0x100 {
            out.push_str(&format!("\\u{:04x}", code));
        } else if ch == '\t' {
            out.push_str("\\t");
        } else if ch == '\n' {
            out.push_str("\\n");
        } else if ch == '\r' {
            out.push_str("\\r");
        } else if code < 0x20 || code >= 0x7f {
            out.push_str(&format!("\\x{:02x}", code));
        } else {
            out.push(ch);
        }
    }

    out.push(quote);
    out
}

/// Escaped form of a byte string
pub fn legacy_repr_bytes(bytes: &[u8]) -> String {
    let quote = pick_quote(bytes.contains(&b'\''), bytes.contains(&b'"'));
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push(quote);

    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b if b as char == quote => {
                out.push('\\');
                out.push(quote);
            }
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b if b < 0x20 || b >= 0x7f => out.push_str(&format!("\\x{:02x}", b)),
            b => out.push(b as char),
        }
    }

    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(path: &str) -> RelativePath {
        RelativePath::new(path).unwrap()
    }

    #[test]
    fn test_repr_quoting() {
        assert_eq!(legacy_repr_text("foo/bar.txt"), "'foo/bar.txt'");
        assert_eq!(legacy_repr_text("it's"), "\"it's\"");
        assert_eq!(legacy_repr_text("it's \"x\""), "'it\\'s \"x\"'");
        assert_eq!(legacy_repr_text("a\\b"), "'a\\\\b'");
        assert_eq!(legacy_repr_text("a\tb"), "'a\\tb'");
    }

    #[test]
    fn test_repr_non_ascii() {
        assert_eq!(legacy_repr_text("caf\u{e9}"), "'caf\\xe9'");
        assert_eq!(legacy_repr_text("\u{2603}"), "'\\u2603'");
        assert_eq!(legacy_repr_text("\u{1f600}"), "'\\U0001f600'");
        assert_eq!(legacy_repr_bytes(&[b'a', 0xc3, 0xa9]), "'a\\xc3\\xa9'");
    }

    #[test]
    fn test_legacy_keys_match_known_digests() {
        let cases = [
            ("foo/bar.txt", "9ff94a9015c37c1c0c4099caba92bb29"),
            ("it's", "55a56847a573a5b4b78448bcf04983ed"),
            ("caf\u{e9}", "54a6fa99f46dfbd7ba7a366fd5d49aa7"),
            ("\u{2603}", "b06f3c840421194f5bb5ce88384774d0"),
            ("\u{1f600}", "8a51154aa0ee09d7e85d0d0628daaa10"),
            ("a\tb", "812fb3114429ca60ee5b74714a405bf9"),
        ];

        for (path, expected) in cases {
            assert_eq!(staging_key(&rel(path), KeyScheme::Legacy).as_str(), expected);
        }

        // Lock hash of an empty staging area
        assert_eq!(
            KeyScheme::Legacy.digest_bytes(b""),
            "e6fda0f0d3e0adfff69e334462d1ef6a"
        );
    }

    #[test]
    fn test_sha256_scheme() {
        assert_eq!(
            staging_key(&rel("foo/bar.txt"), KeyScheme::Sha256).as_str(),
            "ff4111e8e4ebd83e0173a4f765a6d9e71068b5732f1e0c3ba865dfe1b8c6fad2"
        );
    }

    #[test]
    fn test_key_is_deterministic() {
        let path = rel("docs/report 2024 (final).pdf");
        for scheme in [KeyScheme::Legacy, KeyScheme::Sha256] {
            let first = staging_key(&path, scheme);
            for _ in 0..10 {
                assert_eq!(staging_key(&path, scheme), first);
            }
        }
        assert_ne!(
            staging_key(&path, KeyScheme::Legacy),
            staging_key(&rel("docs/report 2024 (final).PDF"), KeyScheme::Legacy)
        );
    }
}
