//! Public key fingerprints for trust-on-first-use verification.
//!
//! A fingerprint is the SHA-256 of the encoded (SPKI DER) public key,
//! rendered as 32 colon-joined uppercase hex pairs. It is not secret; two
//! users compare it out-of-band to detect a substituted key.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Number of hex pairs in a fingerprint.
pub const FINGERPRINT_PAIRS: usize = 32;

/// Compute the fingerprint of an encoded public key.
pub fn fingerprint(public_key_der: &[u8]) -> String {
    let hash = Sha256::digest(public_key_der);
    hash.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Group a fingerprint into lines of 8 pairs for display.
pub fn format_fingerprint_display(fingerprint: &str) -> String {
    let parts: Vec<&str> = fingerprint.split(':').collect();
    parts
        .chunks(8)
        .map(|chunk| chunk.join(":"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compare two fingerprints in constant time.
///
/// Case, colons, whitespace and other separators are ignored so a value
/// read aloud or typed by hand still compares against the stored form.
pub fn fingerprints_match(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn normalize(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_has_32_uppercase_pairs() {
        let fp = fingerprint(b"some encoded key");
        let parts: Vec<&str> = fp.split(':').collect();
        assert_eq!(parts.len(), FINGERPRINT_PAIRS);
        for part in parts {
            assert_eq!(part.len(), 2);
            assert!(part.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        }
        // 64 hex chars + 31 colons
        assert_eq!(fp.len(), 95);
    }

    #[test]
    fn fingerprint_matches_known_digest() {
        // SHA-256("abc")
        let fp = fingerprint(b"abc");
        assert!(fp.starts_with("BA:78:16:BF:8F:01:CF:EA"));
        assert!(fp.ends_with("F2:00:15:AD"));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(fingerprint(b"key"), fingerprint(b"key"));
        assert_ne!(fingerprint(b"key"), fingerprint(b"kez"));
    }

    #[test]
    fn display_groups_into_four_lines() {
        let fp = fingerprint(b"abc");
        let display = format_fingerprint_display(&fp);
        let lines: Vec<&str> = display.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "BA:78:16:BF:8F:01:CF:EA");
    }

    #[test]
    fn display_of_empty_string_is_empty() {
        assert_eq!(format_fingerprint_display(""), "");
    }

    #[test]
    fn match_ignores_case_and_separators() {
        let fp = fingerprint(b"abc");
        let typed = fp.to_lowercase().replace(':', " ");
        assert!(fingerprints_match(&fp, &typed));
        assert!(fingerprints_match(&fp, &fp.replace(':', "")));
    }

    #[test]
    fn match_detects_single_pair_difference() {
        let fp = fingerprint(b"abc");
        let mut tampered = fp.clone();
        tampered.replace_range(0..2, "BB");
        assert!(!fingerprints_match(&fp, &tampered));
    }

    #[test]
    fn match_rejects_truncated_value() {
        let fp = fingerprint(b"abc");
        assert!(!fingerprints_match(&fp, &fp[..20]));
    }
}
