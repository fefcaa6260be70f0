//! Address checksum: the first four bytes of a domain-separated hash.
//!
//! The checksum covers the address body before base64 encoding, so a typo in
//! the human-readable form is caught before any protocol-level parsing.

use crate::constants::CHECKSUM_SIZE;

/// Compute the 4-byte checksum over an address body.
pub fn checksum(body: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let hash = crate::hash_domain(b"caligo.address.checksum", body);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&hash[..CHECKSUM_SIZE]);
    out
}

/// Verify a checksum in constant time.
pub fn verify_checksum(body: &[u8], expected: &[u8]) -> bool {
    crate::constant_time_eq(&checksum(body), expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_deterministic() {
        assert_eq!(checksum(b"body"), checksum(b"body"));
        assert_ne!(checksum(b"body"), checksum(b"tody"));
    }

    #[test]
    fn verify_matches() {
        let c = checksum(b"hello");
        assert!(verify_checksum(b"hello", &c));
        assert!(!verify_checksum(b"hellp", &c));
        assert!(!verify_checksum(b"hello", &c[..3]));
    }
}
