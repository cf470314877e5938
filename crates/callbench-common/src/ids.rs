//! Random identifiers used by a session.
//!
//! Run ids only need to keep artifact names from colliding between runs of
//! the same entry/sample/network; they carry no security property.

use rand::RngExt as _;

/// Seven-digit run id embedded in output artifact names.
pub fn run_id() -> u32 {
    rand::rng().random_range(1_000_000..=9_999_999)
}

/// Per-call nonce sent to the connection broker: 64 random bytes, hex encoded.
pub fn call_nonce() -> String {
    let mut rng = rand::rng();
    (0..64)
        .map(|_| format!("{:02x}", rng.random::<u8>()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_has_seven_digits() {
        for _ in 0..100 {
            assert_eq!(run_id().to_string().len(), 7);
        }
    }

    #[test]
    fn nonce_is_128_hex_chars() {
        let n = call_nonce();
        assert_eq!(n.len(), 128);
        assert!(n.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(n, call_nonce());
    }
}
