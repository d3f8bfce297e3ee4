use rand::Rng;
use sha2::{Digest, Sha256};

pub const API_KEY_PREFIX: &str = "scol_sk_";

/// Generate an API key. Returns `(full_key, sha256_hash)`.
/// Key format: `scol_sk_` + 32 random bytes hex-encoded.
pub fn generate_api_key() -> (String, String) {
    let raw = random_hex(32);
    let full_key = format!("{API_KEY_PREFIX}{raw}");
    let hash = hash_token(&full_key);
    (full_key, hash)
}

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the first 8 chars after `scol_sk_` for display/identification.
pub fn key_prefix(full_key: &str) -> String {
    full_key
        .strip_prefix(API_KEY_PREFIX)
        .map(|rest| rest.chars().take(8).collect())
        .unwrap_or_default()
}

fn random_hex(n: usize) -> String {
    let bytes: Vec<u8> = (0..n).map(|_| rand::thread_rng().r#gen::<u8>()).collect();
    hex::encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_roundtrip() {
        let (key, hash) = generate_api_key();
        assert!(key.starts_with("scol_sk_"));
        assert_eq!(key.len(), API_KEY_PREFIX.len() + 64);
        assert_eq!(hash, hash_token(&key));
        assert_eq!(key_prefix(&key).len(), 8);
    }

    #[test]
    fn key_prefix_is_empty_for_foreign_tokens() {
        assert_eq!(key_prefix("other_sk_abcdef0123"), "");
    }
}
