//! Reader registration credentials.
//!
//! A reader receives a random token once, at registration. Only a salted
//! PBKDF2 hash is stored:
//!
//! ```text
//! pbkdf2-sha256$<iterations>$<salt hex>$<hash hex>
//! ```

use attractap_core::constants::{READER_NAME_LENGTH, READER_TOKEN_LENGTH, TOKEN_HASH_ITERATIONS};
use rand::distributions::{Alphanumeric, DistString};
use rand::{Rng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;

const HASH_SCHEME: &str = "pbkdf2-sha256";
const SALT_LENGTH: usize = 16;
const HASH_LENGTH: usize = 32;
const NAME_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Random alphanumeric access token for a new reader.
pub fn generate_token() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), READER_TOKEN_LENGTH)
}

/// Short random display name for a new reader, e.g. `K7QX`.
pub fn generate_reader_name() -> String {
    let mut rng = rand::thread_rng();
    (0..READER_NAME_LENGTH)
        .map(|_| NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())] as char)
        .collect()
}

/// Hash a token with a fresh random salt.
pub fn hash_token(token: &str) -> String {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    hash_token_with(token, &salt, TOKEN_HASH_ITERATIONS)
}

pub fn hash_token_with(token: &str, salt: &[u8], iterations: u32) -> String {
    let hash = derive(token, salt, iterations);
    format!("{HASH_SCHEME}${iterations}${}${}", hex::encode(salt), hex::encode(hash))
}

/// Check `token` against a stored hash. Malformed hashes never verify.
pub fn verify_token(token: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(HASH_SCHEME), Some(iterations), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };

    let (Ok(iterations), Ok(salt), Ok(expected)) =
        (iterations.parse::<u32>(), hex::decode(salt), hex::decode(expected))
    else {
        return false;
    };
    if iterations == 0 || expected.len() != HASH_LENGTH {
        return false;
    }

    derive(token, &salt, iterations)
        .as_slice()
        .ct_eq(expected.as_slice())
        .into()
}

fn derive(token: &str, salt: &[u8], iterations: u32) -> [u8; HASH_LENGTH] {
    let mut out = [0u8; HASH_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha256>(token.as_bytes(), salt, iterations, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_generated_credentials_shape() {
        let token = generate_token();
        assert_eq!(token.len(), READER_TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));

        let name = generate_reader_name();
        assert_eq!(name.len(), READER_NAME_LENGTH);
        assert!(name.bytes().all(|b| NAME_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_hash_and_verify() {
        let stored = hash_token_with("s3cret-token", b"0123456789abcdef", 1_000);
        assert!(stored.starts_with("pbkdf2-sha256$1000$"));
        assert!(verify_token("s3cret-token", &stored));
        assert!(!verify_token("s3cret-tokeN", &stored));
    }

    #[test]
    fn test_same_token_different_salts() {
        let a = hash_token("token");
        let b = hash_token("token");
        assert_ne!(a, b);
        assert!(verify_token("token", &a));
        assert!(verify_token("token", &b));
    }

    #[rstest]
    #[case("")]
    #[case("plain-text-token")]
    #[case("bcrypt$10$00$00")]
    #[case("pbkdf2-sha256$x$00$00")]
    #[case("pbkdf2-sha256$0$00$0000000000000000000000000000000000000000000000000000000000000000")]
    #[case("pbkdf2-sha256$10$zz$0000000000000000000000000000000000000000000000000000000000000000")]
    #[case("pbkdf2-sha256$10$00$00")]
    #[case("pbkdf2-sha256$10$00$0000000000000000000000000000000000000000000000000000000000000000$extra")]
    fn test_malformed_hash_never_verifies(#[case] stored: &str) {
        assert!(!verify_token("token", stored));
    }
}
