//! Password hashing, verification and policy checks.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::{Engine as _, engine::general_purpose};
use rand::prelude::RngExt;
use rand::rng;

use crate::{config::PasswordConfig, errors::Error};

/// Argon2id with the RFC 9106 second recommended parameter set (19 MiB, 2 passes).
fn argon2() -> Result<Argon2<'static>, Error> {
    let params = Params::new(19456, 2, 1, None).map_err(|e| Error::Internal {
        operation: format!("create argon2 params: {e}"),
    })?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a string using Argon2 (used for passwords and reset tokens).
pub fn hash_string(input: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2()?.hash_password(input.as_bytes(), &salt).map_err(|e| Error::Internal {
        operation: format!("hash string: {e}"),
    })?;

    Ok(hash.to_string())
}

/// Verify a string against a hash. Parameters are read from the hash itself.
pub fn verify_string(input: &str, hash: &str) -> Result<bool, Error> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| Error::Internal {
        operation: format!("parse hash: {e}"),
    })?;

    Ok(Argon2::default().verify_password(input.as_bytes(), &parsed_hash).is_ok())
}

/// Hash on the blocking pool; argon2 is deliberately slow and would stall the runtime.
pub async fn hash_string_blocking(input: String) -> Result<String, Error> {
    tokio::task::spawn_blocking(move || hash_string(&input))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })?
}

/// Verify on the blocking pool.
pub async fn verify_string_blocking(input: String, hash: String) -> Result<bool, Error> {
    tokio::task::spawn_blocking(move || verify_string(&input, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })?
}

/// Check a candidate password against the configured length bounds.
pub fn validate_password(password: &str, rules: &PasswordConfig) -> Result<(), Error> {
    let length = password.chars().count();
    if length < rules.min_length {
        return Err(Error::BadRequest {
            message: format!("Password must be at least {} characters long", rules.min_length),
        });
    }
    if length > rules.max_length {
        return Err(Error::BadRequest {
            message: format!("Password must be at most {} characters long", rules.max_length),
        });
    }
    Ok(())
}

/// Generate a secure random token for password reset
pub fn generate_reset_token() -> String {
    let mut token_bytes = [0u8; 32];
    rng().fill(&mut token_bytes);

    general_purpose::URL_SAFE_NO_PAD.encode(token_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_hashing() {
        let hash = hash_string("correct horse battery").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_string("correct horse battery", &hash).unwrap());
        assert!(!verify_string("wrong horse battery", &hash).unwrap());
    }

    #[test]
    fn test_same_input_different_hashes() {
        let hash1 = hash_string("same_password").unwrap();
        let hash2 = hash_string("same_password").unwrap();

        assert_ne!(hash1, hash2);
        assert!(verify_string("same_password", &hash1).unwrap());
        assert!(verify_string("same_password", &hash2).unwrap());
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        assert!(verify_string("anything", "not-a-phc-string").is_err());
    }

    #[tokio::test]
    async fn test_blocking_helpers_round_trip() {
        let hash = hash_string_blocking("teacher-pass".to_string()).await.unwrap();
        assert!(verify_string_blocking("teacher-pass".to_string(), hash.clone()).await.unwrap());
        assert!(!verify_string_blocking("student-pass".to_string(), hash).await.unwrap());
    }

    #[test]
    fn test_validate_password_bounds() {
        let rules = PasswordConfig {
            min_length: 8,
            max_length: 12,
        };
        assert!(validate_password("12345678", &rules).is_ok());
        assert!(validate_password("1234567", &rules).is_err());
        assert!(validate_password("1234567890123", &rules).is_err());
    }

    #[test]
    fn test_generate_reset_token() {
        let token1 = generate_reset_token();
        let token2 = generate_reset_token();

        assert_ne!(token1, token2);
        // 32 bytes base64url without padding
        assert_eq!(token1.len(), 43);
        assert!(token1.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
