use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::error;

use crate::error::AppError;

lazy_static! {
    /// Stand-in digest for identifiers that match no account, so a miss
    /// costs the same Argon2 work as a hit.
    static ref DECOY_HASH: Option<String> = hash_password("decoy-password-never-assigned").ok();
}

/// Derive an Argon2 PHC string from a plaintext secret.
pub fn hash_password(plain: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|digest| digest.to_string())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {e}")))
}

/// `Ok(false)` on mismatch; `Err` only when the stored digest cannot be parsed.
pub fn verify_password(plain: &str, stored_hash: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("malformed password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Run a verification whose answer is discarded. Always false.
pub fn verify_decoy(plain: &str) -> bool {
    match DECOY_HASH.as_deref() {
        Some(hash) => {
            let _ = verify_password(plain, hash);
        }
        None => error!("decoy hash unavailable"),
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_salted_and_verifies() {
        let first = hash_password("s3cret").expect("hashing should succeed");
        let second = hash_password("s3cret").expect("hashing should succeed");
        assert_ne!(first, second);
        assert!(!first.contains("s3cret"));
        assert!(verify_password("s3cret", &first).expect("verify should succeed"));
        assert!(verify_password("s3cret", &second).expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hash = hash_password("correct-horse").expect("hashing should succeed");
        assert!(!verify_password("battery-staple", &hash).expect("verify should not error"));
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }

    #[test]
    fn decoy_is_a_real_digest_that_never_matches() {
        let hash = DECOY_HASH.as_deref().expect("decoy hash should be computed");
        assert!(PasswordHash::new(hash).is_ok());
        assert!(!verify_decoy("decoy-password-never-assigned"));
        assert!(!verify_decoy(""));
    }
}
