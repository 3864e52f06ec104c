/// Password hashing and verification using Argon2id
use crate::error::{AuthError, Result};
use crate::validators;
use argon2::{
    password_hash::{
        rand_core::{OsRng, RngCore},
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Argon2,
};
use once_cell::sync::Lazy;

// Hash of random bytes nobody knows. Verified against when an account has
// no password hash so unknown-identity and wrong-password requests spend
// the same time in Argon2.
static DUMMY_HASH: Lazy<String> = Lazy::new(|| {
    let mut noise = [0u8; 32];
    OsRng.fill_bytes(&mut noise);
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(&noise, &salt)
        .map(|h| h.to_string())
        .unwrap_or_default()
});

/// Hash a password using Argon2id algorithm
///
/// ## Security
///
/// - Algorithm: Argon2id (default configuration)
/// - Salt: Random 16-byte salt generated per password
/// - Password strength: composition rules plus zxcvbn score >= 3
///
/// ## Returns
///
/// PHC-formatted hash string safe for database storage
pub fn hash_password(password: &str) -> Result<String> {
    validate_password_strength(password)?;

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::Internal(format!("Password hashing failed: {}", e)))?
        .to_string();

    Ok(password_hash)
}

/// Verify a password against its PHC-formatted hash
pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|e| AuthError::Internal(format!("Invalid password hash format: {}", e)))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AuthError::Internal(format!(
            "Password verification failed: {}",
            e
        ))),
    }
}

/// Burn one Argon2 verification against a throwaway hash.
///
/// Called on the failure paths that would otherwise skip hashing, so the
/// response time does not reveal whether the identifier exists.
pub fn dummy_verify(password: &str) {
    if !DUMMY_HASH.is_empty() {
        let _ = verify_password(password, &DUMMY_HASH);
    }
}

fn validate_password_strength(password: &str) -> Result<()> {
    if !validators::validate_password(password) {
        return Err(AuthError::WeakPassword(
            "Password must be at least 8 characters with upper and lower case letters and a digit"
                .to_string(),
        ));
    }
    if !validators::validate_password_strength_zxcvbn(password) {
        return Err(AuthError::WeakPassword(
            "Password is too guessable".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("Correct-Horse-9-Battery").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("Correct-Horse-9-Battery", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }

    #[test]
    fn test_weak_passwords_rejected() {
        assert!(matches!(
            hash_password("short1A"),
            Err(AuthError::WeakPassword(_))
        ));
        assert!(matches!(
            hash_password("Password1"),
            Err(AuthError::WeakPassword(_))
        ));
    }

    #[test]
    fn test_dummy_verify_never_matches() {
        // Smoke test: must not panic and must not accept anything
        dummy_verify("anything");
        assert!(!verify_password("anything", &DUMMY_HASH).unwrap());
    }
}
