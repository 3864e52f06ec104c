/// TOTP verification and backup recovery codes
use crate::error::{AuthError, Result};
use base64::{engine::general_purpose::STANDARD as base64_engine, Engine as _};
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use totp_lite::{totp_custom, Sha1};

const TOTP_STEP_SECS: u64 = 30;
const TOTP_DIGITS: u32 = 6;
const SECRET_LEN: usize = 20;
const BACKUP_CODE_COUNT: usize = 8;
const BACKUP_CODE_LEN: usize = 8;

/// Generate a new base64-encoded 20-byte TOTP secret
pub fn generate_secret() -> String {
    let mut secret_bytes = [0u8; SECRET_LEN];
    OsRng.fill(&mut secret_bytes[..]);
    base64_engine.encode(secret_bytes)
}

/// Verify a 6-digit TOTP code against a stored secret.
///
/// Accepts the current 30-second step plus one step of clock skew in either
/// direction.
pub fn verify_totp(code: &str, secret: &str) -> Result<bool> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| AuthError::Internal(format!("System clock error: {}", e)))?
        .as_secs();
    verify_totp_at(code, secret, now)
}

fn verify_totp_at(code: &str, secret: &str, unix_secs: u64) -> Result<bool> {
    if code.len() != TOTP_DIGITS as usize || !code.chars().all(|c| c.is_ascii_digit()) {
        return Ok(false);
    }

    let secret_bytes = base64_engine
        .decode(secret)
        .map_err(|_| AuthError::Internal("Malformed TOTP secret".to_string()))?;
    if secret_bytes.len() != SECRET_LEN {
        return Err(AuthError::Internal("Malformed TOTP secret".to_string()));
    }

    let mut matched = false;
    for t in [
        unix_secs.saturating_sub(TOTP_STEP_SECS),
        unix_secs,
        unix_secs + TOTP_STEP_SECS,
    ] {
        let expected = totp_custom::<Sha1>(TOTP_STEP_SECS, TOTP_DIGITS, &secret_bytes, t);
        matched |= bool::from(expected.as_bytes().ct_eq(code.as_bytes()));
    }
    Ok(matched)
}

/// Generate backup codes for account recovery.
///
/// Returns 8 codes of 8 digits each. Callers display them once and store
/// only the [`hash_backup_code`] digests.
pub fn generate_backup_codes() -> Vec<String> {
    let mut rng = OsRng;
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            (0..BACKUP_CODE_LEN)
                .map(|_| {
                    let idx = rng.gen_range(0..10);
                    (b'0' + idx as u8) as char
                })
                .collect()
        })
        .collect()
}

/// Canonical form of a user-entered backup code: alphanumerics only,
/// uppercased, so separators and case do not matter
pub fn normalize_backup_code(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// SHA-256 hex digest of a normalized backup code
pub fn hash_backup_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_backup_code(code).as_bytes());
    hex::encode(hasher.finalize())
}

/// Find the stored hash matching a user-entered code.
///
/// Scans the full list with constant-time digest comparison regardless of
/// where (or whether) a match occurs.
pub fn find_backup_code(code: &str, stored_hashes: &[String]) -> Option<usize> {
    let mut hasher = Sha256::new();
    hasher.update(normalize_backup_code(code).as_bytes());
    let digest = hasher.finalize();

    let mut found = None;
    for (index, stored) in stored_hashes.iter().enumerate() {
        if let Ok(stored_bytes) = hex::decode(stored) {
            let matches = stored_bytes.len() == digest.len()
                && bool::from(digest.as_slice().ct_eq(&stored_bytes));
            if matches && found.is_none() {
                found = Some(index);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_at(secret: &str, unix_secs: u64) -> String {
        let secret_bytes = base64_engine.decode(secret).unwrap();
        totp_custom::<Sha1>(TOTP_STEP_SECS, TOTP_DIGITS, &secret_bytes, unix_secs)
    }

    #[test]
    fn test_current_code_verifies() {
        let secret = generate_secret();
        let now = 1_700_000_000;
        let code = code_at(&secret, now);
        assert!(verify_totp_at(&code, &secret, now).unwrap());
    }

    #[test]
    fn test_one_step_of_skew_accepted() {
        let secret = generate_secret();
        let now = 1_700_000_000;
        assert!(verify_totp_at(&code_at(&secret, now - 30), &secret, now).unwrap());
        assert!(verify_totp_at(&code_at(&secret, now + 30), &secret, now).unwrap());
    }

    #[test]
    fn test_stale_code_rejected() {
        let secret = generate_secret();
        let now = 1_700_000_000;
        let old = code_at(&secret, now - 120);
        let live_by_chance = [now - 30, now, now + 30]
            .iter()
            .any(|t| code_at(&secret, *t) == old);
        if !live_by_chance {
            assert!(!verify_totp_at(&old, &secret, now).unwrap());
        }
    }

    #[test]
    fn test_malformed_codes_rejected() {
        let secret = generate_secret();
        assert!(!verify_totp_at("12345", &secret, 1_700_000_000).unwrap());
        assert!(!verify_totp_at("abcdef", &secret, 1_700_000_000).unwrap());
        assert!(!verify_totp_at("1234567", &secret, 1_700_000_000).unwrap());
    }

    #[test]
    fn test_backup_code_generation() {
        let codes = generate_backup_codes();
        assert_eq!(codes.len(), 8);
        for code in &codes {
            assert_eq!(code.len(), 8);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_backup_code_normalization() {
        assert_eq!(normalize_backup_code(" 1234-5678 "), "12345678");
        assert_eq!(normalize_backup_code("ab-cd-12"), "ABCD12");
    }

    #[test]
    fn test_find_backup_code_ignores_formatting() {
        let hashes = vec![
            hash_backup_code("11112222"),
            hash_backup_code("33334444"),
        ];
        assert_eq!(find_backup_code("3333-4444", &hashes), Some(1));
        assert_eq!(find_backup_code("11112222", &hashes), Some(0));
        assert_eq!(find_backup_code("99990000", &hashes), None);
    }
}
