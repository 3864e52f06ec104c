use once_cell::sync::Lazy;
use regex::Regex;
use validator::ValidationError;

/// Input validation utilities for the authentication core

// Compile regex patterns once at startup
// These patterns are hardcoded and always valid, so we use expect() with explicit reasoning
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    // This regex is hardcoded and validated - it is a compile-time constant in practice
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("hardcoded email regex is invalid - fix source code")
});

/// Validate email format (RFC 5322 simplified)
pub fn validate_email(email: &str) -> bool {
    !email.is_empty() && email.len() <= 254 && EMAIL_REGEX.is_match(email)
}

/// Canonicalize a login identifier: trim whitespace, lowercase.
///
/// Returns `None` when the result is not a plausible email address, so
/// lockout counters and credential lookups always key on the same string.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if validate_email(&email) {
        Some(email)
    } else {
        None
    }
}

/// validator crate compatible custom validator for email shape
pub fn validate_email_shape(email: &str) -> Result<(), ValidationError> {
    if validate_email(email.trim()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_email"))
    }
}

/// Validate password composition
/// - Minimum 8 characters
/// - At least one uppercase letter
/// - At least one lowercase letter
/// - At least one digit
pub fn validate_password(password: &str) -> bool {
    if password.len() < 8 {
        return false;
    }

    let has_uppercase = password.chars().any(|c| c.is_uppercase());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    has_uppercase && has_lowercase && has_digit
}

/// Validate password strength using zxcvbn (entropy-based)
/// Returns true if password has zxcvbn score >= 3
pub fn validate_password_strength_zxcvbn(password: &str) -> bool {
    match zxcvbn::zxcvbn(password, &[]) {
        Ok(result) => result.score() >= 3,
        Err(_) => false,
    }
}

/// Mask an email address for log output
pub fn mask_email(email: &str) -> String {
    if let Some(at_pos) = email.find('@') {
        let local = &email[..at_pos];
        let domain = &email[at_pos..];
        // Char-wise: local parts from the database are not ASCII-only
        let mut chars = local.chars();
        match (chars.next(), chars.nth(1)) {
            (Some(first), Some(_)) => format!("{}***{}", first, domain),
            _ => format!("**{}", domain),
        }
    } else {
        "***@***".to_string()
    }
}
