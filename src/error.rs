use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked, retry in {remaining_secs}s")]
    AccountLocked { remaining_secs: i64 },

    #[error("Account banned")]
    AccountBanned,

    #[error("Email not verified")]
    EmailNotVerified,

    #[error("No password set for this account")]
    NoPasswordSet,

    #[error("Verification session expired")]
    MfaSessionExpired,

    #[error("Verification session binding mismatch")]
    MfaSessionHijackSuspected,

    #[error("Invalid code, {attempts_remaining} attempts remaining")]
    InvalidOtp { attempts_remaining: i64 },

    #[error("Code expired or not issued")]
    OtpExpiredOrMissing,

    #[error("Too many attempts, retry in {retry_after_secs}s")]
    TooManyAttempts { retry_after_secs: i64 },

    #[error("Too many code requests for this session")]
    TooManyOtpRequests,

    #[error("A security key is required to confirm this device")]
    SecurityKeyRequired,

    #[error("This verification method is not enabled")]
    MfaMethodNotEnabled,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    #[error("Password too weak: {0}")]
    WeakPassword(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("JWT error: {0}")]
    JwtError(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);
        AuthError::Database(err.to_string())
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!("Redis error: {}", err);
        AuthError::Redis(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidToken | ErrorKind::InvalidSignature | ErrorKind::InvalidIssuer => {
                AuthError::InvalidToken
            }
            _ => AuthError::JwtError(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}
