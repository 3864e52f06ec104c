/// Authentication Core Library
///
/// Credential verification, multi-factor challenges and session lifecycle
/// for password + MFA login flows.
///
/// ## Modules
///
/// - `config`: Settings and cookie policy
/// - `db`: Credential store (Postgres repository + trait seam)
/// - `error`: Error types
/// - `models`: Data models
/// - `security`: Password hashing, TOTP, pending-auth tickets, tokens
/// - `services`: Business logic (lockout, device trust, OTP, sessions, orchestrator)
/// - `store`: Ephemeral key-value store (Redis + in-memory)
/// - `validators`: Input validation
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod security;
pub mod services;
pub mod store;
pub mod validators;

// Re-export commonly used types
pub use error::{AuthError, Result};
pub use services::orchestrator::{AuthOrchestrator, ChallengeProof, LoginOutcome};
pub use services::outbox::Effect;
