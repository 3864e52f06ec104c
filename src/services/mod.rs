pub mod device_trust;
pub mod lockout;
pub mod orchestrator;
pub mod otp;
pub mod outbox;
pub mod sessions;
