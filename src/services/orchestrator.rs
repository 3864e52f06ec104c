//! MFA orchestrator
//!
//! The single state machine behind login: lockout gate, credential check,
//! then either a session or a pending-auth ticket that must be redeemed
//! with a second factor. Every operation returns its outcome together with
//! the side effects to enqueue; the orchestrator itself writes no queues.

use crate::config::AuthSettings;
use crate::db::CredentialStore;
use crate::error::{AuthError, Result};
use crate::models::{CredentialRecord, DeviceMetadata};
use crate::security::password::{dummy_verify, hash_password, verify_password};
use crate::security::ticket::{binding_matches, TicketClaims, TicketIssuer, TicketKind};
use crate::security::tokens::hash_token;
use crate::security::totp::{find_backup_code, verify_totp};
use crate::services::device_trust::{self, DeviceTrustTracker};
use crate::services::lockout::LockoutGuard;
use crate::services::otp::{OtpChallengeManager, OtpMethod};
use crate::services::outbox::{AuditLevel, Effect};
use crate::services::sessions::{AuthenticatedSession, SessionService};
use crate::store::EphemeralStore;
use crate::validators::{mask_email, normalize_email};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

/// What the routing layer knows about the caller
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub ip: String,
    pub user_agent: Option<String>,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
}

impl ClientContext {
    pub fn fingerprint(&self) -> String {
        device_trust::fingerprint(self.device_type.as_deref(), self.user_agent.as_deref())
    }

    fn device(&self) -> DeviceMetadata {
        DeviceMetadata {
            device_name: self.device_name.clone(),
            device_type: self.device_type.clone(),
            user_agent: self.user_agent.clone(),
            ip_address: self.ip.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 256))]
    pub password: String,
}

/// Terminal or pending state of a login attempt
#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated(AuthenticatedSession),
    /// A configured second factor must be presented
    MfaPending { ticket: String, expires_in_secs: i64 },
    /// Credentials were right but the device needs confirmation
    NewDevicePending { ticket: String, expires_in_secs: i64 },
    Rejected { reason: AuthError },
}

/// A state transition plus the effects the dispatcher should enqueue
#[derive(Debug)]
pub struct AuthTransition {
    pub outcome: LoginOutcome,
    pub effects: Vec<Effect>,
}

impl AuthTransition {
    fn rejected(reason: AuthError, effects: Vec<Effect>) -> Self {
        Self {
            outcome: LoginOutcome::Rejected { reason },
            effects,
        }
    }
}

/// Second factor presented against a pending ticket
#[derive(Debug, Clone)]
pub enum ChallengeProof {
    Totp(String),
    BackupCode(String),
    Otp { method: OtpMethod, code: String },
}

#[derive(Debug)]
pub enum ChallengeOutcome {
    Sent {
        method: OtpMethod,
        expires_in_secs: i64,
    },
    Refused {
        reason: AuthError,
    },
}

#[derive(Debug)]
pub struct ChallengeTransition {
    pub outcome: ChallengeOutcome,
    pub effects: Vec<Effect>,
}

/// State of a pending ticket, for the session-status endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketStatus {
    Pending {
        kind: TicketKind,
        expires_in_secs: i64,
    },
    Invalid,
}

#[derive(Debug)]
pub struct PasswordChange {
    pub sessions_destroyed: u64,
    pub effects: Vec<Effect>,
}

pub struct AuthOrchestrator {
    credentials: Arc<dyn CredentialStore>,
    lockout: LockoutGuard,
    devices: DeviceTrustTracker,
    otp: OtpChallengeManager,
    sessions: SessionService,
    tickets: TicketIssuer,
}

impl AuthOrchestrator {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        credentials: Arc<dyn CredentialStore>,
        auth: &AuthSettings,
    ) -> Self {
        Self {
            lockout: LockoutGuard::new(store.clone(), auth),
            devices: DeviceTrustTracker::new(store.clone(), auth),
            otp: OtpChallengeManager::new(store.clone(), auth),
            sessions: SessionService::new(store, credentials.clone(), auth),
            tickets: TicketIssuer::from_settings(auth),
            credentials,
        }
    }

    /// Session operations (lookup, rotate, destroy, list) for the routing
    /// layer's logout and refresh endpoints
    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    /// Password login. Never distinguishes unknown identity from wrong
    /// password in outcome or timing.
    pub async fn login(
        &self,
        request: &LoginRequest,
        client: &ClientContext,
    ) -> Result<AuthTransition> {
        let Some(email) = normalize_email(&request.email) else {
            // Same work and same answer as a wrong password
            dummy_verify(&request.password);
            return Ok(AuthTransition::rejected(AuthError::InvalidCredentials, vec![]));
        };

        let lock = self.lockout.check(&email).await?;
        if lock.locked {
            return Ok(AuthTransition::rejected(
                AuthError::AccountLocked {
                    remaining_secs: lock.remaining_secs,
                },
                vec![],
            ));
        }

        let Some(record) = self.credentials.find_by_email(&email).await? else {
            dummy_verify(&request.password);
            return self.reject_password_failure(&email, None).await;
        };

        let Some(password_hash) = record.password_hash.as_deref() else {
            // External-identity account; spend the hash time anyway
            dummy_verify(&request.password);
            return Ok(AuthTransition::rejected(AuthError::NoPasswordSet, vec![]));
        };

        if !verify_password(&request.password, password_hash)? {
            return self
                .reject_password_failure(&email, Some(record.user_id))
                .await;
        }

        // Credentials are good from here on
        self.lockout.clear(&email).await?;

        if !record.email_verified {
            return Ok(AuthTransition::rejected(AuthError::EmailNotVerified, vec![]));
        }
        if record.is_banned {
            return Ok(AuthTransition::rejected(AuthError::AccountBanned, vec![]));
        }

        let fingerprint = client.fingerprint();

        if record.has_mfa() {
            let ticket = self
                .tickets
                .mint(record.user_id, TicketKind::MfaPending, &client.ip, &fingerprint)?;
            info!(user_id = %record.user_id, "login pending second factor");
            return Ok(AuthTransition {
                outcome: LoginOutcome::MfaPending {
                    ticket,
                    expires_in_secs: self.tickets.ttl_secs(),
                },
                effects: vec![],
            });
        }

        if !self.devices.is_known(record.user_id, &fingerprint).await? {
            let ticket = self.tickets.mint(
                record.user_id,
                TicketKind::NewDevicePending,
                &client.ip,
                &fingerprint,
            )?;
            info!(user_id = %record.user_id, "login pending device confirmation");
            return Ok(AuthTransition {
                outcome: LoginOutcome::NewDevicePending {
                    ticket,
                    expires_in_secs: self.tickets.ttl_secs(),
                },
                effects: vec![],
            });
        }

        self.finalize_login(&record, client, &fingerprint, vec![])
            .await
    }

    /// Issue an OTP challenge under a pending ticket
    pub async fn send_challenge(
        &self,
        ticket: &str,
        method: OtpMethod,
        client: &ClientContext,
    ) -> Result<ChallengeTransition> {
        let (claims, mut effects) = match self.consume_ticket(ticket, client) {
            Ok(ok) => ok,
            Err(effects) => {
                return Ok(ChallengeTransition {
                    outcome: ChallengeOutcome::Refused {
                        reason: AuthError::MfaSessionExpired,
                    },
                    effects,
                })
            }
        };

        let Some(record) = self.credentials.find_by_id(claims.sub).await? else {
            return Ok(ChallengeTransition {
                outcome: ChallengeOutcome::Refused {
                    reason: AuthError::MfaSessionExpired,
                },
                effects,
            });
        };
        if record.is_banned {
            return Ok(ChallengeTransition {
                outcome: ChallengeOutcome::Refused {
                    reason: AuthError::AccountBanned,
                },
                effects,
            });
        }

        let ticket_hash = hash_token(ticket);
        match self.otp.issue(&record, claims.kind, method, &ticket_hash).await {
            Ok((expires_in_secs, effect)) => {
                effects.push(effect);
                Ok(ChallengeTransition {
                    outcome: ChallengeOutcome::Sent {
                        method,
                        expires_in_secs,
                    },
                    effects,
                })
            }
            Err(
                reason @ (AuthError::SecurityKeyRequired
                | AuthError::MfaMethodNotEnabled
                | AuthError::TooManyOtpRequests),
            ) => Ok(ChallengeTransition {
                outcome: ChallengeOutcome::Refused { reason },
                effects,
            }),
            Err(other) => Err(other),
        }
    }

    /// Redeem a pending ticket with a second factor
    pub async fn verify_challenge(
        &self,
        ticket: &str,
        proof: ChallengeProof,
        client: &ClientContext,
    ) -> Result<AuthTransition> {
        let (claims, mut effects) = match self.consume_ticket(ticket, client) {
            Ok(ok) => ok,
            Err(effects) => {
                return Ok(AuthTransition::rejected(AuthError::MfaSessionExpired, effects))
            }
        };

        let Some(record) = self.credentials.find_by_id(claims.sub).await? else {
            return Ok(AuthTransition::rejected(AuthError::MfaSessionExpired, effects));
        };
        if record.is_banned {
            return Ok(AuthTransition::rejected(AuthError::AccountBanned, effects));
        }

        let ticket_hash = hash_token(ticket);
        if let Some(retry_after_secs) = self.otp.attempts_exhausted(&ticket_hash).await? {
            return Ok(AuthTransition::rejected(
                AuthError::TooManyAttempts { retry_after_secs },
                effects,
            ));
        }

        match proof {
            ChallengeProof::Totp(code) => {
                let Some(secret) = record.mfa_secret.as_deref() else {
                    return Ok(AuthTransition::rejected(AuthError::MfaMethodNotEnabled, effects));
                };
                if !verify_totp(&code, secret)? {
                    let attempts_remaining =
                        self.otp.record_failed_attempt(&ticket_hash).await?;
                    return Ok(AuthTransition::rejected(
                        AuthError::InvalidOtp { attempts_remaining },
                        effects,
                    ));
                }
                self.otp.clear_attempts(&ticket_hash).await?;
            }
            ChallengeProof::BackupCode(code) => {
                let Some(index) = find_backup_code(&code, &record.mfa_backup_codes) else {
                    let attempts_remaining =
                        self.otp.record_failed_attempt(&ticket_hash).await?;
                    return Ok(AuthTransition::rejected(
                        AuthError::InvalidOtp { attempts_remaining },
                        effects,
                    ));
                };
                // Consumption must land before the attempt counts as a
                // success; a concurrent spend of the same code loses here
                let code_hash = &record.mfa_backup_codes[index];
                if !self
                    .credentials
                    .consume_backup_code(record.user_id, index, code_hash)
                    .await?
                {
                    let attempts_remaining =
                        self.otp.record_failed_attempt(&ticket_hash).await?;
                    return Ok(AuthTransition::rejected(
                        AuthError::InvalidOtp { attempts_remaining },
                        effects,
                    ));
                }
                self.otp.clear_attempts(&ticket_hash).await?;
                effects.push(Effect::audit(
                    Some(record.user_id),
                    "backup_code_used",
                    AuditLevel::Info,
                    serde_json::json!({
                        "remaining": record.mfa_backup_codes.len().saturating_sub(1),
                    }),
                ));
            }
            ChallengeProof::Otp { method, code } => {
                if claims.kind == TicketKind::NewDevicePending && record.has_security_keys() {
                    return Ok(AuthTransition::rejected(AuthError::SecurityKeyRequired, effects));
                }
                if claims.kind == TicketKind::MfaPending {
                    let enabled = match method {
                        OtpMethod::Email => record.email_mfa_enabled,
                        OtpMethod::Notification => record.notification_mfa_enabled,
                    };
                    if !enabled {
                        return Ok(AuthTransition::rejected(
                            AuthError::MfaMethodNotEnabled,
                            effects,
                        ));
                    }
                }
                match self
                    .otp
                    .verify(record.user_id, method, &code, &ticket_hash)
                    .await
                {
                    Ok(()) => {}
                    Err(
                        reason @ (AuthError::InvalidOtp { .. } | AuthError::OtpExpiredOrMissing),
                    ) => return Ok(AuthTransition::rejected(reason, effects)),
                    Err(other) => return Err(other),
                }
            }
        }

        let fingerprint = client.fingerprint();
        if claims.kind == TicketKind::NewDevicePending {
            effects.push(Effect::audit(
                Some(record.user_id),
                "new_device_confirmed",
                AuditLevel::Info,
                serde_json::json!({ "ip": client.ip }),
            ));
        }

        self.finalize_login(&record, client, &fingerprint, effects)
            .await
    }

    /// Whether a pending ticket is still redeemable. Binding is enforced
    /// here exactly as on the challenge endpoints.
    pub fn ticket_status(&self, ticket: &str, client: &ClientContext) -> TicketStatus {
        match self.tickets.verify(ticket) {
            Ok(claims) if binding_matches(&claims, &client.ip, &client.fingerprint()) => {
                TicketStatus::Pending {
                    kind: claims.kind,
                    expires_in_secs: (claims.exp - Utc::now().timestamp()).max(0),
                }
            }
            _ => TicketStatus::Invalid,
        }
    }

    /// Change the account password and revoke every session.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<PasswordChange> {
        let record = self
            .credentials
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let password_hash = record
            .password_hash
            .as_deref()
            .ok_or(AuthError::NoPasswordSet)?;
        if !verify_password(current_password, password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        let new_hash = hash_password(new_password)?;
        self.credentials
            .update_password_hash(user_id, &new_hash)
            .await?;
        let sessions_destroyed = self.sessions.destroy_all(user_id).await?;

        info!(user_id = %user_id, sessions_destroyed, "password changed");
        Ok(PasswordChange {
            sessions_destroyed,
            effects: vec![Effect::audit(
                Some(user_id),
                "password_changed",
                AuditLevel::Info,
                serde_json::json!({ "sessions_destroyed": sessions_destroyed }),
            )],
        })
    }

    /// Validate and bind-check a pending ticket. On any failure the caller
    /// answers as if no ticket existed; a binding mismatch additionally
    /// produces an elevated audit effect.
    fn consume_ticket(
        &self,
        ticket: &str,
        client: &ClientContext,
    ) -> std::result::Result<(TicketClaims, Vec<Effect>), Vec<Effect>> {
        let claims = self.tickets.verify(ticket).map_err(|_| Vec::new())?;

        if !binding_matches(&claims, &client.ip, &client.fingerprint()) {
            let suspected = AuthError::MfaSessionHijackSuspected;
            warn!(user_id = %claims.sub, ip = %client.ip, "{}", suspected);
            return Err(vec![Effect::audit(
                Some(claims.sub),
                "mfa_binding_mismatch",
                AuditLevel::Warning,
                serde_json::json!({ "ip": client.ip }),
            )]);
        }

        Ok((claims, Vec::new()))
    }

    async fn reject_password_failure(
        &self,
        email: &str,
        user_id: Option<Uuid>,
    ) -> Result<AuthTransition> {
        let status = self.lockout.record_failure(email).await?;

        let mut effects = vec![Effect::audit(
            user_id,
            "login_failure",
            AuditLevel::Info,
            serde_json::json!({ "email": mask_email(email) }),
        )];

        let reason = if status.locked {
            effects.push(Effect::audit(
                user_id,
                "account_locked",
                AuditLevel::Warning,
                serde_json::json!({
                    "email": mask_email(email),
                    "remaining_secs": status.remaining_secs,
                }),
            ));
            AuthError::AccountLocked {
                remaining_secs: status.remaining_secs,
            }
        } else {
            AuthError::InvalidCredentials
        };

        Ok(AuthTransition::rejected(reason, effects))
    }

    async fn finalize_login(
        &self,
        record: &CredentialRecord,
        client: &ClientContext,
        fingerprint: &str,
        mut effects: Vec<Effect>,
    ) -> Result<AuthTransition> {
        let authenticated = self.sessions.open(record.user_id, &client.device()).await?;

        self.devices.mark_known(record.user_id, fingerprint).await?;
        self.lockout.clear(&record.email.to_lowercase()).await?;
        self.credentials
            .record_login(record.user_id, &client.ip)
            .await?;

        info!(
            user_id = %record.user_id,
            session_id = %authenticated.session.session_id,
            email = %mask_email(&record.email),
            "login complete"
        );
        effects.push(Effect::audit(
            Some(record.user_id),
            "login_success",
            AuditLevel::Info,
            serde_json::json!({ "ip": client.ip }),
        ));

        Ok(AuthTransition {
            outcome: LoginOutcome::Authenticated(authenticated),
            effects,
        })
    }
}
