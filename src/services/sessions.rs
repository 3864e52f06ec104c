//! Session lifecycle
//!
//! Sessions are JSON records in the ephemeral store, keyed by a random
//! session id, with the refresh token digest stored alongside and a per-user
//! set for listing and bulk revocation. Refresh rotation is a single
//! compare-and-swap on the digest key: exactly one of two racing rotations
//! can win.

use crate::config::AuthSettings;
use crate::db::CredentialStore;
use crate::error::{AuthError, Result};
use crate::models::{DeviceMetadata, Session};
use crate::security::tokens::{generate_refresh_token, hash_token, AccessClaims, TokenSigner};
use crate::store::EphemeralStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

fn session_key(session_id: Uuid) -> String {
    format!("auth:session:{}", session_id)
}

fn refresh_key(session_id: Uuid) -> String {
    format!("auth:session:refresh:{}", session_id)
}

fn user_sessions_key(user_id: Uuid) -> String {
    format!("auth:sessions:user:{}", user_id)
}

/// Everything a freshly authenticated client receives
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub session: Session,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct RotatedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct SessionService {
    store: Arc<dyn EphemeralStore>,
    credentials: Arc<dyn CredentialStore>,
    tokens: TokenSigner,
    session_ttl_secs: i64,
    destroy_on_replay: bool,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        credentials: Arc<dyn CredentialStore>,
        auth: &AuthSettings,
    ) -> Self {
        Self {
            store,
            credentials,
            tokens: TokenSigner::from_settings(auth),
            session_ttl_secs: auth.session_ttl_secs,
            destroy_on_replay: auth.destroy_session_on_refresh_replay,
        }
    }

    /// Create a session with freshly minted tokens. Refuses banned users;
    /// the ban check is synchronous with creation.
    pub async fn open(
        &self,
        user_id: Uuid,
        device: &DeviceMetadata,
    ) -> Result<AuthenticatedSession> {
        let record = self
            .credentials
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if record.is_banned {
            return Err(AuthError::AccountBanned);
        }

        let refresh_token = generate_refresh_token();
        let session = self.create(user_id, &refresh_token, device).await?;
        let access_token = self.tokens.sign_access(user_id, session.session_id)?;

        Ok(AuthenticatedSession {
            session,
            access_token,
            refresh_token,
        })
    }

    /// Persist a session record for an already-vetted user
    pub async fn create(
        &self,
        user_id: Uuid,
        refresh_token: &str,
        device: &DeviceMetadata,
    ) -> Result<Session> {
        let session = Session::new(user_id, device);
        let payload = serde_json::to_string(&session)
            .map_err(|e| AuthError::Internal(format!("Failed to serialize session: {}", e)))?;

        self.store
            .set_ex(&session_key(session.session_id), &payload, self.session_ttl_secs)
            .await?;
        self.store
            .set_ex(
                &refresh_key(session.session_id),
                &hash_token(refresh_token),
                self.session_ttl_secs,
            )
            .await?;
        self.store
            .sadd(&user_sessions_key(user_id), &session.session_id.to_string())
            .await?;
        self.store
            .expire(&user_sessions_key(user_id), self.session_ttl_secs)
            .await?;

        Ok(session)
    }

    pub async fn lookup(&self, session_id: Uuid) -> Result<Option<Session>> {
        match self.store.get(&session_key(session_id)).await? {
            Some(payload) => {
                let session = serde_json::from_str(&payload)
                    .map_err(|e| AuthError::Internal(format!("Corrupt session record: {}", e)))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Swap the presented refresh token for a new pair.
    ///
    /// The swap is atomic on the stored digest; a presented token that no
    /// longer matches fails closed, and replay of an already-rotated token
    /// destroys the session when configured to.
    pub async fn rotate(&self, session_id: Uuid, presented: &str) -> Result<RotatedTokens> {
        let mut session = self
            .lookup(session_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        let new_refresh = generate_refresh_token();
        let swapped = self
            .store
            .compare_and_swap(
                &refresh_key(session_id),
                &hash_token(presented),
                &hash_token(&new_refresh),
                self.session_ttl_secs,
            )
            .await?;

        if !swapped {
            if self.destroy_on_replay {
                warn!(session_id = %session_id, "refresh token replay detected, destroying session");
                self.destroy(session_id).await?;
            }
            return Err(AuthError::InvalidRefreshToken);
        }

        session.last_active_at = Utc::now();
        let payload = serde_json::to_string(&session)
            .map_err(|e| AuthError::Internal(format!("Failed to serialize session: {}", e)))?;
        self.store
            .set_ex(&session_key(session_id), &payload, self.session_ttl_secs)
            .await?;

        let access_token = self.tokens.sign_access(session.user_id, session_id)?;
        Ok(RotatedTokens {
            access_token,
            refresh_token: new_refresh,
        })
    }

    pub async fn destroy(&self, session_id: Uuid) -> Result<()> {
        if let Some(session) = self.lookup(session_id).await? {
            self.store
                .srem(&user_sessions_key(session.user_id), &session_id.to_string())
                .await?;
        }
        self.store.del(&session_key(session_id)).await?;
        self.store.del(&refresh_key(session_id)).await?;
        Ok(())
    }

    /// Destroy every session of a user, returning how many were live
    pub async fn destroy_all(&self, user_id: Uuid) -> Result<u64> {
        let members = self.store.smembers(&user_sessions_key(user_id)).await?;
        let mut destroyed = 0;
        for member in &members {
            if let Ok(session_id) = member.parse::<Uuid>() {
                if self.lookup(session_id).await?.is_some() {
                    destroyed += 1;
                }
                self.store.del(&session_key(session_id)).await?;
                self.store.del(&refresh_key(session_id)).await?;
            }
        }
        self.store.del(&user_sessions_key(user_id)).await?;
        Ok(destroyed)
    }

    /// Live sessions for a user; stale set members are pruned on the way
    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let members = self.store.smembers(&user_sessions_key(user_id)).await?;
        let mut sessions = Vec::with_capacity(members.len());
        for member in &members {
            let Ok(session_id) = member.parse::<Uuid>() else {
                continue;
            };
            match self.lookup(session_id).await? {
                Some(session) => sessions.push(session),
                None => {
                    self.store
                        .srem(&user_sessions_key(user_id), member)
                        .await?;
                }
            }
        }
        sessions.sort_by_key(|s| std::cmp::Reverse(s.last_active_at));
        Ok(sessions)
    }

    /// Validate an access token for resource use: signature, session
    /// existence and current ban state all have to hold.
    pub async fn validate_access(&self, access_token: &str) -> Result<AccessClaims> {
        let claims = self.tokens.verify_access(access_token)?;

        let session = self
            .lookup(claims.sid)
            .await?
            .ok_or(AuthError::SessionNotFound)?;
        if session.user_id != claims.sub {
            return Err(AuthError::InvalidToken);
        }

        let record = self
            .credentials
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if record.is_banned {
            return Err(AuthError::AccountBanned);
        }

        Ok(claims)
    }
}
