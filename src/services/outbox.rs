//! Side-effect outbox
//!
//! The orchestrator never performs delivery itself: every state transition
//! returns a list of [`Effect`] values, and the [`EffectDispatcher`] drains
//! them onto the event bus fire-and-forget. Auth state is never blocked on
//! delivery success.

use crate::config::KafkaSettings;
use crate::error::{AuthError, Result};
use chrono::{DateTime, Utc};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Warning,
}

/// One queued side effect of an authentication state transition
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// Ask the mail pipeline to deliver a one-time code
    SendOtpEmail {
        email: String,
        first_name: Option<String>,
        code: String,
        expiry_minutes: i64,
    },
    /// Ask the notification pipeline to deliver an in-app message
    SendNotification {
        user_id: Uuid,
        title: String,
        message: String,
        metadata: serde_json::Value,
    },
    /// Structured audit event
    Audit {
        user_id: Option<Uuid>,
        action: String,
        level: AuditLevel,
        metadata: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
}

impl Effect {
    pub fn audit(
        user_id: Option<Uuid>,
        action: &str,
        level: AuditLevel,
        metadata: serde_json::Value,
    ) -> Self {
        Effect::Audit {
            user_id,
            action: action.to_string(),
            level,
            metadata,
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Effect::SendOtpEmail { .. } => "SendOtpEmail",
            Effect::SendNotification { .. } => "SendNotification",
            Effect::Audit { .. } => "AuditEvent",
        }
    }

    fn partition_key(&self) -> String {
        match self {
            Effect::SendOtpEmail { email, .. } => email.clone(),
            Effect::SendNotification { user_id, .. } => user_id.to_string(),
            Effect::Audit { user_id, .. } => {
                user_id.map(|u| u.to_string()).unwrap_or_else(|| "-".to_string())
            }
        }
    }

    fn topic_suffix(&self) -> &'static str {
        match self {
            Effect::SendOtpEmail { .. } => "email",
            Effect::SendNotification { .. } => "notifications",
            Effect::Audit { .. } => "audit",
        }
    }
}

// Plaintext codes must never reach logs; keep them out of Debug output
impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::SendOtpEmail {
                email,
                expiry_minutes,
                ..
            } => f
                .debug_struct("SendOtpEmail")
                .field("email", email)
                .field("code", &"<redacted>")
                .field("expiry_minutes", expiry_minutes)
                .finish(),
            Effect::SendNotification {
                user_id, title, ..
            } => f
                .debug_struct("SendNotification")
                .field("user_id", user_id)
                .field("title", title)
                .finish(),
            Effect::Audit {
                user_id,
                action,
                level,
                ..
            } => f
                .debug_struct("Audit")
                .field("user_id", user_id)
                .field("action", action)
                .field("level", level)
                .finish(),
        }
    }
}

#[derive(Serialize)]
struct EventEnvelope<'a> {
    event_id: Uuid,
    event_type: &'static str,
    source: &'static str,
    occurred_at: DateTime<Utc>,
    payload: &'a Effect,
}

/// Drains effects onto Kafka. Delivery failures are logged and swallowed;
/// the triggering auth transition has already committed.
#[derive(Clone)]
pub struct EffectDispatcher {
    producer: FutureProducer,
    topic_prefix: String,
}

impl EffectDispatcher {
    pub fn new(settings: &KafkaSettings) -> Result<Self> {
        let producer = rdkafka::config::ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("client.id", "auth-core")
            .create::<FutureProducer>()
            .map_err(|e| AuthError::Internal(format!("Failed to create Kafka producer: {}", e)))?;

        Ok(Self {
            producer,
            topic_prefix: settings.topic_prefix.clone(),
        })
    }

    pub async fn dispatch(&self, effects: Vec<Effect>) {
        for effect in effects {
            self.publish(&effect).await;
        }
    }

    async fn publish(&self, effect: &Effect) {
        let envelope = EventEnvelope {
            event_id: Uuid::new_v4(),
            event_type: effect.event_type(),
            source: "auth-core",
            occurred_at: Utc::now(),
            payload: effect,
        };

        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize {} effect: {}", effect.event_type(), e);
                return;
            }
        };

        let topic = format!("{}.{}", self.topic_prefix, effect.topic_suffix());
        let partition_key = effect.partition_key();
        let record = FutureRecord::to(&topic)
            .key(&partition_key)
            .payload(&payload);

        if let Err((error, _)) = self.producer.send(record, Duration::from_secs(5)).await {
            warn!(
                "Failed to publish {} effect to {}: {}",
                effect.event_type(),
                topic,
                error
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_codes() {
        let effect = Effect::SendOtpEmail {
            email: "user@example.com".to_string(),
            first_name: None,
            code: "123456".to_string(),
            expiry_minutes: 5,
        };
        let rendered = format!("{:?}", effect);
        assert!(!rendered.contains("123456"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn envelope_serializes_payload_inline() {
        let effect = Effect::audit(
            Some(Uuid::new_v4()),
            "login_success",
            AuditLevel::Info,
            serde_json::json!({"ip": "203.0.113.7"}),
        );
        let envelope = EventEnvelope {
            event_id: Uuid::new_v4(),
            event_type: effect.event_type(),
            source: "auth-core",
            occurred_at: Utc::now(),
            payload: &effect,
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&envelope).unwrap()).unwrap();
        assert_eq!(json["event_type"], "AuditEvent");
        assert_eq!(json["payload"]["type"], "audit");
        assert_eq!(json["payload"]["action"], "login_success");
    }
}
