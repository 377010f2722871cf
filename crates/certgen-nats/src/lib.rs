//! NATS adapter for the event bus.
//!
//! Publishes core envelopes as JSON on their subjects and owns the
//! subscription plumbing ([`Subscription`]). Plain core NATS, no JetStream:
//! the delivery contract is at-least-once at the application level, backed
//! by the store's TTL state, so the bus itself stays fire-and-forget.

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;

use certgen_core::events::EventEnvelope;
use certgen_core::ports::{EventPublisher, PublishError};

/// Errors from bus connection and subscription management.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connect failed: {message}")]
    Connect { message: String },

    #[error("subscribe to {subject} failed: {message}")]
    Subscribe { subject: String, message: String },
}

/// Connect to the bus.
pub async fn connect(url: &str) -> Result<async_nats::Client, BusError> {
    async_nats::connect(url).await.map_err(|e| BusError::Connect {
        message: e.to_string(),
    })
}

/// One inbound message: the raw payload plus its reply subject, if the
/// sender expects a directly-addressed answer.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub payload: Vec<u8>,
    pub reply: Option<String>,
}

/// Handle on a live subject subscription.
pub struct Subscription {
    subject: String,
    inner: async_nats::Subscriber,
}

impl Subscription {
    /// Subscribe to a subject.
    pub async fn subscribe(
        client: &async_nats::Client,
        subject: &str,
    ) -> Result<Self, BusError> {
        let inner = client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::Subscribe {
                subject: subject.to_string(),
                message: e.to_string(),
            })?;
        tracing::debug!(subject, "subscribed");
        Ok(Self {
            subject: subject.to_string(),
            inner,
        })
    }

    /// Next message, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<InboundMessage> {
        self.inner.next().await.map(|message| InboundMessage {
            payload: message.payload.to_vec(),
            reply: message.reply.map(|subject| subject.to_string()),
        })
    }

    /// The subject this handle listens on.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Stop receiving; already-buffered messages are dropped.
    pub async fn unsubscribe(mut self) {
        if let Err(error) = self.inner.unsubscribe().await {
            tracing::warn!(subject = %self.subject, %error, "unsubscribe failed");
        }
    }
}

/// `EventPublisher` port implementation over an `async_nats::Client`.
#[derive(Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
}

impl NatsPublisher {
    #[must_use]
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, subject: &str, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let payload =
            serde_json::to_vec(envelope).map_err(|e| PublishError::encoding(e.to_string()))?;
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| PublishError::bus(e.to_string()))?;
        tracing::debug!(subject, event_id = %envelope.event_id, "event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certgen_core::events::subjects;

    #[test]
    fn publisher_is_object_safe_behind_the_port() {
        fn assert_port<T: EventPublisher>() {}
        assert_port::<NatsPublisher>();
    }

    #[test]
    fn envelopes_serialize_to_wire_json() {
        let envelope = EventEnvelope::new(subjects::BATCH_ACCEPTED, serde_json::json!({"x": 1}));
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["event_type"], "pdf.batch.accepted");
        assert_eq!(value["source"], "certgen");
        assert_eq!(value["payload"]["x"], 1);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn bus_errors_name_the_subject() {
        let err = BusError::Subscribe {
            subject: "pdf.batch.requested".to_string(),
            message: "connection reset".to_string(),
        };
        assert!(err.to_string().contains("pdf.batch.requested"));
    }
}
