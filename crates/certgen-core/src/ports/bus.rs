//! Event bus publisher port.

use async_trait::async_trait;
use thiserror::Error;

use crate::events::EventEnvelope;

/// Error type for bus publishes.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("event publish failed: {message}")]
    Bus { message: String },

    #[error("event could not be encoded: {message}")]
    Encoding { message: String },
}

impl PublishError {
    pub fn bus(message: impl Into<String>) -> Self {
        Self::Bus {
            message: message.into(),
        }
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }
}

/// Subject-based publisher.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, subject: &str, envelope: &EventEnvelope) -> Result<(), PublishError>;
}
