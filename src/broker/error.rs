//! Broker Error Types

use crate::core::error_handling::ContextualError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrokerError {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("exchange not found: {name}")]
    ExchangeNotFound { name: String },

    #[error("queue not found: {name}")]
    QueueNotFound { name: String },

    #[error("consumer not found: {consumer_id}")]
    ConsumerNotFound { consumer_id: String },

    #[error("message {message_id} is not pending on consumer {consumer_id}")]
    MessageNotFound {
        consumer_id: String,
        message_id: String,
    },

    #[error("message to exchange '{exchange}' with routing key '{routing_key}' matched no queue")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl BrokerError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        BrokerError::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: String) -> Self {
        BrokerError::Internal { message }
    }

    /// True for the exchange/queue/consumer/message not-found family
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BrokerError::ExchangeNotFound { .. }
                | BrokerError::QueueNotFound { .. }
                | BrokerError::ConsumerNotFound { .. }
                | BrokerError::MessageNotFound { .. }
        )
    }
}

impl ContextualError for BrokerError {
    fn is_user_actionable(&self) -> bool {
        !matches!(self, BrokerError::Internal { .. })
    }

    fn user_message(&self) -> Option<String> {
        if self.is_user_actionable() {
            Some(self.to_string())
        } else {
            None
        }
    }
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;
