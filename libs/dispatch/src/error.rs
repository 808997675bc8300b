use crate::handler::HandlerId;

/// Result type returned by handler, filter and compression code.
pub type HandlerResult<T = ()> = anyhow::Result<T>;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Processing failed for {handler} on '{message_type}' message: {source}")]
    Processing {
        handler: HandlerId,
        message_type: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Filter failed on '{message_type}' message for {handler}: {source}")]
    Filter {
        handler: HandlerId,
        message_type: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("No dispatcher installed on this thread")]
    NotInitialized,

    #[error("Flush did not settle after {cycles} cycles")]
    FlushLimitExceeded { cycles: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl DispatchError {
    /// Create a processing failure for the given handler and message type
    pub fn processing(handler: HandlerId, message_type: &str, source: anyhow::Error) -> Self {
        DispatchError::Processing {
            handler,
            message_type: message_type.to_string(),
            source,
        }
    }

    /// Create a filter failure for the given handler and message type
    pub fn filter(handler: HandlerId, message_type: &str, source: anyhow::Error) -> Self {
        DispatchError::Filter {
            handler,
            message_type: message_type.to_string(),
            source,
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        DispatchError::InvalidConfig(msg.into())
    }

    /// Check if this error was raised by handler or filter code
    pub fn is_handler_failure(&self) -> bool {
        matches!(
            self,
            DispatchError::Processing { .. } | DispatchError::Filter { .. }
        )
    }

    /// Message type being delivered when the failure happened
    pub fn message_type(&self) -> Option<&str> {
        match self {
            DispatchError::Processing { message_type, .. }
            | DispatchError::Filter { message_type, .. } => Some(message_type),
            _ => None,
        }
    }

    /// Handler the failing delivery was addressed to
    pub fn handler(&self) -> Option<HandlerId> {
        match self {
            DispatchError::Processing { handler, .. } | DispatchError::Filter { handler, .. } => {
                Some(*handler)
            }
            _ => None,
        }
    }
}

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::Io(err.to_string())
    }
}
