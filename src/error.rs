//! Error types for Refiloe.

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Messaging-channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send {kind} message to {recipient}: {reason}")]
    SendFailed {
        kind: String,
        recipient: String,
        reason: String,
    },

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Webhook verification failed")]
    VerificationFailed,

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Object-storage errors (CSV export uploads).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Upload of {name} failed: {reason}")]
    UploadFailed { name: String, reason: String },

    #[error("Storage is not configured")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Closed error kinds for the conversation flow layer.
///
/// Validation errors are recovered locally by re-prompting; the other
/// kinds terminate or refuse the task and surface a user-facing message.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Integration failure: {0}")]
    Integration(String),
}

impl From<DatabaseError> for FlowError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity, id } => FlowError::NotFound { entity, id },
            DatabaseError::Constraint(msg) => FlowError::AlreadyExists(msg),
            other => FlowError::Integration(other.to_string()),
        }
    }
}

impl From<ChannelError> for FlowError {
    fn from(e: ChannelError) -> Self {
        FlowError::Integration(e.to_string())
    }
}

impl From<StorageError> for FlowError {
    fn from(e: StorageError) -> Self {
        FlowError::Integration(e.to_string())
    }
}

/// Result type alias for the assistant.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_not_found_maps_to_flow_not_found() {
        let db_err = DatabaseError::NotFound {
            entity: "habit".into(),
            id: "HB123".into(),
        };
        let flow_err: FlowError = db_err.into();
        assert!(matches!(flow_err, FlowError::NotFound { .. }));
        assert!(flow_err.to_string().contains("HB123"));
    }

    #[test]
    fn database_query_maps_to_integration() {
        let flow_err: FlowError = DatabaseError::Query("boom".into()).into();
        assert!(matches!(flow_err, FlowError::Integration(_)));
    }

    #[test]
    fn channel_error_maps_to_integration() {
        let err = ChannelError::SendFailed {
            kind: "text".into(),
            recipient: "27820000000".into(),
            reason: "timeout".into(),
        };
        let flow_err: FlowError = err.into();
        assert!(matches!(flow_err, FlowError::Integration(_)));
    }
}
