use std::path::PathBuf;

use thiserror::Error;

use crate::subscription::StartingPosition;

/// Invalid or missing plugin configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read service file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse service definition: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("please add an array of streams to custom.offlineKinesisStreams")]
    MissingStreams,

    #[error("please define at least one stream on custom.offlineKinesisStreams")]
    NoStreams,

    #[error("please define a stream name for every stream (entry {index} has none)")]
    MissingStreamName { index: usize },
}

/// Failure talking to the stream broker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("shard cursor has expired")]
    ExpiredCursor,

    #[error("malformed {operation} response: {message}")]
    MalformedResponse {
        operation: &'static str,
        message: String,
    },

    #[error("starting position {position} requires {field}")]
    MissingStartingParameter {
        position: StartingPosition,
        field: &'static str,
    },
}

impl BrokerError {
    pub fn request(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Request {
            operation,
            message: message.into(),
        }
    }

    pub fn malformed(operation: &'static str, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            operation,
            message: message.into(),
        }
    }
}

/// The broker could not be reached or a stream could not be provisioned.
/// Fatal at startup.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("stream broker at {endpoint} is unreachable: {reason}")]
    BrokerUnreachable { endpoint: String, reason: String },

    #[error("failed to create stream '{stream}': {source}")]
    CreateStream {
        stream: String,
        #[source]
        source: BrokerError,
    },

    #[error("stream '{stream}' reported no shards after {attempts} describe attempts")]
    NotReady { stream: String, attempts: u32 },
}

/// A handler reference could not be turned into something invocable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("handler reference is empty")]
    EmptyReference,

    #[error("handler '{reference}' is not registered")]
    NotRegistered { reference: String },

    #[error("handler module for '{reference}' not found at {}", searched.display())]
    NotFound {
        reference: String,
        searched: PathBuf,
    },
}

/// Failure reported by a handler invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure while dispatching one batch to its handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("handler '{handler}' failed: {source}")]
    Handler {
        handler: String,
        #[source]
        source: HandlerError,
    },
}

/// Anything that aborts the startup sequence.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_error_names_the_failing_handler() {
        let error = DispatchError::Handler {
            handler: "src/consumer.handler".to_string(),
            source: HandlerError::new("boom"),
        };

        assert_eq!(
            error.to_string(),
            "handler 'src/consumer.handler' failed: boom"
        );
    }

    #[test]
    fn resolution_error_is_transparent_inside_dispatch_error() {
        let error = DispatchError::from(ResolutionError::NotRegistered {
            reference: "missing.handler".to_string(),
        });

        assert_eq!(error.to_string(), "handler 'missing.handler' is not registered");
    }
}
