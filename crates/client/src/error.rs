//! Error taxonomy for client operations.

use thiserror::Error;

/// Errors surfaced by endpoint calls, directory operations and flows.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint rejected the supplied credential.
    #[error("authentication failed for {endpoint}")]
    Authentication {
        /// Display name of the endpoint.
        endpoint: String,
    },

    /// The endpoint could not be reached or the transport failed.
    #[error("cannot connect to {endpoint}: {message}")]
    Connectivity {
        /// Display name of the endpoint.
        endpoint: String,
        /// Underlying transport error.
        message: String,
    },

    /// The default endpoint answered 401: the whole client must log in again.
    #[error("local session expired, log in again")]
    SessionExpired,

    /// A non-default endpoint answered 401; only that endpoint is affected.
    #[error("endpoint {endpoint_id} rejected its token")]
    Unauthorized {
        /// Identifier of the endpoint.
        endpoint_id: String,
    },

    /// A response body could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    /// The endpoint answered with an unexpected status.
    #[error("{endpoint} answered HTTP {status}")]
    Status {
        /// Display name of the endpoint.
        endpoint: String,
        /// HTTP status code.
        status: u16,
    },

    /// The referenced endpoint or session does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The endpoint is not currently reachable.
    #[error("endpoint {0} is not reachable")]
    Unreachable(String),

    /// No reachable endpoint is available to host a new session.
    #[error("no endpoints connected")]
    NoReachableEndpoint,

    /// The user cancelled a prompt.
    #[error("cancelled")]
    Cancelled,

    /// Input was rejected before any call was made.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Reading or writing durable client state failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl ClientError {
    /// Returns true for errors that mean an endpoint could not be used right now.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ClientError::Connectivity { .. } | ClientError::Unreachable(_)
        )
    }
}

impl From<anyhow::Error> for ClientError {
    fn from(err: anyhow::Error) -> Self {
        ClientError::Storage(format!("{:#}", err))
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
