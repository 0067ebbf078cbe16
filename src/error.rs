use serde_json::Value;
use thiserror::Error;

/// Protocol-level failures surfaced by the JSON-RPC endpoint (see `rpc` module docs).
///
/// These never crash the endpoint: each variant maps to a JSON-RPC error response
/// (or is silently dropped, for notifications) rather than unwinding the reader task.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("parse error")]
    ParseError,
    #[error("invalid request")]
    InvalidRequest,
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params")]
    InvalidParams,
}

impl ProtocolError {
    /// JSON-RPC error code for this condition.
    pub fn code(&self) -> i64 {
        match self {
            ProtocolError::ParseError => -32700,
            ProtocolError::InvalidRequest => -32600,
            ProtocolError::MethodNotFound(_) => -32601,
            ProtocolError::InvalidParams => -32602,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ProtocolError::ParseError => "parse error",
            ProtocolError::InvalidRequest => "invalid request",
            ProtocolError::MethodNotFound(_) => "method not found",
            ProtocolError::InvalidParams => "invalid params",
        }
    }
}

/// Error raised by a method handler, distinguishing the explicit RPC-error kind
/// from any other failure. Both become a JSON-RPC error response; only the
/// former carries a caller-chosen code.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("uncaught exception: {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn rpc(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        HandlerError::Rpc {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        HandlerError::Other(Box::new(err))
    }
}

/// Errors surfaced by an outbound `request()` call while awaiting a correlated response.
#[derive(Debug, Error)]
pub enum RpcCallError {
    #[error("the peer reported an error: {message}")]
    Peer {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("the endpoint's output channel was closed")]
    ChannelClosed,
    #[error("the endpoint shut down before a response arrived")]
    EndpointStopped,
}

/// Conditions a device driver can raise while polling or executing an operation.
/// Classified into recoverable-transient and fatal (see `is_fatal`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("device reported an active build")]
    ActiveBuild,
    #[error("build was cancelled on the device")]
    BuildCancelled,
    #[error("an external stop was requested")]
    ExternalStop,
    #[error("output buffer overflow")]
    BufferOverflow,
    #[error("device reported an overheat condition")]
    Overheat,
    #[error("device does not support this command")]
    CommandNotSupported,
    #[error("protocol or parameter error: {0}")]
    Protocol(String),
    #[error("device I/O error: {0}")]
    Io(String),
    #[error("unclassified driver error: {0}")]
    Other(String),
}

impl DriverError {
    /// Whether this condition tears down the machine's connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            DriverError::ActiveBuild
                | DriverError::BuildCancelled
                | DriverError::ExternalStop
                | DriverError::BufferOverflow
        )
    }
}

/// Errors a `Machine` operation can return to its caller.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("machine is not in a state that permits this operation: {0}")]
    MachineState(&'static str),
    #[error("no operation is currently running")]
    NoOperation,
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Errors raised by the driver registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown profile: {0}")]
    UnknownProfile(String),
    #[error("port is already bound to a machine with an incompatible profile")]
    ProfileMismatch,
}
