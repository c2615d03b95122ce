//! Core error types for bus-mgr

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::{ConnectionState, SessionPort};

/// Failure status reported by a bus runtime call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Generic failure
    Fail,
    /// The bus machinery has not been started
    NotStarted,
    /// The bus machinery was already started
    AlreadyStarted,
    /// The bus machinery was stopped but its dispatch threads not yet joined
    Stopping,
    /// The bus is not connected
    NotConnected,
    /// Connecting to the given address failed
    ConnectFailed,
    /// The address could not be parsed
    BadAddress,
    /// Another owner already holds the requested name
    NameExists,
    /// The request was queued behind the current owner
    NameInQueue,
    /// The session port is already bound
    PortAlreadyBound,
    /// The session port is not bound by the named peer
    NoSuchPort,
    /// No peer owns the name being joined
    NoSuchName,
    /// The session host rejected the joiner
    SessionRejected,
    /// The object path is already registered
    ObjectAlreadyRegistered,
    /// A blocking call was issued from a dispatch thread without enabling
    /// concurrent callbacks first
    BlockingCallNotAllowed,
    /// A dispatch thread could not be joined
    JoinFailed,
}

impl StatusCode {
    /// Short status text, in the style of the runtime's status names
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Fail => "ER_FAIL",
            StatusCode::NotStarted => "ER_BUS_NOT_STARTED",
            StatusCode::AlreadyStarted => "ER_BUS_BUS_ALREADY_STARTED",
            StatusCode::Stopping => "ER_BUS_STOPPING",
            StatusCode::NotConnected => "ER_BUS_NOT_CONNECTED",
            StatusCode::ConnectFailed => "ER_BUS_CONNECT_FAILED",
            StatusCode::BadAddress => "ER_BUS_BAD_TRANSPORT_ARGS",
            StatusCode::NameExists => "ER_DBUS_REQUEST_NAME_REPLY_EXISTS",
            StatusCode::NameInQueue => "ER_DBUS_REQUEST_NAME_REPLY_IN_QUEUE",
            StatusCode::PortAlreadyBound => "ER_ALLJOYN_BINDSESSIONPORT_REPLY_ALREADY_EXISTS",
            StatusCode::NoSuchPort => "ER_ALLJOYN_JOINSESSION_REPLY_NO_SESSION",
            StatusCode::NoSuchName => "ER_ALLJOYN_JOINSESSION_REPLY_UNREACHABLE",
            StatusCode::SessionRejected => "ER_ALLJOYN_JOINSESSION_REPLY_REJECTED",
            StatusCode::ObjectAlreadyRegistered => "ER_BUS_OBJ_ALREADY_EXISTS",
            StatusCode::BlockingCallNotAllowed => "ER_BUS_BLOCKING_CALL_NOT_ALLOWED",
            StatusCode::JoinFailed => "ER_THREAD_JOIN_FAILED",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for StatusCode {}

/// Top-level error type for bus connection management
#[derive(Error, Debug)]
pub enum BusError {
    /// Starting the bus machinery or connecting to the bus failed
    #[error("Connection to \"{address}\" failed: {status}")]
    Connection { address: String, status: StatusCode },

    /// Another owner holds the requested name
    #[error("Name {name} is already owned: {status}")]
    NameTaken { name: String, status: StatusCode },

    /// Requesting the name failed for a reason other than ownership
    #[error("RequestName({name}) failed: {status}")]
    RequestName { name: String, status: StatusCode },

    /// Binding the session port failed
    #[error("BindSessionPort({port}) failed: {status}")]
    SessionPortBind { port: SessionPort, status: StatusCode },

    /// Advertising the name failed
    #[error("Failed to advertise name {name}: {status}")]
    Advertise { name: String, status: StatusCode },

    /// Stopping or joining the bus machinery failed
    #[error("Stopping the bus failed: {status}")]
    Stop { status: StatusCode },

    /// Joining a discovered session failed
    #[error("JoinSession({name}) failed: {status}")]
    JoinSession { name: String, status: StatusCode },

    /// Registering a bus object failed
    #[error("Registering bus object {path} failed: {status}")]
    RegisterObject { path: String, status: StatusCode },

    /// The connection was already deleted
    #[error("{operation} called after the connection was deleted")]
    UseAfterTeardown { operation: &'static str },

    /// The operation is not permitted from the current lifecycle state
    #[error("{operation} not permitted in state {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl BusError {
    /// The runtime status behind this error, if it came from the runtime
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            BusError::Connection { status, .. }
            | BusError::NameTaken { status, .. }
            | BusError::RequestName { status, .. }
            | BusError::SessionPortBind { status, .. }
            | BusError::Advertise { status, .. }
            | BusError::Stop { status }
            | BusError::JoinSession { status, .. }
            | BusError::RegisterObject { status, .. } => Some(*status),
            BusError::UseAfterTeardown { .. }
            | BusError::InvalidState { .. }
            | BusError::Config(_) => None,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_exposed() {
        let err = BusError::NameTaken {
            name: "org.example.svc".to_string(),
            status: StatusCode::NameExists,
        };
        assert_eq!(err.status(), Some(StatusCode::NameExists));

        let err = BusError::UseAfterTeardown { operation: "stop" };
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_error_messages() {
        let err = BusError::SessionPortBind {
            port: SessionPort::DEFAULT,
            status: StatusCode::PortAlreadyBound,
        };
        assert_eq!(
            err.to_string(),
            "BindSessionPort(24) failed: ER_ALLJOYN_BINDSESSIONPORT_REPLY_ALREADY_EXISTS"
        );

        let err = BusError::InvalidState {
            operation: "start_client",
            state: ConnectionState::Stopped,
        };
        assert_eq!(err.to_string(), "start_client not permitted in state stopped");
    }
}
