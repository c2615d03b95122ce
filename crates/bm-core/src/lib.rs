//! bm-core: Core abstractions and configuration for bus-mgr
//!
//! This crate provides the shared types, the error taxonomy, the traits the
//! connection manager requires from an external bus runtime, and the
//! configuration structures used by the node library and binary.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{BusError, ConfigError, StatusCode};
pub use types::{
    ConnectionState, NameFlags, Proximity, SessionId, SessionOpts, SessionPort, TrafficType,
    TransportMask,
};
