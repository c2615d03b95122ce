//! Bus runtime traits

use std::sync::Arc;

use crate::error::StatusCode;
use crate::traits::{BusListener, SessionListener, SessionPortListener};
use crate::types::{NameFlags, SessionId, SessionOpts, SessionPort, TransportMask};

/// An object exposed on the bus at an object path
pub trait BusObject: Send + Sync {
    /// Object path, e.g. `/org/example/chat`
    fn path(&self) -> &str;
}

/// Abstraction over the external message-bus runtime.
///
/// Every call blocks the calling thread until the runtime has completed it.
/// The runtime delivers listener callbacks on its own dispatch thread(s),
/// concurrently with the caller.
///
/// A blocking call issued from inside a callback dispatched by the same
/// runtime must be preceded by [`BusRuntime::enable_concurrent_callbacks`],
/// otherwise the dispatch thread could wait on itself.
pub trait BusRuntime: Send + Sync {
    /// Start the bus machinery (dispatch threads, transports)
    fn start(&self) -> Result<(), StatusCode>;

    /// Connect to the bus at `address`
    fn connect(&self, address: &str) -> Result<(), StatusCode>;

    /// Request the bus machinery to stop
    fn stop(&self) -> Result<(), StatusCode>;

    /// Block until all internal worker activity has quiesced
    fn join(&self) -> Result<(), StatusCode>;

    /// Expose an object on the bus
    fn register_bus_object(&self, object: Arc<dyn BusObject>) -> Result<(), StatusCode>;

    /// Register the listener that receives discovery events
    fn register_bus_listener(&self, listener: Arc<dyn BusListener>);

    /// Request ownership of a well-known name
    fn request_name(&self, name: &str, flags: NameFlags) -> Result<(), StatusCode>;

    /// Bind a session port so peers can join sessions on it
    fn bind_session_port(
        &self,
        port: SessionPort,
        opts: &SessionOpts,
        listener: Arc<dyn SessionPortListener>,
    ) -> Result<(), StatusCode>;

    /// Advertise a well-known name over the given transports
    fn advertise_name(&self, name: &str, transports: TransportMask) -> Result<(), StatusCode>;

    /// Join a session hosted by the owner of `name` on `port`
    fn join_session(
        &self,
        name: &str,
        port: SessionPort,
        listener: Option<Arc<dyn SessionListener>>,
        opts: &SessionOpts,
    ) -> Result<SessionId, StatusCode>;

    /// Announce that the current callback is about to issue a blocking call
    fn enable_concurrent_callbacks(&self);
}
