//! Listener traits
//!
//! The bus runtime reports three independent groups of events. A single type
//! may implement all three, but each group can be implemented and tested on
//! its own.

use crate::types::{SessionId, SessionOpts, SessionPort, TransportMask};

/// Discovery and name-ownership events
pub trait BusListener: Send + Sync {
    /// A peer advertising a name matching a requested prefix was found
    fn found_advertised_name(&self, _name: &str, _transport: TransportMask, _name_prefix: &str) {}

    /// A previously found name is no longer advertised
    fn lost_advertised_name(&self, _name: &str, _transport: TransportMask, _name_prefix: &str) {}

    /// Ownership of a name changed; `None` means no owner
    fn name_owner_changed(
        &self,
        _name: &str,
        _previous_owner: Option<&str>,
        _new_owner: Option<&str>,
    ) {
    }
}

/// Admission control for inbound session requests on a bound port
pub trait SessionPortListener: Send + Sync {
    /// Decide whether `joiner` may join a session on `port`
    fn accept_session_joiner(&self, port: SessionPort, joiner: &str, opts: &SessionOpts) -> bool;

    /// A joiner accepted by [`Self::accept_session_joiner`] is now in session `id`
    fn session_joined(&self, _port: SessionPort, _id: SessionId, _joiner: &str) {}
}

/// Events about a session this side has joined
pub trait SessionListener: Send + Sync {
    /// The session ended or the connection to its host was lost
    fn session_lost(&self, _id: SessionId) {}
}
