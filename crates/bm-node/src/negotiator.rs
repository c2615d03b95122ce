//! Session negotiation
//!
//! [`SessionNegotiator`] is the listener a [`ConnectionManager`] registers
//! with its bus runtime. It implements the three listener groups:
//!
//! - discovery ([`BusListener`]): joins a session with every peer whose
//!   advertised name is found
//! - admission ([`SessionPortListener`]): accepts joiners only on the
//!   configured session port
//! - session ([`SessionListener`]): forgets a session once it is lost
//!
//! All callbacks may run on runtime dispatch threads concurrently with the
//! owner's thread, so the discovery flag and session id are atomics.
//!
//! [`ConnectionManager`]: crate::ConnectionManager

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use bm_core::traits::{BusListener, BusRuntime, SessionListener, SessionPortListener};
use bm_core::{BusError, SessionId, SessionOpts, SessionPort, StatusCode, TransportMask};

/// Reacts to discovery and session events for one bus connection
pub struct SessionNegotiator<B: BusRuntime + 'static> {
    /// Bus that dispatches our callbacks; not owned
    bus: Weak<B>,
    /// Ourselves, handed to the runtime as the joined session's listener
    self_ref: Weak<SessionNegotiator<B>>,
    /// Well-known name of the owning connection
    advertised_name: String,
    /// Port sessions are bound and joined on
    session_port: SessionPort,
    /// Set once a discovered session has been joined
    name_found: AtomicBool,
    /// Active session, `SessionId::NONE` until one is joined
    session_id: AtomicU32,
}

impl<B: BusRuntime + 'static> SessionNegotiator<B> {
    /// Create a negotiator issuing its bus calls against `bus`
    pub fn new(
        bus: &Arc<B>,
        advertised_name: impl Into<String>,
        session_port: SessionPort,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            bus: Arc::downgrade(bus),
            self_ref: self_ref.clone(),
            advertised_name: advertised_name.into(),
            session_port,
            name_found: AtomicBool::new(false),
            session_id: AtomicU32::new(SessionId::NONE.as_u32()),
        })
    }

    /// Well-known name this negotiator was bound with
    pub fn advertised_name(&self) -> &str {
        &self.advertised_name
    }

    /// Port sessions are accepted and joined on
    pub fn session_port(&self) -> SessionPort {
        self.session_port
    }

    /// Whether a discovered peer's session has been joined
    pub fn name_found(&self) -> bool {
        self.name_found.load(Ordering::Acquire)
    }

    /// The active session, if any
    pub fn session_id(&self) -> Option<SessionId> {
        match self.session_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(SessionId::new(id)),
        }
    }

    fn record_session(&self, id: SessionId) {
        self.session_id.store(id.as_u32(), Ordering::Release);
    }

    /// Join the session hosted by the owner of a discovered `name`.
    ///
    /// Called from discovery callbacks, so concurrent callbacks are enabled
    /// before the blocking join is issued.
    pub fn join_discovered(&self, name: &str) -> Result<SessionId, BusError> {
        let bus = self.bus.upgrade().ok_or(BusError::UseAfterTeardown {
            operation: "join_session",
        })?;

        bus.enable_concurrent_callbacks();

        let opts = SessionOpts::multipoint_messages();
        let listener = self
            .self_ref
            .upgrade()
            .map(|me| me as Arc<dyn SessionListener>);
        let id = bus
            .join_session(name, self.session_port, listener, &opts)
            .map_err(|status| BusError::JoinSession {
                name: name.to_string(),
                status,
            })?;
        if id == SessionId::NONE {
            return Err(BusError::JoinSession {
                name: name.to_string(),
                status: StatusCode::Fail,
            });
        }

        self.record_session(id);
        self.name_found.store(true, Ordering::Release);
        Ok(id)
    }
}

impl<B: BusRuntime + 'static> BusListener for SessionNegotiator<B> {
    fn found_advertised_name(&self, name: &str, transport: TransportMask, name_prefix: &str) {
        tracing::info!(
            "Discovered advertised name \"{}\" (transport {}, prefix \"{}\")",
            name,
            transport,
            name_prefix
        );

        match self.join_discovered(name) {
            Ok(id) => tracing::info!("Joined session \"{}\" with session id {}", name, id),
            // Discovery keeps going; the next advertisement gets another try
            Err(e) => tracing::warn!("{}", e),
        }
    }

    fn lost_advertised_name(&self, name: &str, transport: TransportMask, name_prefix: &str) {
        tracing::info!(
            "Advertised name \"{}\" is gone (transport {}, prefix \"{}\")",
            name,
            transport,
            name_prefix
        );
    }

    fn name_owner_changed(&self, name: &str, previous_owner: Option<&str>, new_owner: Option<&str>) {
        if new_owner.is_some() && name == self.advertised_name {
            tracing::debug!(
                "NameOwnerChanged({}, {}, {})",
                name,
                previous_owner.unwrap_or("null"),
                new_owner.unwrap_or("null")
            );
        }
    }
}

impl<B: BusRuntime + 'static> SessionPortListener for SessionNegotiator<B> {
    fn accept_session_joiner(&self, port: SessionPort, joiner: &str, opts: &SessionOpts) -> bool {
        if port != self.session_port {
            tracing::info!("Rejecting join attempt on non-session port {}", port);
            return false;
        }

        tracing::info!(
            "Accepting join session request from {} (proximity={:#x}, traffic={:#x}, transports={})",
            joiner,
            opts.proximity.0,
            opts.traffic.bits(),
            opts.transports
        );
        true
    }

    fn session_joined(&self, _port: SessionPort, id: SessionId, joiner: &str) {
        self.record_session(id);
        tracing::info!("Session joined with {} (id={})", joiner, id);
    }
}

impl<B: BusRuntime + 'static> SessionListener for SessionNegotiator<B> {
    fn session_lost(&self, id: SessionId) {
        // A newer session may already have replaced the lost one
        let cleared = self
            .session_id
            .compare_exchange(
                id.as_u32(),
                SessionId::NONE.as_u32(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        tracing::info!("Session {} lost (active session cleared: {})", id, cleared);
    }
}
