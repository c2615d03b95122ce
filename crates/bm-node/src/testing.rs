//! Recording bus runtime for tests
//!
//! [`RecordingBus`] implements [`BusRuntime`] without any transport. It keeps
//! the sequence of calls made against it and can be told to fail selected
//! operations, which makes call-sequencing assertions straightforward.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bm_core::traits::{BusListener, BusObject, BusRuntime, SessionListener, SessionPortListener};
use bm_core::{NameFlags, SessionId, SessionOpts, SessionPort, StatusCode, TransportMask};

/// Operations of the bus runtime interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusOp {
    Start,
    Connect,
    Stop,
    Join,
    RegisterBusObject,
    RegisterBusListener,
    RequestName,
    BindSessionPort,
    AdvertiseName,
    JoinSession,
    EnableConcurrentCallbacks,
}

#[derive(Default)]
struct Recorded {
    calls: Vec<BusOp>,
    address: Option<String>,
    name_flags: Option<NameFlags>,
    bound: Option<(SessionPort, SessionOpts)>,
    advertised: Option<(String, TransportMask)>,
    joined: Vec<(String, SessionPort)>,
    objects: Vec<String>,
    listener: Option<Arc<dyn BusListener>>,
    port_listener: Option<Arc<dyn SessionPortListener>>,
}

/// In-memory bus runtime that records every call
pub struct RecordingBus {
    recorded: Mutex<Recorded>,
    failures: Mutex<HashMap<BusOp, StatusCode>>,
    next_session: AtomicU32,
}

impl RecordingBus {
    /// Create a bus where every call succeeds
    pub fn new() -> Self {
        Self {
            recorded: Mutex::new(Recorded::default()),
            failures: Mutex::new(HashMap::new()),
            next_session: AtomicU32::new(1),
        }
    }

    /// Make `op` fail with `status`
    pub fn fail_on(self, op: BusOp, status: StatusCode) -> Self {
        self.set_failure(op, Some(status));
        self
    }

    /// Make the first successful join return `id`; later joins count up from it
    pub fn with_session_id(self, id: u32) -> Self {
        self.next_session.store(id, Ordering::SeqCst);
        self
    }

    /// Change or clear the failure configured for `op`
    pub fn set_failure(&self, op: BusOp, status: Option<StatusCode>) {
        let mut failures = lock(&self.failures);
        match status {
            Some(status) => failures.insert(op, status),
            None => failures.remove(&op),
        };
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<BusOp> {
        lock(&self.recorded).calls.clone()
    }

    /// Whether `op` was called at least once
    pub fn called(&self, op: BusOp) -> bool {
        self.count(op) > 0
    }

    /// Number of times `op` was called
    pub fn count(&self, op: BusOp) -> usize {
        lock(&self.recorded)
            .calls
            .iter()
            .filter(|call| **call == op)
            .count()
    }

    /// Address passed to the last `connect`
    pub fn connected_address(&self) -> Option<String> {
        lock(&self.recorded).address.clone()
    }

    /// Flags passed to the last `request_name`
    pub fn name_flags(&self) -> Option<NameFlags> {
        lock(&self.recorded).name_flags
    }

    /// Port and options passed to the last `bind_session_port`
    pub fn bound_port(&self) -> Option<(SessionPort, SessionOpts)> {
        lock(&self.recorded).bound
    }

    /// Name and transports passed to the last `advertise_name`
    pub fn advertised(&self) -> Option<(String, TransportMask)> {
        lock(&self.recorded).advertised.clone()
    }

    /// Names and ports of every `join_session` call
    pub fn joined_names(&self) -> Vec<(String, SessionPort)> {
        lock(&self.recorded).joined.clone()
    }

    /// Paths of registered bus objects
    pub fn object_paths(&self) -> Vec<String> {
        lock(&self.recorded).objects.clone()
    }

    /// Listener passed to `register_bus_listener`
    pub fn bus_listener(&self) -> Option<Arc<dyn BusListener>> {
        lock(&self.recorded).listener.clone()
    }

    /// Listener passed to `bind_session_port`
    pub fn port_listener(&self) -> Option<Arc<dyn SessionPortListener>> {
        lock(&self.recorded).port_listener.clone()
    }

    fn record(&self, op: BusOp) -> Result<(), StatusCode> {
        lock(&self.recorded).calls.push(op);
        match lock(&self.failures).get(&op) {
            Some(status) => Err(*status),
            None => Ok(()),
        }
    }
}

impl Default for RecordingBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusRuntime for RecordingBus {
    fn start(&self) -> Result<(), StatusCode> {
        self.record(BusOp::Start)
    }

    fn connect(&self, address: &str) -> Result<(), StatusCode> {
        lock(&self.recorded).address = Some(address.to_string());
        self.record(BusOp::Connect)
    }

    fn stop(&self) -> Result<(), StatusCode> {
        self.record(BusOp::Stop)
    }

    fn join(&self) -> Result<(), StatusCode> {
        self.record(BusOp::Join)
    }

    fn register_bus_object(&self, object: Arc<dyn BusObject>) -> Result<(), StatusCode> {
        self.record(BusOp::RegisterBusObject)?;
        lock(&self.recorded).objects.push(object.path().to_string());
        Ok(())
    }

    fn register_bus_listener(&self, listener: Arc<dyn BusListener>) {
        let mut recorded = lock(&self.recorded);
        recorded.calls.push(BusOp::RegisterBusListener);
        recorded.listener = Some(listener);
    }

    fn request_name(&self, _name: &str, flags: NameFlags) -> Result<(), StatusCode> {
        lock(&self.recorded).name_flags = Some(flags);
        self.record(BusOp::RequestName)
    }

    fn bind_session_port(
        &self,
        port: SessionPort,
        opts: &SessionOpts,
        listener: Arc<dyn SessionPortListener>,
    ) -> Result<(), StatusCode> {
        self.record(BusOp::BindSessionPort)?;
        let mut recorded = lock(&self.recorded);
        recorded.bound = Some((port, *opts));
        recorded.port_listener = Some(listener);
        Ok(())
    }

    fn advertise_name(&self, name: &str, transports: TransportMask) -> Result<(), StatusCode> {
        self.record(BusOp::AdvertiseName)?;
        lock(&self.recorded).advertised = Some((name.to_string(), transports));
        Ok(())
    }

    fn join_session(
        &self,
        name: &str,
        port: SessionPort,
        _listener: Option<Arc<dyn SessionListener>>,
        _opts: &SessionOpts,
    ) -> Result<SessionId, StatusCode> {
        lock(&self.recorded).joined.push((name.to_string(), port));
        self.record(BusOp::JoinSession)?;
        Ok(SessionId::new(self.next_session.fetch_add(1, Ordering::SeqCst)))
    }

    fn enable_concurrent_callbacks(&self) {
        lock(&self.recorded)
            .calls
            .push(BusOp::EnableConcurrentCallbacks);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
