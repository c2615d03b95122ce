//! Loopback bus attachment

use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::JoinHandle;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use bm_core::traits::{BusListener, BusObject, BusRuntime, SessionListener, SessionPortListener};
use bm_core::{NameFlags, SessionId, SessionOpts, SessionPort, StatusCode, TransportMask};

use super::network::LoopbackNetwork;
use super::{lock, read, write, DispatchEvent, CONCURRENT_CALLBACKS, DISPATCHING_FOR};

/// Address schemes the loopback bus accepts
const ADDRESS_SCHEMES: [&str; 3] = ["unix:", "tcp:", "null:"];

/// One attachment to a [`LoopbackNetwork`]
pub struct LoopbackBus {
    shared: Arc<BusShared>,
}

/// A session port bound by a bus
struct BoundPort {
    opts: SessionOpts,
    listener: Arc<dyn SessionPortListener>,
}

#[derive(Default)]
struct Lifecycle {
    /// Address the bus is connected to
    address: Option<String>,
    /// Sender into the dispatch thread, present while started
    dispatch_tx: Option<mpsc::UnboundedSender<DispatchEvent>>,
    /// Dispatch thread awaiting join
    dispatcher: Option<JoinHandle<()>>,
}

pub(crate) struct BusShared {
    id: u64,
    unique_name: String,
    application_name: String,
    discovery_enabled: bool,
    network: LoopbackNetwork,
    lifecycle: Mutex<Lifecycle>,
    listener: RwLock<Option<Arc<dyn BusListener>>>,
    ports: DashMap<SessionPort, BoundPort>,
    objects: DashMap<String, Arc<dyn BusObject>>,
    find_prefixes: Mutex<Vec<String>>,
    joined_sessions: DashMap<SessionId, Option<Arc<dyn SessionListener>>>,
}

impl LoopbackBus {
    /// Create an unstarted bus on `network`
    pub fn new(network: &LoopbackNetwork, application_name: &str, discovery_enabled: bool) -> Self {
        let (id, unique_name) = network.allocate_unique_name();
        Self {
            shared: Arc::new(BusShared {
                id,
                unique_name,
                application_name: application_name.to_string(),
                discovery_enabled,
                network: network.clone(),
                lifecycle: Mutex::new(Lifecycle::default()),
                listener: RwLock::new(None),
                ports: DashMap::new(),
                objects: DashMap::new(),
                find_prefixes: Mutex::new(Vec::new()),
                joined_sessions: DashMap::new(),
            }),
        }
    }

    /// Unique bus name, e.g. `:1.3`
    pub fn unique_name(&self) -> &str {
        &self.shared.unique_name
    }

    /// Application identity the bus was created with
    pub fn application_name(&self) -> &str {
        &self.shared.application_name
    }

    /// Whether discovery callbacks are delivered to this bus
    pub fn discovery_enabled(&self) -> bool {
        self.shared.discovery_enabled
    }

    /// Whether the bus is started and connected
    pub fn is_connected(&self) -> bool {
        self.shared.ensure_connected().is_ok()
    }

    /// Sessions this bus has joined
    pub fn joined_sessions(&self) -> Vec<SessionId> {
        self.shared
            .joined_sessions
            .iter()
            .map(|entry| *entry.key())
            .collect()
    }

    /// Ask to be told about names starting with `prefix`.
    ///
    /// Names already advertised by other buses are reported right away.
    pub fn find_advertised_name(&self, prefix: &str) -> Result<(), StatusCode> {
        let shared = &self.shared;
        shared.ensure_blocking_allowed()?;
        shared.ensure_connected()?;

        lock(&shared.find_prefixes).push(prefix.to_string());
        tracing::debug!("{} looking for names with prefix {}", shared.unique_name, prefix);

        for (name, transports) in shared.network.advertisements_excluding(&shared.unique_name) {
            shared.notify_advertised(&name, transports);
        }
        Ok(())
    }
}

impl BusShared {
    fn on_own_dispatcher(&self) -> bool {
        DISPATCHING_FOR.with(|current| current.get()) == Some(self.id)
    }

    fn ensure_blocking_allowed(&self) -> Result<(), StatusCode> {
        if self.on_own_dispatcher() && !CONCURRENT_CALLBACKS.with(|enabled| enabled.get()) {
            tracing::warn!(
                "{}: blocking call from dispatch thread without concurrent callbacks",
                self.unique_name
            );
            return Err(StatusCode::BlockingCallNotAllowed);
        }
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), StatusCode> {
        let lifecycle = lock(&self.lifecycle);
        match (&lifecycle.dispatch_tx, &lifecycle.address) {
            (None, _) => Err(StatusCode::NotStarted),
            (Some(_), None) => Err(StatusCode::NotConnected),
            (Some(_), Some(_)) => Ok(()),
        }
    }

    fn listener(&self) -> Option<Arc<dyn BusListener>> {
        read(&self.listener).clone()
    }

    /// Queue an event for this bus's dispatch thread; dropped when not started
    pub(crate) fn dispatch(&self, event: DispatchEvent) {
        if let Some(tx) = &lock(&self.lifecycle).dispatch_tx {
            let _ = tx.send(event);
        }
    }

    /// Prefix this bus asked for that matches `name`, if discovery is on
    fn watched_prefix(&self, name: &str) -> Option<String> {
        if !self.discovery_enabled {
            return None;
        }
        lock(&self.find_prefixes)
            .iter()
            .find(|prefix| name.starts_with(prefix.as_str()))
            .cloned()
    }

    /// Report `name` if this bus is looking for it
    fn notify_advertised(&self, name: &str, transports: TransportMask) {
        if let Some(prefix) = self.watched_prefix(name) {
            self.dispatch(DispatchEvent::FoundAdvertisedName {
                name: name.to_string(),
                transport: transports,
                prefix,
            });
        }
    }

    /// Report that `name` is no longer advertised
    pub(crate) fn notify_lost(&self, name: &str, transports: TransportMask) {
        if let Some(prefix) = self.watched_prefix(name) {
            self.dispatch(DispatchEvent::LostAdvertisedName {
                name: name.to_string(),
                transport: transports,
                prefix,
            });
        }
    }

    /// Forget a joined session and tell the listener it joined with
    fn end_session(&self, id: SessionId) {
        if let Some((_, Some(listener))) = self.joined_sessions.remove(&id) {
            listener.session_lost(id);
        }
    }
}

/// Deliver queued events to the listener until shutdown
fn run_dispatcher(bus: Weak<BusShared>, id: u64, mut rx: mpsc::UnboundedReceiver<DispatchEvent>) {
    DISPATCHING_FOR.with(|current| current.set(Some(id)));

    while let Some(event) = rx.blocking_recv() {
        let Some(bus) = bus.upgrade() else {
            break;
        };

        CONCURRENT_CALLBACKS.with(|enabled| enabled.set(false));
        match (event, bus.listener()) {
            (DispatchEvent::Shutdown, _) => break,
            (DispatchEvent::SessionLost { id }, _) => bus.end_session(id),
            (_, None) => continue,
            (
                DispatchEvent::FoundAdvertisedName {
                    name,
                    transport,
                    prefix,
                },
                Some(listener),
            ) => listener.found_advertised_name(&name, transport, &prefix),
            (
                DispatchEvent::LostAdvertisedName {
                    name,
                    transport,
                    prefix,
                },
                Some(listener),
            ) => listener.lost_advertised_name(&name, transport, &prefix),
            (
                DispatchEvent::NameOwnerChanged {
                    name,
                    previous_owner,
                    new_owner,
                },
                Some(listener),
            ) => listener.name_owner_changed(&name, previous_owner.as_deref(), new_owner.as_deref()),
        }
    }

    tracing::trace!("Dispatcher for bus {} exiting", id);
}

impl BusRuntime for LoopbackBus {
    fn start(&self) -> Result<(), StatusCode> {
        let shared = &self.shared;
        let mut lifecycle = lock(&shared.lifecycle);
        match (&lifecycle.dispatch_tx, &lifecycle.dispatcher) {
            (Some(_), _) => return Err(StatusCode::AlreadyStarted),
            // Stopped, but the old dispatcher has not been joined yet
            (None, Some(_)) => return Err(StatusCode::Stopping),
            (None, None) => {}
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(shared);
        let id = shared.id;
        let dispatcher = std::thread::Builder::new()
            .name(format!("bm-dispatch-{}", id))
            .spawn(move || run_dispatcher(weak, id, rx))
            .map_err(|e| {
                tracing::error!("Failed to spawn dispatch thread: {}", e);
                StatusCode::Fail
            })?;

        lifecycle.dispatch_tx = Some(tx);
        lifecycle.dispatcher = Some(dispatcher);
        tracing::debug!("{} ({}) started", shared.unique_name, shared.application_name);
        Ok(())
    }

    fn connect(&self, address: &str) -> Result<(), StatusCode> {
        let shared = &self.shared;
        {
            let mut lifecycle = lock(&shared.lifecycle);
            if lifecycle.dispatch_tx.is_none() {
                return Err(StatusCode::NotStarted);
            }
            if lifecycle.address.is_some() {
                return Ok(());
            }
            if !ADDRESS_SCHEMES.iter().any(|scheme| address.starts_with(scheme)) {
                return Err(StatusCode::BadAddress);
            }
            lifecycle.address = Some(address.to_string());
        }

        shared
            .network
            .attach(&shared.unique_name, Arc::downgrade(shared));
        tracing::debug!("{} connected to {}", shared.unique_name, address);
        Ok(())
    }

    fn stop(&self) -> Result<(), StatusCode> {
        let shared = &self.shared;
        {
            let mut lifecycle = lock(&shared.lifecycle);
            let Some(tx) = lifecycle.dispatch_tx.take() else {
                return Ok(());
            };
            let _ = tx.send(DispatchEvent::Shutdown);
            lifecycle.address = None;
        }

        shared.network.detach(&shared.unique_name);
        shared.ports.clear();
        shared.joined_sessions.clear();
        Ok(())
    }

    fn join(&self) -> Result<(), StatusCode> {
        let shared = &self.shared;
        if shared.on_own_dispatcher() {
            return Err(StatusCode::JoinFailed);
        }

        let dispatcher = lock(&shared.lifecycle).dispatcher.take();
        match dispatcher {
            Some(handle) => handle.join().map_err(|_| StatusCode::JoinFailed),
            None => Ok(()),
        }
    }

    fn register_bus_object(&self, object: Arc<dyn BusObject>) -> Result<(), StatusCode> {
        match self.shared.objects.entry(object.path().to_string()) {
            Entry::Occupied(_) => Err(StatusCode::ObjectAlreadyRegistered),
            Entry::Vacant(slot) => {
                slot.insert(object);
                Ok(())
            }
        }
    }

    fn register_bus_listener(&self, listener: Arc<dyn BusListener>) {
        *write(&self.shared.listener) = Some(listener);
    }

    fn request_name(&self, name: &str, flags: NameFlags) -> Result<(), StatusCode> {
        let shared = &self.shared;
        shared.ensure_blocking_allowed()?;
        shared.ensure_connected()?;

        match shared.network.claim_name(name, &shared.unique_name) {
            Ok(true) => {
                shared
                    .network
                    .broadcast(|| DispatchEvent::NameOwnerChanged {
                        name: name.to_string(),
                        previous_owner: None,
                        new_owner: Some(shared.unique_name.clone()),
                    });
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(owner) => {
                tracing::debug!("{} is owned by {}", name, owner);
                if flags.contains(NameFlags::DO_NOT_QUEUE) {
                    Err(StatusCode::NameExists)
                } else {
                    Err(StatusCode::NameInQueue)
                }
            }
        }
    }

    fn bind_session_port(
        &self,
        port: SessionPort,
        opts: &SessionOpts,
        listener: Arc<dyn SessionPortListener>,
    ) -> Result<(), StatusCode> {
        let shared = &self.shared;
        shared.ensure_blocking_allowed()?;
        shared.ensure_connected()?;
        if !port.is_valid() {
            return Err(StatusCode::Fail);
        }

        match shared.ports.entry(port) {
            Entry::Occupied(_) => Err(StatusCode::PortAlreadyBound),
            Entry::Vacant(slot) => {
                slot.insert(BoundPort {
                    opts: *opts,
                    listener,
                });
                Ok(())
            }
        }
    }

    fn advertise_name(&self, name: &str, transports: TransportMask) -> Result<(), StatusCode> {
        let shared = &self.shared;
        shared.ensure_blocking_allowed()?;
        shared.ensure_connected()?;

        shared.network.advertise(name, &shared.unique_name, transports);
        for peer in shared.network.connected_buses() {
            if peer.id != shared.id {
                peer.notify_advertised(name, transports);
            }
        }
        Ok(())
    }

    fn join_session(
        &self,
        name: &str,
        port: SessionPort,
        listener: Option<Arc<dyn SessionListener>>,
        opts: &SessionOpts,
    ) -> Result<SessionId, StatusCode> {
        let shared = &self.shared;
        shared.ensure_blocking_allowed()?;
        shared.ensure_connected()?;

        let host = shared
            .network
            .host_of(name)
            .and_then(|unique| shared.network.lookup(&unique))
            .ok_or(StatusCode::NoSuchName)?;

        let (bound_opts, host_listener) = host
            .ports
            .get(&port)
            .map(|bound| (bound.opts, Arc::clone(&bound.listener)))
            .ok_or(StatusCode::NoSuchPort)?;

        if bound_opts.traffic != opts.traffic
            || !bound_opts.transports.intersects(opts.transports)
        {
            return Err(StatusCode::SessionRejected);
        }
        if !host_listener.accept_session_joiner(port, &shared.unique_name, opts) {
            return Err(StatusCode::SessionRejected);
        }

        let id = shared
            .network
            .open_session(&host.unique_name, &shared.unique_name);
        shared.joined_sessions.insert(id, listener);
        host_listener.session_joined(port, id, &shared.unique_name);
        Ok(id)
    }

    fn enable_concurrent_callbacks(&self) {
        if self.shared.on_own_dispatcher() {
            CONCURRENT_CALLBACKS.with(|enabled| enabled.set(true));
        }
    }
}

impl Drop for LoopbackBus {
    fn drop(&mut self) {
        let _ = self.stop();
        if !self.shared.on_own_dispatcher() {
            let _ = self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    struct AcceptAll;

    impl SessionPortListener for AcceptAll {
        fn accept_session_joiner(&self, _: SessionPort, _: &str, _: &SessionOpts) -> bool {
            true
        }
    }

    struct RejectAll;

    impl SessionPortListener for RejectAll {
        fn accept_session_joiner(&self, _: SessionPort, _: &str, _: &SessionOpts) -> bool {
            false
        }
    }

    fn connected_bus(network: &LoopbackNetwork, discovery: bool) -> LoopbackBus {
        let bus = LoopbackBus::new(network, "test", discovery);
        bus.start().unwrap();
        bus.connect("null:").unwrap();
        bus
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_connect_requires_start() {
        let network = LoopbackNetwork::new();
        let bus = LoopbackBus::new(&network, "test", true);
        assert_eq!(bus.connect("null:"), Err(StatusCode::NotStarted));

        bus.start().unwrap();
        assert_eq!(bus.start(), Err(StatusCode::AlreadyStarted));
        assert_eq!(bus.connect("carrier-pigeon:"), Err(StatusCode::BadAddress));
        bus.connect("unix:abstract=alljoyn").unwrap();
        assert!(bus.is_connected());
        assert_eq!(network.bus_count(), 1);
    }

    #[test]
    fn test_restart_before_join_is_stopping() {
        let network = LoopbackNetwork::new();
        let bus = connected_bus(&network, true);

        bus.stop().unwrap();
        assert_eq!(bus.start(), Err(StatusCode::Stopping));

        bus.join().unwrap();
        bus.start().unwrap();
    }

    #[test]
    fn test_name_calls_require_connection() {
        let network = LoopbackNetwork::new();
        let bus = LoopbackBus::new(&network, "test", true);
        bus.start().unwrap();

        assert_eq!(
            bus.request_name("org.example.svc", NameFlags::DO_NOT_QUEUE),
            Err(StatusCode::NotConnected)
        );
        assert_eq!(
            bus.advertise_name("org.example.svc", TransportMask::ANY),
            Err(StatusCode::NotConnected)
        );
    }

    #[test]
    fn test_request_name_without_queueing() {
        let network = LoopbackNetwork::new();
        let first = connected_bus(&network, true);
        let second = connected_bus(&network, true);

        first
            .request_name("org.example.svc", NameFlags::DO_NOT_QUEUE)
            .unwrap();
        // Asking again for a name we own is fine
        first
            .request_name("org.example.svc", NameFlags::DO_NOT_QUEUE)
            .unwrap();
        assert_eq!(
            second.request_name("org.example.svc", NameFlags::DO_NOT_QUEUE),
            Err(StatusCode::NameExists)
        );
        assert_eq!(
            second.request_name("org.example.svc", NameFlags::NONE),
            Err(StatusCode::NameInQueue)
        );
        assert_eq!(
            network.name_owner("org.example.svc").as_deref(),
            Some(first.unique_name())
        );
    }

    #[test]
    fn test_stop_releases_names() {
        let network = LoopbackNetwork::new();
        let first = connected_bus(&network, true);
        let second = connected_bus(&network, true);

        first
            .request_name("org.example.svc", NameFlags::DO_NOT_QUEUE)
            .unwrap();
        first
            .advertise_name("org.example.svc", TransportMask::ANY)
            .unwrap();
        first.stop().unwrap();
        first.join().unwrap();

        assert!(!network.is_advertised("org.example.svc"));
        assert!(network.name_owner("org.example.svc").is_none());
        second
            .request_name("org.example.svc", NameFlags::DO_NOT_QUEUE)
            .unwrap();
    }

    #[test]
    fn test_bind_port_twice_fails() {
        let network = LoopbackNetwork::new();
        let bus = connected_bus(&network, true);
        let opts = SessionOpts::multipoint_messages();

        bus.bind_session_port(SessionPort::DEFAULT, &opts, Arc::new(AcceptAll))
            .unwrap();
        assert_eq!(
            bus.bind_session_port(SessionPort::DEFAULT, &opts, Arc::new(AcceptAll)),
            Err(StatusCode::PortAlreadyBound)
        );
    }

    #[test]
    fn test_join_session_checks_host() {
        let network = LoopbackNetwork::new();
        let host = connected_bus(&network, true);
        let joiner = connected_bus(&network, true);
        let opts = SessionOpts::multipoint_messages();

        assert_eq!(
            joiner.join_session("org.example.svc", SessionPort::DEFAULT, None, &opts),
            Err(StatusCode::NoSuchName)
        );

        host.request_name("org.example.svc", NameFlags::DO_NOT_QUEUE)
            .unwrap();
        assert_eq!(
            joiner.join_session("org.example.svc", SessionPort::DEFAULT, None, &opts),
            Err(StatusCode::NoSuchPort)
        );

        host.bind_session_port(SessionPort::DEFAULT, &opts, Arc::new(AcceptAll))
            .unwrap();
        let id = joiner
            .join_session("org.example.svc", SessionPort::DEFAULT, None, &opts)
            .unwrap();
        assert_ne!(id, SessionId::NONE);
        assert_eq!(joiner.joined_sessions(), vec![id]);
    }

    #[test]
    fn test_join_session_rejected() {
        let network = LoopbackNetwork::new();
        let host = connected_bus(&network, true);
        let joiner = connected_bus(&network, true);
        let opts = SessionOpts::multipoint_messages();

        host.request_name("org.example.svc", NameFlags::DO_NOT_QUEUE)
            .unwrap();
        host.bind_session_port(SessionPort::DEFAULT, &opts, Arc::new(RejectAll))
            .unwrap();

        assert_eq!(
            joiner.join_session("org.example.svc", SessionPort::DEFAULT, None, &opts),
            Err(StatusCode::SessionRejected)
        );
        assert!(joiner.joined_sessions().is_empty());
    }

    #[test]
    fn test_register_object_once_per_path() {
        struct Obj;
        impl BusObject for Obj {
            fn path(&self) -> &str {
                "/org/example/obj"
            }
        }

        let network = LoopbackNetwork::new();
        let bus = LoopbackBus::new(&network, "test", false);
        bus.register_bus_object(Arc::new(Obj)).unwrap();
        assert_eq!(
            bus.register_bus_object(Arc::new(Obj)),
            Err(StatusCode::ObjectAlreadyRegistered)
        );
    }

    #[derive(Default)]
    struct SessionWatcher {
        lost: Mutex<Vec<SessionId>>,
    }

    impl SessionListener for SessionWatcher {
        fn session_lost(&self, id: SessionId) {
            lock(&self.lost).push(id);
        }
    }

    #[test]
    fn test_host_leaving_ends_joined_sessions() {
        let network = LoopbackNetwork::new();
        let host = connected_bus(&network, true);
        let joiner = connected_bus(&network, true);
        let opts = SessionOpts::multipoint_messages();
        host.request_name("org.example.svc", NameFlags::DO_NOT_QUEUE)
            .unwrap();
        host.bind_session_port(SessionPort::DEFAULT, &opts, Arc::new(AcceptAll))
            .unwrap();

        let watcher = Arc::new(SessionWatcher::default());
        let id = joiner
            .join_session(
                "org.example.svc",
                SessionPort::DEFAULT,
                Some(watcher.clone() as Arc<dyn SessionListener>),
                &opts,
            )
            .unwrap();
        assert_eq!(network.session_count(), 1);

        host.stop().unwrap();
        host.join().unwrap();

        assert!(wait_until(|| !lock(&watcher.lost).is_empty()));
        assert_eq!(*lock(&watcher.lost), vec![id]);
        assert!(joiner.joined_sessions().is_empty());
        assert_eq!(network.session_count(), 0);
    }

    #[test]
    fn test_joiner_leaving_closes_session_quietly() {
        let network = LoopbackNetwork::new();
        let host = connected_bus(&network, true);
        let joiner = connected_bus(&network, true);
        let opts = SessionOpts::multipoint_messages();
        host.request_name("org.example.svc", NameFlags::DO_NOT_QUEUE)
            .unwrap();
        host.bind_session_port(SessionPort::DEFAULT, &opts, Arc::new(AcceptAll))
            .unwrap();
        joiner
            .join_session("org.example.svc", SessionPort::DEFAULT, None, &opts)
            .unwrap();

        joiner.stop().unwrap();
        joiner.join().unwrap();

        assert!(joiner.joined_sessions().is_empty());
        assert_eq!(network.session_count(), 0);
    }

    #[derive(Default)]
    struct LostNames {
        names: Mutex<Vec<(String, String)>>,
    }

    impl BusListener for LostNames {
        fn lost_advertised_name(&self, name: &str, _: TransportMask, prefix: &str) {
            lock(&self.names).push((name.to_string(), prefix.to_string()));
        }
    }

    #[test]
    fn test_retracted_advertisement_is_reported_lost() {
        let network = LoopbackNetwork::new();
        let host = connected_bus(&network, true);
        let watcher = connected_bus(&network, true);
        let bystander = connected_bus(&network, false);

        let watching = Arc::new(LostNames::default());
        watcher.register_bus_listener(watching.clone());
        watcher.find_advertised_name("org.example").unwrap();
        let ignoring = Arc::new(LostNames::default());
        bystander.register_bus_listener(ignoring.clone());
        bystander.find_advertised_name("org.example").unwrap();

        host.advertise_name("org.example.svc", TransportMask::ANY)
            .unwrap();
        host.stop().unwrap();

        assert!(wait_until(|| !lock(&watching.names).is_empty()));
        assert_eq!(
            *lock(&watching.names),
            vec![("org.example.svc".to_string(), "org.example".to_string())]
        );
        std::thread::sleep(Duration::from_millis(50));
        assert!(lock(&ignoring.names).is_empty());
    }

    /// Joins the discovered session from inside the callback
    struct ImpatientListener {
        bus: Option<Weak<LoopbackBus>>,
        result: Mutex<Option<Result<SessionId, StatusCode>>>,
        announce: bool,
        done: AtomicBool,
    }

    impl BusListener for ImpatientListener {
        fn found_advertised_name(&self, name: &str, _: TransportMask, _: &str) {
            if let Some(bus) = self.bus.as_ref().and_then(Weak::upgrade) {
                if self.announce {
                    bus.enable_concurrent_callbacks();
                }
                let result = bus.join_session(
                    name,
                    SessionPort::DEFAULT,
                    None,
                    &SessionOpts::multipoint_messages(),
                );
                *lock(&self.result) = Some(result);
            }
            self.done.store(true, Ordering::SeqCst);
        }
    }

    fn join_from_callback(announce: bool) -> Result<SessionId, StatusCode> {
        let network = LoopbackNetwork::new();
        let host = connected_bus(&network, true);
        let opts = SessionOpts::multipoint_messages();
        host.request_name("org.example.svc", NameFlags::DO_NOT_QUEUE)
            .unwrap();
        host.bind_session_port(SessionPort::DEFAULT, &opts, Arc::new(AcceptAll))
            .unwrap();
        host.advertise_name("org.example.svc", TransportMask::ANY)
            .unwrap();

        let client = Arc::new(connected_bus(&network, true));
        let listener = Arc::new(ImpatientListener {
            bus: Some(Arc::downgrade(&client)),
            result: Mutex::new(None),
            announce,
            done: AtomicBool::new(false),
        });
        client.register_bus_listener(listener.clone());
        client.find_advertised_name("org.example").unwrap();

        assert!(wait_until(|| listener.done.load(Ordering::SeqCst)));
        let result = lock(&listener.result).take();
        result.unwrap()
    }

    #[test]
    fn test_blocking_call_from_callback_needs_announcement() {
        assert_eq!(
            join_from_callback(false),
            Err(StatusCode::BlockingCallNotAllowed)
        );
        assert!(join_from_callback(true).is_ok());
    }

    #[test]
    fn test_discovery_disabled_bus_is_not_notified() {
        let network = LoopbackNetwork::new();
        let host = connected_bus(&network, true);
        let client = connected_bus(&network, false);
        let listener = Arc::new(ImpatientListener {
            bus: None,
            result: Mutex::new(None),
            announce: true,
            done: AtomicBool::new(false),
        });
        client.register_bus_listener(listener.clone());
        client.find_advertised_name("org.example").unwrap();

        host.advertise_name("org.example.svc", TransportMask::ANY)
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!listener.done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_join_from_own_dispatcher_fails() {
        struct Joiner {
            bus: Weak<LoopbackBus>,
            result: Mutex<Option<Result<(), StatusCode>>>,
        }

        impl BusListener for Joiner {
            fn name_owner_changed(&self, _: &str, _: Option<&str>, _: Option<&str>) {
                if let Some(bus) = self.bus.upgrade() {
                    *lock(&self.result) = Some(bus.join());
                }
            }
        }

        let network = LoopbackNetwork::new();
        let bus = Arc::new(connected_bus(&network, true));
        let listener = Arc::new(Joiner {
            bus: Arc::downgrade(&bus),
            result: Mutex::new(None),
        });
        bus.register_bus_listener(listener.clone());
        bus.request_name("org.example.svc", NameFlags::DO_NOT_QUEUE)
            .unwrap();

        assert!(wait_until(|| lock(&listener.result).is_some()));
        assert_eq!(
            lock(&listener.result).take(),
            Some(Err(StatusCode::JoinFailed))
        );
    }
}
