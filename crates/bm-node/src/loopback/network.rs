//! Shared registry of loopback buses

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use bm_core::{SessionId, TransportMask};

use super::bus::BusShared;
use super::DispatchEvent;

/// Registry shared by every [`LoopbackBus`](super::LoopbackBus) attached to it
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

/// Unique names of the two ends of a session
struct SessionRecord {
    host: String,
    joiner: String,
}

#[derive(Default)]
struct NetworkInner {
    /// Connected buses indexed by unique name
    buses: DashMap<String, Weak<BusShared>>,
    /// Well-known name -> unique name of its owner
    owners: DashMap<String, String>,
    /// Advertised name -> advertiser's unique name and transports
    advertisements: DashMap<String, (String, TransportMask)>,
    /// Live sessions by id
    sessions: DashMap<SessionId, SessionRecord>,
    /// Counter behind unique names
    next_bus: AtomicU64,
}

impl LoopbackNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connected buses
    pub fn bus_count(&self) -> usize {
        self.inner.buses.len()
    }

    /// Unique name of the owner of `name`
    pub fn name_owner(&self, name: &str) -> Option<String> {
        self.inner.owners.get(name).map(|owner| owner.clone())
    }

    /// Whether `name` is currently advertised
    pub fn is_advertised(&self, name: &str) -> bool {
        self.inner.advertisements.contains_key(name)
    }

    /// Number of sessions still open
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Allocate a bus id and its unique name
    pub(crate) fn allocate_unique_name(&self) -> (u64, String) {
        let id = self.inner.next_bus.fetch_add(1, Ordering::Relaxed) + 1;
        (id, format!(":1.{}", id))
    }

    pub(crate) fn attach(&self, unique_name: &str, bus: Weak<BusShared>) {
        self.inner.buses.insert(unique_name.to_string(), bus);
    }

    /// Remove a bus and release everything it owned or advertised
    pub(crate) fn detach(&self, unique_name: &str) {
        if self.inner.buses.remove(unique_name).is_none() {
            return;
        }

        let released: Vec<String> = self
            .inner
            .owners
            .iter()
            .filter(|entry| entry.value() == unique_name)
            .map(|entry| entry.key().clone())
            .collect();
        for name in &released {
            self.inner.owners.remove(name);
        }

        let retracted: Vec<(String, TransportMask)> = self
            .inner
            .advertisements
            .iter()
            .filter(|entry| entry.value().0 == unique_name)
            .map(|entry| (entry.key().clone(), entry.value().1))
            .collect();
        for (name, _) in &retracted {
            self.inner.advertisements.remove(name);
        }

        let ended: Vec<SessionId> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.host == unique_name || entry.joiner == unique_name)
            .map(|entry| *entry.key())
            .collect();
        let ended: Vec<(SessionId, SessionRecord)> = ended
            .into_iter()
            .filter_map(|id| self.inner.sessions.remove(&id))
            .collect();

        for name in released {
            self.broadcast(|| DispatchEvent::NameOwnerChanged {
                name: name.clone(),
                previous_owner: Some(unique_name.to_string()),
                new_owner: None,
            });
        }

        // Joiners of a departing host lose their session
        for (id, record) in ended {
            if record.host != unique_name {
                continue;
            }
            if let Some(joiner) = self.lookup(&record.joiner) {
                joiner.dispatch(DispatchEvent::SessionLost { id });
            }
        }

        for bus in self.connected_buses() {
            for (name, transports) in &retracted {
                bus.notify_lost(name, *transports);
            }
        }
    }

    pub(crate) fn lookup(&self, unique_name: &str) -> Option<Arc<BusShared>> {
        self.inner
            .buses
            .get(unique_name)
            .and_then(|bus| bus.upgrade())
    }

    pub(crate) fn connected_buses(&self) -> Vec<Arc<BusShared>> {
        self.inner
            .buses
            .iter()
            .filter_map(|bus| bus.value().upgrade())
            .collect()
    }

    /// Claim `name` for `unique_name`.
    ///
    /// Returns the current owner when someone else holds it.
    pub(crate) fn claim_name(&self, name: &str, unique_name: &str) -> Result<bool, String> {
        use dashmap::mapref::entry::Entry;

        match self.inner.owners.entry(name.to_string()) {
            Entry::Occupied(owner) if owner.get() == unique_name => Ok(false),
            Entry::Occupied(owner) => Err(owner.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(unique_name.to_string());
                Ok(true)
            }
        }
    }

    pub(crate) fn advertise(&self, name: &str, unique_name: &str, transports: TransportMask) {
        self.inner
            .advertisements
            .insert(name.to_string(), (unique_name.to_string(), transports));
    }

    /// Advertisements by buses other than `unique_name`
    pub(crate) fn advertisements_excluding(&self, unique_name: &str) -> Vec<(String, TransportMask)> {
        self.inner
            .advertisements
            .iter()
            .filter(|entry| entry.value().0 != unique_name)
            .map(|entry| (entry.key().clone(), entry.value().1))
            .collect()
    }

    /// Unique name of whoever owns or advertises `name`
    pub(crate) fn host_of(&self, name: &str) -> Option<String> {
        self.name_owner(name).or_else(|| {
            self.inner
                .advertisements
                .get(name)
                .map(|entry| entry.value().0.clone())
        })
    }

    /// Hand out a fresh, non-zero id for a session between `host` and `joiner`
    pub(crate) fn open_session(&self, host: &str, joiner: &str) -> SessionId {
        use dashmap::mapref::entry::Entry;

        loop {
            let id = SessionId::new(rand::random::<u32>());
            if id == SessionId::NONE {
                continue;
            }
            if let Entry::Vacant(slot) = self.inner.sessions.entry(id) {
                slot.insert(SessionRecord {
                    host: host.to_string(),
                    joiner: joiner.to_string(),
                });
                return id;
            }
        }
    }


    /// Send an event to every connected bus
    pub(crate) fn broadcast<F>(&self, event: F)
    where
        F: Fn() -> DispatchEvent,
    {
        for bus in self.connected_buses() {
            bus.dispatch(event());
        }
    }
}
