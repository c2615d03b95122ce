//! Bus connection lifecycle
//!
//! [`ConnectionManager`] owns one bus runtime handle and the
//! [`SessionNegotiator`] registered with it, and walks them through
//!
//! ```text
//! Created -> Started -> ServiceAdvertised -> Stopped -> Deleted
//! ```
//!
//! Setup is sequential and not atomic: when `start_service` fails part-way,
//! the steps that already succeeded (a requested name, a bound port) are left
//! in place. Deleting requires a successful stop; when stopping fails the
//! handles are kept rather than released while dispatch threads may still be
//! using them.

use std::sync::Arc;

use bm_core::config::BusConfig;
use bm_core::traits::{BusObject, BusRuntime};
use bm_core::{BusError, ConnectionState, NameFlags, SessionOpts, StatusCode};

use crate::negotiator::SessionNegotiator;

/// Manages the lifecycle of one bus connection and its advertised presence
pub struct ConnectionManager<B: BusRuntime + 'static> {
    /// Application identity the bus was created with
    application_name: String,
    /// Name the negotiator was bound with
    well_known_name: String,
    /// Whether the bus was created with discovery enabled
    discovery_enabled: bool,
    /// Connection configuration
    config: BusConfig,
    /// Bus runtime handle, `None` once deleted
    bus: Option<Arc<B>>,
    /// Registered listener, `None` once deleted
    negotiator: Option<Arc<SessionNegotiator<B>>>,
    /// Lifecycle state
    state: ConnectionState,
}

impl<B: BusRuntime + 'static> ConnectionManager<B> {
    /// Create an unconnected manager.
    ///
    /// `make_bus` builds the runtime handle from the application name and the
    /// discovery flag. No bus calls are made until a start method runs.
    pub fn create<F>(
        application_name: &str,
        well_known_name: &str,
        enable_discovery: bool,
        config: BusConfig,
        make_bus: F,
    ) -> Self
    where
        F: FnOnce(&str, bool) -> B,
    {
        let bus = Arc::new(make_bus(application_name, enable_discovery));
        let negotiator = SessionNegotiator::new(&bus, well_known_name, config.session_port);

        Self {
            application_name: application_name.to_string(),
            well_known_name: well_known_name.to_string(),
            discovery_enabled: enable_discovery,
            config,
            bus: Some(bus),
            negotiator: Some(negotiator),
            state: ConnectionState::Created,
        }
    }

    /// Application identity
    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// Well-known name the listener is bound with
    pub fn well_known_name(&self) -> &str {
        &self.well_known_name
    }

    /// Whether discovery was enabled at creation
    pub fn discovery_enabled(&self) -> bool {
        self.discovery_enabled
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connection configuration
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// The bus runtime handle
    pub fn bus(&self) -> Result<&Arc<B>, BusError> {
        self.bus
            .as_ref()
            .ok_or(BusError::UseAfterTeardown { operation: "bus" })
    }

    /// The registered listener, e.g. to read the active session id
    pub fn negotiator(&self) -> Result<&Arc<SessionNegotiator<B>>, BusError> {
        self.negotiator
            .as_ref()
            .ok_or(BusError::UseAfterTeardown {
                operation: "negotiator",
            })
    }

    /// Expose `object` on the bus
    pub fn register_bus_object(&self, object: Arc<dyn BusObject>) -> Result<(), BusError> {
        let (bus, _) = self.live("register_bus_object")?;
        let path = object.path().to_string();

        bus.register_bus_object(object).map_err(|status| {
            tracing::error!("RegisterBusObject({}) failed ({})", path, status);
            BusError::RegisterObject { path, status }
        })
    }

    /// Start the bus machinery and connect it.
    ///
    /// The configuration is validated first. The address comes from
    /// `BUS_ADDRESS`, then the configuration, then the platform default. The negotiator is registered only once the bus has
    /// started. After a failure the manager should be recreated rather than
    /// started again.
    pub fn start_client(&mut self) -> Result<(), BusError> {
        let (bus, negotiator) = self.live("start_client")?;
        self.expect_state("start_client", ConnectionState::Created)?;
        self.config.validate()?;

        let address = self.config.resolve_bus_address();

        bus.start().map_err(|status| {
            tracing::error!("Bus start failed ({})", status);
            BusError::Connection {
                address: address.clone(),
                status,
            }
        })?;

        bus.register_bus_listener(negotiator);

        bus.connect(&address).map_err(|status| {
            tracing::error!("Failed to connect to \"{}\" ({})", address, status);
            BusError::Connection {
                address: address.clone(),
                status,
            }
        })?;

        tracing::info!("{} connected to bus at \"{}\"", self.application_name, address);
        self.state = ConnectionState::Started;
        Ok(())
    }

    /// Start the bus and publish `advertised_name` as a service.
    ///
    /// Requests the name without queuing, binds the session port and
    /// advertises the name. Each step runs only if the previous one
    /// succeeded; the first failure is returned and nothing is rolled back.
    pub fn start_service(&mut self, advertised_name: &str) -> Result<(), BusError> {
        self.start_client()?;
        let (bus, negotiator) = self.live("start_service")?;

        bus.request_name(advertised_name, NameFlags::DO_NOT_QUEUE).map_err(|status| {
            tracing::error!("RequestName({}) failed ({})", advertised_name, status);
            let name = advertised_name.to_string();
            match status {
                StatusCode::NameExists => BusError::NameTaken { name, status },
                _ => BusError::RequestName { name, status },
            }
        })?;

        let opts = SessionOpts::multipoint_messages();
        let port = self.config.session_port;
        bus.bind_session_port(port, &opts, negotiator).map_err(|status| {
            tracing::error!("BindSessionPort({}) failed ({})", port, status);
            BusError::SessionPortBind { port, status }
        })?;

        bus.advertise_name(advertised_name, opts.transports).map_err(|status| {
            tracing::error!("Failed to advertise name {} ({})", advertised_name, status);
            BusError::Advertise {
                name: advertised_name.to_string(),
                status,
            }
        })?;

        tracing::info!("Advertising {} on session port {}", advertised_name, port);
        self.state = ConnectionState::ServiceAdvertised;
        Ok(())
    }

    /// Stop the bus machinery and block until its workers have quiesced.
    ///
    /// Nothing is released on failure; the caller may retry.
    pub fn stop(&mut self) -> Result<(), BusError> {
        let (bus, _) = self.live("stop")?;

        bus.stop().map_err(|status| {
            tracing::error!("Bus stop failed ({})", status);
            BusError::Stop { status }
        })?;

        // Blocks until all dispatch threads have completed
        bus.join().map_err(|status| {
            tracing::error!("Bus join failed ({})", status);
            BusError::Stop { status }
        })?;

        tracing::debug!("{} stopped", self.application_name);
        self.state = ConnectionState::Stopped;
        Ok(())
    }

    /// Stop, then release the bus handle and the listener.
    ///
    /// If stopping fails, both handles are kept and the manager stays
    /// usable for another attempt.
    pub fn delete(&mut self) -> Result<(), BusError> {
        if let Err(e) = self.stop() {
            if self.state != ConnectionState::Deleted {
                tracing::error!(
                    "Not releasing bus resources of {}: {}",
                    self.application_name,
                    e
                );
            }
            return Err(match e {
                BusError::UseAfterTeardown { .. } => BusError::UseAfterTeardown {
                    operation: "delete",
                },
                other => other,
            });
        }

        self.negotiator = None;
        self.bus = None;
        self.state = ConnectionState::Deleted;
        tracing::debug!("{} deleted", self.application_name);
        Ok(())
    }

    /// Clone both handles, failing once they have been released
    #[allow(clippy::type_complexity)]
    fn live(
        &self,
        operation: &'static str,
    ) -> Result<(Arc<B>, Arc<SessionNegotiator<B>>), BusError> {
        match (&self.bus, &self.negotiator) {
            (Some(bus), Some(negotiator)) => Ok((Arc::clone(bus), Arc::clone(negotiator))),
            _ => Err(BusError::UseAfterTeardown { operation }),
        }
    }

    fn expect_state(
        &self,
        operation: &'static str,
        expected: ConnectionState,
    ) -> Result<(), BusError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(BusError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

impl<B: BusRuntime + 'static> Drop for ConnectionManager<B> {
    fn drop(&mut self) {
        if self.state != ConnectionState::Deleted {
            tracing::debug!(
                "{} dropped in state {} without delete",
                self.application_name,
                self.state
            );
        }
    }
}
