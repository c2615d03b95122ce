//! Bus connection configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;
use crate::error::ConfigError;
use crate::types::SessionPort;

/// Environment variable that overrides the bus address
pub const BUS_ADDRESS_ENV: &str = "BUS_ADDRESS";

/// Platform default bus address
#[cfg(unix)]
pub fn default_bus_address() -> &'static str {
    "unix:abstract=alljoyn"
}

/// Platform default bus address
#[cfg(not(unix))]
pub fn default_bus_address() -> &'static str {
    "tcp:addr=127.0.0.1,port=9955"
}

/// Configuration for a managed bus connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Address to connect to when `BUS_ADDRESS` is not set.
    ///
    /// Falls back to the platform default when neither is present.
    pub bus_address: Option<String>,

    /// Session port bound by services and joined by clients.
    ///
    /// Every peer of a deployment must agree on this value.
    pub session_port: SessionPort,

    /// How often the interrupt latch is polled while waiting for shutdown
    #[serde(with = "duration_millis")]
    pub interrupt_poll_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus_address: None,
            session_port: SessionPort::DEFAULT,
            interrupt_poll_interval: Duration::from_millis(100),
        }
    }
}

impl BusConfig {
    /// Check values that serde alone cannot constrain
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.session_port.is_valid() {
            return Err(ConfigError::Invalid(
                "session_port must be in range 1..=65535".to_string(),
            ));
        }
        if self.interrupt_poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "interrupt_poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the address to connect to from the process environment
    pub fn resolve_bus_address(&self) -> String {
        self.resolve_bus_address_with(std::env::var(BUS_ADDRESS_ENV).ok())
    }

    /// Resolve the address given an explicit environment override
    pub fn resolve_bus_address_with(&self, env_override: Option<String>) -> String {
        env_override
            .filter(|addr| !addr.is_empty())
            .or_else(|| self.bus_address.clone())
            .unwrap_or_else(|| default_bus_address().to_string())
    }
}
