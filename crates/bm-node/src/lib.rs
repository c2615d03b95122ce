//! bm-node: Bus connection management for bus-mgr
//!
//! A node owns one connection to a message bus. It starts and connects the
//! bus, optionally publishes a well-known name as a service, joins the
//! sessions of peers it discovers, and tears everything down once the
//! process is interrupted.

pub mod loopback;
pub mod manager;
pub mod negotiator;
pub mod signal;
pub mod testing;

pub use loopback::{LoopbackBus, LoopbackNetwork};
pub use manager::ConnectionManager;
pub use negotiator::SessionNegotiator;
pub use signal::{InterruptLatch, SignalWaiter};
