//! Core trait definitions

mod listener;
mod runtime;

pub use listener::{BusListener, SessionListener, SessionPortListener};
pub use runtime::{BusObject, BusRuntime};
