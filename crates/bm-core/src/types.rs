//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Numeric endpoint that routes inbound session-join requests.
///
/// Port 0 is reserved by the bus; valid ports are 1 through 0xFFFF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionPort(u16);

impl SessionPort {
    /// Port agreed on by every peer of a deployment unless configured otherwise
    pub const DEFAULT: SessionPort = SessionPort(24);

    /// Create a session port, rejecting the reserved value 0
    pub fn new(port: u16) -> Option<Self> {
        (port != 0).then_some(Self(port))
    }

    /// Get the raw port value
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Whether the port is usable for binding or joining
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl Default for SessionPort {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for SessionPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime-assigned identifier of a negotiated session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// The bus never hands out 0; it marks "no session"
    pub const NONE: SessionId = SessionId(0);
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u32> for SessionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Bit set of transports a name is advertised over or a session may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportMask(pub u16);

impl TransportMask {
    pub const NONE: TransportMask = TransportMask(0x0000);
    pub const LOCAL: TransportMask = TransportMask(0x0001);
    pub const TCP: TransportMask = TransportMask(0x0004);
    pub const UDP: TransportMask = TransportMask(0x0100);
    pub const ANY: TransportMask = TransportMask(0xFFFF);

    /// Whether every bit of `other` is set in `self`
    pub fn contains(&self, other: TransportMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the two masks share at least one transport
    pub fn intersects(&self, other: TransportMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for TransportMask {
    type Output = TransportMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        TransportMask(self.0 | rhs.0)
    }
}

impl fmt::Display for TransportMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Kind of traffic carried by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrafficType {
    /// Bus messages (method calls, signals)
    Messages,
    /// Raw, unreliable byte stream
    RawUnreliable,
    /// Raw, reliable byte stream
    RawReliable,
}

impl TrafficType {
    /// Wire value of the traffic type
    pub fn bits(&self) -> u8 {
        match self {
            TrafficType::Messages => 0x01,
            TrafficType::RawUnreliable => 0x02,
            TrafficType::RawReliable => 0x04,
        }
    }
}

/// Proximity constraint of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proximity(pub u8);

impl Proximity {
    pub const PHYSICAL: Proximity = Proximity(0x01);
    pub const ANY: Proximity = Proximity(0xFF);
}

/// Options negotiated when binding or joining a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionOpts {
    /// Traffic carried by the session
    pub traffic: TrafficType,
    /// Whether more than two participants may join
    pub is_multipoint: bool,
    /// Proximity constraint
    pub proximity: Proximity,
    /// Transports the session may use
    pub transports: TransportMask,
}

impl SessionOpts {
    /// Multi-point message sessions over any proximity and any transport.
    ///
    /// Both sides of a deployment must use these options to interoperate.
    pub fn multipoint_messages() -> Self {
        Self {
            traffic: TrafficType::Messages,
            is_multipoint: true,
            proximity: Proximity::ANY,
            transports: TransportMask::ANY,
        }
    }
}

impl Default for SessionOpts {
    fn default() -> Self {
        Self::multipoint_messages()
    }
}

/// Flags for requesting ownership of a well-known name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameFlags(pub u32);

impl NameFlags {
    pub const NONE: NameFlags = NameFlags(0x0);
    /// Fail immediately instead of waiting in the owner queue
    pub const DO_NOT_QUEUE: NameFlags = NameFlags(0x4);

    /// Whether every bit of `other` is set in `self`
    pub fn contains(&self, other: NameFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for NameFlags {
    type Output = NameFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        NameFlags(self.0 | rhs.0)
    }
}

/// Lifecycle state of a managed bus connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Constructed, nothing started yet
    Created,
    /// Bus machinery started and connected
    Started,
    /// Name requested, session port bound and name advertised
    ServiceAdvertised,
    /// Bus machinery stopped and joined
    Stopped,
    /// Handles released; terminal
    Deleted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Created => write!(f, "created"),
            ConnectionState::Started => write!(f, "started"),
            ConnectionState::ServiceAdvertised => write!(f, "service-advertised"),
            ConnectionState::Stopped => write!(f, "stopped"),
            ConnectionState::Deleted => write!(f, "deleted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_port_rejects_zero() {
        assert!(SessionPort::new(0).is_none());
        assert_eq!(SessionPort::new(24), Some(SessionPort::DEFAULT));
        assert_eq!(SessionPort::new(u16::MAX).unwrap().as_u16(), 0xFFFF);
    }

    #[test]
    fn test_session_id_display_is_hex() {
        assert_eq!(format!("{}", SessionId::new(42)), "0x2a");
    }

    #[test]
    fn test_multipoint_messages_opts() {
        let opts = SessionOpts::multipoint_messages();
        assert_eq!(opts.traffic, TrafficType::Messages);
        assert!(opts.is_multipoint);
        assert_eq!(opts.proximity, Proximity::ANY);
        assert_eq!(opts.transports, TransportMask::ANY);
    }

    #[test]
    fn test_transport_mask_ops() {
        let mask = TransportMask::LOCAL | TransportMask::TCP;
        assert!(mask.contains(TransportMask::TCP));
        assert!(!mask.contains(TransportMask::UDP));
        assert!(TransportMask::ANY.intersects(TransportMask::LOCAL));
        assert!(!TransportMask::NONE.intersects(TransportMask::ANY));
    }

    #[test]
    fn test_name_flags() {
        let flags = NameFlags::NONE | NameFlags::DO_NOT_QUEUE;
        assert!(flags.contains(NameFlags::DO_NOT_QUEUE));
        assert!(flags.contains(NameFlags::NONE));
        assert!(!NameFlags::NONE.contains(NameFlags::DO_NOT_QUEUE));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(
            format!("{}", ConnectionState::ServiceAdvertised),
            "service-advertised"
        );
    }
}
