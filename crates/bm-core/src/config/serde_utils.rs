//! Serde adapters for configuration fields

/// `Duration` stored as whole milliseconds.
///
/// Sub-millisecond precision is dropped on save; durations too long for a
/// `u64` of milliseconds saturate.
///
/// ```ignore
/// #[serde(with = "bm_core::config::serde_utils::duration_millis")]
/// interrupt_poll_interval: Duration,
/// ```
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
