//! `OutputObserver`: the platform audio-routing capability. The core only
//! ever reads `output_state` and watches it change; it never drives the
//! platform audio server directly.
//!
//! Grounded on the teacher's `audio::events` split between a cheap
//! synchronous read of shared state and a change notification delivered
//! out of band.

use tokio::sync::watch;

/// Where sound is currently coming out. `Earpiece` vs `Speaker` is decided
/// by matching the platform's active port name against a configured set
/// of "onboard" patterns; any other active sink is `External`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Speaker,
    Earpiece,
    External,
}

/// Reports the platform's current audio output route and notifies on
/// change. Implementations own the platform-specific default-sink polling
/// or subscription; the core only consumes [`OutputState`].
pub trait OutputObserver: Send + Sync + 'static {
    /// Cheap, synchronous, last-observed value.
    fn output_state(&self) -> OutputState;

    /// A receiver that yields whenever `output_state` changes. Multiple
    /// subscribers may call this independently.
    fn subscribe(&self) -> watch::Receiver<OutputState>;
}
