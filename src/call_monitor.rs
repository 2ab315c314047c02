//! `CallMonitor`: telephony call state, consumed only by
//! [`crate::registry::SessionRegistry`]'s call-preemption policy (§4.7).
//!
//! Grounded on the same command/event split as [`crate::output_observer`]:
//! the capability exposes a change stream, never a request/response API,
//! since the core has nothing to ask a telephony stack to *do*.

use tokio::sync::broadcast;

/// A hook-state transition from the platform telephony stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// A call became active. The registry pauses every multimedia session
    /// and remembers which of them were playing.
    OffHook,
    /// The call ended. The registry resumes sessions it paused for
    /// `OffHook`, unless they are video sessions and headphones were
    /// disconnected in the interim.
    OnHook,
}

pub type CallEventReceiver = broadcast::Receiver<CallEvent>;

/// Watches the platform telephony stack for hook-state transitions.
pub trait CallMonitor: Send + Sync + 'static {
    /// Subscribe to hook-state transitions. Each call returns an
    /// independent receiver.
    fn subscribe(&self) -> CallEventReceiver;
}
