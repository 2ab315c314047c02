//! `PowerArbiter`: reference-counted acquire/release of the display
//! wakelock and the system suspend-inhibitor, both backed by an external
//! service the core never talks to directly.
//!
//! Grounded on `audio/fade.rs`'s generation-counter idiom: a decrement to
//! zero schedules a deferred release carrying the arbiter's current
//! generation; if an acquire arrives before the settle delay elapses it
//! bumps the generation, and the sleeping release task notices the
//! mismatch and gives up without ever touching the backend. This is what
//! makes a brief pause-then-play not flap the screen.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::CoreError;

/// Absorbs a brief pause -> play sequence without flapping the display.
pub const SETTLE_DELAY: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayState {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemState {
    Active,
    Suspend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayLockEvent {
    Acquired(DisplayState),
    Released(DisplayState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemLockEvent {
    Acquired(SystemState),
    Released(SystemState),
}

/// The backing service: a desktop idle/screen inhibitor for the display
/// lock, `logind`-class for the system lock. Cookies are opaque to the
/// core; the display cookie happens to be an integer on real services but
/// we keep it a plain `String` here too since the core never inspects it.
pub trait PowerBackend: Send + Sync + 'static {
    fn acquire_display(&self) -> impl Future<Output = Result<String, CoreError>> + Send;
    fn release_display(&self, cookie: &str) -> impl Future<Output = Result<(), CoreError>> + Send;
    fn acquire_system(&self, state: SystemState) -> impl Future<Output = Result<String, CoreError>> + Send;
    fn release_system(
        &self,
        state: SystemState,
        cookie: &str,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;
}

struct DisplayInner {
    count: u32,
    cookie: Option<String>,
}

struct SystemInner {
    counts: HashMap<SystemState, u32>,
    cookies: HashMap<SystemState, String>,
}

struct Shared<B> {
    backend: B,
    display: Mutex<DisplayInner>,
    system: Mutex<SystemInner>,
    display_events: broadcast::Sender<DisplayLockEvent>,
    system_events: broadcast::Sender<SystemLockEvent>,
    generation: AtomicU32,
}

/// Clone handle onto a single backend-wide arbiter. Every session holds a
/// clone; acquire/release counts are pooled across all of them, matching
/// "each session contributes at most one outstanding hold per class".
pub struct PowerArbiter<B> {
    shared: Arc<Shared<B>>,
}

impl<B> Clone for PowerArbiter<B> {
    fn clone(&self) -> Self {
        PowerArbiter {
            shared: self.shared.clone(),
        }
    }
}

impl<B: PowerBackend> PowerArbiter<B> {
    pub fn new(backend: B) -> Self {
        let (display_events, _) = broadcast::channel(32);
        let (system_events, _) = broadcast::channel(32);
        PowerArbiter {
            shared: Arc::new(Shared {
                backend,
                display: Mutex::new(DisplayInner {
                    count: 0,
                    cookie: None,
                }),
                system: Mutex::new(SystemInner {
                    counts: HashMap::new(),
                    cookies: HashMap::new(),
                }),
                display_events,
                system_events,
                generation: AtomicU32::new(0),
            }),
        }
    }

    pub fn subscribe_display(&self) -> broadcast::Receiver<DisplayLockEvent> {
        self.shared.display_events.subscribe()
    }

    pub fn subscribe_system(&self) -> broadcast::Receiver<SystemLockEvent> {
        self.shared.system_events.subscribe()
    }

    /// `DisplayState::Off` is a no-op: the arbiter cannot forcibly turn the
    /// display off, it can only stop asking to keep it on.
    pub async fn request_acquire_display(&self) {
        let mut guard = self.shared.display.lock();
        guard.count += 1;
        if guard.count > 1 {
            return;
        }
        // 0 -> 1. Bump the generation first so any deferred release still
        // in flight from a just-cancelled settle window is invalidated.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if guard.cookie.is_some() {
            // A release was pending but never fired — the resource is
            // still held, nothing to re-acquire from the backend.
            let _ = self
                .shared
                .display_events
                .send(DisplayLockEvent::Acquired(DisplayState::On));
            return;
        }
        drop(guard);
        match self.shared.backend.acquire_display().await {
            Ok(cookie) => {
                let mut guard = self.shared.display.lock();
                guard.cookie = Some(cookie);
                drop(guard);
                let _ = self
                    .shared
                    .display_events
                    .send(DisplayLockEvent::Acquired(DisplayState::On));
            }
            Err(err) => {
                warn!(%err, "display lock acquire failed");
            }
        }
    }

    pub fn request_release_display(&self, state: DisplayState) {
        if matches!(state, DisplayState::Off) {
            return;
        }
        let new_count = {
            let mut guard = self.shared.display.lock();
            guard.count = guard.count.saturating_sub(1);
            guard.count
        };
        if new_count > 0 {
            return;
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SETTLE_DELAY).await;
            if this.shared.generation.load(Ordering::SeqCst) != generation {
                debug!("display lock release superseded by a later acquire, skipping");
                return;
            }
            let cookie = {
                let mut guard = this.shared.display.lock();
                if guard.count > 0 {
                    return;
                }
                guard.cookie.take()
            };
            let Some(cookie) = cookie else { return };
            match this.shared.backend.release_display(&cookie).await {
                Ok(()) => {
                    let _ = this
                        .shared
                        .display_events
                        .send(DisplayLockEvent::Released(DisplayState::On));
                }
                Err(err) => warn!(%err, "display lock release failed"),
            }
        });
    }

    /// `SystemState::Suspend` is a no-op for the same reason
    /// `DisplayState::Off` is.
    pub async fn request_acquire_system(&self, state: SystemState) {
        if matches!(state, SystemState::Suspend) {
            return;
        }
        let already_held = {
            let mut guard = self.shared.system.lock();
            let count = guard.counts.entry(state).or_insert(0);
            *count += 1;
            *count > 1
        };
        if already_held {
            return;
        }
        match self.shared.backend.acquire_system(state).await {
            Ok(cookie) => {
                let mut guard = self.shared.system.lock();
                guard.cookies.insert(state, cookie);
                drop(guard);
                let _ = self
                    .shared
                    .system_events
                    .send(SystemLockEvent::Acquired(state));
            }
            Err(err) => warn!(%err, ?state, "system lock acquire failed"),
        }
    }

    /// Synchronous on the cookie, unlike the display lock's settle delay.
    pub async fn request_release_system(&self, state: SystemState) {
        if matches!(state, SystemState::Suspend) {
            return;
        }
        let cookie = {
            let mut guard = self.shared.system.lock();
            let count = guard.counts.entry(state).or_insert(0);
            *count = count.saturating_sub(1);
            if *count > 0 {
                return;
            }
            guard.cookies.remove(&state)
        };
        let Some(cookie) = cookie else { return };
        match self.shared.backend.release_system(state, &cookie).await {
            Ok(()) => {
                let _ = self
                    .shared
                    .system_events
                    .send(SystemLockEvent::Released(state));
            }
            Err(err) => warn!(%err, ?state, "system lock release failed, leaving counter decremented"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as Counter;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct CountingBackend {
        display_acquires: Counter,
        display_releases: Counter,
        system_acquires: Counter,
        system_releases: Counter,
        log: StdMutex<Vec<&'static str>>,
    }

    impl PowerBackend for Arc<CountingBackend> {
        async fn acquire_display(&self) -> Result<String, CoreError> {
            self.display_acquires.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push("display_acquire");
            Ok("display-cookie".to_string())
        }

        async fn release_display(&self, _cookie: &str) -> Result<(), CoreError> {
            self.display_releases.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push("display_release");
            Ok(())
        }

        async fn acquire_system(&self, _state: SystemState) -> Result<String, CoreError> {
            self.system_acquires.fetch_add(1, Ordering::SeqCst);
            Ok("system-cookie".to_string())
        }

        async fn release_system(&self, _state: SystemState, _cookie: &str) -> Result<(), CoreError> {
            self.system_releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn display_acquire_emits_once_for_nested_holds() {
        let backend = Arc::new(CountingBackend::default());
        let arbiter = PowerArbiter::new(backend.clone());
        let mut events = arbiter.subscribe_display();

        arbiter.request_acquire_display().await;
        arbiter.request_acquire_display().await;
        assert_eq!(backend.display_acquires.load(Ordering::SeqCst), 1);
        assert!(matches!(
            events.recv().await.unwrap(),
            DisplayLockEvent::Acquired(DisplayState::On)
        ));
    }

    #[tokio::test]
    async fn display_release_is_deferred_and_cancellable() {
        let backend = Arc::new(CountingBackend::default());
        let arbiter = PowerArbiter::new(backend.clone());

        arbiter.request_acquire_display().await;
        arbiter.request_release_display(DisplayState::On);
        // Re-acquire inside the settle window: the pending release must
        // never reach the backend.
        arbiter.request_acquire_display().await;

        tokio::time::sleep(SETTLE_DELAY + Duration::from_millis(200)).await;
        assert_eq!(backend.display_releases.load(Ordering::SeqCst), 0);
        assert_eq!(backend.display_acquires.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn display_release_fires_after_settle_delay_when_not_renewed() {
        let backend = Arc::new(CountingBackend::default());
        let arbiter = PowerArbiter::new(backend.clone());

        arbiter.request_acquire_display().await;
        arbiter.request_release_display(DisplayState::On);

        tokio::time::sleep(SETTLE_DELAY + Duration::from_millis(200)).await;
        assert_eq!(backend.display_releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn display_off_state_is_a_release_noop() {
        let backend = Arc::new(CountingBackend::default());
        let arbiter = PowerArbiter::new(backend.clone());
        arbiter.request_acquire_display().await;
        arbiter.request_release_display(DisplayState::Off);
        tokio::time::sleep(SETTLE_DELAY + Duration::from_millis(200)).await;
        assert_eq!(backend.display_releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn system_lock_release_is_synchronous() {
        let backend = Arc::new(CountingBackend::default());
        let arbiter = PowerArbiter::new(backend.clone());

        arbiter.request_acquire_system(SystemState::Active).await;
        arbiter.request_release_system(SystemState::Active).await;
        assert_eq!(backend.system_releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn system_suspend_state_is_a_noop() {
        let backend = Arc::new(CountingBackend::default());
        let arbiter = PowerArbiter::new(backend.clone());

        arbiter.request_acquire_system(SystemState::Suspend).await;
        assert_eq!(backend.system_acquires.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn system_lock_is_reference_counted() {
        let backend = Arc::new(CountingBackend::default());
        let arbiter = PowerArbiter::new(backend.clone());

        arbiter.request_acquire_system(SystemState::Active).await;
        arbiter.request_acquire_system(SystemState::Active).await;
        arbiter.request_release_system(SystemState::Active).await;
        assert_eq!(backend.system_releases.load(Ordering::SeqCst), 0);
        arbiter.request_release_system(SystemState::Active).await;
        assert_eq!(backend.system_releases.load(Ordering::SeqCst), 1);
    }
}
