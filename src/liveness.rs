//! `ClientLivenessWatcher`: bridges bus peer departure to the dispatcher.
//!
//! Grounded on the teacher's `audio::events` command/event split: `watch`
//! registers interest (the command side), `peer_gone` notifications arrive
//! on a broadcast stream (the event side) rather than through a callback,
//! so the registry can process them like any other dispatcher-driven
//! event.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

use crate::ids::SessionKey;

/// Emitted when the bus reports a watched peer's unique name has no owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerGone(pub SessionKey);

pub type PeerGoneReceiver = broadcast::Receiver<PeerGone>;

/// Watches bus peers on behalf of registered sessions and reports
/// disconnection exactly once per registration.
pub trait ClientLivenessWatcher: Send + Sync + 'static {
    /// Register interest in `peer_name`'s lifetime, tagged with `key` so
    /// the eventual `PeerGone` can be routed back to the right session.
    fn watch(&self, peer_name: &str, key: SessionKey);

    /// Subscribe to departures. Each call returns an independent receiver.
    fn subscribe(&self) -> PeerGoneReceiver;
}

/// At-most-once bookkeeping shared by any real `ClientLivenessWatcher`
/// implementation: a bus `NameOwnerChanged` signal can in principle be
/// observed more than once for the same unique name, so firing must be
/// deduplicated against the set of keys already reported gone.
pub struct FiredOnceGuard {
    fired: Mutex<HashSet<SessionKey>>,
}

impl FiredOnceGuard {
    pub fn new() -> Self {
        FiredOnceGuard {
            fired: Mutex::new(HashSet::new()),
        }
    }

    /// Returns `true` the first time `key` is passed, `false` on every
    /// subsequent call.
    pub fn fire_once(&self, key: SessionKey) -> bool {
        self.fired.lock().insert(key)
    }

    /// Drop bookkeeping for a key whose session was destroyed through some
    /// other path (explicit `DestroySession`), so a late-arriving signal
    /// for a name that was never actually reused can't leak memory.
    pub fn forget(&self, key: SessionKey) {
        self.fired.lock().remove(&key);
    }
}

impl Default for FiredOnceGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Watches real bus peers via `org.freedesktop.DBus.NameOwnerChanged`, the
/// same signal the teacher's own player-discovery code
/// (`features::mpris`-adjacent D-Bus plumbing) would subscribe to. A name
/// losing its owner is a peer departure; a name gaining one is not.
pub struct BusClientLivenessWatcher {
    watched: Mutex<HashMap<String, SessionKey>>,
    fired: FiredOnceGuard,
    events: broadcast::Sender<PeerGone>,
}

impl BusClientLivenessWatcher {
    /// Subscribes to `NameOwnerChanged` on `connection` and spawns the
    /// forwarding task. The returned watcher is ready to use immediately;
    /// `watch` calls made before the subscription resolves are still safe,
    /// they just won't see a departure that happened in that narrow window.
    pub async fn new(connection: &zbus::Connection) -> zbus::Result<Arc<Self>> {
        let (events, _) = broadcast::channel(64);
        let watcher = Arc::new(BusClientLivenessWatcher {
            watched: Mutex::new(HashMap::new()),
            fired: FiredOnceGuard::new(),
            events,
        });

        let proxy = zbus::fdo::DBusProxy::new(connection).await?;
        let mut owner_changes = proxy.receive_name_owner_changed().await?;
        let task_watcher = watcher.clone();
        tokio::spawn(async move {
            while let Some(signal) = owner_changes.next().await {
                let Ok(args) = signal.args() else {
                    continue;
                };
                if args.new_owner().is_some() {
                    continue;
                }
                let key = task_watcher.watched.lock().remove(args.name().as_str());
                if let Some(key) = key {
                    if task_watcher.fired.fire_once(key) {
                        if task_watcher.events.send(PeerGone(key)).is_err() {
                            warn!("no subscriber listening for peer departures");
                        }
                    }
                }
            }
        });

        Ok(watcher)
    }
}

impl ClientLivenessWatcher for BusClientLivenessWatcher {
    fn watch(&self, peer_name: &str, key: SessionKey) {
        self.watched.lock().insert(peer_name.to_string(), key);
        self.fired.forget(key);
    }

    fn subscribe(&self) -> PeerGoneReceiver {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_exactly_once_per_key() {
        let guard = FiredOnceGuard::new();
        let key = SessionKey::next();
        assert!(guard.fire_once(key));
        assert!(!guard.fire_once(key));
    }

    #[test]
    fn forget_allows_a_future_registration_to_fire_again() {
        let guard = FiredOnceGuard::new();
        let key = SessionKey::next();
        assert!(guard.fire_once(key));
        guard.forget(key);
        assert!(guard.fire_once(key));
    }
}
