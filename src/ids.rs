//! Process-local identifiers.
//!
//! `SessionKey` generation follows the same atomic-counter idiom as the
//! teacher's `PRELOAD_REQUEST_COUNTER` (`audio/handle.rs`): monotonic,
//! never reused, safe to hand out from any thread without a lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use rand::distr::Alphanumeric;

/// Process-local integer assigned at session creation, stable for the
/// session's lifetime, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey(u64);

static NEXT_SESSION_KEY: AtomicU64 = AtomicU64::new(1);

impl SessionKey {
    /// Allocate the next monotonic key. Process-wide, never reused.
    pub fn next() -> Self {
        SessionKey(NEXT_SESSION_KEY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Reconstructs a key the bus handed back to us earlier (e.g. the
    /// integer a client read via the `Player.Key` property and now passes
    /// to `PauseOtherSessions`/`SetCurrentPlayer`). Not a new allocation.
    pub fn from_raw(value: u64) -> Self {
        SessionKey(value)
    }

    /// The bus object path segment for this session, e.g. `sessions/3`.
    pub fn path_segment(self) -> String {
        format!("sessions/{}", self.0)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque short string handed to the client at session-creation time,
/// required for detach/reattach/destroy. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionUuid(String);

impl SessionUuid {
    /// Generate a fresh, process-unique opaque identifier.
    pub fn generate() -> Self {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        SessionUuid(format!("mh{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionUuid {
    fn from(s: String) -> Self {
        SessionUuid(s)
    }
}

/// Opaque path-like identifier assigned by a `TrackList` on insert, unique
/// within that list for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackId(String);

static NEXT_TRACK_SEQ: AtomicU64 = AtomicU64::new(1);

impl TrackId {
    /// The well-known empty-track sentinel: the literal path a real MPRIS
    /// client uses for "no track" / "append" (kept identical to the
    /// original implementation's `TrackList/NoTrack` constant).
    pub const EMPTY_PATH: &'static str = "/org/mpris/MediaPlayer2/TrackList/NoTrack";

    pub fn empty() -> Self {
        TrackId(Self::EMPTY_PATH.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0 == Self::EMPTY_PATH
    }

    /// Allocate a fresh id scoped to `session_key`'s track list.
    pub fn generate(session_key: SessionKey) -> Self {
        let seq = NEXT_TRACK_SEQ.fetch_add(1, Ordering::Relaxed);
        TrackId(format!(
            "/org/mpris/MediaPlayer2/Track/{session_key}/{seq}"
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wraps whatever object path a bus caller supplied, verbatim — it may be a
/// previously generated id, the empty-track sentinel, or (for `AddTrack`'s
/// `after_track`) an id this list never issued, which the caller's own
/// lookup will reject.
impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        TrackId(s.to_string())
    }
}
