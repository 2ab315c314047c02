//! In-process test doubles for every external capability.
//!
//! Grounded on the teacher's `audio::player::AudioPlayer` shape: a small
//! owned-state struct behind a lock, driven by explicit method calls
//! rather than a real backend, so the registry/session/track-list logic
//! in the scenario tests can run without GStreamer, AccountsService, or a
//! running AppArmor stack.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use crate::apparmor::{AppContextResolver, Context, UriAuthorizer};
use crate::art_cache::ArtCache;
use crate::call_monitor::{CallEvent, CallEventReceiver, CallMonitor};
use crate::engine::{Engine, EngineErrorKind, EngineEvent, EngineEventReceiver, EngineState};
use crate::error::CoreError;
use crate::metadata::{self, MetadataMap};
use crate::output_observer::{OutputObserver, OutputState};
use crate::power::{PowerBackend, SystemState};
use crate::types::{AudioStreamRole, Lifetime, Orientation};

struct StubEngineInner {
    state: EngineState,
    uri: Option<String>,
    position_us: u64,
    duration_us: u64,
    is_video_source: bool,
    is_audio_source: bool,
    orientation: Orientation,
    metadata: MetadataMap,
    volume: f64,
    opens: Vec<(String, bool)>,
    /// Per-URI metadata a test has taught `extract_metadata` to return,
    /// distinct from `metadata` (the *current* track's shadowed values) —
    /// `extract_metadata` is called proactively for tracks that aren't
    /// current yet (§4.6 `add`/`add_many`).
    extracted: HashMap<String, MetadataMap>,
    /// Dropped along with the engine instance, which removes any embedded
    /// album-art files it still owns (§8 invariant 7).
    art: ArtCache,
}

/// A fully in-memory [`Engine`]. Every mutating call is recorded so tests
/// can assert on exactly what the session asked of it, and `push_event`
/// lets a test raise engine events the way a real backend would.
pub struct StubEngine {
    inner: Mutex<StubEngineInner>,
    events: broadcast::Sender<EngineEvent>,
}

impl StubEngine {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(StubEngine {
            inner: Mutex::new(StubEngineInner {
                state: EngineState::NoMedia,
                uri: None,
                position_us: 0,
                duration_us: 0,
                is_video_source: false,
                is_audio_source: true,
                orientation: Orientation::Deg0,
                metadata: MetadataMap::new(),
                volume: 1.0,
                opens: Vec::new(),
                extracted: HashMap::new(),
                art: ArtCache::new(),
            }),
            events,
        })
    }

    /// Teach `extract_metadata(uri)` to return `bytes` as embedded art,
    /// alongside whatever other tags were previously taught for `uri` via
    /// [`Self::set_extracted_metadata`]. Mirrors the way a real tag
    /// extractor would fold an embedded image into the rest of a track's
    /// metadata (§4.5).
    pub fn ingest_embedded_art(
        &self,
        uri: &str,
        bytes: &[u8],
    ) -> std::io::Result<std::path::PathBuf> {
        let mut guard = self.inner.lock();
        let path = guard.art.ingest(uri, bytes)?;
        let entry = guard.extracted.entry(uri.to_string()).or_default();
        entry.insert(metadata::ART_URL.to_string(), format!("file://{}", path.display()));
        entry.insert(metadata::TAG_IMAGE.to_string(), "true".to_string());
        Ok(path)
    }

    /// Teach `extract_metadata(uri)` to return `fields` verbatim (merged
    /// with any embedded art already ingested for `uri`).
    pub fn set_extracted_metadata(&self, uri: &str, fields: MetadataMap) {
        let mut guard = self.inner.lock();
        guard.extracted.entry(uri.to_string()).or_default().extend(fields);
    }

    /// Number of distinct embedded-art files this engine instance is still
    /// tracking on disk, for asserting §8 invariant 7 end to end.
    pub fn live_art_file_count(&self) -> usize {
        self.inner.lock().art.live_file_count()
    }

    /// Raise `event` as if the real backend had, updating `state()` first
    /// when it's a `PlaybackStatusChanged` so `state()` stays coherent for
    /// a caller reading it synchronously right after.
    pub fn push_event(&self, event: EngineEvent) {
        if let EngineEvent::PlaybackStatusChanged(state) = event {
            self.inner.lock().state = state;
        }
        let _ = self.events.send(event);
    }

    pub fn set_video_source(&self, is_video: bool) {
        self.inner.lock().is_video_source = is_video;
    }

    pub fn set_metadata(&self, metadata: MetadataMap) {
        self.inner.lock().metadata = metadata;
    }

    pub fn opens(&self) -> Vec<(String, bool)> {
        self.inner.lock().opens.clone()
    }

    pub fn current_uri(&self) -> Option<String> {
        self.inner.lock().uri.clone()
    }
}

impl Engine for Arc<StubEngine> {
    async fn open(
        &self,
        uri: &str,
        _headers: Option<&HashMap<String, String>>,
        reset: bool,
    ) -> Result<(), CoreError> {
        let mut guard = self.inner.lock();
        guard.uri = Some(uri.to_string());
        guard.opens.push((uri.to_string(), reset));
        Ok(())
    }

    async fn play(&self) -> Result<(), CoreError> {
        self.inner.lock().state = EngineState::Playing;
        Ok(())
    }

    async fn pause(&self) -> Result<(), CoreError> {
        self.inner.lock().state = EngineState::Paused;
        Ok(())
    }

    async fn stop(&self) -> Result<(), CoreError> {
        self.inner.lock().state = EngineState::Stopped;
        Ok(())
    }

    async fn seek_to(&self, position_us: u64) -> Result<(), CoreError> {
        self.inner.lock().position_us = position_us;
        Ok(())
    }

    async fn set_volume(&self, volume: f64) -> Result<(), CoreError> {
        self.inner.lock().volume = volume;
        Ok(())
    }

    async fn set_audio_role(&self, _role: AudioStreamRole) -> Result<(), CoreError> {
        Ok(())
    }

    async fn set_lifetime(&self, _lifetime: Lifetime) -> Result<(), CoreError> {
        Ok(())
    }

    async fn create_video_sink(&self, _texture_id: u32) -> Result<(), CoreError> {
        Err(CoreError::PreconditionFailed(
            EngineErrorKind::OutOfProcessBufferStreamingNotSupported.to_string(),
        ))
    }

    async fn position_us(&self) -> u64 {
        self.inner.lock().position_us
    }

    async fn duration_us(&self) -> u64 {
        self.inner.lock().duration_us
    }

    async fn is_video_source(&self) -> bool {
        self.inner.lock().is_video_source
    }

    async fn is_audio_source(&self) -> bool {
        self.inner.lock().is_audio_source
    }

    async fn orientation(&self) -> Orientation {
        self.inner.lock().orientation
    }

    async fn current_track_metadata(&self) -> MetadataMap {
        self.inner.lock().metadata.clone()
    }

    async fn extract_metadata(&self, uri: &str) -> Result<MetadataMap, CoreError> {
        Ok(self
            .inner
            .lock()
            .extracted
            .get(uri)
            .cloned()
            .unwrap_or_default())
    }

    fn state(&self) -> EngineState {
        self.inner.lock().state
    }

    fn subscribe(&self) -> EngineEventReceiver {
        self.events.subscribe()
    }
}

/// A [`PowerBackend`] that just counts calls; tests assert on the counts
/// rather than on any real inhibitor state.
#[derive(Default)]
pub struct StubPowerBackend {
    pub display_acquires: Mutex<u32>,
    pub display_releases: Mutex<u32>,
    pub system_acquires: Mutex<HashMap<SystemState, u32>>,
    pub system_releases: Mutex<HashMap<SystemState, u32>>,
}

impl StubPowerBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(StubPowerBackend::default())
    }
}

impl PowerBackend for Arc<StubPowerBackend> {
    async fn acquire_display(&self) -> Result<String, CoreError> {
        *self.display_acquires.lock() += 1;
        Ok("stub-display-cookie".to_string())
    }

    async fn release_display(&self, _cookie: &str) -> Result<(), CoreError> {
        *self.display_releases.lock() += 1;
        Ok(())
    }

    async fn acquire_system(&self, state: SystemState) -> Result<String, CoreError> {
        *self.system_acquires.lock().entry(state).or_insert(0) += 1;
        Ok("stub-system-cookie".to_string())
    }

    async fn release_system(&self, state: SystemState, _cookie: &str) -> Result<(), CoreError> {
        *self.system_releases.lock().entry(state).or_insert(0) += 1;
        Ok(())
    }
}

/// A fixed confinement label for every peer, set at construction.
pub struct StubAppContextResolver {
    pub context: Context,
}

impl StubAppContextResolver {
    pub fn unconfined() -> Self {
        StubAppContextResolver {
            context: Context::Unconfined,
        }
    }

    pub fn confined(label: &str) -> Self {
        StubAppContextResolver {
            context: Context::classify(label),
        }
    }
}

impl AppContextResolver for StubAppContextResolver {
    async fn resolve(&self, _peer_name: &str) -> Option<Context> {
        Some(self.context.clone())
    }
}

/// A [`UriAuthorizer`] that denies a fixed set of URIs and allows
/// everything else, for scenarios that need a specific denial (S5) rather
/// than [`crate::apparmor::DefaultUriAuthorizer`]'s directory policy.
pub struct DenyListAuthorizer {
    denied: Vec<String>,
}

impl DenyListAuthorizer {
    pub fn new(denied: Vec<String>) -> Self {
        DenyListAuthorizer { denied }
    }
}

impl UriAuthorizer for DenyListAuthorizer {
    fn authorize(&self, _context: &Context, uri: &str) -> (bool, String) {
        if self.denied.iter().any(|d| d == uri) {
            (false, format!("{uri} is denied by policy"))
        } else {
            (true, String::new())
        }
    }
}

/// A settable output route, changed directly by the test rather than by
/// observing a real audio server.
pub struct StubOutputObserver {
    tx: watch::Sender<OutputState>,
}

impl StubOutputObserver {
    pub fn new(initial: OutputState) -> Arc<Self> {
        let (tx, _) = watch::channel(initial);
        Arc::new(StubOutputObserver { tx })
    }

    pub fn set(&self, state: OutputState) {
        let _ = self.tx.send(state);
    }
}

impl OutputObserver for StubOutputObserver {
    fn output_state(&self) -> OutputState {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<OutputState> {
        self.tx.subscribe()
    }
}

/// Fires `CallEvent`s on command rather than from a real telephony stack.
pub struct StubCallMonitor {
    events: broadcast::Sender<CallEvent>,
}

impl StubCallMonitor {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(StubCallMonitor { events })
    }

    pub fn fire(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }
}

impl CallMonitor for StubCallMonitor {
    fn subscribe(&self) -> CallEventReceiver {
        self.events.subscribe()
    }
}
