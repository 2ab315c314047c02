//! `PlayerSession`: one client-owned playback context (§4.7).
//!
//! Grounded on the teacher's `audio::player::AudioPlayer`: an owned state
//! struct that drives a single backend and shadows the properties a
//! caller reads, with the corrections the spec requires — position,
//! duration, and the video/audio classification are *pull* properties
//! here (queried fresh from the engine) rather than cached fields, since
//! §4.7 calls that out explicitly.
//!
//! Generic over `Engine` and `PowerBackend` rather than boxed trait
//! objects: a process runs exactly one engine backend and one power
//! backend, so there is nothing to dispatch over at a call site, and
//! `Engine`'s RPITIT methods aren't object-safe in the first place.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::apparmor::{Context, UriAuthorizer};
use crate::engine::{Engine, EngineState};
use crate::error::CoreError;
use crate::ids::{SessionKey, SessionUuid, TrackId};
use crate::metadata::MetadataMap;
use crate::power::{DisplayState, PowerArbiter, PowerBackend, SystemState};
use crate::track_list::{TrackList, TrackListEvent};
use crate::types::{AudioStreamRole, Lifetime, LoopStatus, Orientation, PlaybackStatus};

/// Which global lock a session's current wakelock hold came from. Chosen
/// at acquire time and re-used at release time so a hold never switches
/// class mid-flight (§4.7 "releases always release the same class that
/// was acquired").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WakelockClass {
    Display,
    System,
}

/// Signals a `ControlSurface` translates into MPRIS `PropertiesChanged`
/// notifications and signals.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Every Player property that changed as part of one dispatched engine
    /// event, so the wire can emit a single `PropertiesChanged` carrying
    /// the union rather than one signal per property (spec.md:224).
    /// `metadata` is `None` on transitions that don't touch it.
    PlayerPropertiesChanged {
        metadata: Option<MetadataMap>,
        playback_status: PlaybackStatus,
    },
    Seeked(u64),
    AboutToFinish,
    EndOfStream,
    VideoDimensionChanged { width: u32, height: u32 },
    Error(String),
    Buffering(u8),
}

pub type SessionEventReceiver = broadcast::Receiver<SessionEvent>;

pub struct PlayerSession<E: Engine, B: PowerBackend> {
    key: SessionKey,
    uuid: SessionUuid,
    owner_peer: String,
    identity: Context,
    lifetime: Lifetime,
    audio_role: AudioStreamRole,

    engine: E,
    power: PowerArbiter<B>,
    track_list: TrackList,

    engine_state: EngineState,
    previous_engine_state: EngineState,
    playback_status: PlaybackStatus,
    metadata_for_current_track: MetadataMap,

    playback_rate: f64,
    min_rate: f64,
    max_rate: f64,
    volume: f64,

    display_count: u32,
    system_count: u32,
    wakelock_class: Option<WakelockClass>,

    abandoning: bool,
    /// Set for the one `TrackListEvent::GoToTrack` that `handle_about_to_finish`
    /// already acted on directly, so the dispatcher's normal event
    /// handling doesn't reopen the same URI a second time.
    go_to_lock: bool,

    events: broadcast::Sender<SessionEvent>,
}

impl<E: Engine, B: PowerBackend> PlayerSession<E, B> {
    pub fn new(
        key: SessionKey,
        uuid: SessionUuid,
        owner_peer: String,
        identity: Context,
        engine: E,
        power: PowerArbiter<B>,
        authorizer: Arc<dyn UriAuthorizer>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let track_list = TrackList::new(key, identity.clone(), authorizer);
        PlayerSession {
            key,
            uuid,
            owner_peer,
            identity,
            lifetime: Lifetime::Normal,
            audio_role: AudioStreamRole::Multimedia,
            engine,
            power,
            track_list,
            engine_state: EngineState::NoMedia,
            previous_engine_state: EngineState::NoMedia,
            playback_status: PlaybackStatus::Null,
            metadata_for_current_track: MetadataMap::new(),
            playback_rate: 1.0,
            min_rate: 1.0,
            max_rate: 1.0,
            volume: 1.0,
            display_count: 0,
            system_count: 0,
            wakelock_class: None,
            abandoning: false,
            go_to_lock: false,
            events,
        }
    }

    pub fn subscribe(&self) -> SessionEventReceiver {
        self.events.subscribe()
    }

    /// The underlying engine's own event stream, forwarded by the
    /// dispatcher into [`Self::handle_engine_event`] (§5: every engine
    /// callback must be posted to the dispatcher before it touches core
    /// state).
    pub fn engine_events(&self) -> crate::engine::EngineEventReceiver {
        self.engine.subscribe()
    }

    pub fn track_list_events(&self) -> crate::track_list::TrackListEventReceiver {
        self.track_list.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    // ---- identity & shadowed properties ----

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn uuid(&self) -> &SessionUuid {
        &self.uuid
    }

    pub fn owner_peer(&self) -> &str {
        &self.owner_peer
    }

    pub fn identity(&self) -> &Context {
        &self.identity
    }

    pub fn track_list(&self) -> &TrackList {
        &self.track_list
    }

    pub fn track_list_mut(&mut self) -> &mut TrackList {
        &mut self.track_list
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        self.playback_status
    }

    pub fn engine_state(&self) -> EngineState {
        self.engine_state
    }

    pub fn audio_role(&self) -> AudioStreamRole {
        self.audio_role
    }

    pub fn set_audio_role(&mut self, role: AudioStreamRole) {
        self.audio_role = role;
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub fn set_lifetime(&mut self, lifetime: Lifetime) {
        self.lifetime = lifetime;
    }

    pub fn metadata_for_current_track(&self) -> &MetadataMap {
        &self.metadata_for_current_track
    }

    pub fn loop_status(&self) -> LoopStatus {
        self.track_list.loop_status()
    }

    pub fn set_loop_status(&mut self, status: LoopStatus) {
        self.track_list.set_loop_status(status);
    }

    pub fn shuffle(&self) -> bool {
        self.track_list.shuffle_enabled()
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.track_list.set_shuffle(shuffle);
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    pub fn min_rate(&self) -> f64 {
        self.min_rate
    }

    pub fn max_rate(&self) -> f64 {
        self.max_rate
    }

    pub fn can_play(&self) -> bool {
        !self.track_list.is_empty()
    }

    pub fn can_pause(&self) -> bool {
        self.playback_status.is_playing()
    }

    pub fn can_seek(&self) -> bool {
        !matches!(self.engine_state, EngineState::NoMedia)
    }

    pub fn can_go_next(&self) -> bool {
        self.track_list.has_next()
    }

    pub fn can_go_previous(&self) -> bool {
        self.track_list.has_previous()
    }

    pub fn is_abandoning(&self) -> bool {
        self.abandoning
    }

    // ---- pull properties: always queried against the engine ----

    pub async fn position_us(&self) -> u64 {
        self.engine.position_us().await
    }

    pub async fn duration_us(&self) -> u64 {
        self.engine.duration_us().await
    }

    pub async fn is_video_source(&self) -> bool {
        self.engine.is_video_source().await
    }

    pub async fn is_audio_source(&self) -> bool {
        self.engine.is_audio_source().await
    }

    pub async fn orientation(&self) -> Orientation {
        self.engine.orientation().await
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Shadowed locally (push property, §4.7) before being forwarded to
    /// the engine so a caller reading it back immediately sees the
    /// clamped value without waiting on the engine round-trip.
    pub async fn set_volume(&mut self, volume: f64) -> Result<(), CoreError> {
        self.volume = volume.clamp(0.0, 1.0);
        self.engine.set_volume(self.volume).await
    }

    // ---- control operations ----

    /// Clears the track list; a non-empty `uri` is appended (not made
    /// current) and opened directly on the engine. An empty `uri`
    /// performs the clear only.
    pub async fn open_uri(&mut self, uri: &str) -> Result<(), CoreError> {
        self.track_list.reset();
        if uri.is_empty() {
            return Ok(());
        }
        self.track_list.add(uri, &TrackId::empty(), false)?;
        self.engine.open(uri, None, true).await
    }

    /// Opens `uri` on the engine with `headers`, without touching the
    /// track list.
    pub async fn open_uri_extended(
        &mut self,
        uri: &str,
        headers: HashMap<String, String>,
    ) -> Result<(), CoreError> {
        self.engine.open(uri, Some(&headers), true).await
    }

    /// Advances the track list; the resulting `GoToTrack` event (consumed
    /// elsewhere via `handle_track_list_event`) drives the engine.
    pub fn next(&mut self) -> Option<TrackId> {
        self.track_list.next_with_reset()
    }

    /// `position_us` is the caller's current read of `position_us()` —
    /// this is a pull property (§4.7), so `PlayerSession` doesn't cache it
    /// and the caller (the dispatcher, which just queried the engine)
    /// passes it in explicitly.
    pub fn previous(&mut self, position_us: u64) -> Option<TrackId> {
        self.track_list.previous(position_us)
    }

    /// The engine-call half of `play()`; the registry wraps this with the
    /// cross-session exclusivity enforcement and current-player bookkeeping
    /// the full spec operation requires (§4.8), since only the registry
    /// can see every other session.
    pub async fn play(&mut self) -> Result<(), CoreError> {
        self.engine.play().await
    }

    pub async fn pause(&mut self) -> Result<(), CoreError> {
        self.engine.pause().await
    }

    pub async fn stop(&mut self) -> Result<(), CoreError> {
        self.engine.stop().await
    }

    pub async fn seek_to(&mut self, position_us: u64) -> Result<(), CoreError> {
        self.engine.seek_to(position_us).await
    }

    pub async fn create_gl_texture_video_sink(&mut self, texture_id: u32) -> Result<(), CoreError> {
        self.engine.create_video_sink(texture_id).await
    }

    // ---- engine/track-list event plumbing ----

    pub async fn handle_engine_event(&mut self, event: crate::engine::EngineEvent) {
        use crate::engine::EngineEvent as Ev;
        match event {
            Ev::PlaybackStatusChanged(state) => self.apply_engine_state(state).await,
            Ev::AboutToFinish => {
                self.emit(SessionEvent::AboutToFinish);
                if let Err(err) = self.handle_about_to_finish().await {
                    warn!(%err, session = %self.key, "about-to-finish splice failed");
                }
            }
            Ev::EndOfStream => self.emit(SessionEvent::EndOfStream),
            Ev::SeekedTo(us) => self.emit(SessionEvent::Seeked(us)),
            Ev::ClientDisconnected => self.handle_client_disconnected().await,
            Ev::VideoDimensionChanged { width, height } => {
                self.emit(SessionEvent::VideoDimensionChanged { width, height })
            }
            Ev::Error(kind) => self.emit(SessionEvent::Error(kind.to_string())),
            Ev::BufferingChanged(pct) => self.emit(SessionEvent::Buffering(pct)),
        }
    }

    async fn apply_engine_state(&mut self, new_state: EngineState) {
        let previous = self.engine_state;
        self.previous_engine_state = previous;
        self.engine_state = new_state;

        let mut metadata = None;

        match new_state {
            EngineState::NoMedia => {
                self.playback_status = PlaybackStatus::Null;
            }
            EngineState::Ready => {
                self.playback_status = PlaybackStatus::Ready;
                if previous == EngineState::Playing {
                    self.release_wakelock().await;
                }
            }
            EngineState::Playing => {
                // Metadata is folded into the same property-change union as
                // the status, ordered first within it.
                self.metadata_for_current_track = self.engine.current_track_metadata().await;
                metadata = Some(self.metadata_for_current_track.clone());
                self.playback_status = PlaybackStatus::Playing;
                self.acquire_wakelock().await;
            }
            EngineState::Paused => {
                self.playback_status = PlaybackStatus::Paused;
                if previous == EngineState::Playing {
                    self.release_wakelock().await;
                }
            }
            EngineState::Stopped => {
                self.playback_status = PlaybackStatus::Stopped;
                if previous == EngineState::Playing {
                    self.release_wakelock().await;
                }
            }
            EngineState::Busy => return,
        }
        self.emit(SessionEvent::PlayerPropertiesChanged {
            metadata,
            playback_status: self.playback_status,
        });
    }

    pub async fn handle_track_list_event(&mut self, event: TrackListEvent) {
        match event {
            TrackListEvent::GoToTrack { id, reset } => {
                if self.go_to_lock {
                    self.go_to_lock = false;
                    return;
                }
                if let Some(track) = self.track_list.track(&id) {
                    let uri = track.uri.clone();
                    if let Err(err) = self.engine.open(&uri, None, reset).await {
                        warn!(%err, session = %self.key, "engine refused go_to_track open");
                    }
                }
            }
            TrackListEvent::EndOfTracklist => {
                if !matches!(self.engine_state, EngineState::Ready | EngineState::Stopped) {
                    if let Err(err) = self.engine.stop().await {
                        warn!(%err, session = %self.key, "engine stop on end-of-tracklist failed");
                    }
                }
            }
            _ => {}
        }
    }

    /// §4.7: locks `go_to_lock`, advances via `next()`, and — if the
    /// cursor moved — opens the new track without a pipeline reset so the
    /// backend can splice gaplessly. The lock suppresses the duplicate
    /// open that would otherwise come from `handle_track_list_event`
    /// processing the same `GoToTrack` the call to `next()` just emitted.
    async fn handle_about_to_finish(&mut self) -> Result<(), CoreError> {
        if self.abandoning {
            return Ok(());
        }
        self.go_to_lock = true;
        let Some(id) = self.track_list.next() else {
            self.go_to_lock = false;
            return Ok(());
        };
        if let Some(track) = self.track_list.track(&id) {
            let uri = track.uri.clone();
            self.engine.open(&uri, None, false).await?;
        }
        Ok(())
    }

    /// Releases every outstanding wakelock and resets the track list. The
    /// registry separately checks `is_current_player`/`lifetime` to decide
    /// whether to clear its slot and whether to destroy the session.
    pub async fn handle_client_disconnected(&mut self) {
        info!(session = %self.key, "client disconnected");
        self.release_all_wakelocks().await;
        self.track_list.reset();
    }

    /// Marks the session as being torn down: suppresses auto-advance and
    /// otherwise treats the session as if the client had died.
    pub async fn abandon(&mut self) {
        self.abandoning = true;
        self.handle_client_disconnected().await;
    }

    // ---- wakelocks ----

    async fn acquire_wakelock(&mut self) {
        let class = if self.engine.is_video_source().await {
            WakelockClass::Display
        } else {
            WakelockClass::System
        };
        match class {
            WakelockClass::Display => {
                self.display_count += 1;
                if self.display_count == 1 {
                    self.power.request_acquire_display().await;
                }
            }
            WakelockClass::System => {
                self.system_count += 1;
                if self.system_count == 1 {
                    self.power.request_acquire_system(SystemState::Active).await;
                }
            }
        }
        self.wakelock_class = Some(class);
        debug!(session = %self.key, ?class, "wakelock acquired");
    }

    async fn release_wakelock(&mut self) {
        let Some(class) = self.wakelock_class else {
            return;
        };
        match class {
            WakelockClass::Display => {
                self.display_count = self.display_count.saturating_sub(1);
                if self.display_count == 0 {
                    self.power.request_release_display(DisplayState::On);
                }
            }
            WakelockClass::System => {
                self.system_count = self.system_count.saturating_sub(1);
                if self.system_count == 0 {
                    self.power.request_release_system(SystemState::Active).await;
                }
            }
        }
    }

    async fn release_all_wakelocks(&mut self) {
        if self.display_count > 0 {
            self.display_count = 0;
            self.power.request_release_display(DisplayState::On);
        }
        if self.system_count > 0 {
            self.system_count = 0;
            self.power.request_release_system(SystemState::Active).await;
        }
        self.wakelock_class = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apparmor::DefaultUriAuthorizer;
    use crate::engine::EngineEvent;
    use crate::testing::{StubEngine, StubPowerBackend};

    fn fresh_session() -> (
        PlayerSession<Arc<StubEngine>, Arc<StubPowerBackend>>,
        Arc<StubPowerBackend>,
    ) {
        let engine = StubEngine::new();
        let backend = StubPowerBackend::new();
        let power = PowerArbiter::new(backend.clone());
        let session = PlayerSession::new(
            SessionKey::next(),
            SessionUuid::generate(),
            "com.example.peer".to_string(),
            Context::Unconfined,
            engine,
            power,
            Arc::new(DefaultUriAuthorizer::new(vec![])),
        );
        (session, backend)
    }

    #[tokio::test]
    async fn playing_publishes_metadata_and_status_as_one_event() {
        let (mut session, _backend) = fresh_session();
        session
            .engine
            .set_metadata(MetadataMap::from([(
                "xesam:title".to_string(),
                "hello".to_string(),
            )]));
        let mut rx = session.subscribe();

        session.handle_engine_event(EngineEvent::PlaybackStatusChanged(EngineState::Playing)).await;

        let only = rx.try_recv().unwrap();
        match only {
            SessionEvent::PlayerPropertiesChanged { metadata, playback_status } => {
                assert!(metadata.is_some());
                assert_eq!(playback_status, PlaybackStatus::Playing);
            }
            other => panic!("expected a coalesced PlayerPropertiesChanged, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leaving_playing_releases_system_wakelock_synchronously() {
        let (mut session, backend) = fresh_session();
        session.handle_engine_event(EngineEvent::PlaybackStatusChanged(EngineState::Playing)).await;
        assert_eq!(
            *backend.system_acquires.lock().get(&SystemState::Active).unwrap(),
            1
        );
        session.handle_engine_event(EngineEvent::PlaybackStatusChanged(EngineState::Paused)).await;
        assert_eq!(
            *backend.system_releases.lock().get(&SystemState::Active).unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn video_session_uses_display_wakelock_with_settle_delay() {
        let (mut session, backend) = fresh_session();
        session.engine.set_video_source(true);
        session.handle_engine_event(EngineEvent::PlaybackStatusChanged(EngineState::Playing)).await;
        assert_eq!(*backend.display_acquires.lock(), 1);

        session.handle_engine_event(EngineEvent::PlaybackStatusChanged(EngineState::Paused)).await;
        assert_eq!(*backend.display_releases.lock(), 0);

        tokio::time::sleep(crate::power::SETTLE_DELAY + std::time::Duration::from_millis(200)).await;
        assert_eq!(*backend.display_releases.lock(), 1);
    }

    #[tokio::test]
    async fn s6_about_to_finish_splices_without_reset() {
        let (mut session, _backend) = fresh_session();
        let t1 = session.track_list.add("u1", &TrackId::empty(), false).unwrap();
        let t2 = session.track_list.add("u2", &TrackId::empty(), false).unwrap();
        session.track_list.go_to(&t1).unwrap();
        session.handle_engine_event(EngineEvent::PlaybackStatusChanged(EngineState::Playing)).await;

        let mut rx = session.track_list.subscribe();
        session.handle_engine_event(EngineEvent::AboutToFinish).await;

        assert_eq!(session.track_list.current_id(), Some(&t2));
        let opens = session.engine.opens();
        assert_eq!(opens.last(), Some(&("u2".to_string(), false)));

        let mut changed_count = 0;
        while let Ok(ev) = rx.try_recv() {
            if let TrackListEvent::TrackChanged { id } = ev {
                if id == t2 {
                    changed_count += 1;
                }
            }
        }
        assert_eq!(changed_count, 1);
    }

    #[tokio::test]
    async fn end_of_tracklist_stops_engine_when_not_already_idle() {
        let (mut session, _backend) = fresh_session();
        session.handle_engine_event(EngineEvent::PlaybackStatusChanged(EngineState::Playing)).await;
        session.handle_track_list_event(TrackListEvent::EndOfTracklist).await;
        assert_eq!(session.engine_state, EngineState::Playing);
        assert_eq!(session.engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn client_disconnect_resets_track_list() {
        let (mut session, _backend) = fresh_session();
        session.track_list.add("u1", &TrackId::empty(), true).unwrap();
        session.handle_client_disconnected().await;
        assert!(session.track_list.is_empty());
    }

    #[tokio::test]
    async fn open_uri_with_empty_string_only_clears() {
        let (mut session, _backend) = fresh_session();
        session.track_list.add("u1", &TrackId::empty(), true).unwrap();
        session.open_uri("").await.unwrap();
        assert!(session.track_list.is_empty());
        assert_eq!(session.engine.opens().len(), 0);
    }
}
