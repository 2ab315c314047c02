//! The single logical dispatcher required by §5: every mutation to
//! [`SessionRegistry`] happens inside this task, which drains
//! [`RegistryCommand`]s from an unbounded channel strictly in receive
//! order — that ordering guarantee is what makes "all state mutations
//! happen on the dispatcher" true by construction rather than by
//! convention.
//!
//! Grounded on the teacher's `audio::thread`/`audio::events`/`audio::handle`
//! triad: a dedicated task owns the mutable state, callers hold a cheaply
//! clonable [`DispatcherHandle`] (≅ `AudioHandle`) that sends a command and
//! returns. The one addition over the teacher's fire-and-forget commands is
//! a oneshot reply per call, needed because most operations here propagate
//! a value or an error back to the bus caller instead of only updating
//! shared state a poller can read later.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::apparmor::AppContextResolver;
use crate::call_monitor::CallEvent;
use crate::engine::Engine;
use crate::error::CoreError;
use crate::ids::{SessionKey, SessionUuid, TrackId};
use crate::metadata::MetadataMap;
use crate::output_observer::OutputState;
use crate::power::PowerBackend;
use crate::registry::SessionRegistry;
use crate::types::{AudioStreamRole, Lifetime, LoopStatus, Orientation, PlaybackStatus};

/// Everything a `ControlSurface` property getter needs for one session,
/// gathered in a single dispatcher round-trip. Pull properties
/// (`position_us`, `duration_us`, `is_video_source`, `is_audio_source`,
/// `orientation`) are queried fresh from the engine on every snapshot;
/// everything else is the session's locally shadowed value (§4.7).
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub key: SessionKey,
    pub uuid: SessionUuid,
    pub playback_status: PlaybackStatus,
    pub loop_status: LoopStatus,
    pub shuffle: bool,
    pub playback_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub volume: f64,
    pub position_us: u64,
    pub duration_us: u64,
    pub is_video_source: bool,
    pub is_audio_source: bool,
    pub orientation: Orientation,
    pub lifetime: Lifetime,
    pub audio_role: AudioStreamRole,
    pub can_play: bool,
    pub can_pause: bool,
    pub can_seek: bool,
    pub can_go_next: bool,
    pub can_go_previous: bool,
    pub metadata: MetadataMap,
    pub tracks: Vec<TrackId>,
    pub can_edit_tracks: bool,
}

pub type Reply<T> = oneshot::Sender<T>;
type CoreResult<T> = Result<T, CoreError>;

/// One entry per suspension point / mutating control operation named in
/// §5 and §4.9, plus the internal notifications (`EngineEvent`,
/// `TrackListEvent`, call/route changes, peer departure) that the
/// dispatcher processes with the same in-order guarantee.
pub enum RegistryCommand {
    CreateSession {
        owner_peer: String,
        reply: Reply<CoreResult<(SessionKey, SessionUuid)>>,
    },
    DetachSession {
        uuid: SessionUuid,
        reply: Reply<CoreResult<()>>,
    },
    ReattachSession {
        uuid: SessionUuid,
        reply: Reply<CoreResult<SessionKey>>,
    },
    DestroySession {
        uuid: SessionUuid,
        reply: Reply<CoreResult<()>>,
    },
    KeyForUuid {
        uuid: SessionUuid,
        reply: Reply<Option<SessionKey>>,
    },
    Snapshot {
        key: SessionKey,
        reply: Reply<CoreResult<SessionSnapshot>>,
    },

    OpenUri {
        key: SessionKey,
        uri: String,
        reply: Reply<CoreResult<()>>,
    },
    OpenUriExtended {
        key: SessionKey,
        uri: String,
        headers: HashMap<String, String>,
        reply: Reply<CoreResult<()>>,
    },
    Play {
        key: SessionKey,
        reply: Reply<CoreResult<()>>,
    },
    Pause {
        key: SessionKey,
        reply: Reply<CoreResult<()>>,
    },
    PlayPause {
        key: SessionKey,
        reply: Reply<CoreResult<()>>,
    },
    Stop {
        key: SessionKey,
        reply: Reply<CoreResult<()>>,
    },
    SeekTo {
        key: SessionKey,
        position_us: u64,
        reply: Reply<CoreResult<()>>,
    },
    SetPosition {
        key: SessionKey,
        track_id: TrackId,
        position_us: u64,
        reply: Reply<CoreResult<()>>,
    },
    SetVolume {
        key: SessionKey,
        volume: f64,
        reply: Reply<CoreResult<()>>,
    },
    SetAudioRole {
        key: SessionKey,
        role: AudioStreamRole,
        reply: Reply<CoreResult<()>>,
    },
    SetLifetime {
        key: SessionKey,
        lifetime: Lifetime,
        reply: Reply<CoreResult<()>>,
    },
    SetLoopStatus {
        key: SessionKey,
        status: LoopStatus,
        reply: Reply<CoreResult<()>>,
    },
    SetShuffle {
        key: SessionKey,
        shuffle: bool,
        reply: Reply<CoreResult<()>>,
    },
    Next {
        key: SessionKey,
        reply: Reply<CoreResult<()>>,
    },
    Previous {
        key: SessionKey,
        reply: Reply<CoreResult<()>>,
    },
    CreateVideoSink {
        key: SessionKey,
        texture_id: u32,
        reply: Reply<CoreResult<()>>,
    },

    AddTrack {
        key: SessionKey,
        uri: String,
        after: TrackId,
        make_current: bool,
        reply: Reply<CoreResult<TrackId>>,
    },
    AddTracks {
        key: SessionKey,
        uris: Vec<String>,
        after: TrackId,
        reply: Reply<CoreResult<Vec<TrackId>>>,
    },
    MoveTrack {
        key: SessionKey,
        id: TrackId,
        to: TrackId,
        reply: Reply<CoreResult<()>>,
    },
    RemoveTrack {
        key: SessionKey,
        id: TrackId,
        reply: Reply<CoreResult<()>>,
    },
    GoToTrack {
        key: SessionKey,
        id: TrackId,
        reply: Reply<CoreResult<()>>,
    },
    ResetTrackList {
        key: SessionKey,
        reply: Reply<CoreResult<()>>,
    },
    /// Looks up each requested id's URI directly in the track list, in the
    /// same order as `track_ids`; any id the list doesn't hold fails the
    /// whole call (§4.9 `GetTracksUri`).
    GetTracksUri {
        key: SessionKey,
        track_ids: Vec<TrackId>,
        reply: Reply<CoreResult<Vec<String>>>,
    },

    /// Lets `ControlSurface` get its own independent subscription to a
    /// session's property-change/signal stream without holding a reference
    /// to the `PlayerSession` itself — only the dispatcher task ever touches
    /// one of those directly (§5).
    SubscribeSessionEvents {
        key: SessionKey,
        reply: Reply<Option<crate::session::SessionEventReceiver>>,
    },
    SubscribeTrackListEvents {
        key: SessionKey,
        reply: Reply<Option<crate::track_list::TrackListEventReceiver>>,
    },

    PauseOtherSessions {
        key: SessionKey,
        reply: Reply<CoreResult<()>>,
    },
    SetCurrentPlayer {
        key: SessionKey,
        reply: Reply<CoreResult<()>>,
    },

    /// Forwarded from a session's own engine event stream; see
    /// `spawn_session_forwarders`.
    EngineEvent {
        key: SessionKey,
        event: crate::engine::EngineEvent,
    },
    /// Forwarded from a session's own track-list event stream.
    TrackListEvent {
        key: SessionKey,
        event: crate::track_list::TrackListEvent,
    },
    CallEvent(CallEvent),
    OutputStateChanged(OutputState),
    PeerGone {
        key: SessionKey,
    },
}

/// Cheaply clonable front for [`RegistryCommand`]. Every method sends one
/// command and awaits its reply, except the fire-and-forget notification
/// methods used by the event-forwarding tasks.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<RegistryCommand>,
}

/// Default deadline for a dispatched control operation (§5). Exceeding it
/// surfaces `CoreError::Timeout` to the caller; the request itself is not
/// rolled back and keeps running on the dispatcher.
pub const DEFAULT_DEADLINE: std::time::Duration = std::time::Duration::from_secs(1);

impl DispatcherHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> RegistryCommand,
    ) -> CoreResult<T> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(build(reply)).is_err() {
            return Err(CoreError::BackendUnavailable(
                "dispatcher is no longer running".to_string(),
            ));
        }
        match tokio::time::timeout(DEFAULT_DEADLINE, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(CoreError::BackendUnavailable(
                "dispatcher dropped the reply channel".to_string(),
            )),
            Err(_) => Err(CoreError::Timeout),
        }
    }

    fn notify(&self, command: RegistryCommand) {
        let _ = self.tx.send(command);
    }

    pub async fn create_session(&self, owner_peer: String) -> CoreResult<(SessionKey, SessionUuid)> {
        self.call(|reply| RegistryCommand::CreateSession { owner_peer, reply })
            .await?
    }

    pub async fn detach_session(&self, uuid: SessionUuid) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::DetachSession { uuid, reply }).await?
    }

    pub async fn reattach_session(&self, uuid: SessionUuid) -> CoreResult<SessionKey> {
        self.call(|reply| RegistryCommand::ReattachSession { uuid, reply }).await?
    }

    pub async fn destroy_session(&self, uuid: SessionUuid) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::DestroySession { uuid, reply }).await?
    }

    pub async fn key_for_uuid(&self, uuid: SessionUuid) -> Option<SessionKey> {
        let (reply, rx) = oneshot::channel();
        self.notify(RegistryCommand::KeyForUuid { uuid, reply });
        rx.await.ok().flatten()
    }

    pub async fn snapshot(&self, key: SessionKey) -> CoreResult<SessionSnapshot> {
        self.call(|reply| RegistryCommand::Snapshot { key, reply }).await?
    }

    pub async fn open_uri(&self, key: SessionKey, uri: String) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::OpenUri { key, uri, reply }).await?
    }

    pub async fn open_uri_extended(
        &self,
        key: SessionKey,
        uri: String,
        headers: HashMap<String, String>,
    ) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::OpenUriExtended { key, uri, headers, reply })
            .await?
    }

    pub async fn play(&self, key: SessionKey) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::Play { key, reply }).await?
    }

    pub async fn pause(&self, key: SessionKey) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::Pause { key, reply }).await?
    }

    /// MPRIS `PlayPause`: toggles exactly between `Playing` and `Paused`,
    /// or from `Ready`/`Stopped` into `Playing` (§4.9, invariant 8).
    pub async fn play_pause(&self, key: SessionKey) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::PlayPause { key, reply }).await?
    }

    pub async fn stop(&self, key: SessionKey) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::Stop { key, reply }).await?
    }

    pub async fn seek_to(&self, key: SessionKey, position_us: u64) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::SeekTo { key, position_us, reply }).await?
    }

    pub async fn set_position(
        &self,
        key: SessionKey,
        track_id: TrackId,
        position_us: u64,
    ) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::SetPosition { key, track_id, position_us, reply })
            .await?
    }

    pub async fn set_volume(&self, key: SessionKey, volume: f64) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::SetVolume { key, volume, reply }).await?
    }

    pub async fn set_audio_role(&self, key: SessionKey, role: AudioStreamRole) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::SetAudioRole { key, role, reply }).await?
    }

    pub async fn set_lifetime(&self, key: SessionKey, lifetime: Lifetime) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::SetLifetime { key, lifetime, reply }).await?
    }

    pub async fn set_loop_status(&self, key: SessionKey, status: LoopStatus) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::SetLoopStatus { key, status, reply }).await?
    }

    pub async fn set_shuffle(&self, key: SessionKey, shuffle: bool) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::SetShuffle { key, shuffle, reply }).await?
    }

    pub async fn next(&self, key: SessionKey) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::Next { key, reply }).await?
    }

    pub async fn previous(&self, key: SessionKey) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::Previous { key, reply }).await?
    }

    pub async fn create_video_sink(&self, key: SessionKey, texture_id: u32) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::CreateVideoSink { key, texture_id, reply })
            .await?
    }

    pub async fn add_track(
        &self,
        key: SessionKey,
        uri: String,
        after: TrackId,
        make_current: bool,
    ) -> CoreResult<TrackId> {
        self.call(|reply| RegistryCommand::AddTrack { key, uri, after, make_current, reply })
            .await?
    }

    pub async fn add_tracks(
        &self,
        key: SessionKey,
        uris: Vec<String>,
        after: TrackId,
    ) -> CoreResult<Vec<TrackId>> {
        self.call(|reply| RegistryCommand::AddTracks { key, uris, after, reply }).await?
    }

    pub async fn move_track(&self, key: SessionKey, id: TrackId, to: TrackId) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::MoveTrack { key, id, to, reply }).await?
    }

    pub async fn remove_track(&self, key: SessionKey, id: TrackId) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::RemoveTrack { key, id, reply }).await?
    }

    pub async fn go_to_track(&self, key: SessionKey, id: TrackId) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::GoToTrack { key, id, reply }).await?
    }

    pub async fn reset_track_list(&self, key: SessionKey) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::ResetTrackList { key, reply }).await?
    }

    pub async fn get_tracks_uri(&self, key: SessionKey, track_ids: Vec<TrackId>) -> CoreResult<Vec<String>> {
        self.call(|reply| RegistryCommand::GetTracksUri { key, track_ids, reply }).await?
    }

    pub async fn subscribe_session_events(
        &self,
        key: SessionKey,
    ) -> Option<crate::session::SessionEventReceiver> {
        let (reply, rx) = oneshot::channel();
        self.notify(RegistryCommand::SubscribeSessionEvents { key, reply });
        rx.await.ok().flatten()
    }

    pub async fn subscribe_track_list_events(
        &self,
        key: SessionKey,
    ) -> Option<crate::track_list::TrackListEventReceiver> {
        let (reply, rx) = oneshot::channel();
        self.notify(RegistryCommand::SubscribeTrackListEvents { key, reply });
        rx.await.ok().flatten()
    }

    pub async fn pause_other_sessions(&self, key: SessionKey) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::PauseOtherSessions { key, reply }).await?
    }

    pub async fn set_current_player(&self, key: SessionKey) -> CoreResult<()> {
        self.call(|reply| RegistryCommand::SetCurrentPlayer { key, reply }).await?
    }

    pub(crate) fn notify_engine_event(&self, key: SessionKey, event: crate::engine::EngineEvent) {
        self.notify(RegistryCommand::EngineEvent { key, event });
    }

    pub(crate) fn notify_track_list_event(
        &self,
        key: SessionKey,
        event: crate::track_list::TrackListEvent,
    ) {
        self.notify(RegistryCommand::TrackListEvent { key, event });
    }

    pub fn notify_call_event(&self, event: CallEvent) {
        self.notify(RegistryCommand::CallEvent(event));
    }

    pub fn notify_output_state_changed(&self, state: OutputState) {
        self.notify(RegistryCommand::OutputStateChanged(state));
    }

    pub fn notify_peer_gone(&self, key: SessionKey) {
        self.notify(RegistryCommand::PeerGone { key });
    }
}

/// Spawns the dispatcher task and returns a handle to it. The task owns
/// `registry` exclusively for the rest of the process's life and
/// processes `RegistryCommand`s strictly in the order they were sent.
pub fn spawn<E, B, R>(mut registry: SessionRegistry<E, B, R>) -> DispatcherHandle
where
    E: Engine,
    B: PowerBackend,
    R: AppContextResolver,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<RegistryCommand>();
    let handle = DispatcherHandle { tx };
    let handle_for_task = handle.clone();

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            handle_command(&mut registry, &handle_for_task, command).await;
        }
        debug!("dispatcher channel closed, shutting down");
    });

    handle
}

/// Subscribes to a freshly created session's engine and track-list event
/// streams and forwards every event back onto the dispatcher channel, so
/// it is processed with the same in-order, single-owner guarantee as any
/// client-originated command (§5).
pub fn spawn_session_forwarders(
    handle: DispatcherHandle,
    key: SessionKey,
    mut engine_events: crate::engine::EngineEventReceiver,
    mut track_list_events: crate::track_list::TrackListEventReceiver,
) {
    let engine_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            match engine_events.recv().await {
                Ok(event) => engine_handle.notify_engine_event(key, event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(session = %key, skipped = n, "engine event forwarder lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::spawn(async move {
        loop {
            match track_list_events.recv().await {
                Ok(event) => handle.notify_track_list_event(key, event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(session = %key, skipped = n, "track list event forwarder lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn snapshot_of<E: Engine, B: PowerBackend, R: AppContextResolver>(
    registry: &SessionRegistry<E, B, R>,
    key: SessionKey,
) -> CoreResult<SessionSnapshot> {
    let session = registry
        .get(key)
        .ok_or(CoreError::NotFound(crate::error::NotFoundKind::Session))?;
    Ok(SessionSnapshot {
        key,
        uuid: session.uuid().clone(),
        playback_status: session.playback_status(),
        loop_status: session.loop_status(),
        shuffle: session.shuffle(),
        playback_rate: session.playback_rate(),
        min_rate: session.min_rate(),
        max_rate: session.max_rate(),
        volume: session.volume(),
        position_us: session.position_us().await,
        duration_us: session.duration_us().await,
        is_video_source: session.is_video_source().await,
        is_audio_source: session.is_audio_source().await,
        orientation: session.orientation().await,
        lifetime: session.lifetime(),
        audio_role: session.audio_role(),
        can_play: session.can_play(),
        can_pause: session.can_pause(),
        can_seek: session.can_seek(),
        can_go_next: session.can_go_next(),
        can_go_previous: session.can_go_previous(),
        metadata: session.metadata_for_current_track().clone(),
        tracks: session.track_list().tracks(),
        can_edit_tracks: session.track_list().can_edit(),
    })
}

async fn handle_command<E, B, R>(
    registry: &mut SessionRegistry<E, B, R>,
    handle: &DispatcherHandle,
    command: RegistryCommand,
) where
    E: Engine,
    B: PowerBackend,
    R: AppContextResolver,
{
    match command {
        RegistryCommand::CreateSession { owner_peer, reply } => {
            let result = registry.create_session(owner_peer).await;
            if let Ok((key, _)) = &result {
                if let Some(session) = registry.get(*key) {
                    spawn_session_forwarders(
                        handle.clone(),
                        *key,
                        session.engine_events(),
                        session.track_list_events(),
                    );
                }
            }
            let _ = reply.send(result);
        }
        RegistryCommand::DetachSession { reply, .. } => {
            // Detaching does not remove the session; it only tells the
            // control surface to drop its bus object while the session
            // keeps running. The registry has nothing to do here.
            let _ = reply.send(Ok(()));
        }
        RegistryCommand::ReattachSession { uuid, reply } => {
            let _ = reply.send(registry.reattach_session(&uuid));
        }
        RegistryCommand::DestroySession { uuid, reply } => {
            let _ = reply.send(registry.destroy_session(&uuid));
        }
        RegistryCommand::KeyForUuid { uuid, reply } => {
            let _ = reply.send(registry.key_for_uuid(&uuid));
        }
        RegistryCommand::Snapshot { key, reply } => {
            let _ = reply.send(snapshot_of(registry, key).await);
        }

        RegistryCommand::OpenUri { key, uri, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => session.open_uri(&uri).await,
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::OpenUriExtended { key, uri, headers, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => session.open_uri_extended(&uri, headers).await,
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::Play { key, reply } => {
            let _ = reply.send(registry.play(key).await);
        }
        RegistryCommand::Pause { key, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => session.pause().await,
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::PlayPause { key, reply } => {
            let result = match registry.get(key).map(|s| s.playback_status()) {
                Some(status) if status.is_playing() => match registry.get_mut(key) {
                    Some(session) => session.pause().await,
                    None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
                },
                Some(_) => registry.play(key).await,
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::Stop { key, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => session.stop().await,
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::SeekTo { key, position_us, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => session.seek_to(position_us).await,
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::SetPosition { key, position_us, reply, .. } => {
            // `track_id` is accepted for MPRIS wire compatibility but, per
            // the upstream contract, a mismatch against the current track
            // is not itself an error; the engine is simply asked to seek.
            let result = match registry.get_mut(key) {
                Some(session) => session.seek_to(position_us).await,
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::SetVolume { key, volume, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => session.set_volume(volume).await,
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::SetAudioRole { key, role, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => {
                    session.set_audio_role(role);
                    Ok(())
                }
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::SetLifetime { key, lifetime, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => {
                    session.set_lifetime(lifetime);
                    Ok(())
                }
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::SetLoopStatus { key, status, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => {
                    session.set_loop_status(status);
                    Ok(())
                }
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::SetShuffle { key, shuffle, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => {
                    session.set_shuffle(shuffle);
                    Ok(())
                }
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::Next { key, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => {
                    session.next();
                    Ok(())
                }
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::Previous { key, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => {
                    let position = session.position_us().await;
                    session.previous(position);
                    Ok(())
                }
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::CreateVideoSink { key, texture_id, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => session.create_gl_texture_video_sink(texture_id).await,
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }

        RegistryCommand::AddTrack { key, uri, after, make_current, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => session.track_list_mut().add(&uri, &after, make_current),
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::AddTracks { key, uris, after, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => session.track_list_mut().add_many(&uris, &after),
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::MoveTrack { key, id, to, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => session.track_list_mut().move_track(&id, &to),
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::RemoveTrack { key, id, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => session.track_list_mut().remove(&id),
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::GoToTrack { key, id, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => session.track_list_mut().go_to(&id),
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::ResetTrackList { key, reply } => {
            let result = match registry.get_mut(key) {
                Some(session) => {
                    session.track_list_mut().reset();
                    Ok(())
                }
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }
        RegistryCommand::GetTracksUri { key, track_ids, reply } => {
            let result = match registry.get(key) {
                Some(session) => track_ids
                    .iter()
                    .map(|id| {
                        session
                            .track_list()
                            .track(id)
                            .map(|t| t.uri.clone())
                            .ok_or(CoreError::NotFound(crate::error::NotFoundKind::Track))
                    })
                    .collect::<CoreResult<Vec<String>>>(),
                None => Err(CoreError::NotFound(crate::error::NotFoundKind::Session)),
            };
            let _ = reply.send(result);
        }

        RegistryCommand::SubscribeSessionEvents { key, reply } => {
            let _ = reply.send(registry.get(key).map(|s| s.subscribe()));
        }
        RegistryCommand::SubscribeTrackListEvents { key, reply } => {
            let _ = reply.send(registry.get(key).map(|s| s.track_list().subscribe()));
        }

        RegistryCommand::PauseOtherSessions { key, reply } => {
            registry.pause_other_multimedia_sessions_pub(key).await;
            let _ = reply.send(Ok(()));
        }
        RegistryCommand::SetCurrentPlayer { key, reply } => {
            registry.set_current_player(key);
            let _ = reply.send(Ok(()));
        }

        RegistryCommand::EngineEvent { key, event } => {
            if let Some(session) = registry.get_mut(key) {
                session.handle_engine_event(event).await;
            }
        }
        RegistryCommand::TrackListEvent { key, event } => {
            if let Some(session) = registry.get_mut(key) {
                session.handle_track_list_event(event).await;
            }
        }
        RegistryCommand::CallEvent(CallEvent::OffHook) => {
            registry.handle_off_hook().await;
        }
        RegistryCommand::CallEvent(CallEvent::OnHook) => {
            // The resume rule needs the *current* audio route; the
            // registry is handed the last one the control surface saw
            // rather than querying the observer itself, keeping
            // `SessionRegistry` free of a dependency on `OutputObserver`.
            let output_state = registry.last_known_output_state();
            registry.handle_on_hook(output_state).await;
        }
        RegistryCommand::OutputStateChanged(state) => {
            registry.set_last_known_output_state(state);
        }
        RegistryCommand::PeerGone { key } => {
            registry.handle_client_disconnected(key).await;
        }
    }
}
