//! The `Engine` capability: the core's contract with a replaceable media
//! backend (GStreamer-class). Only the operations and events named here are
//! assumed; any backend satisfying this trait is acceptable.
//!
//! Command/event naming mirrors the teacher's audio-thread split
//! (`audio::events::{AudioCommand, AudioEvent}`): requests flow one way,
//! status flows back the other, and nothing blocks the caller beyond the
//! acceptance of a request.

use std::collections::HashMap;

use tokio::sync::broadcast;

use crate::error::CoreError;
use crate::metadata::MetadataMap;
use crate::types::{AudioStreamRole, Lifetime, Orientation};

/// Mirrors `Engine::engine_state` — the pipeline's own state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    NoMedia,
    Ready,
    Busy,
    Playing,
    Paused,
    Stopped,
}

/// Engine-originated errors. `OutOfProcessBufferStreamingNotSupported` is
/// the one variant the core branches on directly (§4.7); everything else is
/// an opaque backend message surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineErrorKind {
    OutOfProcessBufferStreamingNotSupported,
    Backend(String),
}

impl std::fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineErrorKind::OutOfProcessBufferStreamingNotSupported => {
                write!(f, "out-of-process buffer streaming is not supported")
            }
            EngineErrorKind::Backend(msg) => write!(f, "{msg}"),
        }
    }
}

/// Events the engine raises asynchronously. Delivered in order for a given
/// engine instance (§5 Ordering).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    AboutToFinish,
    EndOfStream,
    SeekedTo(u64),
    ClientDisconnected,
    PlaybackStatusChanged(EngineState),
    VideoDimensionChanged { width: u32, height: u32 },
    Error(EngineErrorKind),
    BufferingChanged(u8),
}

pub type EngineEventReceiver = broadcast::Receiver<EngineEvent>;

/// The capability a `PlayerSession` drives. All mutating operations return
/// synchronously on the *acceptance* of the request, not on the pipeline
/// reaching the requested state — later state changes arrive as
/// [`EngineEvent::PlaybackStatusChanged`].
pub trait Engine: Send + Sync + 'static {
    /// Prepare the pipeline for `uri`. Idempotent with respect to setting
    /// the current URI. `reset = false` asks the backend to splice without
    /// tearing the pipeline down (used by the about-to-finish gapless path).
    fn open(
        &self,
        uri: &str,
        headers: Option<&HashMap<String, String>>,
        reset: bool,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;

    fn play(&self) -> impl Future<Output = Result<(), CoreError>> + Send;
    fn pause(&self) -> impl Future<Output = Result<(), CoreError>> + Send;
    fn stop(&self) -> impl Future<Output = Result<(), CoreError>> + Send;
    fn seek_to(&self, position_us: u64) -> impl Future<Output = Result<(), CoreError>> + Send;

    fn set_volume(&self, volume: f64) -> impl Future<Output = Result<(), CoreError>> + Send;
    fn set_audio_role(
        &self,
        role: AudioStreamRole,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;
    fn set_lifetime(
        &self,
        lifetime: Lifetime,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;

    /// May fail with `EngineErrorKind::OutOfProcessBufferStreamingNotSupported`.
    fn create_video_sink(
        &self,
        texture_id: u32,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;

    /// Pull properties: each read queries the backend directly, never a
    /// locally shadowed value (§4.7 property back-pressure).
    fn position_us(&self) -> impl Future<Output = u64> + Send;
    fn duration_us(&self) -> impl Future<Output = u64> + Send;
    fn is_video_source(&self) -> impl Future<Output = bool> + Send;
    fn is_audio_source(&self) -> impl Future<Output = bool> + Send;
    fn orientation(&self) -> impl Future<Output = Orientation> + Send;
    fn current_track_metadata(&self) -> impl Future<Output = MetadataMap> + Send;

    /// May block; may fail. Distinct from `current_track_metadata` because
    /// a `TrackList` calls this proactively for tracks that are not yet
    /// current (§4.6 `add`/`add_many`).
    fn extract_metadata(
        &self,
        uri: &str,
    ) -> impl Future<Output = Result<MetadataMap, CoreError>> + Send;

    /// The engine's own state, last observed. Cheap and synchronous —
    /// real backends cache this locally and update it on every
    /// `PlaybackStatusChanged` event.
    fn state(&self) -> EngineState;

    /// Subscribe to this engine instance's event stream. Each call returns
    /// an independent receiver; events are broadcast to all subscribers.
    fn subscribe(&self) -> EngineEventReceiver;
}
