//! media-hub-core: the session multiplexer and power/attention arbiter for a
//! per-user media playback daemon.
//!
//! This crate owns the set of live player sessions, keeps each session's state
//! machine coherent with an external [`engine::Engine`], enforces global
//! playback policy (multimedia exclusivity, call preemption, URI
//! confinement) and exposes both a per-session control surface and an
//! MPRIS-2 façade on the desktop session bus. It does not decode media,
//! render video, or persist state across restarts.

pub mod apparmor;
pub mod art_cache;
pub mod call_monitor;
pub mod config;
pub mod control_surface;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod ids;
pub mod liveness;
pub mod metadata;
pub mod output_observer;
pub mod power;
pub mod registry;
pub mod session;
pub mod testing;
pub mod track;
pub mod track_list;
pub mod types;

pub use dispatcher::DispatcherHandle;
pub use error::CoreError;
pub use ids::{SessionKey, SessionUuid, TrackId};
