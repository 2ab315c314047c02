//! Small wire-adjacent enums shared by the track list, session, and engine
//! contracts.
//!
//! Grounded on the teacher's `platform::media_controls` "common types, all
//! platforms" section: plain enums with an explicit wire mapping kept next
//! to the type rather than scattered at each call site.

use std::fmt;

/// `org.mpris.MediaPlayer2.Player.LoopStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopStatus {
    #[default]
    None,
    Track,
    Playlist,
}

impl LoopStatus {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            LoopStatus::None => "None",
            LoopStatus::Track => "Track",
            LoopStatus::Playlist => "Playlist",
        }
    }
}

impl LoopStatus {
    /// Unrecognized strings fall back to `None` rather than erroring — the
    /// same leniency MPRIS clients expect from real players.
    pub fn from_wire_str(s: &str) -> Self {
        match s {
            "Track" => LoopStatus::Track,
            "Playlist" => LoopStatus::Playlist,
            _ => LoopStatus::None,
        }
    }
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire_str())
    }
}

/// Client-facing playback status. `Null`/`Ready` both collapse to the wire
/// string `"Stopped"` — MPRIS has no concept of either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Null,
    Ready,
    Playing,
    Paused,
    Stopped,
}

impl PlaybackStatus {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            PlaybackStatus::Playing => "Playing",
            PlaybackStatus::Paused => "Paused",
            PlaybackStatus::Null | PlaybackStatus::Ready | PlaybackStatus::Stopped => "Stopped",
        }
    }

    pub fn is_playing(self) -> bool {
        matches!(self, PlaybackStatus::Playing)
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire_str())
    }
}

/// Numeric on the wire: `{alarm=0, alert=1, multimedia=2, phone=3}`. Only
/// `Multimedia` participates in single-audible-player exclusivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioStreamRole {
    Alarm,
    Alert,
    #[default]
    Multimedia,
    Phone,
}

impl AudioStreamRole {
    pub fn as_wire_i16(self) -> i16 {
        match self {
            AudioStreamRole::Alarm => 0,
            AudioStreamRole::Alert => 1,
            AudioStreamRole::Multimedia => 2,
            AudioStreamRole::Phone => 3,
        }
    }

    pub fn is_multimedia(self) -> bool {
        matches!(self, AudioStreamRole::Multimedia)
    }

    pub fn from_wire_i16(v: i16) -> Self {
        match v {
            0 => AudioStreamRole::Alarm,
            1 => AudioStreamRole::Alert,
            3 => AudioStreamRole::Phone,
            _ => AudioStreamRole::Multimedia,
        }
    }
}

/// Video rotation in degrees, numeric `{0, 90, 180, 270}` as int16 on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    pub fn as_wire_i16(self) -> i16 {
        match self {
            Orientation::Deg0 => 0,
            Orientation::Deg90 => 90,
            Orientation::Deg180 => 180,
            Orientation::Deg270 => 270,
        }
    }
}

/// `{normal=0, resumable=1}`. A `resumable` session survives its owner
/// disconnecting; a `normal` one is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifetime {
    #[default]
    Normal,
    Resumable,
}

impl Lifetime {
    pub fn as_wire_i16(self) -> i16 {
        match self {
            Lifetime::Normal => 0,
            Lifetime::Resumable => 1,
        }
    }

    pub fn is_resumable(self) -> bool {
        matches!(self, Lifetime::Resumable)
    }

    pub fn from_wire_i16(v: i16) -> Self {
        match v {
            1 => Lifetime::Resumable,
            _ => Lifetime::Normal,
        }
    }
}
