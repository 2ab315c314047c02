//! The MPRIS/xesam metadata vocabulary.
//!
//! A `Track`'s metadata is a loose `Map<String, String>` (per the data
//! model) so it survives round-tripping through an engine tag extractor
//! that may not know every key in advance. This module gives the
//! well-known keys typed accessors that coerce from the string form on
//! read, the same shape the teacher uses for its loosely-typed database
//! rows (`database::models`) — a typed view over a string-keyed surface,
//! not a second copy of the data.

use std::collections::HashMap;

pub const TRACKID: &str = "mpris:trackid";
pub const LENGTH: &str = "mpris:length";
pub const ART_URL: &str = "mpris:artUrl";
pub const ALBUM: &str = "xesam:album";
pub const ALBUM_ARTIST: &str = "xesam:albumArtist";
pub const ARTIST: &str = "xesam:artist";
pub const TITLE: &str = "xesam:title";
pub const TRACK_NUMBER: &str = "xesam:trackNumber";
pub const DISC_NUMBER: &str = "xesam:discNumber";
pub const GENRE: &str = "xesam:genre";
pub const COMMENT: &str = "xesam:comment";
pub const COMPOSER: &str = "xesam:composer";
pub const CONTENT_CREATED: &str = "xesam:contentCreated";
pub const LAST_USED: &str = "xesam:lastUsed";
pub const USER_RATING: &str = "xesam:userRating";
pub const AUTO_RATING: &str = "xesam:autoRating";
pub const AS_TEXT: &str = "xesam:asText";
pub const AUDIO_BPM: &str = "xesam:audioBpm";
pub const URL: &str = "xesam:url";

/// Private extensions: present and `"true"` when the extractor discovered
/// embedded album art for the current / a preview track.
pub const TAG_IMAGE: &str = "tag:image";
pub const TAG_PREVIEW_IMAGE: &str = "tag:previewImage";

/// Backend tag name → MPRIS key, the fixed mapping the extractor applies
/// (carried over from `gstreamer/meta_data_support.cpp`'s table in the
/// original implementation).
pub const BACKEND_TAG_MAP: &[(&str, &str)] = &[
    ("title", TITLE),
    ("album", ALBUM),
    ("artist", ARTIST),
    ("album-artist", ALBUM_ARTIST),
    ("genre", GENRE),
    ("comment", COMMENT),
    ("composer", COMPOSER),
    ("datetime", CONTENT_CREATED),
    ("track-count", TRACK_NUMBER),
    ("track-number", TRACK_NUMBER),
    ("album-disc-number", DISC_NUMBER),
    ("beats-per-minute", AUDIO_BPM),
];

pub type MetadataMap = HashMap<String, String>;

/// `mpris:length`, parsed from the stored string as microseconds.
pub fn length_us(meta: &MetadataMap) -> Option<i64> {
    meta.get(LENGTH).and_then(|v| v.parse().ok())
}

pub fn set_length_us(meta: &mut MetadataMap, us: i64) {
    meta.insert(LENGTH.to_string(), us.to_string());
}

pub fn art_url(meta: &MetadataMap) -> Option<&str> {
    meta.get(ART_URL).map(String::as_str)
}

pub fn title(meta: &MetadataMap) -> Option<&str> {
    meta.get(TITLE).map(String::as_str)
}

pub fn album(meta: &MetadataMap) -> Option<&str> {
    meta.get(ALBUM).map(String::as_str)
}

pub fn artist(meta: &MetadataMap) -> Option<&str> {
    meta.get(ARTIST).map(String::as_str)
}

pub fn has_embedded_art(meta: &MetadataMap) -> bool {
    meta.get(TAG_IMAGE).is_some_and(|v| v == "true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_round_trips() {
        let mut m = MetadataMap::new();
        set_length_us(&mut m, 123_456_789);
        assert_eq!(length_us(&m), Some(123_456_789));
    }

    #[test]
    fn missing_keys_are_none() {
        let m = MetadataMap::new();
        assert_eq!(title(&m), None);
        assert!(!has_embedded_art(&m));
    }
}
