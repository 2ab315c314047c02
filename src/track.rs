//! A single playable entry in a [`crate::track_list::TrackList`].

use crate::ids::TrackId;
use crate::metadata::MetadataMap;

/// `{ id, uri, metadata }` — metadata is populated lazily from the engine's
/// tag extractor and starts empty at insertion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: TrackId,
    pub uri: String,
    pub metadata: MetadataMap,
}

impl Track {
    pub fn new(id: TrackId, uri: impl Into<String>) -> Self {
        Track {
            id,
            uri: uri.into(),
            metadata: MetadataMap::new(),
        }
    }
}
