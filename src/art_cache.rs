//! Embedded album-art extraction support (§4.5, §6).
//!
//! The tag extractor recognizes embedded image payloads inside a track's
//! tags and writes them out under a per-process temp directory (template
//! `media-hub_images-XXXXXX`), recording a CRC-16-CCITT over the bytes so a
//! re-extraction of the same artwork reuses the existing file (template
//! `image-XXXXXX`) instead of rewriting it; different bytes for the same
//! URI replace it. Every file this cache still tracks is removed when the
//! cache itself is dropped — the session's `Engine` instance owns one of
//! these, so tearing down a session tears down its art (§8 invariant 7).

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

use crc::{Crc, CRC_16_IBM_3740};
use tempfile::{Builder, TempDir};

/// CRC-16/CCITT-FALSE, the variant named in §4.5. No crate in the
/// reference pack computes a CRC-16 (the one CRC usage found,
/// `crc32fast`, is a different width and algorithm entirely), so this
/// reaches for the standard `crc` crate's published catalog rather than
/// hand-rolling the polynomial (see DESIGN.md).
const CRC16_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

fn process_temp_dir() -> &'static TempDir {
    static DIR: OnceLock<TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        Builder::new()
            .prefix("media-hub_images-")
            .tempdir()
            .expect("failed to create embedded-art temp directory")
    })
}

/// Content address: (CRC-16-CCITT, length in bytes). Two payloads with the
/// same size and CRC are treated as identical without comparing bytes.
type ArtKey = (u16, u64);

struct ArtEntry {
    path: PathBuf,
    refcount: usize,
}

/// Per-engine-instance cache, content-addressed by `(crc16, len)`. `ingest`
/// is keyed additionally by the owning track's URI so a second extraction
/// of the *same* URI can tell whether the artwork changed.
#[derive(Default)]
pub struct ArtCache {
    by_key: HashMap<ArtKey, ArtEntry>,
    by_uri: HashMap<String, ArtKey>,
}

impl ArtCache {
    pub fn new() -> Self {
        ArtCache::default()
    }

    /// Record `bytes` as the embedded art most recently extracted for
    /// `uri`. Reuses the on-disk file when the content is unchanged from
    /// the last call for this `uri` or matches art already cached for a
    /// different URI; writes a fresh file otherwise and drops the
    /// previous one if nothing else still references it.
    pub fn ingest(&mut self, uri: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let key = Self::key_for(bytes);

        if let Some(&previous) = self.by_uri.get(uri) {
            if previous == key {
                return Ok(self.by_key[&key].path.clone());
            }
            self.release(previous);
        }

        let path = match self.by_key.get_mut(&key) {
            Some(entry) => {
                entry.refcount += 1;
                entry.path.clone()
            }
            None => {
                let path = Self::write_new_file(bytes)?;
                self.by_key.insert(key, ArtEntry { path: path.clone(), refcount: 1 });
                path
            }
        };
        self.by_uri.insert(uri.to_string(), key);
        Ok(path)
    }

    /// Number of distinct on-disk files this cache is still tracking, for
    /// tests asserting dedup actually happened.
    pub fn live_file_count(&self) -> usize {
        self.by_key.len()
    }

    fn release(&mut self, key: ArtKey) {
        if let Some(entry) = self.by_key.get_mut(&key) {
            entry.refcount -= 1;
            if entry.refcount == 0 {
                let _ = std::fs::remove_file(&entry.path);
                self.by_key.remove(&key);
            }
        }
    }

    fn key_for(bytes: &[u8]) -> ArtKey {
        (CRC16_CCITT.checksum(bytes), bytes.len() as u64)
    }

    fn write_new_file(bytes: &[u8]) -> std::io::Result<PathBuf> {
        let dir = process_temp_dir();
        let mut tmp = Builder::new().prefix("image-").tempfile_in(dir.path())?;
        tmp.write_all(bytes)?;
        let (_file, path) = tmp.keep().map_err(|e| e.error)?;
        Ok(path)
    }
}

impl Drop for ArtCache {
    fn drop(&mut self) {
        for entry in self.by_key.values() {
            let _ = std::fs::remove_file(&entry.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_reuse_the_file() {
        let mut cache = ArtCache::new();
        let a = cache.ingest("track://a", b"cover-bytes").unwrap();
        let b = cache.ingest("track://a", b"cover-bytes").unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.live_file_count(), 1);
    }

    #[test]
    fn different_bytes_replace_and_remove_the_old_file() {
        let mut cache = ArtCache::new();
        let old = cache.ingest("track://a", b"cover-v1").unwrap();
        assert!(old.exists());
        let new = cache.ingest("track://a", b"cover-v2-longer").unwrap();
        assert_ne!(old, new);
        assert!(!old.exists());
        assert!(new.exists());
        assert_eq!(cache.live_file_count(), 1);
    }

    #[test]
    fn identical_art_across_different_uris_shares_one_file() {
        let mut cache = ArtCache::new();
        let a = cache.ingest("track://a", b"shared-cover").unwrap();
        let b = cache.ingest("track://b", b"shared-cover").unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.live_file_count(), 1);

        // Replacing only one URI's art must not remove the file the other
        // URI still references.
        cache.ingest("track://a", b"a-only-now").unwrap();
        assert!(b.exists());
        assert_eq!(cache.live_file_count(), 2);
    }

    #[test]
    fn dropping_the_cache_removes_every_remaining_file() {
        let mut cache = ArtCache::new();
        let path = cache.ingest("track://a", b"cover-bytes").unwrap();
        assert!(path.exists());
        drop(cache);
        assert!(!path.exists());
    }
}
