//! An ordered collection of tracks with a current cursor (§4.6).
//!
//! Authorization is injected at construction (a `TrackList` is created with
//! its owning session's already-resolved [`Context`](crate::apparmor::Context)
//! and a shared [`UriAuthorizer`]) so insertion methods can enforce it
//! without reaching back into the session. Everything else is plain,
//! synchronous, in-memory bookkeeping — the command/event split the rest of
//! this crate uses is unnecessary here because no operation can block.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::broadcast;

use crate::apparmor::{Context, UriAuthorizer};
use crate::error::{CoreError, NotFoundKind};
use crate::ids::TrackId;
use crate::track::Track;
use crate::types::LoopStatus;

const PREVIOUS_RESTART_THRESHOLD_US: u64 = 5_000_000;

/// Change notifications. Exactly one is emitted per logical mutation, plus
/// a `TrackChanged`/`GoToTrack` pair whenever the cursor ends up pointing
/// somewhere new — the owning `PlayerSession` turns `GoToTrack` into an
/// `engine.open` call (§4.6, §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackListEvent {
    TrackAdded { id: TrackId, after: TrackId },
    TracksAdded { first: TrackId, last: TrackId },
    TrackMoved { id: TrackId, to: TrackId },
    TrackRemoved { id: TrackId },
    TrackListReplaced,
    TrackListReset,
    /// The cursor now points at a different track than before.
    TrackChanged { id: TrackId },
    /// The owning session should ask the engine to open this track's URI.
    /// `reset = false` on the about-to-finish splice path.
    GoToTrack { id: TrackId, reset: bool },
    /// No successor/predecessor and no loop policy covers it.
    EndOfTracklist,
}

pub type TrackListEventReceiver = broadcast::Receiver<TrackListEvent>;

pub struct TrackList {
    session_key: crate::ids::SessionKey,
    identity: Context,
    authorizer: Arc<dyn UriAuthorizer>,
    by_id: HashMap<TrackId, Track>,
    order: Vec<TrackId>,
    original_order: Vec<TrackId>,
    cursor: Option<usize>,
    can_edit: bool,
    loop_status: LoopStatus,
    shuffle: bool,
    events: broadcast::Sender<TrackListEvent>,
}

impl TrackList {
    pub fn new(
        session_key: crate::ids::SessionKey,
        identity: Context,
        authorizer: Arc<dyn UriAuthorizer>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        TrackList {
            session_key,
            identity,
            authorizer,
            by_id: HashMap::new(),
            order: Vec::new(),
            original_order: Vec::new(),
            cursor: None,
            can_edit: true,
            loop_status: LoopStatus::None,
            shuffle: false,
            events,
        }
    }

    pub fn subscribe(&self) -> TrackListEventReceiver {
        self.events.subscribe()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn can_edit(&self) -> bool {
        self.can_edit
    }

    pub fn loop_status(&self) -> LoopStatus {
        self.loop_status
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.shuffle
    }

    pub fn tracks(&self) -> Vec<TrackId> {
        self.order.clone()
    }

    pub fn track(&self, id: &TrackId) -> Option<&Track> {
        self.by_id.get(id)
    }

    pub fn track_mut(&mut self, id: &TrackId) -> Option<&mut Track> {
        self.by_id.get_mut(id)
    }

    pub fn current(&self) -> Option<&Track> {
        self.cursor.and_then(|i| self.order.get(i)).and_then(|id| self.by_id.get(id))
    }

    pub fn current_id(&self) -> Option<&TrackId> {
        self.cursor.and_then(|i| self.order.get(i))
    }

    /// Non-mutating forecast of whether `next()` would move the cursor,
    /// for `PlayerSession::can_go_next` — loop policy makes any non-empty
    /// list answer `true` regardless of cursor position.
    pub fn has_next(&self) -> bool {
        if self.order.is_empty() {
            return false;
        }
        if self.loop_status != LoopStatus::None {
            return true;
        }
        matches!(self.cursor, Some(c) if c + 1 < self.order.len())
    }

    /// Non-mutating forecast of whether `previous()` would move the
    /// cursor, for `PlayerSession::can_go_previous`.
    pub fn has_previous(&self) -> bool {
        if self.order.is_empty() {
            return false;
        }
        if self.loop_status != LoopStatus::None {
            return true;
        }
        matches!(self.cursor, Some(c) if c > 0)
    }

    fn emit(&self, event: TrackListEvent) {
        let _ = self.events.send(event);
    }

    fn position_of(&self, id: &TrackId) -> Option<usize> {
        self.order.iter().position(|t| t == id)
    }

    /// Re-point the cursor at `id`'s current index (if it still exists),
    /// else at whatever now occupies the old index, else `None`. Keeps the
    /// "cursor continues to refer to the same TrackId" invariant across
    /// arbitrary mutation.
    fn relocate_cursor(&mut self, previously_current: Option<TrackId>) {
        self.cursor = match previously_current {
            Some(id) => self
                .position_of(&id)
                .or(self.cursor.filter(|&i| i < self.order.len())),
            None => None,
        };
    }

    /// Insert a single track after `after` (or append when `after` is the
    /// empty-track sentinel). Returns the new track's id.
    pub fn add(
        &mut self,
        uri: &str,
        after: &TrackId,
        make_current: bool,
    ) -> Result<TrackId, CoreError> {
        let (ok, reason) = self.authorizer.authorize(&self.identity, uri);
        if !ok {
            return Err(CoreError::Authorization(reason));
        }

        let was_empty = self.is_empty();
        let previously_current = self.current_id().cloned();

        let id = self.insert_at(uri, after);
        self.relocate_cursor(previously_current);
        self.emit(TrackListEvent::TrackAdded {
            id: id.clone(),
            after: after.clone(),
        });

        if make_current && was_empty {
            self.go_to(&id)?;
        }
        Ok(id)
    }

    /// Insert all of `uris` in order after `after`. Any authorization
    /// failure aborts the whole batch, leaving the list unchanged.
    pub fn add_many(&mut self, uris: &[String], after: &TrackId) -> Result<Vec<TrackId>, CoreError> {
        for uri in uris {
            let (ok, reason) = self.authorizer.authorize(&self.identity, uri);
            if !ok {
                return Err(CoreError::Authorization(reason));
            }
        }

        let was_empty = self.is_empty();
        let previously_current = self.current_id().cloned();

        let mut cursor_after = after.clone();
        let mut inserted = Vec::with_capacity(uris.len());
        for uri in uris {
            let id = self.insert_at(uri, &cursor_after);
            cursor_after = id.clone();
            inserted.push(id);
        }
        self.relocate_cursor(previously_current);

        if let (Some(first), Some(last)) = (inserted.first(), inserted.last()) {
            self.emit(TrackListEvent::TracksAdded {
                first: first.clone(),
                last: last.clone(),
            });
        }

        if was_empty {
            if let Some(first) = inserted.first() {
                self.go_to(first)?;
            }
        }
        Ok(inserted)
    }

    fn insert_at(&mut self, uri: &str, after: &TrackId) -> TrackId {
        let id = TrackId::generate(self.session_key);
        let track = Track::new(id.clone(), uri);
        self.by_id.insert(id.clone(), track);

        if after.is_empty() {
            self.order.push(id.clone());
        } else if let Some(pos) = self.position_of(after) {
            self.order.insert(pos + 1, id.clone());
        } else {
            self.order.push(id.clone());
        }
        // `original_order` is only meaningful as the pre-shuffle snapshot
        // taken by `set_shuffle(true)`; a track added while shuffled is
        // simply appended to it so unshuffling doesn't drop it.
        self.original_order.push(id.clone());
        id
    }

    /// Move `id` to the position currently occupied by `to`.
    pub fn move_track(&mut self, id: &TrackId, to: &TrackId) -> Result<(), CoreError> {
        let from_pos = self
            .position_of(id)
            .ok_or(CoreError::NotFound(NotFoundKind::MoveSource))?;
        let to_pos = self
            .position_of(to)
            .ok_or(CoreError::NotFound(NotFoundKind::MoveDest))?;

        let previously_current = self.current_id().cloned();
        let moved = self.order.remove(from_pos);
        // `to_pos` was a valid index into the pre-removal array (0..=old_len-1);
        // after removing one element it's a valid insert position into the
        // shortened array (0..=new_len), so no index adjustment is needed —
        // this is what makes `id` land exactly where `to` used to be.
        self.order.insert(to_pos, moved);
        self.relocate_cursor(previously_current);

        self.emit(TrackListEvent::TrackMoved {
            id: id.clone(),
            to: to.clone(),
        });
        Ok(())
    }

    /// Remove `id`. If it was current, the cursor advances per loop policy.
    pub fn remove(&mut self, id: &TrackId) -> Result<(), CoreError> {
        let pos = self
            .position_of(id)
            .ok_or(CoreError::NotFound(NotFoundKind::Track))?;
        let was_current = self.cursor == Some(pos);
        let previously_current = self.current_id().cloned();

        self.order.remove(pos);
        self.original_order.retain(|t| t != id);
        self.by_id.remove(id);
        self.emit(TrackListEvent::TrackRemoved { id: id.clone() });

        if !was_current {
            self.relocate_cursor(previously_current);
            return Ok(());
        }

        if self.order.is_empty() {
            self.cursor = None;
            return Ok(());
        }

        // The removed element's slot is now occupied by its successor (or
        // wraps per loop policy — preserving the original's behavior of
        // wrapping to index 0 and asking the engine to play it, §9).
        let new_index = if pos < self.order.len() {
            pos
        } else if self.loop_status == LoopStatus::Playlist {
            0
        } else {
            self.order.len() - 1
        };
        self.cursor = Some(new_index);
        let new_id = self.order[new_index].clone();
        self.emit(TrackListEvent::TrackChanged { id: new_id.clone() });
        self.emit(TrackListEvent::GoToTrack {
            id: new_id,
            reset: true,
        });
        Ok(())
    }

    /// Set the cursor to `id` and request the engine open its URI.
    pub fn go_to(&mut self, id: &TrackId) -> Result<(), CoreError> {
        let pos = self
            .position_of(id)
            .ok_or(CoreError::NotFound(NotFoundKind::Track))?;
        self.cursor = Some(pos);
        self.emit(TrackListEvent::TrackChanged { id: id.clone() });
        self.emit(TrackListEvent::GoToTrack {
            id: id.clone(),
            reset: true,
        });
        Ok(())
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        if shuffle == self.shuffle {
            return;
        }
        self.shuffle = shuffle;
        let previously_current = self.current_id().cloned();

        if shuffle {
            self.original_order = self.order.clone();
            let mut rng = rand::rng();
            self.order.shuffle(&mut rng);
        } else {
            self.order = self.original_order.clone();
        }
        self.relocate_cursor(previously_current);
        self.emit(TrackListEvent::TrackListReplaced);
    }

    pub fn set_loop_status(&mut self, status: LoopStatus) {
        self.loop_status = status;
    }

    pub fn reset(&mut self) {
        self.by_id.clear();
        self.order.clear();
        self.original_order.clear();
        self.cursor = None;
        self.emit(TrackListEvent::TrackListReset);
    }

    /// Advance per loop policy. Emits `TrackChanged`/`GoToTrack` when the
    /// cursor moves, `EndOfTracklist` (leaving the cursor unchanged) when
    /// nothing covers the case. `reset` on the emitted `GoToTrack` is
    /// `false` so the caller can splice gaplessly (§4.7 about-to-finish).
    pub fn next(&mut self) -> Option<TrackId> {
        self.advance(false)
    }

    /// Same as `next` but requests a full pipeline reset on the resulting
    /// `GoToTrack` (used outside the about-to-finish path, e.g. MPRIS
    /// `Next`).
    pub fn next_with_reset(&mut self) -> Option<TrackId> {
        self.advance(true)
    }

    fn advance(&mut self, reset: bool) -> Option<TrackId> {
        if self.order.is_empty() {
            self.emit(TrackListEvent::EndOfTracklist);
            return None;
        }
        let cur = self.cursor?;

        if self.loop_status == LoopStatus::Track {
            let id = self.order[cur].clone();
            self.emit(TrackListEvent::TrackChanged { id: id.clone() });
            self.emit(TrackListEvent::GoToTrack { id: id.clone(), reset });
            return Some(id);
        }

        if cur + 1 < self.order.len() {
            self.cursor = Some(cur + 1);
        } else if self.loop_status == LoopStatus::Playlist {
            self.cursor = Some(0);
        } else {
            self.emit(TrackListEvent::EndOfTracklist);
            return None;
        }

        let id = self.order[self.cursor.unwrap()].clone();
        self.emit(TrackListEvent::TrackChanged { id: id.clone() });
        self.emit(TrackListEvent::GoToTrack { id: id.clone(), reset });
        Some(id)
    }

    /// Retreat per loop policy, with the "restart current if past the
    /// threshold" rule evaluated *before* the loop-status rule — do not
    /// reorder these branches (§9 open question).
    pub fn previous(&mut self, position_us: u64) -> Option<TrackId> {
        if self.order.is_empty() {
            self.emit(TrackListEvent::EndOfTracklist);
            return None;
        }
        let cur = self.cursor?;

        let restart = |this: &mut Self| -> Option<TrackId> {
            let id = this.order[cur].clone();
            this.emit(TrackListEvent::TrackChanged { id: id.clone() });
            this.emit(TrackListEvent::GoToTrack {
                id: id.clone(),
                reset: true,
            });
            Some(id)
        };

        if position_us > PREVIOUS_RESTART_THRESHOLD_US {
            return restart(self);
        }
        if self.loop_status == LoopStatus::Track {
            return restart(self);
        }

        if cur > 0 {
            self.cursor = Some(cur - 1);
        } else if self.loop_status == LoopStatus::Playlist {
            self.cursor = Some(self.order.len() - 1);
        } else {
            self.emit(TrackListEvent::EndOfTracklist);
            return None;
        }

        let id = self.order[self.cursor.unwrap()].clone();
        self.emit(TrackListEvent::TrackChanged { id: id.clone() });
        self.emit(TrackListEvent::GoToTrack {
            id: id.clone(),
            reset: true,
        });
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apparmor::DefaultUriAuthorizer;

    fn fresh_list() -> TrackList {
        TrackList::new(
            crate::ids::SessionKey::next(),
            Context::Unconfined,
            Arc::new(DefaultUriAuthorizer::new(vec![])),
        )
    }

    fn add4(list: &mut TrackList) -> Vec<TrackId> {
        let empty = TrackId::empty();
        let mut ids = Vec::new();
        for uri in ["u1", "u2", "u3", "u4"] {
            ids.push(list.add(uri, &empty, false).unwrap());
        }
        ids
    }

    #[test]
    fn s2_move_mid_list() {
        let mut list = fresh_list();
        let ids = add4(&mut list);
        list.move_track(&ids[2], &ids[1]).unwrap();
        assert_eq!(
            list.tracks(),
            vec![ids[0].clone(), ids[2].clone(), ids[1].clone(), ids[3].clone()]
        );
    }

    #[test]
    fn s3_move_to_head() {
        let mut list = fresh_list();
        let ids = add4(&mut list);
        list.move_track(&ids[2], &ids[0]).unwrap();
        assert_eq!(
            list.tracks(),
            vec![ids[2].clone(), ids[0].clone(), ids[1].clone(), ids[3].clone()]
        );
    }

    #[test]
    fn s4_move_to_tail() {
        let mut list = fresh_list();
        let ids = add4(&mut list);
        list.move_track(&ids[0], &ids[3]).unwrap();
        assert_eq!(
            list.tracks(),
            vec![ids[1].clone(), ids[2].clone(), ids[3].clone(), ids[0].clone()]
        );
    }

    #[test]
    fn s5_apparmor_denial_does_not_insert() {
        let authz = DefaultUriAuthorizer::new(vec![]);
        let ctx = Context::classify("pkg_app_1.0");
        let mut list = TrackList::new(crate::ids::SessionKey::next(), ctx, Arc::new(authz));
        let err = list.add("file:///etc/passwd", &TrackId::empty(), true).unwrap_err();
        assert!(matches!(err, CoreError::Authorization(_)));
        assert!(list.is_empty());
    }

    #[test]
    fn shuffle_then_unshuffle_restores_order() {
        let mut list = fresh_list();
        let ids = add4(&mut list);
        list.go_to(&ids[1]).unwrap();
        let before = list.tracks();
        let current_before = list.current_id().cloned();

        list.set_shuffle(true);
        list.set_shuffle(false);

        assert_eq!(list.tracks(), before);
        assert_eq!(list.current_id().cloned(), current_before);
    }

    #[test]
    fn remove_current_leaves_valid_cursor_or_none() {
        let mut list = fresh_list();
        let ids = add4(&mut list);
        list.go_to(&ids[1]).unwrap();
        list.remove(&ids[1]).unwrap();
        match list.current_id() {
            Some(id) => assert!(list.tracks().contains(id)),
            None => {}
        }

        // draining the rest must eventually leave the cursor at None
        for id in list.tracks().clone() {
            list.remove(&id).unwrap();
        }
        assert!(list.current_id().is_none());
    }

    #[test]
    fn remove_preceding_track_keeps_cursor_on_current() {
        let mut list = fresh_list();
        let ids = add4(&mut list);
        list.go_to(&ids[2]).unwrap();
        list.remove(&ids[1]).unwrap();
        assert_eq!(list.current_id(), Some(&ids[2]));
    }

    #[test]
    fn next_wraps_on_playlist_loop() {
        let mut list = fresh_list();
        let ids = add4(&mut list);
        list.go_to(&ids[3]).unwrap();
        list.set_loop_status(LoopStatus::Playlist);
        let next = list.next();
        assert_eq!(next, Some(ids[0].clone()));
    }

    #[test]
    fn next_signals_end_of_tracklist_without_loop() {
        let mut list = fresh_list();
        let ids = add4(&mut list);
        list.go_to(&ids[3]).unwrap();
        let mut rx = list.subscribe();
        let next = list.next();
        assert_eq!(next, None);
        let mut saw_end = false;
        while let Ok(ev) = rx.try_recv() {
            if ev == TrackListEvent::EndOfTracklist {
                saw_end = true;
            }
        }
        assert!(saw_end);
    }

    #[test]
    fn previous_restarts_past_threshold_even_with_predecessor() {
        let mut list = fresh_list();
        let ids = add4(&mut list);
        list.go_to(&ids[2]).unwrap();
        let id = list.previous(6_000_000).unwrap();
        assert_eq!(id, ids[2]);
    }

    #[test]
    fn previous_retreats_under_threshold() {
        let mut list = fresh_list();
        let ids = add4(&mut list);
        list.go_to(&ids[2]).unwrap();
        let id = list.previous(1_000_000).unwrap();
        assert_eq!(id, ids[1]);
    }

    #[test]
    fn s6_about_to_finish_next_moves_cursor_without_reset() {
        let mut list = fresh_list();
        let ids = add4(&mut list);
        list.go_to(&ids[0]).unwrap();
        let mut rx = list.subscribe();
        // drain the go_to's own events
        while rx.try_recv().is_ok() {}

        let next = list.next();
        assert_eq!(next, Some(ids[1].clone()));

        let mut saw_go_to_without_reset = false;
        let mut changed_count = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                TrackListEvent::TrackChanged { id } if id == ids[1] => changed_count += 1,
                TrackListEvent::GoToTrack { id, reset } if id == ids[1] && !reset => {
                    saw_go_to_without_reset = true
                }
                _ => {}
            }
        }
        assert!(saw_go_to_without_reset);
        assert_eq!(changed_count, 1);
    }

    #[test]
    fn move_is_idempotent_when_source_equals_dest() {
        let mut list = fresh_list();
        let ids = add4(&mut list);
        let before = list.tracks();
        list.move_track(&ids[1], &ids[1]).unwrap();
        assert_eq!(list.tracks(), before);
    }
}
