//! Change accumulation for write batches and the observer interface
//! through which committed changes are announced.

use super::models::{Album, Artist, Track};
use serde::Serialize;
use std::collections::BTreeSet;

/// The ids touched by one committed write batch, grouped by entity kind
/// and by what happened to them. Returned from every public write so a
/// caller can react without registering an observer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub inserted_artists: Vec<u64>,
    pub inserted_albums: Vec<u64>,
    pub inserted_tracks: Vec<u64>,
    pub modified_artists: Vec<u64>,
    pub modified_albums: Vec<u64>,
    pub modified_tracks: Vec<u64>,
    pub removed_artists: Vec<u64>,
    pub removed_albums: Vec<u64>,
    pub removed_tracks: Vec<u64>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted_artists.is_empty()
            && self.inserted_albums.is_empty()
            && self.inserted_tracks.is_empty()
            && self.modified_artists.is_empty()
            && self.modified_albums.is_empty()
            && self.modified_tracks.is_empty()
            && self.removed_artists.is_empty()
            && self.removed_albums.is_empty()
            && self.removed_tracks.is_empty()
    }
}

/// Per-transaction accumulator. A fresh tracker is created at the start
/// of every write batch; the sets deduplicate ids as the batch touches
/// the same entity repeatedly.
#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    inserted_artists: BTreeSet<u64>,
    inserted_albums: BTreeSet<u64>,
    inserted_tracks: BTreeSet<u64>,
    modified_artists: BTreeSet<u64>,
    modified_albums: BTreeSet<u64>,
    modified_tracks: BTreeSet<u64>,
    removed_artists: BTreeSet<u64>,
    removed_albums: BTreeSet<u64>,
    removed_tracks: BTreeSet<u64>,
}

impl ChangeTracker {
    pub(crate) fn record_inserted_artist(&mut self, id: u64) {
        self.inserted_artists.insert(id);
    }

    pub(crate) fn record_inserted_album(&mut self, id: u64) {
        self.inserted_albums.insert(id);
    }

    pub(crate) fn record_inserted_track(&mut self, id: u64) {
        self.inserted_tracks.insert(id);
    }

    pub(crate) fn record_modified_album(&mut self, id: u64) {
        self.modified_albums.insert(id);
    }

    pub(crate) fn record_modified_track(&mut self, id: u64) {
        self.modified_tracks.insert(id);
    }

    pub(crate) fn record_removed_artist(&mut self, id: u64) {
        self.removed_artists.insert(id);
    }

    pub(crate) fn record_removed_album(&mut self, id: u64) {
        self.removed_albums.insert(id);
    }

    pub(crate) fn record_removed_track(&mut self, id: u64) {
        self.removed_tracks.insert(id);
    }

    /// Collapse the raw sets into the reported change set.
    ///
    /// An entity inserted in this batch is reported once, as inserted:
    /// it is pruned from the modified sets. An entity inserted and then
    /// removed within the same batch nets out to nothing.
    pub(crate) fn into_change_set(mut self) -> ChangeSet {
        let vanished_albums: Vec<u64> = self
            .inserted_albums
            .intersection(&self.removed_albums)
            .copied()
            .collect();
        for id in &vanished_albums {
            self.inserted_albums.remove(id);
            self.removed_albums.remove(id);
        }
        let vanished_tracks: Vec<u64> = self
            .inserted_tracks
            .intersection(&self.removed_tracks)
            .copied()
            .collect();
        for id in &vanished_tracks {
            self.inserted_tracks.remove(id);
            self.removed_tracks.remove(id);
        }

        let modified_albums: Vec<u64> = self
            .modified_albums
            .iter()
            .filter(|id| !self.inserted_albums.contains(id) && !self.removed_albums.contains(id))
            .copied()
            .collect();
        let modified_tracks: Vec<u64> = self
            .modified_tracks
            .iter()
            .filter(|id| !self.inserted_tracks.contains(id) && !self.removed_tracks.contains(id))
            .copied()
            .collect();
        let modified_artists: Vec<u64> = self
            .modified_artists
            .iter()
            .filter(|id| !self.inserted_artists.contains(id) && !self.removed_artists.contains(id))
            .copied()
            .collect();

        ChangeSet {
            inserted_artists: self.inserted_artists.into_iter().collect(),
            inserted_albums: self.inserted_albums.into_iter().collect(),
            inserted_tracks: self.inserted_tracks.into_iter().collect(),
            modified_artists,
            modified_albums,
            modified_tracks,
            removed_artists: self.removed_artists.into_iter().collect(),
            removed_albums: self.removed_albums.into_iter().collect(),
            removed_tracks: self.removed_tracks.into_iter().collect(),
        }
    }
}

/// Callback interface for committed library changes.
///
/// Notifications always arrive parent-first: artists before the albums
/// under them, albums before their tracks, so a consumer building an
/// artist → album → track tree never sees a child without its parent.
/// Added entities carry their post-commit row data. Every insert or
/// remove batch ends with its terminal `*_finished` call, even when the
/// batch was aborted early.
#[allow(unused_variables)]
pub trait LibraryObserver {
    fn artists_added(&mut self, artists: &[Artist]) {}
    fn albums_added(&mut self, albums: &[Album]) {}
    fn albums_modified(&mut self, albums: &[Album]) {}
    fn tracks_added(&mut self, tracks: &[Track]) {}
    fn tracks_modified(&mut self, tracks: &[Track]) {}
    fn tracks_removed(&mut self, ids: &[u64]) {}
    fn albums_removed(&mut self, ids: &[u64]) {}
    fn artists_removed(&mut self, ids: &[u64]) {}
    fn database_error(&mut self, message: &str) {}
    fn insert_finished(&mut self) {}
    fn remove_finished(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_entities_are_pruned_from_modified() {
        let mut tracker = ChangeTracker::default();
        tracker.record_inserted_album(7);
        tracker.record_modified_album(7);
        tracker.record_modified_album(9);
        tracker.record_inserted_track(3);
        tracker.record_modified_track(3);

        let changes = tracker.into_change_set();
        assert_eq!(changes.inserted_albums, vec![7]);
        assert_eq!(changes.modified_albums, vec![9]);
        assert_eq!(changes.inserted_tracks, vec![3]);
        assert!(changes.modified_tracks.is_empty());
    }

    #[test]
    fn insert_then_remove_in_one_batch_nets_out() {
        let mut tracker = ChangeTracker::default();
        tracker.record_inserted_album(4);
        tracker.record_removed_album(4);

        let changes = tracker.into_change_set();
        assert!(changes.inserted_albums.is_empty());
        assert!(changes.removed_albums.is_empty());
        assert!(changes.is_empty());
    }
}
