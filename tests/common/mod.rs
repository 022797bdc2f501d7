//! Shared fixtures for library database tests.

use fonoteca::{
    Album, Artist, LibraryDbConfig, LibraryObserver, MusicLibraryDb, Track, TrackMetadata,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub fn open_in_memory() -> MusicLibraryDb {
    MusicLibraryDb::open(&LibraryDbConfig::in_memory()).unwrap()
}

pub fn open_at(path: &Path) -> MusicLibraryDb {
    MusicLibraryDb::open(&LibraryDbConfig::at_path(path)).unwrap()
}

/// A track as a scanner would report it.
pub fn track(uri: &str, title: &str, artist: &str, album: &str, number: i32) -> TrackMetadata {
    TrackMetadata {
        resource_uri: uri.to_string(),
        title: title.to_string(),
        artist: Some(artist.to_string()),
        album_title: Some(album.to_string()),
        track_number: Some(number),
        disc_number: Some(1),
        duration_secs: Some(100 + number as i64),
        file_modified_time: 1_700_000_000,
        ..Default::default()
    }
}

pub fn track_with_genre(
    uri: &str,
    title: &str,
    artist: &str,
    album: &str,
    number: i32,
    genre: &str,
) -> TrackMetadata {
    TrackMetadata {
        genre: Some(genre.to_string()),
        ..track(uri, title, artist, album, number)
    }
}

/// 22 tracks across 4 albums by 2 artists (rock and jazz), with a cover
/// per album.
pub fn sample_library() -> (Vec<TrackMetadata>, HashMap<String, String>) {
    let mut tracks = Vec::new();
    let albums = [
        ("album1", "artist1", "rock", 5),
        ("album2", "artist1", "rock", 6),
        ("album3", "artist2", "jazz", 4),
        ("album4", "artist2", "jazz", 7),
    ];
    for (album, artist, genre, track_count) in albums {
        for number in 1..=track_count {
            tracks.push(track_with_genre(
                &format!("/music/{album}/track{number}.flac"),
                &format!("track{number}"),
                artist,
                album,
                number,
                genre,
            ));
        }
    }
    let covers = albums
        .iter()
        .map(|(album, ..)| (album.to_string(), format!("/music/{album}/cover.jpg")))
        .collect();
    (tracks, covers)
}

/// Observer that records every notification as a compact event string,
/// in arrival order.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl LibraryObserver for RecordingObserver {
    fn artists_added(&mut self, artists: &[Artist]) {
        self.push(format!("artists_added:{}", artists.len()));
    }

    fn albums_added(&mut self, albums: &[Album]) {
        self.push(format!("albums_added:{}", albums.len()));
    }

    fn albums_modified(&mut self, albums: &[Album]) {
        self.push(format!("albums_modified:{}", albums.len()));
    }

    fn tracks_added(&mut self, tracks: &[Track]) {
        self.push(format!("tracks_added:{}", tracks.len()));
    }

    fn tracks_modified(&mut self, tracks: &[Track]) {
        self.push(format!("tracks_modified:{}", tracks.len()));
    }

    fn tracks_removed(&mut self, ids: &[u64]) {
        self.push(format!("tracks_removed:{}", ids.len()));
    }

    fn albums_removed(&mut self, ids: &[u64]) {
        self.push(format!("albums_removed:{}", ids.len()));
    }

    fn artists_removed(&mut self, ids: &[u64]) {
        self.push(format!("artists_removed:{}", ids.len()));
    }

    fn database_error(&mut self, _message: &str) {
        self.push("database_error".to_string());
    }

    fn insert_finished(&mut self) {
        self.push("insert_finished".to_string());
    }

    fn remove_finished(&mut self) {
        self.push("remove_finished".to_string());
    }
}
