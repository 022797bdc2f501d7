//! Entity models for the music library database.
//!
//! Every payload is a fixed-field struct; optional metadata is `Option<…>`
//! so callers can tell "absent" apart from "empty". Input metadata
//! (`TrackMetadata`) is what scanners hand to the engine; the other types
//! mirror rows of the store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One scanned audio file, as reported by a collaborator (filesystem
/// lister, UPnP browser, platform scanner). The resource URI doubles as
/// the file identity; everything else is tag data and may be missing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub resource_uri: String,
    pub title: String,
    pub artist: Option<String>,
    pub album_title: Option<String>,
    pub album_artist: Option<String>,
    pub track_number: Option<i32>,
    pub disc_number: Option<i32>,
    pub duration_secs: Option<i64>,
    pub rating: Option<i32>,
    pub genre: Option<String>,
    pub composer: Option<String>,
    pub lyricist: Option<String>,
    pub comment: Option<String>,
    pub year: Option<i32>,
    pub channels: Option<i32>,
    pub bit_rate: Option<i32>,
    pub sample_rate: Option<i32>,
    #[serde(default)]
    pub has_embedded_cover: bool,
    /// Modification time of the underlying file, unix seconds.
    #[serde(default)]
    pub file_modified_time: i64,
}

/// A stored track row. `priority` disambiguates several physical files
/// carrying the same logical track; the lowest priority is the canonical
/// row returned by read queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub file_name: String,
    pub priority: i32,
    pub title: String,
    pub artist_name: Option<String>,
    pub album_title: Option<String>,
    pub album_artist_name: Option<String>,
    pub album_path: Option<String>,
    pub track_number: Option<i32>,
    pub disc_number: Option<i32>,
    pub duration_secs: Option<i64>,
    pub rating: Option<i32>,
    pub genre_name: Option<String>,
    pub composer_name: Option<String>,
    pub lyricist_name: Option<String>,
    pub comment: Option<String>,
    pub year: Option<i32>,
    pub channels: Option<i32>,
    pub bit_rate: Option<i32>,
    pub sample_rate: Option<i32>,
    pub has_embedded_cover: bool,
}

/// A stored album. `tracks_count` is the number of canonical tracks
/// currently referencing the album, computed at read time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: u64,
    pub title: String,
    pub artist_name: Option<String>,
    pub album_path: Option<String>,
    pub cover_uri: Option<String>,
    pub tracks_count: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composer {
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lyricist {
    pub id: u64,
    pub name: String,
}

/// Per-file bookkeeping attached 1:1 to a track row: when the file was
/// last modified on disk, when it entered the library, and its play
/// statistics. Timestamps are unix seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackFile {
    pub file_name: String,
    pub file_modified_time: i64,
    pub import_date: i64,
    pub first_play_date: Option<i64>,
    pub last_play_date: Option<i64>,
    pub play_counter: i64,
}

/// Identity of a scanner / metadata origin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverSource {
    pub id: u64,
    pub name: String,
}

/// A serializable insert batch: the track list plus a map from album
/// title to the cover URI discovered next to those files. This is the
/// payload format the CLI reads from disk.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImportBatch {
    pub tracks: Vec<TrackMetadata>,
    #[serde(default)]
    pub covers: HashMap<String, String>,
}
