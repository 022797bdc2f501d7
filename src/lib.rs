//! fonoteca, an embedded music-library database.
//!
//! The engine indexes a local music collection into a single SQLite file
//! and keeps it consistent as files are scanned, added, modified, moved,
//! or removed: schema creation and forward migration, lazy identity
//! resolution for artists/albums/genres/composers/lyricists, idempotent
//! track upsert with duplicate-file priorities, and per-batch change
//! tracking that drives ordered notifications.

pub mod library_store;
pub mod sqlite_persistence;

pub use library_store::{
    Album, Artist, ChangeSet, Composer, DiscoverSource, Genre, ImportBatch, LibraryDbConfig,
    LibraryObserver, Lyricist, MusicLibraryDb, Track, TrackFile, TrackMetadata,
};
