//! Schema lifecycle tests: forward migration from older supported
//! generations, wholesale removal of deprecated generations, and the
//! destructive bad-state reset.

use fonoteca::{LibraryDbConfig, MusicLibraryDb};
use rusqlite::Connection;
use std::path::Path;

fn open_at(path: &Path) -> MusicLibraryDb {
    MusicLibraryDb::open(&LibraryDbConfig::at_path(path)).unwrap()
}

fn user_tables(path: &Path) -> Vec<String> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'")
        .unwrap();
    let tables = stmt
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<Vec<String>, _>>()
        .unwrap();
    tables
}

/// Lay down a generation-9 database: no composers/lyricists, no track
/// priority, but full play statistics.
fn create_v9_database(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE artists (id INTEGER PRIMARY KEY NOT NULL, name TEXT NOT NULL, \
         UNIQUE (name));
         CREATE TABLE genres (id INTEGER PRIMARY KEY NOT NULL, name TEXT NOT NULL, \
         UNIQUE (name));
         CREATE TABLE albums (id INTEGER PRIMARY KEY NOT NULL, title TEXT NOT NULL, \
         artist_name TEXT REFERENCES artists(name) ON DELETE CASCADE, album_path TEXT, \
         cover_uri TEXT, UNIQUE (title, artist_name, album_path));
         CREATE TABLE tracks (id INTEGER PRIMARY KEY NOT NULL, file_name TEXT NOT NULL, \
         title TEXT NOT NULL, artist_name TEXT REFERENCES artists(name) ON DELETE CASCADE, \
         album_title TEXT, album_artist_name TEXT, album_path TEXT, track_number INTEGER, \
         disc_number INTEGER, duration INTEGER, rating INTEGER, \
         genre_name TEXT REFERENCES genres(name) ON DELETE CASCADE, year INTEGER, \
         UNIQUE (file_name), \
         UNIQUE (title, artist_name, album_title, album_artist_name, album_path));
         CREATE TABLE track_files (file_name TEXT PRIMARY KEY NOT NULL \
         REFERENCES tracks(file_name) ON DELETE CASCADE, \
         file_modified_time INTEGER NOT NULL, import_date INTEGER NOT NULL, \
         first_play_date INTEGER, last_play_date INTEGER, \
         play_counter INTEGER NOT NULL DEFAULT 0);
         CREATE TABLE discover_sources (id INTEGER PRIMARY KEY NOT NULL, \
         name TEXT NOT NULL, UNIQUE (name));
         CREATE TABLE database_version_v9 (generation INTEGER PRIMARY KEY NOT NULL);

         INSERT INTO artists (id, name) VALUES (1, 'old artist');
         INSERT INTO genres (id, name) VALUES (1, 'rock');
         INSERT INTO albums (id, title, artist_name, album_path, cover_uri) \
         VALUES (1, 'old album', 'old artist', '/music/old', '/music/old/cover.jpg');
         INSERT INTO tracks (id, file_name, title, artist_name, album_title, \
         album_artist_name, album_path, track_number, disc_number, duration, rating, \
         genre_name, year) \
         VALUES (1, '/music/old/one.flac', 'one', 'old artist', 'old album', 'old artist', \
         '/music/old', 1, 1, 180, 4, 'rock', 1999);
         INSERT INTO tracks (id, file_name, title, artist_name, album_title, \
         album_artist_name, album_path, track_number, disc_number, duration, rating, \
         genre_name, year) \
         VALUES (2, '/music/old/two.flac', 'two', 'old artist', 'old album', 'old artist', \
         '/music/old', 2, 1, 200, 5, 'rock', 1999);
         INSERT INTO track_files (file_name, file_modified_time, import_date, \
         first_play_date, last_play_date, play_counter) \
         VALUES ('/music/old/one.flac', 500, 600, 1000, 2000, 7);
         INSERT INTO track_files (file_name, file_modified_time, import_date, \
         first_play_date, last_play_date, play_counter) \
         VALUES ('/music/old/two.flac', 510, 610, NULL, NULL, 0);",
    )
    .unwrap();
}

/// Lay down a generation-10 database: composers and lyricists exist,
/// tracks carry composer/lyricist/comment, still no priority.
fn create_v10_database(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE artists (id INTEGER PRIMARY KEY NOT NULL, name TEXT NOT NULL, \
         UNIQUE (name));
         CREATE TABLE genres (id INTEGER PRIMARY KEY NOT NULL, name TEXT NOT NULL, \
         UNIQUE (name));
         CREATE TABLE composers (id INTEGER PRIMARY KEY NOT NULL, name TEXT NOT NULL, \
         UNIQUE (name));
         CREATE TABLE lyricists (id INTEGER PRIMARY KEY NOT NULL, name TEXT NOT NULL, \
         UNIQUE (name));
         CREATE TABLE albums (id INTEGER PRIMARY KEY NOT NULL, title TEXT NOT NULL, \
         artist_name TEXT REFERENCES artists(name) ON DELETE CASCADE, album_path TEXT, \
         cover_uri TEXT, UNIQUE (title, artist_name, album_path));
         CREATE TABLE tracks (id INTEGER PRIMARY KEY NOT NULL, file_name TEXT NOT NULL, \
         title TEXT NOT NULL, artist_name TEXT REFERENCES artists(name) ON DELETE CASCADE, \
         album_title TEXT, album_artist_name TEXT, album_path TEXT, track_number INTEGER, \
         disc_number INTEGER, duration INTEGER, rating INTEGER, \
         genre_name TEXT REFERENCES genres(name) ON DELETE CASCADE, \
         composer_name TEXT REFERENCES composers(name) ON DELETE CASCADE, \
         lyricist_name TEXT REFERENCES lyricists(name) ON DELETE CASCADE, \
         comment TEXT, year INTEGER, \
         UNIQUE (file_name), \
         UNIQUE (title, artist_name, album_title, album_artist_name, album_path));
         CREATE TABLE track_files (file_name TEXT PRIMARY KEY NOT NULL \
         REFERENCES tracks(file_name) ON DELETE CASCADE, \
         file_modified_time INTEGER NOT NULL, import_date INTEGER NOT NULL, \
         first_play_date INTEGER, last_play_date INTEGER, \
         play_counter INTEGER NOT NULL DEFAULT 0);
         CREATE TABLE discover_sources (id INTEGER PRIMARY KEY NOT NULL, \
         name TEXT NOT NULL, UNIQUE (name));
         CREATE TABLE database_version_v9 (generation INTEGER PRIMARY KEY NOT NULL);
         CREATE TABLE database_version_v10 (generation INTEGER PRIMARY KEY NOT NULL);

         INSERT INTO artists (id, name) VALUES (1, 'composed artist');
         INSERT INTO composers (id, name) VALUES (1, 'the composer');
         INSERT INTO albums (id, title, artist_name, album_path, cover_uri) \
         VALUES (1, 'scored album', 'composed artist', '/music/scored', NULL);
         INSERT INTO tracks (id, file_name, title, artist_name, album_title, \
         album_artist_name, album_path, track_number, disc_number, duration, rating, \
         genre_name, composer_name, lyricist_name, comment, year) \
         VALUES (1, '/music/scored/theme.flac', 'theme', 'composed artist', 'scored album', \
         'composed artist', '/music/scored', 1, 1, 300, 3, NULL, 'the composer', NULL, \
         'main theme', 2005);
         INSERT INTO track_files (file_name, file_modified_time, import_date, \
         first_play_date, last_play_date, play_counter) \
         VALUES ('/music/scored/theme.flac', 700, 800, 900, 1100, 12);",
    )
    .unwrap();
}

// =============================================================================
// Forward migration
// =============================================================================

#[test]
fn test_migration_from_v9_preserves_data() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("library.db");
    create_v9_database(&db_path);

    let db = open_at(&db_path);

    assert_eq!(db.track_count(), 2);
    assert_eq!(db.album_count(), 1);
    assert_eq!(db.artist_count(), 1);

    let track_id = db.track_id_from_file_name("/music/old/one.flac").unwrap();
    let track = db.track_from_id(track_id).unwrap();
    assert_eq!(track.title, "one");
    assert_eq!(track.rating, Some(4), "rating must survive migration");
    assert_eq!(track.year, Some(1999));
    assert_eq!(track.priority, 1, "migrated rows become canonical");
    assert!(track.composer_name.is_none());

    let record = db.track_file("/music/old/one.flac").unwrap();
    assert_eq!(record.play_counter, 7, "play count must survive migration");
    assert_eq!(record.first_play_date, Some(1000));
    assert_eq!(record.last_play_date, Some(2000));
    assert_eq!(record.file_modified_time, 500);
    assert_eq!(record.import_date, 600);

    let album = db.album_from_title_and_artist("old album", "old artist").unwrap();
    assert_eq!(album.tracks_count, 2);
    assert_eq!(album.cover_uri.as_deref(), Some("/music/old/cover.jpg"));

    // the new tables of later generations are in place
    assert!(db.all_composers().is_empty());
    assert!(db.all_lyricists().is_empty());
}

#[test]
fn test_migration_from_v10_preserves_composer_data() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("library.db");
    create_v10_database(&db_path);

    let db = open_at(&db_path);

    let track_id = db
        .track_id_from_file_name("/music/scored/theme.flac")
        .unwrap();
    let track = db.track_from_id(track_id).unwrap();
    assert_eq!(track.composer_name.as_deref(), Some("the composer"));
    assert_eq!(track.comment.as_deref(), Some("main theme"));
    assert_eq!(track.rating, Some(3));
    assert_eq!(track.priority, 1);
    assert!(track.channels.is_none());

    let record = db.track_file("/music/scored/theme.flac").unwrap();
    assert_eq!(record.play_counter, 12);

    let composers = db.all_composers();
    assert_eq!(composers.len(), 1);
    assert_eq!(composers[0].name, "the composer");
}

#[test]
fn test_migrated_database_accepts_new_writes() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("library.db");
    create_v9_database(&db_path);

    let mut db = open_at(&db_path);
    let mut new_track = fonoteca::TrackMetadata {
        resource_uri: "/music/old/three.flac".to_string(),
        title: "three".to_string(),
        artist: Some("old artist".to_string()),
        album_title: Some("old album".to_string()),
        album_artist: Some("old artist".to_string()),
        ..Default::default()
    };
    new_track.track_number = Some(3);

    let changes = db.insert_tracks_list(
        std::slice::from_ref(&new_track),
        &std::collections::HashMap::new(),
    );
    assert_eq!(changes.inserted_tracks.len(), 1);
    assert!(
        changes.inserted_tracks[0] > 2,
        "ids continue above the migrated MAX(id)"
    );

    let album = db.album_from_title_and_artist("old album", "old artist").unwrap();
    assert_eq!(album.tracks_count, 3);
}

#[test]
fn test_reopening_a_migrated_database_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("library.db");
    create_v9_database(&db_path);

    {
        let db = open_at(&db_path);
        assert_eq!(db.track_count(), 2);
    }
    // second open finds the migration markers and changes nothing
    let db = open_at(&db_path);
    assert_eq!(db.track_count(), 2);
    let track_id = db.track_id_from_file_name("/music/old/one.flac").unwrap();
    assert_eq!(db.track_from_id(track_id).unwrap().rating, Some(4));
}

// =============================================================================
// Deprecated generations and bad state
// =============================================================================

#[test]
fn test_deprecated_generation_is_dropped_wholesale() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("library.db");
    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE Tracks (ID INTEGER PRIMARY KEY NOT NULL, Title TEXT NOT NULL);
             CREATE TABLE Albums (ID INTEGER PRIMARY KEY NOT NULL, Title TEXT NOT NULL);
             CREATE TABLE DiscoverSource (ID INTEGER PRIMARY KEY NOT NULL, UUID TEXT NOT NULL);
             CREATE TABLE database_version_v5 (generation INTEGER PRIMARY KEY NOT NULL);
             INSERT INTO Tracks (ID, Title) VALUES (1, 'ancient');",
        )
        .unwrap();
    }

    {
        let db = open_at(&db_path);
        assert_eq!(db.track_count(), 0, "no migration path from ancient data");
        assert_eq!(db.album_count(), 0);
    }

    let tables = user_tables(&db_path);
    assert!(!tables.contains(&"Tracks".to_string()));
    assert!(!tables.contains(&"database_version_v5".to_string()));
    assert!(tables.contains(&"tracks".to_string()));
}

#[test]
fn test_column_shape_mismatch_triggers_destructive_reset() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("library.db");

    {
        let mut db = open_at(&db_path);
        db.insert_tracks_list(
            &[fonoteca::TrackMetadata {
                resource_uri: "/music/a/t.flac".to_string(),
                title: "t".to_string(),
                ..Default::default()
            }],
            &std::collections::HashMap::new(),
        );
        assert_eq!(db.track_count(), 1);
    }

    // somebody else mangled the schema behind our back
    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute("ALTER TABLE tracks ADD COLUMN stray TEXT", [])
            .unwrap();
    }

    let mut db = open_at(&db_path);
    assert_eq!(db.track_count(), 0, "reset drops the data with the schema");

    // the store is empty but healthy again
    let changes = db.insert_tracks_list(
        &[fonoteca::TrackMetadata {
            resource_uri: "/music/a/t.flac".to_string(),
            title: "t".to_string(),
            ..Default::default()
        }],
        &std::collections::HashMap::new(),
    );
    assert_eq!(changes.inserted_tracks.len(), 1);
}

#[test]
fn test_tables_without_markers_are_reset() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("library.db");
    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE leftovers (id INTEGER PRIMARY KEY NOT NULL, blob TEXT);
             INSERT INTO leftovers (id, blob) VALUES (1, 'junk');",
        )
        .unwrap();
    }

    let db = open_at(&db_path);
    assert_eq!(db.track_count(), 0);

    let tables = user_tables(&db_path);
    assert!(!tables.contains(&"leftovers".to_string()));
    assert!(tables.contains(&"tracks".to_string()));
}
