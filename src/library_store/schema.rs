//! Library schema: table definitions, generation markers, and the
//! migration path between on-disk generations.
//!
//! Generations at a glance:
//! - anything at or below v8 used a different table set entirely and is
//!   dropped on sight, data included; there is no upgrade path from it
//! - v9 is the oldest generation that migrates forward
//! - v10 added composers, lyricists and free-text comments
//! - v11 (current) added the duplicate-file priority and the audio shape
//!   columns (channels, bit rate, sample rate, embedded cover flag)
//!
//! Every migration step records itself by creating its own version-marker
//! table, so a step runs at most once per database file.

use crate::sqlite_persistence::{
    drop_all_user_tables, list_user_tables, Column, OnDelete, SqlType, Table,
};
use anyhow::Result;
use rusqlite::Connection;
use tracing::{error, info, warn};

pub const LATEST_GENERATION: u32 = 11;

const MARKER_V9: &str = "database_version_v9";
const MARKER_V10: &str = "database_version_v10";
const MARKER_V11: &str = "database_version_v11";

/// Tables of generations <= v8. Any of these present means the file was
/// written by an ancient release; the whole set is dropped unconditionally.
const DEPRECATED_TABLES: &[&str] = &[
    "Tracks",
    "Albums",
    "Artists",
    "Genres",
    "TracksData",
    "TracksMapping",
    "DiscoverSource",
    "AlbumsArtists",
    "database_version_v2",
    "database_version_v3",
    "database_version_v4",
    "database_version_v5",
    "database_version_v6",
    "database_version_v7",
    "database_version_v8",
];

// =============================================================================
// Current-generation tables (v11)
// =============================================================================

const ARTISTS_TABLE: Table = Table {
    name: "artists",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key().non_null(),
        Column::new("name", SqlType::Text).non_null(),
    ],
    indices: &[],
    unique_constraints: &[&["name"]],
};

const GENRES_TABLE: Table = Table {
    name: "genres",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key().non_null(),
        Column::new("name", SqlType::Text).non_null(),
    ],
    indices: &[],
    unique_constraints: &[&["name"]],
};

const COMPOSERS_TABLE: Table = Table {
    name: "composers",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key().non_null(),
        Column::new("name", SqlType::Text).non_null(),
    ],
    indices: &[],
    unique_constraints: &[&["name"]],
};

const LYRICISTS_TABLE: Table = Table {
    name: "lyricists",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key().non_null(),
        Column::new("name", SqlType::Text).non_null(),
    ],
    indices: &[],
    unique_constraints: &[&["name"]],
};

const ALBUMS_TABLE: Table = Table {
    name: "albums",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key().non_null(),
        Column::new("title", SqlType::Text).non_null(),
        Column::new("artist_name", SqlType::Text).references("artists", "name", OnDelete::Cascade),
        Column::new("album_path", SqlType::Text),
        Column::new("cover_uri", SqlType::Text),
    ],
    indices: &[("idx_albums_title", "title")],
    unique_constraints: &[&["title", "artist_name", "album_path"]],
};

const TRACKS_TABLE: Table = Table {
    name: "tracks",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key().non_null(),
        Column::new("file_name", SqlType::Text).non_null(),
        Column::new("priority", SqlType::Integer).non_null(),
        Column::new("title", SqlType::Text).non_null(),
        Column::new("artist_name", SqlType::Text).references("artists", "name", OnDelete::Cascade),
        Column::new("album_title", SqlType::Text),
        Column::new("album_artist_name", SqlType::Text),
        Column::new("album_path", SqlType::Text),
        Column::new("track_number", SqlType::Integer),
        Column::new("disc_number", SqlType::Integer),
        Column::new("duration", SqlType::Integer),
        Column::new("rating", SqlType::Integer),
        Column::new("genre_name", SqlType::Text).references("genres", "name", OnDelete::Cascade),
        Column::new("composer_name", SqlType::Text).references(
            "composers",
            "name",
            OnDelete::Cascade,
        ),
        Column::new("lyricist_name", SqlType::Text).references(
            "lyricists",
            "name",
            OnDelete::Cascade,
        ),
        Column::new("comment", SqlType::Text),
        Column::new("year", SqlType::Integer),
        Column::new("channels", SqlType::Integer),
        Column::new("bit_rate", SqlType::Integer),
        Column::new("sample_rate", SqlType::Integer),
        Column::new("has_embedded_cover", SqlType::Integer)
            .non_null()
            .default_value("0"),
    ],
    indices: &[
        ("idx_tracks_album_title", "album_title"),
        ("idx_tracks_artist_name", "artist_name"),
    ],
    unique_constraints: &[
        &["file_name"],
        &[
            "priority",
            "title",
            "artist_name",
            "album_title",
            "album_artist_name",
            "album_path",
        ],
    ],
};

const TRACK_FILES_TABLE: Table = Table {
    name: "track_files",
    columns: &[
        Column::new("file_name", SqlType::Text)
            .primary_key()
            .non_null()
            .references("tracks", "file_name", OnDelete::Cascade),
        Column::new("file_modified_time", SqlType::Integer).non_null(),
        Column::new("import_date", SqlType::Integer).non_null(),
        Column::new("first_play_date", SqlType::Integer),
        Column::new("last_play_date", SqlType::Integer),
        Column::new("play_counter", SqlType::Integer)
            .non_null()
            .default_value("0"),
    ],
    indices: &[],
    unique_constraints: &[],
};

const DISCOVER_SOURCES_TABLE: Table = Table {
    name: "discover_sources",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key().non_null(),
        Column::new("name", SqlType::Text).non_null(),
    ],
    indices: &[],
    unique_constraints: &[&["name"]],
};

/// Creation order satisfies the name-based foreign keys: referenced
/// tables first.
const CORE_TABLES: &[&Table] = &[
    &ARTISTS_TABLE,
    &GENRES_TABLE,
    &COMPOSERS_TABLE,
    &LYRICISTS_TABLE,
    &ALBUMS_TABLE,
    &TRACKS_TABLE,
    &TRACK_FILES_TABLE,
    &DISCOVER_SOURCES_TABLE,
];

// =============================================================================
// Intermediate generation shapes (migration targets)
// =============================================================================

/// The v10 tracks shape, target of the v9 -> v10 rebuild. No priority
/// column yet: one file per logical track identity.
const TRACKS_TABLE_V10: Table = Table {
    name: "tracks",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key().non_null(),
        Column::new("file_name", SqlType::Text).non_null(),
        Column::new("title", SqlType::Text).non_null(),
        Column::new("artist_name", SqlType::Text).references("artists", "name", OnDelete::Cascade),
        Column::new("album_title", SqlType::Text),
        Column::new("album_artist_name", SqlType::Text),
        Column::new("album_path", SqlType::Text),
        Column::new("track_number", SqlType::Integer),
        Column::new("disc_number", SqlType::Integer),
        Column::new("duration", SqlType::Integer),
        Column::new("rating", SqlType::Integer),
        Column::new("genre_name", SqlType::Text).references("genres", "name", OnDelete::Cascade),
        Column::new("composer_name", SqlType::Text).references(
            "composers",
            "name",
            OnDelete::Cascade,
        ),
        Column::new("lyricist_name", SqlType::Text).references(
            "lyricists",
            "name",
            OnDelete::Cascade,
        ),
        Column::new("comment", SqlType::Text),
        Column::new("year", SqlType::Integer),
    ],
    indices: &[
        ("idx_tracks_album_title", "album_title"),
        ("idx_tracks_artist_name", "artist_name"),
    ],
    unique_constraints: &[
        &["file_name"],
        &[
            "title",
            "artist_name",
            "album_title",
            "album_artist_name",
            "album_path",
        ],
    ],
};

// =============================================================================
// Schema preparation
// =============================================================================

/// What `prepare_database` did to bring the store up to date.
#[derive(Debug)]
pub enum SchemaOutcome {
    CreatedFresh,
    AlreadyCurrent,
    Migrated { from: u32 },
    Reset { reason: String },
}

/// Bring the database to the latest schema generation, idempotently.
///
/// Deprecated generations are dropped wholesale, supported older
/// generations are migrated forward step by step, and anything whose
/// column shapes do not match the expected layout triggers the
/// destructive reset: every user table is dropped and the schema is
/// recreated empty. The database always ends up at the current
/// generation; the only open question is whether the data survived.
pub fn prepare_database(conn: &Connection) -> Result<SchemaOutcome> {
    let mut tables = list_user_tables(conn)?;

    if tables
        .iter()
        .any(|t| DEPRECATED_TABLES.contains(&t.as_str()))
    {
        warn!("found tables from a deprecated schema generation, dropping them");
        conn.pragma_update(None, "foreign_keys", false)?;
        for table in DEPRECATED_TABLES {
            conn.execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
        }
        conn.pragma_update(None, "foreign_keys", true)?;
        tables = list_user_tables(conn)?;
    }

    if tables.is_empty() {
        create_latest(conn)?;
        info!("created library schema at generation {LATEST_GENERATION}");
        return Ok(SchemaOutcome::CreatedFresh);
    }

    let has = |name: &str| tables.iter().any(|t| t == name);

    if has(MARKER_V11) {
        return match validate_current_schema(conn) {
            Ok(()) => Ok(SchemaOutcome::AlreadyCurrent),
            Err(reason) => reset_database(conn, format!("{reason:#}")),
        };
    }

    if !has(MARKER_V9) && !has(MARKER_V10) {
        return reset_database(conn, "no schema generation marker found".to_string());
    }

    let from = if has(MARKER_V10) { 10 } else { 9 };
    if !has(MARKER_V10) {
        if let Err(e) = migrate_v9_to_v10(conn) {
            error!("migration to generation 10 failed: {e:#}");
        }
    }
    if let Err(e) = migrate_v10_to_v11(conn) {
        error!("migration to generation 11 failed: {e:#}");
    }

    match validate_current_schema(conn) {
        Ok(()) => {
            info!("migrated library schema from generation {from} to {LATEST_GENERATION}");
            Ok(SchemaOutcome::Migrated { from })
        }
        Err(reason) => reset_database(conn, format!("{reason:#}")),
    }
}

/// Check every core table against the expected v11 column shape.
pub fn validate_current_schema(conn: &Connection) -> Result<()> {
    for table in CORE_TABLES {
        table.validate_shape(conn)?;
    }
    Ok(())
}

fn create_latest(conn: &Connection) -> Result<()> {
    for table in CORE_TABLES {
        table.create(conn)?;
    }
    // A fresh database is born fully migrated.
    for marker in [MARKER_V9, MARKER_V10, MARKER_V11] {
        create_marker(conn, marker)?;
    }
    Ok(())
}

fn create_marker(conn: &Connection, name: &str) -> Result<()> {
    conn.execute(
        &format!("CREATE TABLE {name} (generation INTEGER PRIMARY KEY NOT NULL)"),
        [],
    )?;
    Ok(())
}

fn reset_database(conn: &Connection, reason: String) -> Result<SchemaOutcome> {
    error!("library database is in a bad state ({reason}), resetting to an empty schema");
    drop_all_user_tables(conn)?;
    create_latest(conn)?;
    Ok(SchemaOutcome::Reset { reason })
}

// =============================================================================
// Migration steps
// =============================================================================

fn run_migration_step(
    conn: &Connection,
    target: u32,
    apply: impl FnOnce(&Connection) -> Result<()>,
) -> Result<()> {
    info!("migrating library schema to generation {target}");
    conn.pragma_update(None, "foreign_keys", false)?;
    conn.execute("BEGIN IMMEDIATE", [])?;
    let applied = apply(conn);
    let result = match applied {
        Ok(()) => {
            conn.execute("COMMIT", [])?;
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e)
        }
    };
    conn.pragma_update(None, "foreign_keys", true)?;
    result
}

/// v9 -> v10: introduce composers and lyricists; rebuild tracks with the
/// composer/lyricist/comment columns.
fn migrate_v9_to_v10(conn: &Connection) -> Result<()> {
    run_migration_step(conn, 10, |conn| {
        COMPOSERS_TABLE.create(conn)?;
        LYRICISTS_TABLE.create(conn)?;

        TRACKS_TABLE_V10.create_as(conn, "tracks_migration")?;
        conn.execute(
            "INSERT INTO tracks_migration (id, file_name, title, artist_name, album_title, \
             album_artist_name, album_path, track_number, disc_number, duration, rating, \
             genre_name, year) \
             SELECT id, file_name, title, artist_name, album_title, album_artist_name, \
             album_path, track_number, disc_number, duration, rating, genre_name, year \
             FROM tracks",
            [],
        )?;
        conn.execute("DROP TABLE tracks", [])?;
        conn.execute("ALTER TABLE tracks_migration RENAME TO tracks", [])?;
        TRACKS_TABLE_V10.create_indices(conn)?;
        create_marker(conn, MARKER_V10)
    })
}

/// v10 -> v11: rebuild tracks with the duplicate-file priority (every
/// existing row becomes canonical at priority 1) and the audio shape
/// columns.
fn migrate_v10_to_v11(conn: &Connection) -> Result<()> {
    run_migration_step(conn, 11, |conn| {
        TRACKS_TABLE.create_as(conn, "tracks_migration")?;
        conn.execute(
            "INSERT INTO tracks_migration (id, file_name, priority, title, artist_name, \
             album_title, album_artist_name, album_path, track_number, disc_number, duration, \
             rating, genre_name, composer_name, lyricist_name, comment, year, channels, \
             bit_rate, sample_rate, has_embedded_cover) \
             SELECT id, file_name, 1, title, artist_name, album_title, album_artist_name, \
             album_path, track_number, disc_number, duration, rating, genre_name, \
             composer_name, lyricist_name, comment, year, NULL, NULL, NULL, 0 \
             FROM tracks",
            [],
        )?;
        conn.execute("DROP TABLE tracks", [])?;
        conn.execute("ALTER TABLE tracks_migration RENAME TO tracks", [])?;
        TRACKS_TABLE.create_indices(conn)?;
        create_marker(conn, MARKER_V11)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_gets_latest_schema() {
        let conn = Connection::open_in_memory().unwrap();
        let outcome = prepare_database(&conn).unwrap();
        assert!(matches!(outcome, SchemaOutcome::CreatedFresh));
        validate_current_schema(&conn).unwrap();

        let tables = list_user_tables(&conn).unwrap();
        assert!(tables.iter().any(|t| t == "tracks"));
        assert!(tables.iter().any(|t| t == MARKER_V11));
    }

    #[test]
    fn prepare_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        prepare_database(&conn).unwrap();
        let outcome = prepare_database(&conn).unwrap();
        assert!(matches!(outcome, SchemaOutcome::AlreadyCurrent));
    }

    #[test]
    fn unknown_tables_without_marker_trigger_reset() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE something_else (id INTEGER PRIMARY KEY)", [])
            .unwrap();

        let outcome = prepare_database(&conn).unwrap();
        assert!(matches!(outcome, SchemaOutcome::Reset { .. }));
        validate_current_schema(&conn).unwrap();
        let tables = list_user_tables(&conn).unwrap();
        assert!(!tables.iter().any(|t| t == "something_else"));
    }

    #[test]
    fn wrong_column_shape_triggers_reset() {
        let conn = Connection::open_in_memory().unwrap();
        prepare_database(&conn).unwrap();
        conn.execute("ALTER TABLE tracks ADD COLUMN stray TEXT", [])
            .unwrap();

        let outcome = prepare_database(&conn).unwrap();
        assert!(matches!(outcome, SchemaOutcome::Reset { .. }));
        validate_current_schema(&conn).unwrap();
    }
}
