//! SQLite-backed music library store.
//!
//! `MusicLibraryDb` owns the single database connection, the in-memory id
//! counters, and the observer list. All operations are synchronous calls
//! on the caller's thread; there is exactly one logical writer per open
//! database. Public writes wrap the whole batch in one transaction and
//! report the committed result as a [`ChangeSet`], public reads each open
//! their own transaction.

use super::changes::{ChangeSet, ChangeTracker, LibraryObserver};
use super::models::{Track, TrackMetadata};
use super::queries::{track_from_row, TRACK_COLUMNS};
use super::schema::{self, SchemaOutcome};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info};

/// How to open a library database.
#[derive(Clone, Debug)]
pub struct LibraryDbConfig {
    /// Path of the database file; `None` opens an in-memory store.
    pub path: Option<PathBuf>,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for LibraryDbConfig {
    fn default() -> Self {
        LibraryDbConfig {
            path: None,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl LibraryDbConfig {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        LibraryDbConfig {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn in_memory() -> Self {
        LibraryDbConfig::default()
    }
}

/// Next-id counters, one per entity table. Seeded from `MAX(id) + 1` at
/// open so ids stay stable across restarts without trusting AUTOINCREMENT
/// through schema rebuilds; never reused within a process lifetime.
#[derive(Debug)]
struct IdCounters {
    artist: u64,
    album: u64,
    track: u64,
    genre: u64,
    composer: u64,
    lyricist: u64,
    discover_source: u64,
}

impl IdCounters {
    fn seed(conn: &Connection) -> Result<IdCounters> {
        Ok(IdCounters {
            artist: initial_id(conn, "artists")?,
            album: initial_id(conn, "albums")?,
            track: initial_id(conn, "tracks")?,
            genre: initial_id(conn, "genres")?,
            composer: initial_id(conn, "composers")?,
            lyricist: initial_id(conn, "lyricists")?,
            discover_source: initial_id(conn, "discover_sources")?,
        })
    }
}

fn initial_id(conn: &Connection, table: &str) -> Result<u64> {
    let max: Option<i64> = conn.query_row(&format!("SELECT MAX(id) FROM {table}"), [], |r| {
        r.get(0)
    })?;
    Ok(max.map_or(1, |m| m as u64 + 1))
}

/// The name-keyed entity tables that share the lazy create-on-first-use
/// resolution path.
#[derive(Clone, Copy, PartialEq, Eq)]
enum NamedKind {
    Artist,
    Genre,
    Composer,
    Lyricist,
}

impl NamedKind {
    fn select_sql(self) -> &'static str {
        match self {
            NamedKind::Artist => "SELECT id FROM artists WHERE name = ?1",
            NamedKind::Genre => "SELECT id FROM genres WHERE name = ?1",
            NamedKind::Composer => "SELECT id FROM composers WHERE name = ?1",
            NamedKind::Lyricist => "SELECT id FROM lyricists WHERE name = ?1",
        }
    }

    fn insert_sql(self) -> &'static str {
        match self {
            NamedKind::Artist => "INSERT INTO artists (id, name) VALUES (?1, ?2)",
            NamedKind::Genre => "INSERT INTO genres (id, name) VALUES (?1, ?2)",
            NamedKind::Composer => "INSERT INTO composers (id, name) VALUES (?1, ?2)",
            NamedKind::Lyricist => "INSERT INTO lyricists (id, name) VALUES (?1, ?2)",
        }
    }

    fn counter(self, ids: &mut IdCounters) -> &mut u64 {
        match self {
            NamedKind::Artist => &mut ids.artist,
            NamedKind::Genre => &mut ids.genre,
            NamedKind::Composer => &mut ids.composer,
            NamedKind::Lyricist => &mut ids.lyricist,
        }
    }
}

/// The music library database engine.
pub struct MusicLibraryDb {
    conn: Connection,
    ids: IdCounters,
    observers: RefCell<Vec<Box<dyn LibraryObserver>>>,
}

impl MusicLibraryDb {
    /// Open (or create) a library database and bring its schema to the
    /// current generation.
    pub fn open(config: &LibraryDbConfig) -> Result<Self> {
        let conn = match &config.path {
            Some(path) => Connection::open(path)
                .with_context(|| format!("opening library database at {}", path.display()))?,
            None => {
                Connection::open_in_memory().context("opening in-memory library database")?
            }
        };
        conn.busy_timeout(config.busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        match schema::prepare_database(&conn)? {
            SchemaOutcome::CreatedFresh => {}
            SchemaOutcome::AlreadyCurrent => debug!("library schema already current"),
            SchemaOutcome::Migrated { from } => {
                info!("library schema migrated from generation {from}")
            }
            SchemaOutcome::Reset { reason } => {
                error!("library database was reset: {reason}")
            }
        }
        conn.pragma_update(None, "foreign_keys", true)?;

        let ids = IdCounters::seed(&conn)?;
        Ok(MusicLibraryDb {
            conn,
            ids,
            observers: RefCell::new(Vec::new()),
        })
    }

    /// Register an observer for committed change notifications.
    pub fn add_observer(&mut self, observer: Box<dyn LibraryObserver>) {
        self.observers.borrow_mut().push(observer);
    }

    pub(crate) fn notify(&self, mut f: impl FnMut(&mut dyn LibraryObserver)) {
        for observer in self.observers.borrow_mut().iter_mut() {
            f(observer.as_mut());
        }
    }

    pub(crate) fn report_error(&self, what: &str, err: &anyhow::Error) {
        error!("{what}: {err:#}");
        let message = format!("{what}: {err:#}");
        self.notify(|o| o.database_error(&message));
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    fn begin_transaction(&self) -> bool {
        match self.conn.execute("BEGIN IMMEDIATE", []) {
            Ok(_) => true,
            Err(e) => {
                error!("failed to begin transaction: {e}");
                false
            }
        }
    }

    fn commit_transaction(&self) -> bool {
        match self.conn.execute("COMMIT", []) {
            Ok(_) => true,
            Err(e) => {
                error!("failed to commit transaction: {e}");
                false
            }
        }
    }

    fn rollback_transaction(&self) -> bool {
        match self.conn.execute("ROLLBACK", []) {
            Ok(_) => true,
            Err(e) => {
                error!("failed to rollback transaction: {e}");
                false
            }
        }
    }

    /// Run a read under its own transaction. Failures are logged, raised
    /// as an error event, and turned into the neutral `default`.
    pub(crate) fn with_read_transaction<T>(
        &self,
        what: &str,
        default: T,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> T {
        if self.conn.execute("BEGIN", []).is_err() {
            error!("failed to begin read transaction for {what}");
            return default;
        }
        match f(&self.conn) {
            Ok(value) => {
                if self.commit_transaction() {
                    value
                } else {
                    self.rollback_transaction();
                    default
                }
            }
            Err(e) => {
                self.report_error(what, &e);
                self.rollback_transaction();
                default
            }
        }
    }

    // =========================================================================
    // Public writes
    // =========================================================================

    /// Insert or update a batch of scanned tracks. `covers` maps album
    /// titles to cover art URIs discovered next to the audio files.
    ///
    /// One transaction covers the whole batch; individual bad tracks are
    /// skipped without aborting the rest. Resubmitting an identical batch
    /// is a no-op and yields an empty change set.
    pub fn insert_tracks_list(
        &mut self,
        tracks: &[TrackMetadata],
        covers: &HashMap<String, String>,
    ) -> ChangeSet {
        let mut tracker = ChangeTracker::default();
        if !self.begin_transaction() {
            self.notify(|o| o.insert_finished());
            return ChangeSet::default();
        }
        for meta in tracks {
            if let Err(e) = self.internal_insert_track(meta, covers, &mut tracker) {
                self.report_error(&format!("failed to insert track {}", meta.resource_uri), &e);
            }
        }
        if !self.commit_transaction() {
            self.rollback_transaction();
            self.notify(|o| o.insert_finished());
            return ChangeSet::default();
        }
        let changes = tracker.into_change_set();
        self.emit_insert_events(&changes);
        changes
    }

    /// Remove tracks by file URI, cascading to albums and artists whose
    /// last reference disappears.
    pub fn remove_tracks_list(&mut self, file_uris: &[String]) -> ChangeSet {
        let mut tracker = ChangeTracker::default();
        if !self.begin_transaction() {
            self.notify(|o| o.remove_finished());
            return ChangeSet::default();
        }
        for uri in file_uris {
            if let Err(e) = self.internal_remove_track(uri, &mut tracker) {
                self.report_error(&format!("failed to remove track {uri}"), &e);
            }
        }
        if !self.commit_transaction() {
            self.rollback_transaction();
            self.notify(|o| o.remove_finished());
            return ChangeSet::default();
        }
        let changes = tracker.into_change_set();
        self.emit_remove_events(&changes);
        changes
    }

    /// Record a play: bumps the play counter, stamps the last-play date,
    /// and sets the first-play date only if it was never set.
    pub fn track_has_started_playing(&mut self, file_uri: &str, timestamp: i64) -> bool {
        if !self.begin_transaction() {
            return false;
        }
        let result = self.conn.execute(
            "UPDATE track_files SET first_play_date = COALESCE(first_play_date, ?2), \
             last_play_date = ?2, play_counter = play_counter + 1 \
             WHERE file_name = ?1",
            params![file_uri, timestamp],
        );
        match result {
            Ok(updated) => {
                if !self.commit_transaction() {
                    self.rollback_transaction();
                    return false;
                }
                updated > 0
            }
            Err(e) => {
                self.report_error(&format!("failed to record play of {file_uri}"), &e.into());
                self.rollback_transaction();
                false
            }
        }
    }

    /// Delete every track, album, artist, genre, composer and lyricist.
    /// Discover sources survive; id counters keep counting up.
    pub fn clear_data(&mut self) -> bool {
        if !self.begin_transaction() {
            return false;
        }
        for table in [
            "track_files",
            "tracks",
            "albums",
            "artists",
            "genres",
            "composers",
            "lyricists",
        ] {
            if let Err(e) = self.conn.execute(&format!("DELETE FROM {table}"), []) {
                self.report_error(&format!("failed to clear {table}"), &e.into());
                self.rollback_transaction();
                return false;
            }
        }
        self.commit_transaction()
    }

    /// The store's view of the collection as a file URI → modification
    /// time map. A scanner diffs this against the filesystem to decide
    /// what to rescan or remove.
    pub fn restored_tracks(&self) -> HashMap<String, i64> {
        self.with_read_transaction("restored_tracks", HashMap::new(), |conn| {
            let mut stmt =
                conn.prepare_cached("SELECT file_name, file_modified_time FROM track_files")?;
            let map = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<HashMap<String, i64>, _>>()?;
            Ok(map)
        })
    }

    /// Register a scanner identity, returning its stable id.
    pub fn insert_discover_source(&mut self, name: &str) -> Option<u64> {
        if !self.begin_transaction() {
            return None;
        }
        let result: Result<u64> = (|| {
            let existing: Option<u64> = self
                .conn
                .prepare_cached("SELECT id FROM discover_sources WHERE name = ?1")?
                .query_row(params![name], |r| r.get(0))
                .optional()?;
            if let Some(id) = existing {
                return Ok(id);
            }
            let id = self.ids.discover_source;
            self.conn
                .prepare_cached("INSERT INTO discover_sources (id, name) VALUES (?1, ?2)")?
                .execute(params![id, name])?;
            self.ids.discover_source += 1;
            Ok(id)
        })();
        match result {
            Ok(id) => {
                if self.commit_transaction() {
                    Some(id)
                } else {
                    self.rollback_transaction();
                    None
                }
            }
            Err(e) => {
                self.report_error(&format!("failed to register discover source {name}"), &e);
                self.rollback_transaction();
                None
            }
        }
    }

    // =========================================================================
    // Track upsert
    // =========================================================================

    fn internal_insert_track(
        &mut self,
        meta: &TrackMetadata,
        covers: &HashMap<String, String>,
        tracker: &mut ChangeTracker,
    ) -> Result<u64> {
        if meta.resource_uri.is_empty() {
            bail!("track has no resource URI");
        }
        if meta.title.is_empty() {
            bail!("track has no title");
        }

        let album_path = album_path_from_uri(&meta.resource_uri);
        let cover = meta
            .album_title
            .as_deref()
            .and_then(|title| covers.get(title))
            .filter(|c| !c.is_empty())
            .cloned()
            .or_else(|| meta.has_embedded_cover.then(|| meta.resource_uri.clone()));

        match self.track_by_file_name(&meta.resource_uri)? {
            Some(existing) if !track_differs(&existing, meta) => Ok(existing.id),
            Some(existing) => self.update_existing_track(
                existing,
                meta,
                album_path.as_deref(),
                cover.as_deref(),
                tracker,
            ),
            None => self.insert_new_track(meta, album_path.as_deref(), cover.as_deref(), tracker),
        }
    }

    fn insert_new_track(
        &mut self,
        meta: &TrackMetadata,
        album_path: Option<&str>,
        cover: Option<&str>,
        tracker: &mut ChangeTracker,
    ) -> Result<u64> {
        let artist = non_empty(&meta.artist);
        let album_title = non_empty(&meta.album_title);
        let album_artist = non_empty(&meta.album_artist);

        self.resolve_named(NamedKind::Artist, artist, tracker)?;
        self.resolve_named(NamedKind::Artist, album_artist, tracker)?;
        self.resolve_named(NamedKind::Genre, non_empty(&meta.genre), tracker)?;
        self.resolve_named(NamedKind::Composer, non_empty(&meta.composer), tracker)?;
        self.resolve_named(NamedKind::Lyricist, non_empty(&meta.lyricist), tracker)?;

        let album_id = match album_title {
            Some(title) => Some(self.resolve_album(
                title,
                album_artist.or(artist),
                album_path,
                cover,
                tracker,
            )?),
            None => None,
        };

        let priority = self.free_priority(
            &meta.title,
            artist,
            album_title,
            album_artist,
            album_path,
            None,
        )?;

        let id = self.ids.track;
        self.conn
            .prepare_cached(
                "INSERT INTO tracks (id, file_name, priority, title, artist_name, album_title, \
                 album_artist_name, album_path, track_number, disc_number, duration, rating, \
                 genre_name, composer_name, lyricist_name, comment, year, channels, bit_rate, \
                 sample_rate, has_embedded_cover) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
                 ?16, ?17, ?18, ?19, ?20, ?21)",
            )?
            .execute(params![
                id,
                meta.resource_uri,
                priority,
                meta.title,
                artist,
                album_title,
                album_artist,
                album_path,
                meta.track_number,
                meta.disc_number,
                meta.duration_secs,
                meta.rating,
                non_empty(&meta.genre),
                non_empty(&meta.composer),
                non_empty(&meta.lyricist),
                non_empty(&meta.comment),
                meta.year,
                meta.channels,
                meta.bit_rate,
                meta.sample_rate,
                meta.has_embedded_cover,
            ])?;
        self.ids.track += 1;

        self.conn
            .prepare_cached(
                "INSERT INTO track_files (file_name, file_modified_time, import_date, \
                 first_play_date, last_play_date, play_counter) \
                 VALUES (?1, ?2, ?3, NULL, NULL, 0)",
            )?
            .execute(params![
                meta.resource_uri,
                meta.file_modified_time,
                Utc::now().timestamp(),
            ])?;

        if let Some(album_id) = album_id {
            self.refresh_album_cover(album_id, cover, tracker)?;
            tracker.record_modified_album(album_id);
        }
        tracker.record_inserted_track(id);
        Ok(id)
    }

    fn update_existing_track(
        &mut self,
        existing: Track,
        meta: &TrackMetadata,
        album_path: Option<&str>,
        cover: Option<&str>,
        tracker: &mut ChangeTracker,
    ) -> Result<u64> {
        // A field the new scan could not read keeps its stored value.
        let artist = non_empty(&meta.artist)
            .map(str::to_string)
            .or_else(|| existing.artist_name.clone());
        let album_title = non_empty(&meta.album_title)
            .map(str::to_string)
            .or_else(|| existing.album_title.clone());
        let album_artist = non_empty(&meta.album_artist)
            .map(str::to_string)
            .or_else(|| existing.album_artist_name.clone());
        let album_path = album_path
            .map(str::to_string)
            .or_else(|| existing.album_path.clone());
        let genre = non_empty(&meta.genre)
            .map(str::to_string)
            .or_else(|| existing.genre_name.clone());
        let composer = non_empty(&meta.composer)
            .map(str::to_string)
            .or_else(|| existing.composer_name.clone());
        let lyricist = non_empty(&meta.lyricist)
            .map(str::to_string)
            .or_else(|| existing.lyricist_name.clone());
        let comment = non_empty(&meta.comment)
            .map(str::to_string)
            .or_else(|| existing.comment.clone());
        let track_number = meta.track_number.or(existing.track_number);
        let disc_number = meta.disc_number.or(existing.disc_number);
        let duration = meta.duration_secs.or(existing.duration_secs);
        let rating = meta.rating.or(existing.rating);
        let year = meta.year.or(existing.year);
        let channels = meta.channels.or(existing.channels);
        let bit_rate = meta.bit_rate.or(existing.bit_rate);
        let sample_rate = meta.sample_rate.or(existing.sample_rate);

        self.resolve_named(NamedKind::Artist, artist.as_deref(), tracker)?;
        self.resolve_named(NamedKind::Artist, album_artist.as_deref(), tracker)?;
        self.resolve_named(NamedKind::Genre, genre.as_deref(), tracker)?;
        self.resolve_named(NamedKind::Composer, composer.as_deref(), tracker)?;
        self.resolve_named(NamedKind::Lyricist, lyricist.as_deref(), tracker)?;

        let old_album_id = self.album_id_for_track(&existing)?;
        let new_album_id = match album_title.as_deref() {
            Some(title) => Some(self.resolve_album(
                title,
                album_artist.as_deref().or(artist.as_deref()),
                album_path.as_deref(),
                cover,
                tracker,
            )?),
            None => None,
        };

        let priority = self.free_priority(
            &meta.title,
            artist.as_deref(),
            album_title.as_deref(),
            album_artist.as_deref(),
            album_path.as_deref(),
            Some(existing.id),
        )?;

        self.conn
            .prepare_cached(
                "UPDATE tracks SET priority = ?2, title = ?3, artist_name = ?4, \
                 album_title = ?5, album_artist_name = ?6, album_path = ?7, \
                 track_number = ?8, disc_number = ?9, duration = ?10, rating = ?11, \
                 genre_name = ?12, composer_name = ?13, lyricist_name = ?14, comment = ?15, \
                 year = ?16, channels = ?17, bit_rate = ?18, sample_rate = ?19, \
                 has_embedded_cover = ?20 \
                 WHERE id = ?1",
            )?
            .execute(params![
                existing.id,
                priority,
                meta.title,
                artist,
                album_title,
                album_artist,
                album_path,
                track_number,
                disc_number,
                duration,
                rating,
                genre,
                composer,
                lyricist,
                comment,
                year,
                channels,
                bit_rate,
                sample_rate,
                meta.has_embedded_cover,
            ])?;

        self.conn
            .prepare_cached("UPDATE track_files SET file_modified_time = ?2 WHERE file_name = ?1")?
            .execute(params![existing.file_name, meta.file_modified_time])?;

        if let Some(album_id) = new_album_id {
            self.refresh_album_cover(album_id, cover, tracker)?;
            tracker.record_modified_album(album_id);
        }
        if let Some(old_album_id) = old_album_id {
            if new_album_id != Some(old_album_id) {
                self.prune_album_if_empty(old_album_id, tracker)?;
            }
        }
        tracker.record_modified_track(existing.id);
        Ok(existing.id)
    }

    fn internal_remove_track(&mut self, uri: &str, tracker: &mut ChangeTracker) -> Result<()> {
        let Some(track) = self.track_by_file_name(uri)? else {
            debug!("remove requested for unknown file {uri}");
            return Ok(());
        };

        let album_id = self.album_id_for_track(&track)?;
        // track_files row goes with it through the cascade
        self.conn
            .execute("DELETE FROM tracks WHERE id = ?1", params![track.id])?;
        tracker.record_removed_track(track.id);

        // a surviving duplicate of the same logical track becomes canonical
        let promoted: Option<u64> = self
            .conn
            .prepare_cached(
                "SELECT id FROM tracks WHERE title = ?1 AND artist_name IS ?2 \
                 AND album_title IS ?3 AND album_artist_name IS ?4 AND album_path IS ?5 \
                 ORDER BY priority LIMIT 1",
            )?
            .query_row(
                params![
                    track.title,
                    track.artist_name,
                    track.album_title,
                    track.album_artist_name,
                    track.album_path,
                ],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(promoted) = promoted {
            tracker.record_modified_track(promoted);
        }

        if let Some(album_id) = album_id {
            self.prune_album_if_empty(album_id, tracker)?;
        }
        self.prune_orphan_artist(track.artist_name.as_deref(), tracker)?;
        self.prune_orphan_artist(track.album_artist_name.as_deref(), tracker)?;
        self.prune_orphan_named(NamedKind::Genre, track.genre_name.as_deref())?;
        self.prune_orphan_named(NamedKind::Composer, track.composer_name.as_deref())?;
        self.prune_orphan_named(NamedKind::Lyricist, track.lyricist_name.as_deref())?;
        Ok(())
    }

    // =========================================================================
    // Identity resolution
    // =========================================================================

    /// Resolve a name to its id, inserting the row if the name was never
    /// seen. Empty or absent names resolve to no id without any write.
    fn resolve_named(
        &mut self,
        kind: NamedKind,
        name: Option<&str>,
        tracker: &mut ChangeTracker,
    ) -> Result<Option<u64>> {
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            return Ok(None);
        };
        let existing: Option<u64> = self
            .conn
            .prepare_cached(kind.select_sql())?
            .query_row(params![name], |r| r.get(0))
            .optional()?;
        if let Some(id) = existing {
            return Ok(Some(id));
        }
        let id = *kind.counter(&mut self.ids);
        self.conn
            .prepare_cached(kind.insert_sql())?
            .execute(params![id, name])?;
        *kind.counter(&mut self.ids) += 1;
        if kind == NamedKind::Artist {
            tracker.record_inserted_artist(id);
        }
        Ok(Some(id))
    }

    /// Resolve an album by (title, artist, path), creating it on first
    /// sight. An album created before any of its tracks knew the album
    /// artist is matched by (title, path) and gets the artist backfilled.
    fn resolve_album(
        &mut self,
        title: &str,
        artist_name: Option<&str>,
        album_path: Option<&str>,
        cover: Option<&str>,
        tracker: &mut ChangeTracker,
    ) -> Result<u64> {
        let artist_name = artist_name.filter(|n| !n.is_empty());

        if let Some(artist) = artist_name {
            let existing: Option<u64> = self
                .conn
                .prepare_cached(
                    "SELECT id FROM albums WHERE title = ?1 AND artist_name = ?2 \
                     AND album_path IS ?3",
                )?
                .query_row(params![title, artist, album_path], |r| r.get(0))
                .optional()?;
            if let Some(id) = existing {
                return Ok(id);
            }
            let artistless: Option<u64> = self
                .conn
                .prepare_cached(
                    "SELECT id FROM albums WHERE title = ?1 AND album_path IS ?2 \
                     AND artist_name IS NULL",
                )?
                .query_row(params![title, album_path], |r| r.get(0))
                .optional()?;
            if let Some(id) = artistless {
                self.resolve_named(NamedKind::Artist, Some(artist), tracker)?;
                self.conn.execute(
                    "UPDATE albums SET artist_name = ?2 WHERE id = ?1",
                    params![id, artist],
                )?;
                tracker.record_modified_album(id);
                return Ok(id);
            }
        } else {
            let existing: Option<u64> = self
                .conn
                .prepare_cached("SELECT id FROM albums WHERE title = ?1 AND album_path IS ?2")?
                .query_row(params![title, album_path], |r| r.get(0))
                .optional()?;
            if let Some(id) = existing {
                return Ok(id);
            }
        }

        if let Some(artist) = artist_name {
            self.resolve_named(NamedKind::Artist, Some(artist), tracker)?;
        }
        let id = self.ids.album;
        self.conn
            .prepare_cached(
                "INSERT INTO albums (id, title, artist_name, album_path, cover_uri) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(params![id, title, artist_name, album_path, cover])?;
        self.ids.album += 1;
        tracker.record_inserted_album(id);
        Ok(id)
    }

    // =========================================================================
    // Internal lookups and maintenance
    // =========================================================================

    fn track_by_file_name(&self, file_name: &str) -> Result<Option<Track>> {
        let track = self
            .conn
            .prepare_cached(&format!(
                "SELECT {TRACK_COLUMNS} FROM tracks WHERE file_name = ?1"
            ))?
            .query_row(params![file_name], track_from_row)
            .optional()?;
        Ok(track)
    }

    /// Find the id of a duplicate of the given logical track identity at
    /// the given priority, excluding one row (the row being updated).
    fn duplicate_track_id(
        &self,
        title: &str,
        artist: Option<&str>,
        album_title: Option<&str>,
        album_artist: Option<&str>,
        album_path: Option<&str>,
        priority: i32,
        exclude: Option<u64>,
    ) -> Result<Option<u64>> {
        let id = self
            .conn
            .prepare_cached(
                "SELECT id FROM tracks WHERE priority = ?1 AND title = ?2 \
                 AND artist_name IS ?3 AND album_title IS ?4 \
                 AND album_artist_name IS ?5 AND album_path IS ?6 \
                 AND (?7 IS NULL OR id != ?7)",
            )?
            .query_row(
                params![priority, title, artist, album_title, album_artist, album_path, exclude],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Probe priorities starting at 1 until one is unused for this
    /// logical track identity. This is how several files representing the
    /// same track coexist under the table's uniqueness constraint.
    fn free_priority(
        &self,
        title: &str,
        artist: Option<&str>,
        album_title: Option<&str>,
        album_artist: Option<&str>,
        album_path: Option<&str>,
        exclude: Option<u64>,
    ) -> Result<i32> {
        let mut priority = 1;
        while self
            .duplicate_track_id(
                title,
                artist,
                album_title,
                album_artist,
                album_path,
                priority,
                exclude,
            )?
            .is_some()
        {
            priority += 1;
        }
        Ok(priority)
    }

    /// The album a track row belongs to, via the (title, artist, path)
    /// triple. Prefers an exact album-artist match, falls back to an
    /// album without artist.
    fn album_id_for_track(&self, track: &Track) -> Result<Option<u64>> {
        let Some(album_title) = track.album_title.as_deref() else {
            return Ok(None);
        };
        let effective_artist = track
            .album_artist_name
            .as_deref()
            .or(track.artist_name.as_deref());
        let id = self
            .conn
            .prepare_cached(
                "SELECT id FROM albums WHERE title = ?1 AND album_path IS ?2 \
                 AND (artist_name IS ?3 OR artist_name IS NULL OR ?3 IS NULL) \
                 ORDER BY CASE WHEN artist_name IS ?3 THEN 0 ELSE 1 END LIMIT 1",
            )?
            .query_row(params![album_title, track.album_path, effective_artist], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(id)
    }

    fn album_track_count(&self, album_id: u64) -> Result<i64> {
        let row: Option<(String, Option<String>, Option<String>)> = self
            .conn
            .prepare_cached("SELECT title, artist_name, album_path FROM albums WHERE id = ?1")?
            .query_row(params![album_id], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .optional()?;
        let Some((title, artist_name, album_path)) = row else {
            return Ok(0);
        };
        let count = self
            .conn
            .prepare_cached(
                "SELECT COUNT(*) FROM tracks WHERE album_title = ?1 AND album_path IS ?2 \
                 AND (album_artist_name IS NULL OR ?3 IS NULL OR album_artist_name = ?3)",
            )?
            .query_row(params![title, album_path, artist_name], |r| r.get(0))?;
        Ok(count)
    }

    /// Delete the album when nothing references it anymore, otherwise
    /// report it as modified. Deleting the album may in turn orphan its
    /// artist.
    fn prune_album_if_empty(&mut self, album_id: u64, tracker: &mut ChangeTracker) -> Result<()> {
        if self.album_track_count(album_id)? > 0 {
            tracker.record_modified_album(album_id);
            return Ok(());
        }
        let artist_name: Option<Option<String>> = self
            .conn
            .prepare_cached("SELECT artist_name FROM albums WHERE id = ?1")?
            .query_row(params![album_id], |r| r.get(0))
            .optional()?;
        let deleted = self
            .conn
            .execute("DELETE FROM albums WHERE id = ?1", params![album_id])?;
        if deleted > 0 {
            tracker.record_removed_album(album_id);
            if let Some(artist_name) = artist_name {
                self.prune_orphan_artist(artist_name.as_deref(), tracker)?;
            }
        }
        Ok(())
    }

    fn prune_orphan_artist(
        &mut self,
        name: Option<&str>,
        tracker: &mut ChangeTracker,
    ) -> Result<()> {
        let Some(name) = name else { return Ok(()) };
        let references: i64 = self
            .conn
            .prepare_cached(
                "SELECT (SELECT COUNT(*) FROM tracks \
                 WHERE artist_name = ?1 OR album_artist_name = ?1) \
                 + (SELECT COUNT(*) FROM albums WHERE artist_name = ?1)",
            )?
            .query_row(params![name], |r| r.get(0))?;
        if references > 0 {
            return Ok(());
        }
        let id: Option<u64> = self
            .conn
            .prepare_cached("SELECT id FROM artists WHERE name = ?1")?
            .query_row(params![name], |r| r.get(0))
            .optional()?;
        if let Some(id) = id {
            self.conn
                .execute("DELETE FROM artists WHERE id = ?1", params![id])?;
            tracker.record_removed_artist(id);
        }
        Ok(())
    }

    fn prune_orphan_named(&mut self, kind: NamedKind, name: Option<&str>) -> Result<()> {
        let Some(name) = name else { return Ok(()) };
        let (count_sql, delete_sql) = match kind {
            NamedKind::Genre => (
                "SELECT COUNT(*) FROM tracks WHERE genre_name = ?1",
                "DELETE FROM genres WHERE name = ?1",
            ),
            NamedKind::Composer => (
                "SELECT COUNT(*) FROM tracks WHERE composer_name = ?1",
                "DELETE FROM composers WHERE name = ?1",
            ),
            NamedKind::Lyricist => (
                "SELECT COUNT(*) FROM tracks WHERE lyricist_name = ?1",
                "DELETE FROM lyricists WHERE name = ?1",
            ),
            NamedKind::Artist => return Ok(()),
        };
        let references: i64 = self
            .conn
            .prepare_cached(count_sql)?
            .query_row(params![name], |r| r.get(0))?;
        if references == 0 {
            self.conn.prepare_cached(delete_sql)?.execute(params![name])?;
        }
        Ok(())
    }

    /// Fill in the album cover when a better (non-empty) one becomes
    /// available; an already-set cover is left alone.
    fn refresh_album_cover(
        &mut self,
        album_id: u64,
        cover: Option<&str>,
        tracker: &mut ChangeTracker,
    ) -> Result<()> {
        let Some(cover) = cover.filter(|c| !c.is_empty()) else {
            return Ok(());
        };
        let current: Option<Option<String>> = self
            .conn
            .prepare_cached("SELECT cover_uri FROM albums WHERE id = ?1")?
            .query_row(params![album_id], |r| r.get(0))
            .optional()?;
        let Some(current) = current else {
            return Ok(());
        };
        if current.as_deref().map_or(true, str::is_empty) {
            self.conn.execute(
                "UPDATE albums SET cover_uri = ?2 WHERE id = ?1",
                params![album_id, cover],
            )?;
            tracker.record_modified_album(album_id);
        }
        Ok(())
    }

    // =========================================================================
    // Post-commit notification
    // =========================================================================

    /// Announce an insert batch: artists first, then albums, then tracks,
    /// each fetched fresh so observers see the committed state. Ends with
    /// the terminal insert-finished signal.
    fn emit_insert_events(&self, changes: &ChangeSet) {
        let artists: Vec<_> = changes
            .inserted_artists
            .iter()
            .filter_map(|id| self.artist_from_id(*id))
            .collect();
        if !artists.is_empty() {
            self.notify(|o| o.artists_added(&artists));
        }

        let albums: Vec<_> = changes
            .inserted_albums
            .iter()
            .filter_map(|id| self.album_from_id(*id))
            .collect();
        if !albums.is_empty() {
            self.notify(|o| o.albums_added(&albums));
        }

        let modified_albums: Vec<_> = changes
            .modified_albums
            .iter()
            .filter_map(|id| self.album_from_id(*id))
            .collect();
        if !modified_albums.is_empty() {
            self.notify(|o| o.albums_modified(&modified_albums));
        }

        let tracks: Vec<_> = changes
            .inserted_tracks
            .iter()
            .filter_map(|id| self.track_from_id(*id))
            .collect();
        if !tracks.is_empty() {
            self.notify(|o| o.tracks_added(&tracks));
        }

        let modified_tracks: Vec<_> = changes
            .modified_tracks
            .iter()
            .filter_map(|id| self.track_from_id(*id))
            .collect();
        if !modified_tracks.is_empty() {
            self.notify(|o| o.tracks_modified(&modified_tracks));
        }

        // an insert batch can empty out an album when a track moves
        if !changes.removed_albums.is_empty() {
            self.notify(|o| o.albums_removed(&changes.removed_albums));
        }
        if !changes.removed_artists.is_empty() {
            self.notify(|o| o.artists_removed(&changes.removed_artists));
        }

        self.notify(|o| o.insert_finished());
    }

    /// Announce a removal batch: children before parents, then whatever
    /// was left modified, then the terminal remove-finished signal.
    fn emit_remove_events(&self, changes: &ChangeSet) {
        if !changes.removed_tracks.is_empty() {
            self.notify(|o| o.tracks_removed(&changes.removed_tracks));
        }
        if !changes.removed_albums.is_empty() {
            self.notify(|o| o.albums_removed(&changes.removed_albums));
        }
        if !changes.removed_artists.is_empty() {
            self.notify(|o| o.artists_removed(&changes.removed_artists));
        }

        let modified_albums: Vec<_> = changes
            .modified_albums
            .iter()
            .filter_map(|id| self.album_from_id(*id))
            .collect();
        if !modified_albums.is_empty() {
            self.notify(|o| o.albums_modified(&modified_albums));
        }
        let modified_tracks: Vec<_> = changes
            .modified_tracks
            .iter()
            .filter_map(|id| self.track_from_id(*id))
            .collect();
        if !modified_tracks.is_empty() {
            self.notify(|o| o.tracks_modified(&modified_tracks));
        }

        self.notify(|o| o.remove_finished());
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Compare a stored track against freshly scanned metadata. A field the
/// scan did not provide never counts as a change; a provided field counts
/// when it differs from the stored value.
fn track_differs(existing: &Track, meta: &TrackMetadata) -> bool {
    fn changed_str(new: Option<&str>, stored: Option<&str>) -> bool {
        matches!(new, Some(n) if stored != Some(n))
    }
    fn changed_num<T: PartialEq + Copy>(new: Option<T>, stored: Option<T>) -> bool {
        matches!(new, Some(n) if stored != Some(n))
    }

    existing.title != meta.title
        || changed_str(non_empty(&meta.artist), existing.artist_name.as_deref())
        || changed_str(non_empty(&meta.album_title), existing.album_title.as_deref())
        || changed_str(
            non_empty(&meta.album_artist),
            existing.album_artist_name.as_deref(),
        )
        || changed_num(meta.track_number, existing.track_number)
        || changed_num(meta.disc_number, existing.disc_number)
        || changed_num(meta.duration_secs, existing.duration_secs)
        || changed_num(meta.rating, existing.rating)
        || changed_str(non_empty(&meta.genre), existing.genre_name.as_deref())
        || changed_str(non_empty(&meta.composer), existing.composer_name.as_deref())
        || changed_str(non_empty(&meta.lyricist), existing.lyricist_name.as_deref())
        || changed_str(non_empty(&meta.comment), existing.comment.as_deref())
        || changed_num(meta.year, existing.year)
        || changed_num(meta.channels, existing.channels)
        || changed_num(meta.bit_rate, existing.bit_rate)
        || changed_num(meta.sample_rate, existing.sample_rate)
        || meta.has_embedded_cover != existing.has_embedded_cover
}

/// The directory portion of a resource locator, with scheme, authority
/// (user-info included), query and fragment stripped. This path is part
/// of every album and track identity key.
fn album_path_from_uri(uri: &str) -> Option<String> {
    let uri = &uri[..uri.find(['?', '#']).unwrap_or(uri.len())];
    let path = match uri.find("://") {
        Some(scheme_end) => {
            let rest = &uri[scheme_end + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => return None,
            }
        }
        None => uri,
    };
    let (dir, _file) = path.rsplit_once('/')?;
    if dir.is_empty() {
        Some("/".to_string())
    } else {
        Some(dir.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn album_path_strips_scheme_and_query() {
        assert_eq!(
            album_path_from_uri("file:///home/user/Music/album/track.flac"),
            Some("/home/user/Music/album".to_string())
        );
        assert_eq!(
            album_path_from_uri("http://user:pw@host:8080/share/album/track.mp3?session=1"),
            Some("/share/album".to_string())
        );
        assert_eq!(
            album_path_from_uri("/music/album/track.ogg#t=10"),
            Some("/music/album".to_string())
        );
    }

    #[test]
    fn album_path_of_root_file_is_root() {
        assert_eq!(album_path_from_uri("/track.flac"), Some("/".to_string()));
        assert_eq!(
            album_path_from_uri("file:///track.flac"),
            Some("/".to_string())
        );
    }

    #[test]
    fn album_path_of_bare_name_is_absent() {
        assert_eq!(album_path_from_uri("track.flac"), None);
        assert_eq!(album_path_from_uri("file://host"), None);
    }

    #[test]
    fn unchanged_metadata_is_not_a_difference() {
        let meta = TrackMetadata {
            resource_uri: "/m/a/t.flac".to_string(),
            title: "t".to_string(),
            artist: Some("artist".to_string()),
            album_title: Some("album".to_string()),
            track_number: Some(2),
            duration_secs: Some(180),
            ..Default::default()
        };
        let stored = Track {
            id: 1,
            file_name: "/m/a/t.flac".to_string(),
            priority: 1,
            title: "t".to_string(),
            artist_name: Some("artist".to_string()),
            album_title: Some("album".to_string()),
            album_artist_name: None,
            album_path: Some("/m/a".to_string()),
            track_number: Some(2),
            disc_number: None,
            duration_secs: Some(180),
            rating: None,
            genre_name: None,
            composer_name: None,
            lyricist_name: None,
            comment: None,
            year: None,
            channels: None,
            bit_rate: None,
            sample_rate: None,
            has_embedded_cover: false,
        };
        assert!(!track_differs(&stored, &meta));

        // an absent incoming field is not a change
        let mut sparse = meta.clone();
        sparse.track_number = None;
        sparse.duration_secs = None;
        assert!(!track_differs(&stored, &sparse));

        // a present differing field is
        let mut retagged = meta;
        retagged.rating = Some(5);
        assert!(track_differs(&stored, &retagged));
    }
}
