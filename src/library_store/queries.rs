//! Read accessors for the music library database.
//!
//! Every public read opens and closes its own transaction and returns a
//! neutral empty value on failure. Track listings only surface canonical
//! rows: the minimum-priority row among all files sharing one logical
//! track identity.

use super::models::{Album, Artist, Composer, DiscoverSource, Genre, Lyricist, Track, TrackFile};
use super::store::MusicLibraryDb;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

pub(crate) const TRACK_COLUMNS: &str = "id, file_name, priority, title, artist_name, \
    album_title, album_artist_name, album_path, track_number, disc_number, duration, \
    rating, genre_name, composer_name, lyricist_name, comment, year, channels, bit_rate, \
    sample_rate, has_embedded_cover";

const TRACK_COLUMNS_T: &str = "t.id, t.file_name, t.priority, t.title, t.artist_name, \
    t.album_title, t.album_artist_name, t.album_path, t.track_number, t.disc_number, \
    t.duration, t.rating, t.genre_name, t.composer_name, t.lyricist_name, t.comment, \
    t.year, t.channels, t.bit_rate, t.sample_rate, t.has_embedded_cover";

/// Restricts rows of `tracks t` to the canonical file per logical track.
const CANONICAL_TRACK: &str = "t.priority = (SELECT MIN(t2.priority) FROM tracks t2 \
    WHERE t2.title = t.title AND t2.artist_name IS t.artist_name \
    AND t2.album_title IS t.album_title AND t2.album_artist_name IS t.album_artist_name \
    AND t2.album_path IS t.album_path)";

/// Album rows with their effective (canonical) track count computed on
/// the fly.
const ALBUM_SELECT: &str = "SELECT a.id, a.title, a.artist_name, a.album_path, a.cover_uri, \
    (SELECT COUNT(*) FROM tracks t WHERE t.album_title = a.title \
    AND t.album_path IS a.album_path \
    AND (t.album_artist_name IS NULL OR a.artist_name IS NULL \
    OR t.album_artist_name = a.artist_name) \
    AND t.priority = (SELECT MIN(t2.priority) FROM tracks t2 WHERE t2.title = t.title \
    AND t2.artist_name IS t.artist_name AND t2.album_title IS t.album_title \
    AND t2.album_artist_name IS t.album_artist_name AND t2.album_path IS t.album_path)) \
    FROM albums a";

pub(crate) fn track_from_row(row: &Row) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        file_name: row.get(1)?,
        priority: row.get(2)?,
        title: row.get(3)?,
        artist_name: row.get(4)?,
        album_title: row.get(5)?,
        album_artist_name: row.get(6)?,
        album_path: row.get(7)?,
        track_number: row.get(8)?,
        disc_number: row.get(9)?,
        duration_secs: row.get(10)?,
        rating: row.get(11)?,
        genre_name: row.get(12)?,
        composer_name: row.get(13)?,
        lyricist_name: row.get(14)?,
        comment: row.get(15)?,
        year: row.get(16)?,
        channels: row.get(17)?,
        bit_rate: row.get(18)?,
        sample_rate: row.get(19)?,
        has_embedded_cover: row.get(20)?,
    })
}

fn album_from_row(row: &Row) -> rusqlite::Result<Album> {
    Ok(Album {
        id: row.get(0)?,
        title: row.get(1)?,
        artist_name: row.get(2)?,
        album_path: row.get(3)?,
        cover_uri: row.get(4)?,
        tracks_count: row.get(5)?,
    })
}

impl MusicLibraryDb {
    // =========================================================================
    // Tracks
    // =========================================================================

    pub fn track_from_id(&self, id: u64) -> Option<Track> {
        self.with_read_transaction("track_from_id", None, |conn| {
            let track = conn
                .prepare_cached(&format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?1"))?
                .query_row(params![id], track_from_row)
                .optional()?;
            Ok(track)
        })
    }

    pub fn track_id_from_file_name(&self, file_uri: &str) -> Option<u64> {
        self.with_read_transaction("track_id_from_file_name", None, |conn| {
            let id = conn
                .prepare_cached("SELECT id FROM tracks WHERE file_name = ?1")?
                .query_row(params![file_uri], |r| r.get(0))
                .optional()?;
            Ok(id)
        })
    }

    /// Id of the canonical row for (title, album, artist).
    pub fn track_id_from_title_album_artist(
        &self,
        title: &str,
        album: &str,
        artist: &str,
    ) -> Option<u64> {
        self.with_read_transaction("track_id_from_title_album_artist", None, |conn| {
            let id = conn
                .prepare_cached(
                    "SELECT id FROM tracks WHERE title = ?1 AND album_title = ?2 \
                     AND artist_name = ?3 ORDER BY priority LIMIT 1",
                )?
                .query_row(params![title, album, artist], |r| r.get(0))
                .optional()?;
            Ok(id)
        })
    }

    /// Per-file bookkeeping (modification time, import date, play stats).
    pub fn track_file(&self, file_uri: &str) -> Option<TrackFile> {
        self.with_read_transaction("track_file", None, |conn| {
            let record = conn
                .prepare_cached(
                    "SELECT file_name, file_modified_time, import_date, first_play_date, \
                     last_play_date, play_counter FROM track_files WHERE file_name = ?1",
                )?
                .query_row(params![file_uri], |row| {
                    Ok(TrackFile {
                        file_name: row.get(0)?,
                        file_modified_time: row.get(1)?,
                        import_date: row.get(2)?,
                        first_play_date: row.get(3)?,
                        last_play_date: row.get(4)?,
                        play_counter: row.get(5)?,
                    })
                })
                .optional()?;
            Ok(record)
        })
    }

    /// All canonical tracks, ordered for stable display.
    pub fn all_tracks(&self) -> Vec<Track> {
        self.with_read_transaction("all_tracks", Vec::new(), |conn| {
            let sql = format!(
                "SELECT {TRACK_COLUMNS_T} FROM tracks t WHERE {CANONICAL_TRACK} \
                 ORDER BY t.album_title, t.disc_number, t.track_number, t.title"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let tracks = stmt
                .query_map([], track_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tracks)
        })
    }

    /// Canonical tracks of one album, in disc and track order.
    pub fn tracks_of_album(&self, album_id: u64) -> Vec<Track> {
        self.with_read_transaction("tracks_of_album", Vec::new(), |conn| {
            let album: Option<(String, Option<String>, Option<String>)> = conn
                .prepare_cached("SELECT title, artist_name, album_path FROM albums WHERE id = ?1")?
                .query_row(params![album_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
                .optional()?;
            let Some((title, artist_name, album_path)) = album else {
                return Ok(Vec::new());
            };
            let sql = format!(
                "SELECT {TRACK_COLUMNS_T} FROM tracks t WHERE t.album_title = ?1 \
                 AND t.album_path IS ?2 \
                 AND (t.album_artist_name IS NULL OR ?3 IS NULL OR t.album_artist_name = ?3) \
                 AND {CANONICAL_TRACK} \
                 ORDER BY t.disc_number, t.track_number, t.title"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let tracks = stmt
                .query_map(params![title, album_path, artist_name], track_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tracks)
        })
    }

    /// The `count` most recently played canonical tracks.
    pub fn recently_played_tracks(&self, count: usize) -> Vec<Track> {
        self.with_read_transaction("recently_played_tracks", Vec::new(), |conn| {
            let sql = format!(
                "SELECT {TRACK_COLUMNS_T} FROM tracks t \
                 JOIN track_files f ON f.file_name = t.file_name \
                 WHERE f.last_play_date IS NOT NULL AND {CANONICAL_TRACK} \
                 ORDER BY f.last_play_date DESC LIMIT ?1"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let tracks = stmt
                .query_map(params![count as i64], track_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tracks)
        })
    }

    /// The `count` most frequently played canonical tracks, ranked by
    /// play count divided by seconds elapsed since the first play. A
    /// track first played less than one second ago has no meaningful
    /// elapsed time yet; its frequency is defined as zero so it cannot
    /// outrank established favourites on a single play.
    pub fn frequently_played_tracks(&self, count: usize) -> Vec<Track> {
        self.with_read_transaction("frequently_played_tracks", Vec::new(), |conn| {
            let now = Utc::now().timestamp();
            let sql = format!(
                "SELECT {TRACK_COLUMNS_T} FROM tracks t \
                 JOIN track_files f ON f.file_name = t.file_name \
                 WHERE f.play_counter > 0 AND f.first_play_date IS NOT NULL \
                 AND {CANONICAL_TRACK} \
                 ORDER BY CASE WHEN (?1 - f.first_play_date) < 1 THEN 0.0 \
                 ELSE CAST(f.play_counter AS REAL) / (?1 - f.first_play_date) END DESC \
                 LIMIT ?2"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let tracks = stmt
                .query_map(params![now, count as i64], track_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tracks)
        })
    }

    /// Number of canonical tracks.
    pub fn track_count(&self) -> usize {
        self.with_read_transaction("track_count", 0, |conn| {
            let sql = format!("SELECT COUNT(*) FROM tracks t WHERE {CANONICAL_TRACK}");
            let count: i64 = conn.prepare_cached(&sql)?.query_row([], |r| r.get(0))?;
            Ok(count as usize)
        })
    }

    // =========================================================================
    // Albums
    // =========================================================================

    pub fn album_from_id(&self, id: u64) -> Option<Album> {
        self.with_read_transaction("album_from_id", None, |conn| {
            let album = conn
                .prepare_cached(&format!("{ALBUM_SELECT} WHERE a.id = ?1"))?
                .query_row(params![id], album_from_row)
                .optional()?;
            Ok(album)
        })
    }

    pub fn album_from_title_and_artist(&self, title: &str, artist: &str) -> Option<Album> {
        self.with_read_transaction("album_from_title_and_artist", None, |conn| {
            let album = conn
                .prepare_cached(&format!(
                    "{ALBUM_SELECT} WHERE a.title = ?1 AND a.artist_name = ?2"
                ))?
                .query_row(params![title, artist], album_from_row)
                .optional()?;
            Ok(album)
        })
    }

    pub fn all_albums(&self) -> Vec<Album> {
        self.with_read_transaction("all_albums", Vec::new(), |conn| {
            let mut stmt =
                conn.prepare_cached(&format!("{ALBUM_SELECT} ORDER BY a.title, a.artist_name"))?;
            let albums = stmt
                .query_map([], album_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(albums)
        })
    }

    pub fn albums_by_artist(&self, artist: &str) -> Vec<Album> {
        self.with_read_transaction("albums_by_artist", Vec::new(), |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "{ALBUM_SELECT} WHERE a.artist_name = ?1 ORDER BY a.title"
            ))?;
            let albums = stmt
                .query_map(params![artist], album_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(albums)
        })
    }

    /// Albums of one artist that contain at least one track of the genre.
    pub fn albums_by_genre_and_artist(&self, genre: &str, artist: &str) -> Vec<Album> {
        self.with_read_transaction("albums_by_genre_and_artist", Vec::new(), |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT DISTINCT album_row.* FROM ({ALBUM_SELECT}) AS album_row \
                 JOIN tracks tr ON tr.album_title = album_row.title \
                 AND tr.album_path IS album_row.album_path \
                 AND (tr.album_artist_name IS NULL OR album_row.artist_name IS NULL \
                 OR tr.album_artist_name = album_row.artist_name) \
                 WHERE tr.genre_name = ?1 AND album_row.artist_name = ?2 \
                 ORDER BY album_row.title"
            ))?;
            let albums = stmt
                .query_map(params![genre, artist], album_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(albums)
        })
    }

    pub fn album_count(&self) -> usize {
        self.with_read_transaction("album_count", 0, |conn| {
            let count: i64 = conn
                .prepare_cached("SELECT COUNT(*) FROM albums")?
                .query_row([], |r| r.get(0))?;
            Ok(count as usize)
        })
    }

    // =========================================================================
    // Artists, genres, composers, lyricists
    // =========================================================================

    pub fn artist_from_id(&self, id: u64) -> Option<Artist> {
        self.with_read_transaction("artist_from_id", None, |conn| {
            let artist = conn
                .prepare_cached("SELECT id, name FROM artists WHERE id = ?1")?
                .query_row(params![id], |r| {
                    Ok(Artist {
                        id: r.get(0)?,
                        name: r.get(1)?,
                    })
                })
                .optional()?;
            Ok(artist)
        })
    }

    pub fn all_artists(&self) -> Vec<Artist> {
        self.with_read_transaction("all_artists", Vec::new(), |conn| {
            let mut stmt = conn.prepare_cached("SELECT id, name FROM artists ORDER BY name")?;
            let artists = stmt
                .query_map([], |r| {
                    Ok(Artist {
                        id: r.get(0)?,
                        name: r.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(artists)
        })
    }

    /// Artists with at least one canonical track in the genre.
    pub fn artists_by_genre(&self, genre: &str) -> Vec<Artist> {
        self.with_read_transaction("artists_by_genre", Vec::new(), |conn| {
            let sql = format!(
                "SELECT DISTINCT a.id, a.name FROM artists a \
                 JOIN tracks t ON t.artist_name = a.name \
                 WHERE t.genre_name = ?1 AND {CANONICAL_TRACK} ORDER BY a.name"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let artists = stmt
                .query_map(params![genre], |r| {
                    Ok(Artist {
                        id: r.get(0)?,
                        name: r.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(artists)
        })
    }

    pub fn artist_count(&self) -> usize {
        self.with_read_transaction("artist_count", 0, |conn| {
            let count: i64 = conn
                .prepare_cached("SELECT COUNT(*) FROM artists")?
                .query_row([], |r| r.get(0))?;
            Ok(count as usize)
        })
    }

    pub fn all_genres(&self) -> Vec<Genre> {
        self.with_read_transaction("all_genres", Vec::new(), |conn| {
            let mut stmt = conn.prepare_cached("SELECT id, name FROM genres ORDER BY name")?;
            let genres = stmt
                .query_map([], |r| {
                    Ok(Genre {
                        id: r.get(0)?,
                        name: r.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(genres)
        })
    }

    pub fn all_composers(&self) -> Vec<Composer> {
        self.with_read_transaction("all_composers", Vec::new(), |conn| {
            let mut stmt = conn.prepare_cached("SELECT id, name FROM composers ORDER BY name")?;
            let composers = stmt
                .query_map([], |r| {
                    Ok(Composer {
                        id: r.get(0)?,
                        name: r.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(composers)
        })
    }

    pub fn all_lyricists(&self) -> Vec<Lyricist> {
        self.with_read_transaction("all_lyricists", Vec::new(), |conn| {
            let mut stmt = conn.prepare_cached("SELECT id, name FROM lyricists ORDER BY name")?;
            let lyricists = stmt
                .query_map([], |r| {
                    Ok(Lyricist {
                        id: r.get(0)?,
                        name: r.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(lyricists)
        })
    }

    pub fn all_discover_sources(&self) -> Vec<DiscoverSource> {
        self.with_read_transaction("all_discover_sources", Vec::new(), |conn| {
            let mut stmt =
                conn.prepare_cached("SELECT id, name FROM discover_sources ORDER BY name")?;
            let sources = stmt
                .query_map([], |r| {
                    Ok(DiscoverSource {
                        id: r.get(0)?,
                        name: r.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(sources)
        })
    }
}
