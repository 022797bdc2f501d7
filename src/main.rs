use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fonoteca::{ImportBatch, LibraryDbConfig, MusicLibraryDb};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(name = "fonoteca", about = "Local music library database")]
struct CliArgs {
    /// Path to the SQLite library database file (created if absent).
    #[clap(value_parser = parse_path)]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a JSON batch of scanned track metadata.
    Import {
        /// JSON file with a `tracks` array and an optional `covers` map.
        batch_file: PathBuf,
    },
    /// Remove tracks by file URI.
    Remove { file_uris: Vec<String> },
    /// Print library counts.
    Stats,
    /// List albums.
    Albums,
    /// List canonical tracks, optionally restricted to one album.
    Tracks {
        #[clap(long)]
        album_id: Option<u64>,
    },
    /// List the most recently played tracks.
    Recent {
        #[clap(long, default_value_t = 20)]
        count: usize,
    },
    /// List the most frequently played tracks.
    Frequent {
        #[clap(long, default_value_t = 20)]
        count: usize,
    },
    /// Dump the file URI to modification-time map the store would hand a
    /// scanner for rescan/remove decisions.
    Restored,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();
    let mut db = MusicLibraryDb::open(&LibraryDbConfig::at_path(&args.db_path))?;

    match args.command {
        Command::Import { batch_file } => {
            let raw = std::fs::read_to_string(&batch_file)
                .with_context(|| format!("reading batch file {}", batch_file.display()))?;
            let batch: ImportBatch = serde_json::from_str(&raw)
                .with_context(|| format!("parsing batch file {}", batch_file.display()))?;
            info!("importing {} tracks", batch.tracks.len());
            let changes = db.insert_tracks_list(&batch.tracks, &batch.covers);
            println!(
                "added {} artists, {} albums, {} tracks; modified {} albums, {} tracks",
                changes.inserted_artists.len(),
                changes.inserted_albums.len(),
                changes.inserted_tracks.len(),
                changes.modified_albums.len(),
                changes.modified_tracks.len(),
            );
        }
        Command::Remove { file_uris } => {
            let changes = db.remove_tracks_list(&file_uris);
            println!(
                "removed {} tracks, {} albums, {} artists",
                changes.removed_tracks.len(),
                changes.removed_albums.len(),
                changes.removed_artists.len(),
            );
        }
        Command::Stats => {
            println!("artists: {}", db.artist_count());
            println!("albums:  {}", db.album_count());
            println!("tracks:  {}", db.track_count());
        }
        Command::Albums => {
            for album in db.all_albums() {
                println!(
                    "[{}] {} - {} ({} tracks)",
                    album.id,
                    album.title,
                    album.artist_name.as_deref().unwrap_or("<unknown artist>"),
                    album.tracks_count,
                );
            }
        }
        Command::Tracks { album_id } => {
            let tracks = match album_id {
                Some(id) => db.tracks_of_album(id),
                None => db.all_tracks(),
            };
            for track in tracks {
                println!(
                    "[{}] {} - {} ({})",
                    track.id,
                    track.title,
                    track.artist_name.as_deref().unwrap_or("<unknown artist>"),
                    track.file_name,
                );
            }
        }
        Command::Recent { count } => {
            for track in db.recently_played_tracks(count) {
                println!("[{}] {} ({})", track.id, track.title, track.file_name);
            }
        }
        Command::Frequent { count } => {
            for track in db.frequently_played_tracks(count) {
                println!("[{}] {} ({})", track.id, track.title, track.file_name);
            }
        }
        Command::Restored => {
            let map = db.restored_tracks();
            let json = serde_json::to_string_pretty(&map)?;
            println!("{json}");
        }
    }
    Ok(())
}
