mod changes;
mod models;
mod queries;
mod schema;
mod store;

pub use changes::{ChangeSet, LibraryObserver};
pub use models::{
    Album, Artist, Composer, DiscoverSource, Genre, ImportBatch, Lyricist, Track, TrackFile,
    TrackMetadata,
};
pub use schema::LATEST_GENERATION;
pub use store::{LibraryDbConfig, MusicLibraryDb};
