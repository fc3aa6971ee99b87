//! Track persistence

pub mod tracks;

pub use tracks::{SqliteTrackStore, TrackRecord, TrackStore};
