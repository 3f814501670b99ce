//! Core domain types shared across the pipeline.

pub mod entities;
pub mod status;
pub mod store;

pub use entities::{Album, AlbumCandidate, Artist, ArtistCandidate, EnrichedAlbum, EnrichedArtist, Page};
pub use status::UpdateStatus;
pub use store::{CatalogStore, StoreError, UpsertOutcome};
