//! Entities extracted from the catalogue and enriched by metadata providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One fetched unit of source content, content-addressed by its body hash.
///
/// The body is kept as raw text; page readers parse it on demand so the
/// parsed DOM never has to cross a task boundary.
#[derive(Debug, Clone)]
pub struct Page {
    /// Path of the page under the catalogue origin, e.g. `/vol4/beefheart.html`.
    pub path: String,
    /// Hex-encoded blake3 hash of the raw response body.
    pub hash: String,
    /// Value of the `last-modified` response header, falling back to fetch time.
    pub last_modified: DateTime<Utc>,
    /// Raw response body.
    pub body: String,
}

/// An artist as scraped from their catalogue page.
///
/// `albums` holds the raw album rows found on the page; they are split off
/// into the album pipeline and never persisted through the artist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artist {
    /// Canonical catalogue URL, primary key.
    pub url: String,
    pub name: String,
    pub bio: String,
    pub related_artists: Vec<String>,
    pub albums: Vec<Album>,
}

/// An album review row scraped from either an artist page or a ratings page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    /// Path of the page this row was scraped from.
    pub page_url: String,
    /// Catalogue URL of the album's artist.
    pub artist_url: String,
    pub artist_name: String,
    pub name: String,
    /// Review rating on a 0-10 scale.
    pub rating: f64,
    /// Release year; 0 means unknown and may be backfilled by enrichment.
    pub year: i32,
}

impl Album {
    /// Whether this row was scraped from the album's own artist page rather
    /// than an aggregate ratings page.
    #[must_use]
    pub fn from_own_artist_page(&self) -> bool {
        self.page_url == self.artist_url
    }
}

/// An artist together with the image URL resolved by enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedArtist {
    pub artist: Artist,
    /// Resolved image URL; empty when no provider produced one.
    pub image_url: String,
}

/// An album together with the cover URL resolved by enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedAlbum {
    pub album: Album,
    /// Resolved cover URL; empty when no provider produced one.
    pub cover_url: String,
}

/// One provider's proposed match for an artist search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtistCandidate {
    pub id: String,
    pub name: String,
    pub image_url: String,
    /// Raw confidence 0-100 from the provider's own ranking.
    pub confidence: u32,
}

/// One provider's proposed match for an album search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumCandidate {
    pub id: String,
    pub artist_name: String,
    pub name: String,
    pub cover_url: String,
    /// Proposed release year; 0 means the provider did not know.
    pub release_year: i32,
    /// Raw confidence 0-100 from the provider's own ranking.
    pub confidence: u32,
}
