//! Deezer search provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::domain::entities::{AlbumCandidate, ArtistCandidate};
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::providers::{Capability, MetadataProvider, ProviderError, read_json};

const DEFAULT_BASE_URL: &str = "https://api.deezer.com";

/// Artwork URLs Deezer serves for artists without a real picture.
const PLACEHOLDER_IMAGES: &[&str] = &[
    "https://e-cdns-images.dzcdn.net/images/artist//1000x1000-000000-80-0-0.jpg",
    "https://e-cdns-images.dzcdn.net/images/artist//500x500-000000-80-0-0.jpg",
    "https://e-cdns-images.dzcdn.net/images/artist//250x250-000000-80-0-0.jpg",
    "https://e-cdns-images.dzcdn.net/images/artist//56x56-000000-80-0-0.jpg",
];

pub struct DeezerProvider {
    artist_search: Capability,
    album_search: Capability,
    client: Client,
    limiter: RateLimiter,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResult<T> {
    #[serde(default)]
    data: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct DeezerArtist {
    id: i64,
    name: String,
    #[serde(default)]
    picture: String,
    #[serde(default)]
    picture_small: String,
    #[serde(default)]
    picture_medium: String,
    #[serde(default)]
    picture_big: String,
    #[serde(default, rename = "picture_xl")]
    picture_xl: String,
}

#[derive(Debug, Default, Deserialize)]
struct DeezerAlbum {
    id: i64,
    title: String,
    #[serde(default)]
    cover: String,
    #[serde(default)]
    cover_small: String,
    #[serde(default)]
    cover_medium: String,
    #[serde(default)]
    cover_big: String,
    #[serde(default, rename = "cover_xl")]
    cover_xl: String,
    artist: DeezerArtist,
}

impl DeezerArtist {
    /// Largest non-placeholder picture.
    fn image(&self) -> String {
        for picture in [
            &self.picture_xl,
            &self.picture_big,
            &self.picture_medium,
            &self.picture_small,
        ] {
            if !picture.is_empty() && !PLACEHOLDER_IMAGES.contains(&picture.as_str()) {
                return picture.clone();
            }
        }
        self.picture.clone()
    }
}

impl DeezerAlbum {
    fn cover(&self) -> String {
        for cover in [
            &self.cover_xl,
            &self.cover_big,
            &self.cover_medium,
            &self.cover_small,
        ] {
            if !cover.is_empty() {
                return cover.clone();
            }
        }
        self.cover.clone()
    }
}

impl DeezerProvider {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            artist_search: Capability::default(),
            album_search: Capability::default(),
            client,
            limiter: RateLimiter::new(50, Duration::from_secs(5)),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl MetadataProvider for DeezerProvider {
    fn name(&self) -> &'static str {
        "deezer"
    }

    fn artist_search(&self) -> &Capability {
        &self.artist_search
    }

    fn album_search(&self) -> &Capability {
        &self.album_search
    }

    async fn search_artists(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Vec<ArtistCandidate>, ProviderError> {
        if !self.artist_search.enabled() {
            return Err(ProviderError::Disabled);
        }

        self.limiter.acquire(cancel).await?;
        let response = self
            .client
            .get(format!("{}/search/artist", self.base_url))
            .query(&[("q", format!("artist:\"{name}\""))])
            .send()
            .await?;
        let result: SearchResult<DeezerArtist> = read_json(response).await?;

        Ok(result
            .data
            .into_iter()
            .map(|artist| ArtistCandidate {
                id: artist.id.to_string(),
                image_url: artist.image(),
                name: artist.name,
                confidence: 100,
            })
            .collect())
    }

    async fn search_albums(
        &self,
        cancel: &CancellationToken,
        artist: &str,
        album: &str,
    ) -> Result<Vec<AlbumCandidate>, ProviderError> {
        if !self.album_search.enabled() {
            return Err(ProviderError::Disabled);
        }

        self.limiter.acquire(cancel).await?;
        let response = self
            .client
            .get(format!("{}/search/album", self.base_url))
            .query(&[("q", format!("artist:\"{artist}\"album:\"{album}\""))])
            .send()
            .await?;
        let result: SearchResult<DeezerAlbum> = read_json(response).await?;

        Ok(result
            .data
            .into_iter()
            .enumerate()
            .map(|(position, found)| AlbumCandidate {
                id: found.id.to_string(),
                artist_name: found.artist.name.clone(),
                cover_url: found.cover(),
                name: found.title,
                release_year: 0,
                confidence: 100u32.saturating_sub(position as u32),
            })
            .collect())
    }
}
