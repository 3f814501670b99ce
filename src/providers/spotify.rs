//! Spotify search provider with client-credentials auth.
//!
//! Spotify answers `429 Too Many Requests` with a `retry-after` header; that
//! suspends this provider's limiter for the advertised delay and the request
//! is retried exactly once. A second 429 surfaces as an error so the item is
//! skipped instead of recursing against a blocked remote.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::entities::{AlbumCandidate, ArtistCandidate};
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::providers::{Capability, MetadataProvider, ProviderError, read_json};

const DEFAULT_BASE_URL: &str = "https://api.spotify.com";
const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

pub struct SpotifyProvider {
    artist_search: Capability,
    album_search: Capability,
    client: Client,
    limiter: RateLimiter,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct Image {
    #[serde(default)]
    height: u32,
    #[serde(default)]
    width: u32,
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct SpotifyArtist {
    id: String,
    name: String,
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    id: String,
    name: String,
    #[serde(default)]
    images: Vec<Image>,
    #[serde(default)]
    artists: Vec<AlbumArtist>,
    #[serde(default)]
    release_date: String,
}

#[derive(Debug, Deserialize)]
struct AlbumArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Paged<T> {
    #[serde(default)]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ArtistSearchResult {
    artists: Paged<SpotifyArtist>,
}

#[derive(Debug, Deserialize)]
struct AlbumSearchResult {
    albums: Paged<SpotifyAlbum>,
}

fn largest_image(images: &[Image]) -> String {
    images
        .iter()
        .max_by_key(|image| u64::from(image.width) * u64::from(image.height))
        .map(|image| image.url.clone())
        .unwrap_or_default()
}

impl SpotifyAlbum {
    fn year(&self) -> i32 {
        self.release_date
            .split('-')
            .next()
            .and_then(|year| year.parse().ok())
            .unwrap_or(0)
    }

    fn artist(&self) -> String {
        self.artists
            .iter()
            .map(|artist| artist.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl SpotifyProvider {
    #[must_use]
    pub fn new(client: Client, client_id: String, client_secret: String) -> Self {
        Self {
            artist_search: Capability::default(),
            album_search: Capability::default(),
            client,
            limiter: RateLimiter::new(240, Duration::from_secs(30)),
            base_url: DEFAULT_BASE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_base_urls(
        mut self,
        base_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        self.base_url = base_url.into();
        self.token_url = token_url.into();
        self
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let token: TokenResponse = read_json(response).await?;

        // Refresh a minute early so in-flight requests never race expiry.
        let expires_at =
            Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(60).max(1));
        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });

        Ok(access_token)
    }

    /// Sends a search request, suspending and retrying once on 429.
    async fn do_search(
        &self,
        cancel: &CancellationToken,
        kind: &str,
        query: String,
    ) -> Result<reqwest::Response, ProviderError> {
        for attempt in 0..2 {
            self.limiter.acquire(cancel).await?;
            let token = self.access_token().await?;

            let response = self
                .client
                .get(format!("{}/v1/search", self.base_url))
                .bearer_auth(token)
                .query(&[("type", kind), ("q", query.as_str())])
                .send()
                .await?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(1);
                debug!("got a 429 from spotify, retry-after {}s", retry_after);

                self.limiter.suspend(Duration::from_secs(retry_after));
                if attempt == 0 {
                    continue;
                }
                return Err(ProviderError::RateLimited);
            }

            return Ok(response);
        }

        Err(ProviderError::RateLimited)
    }
}

#[async_trait]
impl MetadataProvider for SpotifyProvider {
    fn name(&self) -> &'static str {
        "spotify"
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

        let response = self
            .do_search(cancel, "artist", format!("artist:{name}"))
            .await?;
        let result: ArtistSearchResult = read_json(response).await?;

        Ok(result
            .artists
            .items
            .into_iter()
            .enumerate()
            .map(|(position, artist)| ArtistCandidate {
                id: artist.id.clone(),
                image_url: largest_image(&artist.images),
                name: artist.name,
                confidence: 100u32.saturating_sub(position as u32),
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

        let response = self
            .do_search(cancel, "album", format!("artist:{artist} album:{album}"))
            .await?;
        let result: AlbumSearchResult = read_json(response).await?;

        Ok(result
            .albums
            .items
            .into_iter()
            .enumerate()
            .map(|(position, found)| AlbumCandidate {
                id: found.id.clone(),
                artist_name: found.artist(),
                cover_url: largest_image(&found.images),
                release_year: found.year(),
                name: found.name,
                confidence: 100u32.saturating_sub(position as u32),
            })
            .collect())
    }
}
