//! MusicBrainz release search with cover-art lookup.
//!
//! Album search only; the artist capability is never honoured. Covers come
//! from the cover-art archive's redirect endpoints, so the client must not
//! follow redirects.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Client, StatusCode, header::LOCATION};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::entities::{AlbumCandidate, ArtistCandidate};
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::providers::{Capability, MetadataProvider, ProviderError, read_json};

const DEFAULT_BASE_URL: &str = "https://musicbrainz.org";
const DEFAULT_COVER_BASE_URL: &str = "https://coverartarchive.org";
const USER_AGENT: &str = "tonearm/0.2 (https://github.com/tonearm/tonearm)";

/// Scores below this are not worth a cover-art round trip.
const COVER_LOOKUP_THRESHOLD: u32 = 80;

pub struct MusicBrainzProvider {
    artist_search: Capability,
    album_search: Capability,
    client: Client,
    limiter: RateLimiter,
    base_url: String,
    cover_base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    releases: Vec<Release>,
}

#[derive(Debug, Deserialize)]
struct Release {
    id: String,
    #[serde(default)]
    score: u32,
    title: String,
    #[serde(default, rename = "artist-credit")]
    artist_credit: Vec<ArtistCredit>,
    #[serde(default)]
    date: String,
}

#[derive(Debug, Deserialize)]
struct ArtistCredit {
    artist: CreditedArtist,
}

#[derive(Debug, Deserialize)]
struct CreditedArtist {
    name: String,
}

impl Release {
    /// Dates come as `2006`, `2006-01` or `2006-01-02`; the year prefix is
    /// all we need.
    fn year(&self) -> i32 {
        self.date
            .split('-')
            .next()
            .and_then(|year| year.parse().ok())
            .unwrap_or(0)
    }

    fn artist(&self) -> String {
        self.artist_credit
            .iter()
            .map(|credit| credit.artist.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl MusicBrainzProvider {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            artist_search: Capability::default(),
            album_search: Capability::default(),
            client,
            limiter: RateLimiter::new(1, Duration::from_secs(1)),
            base_url: DEFAULT_BASE_URL.to_string(),
            cover_base_url: DEFAULT_COVER_BASE_URL.to_string(),
        })
    }

    #[must_use]
    pub fn with_base_urls(
        mut self,
        base_url: impl Into<String>,
        cover_base_url: impl Into<String>,
    ) -> Self {
        self.base_url = base_url.into();
        self.cover_base_url = cover_base_url.into();
        self
    }

    /// Follows the cover-art redirect chain by hand, largest size first.
    async fn cover(&self, release_id: &str) -> String {
        for endpoint in ["front-500", "front-250", "front"] {
            let url = format!("{}/release/{}/{}", self.cover_base_url, release_id, endpoint);
            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(err) => {
                    warn!("cover art request failed for {}: {}", url, err);
                    continue;
                }
            };

            if response.status() != StatusCode::TEMPORARY_REDIRECT {
                continue;
            }
            if let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
            {
                return location.to_string();
            }
        }
        String::new()
    }
}

#[async_trait]
impl MetadataProvider for MusicBrainzProvider {
    fn name(&self) -> &'static str {
        "musicbrainz"
    }

    fn artist_search(&self) -> &Capability {
        &self.artist_search
    }

    fn album_search(&self) -> &Capability {
        &self.album_search
    }

    async fn search_artists(
        &self,
        _cancel: &CancellationToken,
        _name: &str,
    ) -> Result<Vec<ArtistCandidate>, ProviderError> {
        // Release search is the only capability this provider carries.
        Err(ProviderError::Disabled)
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
            .get(format!("{}/ws/2/release", self.base_url))
            .query(&[
                ("fmt", "json".to_string()),
                ("query", format!("release:{album} AND artist:{artist}")),
            ])
            .send()
            .await?;
        let result: SearchResult = read_json(response).await?;

        let candidates = result.releases.iter().map(|release| async {
            let cover_url = if release.score >= COVER_LOOKUP_THRESHOLD {
                self.cover(&release.id).await
            } else {
                String::new()
            };

            AlbumCandidate {
                id: release.id.clone(),
                artist_name: release.artist(),
                name: release.title.clone(),
                cover_url,
                release_year: release.year(),
                confidence: release.score.min(100),
            }
        });

        Ok(join_all(candidates).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(date: &str) -> Release {
        Release {
            id: "abc".to_string(),
            score: 90,
            title: "T".to_string(),
            artist_credit: vec![
                ArtistCredit {
                    artist: CreditedArtist {
                        name: "A".to_string(),
                    },
                },
                ArtistCredit {
                    artist: CreditedArtist {
                        name: "B".to_string(),
                    },
                },
            ],
            date: date.to_string(),
        }
    }

    #[test]
    fn release_year_handles_all_precisions() {
        assert_eq!(release("1998").year(), 1998);
        assert_eq!(release("1998-05").year(), 1998);
        assert_eq!(release("1998-05-02").year(), 1998);
        assert_eq!(release("").year(), 0);
        assert_eq!(release("unknown").year(), 0);
    }

    #[test]
    fn credits_join_into_one_artist_name() {
        assert_eq!(release("1998").artist(), "A, B");
    }

    #[tokio::test]
    async fn artist_search_is_never_available() {
        let provider = MusicBrainzProvider::new().unwrap();
        provider.artist_search().enable();
        let cancel = CancellationToken::new();
        let result = provider.search_artists(&cancel, "anyone").await;
        assert!(matches!(result, Err(ProviderError::Disabled)));
    }
}
