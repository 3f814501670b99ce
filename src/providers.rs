//! Third-party metadata provider capabilities.
//!
//! Each provider exposes a stable name, independently toggleable artist- and
//! album-search capabilities, and returns ranked candidates. A disabled
//! capability fails with [`ProviderError::Disabled`]; the enricher filters
//! disabled providers before fan-out, so the sentinel is a backstop against
//! toggle races, which are acceptable staleness.

pub mod deezer;
pub mod musicbrainz;
pub mod spotify;

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::domain::entities::{AlbumCandidate, ArtistCandidate};
use crate::infrastructure::rate_limiter::RateLimitError;

pub use deezer::DeezerProvider;
pub use musicbrainz::MusicBrainzProvider;
pub use spotify::SpotifyProvider;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The invoked capability is disabled.
    #[error("provider capability is disabled")]
    Disabled,

    /// The remote kept rate-limiting after the bounded retry.
    #[error("provider rate limit not lifted after retry")]
    RateLimited,

    #[error("provider returned status {status}: {snippet}")]
    BadStatus { status: StatusCode, snippet: String },

    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Cancelled(#[from] RateLimitError),
}

impl ProviderError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Runtime on/off switch for one search capability.
///
/// Single-writer discipline is the atomic itself; readers may observe a
/// toggle slightly late.
#[derive(Debug, Default)]
pub struct Capability {
    enabled: AtomicBool,
}

impl Capability {
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }
}

/// A metadata provider with independently switchable search capabilities.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn artist_search(&self) -> &Capability;

    fn album_search(&self) -> &Capability;

    /// Searches artists by name; candidates carry the provider's own 0-100
    /// ranking confidence.
    async fn search_artists(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Vec<ArtistCandidate>, ProviderError>;

    /// Searches albums by artist and title.
    async fn search_albums(
        &self,
        cancel: &CancellationToken,
        artist: &str,
        album: &str,
    ) -> Result<Vec<AlbumCandidate>, ProviderError>;
}

/// Decodes a JSON response, classifying non-success statuses.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(256).collect();
        return Err(ProviderError::BadStatus { status, snippet });
    }
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_toggles() {
        let capability = Capability::default();
        assert!(!capability.enabled());
        capability.enable();
        assert!(capability.enabled());
        capability.disable();
        assert!(!capability.enabled());
    }
}
