//! Provider fan-out and confidence resolution.
//!
//! One item fans out to every enabled provider concurrently under a bounded
//! overall deadline; a slow provider never blocks a faster one, and an item
//! nobody answers for resolves empty when the deadline passes. Weighted
//! confidence (raw x provider weight) decides the winner in a single pass:
//! the first candidate seen seeds the fold whatever its score, later ones
//! replace it only on strictly greater score.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::entities::{Album, AlbumCandidate, Artist, ArtistCandidate, EnrichedAlbum, EnrichedArtist};
use crate::providers::ProviderError;
use crate::status::StatusBroadcaster;
use crate::updater::WeightedProvider;
use crate::updater::jobs::{next_item, send_or_cancel, shared};

/// Worker pool resolving artist images.
pub(crate) fn artists(
    cancel: &CancellationToken,
    concurrency: usize,
    timeout: Duration,
    providers: Vec<WeightedProvider>,
    status: Arc<StatusBroadcaster>,
    input: mpsc::Receiver<Artist>,
) -> mpsc::Receiver<EnrichedArtist> {
    let (tx, rx) = mpsc::channel(concurrency.max(1));
    let shared_input = shared(input);
    let providers = Arc::new(providers);

    for _ in 0..concurrency.max(1) {
        let cancel = cancel.clone();
        let tx = tx.clone();
        let shared_input = Arc::clone(&shared_input);
        let providers = Arc::clone(&providers);
        let status = Arc::clone(&status);
        tokio::spawn(async move {
            while let Some(artist) = next_item(&cancel, &shared_input).await {
                let image_url =
                    resolve_artist_image(&cancel, timeout, &providers, &status, &artist.name)
                        .await;
                let enriched = EnrichedArtist { artist, image_url };
                if !send_or_cancel(&cancel, &tx, enriched).await {
                    return;
                }
            }
        });
    }

    rx
}

/// Worker pool resolving album covers and backfilling missing years.
pub(crate) fn albums(
    cancel: &CancellationToken,
    concurrency: usize,
    timeout: Duration,
    providers: Vec<WeightedProvider>,
    status: Arc<StatusBroadcaster>,
    input: mpsc::Receiver<Album>,
) -> mpsc::Receiver<EnrichedAlbum> {
    let (tx, rx) = mpsc::channel(concurrency.max(1));
    let shared_input = shared(input);
    let providers = Arc::new(providers);

    for _ in 0..concurrency.max(1) {
        let cancel = cancel.clone();
        let tx = tx.clone();
        let shared_input = Arc::clone(&shared_input);
        let providers = Arc::clone(&providers);
        let status = Arc::clone(&status);
        tokio::spawn(async move {
            while let Some(mut album) = next_item(&cancel, &shared_input).await {
                let (cover_url, proposed_year) = resolve_album_cover_and_year(
                    &cancel,
                    timeout,
                    &providers,
                    &status,
                    &album.artist_name,
                    &album.name,
                )
                .await;
                if album.year == 0 {
                    album.year = proposed_year;
                }
                let enriched = EnrichedAlbum { album, cover_url };
                if !send_or_cancel(&cancel, &tx, enriched).await {
                    return;
                }
            }
        });
    }

    rx
}

fn record_provider_error(status: &StatusBroadcaster, provider: &str, err: &ProviderError) {
    match err {
        ProviderError::Disabled => {
            // Lost the race against a toggle; nothing to report.
            debug!("skipping disabled provider {}", provider);
        }
        err if err.is_cancelled() => {}
        err => {
            warn!("provider {} search failed: {}", provider, err);
            status.add_error(format!("provider {provider}: {err}"));
        }
    }
}

/// Resolves an artist image by weighted-confidence fold over all enabled
/// providers. Returns an empty string when nothing resolves in time.
pub(crate) async fn resolve_artist_image(
    cancel: &CancellationToken,
    timeout: Duration,
    providers: &[WeightedProvider],
    status: &Arc<StatusBroadcaster>,
    name: &str,
) -> String {
    let item_cancel = cancel.child_token();
    let _guard = item_cancel.clone().drop_guard();
    let (tx, mut rx) = mpsc::channel::<(ArtistCandidate, u64)>(providers.len().max(1));

    for weighted in providers {
        if !weighted.provider.artist_search().enabled() {
            continue;
        }
        let provider = Arc::clone(&weighted.provider);
        let weight = u64::from(weighted.weight);
        let tx = tx.clone();
        let item_cancel = item_cancel.clone();
        let status = Arc::clone(status);
        let name = name.to_string();
        tokio::spawn(async move {
            match provider.search_artists(&item_cancel, &name).await {
                Ok(candidates) => {
                    for candidate in candidates {
                        let score = u64::from(candidate.confidence) * weight;
                        if tx.send((candidate, score)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(err) => record_provider_error(&status, provider.name(), &err),
            }
        });
    }
    drop(tx);

    let deadline = tokio::time::Instant::now() + timeout;
    let mut best: Option<(u64, String)> = None;
    loop {
        let (candidate, score) = tokio::select! {
            received = rx.recv() => match received {
                Some(received) => received,
                None => break,
            },
            () = tokio::time::sleep_until(deadline) => break,
            () = cancel.cancelled() => break,
        };
        let replace = match &best {
            None => true,
            Some((best_score, _)) => score > *best_score,
        };
        if replace {
            best = Some((score, candidate.image_url));
        }
    }

    best.map(|(_, url)| url).unwrap_or_default()
}

/// Resolves an album cover the same way, and independently tracks the
/// minimum non-zero year proposed by any candidate; the year fallback is
/// not tied to the confidence winner.
pub(crate) async fn resolve_album_cover_and_year(
    cancel: &CancellationToken,
    timeout: Duration,
    providers: &[WeightedProvider],
    status: &Arc<StatusBroadcaster>,
    artist: &str,
    album: &str,
) -> (String, i32) {
    let item_cancel = cancel.child_token();
    let _guard = item_cancel.clone().drop_guard();
    let (tx, mut rx) = mpsc::channel::<(AlbumCandidate, u64)>(providers.len().max(1));

    for weighted in providers {
        if !weighted.provider.album_search().enabled() {
            continue;
        }
        let provider = Arc::clone(&weighted.provider);
        let weight = u64::from(weighted.weight);
        let tx = tx.clone();
        let item_cancel = item_cancel.clone();
        let status = Arc::clone(status);
        let artist = artist.to_string();
        let album = album.to_string();
        tokio::spawn(async move {
            match provider.search_albums(&item_cancel, &artist, &album).await {
                Ok(candidates) => {
                    for candidate in candidates {
                        let score = u64::from(candidate.confidence) * weight;
                        if tx.send((candidate, score)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(err) => record_provider_error(&status, provider.name(), &err),
            }
        });
    }
    drop(tx);

    let deadline = tokio::time::Instant::now() + timeout;
    let mut best: Option<(u64, String)> = None;
    let mut min_year = 0;
    loop {
        let (candidate, score) = tokio::select! {
            received = rx.recv() => match received {
                Some(received) => received,
                None => break,
            },
            () = tokio::time::sleep_until(deadline) => break,
            () = cancel.cancelled() => break,
        };

        if candidate.release_year != 0 && (min_year == 0 || candidate.release_year < min_year) {
            min_year = candidate.release_year;
        }

        let replace = match &best {
            None => true,
            Some((best_score, _)) => score > *best_score,
        };
        if replace {
            best = Some((score, candidate.cover_url));
        }
    }

    (best.map(|(_, url)| url).unwrap_or_default(), min_year)
}
