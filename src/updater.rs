//! The update pipeline: fetch, change-filter, read, dedupe, enrich, persist.
//!
//! Each stage is a pool of workers fed by a bounded channel and feeding a
//! bounded channel; a stage's output closes once its workers drop their
//! senders, so the terminal sinks draining marks the whole run as drained.
//! One run-scoped cancellation token races every send and receive.

pub mod dedupe;
pub mod enrich;
pub mod jobs;
pub mod runner;

use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::entities::{Album, Artist, EnrichedAlbum, EnrichedArtist};
use crate::domain::store::CatalogStore;
use crate::infrastructure::http_client::PageClient;
use crate::providers::MetadataProvider;
use crate::scraping::readers::{
    ArtistIndexReader, ArtistPageReader, CatalogArtistPageReader, JazzIndexReader,
    RatingsPageReader, RatingsReader, RockIndexReader, VolumeIndexReader,
};
use crate::status::StatusBroadcaster;
use crate::updater::jobs::PageReadJob;

/// Overall deadline for one item's provider fan-out.
const DEFAULT_ENRICH_TIMEOUT: Duration = Duration::from_secs(10);

/// A provider together with the trust weight the orchestrator assigned it.
#[derive(Clone)]
pub struct WeightedProvider {
    pub provider: Arc<dyn MetadataProvider>,
    pub weight: u32,
}

pub struct Updater {
    source: Arc<PageClient>,
    store: Arc<dyn CatalogStore>,
    status: Arc<StatusBroadcaster>,
    artist_providers: Vec<WeightedProvider>,
    album_providers: Vec<WeightedProvider>,
    concurrency: usize,
    filter_unchanged: bool,
    enrich_timeout: Duration,
}

pub struct UpdaterBuilder {
    updater: Updater,
}

impl UpdaterBuilder {
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.updater.concurrency = concurrency.max(1);
        self
    }

    /// Drop unchanged pages instead of forwarding them.
    #[must_use]
    pub fn filter_unchanged(mut self, filter: bool) -> Self {
        self.updater.filter_unchanged = filter;
        self
    }

    #[must_use]
    pub fn enrich_timeout(mut self, timeout: Duration) -> Self {
        self.updater.enrich_timeout = timeout;
        self
    }

    #[must_use]
    pub fn add_artist_provider(mut self, weight: u32, provider: Arc<dyn MetadataProvider>) -> Self {
        self.updater
            .artist_providers
            .push(WeightedProvider { provider, weight });
        self
    }

    #[must_use]
    pub fn add_album_provider(mut self, weight: u32, provider: Arc<dyn MetadataProvider>) -> Self {
        self.updater
            .album_providers
            .push(WeightedProvider { provider, weight });
        self
    }

    #[must_use]
    pub fn build(self) -> Updater {
        self.updater
    }
}

/// Dedup key for album rows: one canonical record per (artist, title).
fn album_key(album: &Album) -> (String, String) {
    (album.artist_url.clone(), album.name.clone())
}

/// Merge policy for colliding album rows: the record scraped from the
/// album's own artist page beats one discovered on an aggregate ratings
/// page; otherwise the first-seen record survives.
fn prefer_own_page(incoming: Album, previous: Album) -> Album {
    if incoming.from_own_artist_page() && !previous.from_own_artist_page() {
        incoming
    } else {
        previous
    }
}

impl Updater {
    pub fn builder(
        source: Arc<PageClient>,
        store: Arc<dyn CatalogStore>,
        status: Arc<StatusBroadcaster>,
    ) -> UpdaterBuilder {
        UpdaterBuilder {
            updater: Self {
                source,
                store,
                status,
                artist_providers: Vec::new(),
                album_providers: Vec::new(),
                concurrency: 4,
                filter_unchanged: false,
                enrich_timeout: DEFAULT_ENRICH_TIMEOUT,
            },
        }
    }

    /// The fixed artist index pages and their readers.
    fn artist_index_pages() -> Vec<(String, Arc<dyn ArtistIndexReader>)> {
        let mut pages: Vec<(String, Arc<dyn ArtistIndexReader>)> = vec![
            ("/music/groups.html".to_string(), Arc::new(RockIndexReader)),
            ("/jazz/musician.html".to_string(), Arc::new(JazzIndexReader)),
        ];
        for volume in 1..=8 {
            pages.push((
                format!("/vol{volume}/"),
                Arc::new(VolumeIndexReader::new(volume)),
            ));
        }
        pages
    }

    /// The fixed ratings pages and their readers: one per year since 1990
    /// plus the rolling new-ratings page.
    fn ratings_pages() -> Vec<(String, Arc<dyn RatingsReader>)> {
        let current_year = chrono::Utc::now().year();
        let mut pages: Vec<(String, Arc<dyn RatingsReader>)> = vec![(
            "/cdreview/new.html".to_string(),
            Arc::new(RatingsPageReader::two_thousands(current_year)),
        )];
        for year in 1990..=current_year {
            let reader: Arc<dyn RatingsReader> = if year < 2000 {
                Arc::new(RatingsPageReader::nineties(year))
            } else {
                Arc::new(RatingsPageReader::two_thousands(year))
            };
            pages.push((format!("/cdreview/{year}.html"), reader));
        }
        pages
    }

    /// Runs one full crawl+enrich+persist pass. Never fails: everything
    /// mid-pipeline is non-fatal, and cancellation drains cleanly.
    pub async fn run_update(&self, cancel: &CancellationToken) -> (u64, u64) {
        let index_jobs = self.fetch_fixed_pages(cancel, Self::artist_index_pages());
        let ratings_jobs = self.fetch_fixed_pages(cancel, Self::ratings_pages());

        let index_jobs = self.filter_changed(cancel, index_jobs);
        let ratings_jobs = self.filter_changed(cancel, ratings_jobs);

        let index_artist_urls = self.run_index_jobs(cancel, index_jobs);
        let (ratings_artist_urls, ratings_albums) = self.run_ratings_jobs(cancel, ratings_jobs);

        // Any producer's sighting of an artist URL is equally valid.
        let artist_urls = dedupe::first_wins(
            cancel,
            self.concurrency,
            |url: &String| url.clone(),
            vec![index_artist_urls, ratings_artist_urls],
        );
        let ratings_albums = dedupe::first_wins(
            cancel,
            self.concurrency,
            album_key,
            vec![ratings_albums],
        );

        let artist_jobs = self.fetch_artist_pages(cancel, artist_urls);
        let artist_jobs = self.filter_changed(cancel, artist_jobs);
        let (artists, artist_page_albums) = self.run_artist_jobs(cancel, artist_jobs);

        let enriched_artists = enrich::artists(
            cancel,
            self.concurrency,
            self.enrich_timeout,
            self.artist_providers.clone(),
            Arc::clone(&self.status),
            artists,
        );
        let mut stored_artists = self.insert_artists(cancel, enriched_artists);

        // The winner for an album key is only knowable once every producer
        // has drained, so this dedup buffers.
        let albums = dedupe::merging(
            cancel,
            self.concurrency,
            album_key,
            prefer_own_page,
            vec![ratings_albums, artist_page_albums],
        );
        let enriched_albums = enrich::albums(
            cancel,
            self.concurrency,
            self.enrich_timeout,
            self.album_providers.clone(),
            Arc::clone(&self.status),
            albums,
        );
        let mut stored_albums = self.insert_albums(cancel, enriched_albums);

        let drain_artists = async {
            let mut count = 0u64;
            while stored_artists.recv().await.is_some() {
                count += 1;
            }
            count
        };
        let drain_albums = async {
            let mut count = 0u64;
            while stored_albums.recv().await.is_some() {
                count += 1;
            }
            count
        };
        let (artist_count, album_count) = tokio::join!(drain_artists, drain_albums);

        info!(
            "run drained: {} artists, {} albums",
            artist_count, album_count
        );
        (artist_count, album_count)
    }

    /// Fetches a fixed page set concurrently, pairing each page with its
    /// reader. Not-found pages are skipped silently, other failures logged.
    fn fetch_fixed_pages<R: Send + 'static>(
        &self,
        cancel: &CancellationToken,
        pages: Vec<(String, R)>,
    ) -> mpsc::Receiver<PageReadJob<R>> {
        let (tx, rx) = mpsc::channel(self.concurrency);

        for (path, reader) in pages {
            let source = Arc::clone(&self.source);
            let cancel = cancel.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                match source.fetch_page(&cancel, &path).await {
                    Ok(page) => {
                        jobs::send_or_cancel(&cancel, &tx, PageReadJob { path, page, reader })
                            .await;
                    }
                    Err(err) if err.is_cancelled() => {}
                    Err(crate::infrastructure::http_client::FetchError::PageNotFound) => {
                        debug!("page not found: {}", path);
                    }
                    Err(err) => warn!("failed to get page {}: {}", path, err),
                }
            });
        }

        rx
    }

    /// Worker pool fetching artist pages off the deduped URL stream.
    fn fetch_artist_pages(
        &self,
        cancel: &CancellationToken,
        urls: mpsc::Receiver<String>,
    ) -> mpsc::Receiver<PageReadJob<Arc<dyn ArtistPageReader>>> {
        let (tx, rx) = mpsc::channel(self.concurrency);
        let shared_urls = jobs::shared(urls);
        let reader: Arc<dyn ArtistPageReader> = Arc::new(CatalogArtistPageReader);

        for _ in 0..self.concurrency {
            let source = Arc::clone(&self.source);
            let cancel = cancel.clone();
            let tx = tx.clone();
            let shared_urls = Arc::clone(&shared_urls);
            let reader = Arc::clone(&reader);
            tokio::spawn(async move {
                while let Some(path) = jobs::next_item(&cancel, &shared_urls).await {
                    match source.fetch_page(&cancel, &path).await {
                        Ok(page) => {
                            let job = PageReadJob {
                                path,
                                page,
                                reader: Arc::clone(&reader),
                            };
                            if !jobs::send_or_cancel(&cancel, &tx, job).await {
                                return;
                            }
                        }
                        Err(err) if err.is_cancelled() => return,
                        Err(crate::infrastructure::http_client::FetchError::PageNotFound) => {
                            debug!("artist page not found: {}", path);
                        }
                        Err(err) => warn!("could not get artist page {}: {}", path, err),
                    }
                }
            });
        }

        rx
    }

    /// Change-filter stage: upserts page history and forwards jobs, dropping
    /// unchanged pages only when strict filtering is on.
    fn filter_changed<R: Send + 'static>(
        &self,
        cancel: &CancellationToken,
        mut input: mpsc::Receiver<PageReadJob<R>>,
    ) -> mpsc::Receiver<PageReadJob<R>> {
        let (tx, rx) = mpsc::channel(self.concurrency);
        let store = Arc::clone(&self.store);
        let status = Arc::clone(&self.status);
        let strict = self.filter_unchanged;
        let cancel = cancel.clone();

        tokio::spawn(async move {
            use crate::domain::store::UpsertOutcome;

            while let Some(job) = jobs::recv_or_cancel(&cancel, &mut input).await {
                let outcome = store
                    .upsert_page_history(&job.path, &job.page.hash, chrono::Utc::now())
                    .await;

                match outcome {
                    Ok(UpsertOutcome::Unchanged) if strict => {
                        debug!("skipping unchanged page: {}", job.path);
                        continue;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("could not upsert page history for {}: {}", job.path, err);
                        status.add_error(format!("page history for {}: {err}", job.path));
                        continue;
                    }
                }

                if !jobs::send_or_cancel(&cancel, &tx, job).await {
                    return;
                }
                status.increment_pages();
            }
        });

        rx
    }

    /// Runs index-page readers, emitting artist page URLs.
    fn run_index_jobs(
        &self,
        cancel: &CancellationToken,
        input: mpsc::Receiver<PageReadJob<Arc<dyn ArtistIndexReader>>>,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.concurrency);
        let shared = jobs::shared(input);

        for _ in 0..self.concurrency {
            let cancel = cancel.clone();
            let tx = tx.clone();
            let shared = Arc::clone(&shared);
            let status = Arc::clone(&self.status);
            tokio::spawn(async move {
                while let Some(job) = jobs::next_item(&cancel, &shared).await {
                    match job.reader.read(&job.path, &job.page.body) {
                        Ok(urls) => {
                            for url in urls {
                                if !jobs::send_or_cancel(&cancel, &tx, url).await {
                                    return;
                                }
                            }
                        }
                        Err(err) => {
                            warn!("could not read index page {}: {}", job.path, err);
                            status.add_error(format!("index page {}: {err}", job.path));
                        }
                    }
                }
            });
        }

        rx
    }

    /// Runs ratings-page readers, emitting album rows and the artist URLs
    /// they reference.
    fn run_ratings_jobs(
        &self,
        cancel: &CancellationToken,
        input: mpsc::Receiver<PageReadJob<Arc<dyn RatingsReader>>>,
    ) -> (mpsc::Receiver<String>, mpsc::Receiver<Album>) {
        let (artist_tx, artist_rx) = mpsc::channel(self.concurrency);
        let (album_tx, album_rx) = mpsc::channel(self.concurrency);
        let shared = jobs::shared(input);

        for _ in 0..self.concurrency {
            let cancel = cancel.clone();
            let artist_tx = artist_tx.clone();
            let album_tx = album_tx.clone();
            let shared = Arc::clone(&shared);
            let status = Arc::clone(&self.status);
            tokio::spawn(async move {
                while let Some(job) = jobs::next_item(&cancel, &shared).await {
                    let albums = match job.reader.read(&job.path, &job.page.body) {
                        Ok(albums) => albums,
                        Err(err) => {
                            warn!("could not read ratings page {}: {}", job.path, err);
                            status.add_error(format!("ratings page {}: {err}", job.path));
                            continue;
                        }
                    };
                    for album in albums {
                        if !jobs::send_or_cancel(&cancel, &artist_tx, album.artist_url.clone())
                            .await
                        {
                            return;
                        }
                        if !jobs::send_or_cancel(&cancel, &album_tx, album).await {
                            return;
                        }
                    }
                }
            });
        }

        (artist_rx, album_rx)
    }

    /// Runs artist-page readers, splitting artists from their raw albums.
    fn run_artist_jobs(
        &self,
        cancel: &CancellationToken,
        input: mpsc::Receiver<PageReadJob<Arc<dyn ArtistPageReader>>>,
    ) -> (mpsc::Receiver<Artist>, mpsc::Receiver<Album>) {
        let (artist_tx, artist_rx) = mpsc::channel(self.concurrency);
        let (album_tx, album_rx) = mpsc::channel(self.concurrency);
        let shared = jobs::shared(input);

        for _ in 0..self.concurrency {
            let cancel = cancel.clone();
            let artist_tx = artist_tx.clone();
            let album_tx = album_tx.clone();
            let shared = Arc::clone(&shared);
            let status = Arc::clone(&self.status);
            tokio::spawn(async move {
                while let Some(job) = jobs::next_item(&cancel, &shared).await {
                    let artist = match job.reader.read(&job.path, &job.page.body) {
                        Ok(artist) => artist,
                        Err(err) => {
                            warn!("could not read artist page {}: {}", job.path, err);
                            status.add_error(format!("artist page {}: {err}", job.path));
                            continue;
                        }
                    };
                    for album in artist.albums.clone() {
                        if !jobs::send_or_cancel(&cancel, &album_tx, album).await {
                            return;
                        }
                    }
                    if !jobs::send_or_cancel(&cancel, &artist_tx, artist).await {
                        return;
                    }
                }
            });
        }

        (artist_rx, album_rx)
    }

    /// Terminal artist sink: upsert, count, forward.
    fn insert_artists(
        &self,
        cancel: &CancellationToken,
        mut input: mpsc::Receiver<EnrichedArtist>,
    ) -> mpsc::Receiver<EnrichedArtist> {
        let (tx, rx) = mpsc::channel(self.concurrency);
        let store = Arc::clone(&self.store);
        let status = Arc::clone(&self.status);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            while let Some(enriched) = jobs::recv_or_cancel(&cancel, &mut input).await {
                if let Err(err) = store.upsert_artist(&enriched).await {
                    warn!("could not upsert artist {}: {}", enriched.artist.url, err);
                    status.add_error(format!("artist {}: {err}", enriched.artist.url));
                    continue;
                }
                status.increment_artists();
                if !jobs::send_or_cancel(&cancel, &tx, enriched).await {
                    return;
                }
            }
        });

        rx
    }

    /// Terminal album sink: upsert, count, forward.
    fn insert_albums(
        &self,
        cancel: &CancellationToken,
        mut input: mpsc::Receiver<EnrichedAlbum>,
    ) -> mpsc::Receiver<EnrichedAlbum> {
        let (tx, rx) = mpsc::channel(self.concurrency);
        let store = Arc::clone(&self.store);
        let status = Arc::clone(&self.status);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            while let Some(enriched) = jobs::recv_or_cancel(&cancel, &mut input).await {
                if let Err(err) = store.upsert_album(&enriched).await {
                    warn!(
                        "could not upsert album {} - {}: {}",
                        enriched.album.artist_url, enriched.album.name, err
                    );
                    status.add_error(format!(
                        "album {} - {}: {err}",
                        enriched.album.artist_url, enriched.album.name
                    ));
                    continue;
                }
                status.increment_albums();
                if !jobs::send_or_cancel(&cancel, &tx, enriched).await {
                    return;
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn album(page_url: &str, artist_url: &str, name: &str) -> Album {
        Album {
            page_url: page_url.to_string(),
            artist_url: artist_url.to_string(),
            artist_name: "A".to_string(),
            name: name.to_string(),
            rating: 7.0,
            year: 0,
        }
    }

    #[test]
    fn merge_prefers_the_artist_page_record() {
        let from_ratings = album("/cdreview/1998.html", "/vol4/x.html", "LP");
        let from_artist_page = album("/vol4/x.html", "/vol4/x.html", "LP");

        let winner = prefer_own_page(from_artist_page.clone(), from_ratings.clone());
        assert_eq!(winner.page_url, "/vol4/x.html");

        let winner = prefer_own_page(from_ratings.clone(), from_artist_page.clone());
        assert_eq!(winner.page_url, "/vol4/x.html");

        // Neither canonical: first seen survives.
        let other = album("/cdreview/1999.html", "/vol4/x.html", "LP");
        let winner = prefer_own_page(other, from_ratings.clone());
        assert_eq!(winner.page_url, "/cdreview/1998.html");
    }

    #[test]
    fn album_key_is_artist_and_name() {
        let a = album("/cdreview/1998.html", "/vol4/x.html", "LP");
        let b = album("/vol4/x.html", "/vol4/x.html", "LP");
        assert_eq!(album_key(&a), album_key(&b));
    }

    #[test]
    fn fixed_page_sets_cover_the_catalogue() {
        let index = Updater::artist_index_pages();
        assert_eq!(index.len(), 10);
        assert!(index.iter().any(|(path, _)| path == "/vol8/"));

        let ratings = Updater::ratings_pages();
        assert!(ratings.iter().any(|(path, _)| path == "/cdreview/new.html"));
        assert!(ratings.iter().any(|(path, _)| path == "/cdreview/1990.html"));
    }
}
