//! Process bootstrap: config, logging, store, providers, run loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tonearm::infrastructure::catalog_repository::SqliteCatalogStore;
use tonearm::infrastructure::config::AppConfig;
use tonearm::infrastructure::database_connection::DatabaseConnection;
use tonearm::infrastructure::http_client::PageClient;
use tonearm::infrastructure::logging;
use tonearm::providers::{DeezerProvider, MetadataProvider, MusicBrainzProvider, SpotifyProvider};
use tonearm::status::StatusBroadcaster;
use tonearm::updater::Updater;
use tonearm::updater::runner::UpdateRunner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let _log_guard = logging::init(config.log_dir.as_deref());

    let db = DatabaseConnection::new(&config.database_url).await?;
    db.migrate().await?;
    let store = Arc::new(SqliteCatalogStore::new(db.pool().clone()));

    let source = Arc::new(PageClient::new(&config.source)?);
    let status = Arc::new(StatusBroadcaster::new());

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let deezer = Arc::new(DeezerProvider::new(http.clone()));
    let musicbrainz = Arc::new(MusicBrainzProvider::new()?);
    let spotify = Arc::new(SpotifyProvider::new(
        http,
        config.providers.spotify.client_id.clone(),
        config.providers.spotify.client_secret.clone(),
    ));

    let all_providers: Vec<Arc<dyn MetadataProvider>> =
        vec![spotify.clone(), deezer.clone(), musicbrainz.clone()];
    enable_capabilities(&config.providers.artist_providers, &all_providers, true);
    enable_capabilities(&config.providers.album_providers, &all_providers, false);

    let updater = Arc::new(
        Updater::builder(source, store, Arc::clone(&status))
            .concurrency(config.effective_concurrency())
            .filter_unchanged(config.filter_unchanged)
            .add_artist_provider(1, spotify.clone())
            .add_artist_provider(1, deezer.clone())
            .add_album_provider(9, spotify)
            .add_album_provider(8, deezer)
            .add_album_provider(10, musicbrainz)
            .build(),
    );

    let interval = Duration::from_secs(config.update_interval_hours * 3600);
    let (runner, handle) = UpdateRunner::new(updater, Arc::clone(&status), interval);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    // Log run transitions for operators tailing the process.
    {
        let mut updates = handle.subscribe(shutdown.child_token());
        tokio::spawn(async move {
            let mut was_updating = false;
            while let Some(snapshot) = updates.next().await {
                if snapshot.is_updating != was_updating {
                    was_updating = snapshot.is_updating;
                    info!(
                        "run {}: {} artists, {} albums, {} pages, {} errors",
                        if was_updating { "started" } else { "finished" },
                        snapshot.artists,
                        snapshot.albums,
                        snapshot.pages,
                        snapshot.errors.len()
                    );
                }
            }
        });
    }

    runner.run_forever(shutdown).await;
    info!("updater stopped");
    Ok(())
}

/// Enables the named providers' artist or album capability from a
/// comma-separated config list.
fn enable_capabilities(list: &str, providers: &[Arc<dyn MetadataProvider>], artist: bool) {
    for name in list.split(',') {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            continue;
        }
        match providers.iter().find(|provider| provider.name() == name) {
            Some(provider) => {
                if artist {
                    provider.artist_search().enable();
                } else {
                    provider.album_search().enable();
                }
            }
            None => warn!("unknown provider '{}' in config", name),
        }
    }
}
