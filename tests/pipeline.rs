//! End-to-end pipeline tests against a local stub HTTP origin.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use tonearm::domain::entities::{AlbumCandidate, ArtistCandidate};
use tonearm::infrastructure::catalog_repository::SqliteCatalogStore;
use tonearm::infrastructure::database_connection::DatabaseConnection;
use tonearm::infrastructure::http_client::{HttpClientConfig, PageClient};
use tonearm::providers::{Capability, MetadataProvider, ProviderError, SpotifyProvider};
use tonearm::status::StatusBroadcaster;
use tonearm::updater::Updater;

struct StubResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl StubResponse {
    fn ok(body: &str) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }
}

/// Minimal HTTP/1.1 stub: canned responses per path, consumed in order (the
/// last one repeats), everything else 404. Records hit times per path.
struct StubServer {
    base_url: String,
    hits: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl StubServer {
    async fn start(routes: HashMap<String, Vec<StubResponse>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let hits: Arc<Mutex<Vec<(String, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(routes);
        let counters: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));

        let server_hits = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let routes = Arc::clone(&routes);
                let counters = Arc::clone(&counters);
                let hits = Arc::clone(&server_hits);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }

                    let request = String::from_utf8_lossy(&buf);
                    let target = request.split_whitespace().nth(1).unwrap_or("/");
                    let path = target.split('?').next().unwrap_or("/").to_string();
                    hits.lock().unwrap().push((path.clone(), Instant::now()));

                    let not_found = StubResponse::status(404);
                    let response = match routes.get(&path) {
                        Some(responses) => {
                            let mut counters = counters.lock().unwrap();
                            let counter = counters.entry(path).or_insert(0);
                            let index = (*counter).min(responses.len() - 1);
                            *counter += 1;
                            &responses[index]
                        }
                        None => &not_found,
                    };

                    let mut payload = format!(
                        "HTTP/1.1 {} X\r\ncontent-length: {}\r\nconnection: close\r\n",
                        response.status,
                        response.body.len()
                    );
                    for (name, value) in &response.headers {
                        payload.push_str(&format!("{name}: {value}\r\n"));
                    }
                    payload.push_str("\r\n");
                    payload.push_str(&response.body);

                    let _ = socket.write_all(payload.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { base_url, hits }
    }

    fn hits_for(&self, path: &str) -> Vec<Instant> {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|(hit_path, _)| hit_path == path)
            .map(|(_, at)| *at)
            .collect()
    }
}

/// Test provider returning fixed album candidates.
struct FixedProvider {
    name: &'static str,
    artist_search: Capability,
    album_search: Capability,
    albums: Vec<AlbumCandidate>,
}

impl FixedProvider {
    fn new(name: &'static str, albums: Vec<AlbumCandidate>) -> Self {
        let provider = Self {
            name,
            artist_search: Capability::default(),
            album_search: Capability::default(),
            albums,
        };
        provider.artist_search.enable();
        provider.album_search.enable();
        provider
    }
}

#[async_trait]
impl MetadataProvider for FixedProvider {
    fn name(&self) -> &'static str {
        self.name
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
        Ok(vec![ArtistCandidate {
            id: format!("{}-artist", self.name),
            name: "Captain Beefheart".to_string(),
            image_url: format!("http://images/{}.jpg", self.name),
            confidence: 100,
        }])
    }

    async fn search_albums(
        &self,
        _cancel: &CancellationToken,
        _artist: &str,
        _album: &str,
    ) -> Result<Vec<AlbumCandidate>, ProviderError> {
        Ok(self.albums.clone())
    }
}

fn album_candidate(id: &str, confidence: u32, cover: &str, year: i32) -> AlbumCandidate {
    AlbumCandidate {
        id: id.to_string(),
        artist_name: "Captain Beefheart".to_string(),
        name: "Trout Mask Replica".to_string(),
        cover_url: cover.to_string(),
        release_year: year,
        confidence,
    }
}

const VOLUME_PAGE: &str = r#"
    <html><body><select>
        <option>jump to</option>
        <option value="beefheart.html">Captain Beefheart</option>
    </select></body></html>"#;

const ARTIST_PAGE: &str = r#"
    <html><body>
    <center><h1>Captain Beefheart</h1></center>
    <table><tr><td>
        Trout Mask Replica, 7.5/10 (1998)
    </td></tr></table>
    <table><tr><td bgcolor="eebb88">Bio text.</td></tr></table>
    </body></html>"#;

fn catalogue_routes() -> HashMap<String, Vec<StubResponse>> {
    HashMap::from([
        ("/vol1/".to_string(), vec![StubResponse::ok(VOLUME_PAGE)]),
        (
            "/vol1/beefheart.html".to_string(),
            vec![StubResponse::ok(ARTIST_PAGE)],
        ),
    ])
}

async fn test_updater(
    base_url: &str,
    store: Arc<SqliteCatalogStore>,
    status: Arc<StatusBroadcaster>,
    filter_unchanged: bool,
) -> Updater {
    let source = Arc::new(
        PageClient::new(&HttpClientConfig {
            base_url: base_url.to_string(),
            rate_capacity: 200,
            rate_window_ms: 1_000,
            ..HttpClientConfig::default()
        })
        .unwrap(),
    );

    let provider1 = Arc::new(FixedProvider::new(
        "one",
        vec![album_candidate("p1", 50, "u1", 0)],
    ));
    let provider2 = Arc::new(FixedProvider::new(
        "two",
        vec![album_candidate("p2", 40, "u2", 1995)],
    ));

    Updater::builder(source, store, status)
        .concurrency(4)
        .filter_unchanged(filter_unchanged)
        .add_artist_provider(1, provider1.clone())
        .add_artist_provider(2, provider2.clone())
        .add_album_provider(1, provider1)
        .add_album_provider(2, provider2)
        .build()
}

#[tokio::test]
async fn full_run_scrapes_enriches_and_persists() {
    let server = StubServer::start(catalogue_routes()).await;

    let db = DatabaseConnection::in_memory().await.unwrap();
    db.migrate().await.unwrap();
    let store = Arc::new(SqliteCatalogStore::new(db.pool().clone()));
    let status = Arc::new(StatusBroadcaster::new());

    let updater = test_updater(&server.base_url, Arc::clone(&store), Arc::clone(&status), false).await;

    status.start_update();
    let cancel = CancellationToken::new();
    let (artists, albums) = updater.run_update(&cancel).await;
    status.end_update();

    assert_eq!(artists, 1);
    assert_eq!(albums, 1);

    let (name, image_url): (String, Option<String>) =
        sqlx::query_as("SELECT name, image_url FROM artists WHERE url = '/vol1/beefheart.html'")
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(name, "Captain Beefheart");
    // Weight 2 beats weight 1 for the artist image as well.
    assert_eq!(image_url.as_deref(), Some("http://images/two.jpg"));

    // The scraped year survives (1998, not the provider's 1995); the cover
    // comes from the weighted winner: 40 x 2 = 80 beats 50 x 1 = 50.
    let (year, cover): (Option<i32>, Option<String>) =
        sqlx::query_as("SELECT year, image_url FROM albums WHERE name = 'Trout Mask Replica'")
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(year, Some(1998));
    assert_eq!(cover.as_deref(), Some("u2"));

    let snapshot = status.snapshot();
    assert_eq!(snapshot.artists, 1);
    assert_eq!(snapshot.albums, 1);
    assert!(snapshot.pages >= 2);
}

#[tokio::test]
async fn unchanged_pages_are_filtered_on_the_second_run() {
    let server = StubServer::start(catalogue_routes()).await;

    let db = DatabaseConnection::in_memory().await.unwrap();
    db.migrate().await.unwrap();
    let store = Arc::new(SqliteCatalogStore::new(db.pool().clone()));
    let status = Arc::new(StatusBroadcaster::new());

    let updater = test_updater(&server.base_url, Arc::clone(&store), Arc::clone(&status), true).await;
    let cancel = CancellationToken::new();

    status.start_update();
    let (artists, _) = updater.run_update(&cancel).await;
    status.end_update();
    assert_eq!(artists, 1);

    // Identical content: every page reports unchanged and strict filtering
    // drops it, so nothing downstream runs.
    status.start_update();
    let (artists, albums) = updater.run_update(&cancel).await;
    status.end_update();
    assert_eq!(artists, 0);
    assert_eq!(albums, 0);
    assert_eq!(status.snapshot().pages, 0);
}

#[tokio::test]
async fn cancelled_run_drains_cleanly() {
    let server = StubServer::start(catalogue_routes()).await;

    let db = DatabaseConnection::in_memory().await.unwrap();
    db.migrate().await.unwrap();
    let store = Arc::new(SqliteCatalogStore::new(db.pool().clone()));
    let status = Arc::new(StatusBroadcaster::new());

    let updater = test_updater(&server.base_url, store, Arc::clone(&status), false).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let (artists, albums) = tokio::time::timeout(
        Duration::from_secs(5),
        updater.run_update(&cancel),
    )
    .await
    .expect("cancelled run must not hang");
    assert_eq!((artists, albums), (0, 0));
}

async fn wait_for_updating(
    updates: &mut tokio_stream::wrappers::ReceiverStream<tonearm::domain::status::UpdateStatus>,
    updating: bool,
) {
    use tokio_stream::StreamExt;

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let snapshot = updates.next().await.expect("status stream ended");
            if snapshot.is_updating == updating {
                return;
            }
        }
    })
    .await
    .expect("status transition not observed");
}

#[tokio::test]
async fn runner_lifecycle_goes_through_end_update() {
    use tonearm::updater::runner::UpdateRunner;

    // No routes: every page 404s and runs finish immediately.
    let server = StubServer::start(HashMap::new()).await;

    let db = DatabaseConnection::in_memory().await.unwrap();
    db.migrate().await.unwrap();
    let store = Arc::new(SqliteCatalogStore::new(db.pool().clone()));
    let status = Arc::new(StatusBroadcaster::new());

    let updater = Arc::new(test_updater(&server.base_url, store, Arc::clone(&status), false).await);
    let (runner, handle) =
        UpdateRunner::new(updater, Arc::clone(&status), Duration::from_secs(3600));

    let shutdown = CancellationToken::new();
    // Subscribe before the runner starts so the first transition is seen.
    let mut updates = handle.subscribe(shutdown.child_token());
    let runner_task = tokio::spawn(runner.run_forever(shutdown.clone()));

    // First run starts on its own and ends through end_update.
    wait_for_updating(&mut updates, true).await;
    wait_for_updating(&mut updates, false).await;

    // An explicit start triggers the next run; stopping it still lands in
    // idle through end_update.
    handle.start_update();
    wait_for_updating(&mut updates, true).await;
    handle.stop_update();
    wait_for_updating(&mut updates, false).await;

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), runner_task)
        .await
        .expect("runner must exit on shutdown")
        .unwrap();
}

#[tokio::test]
async fn remote_rate_limit_suspends_and_retries_once() {
    let token_body = r#"{"access_token":"tok","token_type":"Bearer","expires_in":3600}"#;
    let search_body = r#"{"albums":{"items":[{"id":"a1","name":"Trout Mask Replica",
        "images":[{"height":640,"width":640,"url":"cover"}],
        "artists":[{"name":"Captain Beefheart"}],"release_date":"1969-06-16"}]}}"#;

    let server = StubServer::start(HashMap::from([
        (
            "/api/token".to_string(),
            vec![StubResponse::ok(token_body)
                .with_header("content-type", "application/json")],
        ),
        (
            "/v1/search".to_string(),
            vec![
                StubResponse::status(429).with_header("retry-after", "2"),
                StubResponse::ok(search_body).with_header("content-type", "application/json"),
            ],
        ),
    ]))
    .await;

    let provider = SpotifyProvider::new(
        reqwest::Client::new(),
        "id".to_string(),
        "secret".to_string(),
    )
    .with_base_urls(
        server.base_url.clone(),
        format!("{}/api/token", server.base_url),
    );
    provider.album_search().enable();

    let cancel = CancellationToken::new();
    let candidates = provider
        .search_albums(&cancel, "Captain Beefheart", "Trout Mask Replica")
        .await
        .unwrap();

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].cover_url, "cover");
    assert_eq!(candidates[0].release_year, 1969);

    // The retry only went out after the advertised suspension.
    let search_hits = server.hits_for("/v1/search");
    assert_eq!(search_hits.len(), 2);
    let gap = search_hits[1].duration_since(search_hits[0]);
    assert!(gap >= Duration::from_secs(2), "retry fired after {gap:?}");
}
