use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use loadwatch_core::{
    DisplayState, DriveError, DriverConfig, LoadDriver, LoadError, LoadingTracker, ProxyConfig,
    StreamLoader, TrackerConfig,
};

const MASTER_URL: &str = "https://cdn.mock.com/live/ch1/master.m3u8";
const LEVEL0_URL: &str = "https://cdn.mock.com/live/ch1/level_0.m3u8";

const MASTER_PLAYLIST: &str = "\
#EXTM3U
#EXT-X-VERSION:3
#EXT-X-STREAM-INF:BANDWIDTH=1212000,RESOLUTION=1280x720
level_0.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2424000,RESOLUTION=1920x1080
level_1.m3u8
";

fn media_playlist(segments: &[&str]) -> String {
    let mut out = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:100\n",
    );
    for uri in segments {
        out.push_str(&format!("#EXTINF:6.000,\n{uri}\n"));
    }
    out
}

enum Reply {
    Body(Vec<u8>),
    Status(u16),
    Slow(Duration, Vec<u8>),
}

/// Serves canned replies keyed by upstream URL, recording every proxied request.
struct ScriptedLoader {
    replies: HashMap<String, Reply>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedLoader {
    fn new() -> Self {
        Self {
            replies: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn body(mut self, upstream: &str, body: impl Into<Vec<u8>>) -> Self {
        self.replies.insert(upstream.to_string(), Reply::Body(body.into()));
        self
    }

    fn status(mut self, upstream: &str, status: u16) -> Self {
        self.replies.insert(upstream.to_string(), Reply::Status(status));
        self
    }

    fn slow(mut self, upstream: &str, delay: Duration, body: impl Into<Vec<u8>>) -> Self {
        self.replies
            .insert(upstream.to_string(), Reply::Slow(delay, body.into()));
        self
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn upstream_of(proxied: &str) -> (String, String) {
    let url = url::Url::parse(proxied).unwrap();
    let kind = url.path_segments().unwrap().last().unwrap().to_string();
    let target = url
        .query_pairs()
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    (kind, target)
}

#[async_trait]
impl StreamLoader for ScriptedLoader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        self.requests.lock().unwrap().push(url.to_string());
        let (_, upstream) = upstream_of(url);
        match self.replies.get(&upstream) {
            Some(Reply::Body(body)) => Ok(body.clone()),
            Some(Reply::Slow(delay, body)) => {
                tokio::time::sleep(*delay).await;
                Ok(body.clone())
            }
            Some(Reply::Status(status)) => Err(LoadError::Http {
                url: url.to_string(),
                status: *status,
                message: "scripted".to_string(),
                is_last_retry: true,
            }),
            None => Err(LoadError::Http {
                url: url.to_string(),
                status: 404,
                message: "not scripted".to_string(),
                is_last_retry: true,
            }),
        }
    }
}

fn driver(loader: Arc<ScriptedLoader>, config: DriverConfig) -> LoadDriver {
    LoadDriver::new(ProxyConfig::default(), loader, config)
}

fn tracker() -> LoadingTracker {
    LoadingTracker::new(TrackerConfig::default())
}

#[tokio::test]
async fn master_playlist_resolves_first_variant_and_succeeds() {
    let loader = Arc::new(
        ScriptedLoader::new()
            .body(MASTER_URL, MASTER_PLAYLIST)
            .body(LEVEL0_URL, media_playlist(&["seg100.ts", "seg101.ts", "seg102.ts", "seg103.ts"]))
            .body("https://cdn.mock.com/live/ch1/seg100.ts", vec![0u8; 1000])
            .body("https://cdn.mock.com/live/ch1/seg101.ts", vec![0u8; 2000])
            .body("https://cdn.mock.com/live/ch1/seg102.ts", vec![0u8; 3000]),
    );
    let tracker = tracker();
    let report = driver(loader.clone(), DriverConfig::default().with_source("s1"))
        .run(&tracker, MASTER_URL)
        .await
        .unwrap();

    assert_eq!(report.variant_url.as_deref(), Some(LEVEL0_URL));
    assert_eq!(report.segments_loaded, 3);
    assert_eq!(report.segment_errors, 0);
    assert_eq!(report.bytes, 6000);
    assert_eq!(report.final_state, DisplayState::Success);

    let snapshot = tracker.snapshot().await;
    assert_eq!(snapshot.state, DisplayState::Success);
    assert!(!snapshot.clock_running);
    assert!(snapshot.proxy.is_responding);
    assert_eq!(snapshot.proxy.segment_request_count, 3);

    let kinds: Vec<String> = loader
        .requests()
        .iter()
        .map(|u| upstream_of(u).0)
        .collect();
    assert_eq!(kinds, ["m3u8", "m3u8", "segment", "segment", "segment"]);
    assert!(loader
        .requests()
        .iter()
        .all(|u| u.starts_with("http://localhost:3001/api/proxy/") && u.contains("moontv-source=s1")));
}

#[tokio::test]
async fn media_playlist_with_key_fetches_key_through_proxy() {
    let playlist = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n\
        #EXT-X-KEY:METHOD=AES-128,URI=\"keys/k1.bin\"\n\
        #EXTINF:6.0,\nseg1.ts\n";
    let loader = Arc::new(
        ScriptedLoader::new()
            .body(LEVEL0_URL, playlist)
            .body("https://cdn.mock.com/live/ch1/keys/k1.bin", vec![1u8; 16])
            .body("https://cdn.mock.com/live/ch1/seg1.ts", vec![0u8; 10]),
    );
    let tracker = tracker();
    let report = driver(loader.clone(), DriverConfig::default())
        .run(&tracker, LEVEL0_URL)
        .await
        .unwrap();

    assert!(report.key_fetched);
    assert_eq!(report.variant_url, None);
    assert_eq!(report.segments_loaded, 1);
    assert!(loader
        .requests()
        .iter()
        .any(|u| upstream_of(u).0 == "key"));
}

#[tokio::test]
async fn segment_errors_are_counted_but_not_fatal() {
    let loader = Arc::new(
        ScriptedLoader::new()
            .body(LEVEL0_URL, media_playlist(&["a.ts", "b.ts", "c.ts"]))
            .status("https://cdn.mock.com/live/ch1/a.ts", 502)
            .body("https://cdn.mock.com/live/ch1/b.ts", vec![0u8; 5])
            .body("https://cdn.mock.com/live/ch1/c.ts", vec![0u8; 5]),
    );
    let tracker = tracker();
    let report = driver(loader, DriverConfig::default())
        .run(&tracker, LEVEL0_URL)
        .await
        .unwrap();

    assert_eq!(report.segments_loaded, 2);
    assert_eq!(report.segment_errors, 1);
    let snapshot = tracker.snapshot().await;
    assert_eq!(snapshot.proxy.error_count, 1);
    assert_eq!(snapshot.state, DisplayState::Success);
}

#[tokio::test]
async fn playlist_failure_ends_in_error() {
    let loader = Arc::new(ScriptedLoader::new().status(MASTER_URL, 503));
    let tracker = tracker();
    let err = driver(loader, DriverConfig::default())
        .run(&tracker, MASTER_URL)
        .await
        .unwrap_err();

    assert!(matches!(err, DriveError::Playlist(ref e) if e.status_code() == Some(503)));
    let snapshot = tracker.snapshot().await;
    assert_eq!(snapshot.state, DisplayState::Error);
    assert!(snapshot.message.contains("Failed to load playlist"));
    assert_eq!(snapshot.proxy.error_count, 1);
}

#[tokio::test]
async fn unparseable_playlist_ends_in_error() {
    let loader = Arc::new(ScriptedLoader::new().body(MASTER_URL, "<html>blocked</html>"));
    let tracker = tracker();
    let err = driver(loader, DriverConfig::default())
        .run(&tracker, MASTER_URL)
        .await
        .unwrap_err();

    assert!(matches!(err, DriveError::Parse { .. }));
    assert_eq!(tracker.snapshot().await.state, DisplayState::Error);
}

#[tokio::test]
async fn all_segments_failing_ends_in_error() {
    let loader = Arc::new(ScriptedLoader::new().body(LEVEL0_URL, media_playlist(&["a.ts", "b.ts"])));
    let tracker = tracker();
    let err = driver(loader, DriverConfig::default())
        .run(&tracker, LEVEL0_URL)
        .await
        .unwrap_err();

    assert!(matches!(err, DriveError::NoSegments { errors: 2 }));
    let snapshot = tracker.snapshot().await;
    assert_eq!(snapshot.state, DisplayState::Error);
    assert_eq!(snapshot.proxy.error_count, 2);
}

#[tokio::test]
async fn invalid_stream_url_is_rejected() {
    let tracker = tracker();
    let err = driver(Arc::new(ScriptedLoader::new()), DriverConfig::default())
        .run(&tracker, "not a url")
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::InvalidUrl { .. }));
    assert_eq!(tracker.snapshot().await.state, DisplayState::Error);
}

#[tokio::test(start_paused = true)]
async fn silent_proxy_trips_watchdog_and_abandons_load() {
    let loader = Arc::new(ScriptedLoader::new().slow(
        LEVEL0_URL,
        Duration::from_secs(12),
        media_playlist(&["a.ts"]),
    ));
    let tracker = tracker();
    let err = driver(loader, DriverConfig::default())
        .run(&tracker, LEVEL0_URL)
        .await
        .unwrap_err();

    assert!(matches!(err, DriveError::Abandoned(DisplayState::NoResponse)));
    let snapshot = tracker.snapshot().await;
    assert_eq!(snapshot.state, DisplayState::NoResponse);
    // The late response still counts as the proxy having answered.
    assert!(snapshot.proxy.is_responding);
}
