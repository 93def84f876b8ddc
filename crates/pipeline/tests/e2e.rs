use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;

use nodepool_core::codec;
use nodepool_core::models::FrequencyTier;
use nodepool_core::output::FileArtifacts;
use nodepool_core::settings::Settings;
use nodepool_core::store::{Store, StorePaths};
use nodepool_pipeline::run::{RunError, execute_run};

fn ensure_rustls_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Serve one HTTP response on loopback and return the URL.
async fn serve_once(body: String) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });
    format!("http://{addr}/feed")
}

fn ss_uri(port: u16, name: &str) -> String {
    let userinfo = URL_SAFE_NO_PAD.encode("aes-256-gcm:password");
    format!("ss://{userinfo}@127.0.0.1:{port}#{name}")
}

fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.fetch_timeout = Duration::from_secs(5);
    settings.tcp_timeout = Duration::from_secs(2);
    settings.batch_delay = Duration::ZERO;
    settings
}

fn write_sources(dir: &TempDir, urls: &[String]) -> PathBuf {
    let path = dir.path().join("sources.txt");
    let mut contents = String::from("# test feeds\n");
    for url in urls {
        contents.push_str(url);
        contents.push('\n');
    }
    std::fs::write(&path, contents).unwrap();
    path
}

#[tokio::test]
async fn test_full_run_produces_ranked_artifacts_and_history() {
    ensure_rustls_provider();
    let tmp = TempDir::new().unwrap();

    // one live endpoint, one refused endpoint
    let live = TcpListener::bind("127.0.0.1:0").unwrap();
    let live_port = live.local_addr().unwrap().port();
    let dead_port = {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };

    let body = format!("{}\n{}\n", ss_uri(live_port, "live"), ss_uri(dead_port, "dead"));
    let sub_url = serve_once(body).await;
    let sources = write_sources(&tmp, std::slice::from_ref(&sub_url));

    let paths = StorePaths::from_dir(tmp.path().join("state"));
    let mut store = Store::open(paths.clone());
    let writer = FileArtifacts::new(tmp.path().join("out"), 20);
    let (_tx, rx) = watch::channel(false);

    let summary = execute_run(&sources, &mut store, &writer, &fast_settings(), &rx)
        .await
        .unwrap();

    assert_eq!(summary.run_number, 1);
    assert_eq!(summary.selected, 1);
    assert_eq!(summary.fetched_ok, 1);
    assert_eq!(summary.total_nodes, 2);
    assert_eq!(summary.valid_nodes, 1);
    assert_eq!(summary.emitted, 1);

    // artifacts: the live node only, in both document and URI-list form
    let doc = std::fs::read_to_string(writer.document_path()).unwrap();
    let entries = codec::clash::document_entries(&doc).unwrap();
    assert_eq!(entries.len(), 1);
    let uris = std::fs::read_to_string(writer.uri_list_path()).unwrap();
    assert_eq!(uris.lines().count(), 1);
    assert!(uris.contains(&format!("127.0.0.1:{live_port}")));

    // persisted state: history recorded, protection consumed
    let reloaded = Store::open(paths);
    let state = reloaded.subscription(&sub_url).unwrap();
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.history[0].total_nodes, 2);
    assert_eq!(state.history[0].valid_nodes, 1);
    assert!(state.history[0].fetch_ok);
    assert_eq!(state.protection_counter, 2);
    assert_eq!(state.runs_used, 1);
}

#[tokio::test]
async fn test_all_probes_failing_still_emits_placeholders() {
    ensure_rustls_provider();
    let tmp = TempDir::new().unwrap();

    let dead_port = {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let body = format!("{}\n", ss_uri(dead_port, "dead"));
    let sub_url = serve_once(body).await;
    let sources = write_sources(&tmp, std::slice::from_ref(&sub_url));

    let mut store = Store::open(StorePaths::from_dir(tmp.path().join("state")));
    let writer = FileArtifacts::new(tmp.path().join("out"), 20);
    let (_tx, rx) = watch::channel(false);

    let summary = execute_run(&sources, &mut store, &writer, &fast_settings(), &rx)
        .await
        .unwrap();

    assert_eq!(summary.valid_nodes, 0);
    assert_eq!(summary.emitted, 0);

    let doc = std::fs::read_to_string(writer.document_path()).unwrap();
    assert_eq!(codec::clash::document_entries(&doc).unwrap().len(), 0);
    assert!(
        std::fs::read_to_string(writer.uri_list_path())
            .unwrap()
            .is_empty()
    );
    let stats: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(writer.stats_path()).unwrap()).unwrap();
    assert_eq!(stats["total_nodes"], 1);
    assert_eq!(stats["valid_nodes"], 0);
    assert_eq!(stats["success_rate"], 0.0);
}

#[tokio::test]
async fn test_zero_subscriptions_is_a_clean_run() {
    ensure_rustls_provider();
    let tmp = TempDir::new().unwrap();
    let sources = write_sources(&tmp, &[]);

    let mut store = Store::open(StorePaths::from_dir(tmp.path().join("state")));
    let writer = FileArtifacts::new(tmp.path().join("out"), 20);
    let (_tx, rx) = watch::channel(false);

    let summary = execute_run(&sources, &mut store, &writer, &fast_settings(), &rx)
        .await
        .unwrap();

    assert_eq!(summary.selected, 0);
    assert_eq!(summary.total_nodes, 0);
    assert!(writer.document_path().exists());
    assert!(writer.stats_path().exists());
}

#[tokio::test]
async fn test_cancelled_run_writes_no_state() {
    ensure_rustls_provider();
    let tmp = TempDir::new().unwrap();
    let sources = write_sources(&tmp, &["http://127.0.0.1:1/feed".to_owned()]);

    let paths = StorePaths::from_dir(tmp.path().join("state"));
    let mut store = Store::open(paths.clone());
    let writer = FileArtifacts::new(tmp.path().join("out"), 20);

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let err = execute_run(&sources, &mut store, &writer, &fast_settings(), &rx)
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Cancelled));

    // pre-run snapshot on disk: nothing was ever written
    assert!(!paths.subscriptions_path().exists());
}

#[tokio::test]
async fn test_missing_source_list_is_fatal() {
    ensure_rustls_provider();
    let tmp = TempDir::new().unwrap();
    let mut store = Store::open(StorePaths::from_dir(tmp.path().join("state")));
    let writer = FileArtifacts::new(tmp.path().join("out"), 20);
    let (_tx, rx) = watch::channel(false);

    let err = execute_run(
        &tmp.path().join("nope.txt"),
        &mut store,
        &writer,
        &fast_settings(),
        &rx,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, RunError::SourceList { .. }));
}

#[tokio::test]
async fn test_new_subscription_protected_for_three_runs() {
    ensure_rustls_provider();
    let tmp = TempDir::new().unwrap();
    // the fetch always fails, so scores sink immediately; protection must
    // keep the subscription selected for exactly three runs
    let sub_url = "http://127.0.0.1:1/feed".to_owned();
    let sources = write_sources(&tmp, std::slice::from_ref(&sub_url));

    let paths = StorePaths::from_dir(tmp.path().join("state"));
    let writer = FileArtifacts::new(tmp.path().join("out"), 20);
    let settings = fast_settings();
    let (_tx, rx) = watch::channel(false);

    for expected_run in 1..=3 {
        let mut store = Store::open(paths.clone());
        let summary = execute_run(&sources, &mut store, &writer, &settings, &rx)
            .await
            .unwrap();
        assert_eq!(summary.run_number, expected_run);
        assert_eq!(summary.selected, 1, "protected run {expected_run}");
        assert_eq!(summary.fetched_ok, 0);
    }

    let store = Store::open(paths.clone());
    let state = store.subscription(&sub_url).unwrap();
    assert_eq!(state.protection_counter, 0);
    assert_eq!(state.runs_used, 3);
    assert_eq!(state.runs_succeeded, 0);
    assert_eq!(state.tier, FrequencyTier::Suspended);

    // protection exhausted and tier suspended: run four selects nothing
    let mut store = Store::open(paths);
    let summary = execute_run(&sources, &mut store, &writer, &settings, &rx)
        .await
        .unwrap();
    assert_eq!(summary.selected, 0);
}
