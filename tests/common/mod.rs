#![allow(dead_code)]

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::post;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use submission_relay::Config;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Test harness running the relay on its own runtime
pub struct TestServer {
    _handle: JoinHandle<()>,
    _storage: TempDir,
    storage_dir: PathBuf,
    port: u16,
}

impl TestServer {
    /// Start a server relaying to `webhook_url`
    pub async fn start(webhook_url: &str) -> Self {
        Self::start_with(webhook_url, |_| {}).await
    }

    /// Start a server with extra configuration applied on top of the test defaults
    pub async fn start_with(webhook_url: &str, tweak: impl FnOnce(&mut Config)) -> Self {
        let port = portpicker::pick_unused_port().expect("No available port");
        let storage = tempfile::tempdir().unwrap();
        let storage_dir = storage.path().join("files");

        let mut config = Config {
            listen_on_port: port,
            storage_dir: storage_dir.to_string_lossy().into_owned(),
            webhook_url: webhook_url.to_string(),
            converter: String::new(),
            relay_timeout_secs: Some(10),
            ..Default::default()
        };
        tweak(&mut config);

        // Spawn the server in a separate thread with its own runtime
        let handle = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                submission_relay::run(config).await.unwrap();
            });
        });

        let server = TestServer {
            _handle: handle,
            _storage: storage,
            storage_dir,
            port,
        };

        // Poll until server is ready
        let client = server.client();
        for _ in 0..200 {
            if let Ok(response) = client.get(server.url("/")).send().await
                && response.status().is_success()
            {
                break;
            }

            sleep(Duration::from_millis(10)).await;
        }

        server
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap()
    }

    /// Names of every file currently in the storage directory, sorted
    pub fn stored_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.storage_dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|entry| entry.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// POST the three text fields plus an optional `(file name, bytes)` image
    pub async fn submit(
        &self,
        client: &reqwest::Client,
        image: Option<(&str, Vec<u8>)>,
    ) -> reqwest::Response {
        let mut form = reqwest::multipart::Form::new()
            .text("Title", "Launch")
            .text("Description", "Spring sneaker drop")
            .text("Branding_Direction", "Bold, bright");

        if let Some((name, data)) = image {
            form = form.part(
                "Product_Image",
                reqwest::multipart::Part::bytes(data).file_name(name.to_string()),
            );
        }

        client
            .post(self.url("/api/submit"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }
}

#[derive(Clone)]
struct MockState {
    received_calls: Arc<Mutex<Vec<serde_json::Value>>>,
    status: StatusCode,
    body: Bytes,
}

/// Mock downstream automation recording every payload it receives
pub struct MockWebhook {
    server_handle: tokio::task::JoinHandle<()>,
    pub port: u16,
    pub received_calls: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl MockWebhook {
    /// Reply 200 with `body` verbatim
    pub async fn start(body: &'static str) -> Self {
        Self::start_with_status(StatusCode::OK, body).await
    }

    pub async fn start_with_status(status: StatusCode, body: &'static str) -> Self {
        let port = portpicker::pick_unused_port().expect("No available port for webhook");
        let received_calls = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            received_calls: received_calls.clone(),
            status,
            body: Bytes::from_static(body.as_bytes()),
        };

        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let app = Router::new()
            .route("/webhook", post(record_call))
            .with_state(state);
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockWebhook {
            server_handle,
            port,
            received_calls,
        }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/webhook", self.port)
    }

    pub async fn get_calls(&self) -> Vec<serde_json::Value> {
        self.received_calls.lock().await.clone()
    }
}

impl Drop for MockWebhook {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

async fn record_call(State(state): State<MockState>, body: Bytes) -> impl IntoResponse {
    let value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    state.received_calls.lock().await.push(value);

    (
        state.status,
        [(header::CONTENT_TYPE, "application/json")],
        state.body,
    )
}

/// A URL nothing listens on
pub fn unreachable_webhook() -> String {
    let port = portpicker::pick_unused_port().expect("No available port");
    format!("http://127.0.0.1:{port}/webhook")
}

/// Small PNG image encoded in memory
pub fn png_bytes() -> Vec<u8> {
    let image = image::RgbImage::from_fn(8, 8, |x, y| image::Rgb([(x * 30) as u8, (y * 30) as u8, 128]));
    let mut out = std::io::Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}
