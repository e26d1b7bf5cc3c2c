pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod media;
pub mod normalize;
pub mod relay;
pub mod storage;
pub mod submission;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post};
use std::path::Path;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info;

//
// Re-export
//
pub use api::{app_shell, log_request_errors, serve_file, submit};
pub use app_state::AppState;
pub use config::Config;
pub use error::{GENERIC_ERROR, SubmitError};
pub use media::{MediaRefs, bare_filename};
pub use normalize::{ConversionError, ImageNormalizer, Normalized, UnchangedReason};
pub use relay::{RelayError, RelayPayload, RelayResponse, SubmissionRelay};
pub use storage::{StorageError, StorageRoot, StoredFile};
pub use submission::{Submission, SubmissionForm, UploadedImage};

/// Room left for the text fields and multipart framing on top of the file limit.
const FORM_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Build the application router around a ready state.
///
/// Unmatched GETs go to the client shell: the built bundle in `ui_dir` when
/// given, the embedded page otherwise.
pub fn router(state: AppState, ui_dir: Option<&Path>) -> Router {
    let body_limit = submit_body_limit(state.max_upload_bytes);

    // CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route(
            "/api/submit",
            // overflow becomes a 413 multipart error
            post(submit).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/files/{filename}", get(serve_file));

    let app = match ui_dir {
        Some(dir) => {
            info!(ui_dir = ?dir, "Serving client bundle");
            app.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html"))))
        }
        None => app.fallback(get(app_shell)),
    };

    app.layer(axum::middleware::from_fn(log_request_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(state))
}

fn submit_body_limit(max_upload_bytes: u64) -> usize {
    usize::try_from(max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES)).unwrap_or(usize::MAX)
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(&config).await?;
    let app = router(state, config.ui_dir.as_deref().map(Path::new));

    let addr = format!("0.0.0.0:{}", config.listen_on_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
