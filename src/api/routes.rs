use crate::AppState;
use crate::error::SubmitError;
use crate::media::MediaRefs;
use crate::relay::RelayPayload;
use crate::submission;
use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Extension, Multipart, Path as AxumPath};
use axum::http::{HeaderValue, Request, Response, StatusCode, header};
use axum::response::{Html, IntoResponse};
use bytes::Bytes;
use futures::StreamExt;
use mime_guess::from_path;
use std::convert::Infallible;
use std::io::Error as IoError;
use std::path::PathBuf;
use tokio::io::AsyncSeekExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

const APP_SHELL: &str = include_str!("../../ui/index.html");

/// Receive a form submission, normalize its image and relay it downstream.
///
/// The downstream JSON body is returned as-is.
pub async fn submit(
    Extension(state): Extension<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response<Body>, SubmitError> {
    let submission =
        submission::receive(multipart?, &state.storage, state.max_upload_bytes).await?;

    info!(
        title = %submission.title,
        file = ?submission.image.as_ref().map(|file| &file.name),
        "Received submission"
    );

    // The payload carries the normalized name, so conversion has to finish first
    let image = match submission.image {
        Some(file) => Some(state.normalizer.normalize(file).await.into_file()),
        None => None,
    };

    let payload = RelayPayload {
        title: submission.title,
        description: submission.description,
        branding_direction: submission.branding_direction,
        image_filename: image.map(|file| file.name),
    };

    let response = state
        .relay
        .forward(&payload)
        .await
        .inspect_err(|error| error!(%error, "Error processing submission"))?;

    let media = MediaRefs::project(&response);
    if media.is_empty() {
        debug!("Downstream response references no media");
    } else {
        debug!(
            title = ?media.title,
            files = ?media.files().collect::<Vec<_>>(),
            "Downstream produced media"
        );
    }

    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        response.into_bytes(),
    )
        .into_response())
}

/// Client application shell, returned for every unmatched GET.
pub async fn app_shell() -> Html<&'static str> {
    Html(APP_SHELL)
}

async fn try_serve_from_filesystem(
    path: PathBuf,
    start: u64,
    end: u64,
) -> anyhow::Result<impl futures::Stream<Item = Result<Bytes, IoError>> + Send> {
    let mut fh = tokio::fs::File::open(&path).await?;

    fh.seek(std::io::SeekFrom::Start(start)).await?;
    let len = end - start + 1;

    use tokio::io::AsyncReadExt as _;
    let stream = ReaderStream::new(fh.take(len)).map(|res| {
        res.inspect_err(|error| warn!(%error, "Failed to read file chunk"))
    });

    Ok(stream)
}

/// Serve a file from the storage directory by bare name.
pub async fn serve_file(
    Extension(state): Extension<AppState>,
    AxumPath(filename): AxumPath<String>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let Some(local_path) = state.storage.resolve(&filename) else {
        warn!(%filename, "Invalid filename");
        return Ok(file_not_found());
    };
    debug!(%filename, ?local_path, "Request server file");

    let size = match tokio::fs::metadata(&local_path).await {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        _ => {
            debug!(%filename, "file metadata not found");
            return Ok(file_not_found());
        }
    };

    if size == 0 {
        return Ok(with_file_headers(
            Response::new(Body::empty()),
            &filename,
            StatusCode::OK,
            0,
            0,
            0,
        ));
    }

    let Some((status, start, end)) = parse_range(&req, size) else {
        let mut res = err_response(StatusCode::RANGE_NOT_SATISFIABLE, "Range not satisfiable");
        if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
            res.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        return Ok(res);
    };

    match try_serve_from_filesystem(local_path, start, end).await {
        Ok(stream) => {
            debug!(%filename, "Serving file from filesystem");
            Ok(with_file_headers(
                Response::new(Body::from_stream(stream)),
                &filename,
                status,
                start,
                end,
                size,
            ))
        }
        Err(error) => {
            error!(%filename, ?error, "Failed to serve file from filesystem");
            Ok(file_not_found())
        }
    }
}

fn with_file_headers(
    mut res: Response<Body>,
    filename: &str,
    status: StatusCode,
    start: u64,
    end: u64,
    size: u64,
) -> Response<Body> {
    let len = if size == 0 { 0 } else { end - start + 1 };

    *res.status_mut() = status;
    let headers = res.headers_mut();
    let content_type = from_path(filename).first_or_octet_stream();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type.as_ref())
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public,max-age=3600"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if status == StatusCode::PARTIAL_CONTENT
        && let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{size}"))
    {
        headers.insert(header::CONTENT_RANGE, value);
    }
    res
}

/// Single `bytes=start-end` / `bytes=start-` range against a non-empty file.
///
/// `None` means the range can't be satisfied.
fn parse_range(req: &Request<Body>, file_size: u64) -> Option<(StatusCode, u64, u64)> {
    let last = file_size - 1;

    if let Some(rh) = req.headers().get(header::RANGE)
        && let Ok(s) = rh.to_str()
        && let Some(stripped) = s.strip_prefix("bytes=")
        && let Some((start, end)) = stripped.split_once('-')
    {
        // suffix range: last N bytes
        if start.is_empty() {
            let suffix = end.parse::<u64>().ok().filter(|n| *n > 0)?;
            return Some((
                StatusCode::PARTIAL_CONTENT,
                file_size.saturating_sub(suffix),
                last,
            ));
        }

        let Ok(start) = start.parse::<u64>() else {
            // unparsable ranges are ignored
            return Some((StatusCode::OK, 0, last));
        };
        if start > last {
            return None;
        }
        let end = end.parse::<u64>().ok().unwrap_or(last).min(last);
        if end < start {
            return None;
        }
        return Some((StatusCode::PARTIAL_CONTENT, start, end));
    }

    Some((StatusCode::OK, 0, last))
}

fn file_not_found() -> Response<Body> {
    err_response(StatusCode::NOT_FOUND, "File not found")
}

pub(crate) fn err_response(status: StatusCode, body_str: &'static str) -> Response<Body> {
    (status, body_str).into_response()
}
