use std::sync::Arc;

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use tokio::io::AsyncWriteExt as _;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use super::model::{ErrorBody, UrlRequest};
use super::rate_limit::{self, RateLimiter};
use crate::config::Config;
use crate::dataset::{DatasetAssembler, UploadedFile};
use crate::error::{Error, Result};
use crate::formats::{ExtractionSummary, InlineDataset, PageRecord};
use crate::store::StoredFile;

const FILES_FIELD: &str = "files";

#[derive(Debug, Clone)]
pub struct AppState {
    assembler: Arc<DatasetAssembler>,
    limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(assembler: DatasetAssembler) -> Self {
        let limiter = RateLimiter::per_minute(assembler.config().rate_limit_per_minute);
        Self {
            assembler: Arc::new(assembler),
            limiter: Arc::new(limiter),
        }
    }

    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        Ok(Self::new(DatasetAssembler::from_config(config)?))
    }

    pub fn config(&self) -> &Config {
        self.assembler.config()
    }
}

pub fn router(state: AppState) -> Router {
    let extraction = Router::new()
        .route("/extract-data", post(extract_data))
        .route("/upload", post(upload))
        .route("/web-links", post(web_links))
        .route("/web-scrape", post(web_scrape))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.limiter),
            rate_limit::enforce,
        ));

    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .merge(extraction)
        .layer(DefaultBodyLimit::max(state.config().max_request_size))
        .layer(cors_layer(&state.config().cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(origin, ?err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Every core failure is reported as 413 with a `detail` message.
#[derive(Debug)]
pub struct AppError(Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = self.0;
        match &err {
            Error::Config(_) | Error::Io { .. } => {
                tracing::error!(kind = err.kind(), error = %err, "request failed");
            }
            _ => tracing::debug!(kind = err.kind(), error = %err, "request rejected"),
        }
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(ErrorBody {
                detail: err.to_string(),
            }),
        )
            .into_response()
    }
}

async fn web_scrape(
    State(state): State<AppState>,
    payload: Result<Json<UrlRequest>, JsonRejection>,
) -> Result<Json<ExtractionSummary>, AppError> {
    let url = required_url(payload)?;
    let (_page, summary) = state.assembler.scrape_page(&url).await?;
    Ok(Json(summary))
}

async fn web_links(
    State(state): State<AppState>,
    payload: Result<Json<UrlRequest>, JsonRejection>,
) -> Result<Json<Vec<PageRecord>>, AppError> {
    let url = required_url(payload)?;
    let (records, _summary) = state.assembler.discover_links(&url).await?;
    Ok(Json(records))
}

async fn extract_data(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ExtractionSummary>, AppError> {
    let multipart = multipart.map_err(|rejection| invalid_body(rejection.body_text()))?;
    let files = receive_files(&state, multipart).await?;
    let summary = state.assembler.extract_files(&files).await?;
    Ok(Json(summary))
}

/// Returns the dataset inline; nothing is written to the output directory.
async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<InlineDataset>, AppError> {
    let multipart = multipart.map_err(|rejection| invalid_body(rejection.body_text()))?;
    let files = receive_files(&state, multipart).await?;
    let dataset = state.assembler.extract_files_inline(&files).await?;
    Ok(Json(dataset))
}

fn required_url(payload: Result<Json<UrlRequest>, JsonRejection>) -> Result<String> {
    let Json(request) = payload.map_err(|rejection| invalid_body(rejection.body_text()))?;
    request
        .url()
        .map(str::to_string)
        .ok_or_else(|| Error::Validation("url is required".to_string()))
}

fn invalid_body(reason: String) -> Error {
    Error::Validation(format!("invalid request body: {reason}"))
}

fn multipart_error(err: MultipartError) -> Error {
    invalid_body(err.body_text())
}

/// Streams every `files` part into the upload directory. A part over the size
/// limit aborts the request and removes what was written so far.
async fn receive_files(state: &AppState, mut multipart: Multipart) -> Result<Vec<UploadedFile>> {
    let mut stored: Vec<StoredFile> = Vec::new();
    let mut files: Vec<UploadedFile> = Vec::new();

    let received = async {
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            if field.name() != Some(FILES_FIELD) {
                tracing::debug!(field = ?field.name(), "ignoring multipart field");
                continue;
            }
            let file = receive_file(state, field, &mut stored).await?;
            files.push(file);
        }
        Ok::<_, Error>(())
    }
    .await;

    if let Err(err) = received {
        for file in &stored {
            state.assembler.store().discard(file).await;
        }
        return Err(err);
    }
    if files.is_empty() {
        return Err(Error::Validation("at least one file is required".to_string()));
    }
    Ok(files)
}

async fn receive_file(
    state: &AppState,
    mut field: Field<'_>,
    stored: &mut Vec<StoredFile>,
) -> Result<UploadedFile> {
    let original_name = field.file_name().unwrap_or_default().trim().to_string();
    if original_name.is_empty() {
        return Err(Error::Validation("No file selected for uploading".to_string()));
    }

    let max_file_size = state.config().max_file_size;
    let (mut out, target) = state.assembler.store().create_upload(&original_name).await?;
    stored.push(target.clone());

    let mut written: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len() as u64;
        if written > max_file_size {
            return Err(Error::FileSize {
                file_name: original_name,
            });
        }
        out.write_all(&chunk)
            .await
            .map_err(|err| Error::io("write upload", &target.path, err))?;
    }
    out.flush()
        .await
        .map_err(|err| Error::io("write upload", &target.path, err))?;

    tracing::debug!(file = %original_name, stored = %target.file_name, bytes = written, "upload stored");
    Ok(UploadedFile {
        original_name,
        path: target.path,
    })
}
