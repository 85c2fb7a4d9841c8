use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use facerank_vision::{FaceClassifier, Outcome};
use tower_http::cors::CorsLayer;

use crate::{
    catalog::ClassCatalog,
    error::{ApiError, Result},
    prediction::{self, PredictResponse},
};

/// Models and class names, loaded once before the server starts
#[derive(Clone)]
pub struct AppState {
    classifier: Arc<Mutex<dyn FaceClassifier>>,
    catalog: Arc<ClassCatalog>,
    top_k: usize,
}

impl AppState {
    pub fn new(classifier: impl FaceClassifier + 'static, catalog: ClassCatalog, top_k: usize) -> Self {
        let classifier: Arc<Mutex<dyn FaceClassifier>> = Arc::new(Mutex::new(classifier));
        Self {
            classifier,
            catalog: Arc::new(catalog),
            top_k,
        }
    }
}

pub fn app(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handler_index))
        .route("/predict", post(handler_predict))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
}

async fn handler_index() -> &'static str {
    "Face Recognition API is Running!"
}

/// First `file` part that carries a filename
async fn read_upload(multipart: &mut Multipart) -> Result<(String, Bytes)> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        // A `file` part without a filename is a plain form value, not an upload
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        if file_name.is_empty() {
            return Err(ApiError::EmptyFilename);
        }
        let data = field.bytes().await?;
        return Ok((file_name, data));
    }
    Err(ApiError::MissingFile)
}

async fn handler_predict(
    State(state): State<AppState>,
    multipart: core::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>> {
    let Ok(mut multipart) = multipart else {
        return Err(ApiError::MissingFile);
    };
    let (file_name, data) = read_upload(&mut multipart).await?;
    log::debug!("received {} ({} bytes)", file_name, data.len());

    let classifier = state.classifier.clone();
    let outcome = tokio::task::spawn_blocking(move || -> Result<Outcome> {
        let img = image::load_from_memory(&data)?;
        // A panicking request leaves no partial state in the sessions
        let mut classifier = classifier.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(classifier.classify(&img)?)
    })
    .await??;

    let predictions = prediction::rank(&state.catalog, &outcome.probabilities, state.top_k)?;
    if let Some(top) = predictions.first() {
        log::info!(
            "{}: face score {:.3}, top class {} ({})",
            file_name,
            outcome.detection.score,
            top.class_name,
            top.confidence_percent
        );
    }

    Ok(Json(PredictResponse::success(predictions)))
}
