mod checkpoint;
mod classes;
mod config;
mod error;
mod model;
mod predictor;
mod preprocess;
mod types;

use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use metrics::counter;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use error::PredictError;
use model::DiseaseModel;
use predictor::{LeafPredictor, Predictor};
use types::{
    ClassesResponse, ErrorResponse, HealthResponse, HomeResponse, ImagePrediction,
    PredictRequest, PredictResponse,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,leafcheck=debug".into()),
        )
        .init();

    let config = Config::parse();
    tracing::info!("Starting leaf disease service with config: {:?}", config);

    let device = model::device(config.cpu_only)?;

    tracing::info!(path = %config.model_path.display(), "Loading disease model...");
    let disease_model = match DiseaseModel::load(&config.model_path, &device, classes::NUM_CLASSES)
    {
        Ok((loaded, report)) => {
            if !report.is_clean() {
                tracing::warn!(
                    missing = ?report.missing,
                    unexpected = ?report.unexpected,
                    shape_mismatch = ?report.shape_mismatch,
                    "Checkpoint applied partially"
                );
            }
            tracing::info!(num_classes = loaded.num_classes(), "Model loaded successfully");
            Some(Arc::new(loaded))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Model not loaded. The service will start but predictions will not \
                 work until a checkpoint is provided"
            );
            None
        }
    };

    let predictor = LeafPredictor::new(disease_model, config.normalization());
    let state = AppState::new(Arc::new(predictor));

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = app(state)
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    predictor: Arc<dyn Predictor>,
}

impl AppState {
    fn new(predictor: Arc<dyn Predictor>) -> Self {
        Self { predictor }
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(home_handler))
        .route("/health", get(health_handler))
        .route("/classes", get(classes_handler))
        .route("/predict", post(predict_handler))
        .with_state(state)
}

async fn home_handler(State(state): State<AppState>) -> Json<HomeResponse> {
    Json(HomeResponse {
        success: true,
        message: "Plant Disease Prediction ML Service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_loaded: state.predictor.model_loaded(),
        classes: classes::DISEASE_CLASSES.to_vec(),
    })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        status: "healthy".to_string(),
        model_loaded: state.predictor.model_loaded(),
    })
}

async fn classes_handler() -> Json<ClassesResponse> {
    Json(ClassesResponse::current())
}

#[tracing::instrument(skip_all)]
async fn predict_handler(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Response {
    counter!("prediction_requests_total").increment(1);

    let Ok(Json(request)) = payload else {
        return bad_request("Invalid JSON body");
    };
    let Some(images) = request.images else {
        return bad_request("No images provided");
    };

    tracing::info!(image_count = images.len(), "Processing prediction request");

    // Per-image failures become inline placeholders; the batch never aborts
    // and the response carries one entry per input, in request order.
    let mut predictions = Vec::with_capacity(images.len());
    for (index, image) in images.into_iter().enumerate() {
        let Some(path) = image.path.as_deref().map(Path::new).filter(|p| p.exists()) else {
            predictions.push(ImagePrediction::not_found(index));
            continue;
        };

        match state.predictor.predict_path(path).await {
            Ok(prediction) => predictions.push(prediction.into_response_entry(index)),
            Err(PredictError::Pipeline(e)) => {
                tracing::error!(image_index = index, error = %e, "Prediction failed");
                predictions.push(ImagePrediction::failed(index, &e.to_string()));
            }
            Err(PredictError::Internal(e)) => {
                tracing::error!(image_index = index, error = %e, "Prediction task died");
                return internal_error(e.to_string());
            }
        }
    }

    Json(PredictResponse {
        success: true,
        predictions,
    })
    .into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
}

fn internal_error(error: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::with_error("Error during prediction", error)),
    )
        .into_response()
}
