use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tch::Device;
use tracing::error;

use inference::{Metrics, Predictor, ServingConfig};
use sentiment_core::SentimentError;

#[derive(Clone)]
struct AppState {
    predictor: Arc<Predictor>,
    metrics: Arc<Metrics>,
}

#[derive(Deserialize)]
struct PredictRequest {
    text: String,
}

#[derive(Serialize)]
struct PredictResponse {
    prediction: i64,
    prediction_label: String,
    confidence: f64,
    probabilities: serde_json::Map<String, serde_json::Value>,
    model_version: String,
    processing_time_ms: f64,
    status: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    error: String,
    error_kind: &'static str,
    timestamp: String,
}

/// The single place internal error kinds become transport codes. The core
/// stays transport-agnostic; operators can alert on `unavailable` and
/// `checkpoint` without parsing messages.
fn error_response(err: &SentimentError) -> (StatusCode, ErrorResponse) {
    let kind = err.kind();
    let status = match kind {
        "validation" => StatusCode::BAD_REQUEST,
        "unavailable" | "checkpoint" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        // full context goes to the log, not the caller
        "internal error".to_string()
    } else {
        err.to_string()
    };
    (
        status,
        ErrorResponse {
            status: "error",
            error: message,
            error_kind: kind,
            timestamp: Utc::now().to_rfc3339(),
        },
    )
}

async fn predict_handler(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> Response {
    if req.text.trim().is_empty() {
        state.metrics.record_error("validation");
        let body = ErrorResponse {
            status: "error",
            error: "text must not be empty".to_string(),
            error_kind: "validation",
            timestamp: Utc::now().to_rfc3339(),
        };
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    }

    let started = Instant::now();
    let predictor = Arc::clone(&state.predictor);
    let text = req.text;

    let result = tokio::task::spawn_blocking(move || predictor.predict(&text)).await;

    let result = match result {
        Ok(r) => r,
        Err(join_err) => {
            error!(error = %join_err, "prediction task panicked");
            state.metrics.record_error("internal");
            let body = ErrorResponse {
                status: "error",
                error: "internal error".to_string(),
                error_kind: "internal",
                timestamp: Utc::now().to_rfc3339(),
            };
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        }
    };

    match result {
        Ok(prediction) => {
            state.metrics.record_success();
            let mut probabilities = serde_json::Map::new();
            for (name, p) in &prediction.probabilities {
                probabilities.insert(name.clone(), json!(p));
            }
            let body = PredictResponse {
                prediction: prediction.index,
                prediction_label: prediction.label,
                confidence: prediction.confidence,
                probabilities,
                model_version: state.predictor.version().to_string(),
                processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                status: "success",
                timestamp: Utc::now().to_rfc3339(),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            error!(error = %err, kind = err.kind(), "prediction failed");
            state.metrics.record_error(err.kind());
            let (status, body) = error_response(&err);
            (status, Json(body)).into_response()
        }
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.gather_text() {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "metrics gathering failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

#[derive(Parser)]
#[command(name = "sentiment-server", about = "Serve sentiment predictions over HTTP")]
struct Cli {
    /// Optional serving config YAML; defaults apply when absent
    #[arg(long, default_value = "configs/serving_config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config: ServingConfig = if cli.config.exists() {
        serde_yaml::from_str(&std::fs::read_to_string(&cli.config)?)?
    } else {
        ServingConfig::default()
    };

    let device = Device::cuda_if_available();
    tracing::info!(?device, "starting server");

    let predictor = Arc::new(Predictor::load(&config, device)?);
    let metrics = Arc::new(Metrics::new()?);
    let state = AppState { predictor, metrics };

    let app = Router::new()
        .route("/predict", post(predict_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "listening");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
