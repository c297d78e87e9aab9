//! Axum web server exposing the extraction pipeline: JSON extraction, CSV
//! export, and chunk-by-chunk progress over WebSocket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use secner_core::{Document, ExtractionPipeline, PatternProvider, PipelineEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared application state.
struct AppState {
    pipeline: ExtractionPipeline,
}

#[derive(Deserialize)]
struct ExtractRequest {
    text: String,
}

#[derive(Serialize)]
struct ExtractStats {
    unique_entities: usize,
    unique_classes: usize,
    total_mentions: usize,
}

#[derive(Serialize)]
struct ExtractResponse {
    report: secner_core::EntityReport,
    stats: ExtractStats,
    processing_ms: u64,
}

/// Picks the inference back-end. With the `onnx` feature enabled and
/// `SECNER_MODEL_DIR` pointing at installed model files the transformer
/// back-end is used; everything else falls back to regex patterns.
fn build_pipeline() -> ExtractionPipeline {
    #[cfg(feature = "onnx")]
    {
        use secner_core::{OnnxConfig, OnnxProvider};
        if let Ok(dir) = std::env::var("SECNER_MODEL_DIR") {
            let config = OnnxConfig::from_dir(&dir);
            match OnnxProvider::shared(&config) {
                Ok(provider) => {
                    info!(model_dir = %dir, "using ONNX back-end");
                    return ExtractionPipeline::new(provider);
                }
                Err(err) => {
                    tracing::warn!(%err, "ONNX back-end unavailable, falling back to patterns");
                }
            }
        }
    }
    info!("using pattern back-end");
    ExtractionPipeline::new(Arc::new(PatternProvider::new()))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let state = Arc::new(AppState { pipeline: build_pipeline() });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/extract", post(extract_handler))
        .route("/export", post(export_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind("0.0.0.0:3000").await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%err, "failed to bind 0.0.0.0:3000");
            std::process::exit(1);
        }
    };
    info!("threat report extraction server on http://localhost:3000");
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(%err, "server error");
    }
}

async fn index_handler() -> impl IntoResponse {
    Html(include_str!("templates/index.html"))
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "healthy"}))
}

/// Full extraction over HTTP POST, no streaming.
async fn extract_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExtractRequest>,
) -> impl IntoResponse {
    if req.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "empty text"})),
        )
            .into_response();
    }

    let started = std::time::Instant::now();
    let doc = Document::new(req.text);

    // The pipeline is CPU-bound; keep it off the async runtime.
    let state_for_task = Arc::clone(&state);
    let result =
        tokio::task::spawn_blocking(move || state_for_task.pipeline.run(&doc)).await;

    match result {
        Ok(Ok(report)) => {
            let stats = ExtractStats {
                unique_entities: report.unique_entities(),
                unique_classes: report.unique_classes(),
                total_mentions: report.total_mentions,
            };
            Json(ExtractResponse {
                report,
                stats,
                processing_ms: started.elapsed().as_millis() as u64,
            })
            .into_response()
        }
        Ok(Err(err)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": err.to_string(), "retryable": err.is_retryable()})),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": err.to_string()})),
        )
            .into_response(),
    }
}

/// Extraction with CSV download of the final report.
async fn export_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExtractRequest>,
) -> impl IntoResponse {
    if req.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "empty text"})),
        )
            .into_response();
    }

    let doc = Document::new(req.text);
    let state_for_task = Arc::clone(&state);
    let result = tokio::task::spawn_blocking(move || {
        state_for_task
            .pipeline
            .run(&doc)
            .and_then(|report| report.to_csv().map_err(Into::into))
    })
    .await;

    match result {
        Ok(Ok(csv)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"entities.csv\"",
                ),
            ],
            csv,
        )
            .into_response(),
        Ok(Err(err)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": err.to_string()})),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": err.to_string()})),
        )
            .into_response(),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// WebSocket loop: receives a report text, runs the pipeline off-runtime
/// and relays every progress event to the client.
async fn handle_websocket(mut socket: WebSocket, state: Arc<AppState>) {
    info!("WebSocket connected");

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                // Accepts JSON {"text": ...} or a bare text frame.
                let text_str = match serde_json::from_str::<ExtractRequest>(&text) {
                    Ok(req) => req.text.trim().to_string(),
                    Err(_) => text.trim().to_string(),
                };
                if text_str.is_empty() {
                    continue;
                }

                info!(chars = text_str.len(), "extracting via WebSocket");

                // The std::mpsc receiver is not Send, so events are
                // collected after the blocking task completes and then
                // relayed in order.
                let (tx_std, rx_std) = std::sync::mpsc::channel::<PipelineEvent>();
                let state_for_task = Arc::clone(&state);
                let handle = tokio::task::spawn_blocking(move || {
                    let doc = Document::new(text_str);
                    state_for_task.pipeline.run_streaming(&doc, tx_std);
                });
                handle.await.ok();

                let events: Vec<PipelineEvent> = rx_std.try_iter().collect();
                for event in &events {
                    if let Ok(json) = serde_json::to_string(event) {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            return; // client went away
                        }
                        // Small pause so the client can animate progress.
                        tokio::time::sleep(tokio::time::Duration::from_millis(35)).await;
                    }
                }
            }
            Message::Close(_) => {
                info!("WebSocket disconnected");
                return;
            }
            Message::Ping(payload) => {
                let _ = socket.send(Message::Pong(payload)).await;
            }
            _ => {}
        }
    }
}
