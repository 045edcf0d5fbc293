//! REST API handlers

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use servelet_core::{ProcessStatus, ServeletError, ServeletResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Readiness latch
    pub readiness: watch::Receiver<bool>,
    /// Supervised process statuses
    pub processes: watch::Receiver<Vec<ProcessStatus>>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/processes", get(list_processes))
        .route("/api/v1/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router` on `address:port` until the shutdown flag is raised
pub async fn serve(
    address: &str,
    port: u16,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> ServeletResult<()> {
    let addr: SocketAddr = format!("{}:{}", address, port).parse().map_err(|e| {
        ServeletError::Config(format!("Invalid status address {}:{}: {}", address, port, e))
    })?;

    let listener = TcpListener::bind(addr).await?;
    info!("Status API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    Ok(())
}

/// 200 once the serving endpoint is ready, 503 before
async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    if *state.readiness.borrow() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// List supervised processes
async fn list_processes(State(state): State<Arc<AppState>>) -> Json<Vec<ProcessStatus>> {
    Json(state.processes.borrow().clone())
}

/// Launcher status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub ready: bool,
    pub processes: Vec<ProcessStatus>,
}

/// Get launcher status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        ready: *state.readiness.borrow(),
        processes: state.processes.borrow().clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use servelet_core::{ProcessSpec, ProcessState};
    use tower::ServiceExt;

    fn state(ready: bool) -> (watch::Sender<bool>, AppState) {
        let (ready_tx, readiness) = watch::channel(ready);
        let mut status = ProcessStatus::pending(&ProcessSpec::new("neuron-rtd", "neuron-rtd", 0));
        status.state = ProcessState::Running;
        status.pid = Some(42);
        status.started_at = Some(chrono::Utc::now());
        let (_, processes) = watch::channel(vec![
            status,
            ProcessStatus::pending(&ProcessSpec::new("tensorflow-serving", "tf", 1)),
        ]);
        (ready_tx, AppState { readiness, processes })
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_healthz_follows_readiness() {
        let (ready_tx, state) = state(false);
        let router = create_router(state);

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        ready_tx.send(true).unwrap();
        let response = router
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_processes() {
        let (_ready_tx, state) = state(false);
        let (status, body) = get_json(create_router(state), "/api/v1/processes").await;

        assert_eq!(status, StatusCode::OK);
        let processes = body.as_array().unwrap();
        assert_eq!(processes.len(), 2);
        assert_eq!(processes[0]["name"], "neuron-rtd");
        assert_eq!(processes[0]["state"], "running");
        assert_eq!(processes[0]["pid"], 42);
        assert_eq!(processes[1]["state"], "pending");
    }

    #[tokio::test]
    async fn test_status() {
        let (_ready_tx, state) = state(true);
        let (status, body) = get_json(create_router(state), "/api/v1/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["ready"], true);
        assert_eq!(body["processes"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let (_ready_tx, state) = state(true);
        let (stop_tx, stop_rx) = watch::channel(false);
        let server = tokio::spawn(serve("127.0.0.1", 0, create_router(state), stop_rx));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_serve_rejects_bad_address() {
        let (_ready_tx, state) = state(true);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let err = serve("not an address", 8888, create_router(state), stop_rx)
            .await
            .unwrap_err();
        assert!(matches!(err, ServeletError::Config(_)));
    }
}
