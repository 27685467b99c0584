//! Status HTTP endpoint
//!
//! Exposes the transmission status for operators and supervisors:
//!
//! - `GET /status` - JSON snapshot of [`TransmissionStatus`]
//! - `GET /ready` - 200 while connected, 503 otherwise
//! - `GET /live` - always 200 while the process serves requests

use crate::status::TransmissionStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: DateTime<Utc>,
}

/// HTTP status server over a status observable
pub struct StatusServer {
    port: u16,
    status_rx: watch::Receiver<TransmissionStatus>,
}

impl StatusServer {
    pub fn new(port: u16, status_rx: watch::Receiver<TransmissionStatus>) -> Self {
        Self { port, status_rx }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until the task is dropped or aborted
    pub async fn run(self) {
        tracing::info!(port = self.port, "Starting status server");
        warp::serve(routes(self.status_rx))
            .run(([0, 0, 0, 0], self.port))
            .await;
    }
}

/// The status routes, usable without binding a socket
pub fn routes(
    status_rx: watch::Receiver<TransmissionStatus>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let with_status = warp::any().map(move || status_rx.clone());

    let status_route = warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_status.clone())
        .map(|rx: watch::Receiver<TransmissionStatus>| {
            let snapshot = rx.borrow().clone();
            warp::reply::json(&snapshot)
        });

    let ready_route = warp::path("ready")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_status)
        .map(|rx: watch::Receiver<TransmissionStatus>| {
            let ready = rx.borrow().connected;
            let code = if ready {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            warp::reply::with_status(
                warp::reply::json(&ReadinessResponse {
                    ready,
                    timestamp: Utc::now(),
                }),
                code,
            )
        });

    let live_route = warp::path("live")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            warp::reply::json(&LivenessResponse {
                alive: true,
                timestamp: Utc::now(),
            })
        });

    status_route.or(ready_route).or(live_route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusBoard;

    #[tokio::test]
    async fn test_status_route_returns_snapshot() {
        let board = StatusBoard::new();
        board.reporter().record_sent();
        let filter = routes(board.subscribe());

        let response = warp::test::request()
            .method("GET")
            .path("/status")
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["messages_sent"], 1);
        assert_eq!(body["connected"], false);
    }

    #[tokio::test]
    async fn test_ready_follows_connected_flag() {
        let board = StatusBoard::new();
        let filter = routes(board.subscribe());

        let response = warp::test::request().path("/ready").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        board.reporter().set_connected(true);
        let response = warp::test::request().path("/ready").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_live_and_unknown_paths() {
        let board = StatusBoard::new();
        let filter = routes(board.subscribe());

        let response = warp::test::request().path("/live").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = warp::test::request().path("/metrics").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
