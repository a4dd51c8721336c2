//! Stats endpoint served next to `campusbot serve`.
//!
//! `GET /metrics` returns the store's per-table counts and the resolver's
//! tier counters as JSON; `GET /health` answers once the store pings.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use campusbot_core::{AppStats, CampusBot};
use campusbot_shared::{CampusBotError, RequestContext};
use color_eyre::eyre::{Result, WrapErr};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Deadline for one stats request.
const STATS_TIMEOUT: Duration = Duration::from_secs(5);

fn router(bot: Arc<CampusBot>) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .route("/health", get(handle_health))
        .with_state(bot)
}

/// Bind `addr` and serve until `token` is cancelled.
pub(crate) async fn serve(
    bot: Arc<CampusBot>,
    addr: SocketAddr,
    token: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind metrics listener on {addr}"))?;
    serve_on(listener, bot, token).await
}

async fn serve_on(
    listener: TcpListener,
    bot: Arc<CampusBot>,
    token: CancellationToken,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "metrics endpoint listening");
    axum::serve(listener, router(bot))
        .with_graceful_shutdown(token.cancelled_owned())
        .await
        .wrap_err("metrics server failed")
}

fn request_context() -> RequestContext {
    RequestContext::background()
        .with_request_id(Uuid::now_v7().to_string())
        .with_timeout(STATS_TIMEOUT)
}

async fn handle_metrics(
    State(bot): State<Arc<CampusBot>>,
) -> Result<Json<AppStats>, StatsError> {
    Ok(Json(bot.stats(&request_context()).await?))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health(
    State(bot): State<Arc<CampusBot>>,
) -> Result<Json<HealthResponse>, StatsError> {
    bot.store().await.ping(&request_context()).await?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

/// A store failure, reported as 503 with a JSON body.
struct StatsError(CampusBotError);

impl From<CampusBotError> for StatsError {
    fn from(e: CampusBotError) -> Self {
        Self(e)
    }
}

impl IntoResponse for StatsError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: String,
        }
        warn!(error = %self.0, "stats request failed");
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campusbot_shared::{AppConfig, MEMORY_STORAGE};

    type Server = tokio::task::JoinHandle<Result<()>>;

    async fn spawn_server() -> (SocketAddr, CancellationToken, Server) {
        let mut config = AppConfig::default();
        config.storage.path = MEMORY_STORAGE.into();
        let bot = Arc::new(CampusBot::open(config).await.unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let server = tokio::spawn(serve_on(listener, bot, token.clone()));
        (addr, token, server)
    }

    #[tokio::test]
    async fn metrics_reports_store_and_resolver_counters() {
        let (addr, token, server) = spawn_server().await;

        let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["resolver"]["upstream_calls"], 0);
        assert!(!body["store"]["tables"].as_array().unwrap().is_empty());

        let health: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
