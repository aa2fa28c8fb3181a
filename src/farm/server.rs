//! Farm control API.
//!
//! `GET /ants` lists the farm's own ants as [`AntInfo`] documents; other
//! farms read it to federate. `GET /groups` returns the latest
//! [`SyncReport`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::consensus::SyncReport;
use crate::ant::{Ant, AntInfo};
use crate::api::ApiErrorBody;
use crate::Result;

pub struct ApiState {
    pub ants: Vec<Arc<Ant>>,
    pub reports: watch::Receiver<Option<SyncReport>>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ants", get(ants_handler))
        .route("/groups", get(groups_handler))
        .with_state(state)
}

async fn ants_handler(State(state): State<Arc<ApiState>>) -> Json<Vec<AntInfo>> {
    Json(state.ants.iter().map(|ant| ant.info()).collect())
}

async fn groups_handler(State(state): State<Arc<ApiState>>) -> Response {
    let latest = state.reports.borrow().clone();
    match latest {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiErrorBody {
                message: "no sync report yet".to_string(),
            }),
        )
            .into_response(),
    }
}

/// A running control API listener.
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ApiServer {
    /// Bind `listen` and serve the control API in the background.
    pub async fn bind(listen: &str, state: Arc<ApiState>) -> Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let signal = shutdown.clone();
        let app = router(state);
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(e) = served {
                error!("farm API server failed: {}", e);
            }
        });

        info!("farm API listening on {}", addr);
        Ok(Self {
            addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for the server task to end.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            debug!("farm API task ended abnormally: {}", e);
        }
        info!("farm API on {} closed", self.addr);
    }
}
