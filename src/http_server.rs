// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Operational HTTP server: health and Prometheus metrics.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::metrics::Metrics;

pub(crate) async fn start(
    addr: SocketAddr,
    metrics: Metrics,
    cancel: CancellationToken,
    access_log: bool,
) -> anyhow::Result<SocketAddr> {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .with_state(metrics);
    if access_log {
        app = app.layer(TraceLayer::new_for_http());
    }

    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    debug!(%local, "http server listening");

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            error!(%error, "http server error");
        }
    });

    Ok(local)
}

async fn health(State(metrics): State<Metrics>) -> impl IntoResponse {
    (
        StatusCode::OK,
        format!("OK\nUptime: {} seconds", metrics.uptime().as_secs()),
    )
}

async fn render_metrics(State(metrics): State<Metrics>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(error) => {
            error!(%error, "metrics encoding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}
