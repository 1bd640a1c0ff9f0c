//! Client-facing HTTP API
//!
//! Two verbs: `PUT <any path>` uploads a blob to a capacity-weighted shard
//! pick, `GET /stats` serves the aggregate statistics. The upload path is
//! arbitrary (it is forwarded verbatim to the storage node), so the whole
//! surface is one fallback dispatcher rather than a route table. Every
//! failure is a 500 with `{"error": ...}`; failures here are server-side by
//! definition.

use crate::common::Error;
use crate::coordinator::server::Coordinator;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new().fallback(dispatch).with_state(coordinator)
}

async fn dispatch(State(coordinator): State<Arc<Coordinator>>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if method == Method::PUT {
        upload(coordinator, request).await
    } else if method == Method::GET && path == "/stats" {
        stats(coordinator).await
    } else {
        failure(
            &coordinator,
            Error::Unsupported(format!("{} {}", method, path)),
        )
    }
}

async fn upload(coordinator: Arc<Coordinator>, request: Request) -> Response {
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    let size = match content_length(request.headers()) {
        Some(size) => size,
        None => {
            return failure(
                &coordinator,
                Error::InvalidRequest("missing or invalid Content-Length".into()),
            );
        }
    };

    let body = request.into_body().into_data_stream();
    match coordinator.upload(&path, size, body).await {
        Ok(shard_id) => (StatusCode::OK, Json(json!({ "shard_id": shard_id }))).into_response(),
        Err(e) => failure(&coordinator, e),
    }
}

async fn stats(coordinator: Arc<Coordinator>) -> Response {
    match coordinator.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => failure(&coordinator, e),
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
}

/// 500 with the error message; the error itself also goes to the event
/// stream so operators see request-scoped failures without tailing clients.
fn failure(coordinator: &Coordinator, error: Error) -> Response {
    let message = error.to_string();
    coordinator.events().report(error);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}
