//! `/flows` handler.
//!
//! `GET /flows?hour=N` returns the hourly aggregates as a JSON array.
//! `POST /flows` accepts a JSON array of flow records. Error responses carry
//! no body so no internal detail leaks to clients.

use super::http::AppState;
use super::{empty_response, json_response};
use crate::store::{FlowStore, StoreError};
use flowd_shared::{FlowRecord, Hour};
use hyper::body::HttpBody;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::debug;
use url::form_urlencoded;

#[derive(Debug, Error)]
enum BodyError {
    #[error("request body exceeds {0} bytes")]
    TooLarge(usize),

    #[error("unable to read request body: {0}")]
    Read(#[from] hyper::Error),
}

pub async fn handle_flows(req: Request<Body>, remote: SocketAddr, state: &AppState) -> Response<Body> {
    debug!(src = %remote, "incoming request");

    let method = req.method().clone();
    match method {
        Method::GET => handle_read(&req, remote, &state.store),
        Method::POST => handle_write(req, remote, state).await,
        method => {
            debug!(src = %remote, "invalid request type {}", method);
            empty_response(StatusCode::BAD_REQUEST)
        }
    }
}

/// First value of `name` in a query string, percent- and `+`-decoded.
fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

fn handle_read(req: &Request<Body>, remote: SocketAddr, store: &FlowStore) -> Response<Body> {
    debug!(src = %remote, "incoming read request");

    let hour = match query_param(req.uri().query(), "hour") {
        Some(s) if !s.is_empty() => s,
        _ => {
            debug!(src = %remote, "read request missing parameter hour");
            return empty_response(StatusCode::BAD_REQUEST);
        }
    };
    let Ok(hour) = hour.parse::<Hour>() else {
        debug!(src = %remote, "read request parameter hour is not an int");
        return empty_response(StatusCode::BAD_REQUEST);
    };

    let flows = match store.get(hour) {
        Ok(flows) => flows,
        Err(StoreError::InvalidArgument(reason)) => {
            debug!(src = %remote, "rejected read request: {}", reason);
            return empty_response(StatusCode::BAD_REQUEST);
        }
        Err(e) => {
            tracing::error!(src = %remote, "unable to read flows: {}", e);
            return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    match serde_json::to_vec(&flows) {
        Ok(body) => {
            debug!(src = %remote, hour, flows = flows.len(), "successful read request");
            json_response(StatusCode::OK, body)
        }
        Err(e) => {
            tracing::error!(src = %remote, "unable to encode flows: {}", e);
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn is_json(req: &Request<Body>) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

async fn read_body(mut body: Body, limit: usize) -> Result<Vec<u8>, BodyError> {
    if body.size_hint().lower() > limit as u64 {
        return Err(BodyError::TooLarge(limit));
    }

    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge(limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

async fn handle_write(req: Request<Body>, remote: SocketAddr, state: &AppState) -> Response<Body> {
    debug!(src = %remote, "incoming write request");

    if !is_json(&req) {
        debug!(src = %remote, "invalid write request type: {:?}", req.headers().get(CONTENT_TYPE));
        return empty_response(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    let bytes = match read_body(req.into_body(), state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e @ BodyError::TooLarge(_)) => {
            debug!(src = %remote, "{}", e);
            return empty_response(StatusCode::PAYLOAD_TOO_LARGE);
        }
        Err(e) => {
            debug!(src = %remote, "{}", e);
            return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let flows: Vec<FlowRecord> = match serde_json::from_slice(&bytes) {
        Ok(flows) => flows,
        Err(e) => {
            debug!(src = %remote, "unable to unmarshal write body into flows: {}", e);
            return empty_response(StatusCode::BAD_REQUEST);
        }
    };

    match state.store.insert(flows) {
        Ok(summary) => {
            debug!(
                src = %remote,
                accepted = summary.accepted,
                skipped = summary.skipped,
                "successful write request"
            );
            empty_response(StatusCode::OK)
        }
        Err(e) => {
            tracing::error!(src = %remote, "unable to store flows: {}", e);
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
