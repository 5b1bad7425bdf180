use super::super::state::ServerState;
use crate::server::metrics::record_http_request;
use axum::extract::State;
use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::{error, info};

/// How much of each request the middleware writes to the log. Levels are
/// cumulative, `Body` also logs headers and paths.
#[derive(PartialEq, PartialOrd, Clone, Debug, Default, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    #[default]
    Path,
    Headers,
    Body,
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Feature sets and generation results fit comfortably, audio previews do not.
const MAX_LOGGABLE_BODY_LENGTH: usize = 4096;

fn content_length(headers: &HeaderMap) -> Result<usize, &'static str> {
    headers
        .get(header::CONTENT_LENGTH)
        .ok_or("no content-length")?
        .to_str()
        .map_err(|_| "content-length is not text")?
        .parse()
        .map_err(|_| "content-length is not a number")
}

fn log_headers(direction: &str, headers: &HeaderMap) {
    for (name, value) in headers {
        info!("  {} {}: {:?}", direction, name, value);
    }
}

/// Logs a body small enough to buffer and hands back an equivalent one.
async fn log_body(direction: &str, headers: &HeaderMap, body: Body) -> Result<Body, StatusCode> {
    let size = match content_length(headers) {
        Ok(size) => size,
        Err(reason) => {
            info!("  {} body not logged: {}", direction, reason);
            return Ok(body);
        }
    };
    if size > MAX_LOGGABLE_BODY_LENGTH {
        info!(
            "  {} body not logged: {:#}",
            direction,
            byte_unit::Byte::from(size)
        );
        return Ok(body);
    }

    let bytes = axum::body::to_bytes(body, size).await.map_err(|err| {
        error!("Failed to buffer {} body: {:?}", direction, err);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    info!("  {} body: {}", direction, String::from_utf8_lossy(&bytes));
    Ok(Body::from(bytes))
}

pub async fn log_requests(
    State(state): State<ServerState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let level = &state.config.requests_logging_level;
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if *level > RequestsLoggingLevel::None {
        info!(">>> {} {}", method, request.uri());
    }
    if *level >= RequestsLoggingLevel::Headers {
        log_headers("req", request.headers());
    }
    if *level >= RequestsLoggingLevel::Body {
        let (parts, body) = request.into_parts();
        match log_body("req", &parts.headers, body).await {
            Ok(body) => request = Request::from_parts(parts, body),
            Err(status) => return status.into_response(),
        }
    }

    let mut response = next.run(request).await;

    if *level >= RequestsLoggingLevel::Headers {
        log_headers("resp", response.headers());
    }
    if *level >= RequestsLoggingLevel::Body {
        let (parts, body) = response.into_parts();
        match log_body("resp", &parts.headers, body).await {
            Ok(body) => response = Response::from_parts(parts, body),
            Err(status) => return status.into_response(),
        }
    }

    let status = response.status().as_u16();
    let elapsed = start.elapsed();
    if *level > RequestsLoggingLevel::None {
        info!("<<< {} {} ({}ms)", status, path, elapsed.as_millis());
    }
    record_http_request(method.as_str(), &path, status, elapsed);

    response
}
