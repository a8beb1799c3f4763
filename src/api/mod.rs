//! Host service: routes UI requests to per-chat session controllers.
mod events;
pub mod generate;
pub mod health;

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

const DEFAULT_BODY_LIMIT_BYTES: usize = 8 * 1024 * 1024;

enum RouteMatch {
    Health,
    Generate,
    Stop,
    Session,
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching handler.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let route = match_route(&parts.method, parts.uri.path());

    let response = match route {
        RouteMatch::Health => health::health_handler(&state).into_response(),
        RouteMatch::Generate => match read_request_body(body).await {
            Ok(bytes) => generate::generate_handler(state, &bytes),
            Err(response) => response,
        },
        RouteMatch::Stop => match read_request_body(body).await {
            Ok(bytes) => generate::stop_handler(&state, &bytes),
            Err(response) => response,
        },
        RouteMatch::Session => generate::session_handler(&state, parts.uri.query()),
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };

    Ok(response)
}

async fn read_request_body(body: Body) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, DEFAULT_BODY_LIMIT_BYTES)
        .await
        .map_err(|_| {
            (
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large (max 8MiB)",
            )
                .into_response()
        })
}

fn match_route(method: &Method, path: &str) -> RouteMatch {
    let expected = match path {
        "/" | "/health" => Method::GET,
        "/v1/generate" | "/v1/stop" => Method::POST,
        "/v1/session" => Method::GET,
        _ => return RouteMatch::NotFound,
    };
    if method != expected {
        return RouteMatch::MethodNotAllowed;
    }
    match path {
        "/v1/generate" => RouteMatch::Generate,
        "/v1/stop" => RouteMatch::Stop,
        "/v1/session" => RouteMatch::Session,
        _ => RouteMatch::Health,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_route() {
        assert!(matches!(match_route(&Method::GET, "/health"), RouteMatch::Health));
        assert!(matches!(match_route(&Method::GET, "/"), RouteMatch::Health));
        assert!(matches!(
            match_route(&Method::POST, "/v1/generate"),
            RouteMatch::Generate
        ));
        assert!(matches!(match_route(&Method::POST, "/v1/stop"), RouteMatch::Stop));
        assert!(matches!(
            match_route(&Method::GET, "/v1/session"),
            RouteMatch::Session
        ));
        assert!(matches!(
            match_route(&Method::GET, "/v1/generate"),
            RouteMatch::MethodNotAllowed
        ));
        assert!(matches!(match_route(&Method::GET, "/nope"), RouteMatch::NotFound));
    }
}
