//! Cross-origin access for the browser game client and per-request ids.
//!
//! The game page usually lives on another origin than the engine, so bet and
//! cashout POSTs need CORS. Every response carries `x-request-id`; the same
//! id is echoed in error bodies so a rejected cashout can be matched to its
//! log line.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use tower_http::cors::{Any, CorsLayer, ExposeHeaders};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// `*` or an empty list admits any origin; otherwise only the listed game
/// front-ends may call the API, and only with GET and POST
pub fn create_cors_layer(allowed_origins: Vec<String>) -> CorsLayer {
    let expose = ExposeHeaders::list([HeaderName::from_static(REQUEST_ID_HEADER)]);

    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(expose)
    } else {
        CorsLayer::new()
            .allow_origin(
                allowed_origins
                    .into_iter()
                    .filter_map(|o| o.parse::<HeaderValue>().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any)
            .expose_headers(expose)
    }
}

/// Tags the request and its response with an id, reusing one a proxy or the
/// client already set
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Handlers pull this from request extensions to fill `ErrorResponse::request_id`
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest, routing::post, Router};
    use tower::ServiceExt;

    fn router(origins: Vec<String>) -> Router {
        Router::new()
            .route("/api/cashout", post(|| async { "ok" }))
            .layer(axum::middleware::from_fn(request_id_middleware))
            .layer(create_cors_layer(origins))
    }

    fn preflight(origin: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("OPTIONS")
            .uri("/api/cashout")
            .header("origin", origin)
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_only_listed_front_ends_pass_cors() {
        let app = router(vec!["https://play.example".to_string()]);

        let allowed = app.clone().oneshot(preflight("https://play.example")).await.unwrap();
        assert_eq!(
            allowed.headers().get("access-control-allow-origin").unwrap(),
            "https://play.example"
        );

        let denied = app.oneshot(preflight("https://elsewhere.example")).await.unwrap();
        assert!(denied.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn test_request_id_is_generated_when_missing() {
        let response = router(Vec::new())
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/api/cashout")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let id = response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
