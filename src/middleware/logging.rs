use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;

/// Middleware that logs each request with a correlation id, the inbound
/// body (truncated), and the response status and latency.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let (parts, body) = request.into_parts();

    // Bodies here are small JSON payloads; cap at 1MB regardless
    let bytes = match to_bytes(body, 1024 * 1024).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(request_id = %request_id, "Failed to read request body: {}", e);
            return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
        }
    };

    let request_body = String::from_utf8_lossy(&bytes);
    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        body = %truncate_body(&request_body, 2000),
        "→ Request"
    );

    let request = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(request).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        latency_ms = %start.elapsed().as_millis(),
        "← Response"
    );

    response
}

/// Truncate body for logging, adding ellipsis if truncated. The cut backs
/// off to a char boundary so multibyte payloads cannot split mid-character.
fn truncate_body(body: &str, max_len: usize) -> String {
    let body = body.trim();
    if body.len() <= max_len {
        return body.to_string();
    }

    let mut cut = max_len;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }

    format!(
        "{}...[truncated, {} bytes total]",
        &body[..cut],
        body.len()
    )
}
