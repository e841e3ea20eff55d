use crate::{
    app_state::AppState,
    error::{ApiError, Result},
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

/// Authenticity gate for the storefront push channel.
///
/// The push subscription is configured to append a shared secret as a
/// `token` query parameter; deliveries without a matching token are
/// rejected before any payload processing. The comparison is constant
/// time so response latency leaks nothing about the expected token.
pub async fn notification_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let query = request.uri().query().unwrap_or("");

    match presented_token(query) {
        Some(token) if token_matches(&token, &state.config.notifications.shared_token) => {
            Ok(next.run(request).await)
        }
        Some(_) => Err(ApiError::Unauthorized(
            "Invalid notification token".to_string(),
        )),
        None => Err(ApiError::Unauthorized(
            "Missing notification token".to_string(),
        )),
    }
}

/// Extract and percent-decode the `token` query parameter.
fn presented_token(query: &str) -> Option<String> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map(percent_decode)
}

fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Decode `%XX` escapes and `+` in a query value. Invalid escapes pass
/// through literally rather than failing the request.
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hi = (bytes[i + 1] as char).to_digit(16);
                let lo = (bytes[i + 2] as char).to_digit(16);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi * 16 + lo) as u8);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}
