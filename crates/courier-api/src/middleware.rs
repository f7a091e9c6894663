use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::handlers::AppState;

/// Extracts and validates the bearer token from the Authorization header.
/// Validation is both stateless (signature, expiry) and stateful (equality
/// with the stored canonical token), so revoked tokens fail here.
pub async fn require_auth(
    State(service): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let claims = service.tokens().validate(auth_header)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
