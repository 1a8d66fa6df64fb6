use http::{header::AUTHORIZATION, HeaderMap};

use shared_models::error::AppError;

/// Pulls the bearer credential out of a handshake. The `Authorization` header
/// wins; browser WebSocket clients cannot set headers, so `?token=` is the
/// fallback.
pub fn extract_bearer_token(
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<String, AppError> {
    if let Some(auth_header) = headers.get(AUTHORIZATION) {
        let auth_value = auth_header
            .to_str()
            .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

        let token = auth_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))?;

        return non_empty(token);
    }

    match query_token {
        Some(token) => non_empty(token),
        None => Err(AppError::Auth("Missing authorization token".to_string())),
    }
}

fn non_empty(token: &str) -> Result<String, AppError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::Auth("Missing authorization token".to_string()));
    }
    Ok(token.to_string())
}
