//! Shared HTTP plumbing for conduits that talk to JSON APIs.
//!
//! Every API call builds its own request with an explicit endpoint and
//! hands it to [`send`], which performs the call and interprets the body.

use std::time::Duration;

use {
    reqwest::blocking::{Client, RequestBuilder},
    serde_json::{Value, from_str},
    tracing::error,
};

use crate::error::domain::ConduitError;

/// Timeout applied when a conduit does not configure one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Interpreted response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    /// The body parsed as JSON.
    Json(Value),
    /// The body was not JSON; holds the trimmed text.
    Text(String),
}

impl ApiResponse {
    /// Looks up a top-level key of a JSON object body.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            ApiResponse::Json(value) => value.get(key),
            ApiResponse::Text(_) => None,
        }
    }

    /// Human-readable rendering for logs.
    pub fn describe(&self) -> String {
        match self {
            ApiResponse::Json(value) => value.to_string(),
            ApiResponse::Text(text) => text.clone(),
        }
    }
}

/// Builds the blocking client a conduit reuses for all of its calls.
///
/// # Errors
///
/// Returns `ConduitError::Http` if the TLS backend cannot be initialised.
pub fn build_client(timeout_secs: Option<u64>) -> Result<Client, ConduitError> {
    let timeout = Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Sends a prepared request and interprets the response.
///
/// # Errors
///
/// Returns `ConduitError::Http` on transport failures and
/// `ConduitError::Status` when the service answers with a non-2xx status.
pub fn send(request: RequestBuilder) -> Result<ApiResponse, ConduitError> {
    let response = request.send()?;
    let url = response.url().to_string();
    let status = response.status();
    let body = response.text()?;

    if !status.is_success() {
        return Err(ConduitError::Status {
            url,
            status: status.as_u16(),
            body: body.trim().to_string(),
        });
    }
    Ok(parse_body(&body))
}

/// Parses a body as JSON, falling back to its trimmed text.
pub fn parse_body(body: &str) -> ApiResponse {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return ApiResponse::Text(String::new());
    }
    match from_str(trimmed) {
        Ok(value) => ApiResponse::Json(value),
        Err(e) => {
            error!("{}: {:?}", e, trimmed);
            ApiResponse::Text(trimmed.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::conduit::http::{ApiResponse, parse_body};

    #[test]
    fn test_json_body_is_parsed() {
        let response = parse_body(r#"{"result": {"/a": "OK"}}"#);
        assert_eq!(response, ApiResponse::Json(json!({"result": {"/a": "OK"}})));
        assert_eq!(response.get("result"), Some(&json!({"/a": "OK"})));
    }

    #[test]
    fn test_non_json_body_becomes_text() {
        let response = parse_body("  upstream timed out \n");
        assert_eq!(response, ApiResponse::Text("upstream timed out".to_string()));
        assert_eq!(response.get("result"), None);
        assert_eq!(response.describe(), "upstream timed out");
    }

    #[test]
    fn test_empty_body_is_empty_text() {
        assert_eq!(parse_body(""), ApiResponse::Text(String::new()));
    }
}
