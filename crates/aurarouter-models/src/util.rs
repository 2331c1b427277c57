//! Shared request plumbing for the HTTP adapters.

use aurarouter_abstraction::ProviderError;

/// Maps a send-phase `reqwest` failure to the provider error vocabulary.
pub(crate) fn send_error(model_id: &str, error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout { model_id: model_id.to_string() }
    } else {
        ProviderError::Network { model_id: model_id.to_string(), cause: error.to_string() }
    }
}

/// Maps a non-2xx status to `auth` (401/403) or `http_status`.
pub(crate) fn status_error(model_id: &str, code: u16) -> ProviderError {
    match code {
        401 | 403 => ProviderError::Auth { model_id: model_id.to_string() },
        _ => ProviderError::HttpStatus { model_id: model_id.to_string(), code },
    }
}

/// Maps a body-decode failure to `protocol`.
pub(crate) fn decode_error(model_id: &str, error: reqwest::Error) -> ProviderError {
    ProviderError::Protocol { model_id: model_id.to_string(), detail: error.to_string() }
}

/// Enforces the configured minimum response length.
pub(crate) fn require_min_chars(
    text: String,
    min_chars: usize,
    model_id: &str,
) -> Result<String, ProviderError> {
    if text.trim().len() < min_chars.max(1) {
        Err(ProviderError::EmptyResponse { model_id: model_id.to_string() })
    } else {
        Ok(text)
    }
}

/// Strips trailing slashes so path joining stays predictable.
pub(crate) fn trim_endpoint(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').to_string()
}
