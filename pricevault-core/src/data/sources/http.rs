//! Blocking HTTP plumbing shared by the adapters.

use crate::data::provider::{DataError, FetchError};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Client with a bounded per-request timeout.
pub fn build_client(timeout: Duration) -> Result<Client, DataError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| DataError::Config(format!("failed to build HTTP client: {e}")))
}

/// Send a request and turn transport failures and error statuses into [`FetchError`]s.
pub fn send(request: reqwest::blocking::RequestBuilder, symbol: &str) -> Result<Response, FetchError> {
    let resp = request.send().map_err(transport_error)?;
    match classify_status(resp.status(), resp.headers(), symbol) {
        Some(err) => Err(err),
        None => Ok(resp),
    }
}

/// Map a non-success status to the failure taxonomy. `None` for 2xx.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, symbol: &str) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
            retry_after: headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after),
        },
        // IP ban: treat as a quota that resets tomorrow
        StatusCode::FORBIDDEN => FetchError::RateLimited { retry_after: None },
        StatusCode::NOT_FOUND => FetchError::NotFound {
            symbol: symbol.to_string(),
        },
        other => FetchError::Unavailable(format!("HTTP {other} for {symbol}")),
    })
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

pub fn transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Unavailable(format!("timeout: {e}"))
    } else {
        FetchError::Unavailable(e.to_string())
    }
}
