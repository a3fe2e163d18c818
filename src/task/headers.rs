use rand::seq::SliceRandom;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE,
    ORIGIN, USER_AGENT,
};

use super::TaskError;

/// Desktop Chrome User-Agent strings for rotation
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
];

/// Pick a random User-Agent from the pool
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Build headers for authenticated check-in requests
///
/// Mimics a browser extension calling the service: bearer auth, JSON
/// content type, cross-site CORS fetch metadata and an optional `Origin`.
///
/// # Errors
///
/// Returns `TaskError::InvalidHeader` if the token, User-Agent or origin
/// contains bytes that cannot appear in a header value.
pub fn build_checkin_headers(
    session_token: &str,
    user_agent: &str,
    origin: Option<&str>,
) -> Result<HeaderMap, TaskError> {
    let mut headers = HeaderMap::new();

    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent).map_err(|_| TaskError::InvalidHeader { name: "user-agent" })?,
    );
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", session_token.trim()))
            .map_err(|_| TaskError::InvalidHeader { name: "authorization" })?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    if let Some(origin) = origin {
        headers.insert(
            ORIGIN,
            HeaderValue::from_str(origin).map_err(|_| TaskError::InvalidHeader { name: "origin" })?,
        );
    }

    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("cross-site"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("cors"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("empty"),
    );

    Ok(headers)
}
