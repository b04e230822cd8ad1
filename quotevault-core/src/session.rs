//! Session negotiation with the upstream provider.
//!
//! Data requests must carry a session cookie and a "crumb" anti-forgery token.
//! Both are ephemeral: the cookie endpoint issues the cookie, and the crumb
//! endpoint exchanges that cookie for a short plain-text token. The provider
//! expires them at its own discretion, so callers must be prepared to
//! renegotiate rather than treat a stale session as fatal.

use crate::provider::FetchError;
use reqwest::blocking::Client;
use tracing::debug;

/// Browser-like client identification. Stricter provider variants reject
/// requests without it, so it is attached to every outbound call.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Ephemeral authentication material for one refresh batch.
///
/// Held in memory only, never persisted. Owned by the orchestration run that
/// negotiated it; concurrent runs negotiate their own.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Cookie header value (`key=value` pairs joined with `; `).
    pub cookie: String,
    /// Anti-forgery token appended to data-request URLs.
    pub crumb: String,
}

/// Negotiate a fresh session: one call to the cookie endpoint, one to the
/// crumb endpoint.
///
/// No internal retry; retry policy belongs to the caller. Every failure maps
/// to [`FetchError::Auth`] since without a session no data call can succeed.
pub fn negotiate(client: &Client, cookie_url: &str, crumb_url: &str) -> Result<SessionContext, FetchError> {
    let response = client
        .get(cookie_url)
        .send()
        .map_err(|e| FetchError::Auth(format!("cookie endpoint unreachable: {e}")))?;

    // The cookie endpoint answers with a non-success status but still sets
    // the session cookie; only a missing cookie counts as refusal.
    let cookie = harvest_cookies(&response)
        .ok_or_else(|| FetchError::Auth("provider did not issue a session cookie".into()))?;

    let response = client
        .get(crumb_url)
        .header(reqwest::header::COOKIE, &cookie)
        .send()
        .map_err(|e| FetchError::Auth(format!("crumb endpoint unreachable: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Auth(format!("crumb endpoint refused (HTTP {status})")));
    }

    let crumb = response
        .text()
        .map_err(|e| FetchError::Auth(format!("crumb body unreadable: {e}")))?
        .trim()
        .to_string();

    // An expired or rejected cookie yields an empty body or a JSON/HTML error
    // page instead of the bare token.
    if crumb.is_empty() || crumb.starts_with('{') || crumb.starts_with('<') {
        return Err(FetchError::Auth("crumb endpoint returned an invalid token".into()));
    }

    debug!(crumb_len = crumb.len(), "session negotiated");
    Ok(SessionContext { cookie, crumb })
}

/// Collect `Set-Cookie` pairs into a single `Cookie` header value.
fn harvest_cookies(response: &reqwest::blocking::Response) -> Option<String> {
    let pairs: Vec<&str> = response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
