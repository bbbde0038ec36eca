//! Shared HTTP client construction and endpoint URL handling.

use std::time::Duration;

use crate::error::LlmError;

/// Build the HTTP client used for chat requests.
///
/// Config: 30s connect timeout, `request_timeout` overall, rustls TLS,
/// `parley/{version}` user-agent, redirect limit 10.
///
/// # Errors
///
/// Returns `LlmError::Http` if the TLS backend cannot be initialized.
pub fn build_client(request_timeout: Duration) -> Result<reqwest::Client, LlmError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(request_timeout)
        .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?;
    Ok(client)
}

/// Collapse runs of `/` that follow the scheme separator.
///
/// `http://host//v1///chat` becomes `http://host/v1/chat`. Input without a
/// scheme is collapsed as a whole.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let (scheme, rest) = match url.find("://") {
        Some(pos) => url.split_at(pos + 3),
        None => ("", url),
    };
    let mut out = String::with_capacity(url.len());
    out.push_str(scheme);
    let mut prev_slash = false;
    for c in rest.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

/// Join a server base and a request path into one normalized URL.
#[must_use]
pub fn join_url(server: &str, path: &str) -> String {
    normalize_url(&format!("{server}/{path}"))
}
