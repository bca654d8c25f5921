use std::time::Duration;

use anyhow::Context;
use reqwest::redirect::Policy;

pub(crate) fn http_client(
    timeout: Duration,
    max_redirects: usize,
) -> anyhow::Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .user_agent(format!("feedmail/{}", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .redirect(Policy::limited(max_redirects))
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))
}

/// Fetches `url`, treating any non-2xx status as an error.
pub(crate) fn get(client: &reqwest::blocking::Client, url: &str) -> anyhow::Result<Vec<u8>> {
    let response = client.get(url).send()?.error_for_status()?;
    let bytes = response
        .bytes()
        .with_context(|| format!("failed to read response body from {}", url))?;
    Ok(bytes.to_vec())
}
