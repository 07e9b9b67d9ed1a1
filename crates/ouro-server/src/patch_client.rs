//! HTTP client side of `/patch` — the same call targets the sandbox during
//! verification and the real child after admission.

use anyhow::{bail, Context, Result};
use std::time::Duration;

const PATCH_TIMEOUT: Duration = Duration::from_secs(30);
/// How much of an error body is worth quoting back.
const BODY_SNIPPET: usize = 1024;

pub async fn post_patch(client: &reqwest::Client, port: u16, patch: &[u8]) -> Result<()> {
    let url = format!("http://localhost:{port}/patch");
    let response = client
        .post(url.as_str())
        .timeout(PATCH_TIMEOUT)
        .body(patch.to_vec())
        .send()
        .await
        .with_context(|| format!("posting patch to {url}"))?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(BODY_SNIPPET).collect();
        bail!("unexpected status {status} from patch endpoint: {snippet}");
    }
    Ok(())
}
