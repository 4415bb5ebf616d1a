pub mod dingtalk;
pub mod feishu;
pub mod webhook;
pub mod wecom;

use anyhow::Result;
use serde_json::Value;

/// POST a JSON payload and treat any non-2xx status as a sink error.
pub(crate) async fn post_json(client: &reqwest::Client, url: &str, body: &Value) -> Result<()> {
    let resp = client
        .post(url)
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("sink returned HTTP {status}: {body}");
    }
    Ok(())
}
