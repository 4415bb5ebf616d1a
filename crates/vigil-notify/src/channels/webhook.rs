use crate::channels::post_json;
use crate::{AlertContext, Sink};
use anyhow::Result;
use async_trait::async_trait;

/// Generic webhook: receives the full agent and record objects instead of
/// formatted text.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }

    pub fn payload(ctx: &AlertContext) -> serde_json::Value {
        serde_json::json!({
            "agent": ctx.probe,
            "record": ctx.record,
        })
    }
}

#[async_trait]
impl Sink for WebhookSink {
    async fn send(&self, ctx: &AlertContext) -> Result<()> {
        post_json(&self.client, &self.url, &Self::payload(ctx)).await
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
