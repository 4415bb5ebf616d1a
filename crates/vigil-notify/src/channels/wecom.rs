use crate::channels::post_json;
use crate::{message, AlertContext, Sink};
use anyhow::Result;
use async_trait::async_trait;

pub struct WeComSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl WeComSink {
    pub fn new(client: reqwest::Client, webhook_url: String) -> Self {
        Self {
            client,
            webhook_url,
        }
    }
}

#[async_trait]
impl Sink for WeComSink {
    async fn send(&self, ctx: &AlertContext) -> Result<()> {
        let payload = serde_json::json!({
            "msgtype": "text",
            "text": { "content": message::render(ctx) },
        });
        post_json(&self.client, &self.webhook_url, &payload).await
    }

    fn name(&self) -> &'static str {
        "wecom"
    }
}
