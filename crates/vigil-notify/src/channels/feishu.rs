use crate::channels::post_json;
use crate::{message, AlertContext, Sink};
use anyhow::Result;
use async_trait::async_trait;

pub struct FeishuSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl FeishuSink {
    pub fn new(client: reqwest::Client, webhook_url: String) -> Self {
        Self {
            client,
            webhook_url,
        }
    }
}

#[async_trait]
impl Sink for FeishuSink {
    async fn send(&self, ctx: &AlertContext) -> Result<()> {
        let payload = serde_json::json!({
            "msg_type": "text",
            "content": { "text": message::render(ctx) },
        });
        post_json(&self.client, &self.webhook_url, &payload).await
    }

    fn name(&self) -> &'static str {
        "feishu"
    }
}
