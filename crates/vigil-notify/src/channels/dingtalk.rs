use crate::channels::post_json;
use crate::{message, AlertContext, Sink};
use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct DingTalkSink {
    client: reqwest::Client,
    webhook_url: String,
    secret: Option<String>,
}

impl DingTalkSink {
    pub fn new(client: reqwest::Client, webhook_url: String, secret: Option<String>) -> Self {
        Self {
            client,
            webhook_url,
            secret,
        }
    }
}

/// Append DingTalk's signing query parameters. The sign string is
/// `"<timestamp_ms>\n<secret>"`, HMAC-SHA256 keyed by the secret,
/// base64-encoded and URL-encoded; this layout is fixed by the DingTalk
/// API and must not change.
pub fn sign_url(base_url: &str, secret: &str, timestamp_ms: i64) -> String {
    let string_to_sign = format!("{}\n{}", timestamp_ms, secret);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(string_to_sign.as_bytes());
    let sign = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
    let sign_encoded = urlencoding::encode(&sign);
    format!("{}&timestamp={}&sign={}", base_url, timestamp_ms, sign_encoded)
}

#[async_trait]
impl Sink for DingTalkSink {
    async fn send(&self, ctx: &AlertContext) -> Result<()> {
        let payload = serde_json::json!({
            "msgtype": "text",
            "text": { "content": message::render(ctx) },
        });

        let url = match &self.secret {
            Some(secret) => sign_url(&self.webhook_url, secret, Utc::now().timestamp_millis()),
            None => self.webhook_url.clone(),
        };

        post_json(&self.client, &url, &payload).await
    }

    fn name(&self) -> &'static str {
        "dingtalk"
    }
}
