//! Notification fan-out for alert transitions.
//!
//! Each rule carries its own [`NotifySettings`]; on a firing or resolved
//! transition the [`Notifier`] builds the human-readable message once and
//! delivers it to every enabled sink. Sinks are independent: one failing
//! sink never blocks the others, and delivery failure never alters alert
//! state (the record is persisted before any notify attempt).

pub mod channels;
pub mod message;


use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing;
use vigil_common::types::{AlertRecord, NotifySettings, Probe};

use channels::dingtalk::DingTalkSink;
use channels::feishu::FeishuSink;
use channels::webhook::WebhookSink;
use channels::wecom::WeComSink;

/// Everything a sink needs to describe one alert transition.
#[derive(Debug, Clone)]
pub struct AlertContext {
    pub probe: Probe,
    pub hostname: String,
    pub record: AlertRecord,
}

/// An outbound notification destination.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Deliver one alert transition. Bounded by the shared client timeout;
    /// never retried.
    async fn send(&self, ctx: &AlertContext) -> Result<()>;

    fn name(&self) -> &'static str;
}

const SINK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Notifier {
    client: reqwest::Client,
}

impl Notifier {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().timeout(SINK_TIMEOUT).build()?;
        Ok(Self { client })
    }

    fn sinks(&self, settings: &NotifySettings) -> Vec<Box<dyn Sink>> {
        let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
        if settings.ding_talk_enabled && !settings.ding_talk_webhook.is_empty() {
            let secret = if settings.ding_talk_secret.is_empty() {
                None
            } else {
                Some(settings.ding_talk_secret.clone())
            };
            sinks.push(Box::new(DingTalkSink::new(
                self.client.clone(),
                settings.ding_talk_webhook.clone(),
                secret,
            )));
        }
        if settings.we_com_enabled && !settings.we_com_webhook.is_empty() {
            sinks.push(Box::new(WeComSink::new(
                self.client.clone(),
                settings.we_com_webhook.clone(),
            )));
        }
        if settings.feishu_enabled && !settings.feishu_webhook.is_empty() {
            sinks.push(Box::new(FeishuSink::new(
                self.client.clone(),
                settings.feishu_webhook.clone(),
            )));
        }
        if settings.webhook_enabled && !settings.webhook_url.is_empty() {
            sinks.push(Box::new(WebhookSink::new(
                self.client.clone(),
                settings.webhook_url.clone(),
            )));
        }
        sinks
    }

    /// Deliver to every enabled sink, isolating per-sink failures.
    pub async fn dispatch(&self, settings: &NotifySettings, ctx: &AlertContext) {
        for sink in self.sinks(settings) {
            match sink.send(ctx).await {
                Ok(()) => tracing::info!(
                    sink = sink.name(),
                    probe_id = %ctx.record.probe_id,
                    record_id = ctx.record.id,
                    status = %ctx.record.status,
                    "notification delivered"
                ),
                Err(e) => tracing::error!(
                    sink = sink.name(),
                    probe_id = %ctx.record.probe_id,
                    record_id = ctx.record.id,
                    error = %e,
                    "notification failed"
                ),
            }
        }
    }
}
