//! 通知チャンネル実装

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use super::types::ChannelKind;
use crate::change::ChangeEvent;
use crate::config::{AlertsConfig, EmailConfig, SlackConfig, WebhookConfig};
use crate::error::{Error, Result};

/// 通知チャンネルの抽象
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// チャンネル種別
    fn kind(&self) -> ChannelKind;

    /// 変化イベントを送信
    async fn send(&self, event: &ChangeEvent) -> Result<()>;
}

fn describe(event: &ChangeEvent) -> String {
    format!(
        "[{}] {} on {}: {:.2} -> {:.2} ({:+.1}%)",
        event.severity, event.metric_name, event.url, event.old_value, event.new_value,
        event.change_percent
    )
}

/// メールゲートウェイチャンネル
///
/// SMTP を直接話す代わりに、HTTP のメール送信 API へ POST する。
pub struct EmailChannel {
    client: reqwest::Client,
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(client: reqwest::Client, config: EmailConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, event: &ChangeEvent) -> Result<()> {
        let body = json!({
            "from": self.config.from,
            "to": self.config.to,
            "subject": format!("Metric alert: {} ({})", event.metric_name, event.severity),
            "text": describe(event),
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Delivery {
                channel: "email".to_string(),
                message: format!("gateway returned {}", response.status()),
            });
        }
        Ok(())
    }
}

/// 汎用 Webhook チャンネル
///
/// 変化イベントをそのまま JSON で POST する。
pub struct WebhookChannel {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookChannel {
    pub fn new(client: reqwest::Client, config: WebhookConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn send(&self, event: &ChangeEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.config.url)
            .json(event)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Delivery {
                channel: "webhook".to_string(),
                message: format!("endpoint returned {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Slack Incoming Webhook チャンネル
pub struct SlackChannel {
    client: reqwest::Client,
    config: SlackConfig,
}

impl SlackChannel {
    pub fn new(client: reqwest::Client, config: SlackConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl AlertChannel for SlackChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    async fn send(&self, event: &ChangeEvent) -> Result<()> {
        let body = json!({ "text": describe(event) });

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Delivery {
                channel: "slack".to_string(),
                message: format!("webhook returned {}", response.status()),
            });
        }
        Ok(())
    }
}

/// 設定からチャンネル一式を構築
pub fn build_channels(
    config: &AlertsConfig,
) -> HashMap<ChannelKind, Arc<dyn AlertChannel>> {
    let client = reqwest::Client::new();
    let mut channels: HashMap<ChannelKind, Arc<dyn AlertChannel>> = HashMap::new();

    if let Some(email) = &config.email {
        channels.insert(
            ChannelKind::Email,
            Arc::new(EmailChannel::new(client.clone(), email.clone())),
        );
    }
    if let Some(webhook) = &config.webhook {
        channels.insert(
            ChannelKind::Webhook,
            Arc::new(WebhookChannel::new(client.clone(), webhook.clone())),
        );
    }
    if let Some(slack) = &config.slack {
        channels.insert(
            ChannelKind::Slack,
            Arc::new(SlackChannel::new(client, slack.clone())),
        );
    }

    channels
}
