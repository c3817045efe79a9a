//! アラートディスパッチャ

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::channel::AlertChannel;
use super::types::{AlertRule, ChannelKind, DeliveryResult};
use crate::change::ChangeEvent;

/// 重複抑制キー
///
/// 同一イベント + チャンネルの再送をクールダウン内で抑制する。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    url: String,
    metric_name: String,
    timestamp: DateTime<Utc>,
    channel: ChannelKind,
}

/// ディスパッチャ設定
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// チャンネル毎の最大送信試行回数
    pub retry_count: u32,
    /// バックオフの初期待機時間。試行毎に倍増する
    pub backoff_base: Duration,
    /// 重複抑制のクールダウン
    pub dedup_cooldown: ChronoDuration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            backoff_base: Duration::from_millis(200),
            dedup_cooldown: ChronoDuration::hours(24),
        }
    }
}

/// アラートディスパッチャ
///
/// 配送はベストエフォート。チャンネル障害はリトライ後にログへ記録され、
/// メトリクスパイプラインを止めることはない。
pub struct AlertDispatcher {
    channels: HashMap<ChannelKind, Arc<dyn AlertChannel>>,
    config: DispatcherConfig,
    /// 送信成功済みキー → 送信時刻
    sent: Arc<RwLock<HashMap<DedupKey, DateTime<Utc>>>>,
}

impl AlertDispatcher {
    /// 新しいディスパッチャを作成
    pub fn new(
        channels: HashMap<ChannelKind, Arc<dyn AlertChannel>>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            channels,
            config,
            sent: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 変化イベントをルールに照合して配送
    ///
    /// ルールは「メトリクス名が一致」「深刻度がルールの最小深刻度以上」
    /// 「変化率の絶対値が閾値以上」のすべてを満たしたとき発火する。
    pub async fn dispatch(&self, event: &ChangeEvent, rules: &[AlertRule]) -> Vec<DeliveryResult> {
        let mut results = Vec::new();

        for rule in rules {
            if rule.metric_name != event.metric_name {
                continue;
            }
            if event.severity < rule.severity {
                continue;
            }
            if event.change_percent.abs() < rule.threshold_percent {
                continue;
            }

            for channel_kind in &rule.channels {
                results.push(self.deliver(event, *channel_kind).await);
            }
        }

        results
    }

    /// 単一チャンネルへの配送（リトライ・重複抑制付き）
    async fn deliver(&self, event: &ChangeEvent, channel_kind: ChannelKind) -> DeliveryResult {
        let key = DedupKey {
            url: event.url.clone(),
            metric_name: event.metric_name.clone(),
            timestamp: event.timestamp,
            channel: channel_kind,
        };

        if self.is_duplicate(&key).await {
            debug!(
                "Suppressed duplicate alert for {} / {} on {}",
                event.url, event.metric_name, channel_kind
            );
            return DeliveryResult::deduplicated(channel_kind);
        }

        let Some(channel) = self.channels.get(&channel_kind) else {
            warn!("Alert channel {} is not configured", channel_kind);
            return DeliveryResult {
                channel: channel_kind,
                success: false,
                attempts: 0,
                deduplicated: false,
                error: Some("channel not configured".to_string()),
            };
        };

        let mut last_error = None;
        for attempt in 1..=self.config.retry_count {
            match channel.send(event).await {
                Ok(()) => {
                    self.mark_sent(key).await;
                    return DeliveryResult {
                        channel: channel_kind,
                        success: true,
                        attempts: attempt,
                        deduplicated: false,
                        error: None,
                    };
                }
                Err(e) => {
                    warn!(
                        "Alert delivery to {} failed (attempt {}/{}): {}",
                        channel_kind, attempt, self.config.retry_count, e
                    );
                    last_error = Some(e.to_string());
                    if attempt < self.config.retry_count {
                        let backoff = self.config.backoff_base * 2u32.pow(attempt - 1);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        DeliveryResult {
            channel: channel_kind,
            success: false,
            attempts: self.config.retry_count,
            deduplicated: false,
            error: last_error,
        }
    }

    async fn is_duplicate(&self, key: &DedupKey) -> bool {
        let sent = self.sent.read().await;
        match sent.get(key) {
            Some(sent_at) => Utc::now() - *sent_at < self.config.dedup_cooldown,
            None => false,
        }
    }

    async fn mark_sent(&self, key: DedupKey) {
        let mut sent = self.sent.write().await;
        let now = Utc::now();
        // 期限切れのキーをついでに掃除する
        let cooldown = self.config.dedup_cooldown;
        sent.retain(|_, sent_at| now - *sent_at < cooldown);
        sent.insert(key, now);
    }
}
