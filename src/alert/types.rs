use serde::{Deserialize, Serialize};

use crate::change::Severity;

/// 通知チャンネルの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Webhook,
    Slack,
}

impl ChannelKind {
    /// チャンネル名を取得
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Webhook => "webhook",
            Self::Slack => "slack",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// アラートルール
///
/// 起動時に設定から一度だけ構築され、実行中は不変。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// 対象メトリクス名
    pub metric_name: String,
    /// 発火する最小変化率（%）
    pub threshold_percent: f64,
    /// 発火する最小深刻度
    pub severity: Severity,
    /// 通知先チャンネル
    pub channels: Vec<ChannelKind>,
}

/// 配送結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// 配送先チャンネル
    pub channel: ChannelKind,
    /// 送信成功
    pub success: bool,
    /// 試行回数
    pub attempts: u32,
    /// クールダウン内の重複として抑制された
    pub deduplicated: bool,
    /// 最後の失敗内容
    pub error: Option<String>,
}

impl DeliveryResult {
    pub(crate) fn deduplicated(channel: ChannelKind) -> Self {
        Self {
            channel,
            success: false,
            attempts: 0,
            deduplicated: true,
            error: None,
        }
    }
}
