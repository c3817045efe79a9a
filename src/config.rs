//! エンジン設定
//!
//! 設定ファイル（TOML / JSON）と環境変数からエンジン設定を読み込む。
//! 不正な設定はトラッキング実行前に `Validation` エラーで即座に失敗させる。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::alert::ChannelKind;
use crate::change::Severity;
use crate::error::{Error, Result};

/// エンジン全体の設定
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub retention: RetentionConfig,
    pub anomaly: AnomalyConfig,
    pub alerts: AlertsConfig,
}

/// データベース設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// 接続URL（例: `sqlite://seopulse.db`）
    pub url: String,
    /// 最大接続数
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://seopulse.db".to_string(),
            max_connections: 8,
        }
    }
}

/// スナップショット保持設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// ローリングウィンドウ（日数）。これより古いスナップショットはアーカイブされる
    pub window_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { window_days: 365 }
    }
}

/// 異常検知設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnomalyConfig {
    /// Z-score の閾値
    pub z_threshold: f64,
    /// 判定に必要な直前データ点の最小数
    pub min_window: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            z_threshold: 2.5,
            min_window: 5,
        }
    }
}

/// アラート設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertsConfig {
    /// メトリクス名 → ルール
    #[serde(default)]
    pub rules: HashMap<String, RuleConfig>,
    /// チャンネル毎の最大送信試行回数
    pub retry_count: u32,
    /// バックオフの初期待機時間（ミリ秒）。試行毎に倍増する
    pub backoff_base_ms: u64,
    /// 重複抑制のクールダウン（時間）
    pub dedup_cooldown_hours: u32,
    /// メールゲートウェイ設定
    #[serde(default)]
    pub email: Option<EmailConfig>,
    /// 汎用 Webhook 設定
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    /// Slack Webhook 設定
    #[serde(default)]
    pub slack: Option<SlackConfig>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            rules: HashMap::new(),
            retry_count: 3,
            backoff_base_ms: 200,
            dedup_cooldown_hours: 24,
            email: None,
            webhook: None,
            slack: None,
        }
    }
}

/// メトリクス毎のアラートルール設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleConfig {
    /// 発火する最小変化率（%）
    pub threshold_percent: f64,
    /// 発火する最小深刻度
    pub severity: Severity,
    /// 通知先チャンネル
    pub channels: Vec<ChannelKind>,
}

/// メールゲートウェイ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    /// 送信APIエンドポイント
    pub endpoint: String,
    /// API認証キー
    pub api_key: String,
    pub from: String,
    pub to: String,
}

/// Webhook 設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    pub url: String,
}

/// Slack Webhook 設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlackConfig {
    pub webhook_url: String,
}

impl EngineConfig {
    /// 設定ファイルから読み込み、環境変数で上書き
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder();

        let default_config = EngineConfig::default();
        settings = settings.add_source(
            config::Config::try_from(&default_config)
                .map_err(|e| Error::Config(e.to_string()))?,
        );

        // 設定ファイルを読み込み（複数の場所を試行）
        let config_paths = [
            "seopulse.toml",
            "seopulse.json",
            "config/seopulse.toml",
            "config/seopulse.json",
        ];

        for path in &config_paths {
            if std::path::Path::new(path).exists() {
                settings = settings.add_source(config::File::with_name(path));
                break;
            }
        }

        // 環境変数で上書き (SEOPULSE_ で始まる変数)
        settings = settings.add_source(
            config::Environment::with_prefix("SEOPULSE")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = settings
            .build()
            .map_err(|e| Error::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// 設定内容を検証。最初に見つかった不正フィールドを報告する
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(Error::validation("database.url", "must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(Error::validation(
                "database.max_connections",
                "must be greater than zero",
            ));
        }
        if self.retention.window_days == 0 {
            return Err(Error::validation(
                "retention.window_days",
                "must be greater than zero",
            ));
        }
        if self.anomaly.z_threshold <= 0.0 {
            return Err(Error::validation(
                "anomaly.z_threshold",
                "must be greater than zero",
            ));
        }
        if self.anomaly.min_window < 2 {
            return Err(Error::validation(
                "anomaly.min_window",
                "must be at least 2 (sample variance needs two baseline points)",
            ));
        }
        if self.alerts.retry_count == 0 {
            return Err(Error::validation(
                "alerts.retry_count",
                "must be greater than zero",
            ));
        }

        for (metric, rule) in &self.alerts.rules {
            if rule.threshold_percent <= 0.0 {
                return Err(Error::validation(
                    format!("alerts.rules.{}.threshold_percent", metric),
                    "must be greater than zero",
                ));
            }
            if rule.channels.is_empty() {
                return Err(Error::validation(
                    format!("alerts.rules.{}.channels", metric),
                    "must not be empty",
                ));
            }
            for channel in &rule.channels {
                let configured = match channel {
                    ChannelKind::Email => self.alerts.email.is_some(),
                    ChannelKind::Webhook => self.alerts.webhook.is_some(),
                    ChannelKind::Slack => self.alerts.slack.is_some(),
                };
                if !configured {
                    return Err(Error::validation(
                        format!("alerts.{}", channel.as_str()),
                        "channel referenced by a rule but not configured",
                    ));
                }
            }
        }

        Ok(())
    }
}
