use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 変化の深刻度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// 軽微
    Minor,
    /// 中程度
    Moderate,
    /// 顕著
    Significant,
    /// 致命的
    Critical,
}

impl Severity {
    /// 深刻度名を取得
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Significant => "significant",
            Self::Critical => "critical",
        }
    }

    /// 文字列から深刻度を復元
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "minor" => Some(Self::Minor),
            "moderate" => Some(Self::Moderate),
            "significant" => Some(Self::Significant),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// メトリクス毎の深刻度閾値（critical, significant, moderate の順、%）
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeverityThresholds {
    pub critical: f64,
    pub significant: f64,
    pub moderate: f64,
}

/// 変化イベント
///
/// 同一 url + メトリクスの時系列上で隣接する2スナップショット間の
/// 分類済み差分。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// 対象URL
    pub url: String,
    /// メトリクス名
    pub metric_name: String,
    /// 旧値
    pub old_value: f64,
    /// 新値
    pub new_value: f64,
    /// 変化率（%）
    pub change_percent: f64,
    /// 深刻度
    pub severity: Severity,
    /// 新スナップショットのタイムスタンプ
    pub timestamp: DateTime<Utc>,
}
