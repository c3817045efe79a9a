use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// テストの状態
///
/// 遷移は単調: `draft → running → {completed, cancelled}`。
/// `cancelled` へは draft / running のどちらからも遷移できる。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// 下書き
    Draft,
    /// 実行中
    Running,
    /// 完了
    Completed,
    /// 中止
    Cancelled,
}

impl TestStatus {
    /// 状態名を取得
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// 文字列から状態を復元
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// 指定状態への遷移が許可されているか
    pub fn can_transition_to(&self, to: TestStatus) -> bool {
        matches!(
            (self, to),
            (Self::Draft, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Draft, Self::Cancelled)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 観測値の所属バリアント
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VariantLabel {
    Control,
    Variant,
}

impl VariantLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Variant => "variant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "control" => Some(Self::Control),
            "variant" => Some(Self::Variant),
            _ => None,
        }
    }
}

/// テスト作成設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ABTestConfig {
    /// テスト名
    pub name: String,
    /// 対象URL
    pub url: String,
    /// バリアントの種類（title, meta_description など）
    pub variant_type: String,
    /// コントロール版の内容
    pub control_value: String,
    /// バリアント版の内容
    pub variant_value: String,
    /// 評価対象メトリクス
    pub success_metrics: Vec<String>,
    /// バリアント毎に必要な最小観測数
    pub minimum_sample_size: u32,
    /// テスト期間（日数）
    pub test_duration_days: u32,
}

impl ABTestConfig {
    /// 設定を検証。違反した最初のフィールドを報告する
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::validation("url", "must not be empty"));
        }
        if self.variant_type.is_empty() {
            return Err(Error::validation("variant_type", "must not be empty"));
        }
        if self.success_metrics.is_empty() {
            return Err(Error::validation("success_metrics", "must not be empty"));
        }
        if self.minimum_sample_size == 0 {
            return Err(Error::validation(
                "minimum_sample_size",
                "must be greater than zero",
            ));
        }
        if self.test_duration_days == 0 {
            return Err(Error::validation(
                "test_duration_days",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// A/Bテスト
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ABTest {
    /// テストID
    pub id: String,
    /// テスト名
    pub name: String,
    /// 対象URL
    pub url: String,
    /// バリアントの種類
    pub variant_type: String,
    /// コントロール版の内容
    pub control_value: String,
    /// バリアント版の内容
    pub variant_value: String,
    /// 状態
    pub status: TestStatus,
    /// 開始時刻（deploy 時に設定）
    pub start_date: Option<DateTime<Utc>>,
    /// 終了予定時刻（deploy 時に設定）
    pub end_date: Option<DateTime<Utc>>,
    /// 評価対象メトリクス
    pub success_metrics: Vec<String>,
    /// バリアント毎に必要な最小観測数
    pub minimum_sample_size: u32,
    /// テスト期間（日数）
    pub test_duration_days: u32,
    /// 作成時刻
    pub created_at: DateTime<Utc>,
}

/// 観測値
///
/// 追記専用。所有テストが running の間のみ有効。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ABTestObservation {
    pub test_id: String,
    pub variant_label: VariantLabel,
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// バリアント毎の中間集計
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantSummary {
    pub control_count: usize,
    pub control_mean: f64,
    pub variant_count: usize,
    pub variant_mean: f64,
}

/// 実行中テストの中間統計（読み取り専用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestMonitor {
    pub test_id: String,
    pub status: TestStatus,
    /// 開始からの経過日数
    pub elapsed_days: Option<i64>,
    /// メトリクス名 → 中間集計
    pub metrics: HashMap<String, VariantSummary>,
}

/// テストライフサイクルイベント
#[derive(Debug, Clone)]
pub enum TestEvent {
    /// テスト作成
    Created { test_id: String },
    /// テスト開始
    Started {
        test_id: String,
        end_date: DateTime<Utc>,
    },
    /// テスト完了
    Completed { test_id: String },
    /// テスト中止
    Cancelled { test_id: String },
}
