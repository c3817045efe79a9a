use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// メトリクススナップショット
///
/// 1回のトラッキング実行で得られた、あるURLのメトリクス値一式。
/// 保存後は不変。削除されるのは保持期間によるアーカイブ移動のみ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// スナップショットID
    pub id: String,
    /// 対象URL
    pub url: String,
    /// 対象キーワード（任意）
    pub keyword: Option<String>,
    /// 記録時刻
    pub timestamp: DateTime<Utc>,
    /// メトリクス名 → 値
    pub metrics: HashMap<String, f64>,
}
