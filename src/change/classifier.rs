//! 深刻度分類ロジック

use super::types::{ChangeEvent, Severity, SeverityThresholds};
use crate::error::{Error, Result};
use crate::store::MetricSnapshot;

/// 未知のメトリクスに適用する汎用閾値
const DEFAULT_THRESHOLDS: SeverityThresholds = SeverityThresholds {
    critical: 25.0,
    significant: 15.0,
    moderate: 5.0,
};

/// メトリクス毎の深刻度閾値を取得
pub fn thresholds_for(metric_name: &str) -> SeverityThresholds {
    match metric_name {
        "seo_score" => SeverityThresholds {
            critical: 20.0,
            significant: 10.0,
            moderate: 5.0,
        },
        "competitive_score" => SeverityThresholds {
            critical: 15.0,
            significant: 10.0,
            moderate: 5.0,
        },
        "word_count" => SeverityThresholds {
            critical: 30.0,
            significant: 15.0,
            moderate: 10.0,
        },
        "load_time_ms" => SeverityThresholds {
            critical: 50.0,
            significant: 25.0,
            moderate: 10.0,
        },
        _ => DEFAULT_THRESHOLDS,
    }
}

/// 変化率から深刻度を分類
///
/// `|change_percent|` を閾値と降順に比較し、最初に満たした段階を返す。
/// どの閾値にも届かない場合は `Minor`。純粋関数。
pub fn classify_severity(metric_name: &str, change_percent: f64) -> Severity {
    let thresholds = thresholds_for(metric_name);
    let magnitude = change_percent.abs();

    if magnitude >= thresholds.critical {
        Severity::Critical
    } else if magnitude >= thresholds.significant {
        Severity::Significant
    } else if magnitude >= thresholds.moderate {
        Severity::Moderate
    } else {
        Severity::Minor
    }
}

/// 隣接する2スナップショット間の変化イベントを計算
///
/// 旧値が 0 の場合、相対変化は定義できないため
/// `InsufficientBaseline` を返す。
pub fn compute_change(
    old_snapshot: &MetricSnapshot,
    new_snapshot: &MetricSnapshot,
    metric_name: &str,
) -> Result<ChangeEvent> {
    let old_value = old_snapshot.metrics.get(metric_name).copied().ok_or_else(|| {
        Error::InsufficientBaseline {
            metric_name: metric_name.to_string(),
        }
    })?;
    let new_value = new_snapshot.metrics.get(metric_name).copied().ok_or_else(|| {
        Error::InsufficientBaseline {
            metric_name: metric_name.to_string(),
        }
    })?;

    if old_value == 0.0 {
        return Err(Error::InsufficientBaseline {
            metric_name: metric_name.to_string(),
        });
    }

    let change_percent = (new_value - old_value) / old_value * 100.0;

    Ok(ChangeEvent {
        url: new_snapshot.url.clone(),
        metric_name: metric_name.to_string(),
        old_value,
        new_value,
        change_percent,
        severity: classify_severity(metric_name, change_percent),
        timestamp: new_snapshot.timestamp,
    })
}
