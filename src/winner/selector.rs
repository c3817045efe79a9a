//! 勝者決定ロジック

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::SignificanceResult;

/// 勝者ラベル
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WinnerLabel {
    Control,
    Variant,
    Inconclusive,
}

impl WinnerLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Variant => "variant",
            Self::Inconclusive => "inconclusive",
        }
    }
}

impl std::fmt::Display for WinnerLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 勝者決定
///
/// `winner != inconclusive` となるのは、有意性評価が
/// `is_significant = true` を返した場合に限る。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinnerDecision {
    pub test_id: String,
    pub winner: WinnerLabel,
    /// コントロール平均に対するバリアント平均の改善率（%）
    pub improvement_percent: f64,
    /// デプロイ成功時に設定される
    pub deployed_at: Option<DateTime<Utc>>,
}

/// 有意性評価の結果から勝者を決定
///
/// 有意でなければ常に inconclusive。有意かつ改善率が正ならバリアント、
/// 負ならコントロールの勝ち。
pub fn select_winner(
    test_id: &str,
    significance: &SignificanceResult,
    control_mean: f64,
    variant_mean: f64,
) -> WinnerDecision {
    let improvement_percent = if control_mean != 0.0 {
        (variant_mean - control_mean) / control_mean * 100.0
    } else {
        0.0
    };

    let winner = if !significance.is_significant {
        WinnerLabel::Inconclusive
    } else if improvement_percent > 0.0 {
        WinnerLabel::Variant
    } else if improvement_percent < 0.0 {
        WinnerLabel::Control
    } else {
        WinnerLabel::Inconclusive
    };

    WinnerDecision {
        test_id: test_id.to_string(),
        winner,
        improvement_percent,
        deployed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn significant() -> SignificanceResult {
        SignificanceResult {
            p_value: Some(0.001),
            confidence_level: Some(0.999),
            effect_size: Some(0.9),
            power: Some(0.99),
            is_significant: true,
            needs_more_data: false,
        }
    }

    fn not_significant() -> SignificanceResult {
        SignificanceResult {
            p_value: Some(0.4),
            confidence_level: Some(0.6),
            effect_size: Some(0.05),
            power: Some(0.1),
            is_significant: false,
            needs_more_data: false,
        }
    }

    #[test]
    fn test_no_winner_without_significance() {
        let decision = select_winner("t1", &not_significant(), 75.0, 95.0);
        assert_eq!(decision.winner, WinnerLabel::Inconclusive);
    }

    #[test]
    fn test_positive_improvement_picks_variant() {
        let decision = select_winner("t1", &significant(), 75.0, 82.0);
        assert_eq!(decision.winner, WinnerLabel::Variant);
        assert!(decision.improvement_percent > 9.0);
    }

    #[test]
    fn test_negative_improvement_picks_control() {
        let decision = select_winner("t1", &significant(), 82.0, 75.0);
        assert_eq!(decision.winner, WinnerLabel::Control);
        assert!(decision.improvement_percent < 0.0);
    }

    #[test]
    fn test_needs_more_data_never_names_a_winner() {
        let insufficient = SignificanceResult {
            p_value: None,
            confidence_level: None,
            effect_size: None,
            power: None,
            is_significant: false,
            needs_more_data: true,
        };
        let decision = select_winner("t1", &insufficient, 10.0, 100.0);
        assert_eq!(decision.winner, WinnerLabel::Inconclusive);
        assert!(decision.deployed_at.is_none());
    }
}
