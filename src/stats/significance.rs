//! Welch の t 検定による2標本比較

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use tracing::debug;

use crate::abtest::{ABTestObservation, VariantLabel};

/// 有意性評価の結果
///
/// 同じ観測値集合に対しては常に同じ結果を返す（冪等）。
/// サンプル不足は失敗ではなく `needs_more_data` で表現される
/// 定常状態の1つであり、数値的な p 値は計算しない。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignificanceResult {
    /// 両側 p 値
    pub p_value: Option<f64>,
    /// 信頼水準（1 - p）
    pub confidence_level: Option<f64>,
    /// 効果量（Cohen's d）
    pub effect_size: Option<f64>,
    /// 検出力の推定下限
    pub power: Option<f64>,
    /// p < 0.05 を満たしたか
    pub is_significant: bool,
    /// どちらかのバリアントが最小サンプル数に達していない
    pub needs_more_data: bool,
}

impl SignificanceResult {
    fn insufficient() -> Self {
        Self {
            p_value: None,
            confidence_level: None,
            effect_size: None,
            power: None,
            is_significant: false,
            needs_more_data: true,
        }
    }
}

/// 有意性評価エンジン
#[derive(Debug, Clone)]
pub struct SignificanceEngine {
    /// 有意水準
    alpha: f64,
}

impl SignificanceEngine {
    /// 新しいエンジンを作成
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }

    /// 観測値集合を評価
    ///
    /// 観測値を variant_label で分割し、どちらかが `minimum_sample_size`
    /// 未満なら統計量を計算せずに `needs_more_data` を返す。
    pub fn evaluate(
        &self,
        observations: &[ABTestObservation],
        metric_name: &str,
        minimum_sample_size: u32,
    ) -> SignificanceResult {
        let control: Vec<f64> = observations
            .iter()
            .filter(|o| o.metric_name == metric_name && o.variant_label == VariantLabel::Control)
            .map(|o| o.value)
            .collect();
        let variant: Vec<f64> = observations
            .iter()
            .filter(|o| o.metric_name == metric_name && o.variant_label == VariantLabel::Variant)
            .map(|o| o.value)
            .collect();

        self.evaluate_samples(&control, &variant, minimum_sample_size)
    }

    /// 2つの値集合を直接評価
    pub fn evaluate_samples(
        &self,
        control: &[f64],
        variant: &[f64],
        minimum_sample_size: u32,
    ) -> SignificanceResult {
        let min = minimum_sample_size as usize;
        if control.len() < min || variant.len() < min {
            debug!(
                "Underpowered sample: control={}, variant={}, required={}",
                control.len(),
                variant.len(),
                min
            );
            return SignificanceResult::insufficient();
        }

        let (n_c, mean_c, var_c) = describe(control);
        let (n_v, mean_v, var_v) = describe(variant);

        let p_value = welch_p_value(n_c, mean_c, var_c, n_v, mean_v, var_v);
        let effect_size = cohens_d(n_c, mean_c, var_c, n_v, mean_v, var_v);
        let power = power_estimate(n_c, n_v, effect_size, self.alpha);

        SignificanceResult {
            p_value: Some(p_value),
            confidence_level: Some(1.0 - p_value),
            effect_size: Some(effect_size),
            power: Some(power),
            is_significant: p_value < self.alpha,
            needs_more_data: false,
        }
    }
}

impl Default for SignificanceEngine {
    fn default() -> Self {
        Self::new(0.05)
    }
}

/// 標本数・平均・不偏分散を計算
fn describe(values: &[f64]) -> (f64, f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = if values.len() > 1 {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    (n, mean, variance)
}

/// Welch の t 検定（分散が等しいことを仮定しない）の両側 p 値
fn welch_p_value(n_c: f64, mean_c: f64, var_c: f64, n_v: f64, mean_v: f64, var_v: f64) -> f64 {
    let se_sq = var_c / n_c + var_v / n_v;
    if se_sq == 0.0 {
        // 分散ゼロ同士の比較。平均が一致すれば差なし、しなければ確実な差
        return if mean_c == mean_v { 1.0 } else { 0.0 };
    }

    let t = (mean_v - mean_c) / se_sq.sqrt();

    // Welch–Satterthwaite の自由度
    let df = se_sq.powi(2)
        / ((var_c / n_c).powi(2) / (n_c - 1.0) + (var_v / n_v).powi(2) / (n_v - 1.0));

    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Cohen's d（プールした標準偏差で標準化した平均差）
fn cohens_d(n_c: f64, mean_c: f64, var_c: f64, n_v: f64, mean_v: f64, var_v: f64) -> f64 {
    let pooled_var = ((n_c - 1.0) * var_c + (n_v - 1.0) * var_v) / (n_c + n_v - 2.0);
    let pooled_sd = pooled_var.sqrt();
    if pooled_sd == 0.0 {
        return 0.0;
    }
    (mean_v - mean_c) / pooled_sd
}

/// 検出力の解析的推定（正規近似による下限）
///
/// 観測された効果量とサンプル数から、両側検定で差を検出できる確率を
/// 近似する。小サンプルでは過大評価しないよう片側分のみ数える。
fn power_estimate(n_c: f64, n_v: f64, effect_size: f64, alpha: f64) -> f64 {
    let normal = match Normal::new(0.0, 1.0) {
        Ok(n) => n,
        Err(_) => return 0.0,
    };
    let z_crit = normal.inverse_cdf(1.0 - alpha / 2.0);
    let ncp = effect_size.abs() * (n_c * n_v / (n_c + n_v)).sqrt();
    normal.cdf(ncp - z_crit).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn observations(control: &[f64], variant: &[f64]) -> Vec<ABTestObservation> {
        let mut out = Vec::new();
        for &v in control {
            out.push(ABTestObservation {
                test_id: "t1".to_string(),
                variant_label: VariantLabel::Control,
                metric_name: "seo_score".to_string(),
                value: v,
                timestamp: Utc::now(),
            });
        }
        for &v in variant {
            out.push(ABTestObservation {
                test_id: "t1".to_string(),
                variant_label: VariantLabel::Variant,
                metric_name: "seo_score".to_string(),
                value: v,
                timestamp: Utc::now(),
            });
        }
        out
    }

    /// 平均と標本標準偏差を指定して決定的な標本を合成する
    fn synthetic_sample(n: usize, mean: f64, sd: f64) -> Vec<f64> {
        let half = n / 2;
        let mut values = Vec::with_capacity(n);
        for i in 0..half {
            let offset = sd * (i as f64 + 0.5) / half as f64 * 3.0_f64.sqrt();
            values.push(mean + offset);
            values.push(mean - offset);
        }
        if values.len() < n {
            values.push(mean);
        }

        // 合成標本を目標の標本標準偏差に正規化する
        let m = values.iter().sum::<f64>() / values.len() as f64;
        let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>()
            / (values.len() - 1) as f64;
        let scale = sd / var.sqrt();
        values.iter().map(|v| mean + (v - mean) * scale).collect()
    }

    #[test]
    fn test_underpowered_sample_reports_needs_more_data() {
        let engine = SignificanceEngine::default();
        let obs = observations(&[10.0, 20.0, 30.0], &[100.0, 200.0, 300.0]);

        let result = engine.evaluate(&obs, "seo_score", 100);
        assert!(result.needs_more_data);
        assert!(!result.is_significant);
        assert!(result.p_value.is_none());
    }

    #[test]
    fn test_clear_improvement_is_significant() {
        let engine = SignificanceEngine::default();
        let control = synthetic_sample(500, 75.0, 8.0);
        let variant = synthetic_sample(500, 82.0, 8.0);

        let result = engine.evaluate_samples(&control, &variant, 100);
        assert!(!result.needs_more_data);
        assert!(result.is_significant);
        assert!(result.p_value.unwrap() < 0.01);
        assert!(result.effect_size.unwrap() > 0.0);
        assert!(result.power.unwrap() > 0.9);
    }

    #[test]
    fn test_identical_samples_are_not_significant() {
        let engine = SignificanceEngine::default();
        let sample = synthetic_sample(200, 50.0, 5.0);

        let result = engine.evaluate_samples(&sample, &sample, 100);
        assert!(!result.is_significant);
        assert!(result.p_value.unwrap() > 0.9);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let engine = SignificanceEngine::default();
        let control = synthetic_sample(150, 60.0, 4.0);
        let variant = synthetic_sample(150, 61.0, 4.0);

        let first = engine.evaluate_samples(&control, &variant, 100);
        let second = engine.evaluate_samples(&control, &variant, 100);
        assert_eq!(first.p_value, second.p_value);
        assert_eq!(first.is_significant, second.is_significant);
    }
}
