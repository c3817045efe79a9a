//! Z-score ベースの外れ値検知

/// 異常検知器
///
/// 時系列の各点について、直前ウィンドウ（当該点を除く）の平均と
/// 標本標準偏差から Z-score を計算し、閾値を超えた点を異常と判定する。
/// 副作用なし。同じ系列に対して常に同じ結果を返す。
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    /// Z-score の閾値
    z_threshold: f64,
    /// 判定に必要な直前データ点の最小数
    min_window: usize,
}

impl AnomalyDetector {
    /// 新しい検知器を作成
    pub fn new(z_threshold: f64, min_window: usize) -> Self {
        Self {
            z_threshold,
            min_window,
        }
    }

    /// 異常な点のインデックスを昇順で返す
    ///
    /// 標準偏差が 0 のウィンドウでは、値が平均と異なる場合のみ異常と
    /// 判定する（一定値ベースラインには定義可能な分散が存在しないため）。
    pub fn detect(&self, series: &[f64]) -> Vec<usize> {
        let mut anomalies = Vec::new();

        // 標本分散の分母は window.len() - 1。1点のウィンドウでは
        // 分散が定義できないため、最低2点のベースラインを要求する
        let start = self.min_window.max(2);
        for i in start..series.len() {
            let window = &series[..i];
            let mean = window.iter().sum::<f64>() / window.len() as f64;
            let variance = window
                .iter()
                .map(|v| (v - mean).powi(2))
                .sum::<f64>()
                / (window.len() - 1) as f64;
            let std_dev = variance.sqrt();

            let value = series[i];
            if std_dev == 0.0 {
                if value != mean {
                    anomalies.push(i);
                }
                continue;
            }

            let zscore = (value - mean) / std_dev;
            if zscore.abs() > self.z_threshold {
                anomalies.push(i);
            }
        }

        anomalies
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(2.5, 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_series_has_no_anomalies() {
        let detector = AnomalyDetector::default();
        let series = vec![42.0; 50];

        assert!(detector.detect(&series).is_empty());
    }

    #[test]
    fn test_constant_series_with_deviation_is_flagged() {
        let detector = AnomalyDetector::default();
        let mut series = vec![42.0; 20];
        series.push(42.5);

        assert_eq!(detector.detect(&series), vec![20]);
    }

    #[test]
    fn test_injected_outlier_is_the_only_flag() {
        let detector = AnomalyDetector::default();

        // 狭い分布の合成系列に、平均から10標準偏差離れた1点を注入する
        let base = [
            50.2, 49.8, 50.1, 49.9, 50.0, 50.3, 49.7, 50.1, 49.9, 50.2, 50.0, 49.8, 50.1, 50.2,
            49.9, 50.0, 50.1, 49.8, 50.3, 49.9, 50.0, 50.2, 49.7, 50.1, 50.0,
        ];
        let mut series: Vec<f64> = Vec::new();
        for _ in 0..2 {
            series.extend_from_slice(&base);
        }
        let mean = series.iter().sum::<f64>() / series.len() as f64;
        let variance = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / (series.len() - 1) as f64;
        let outlier = mean + 10.0 * variance.sqrt();
        let outlier_index = series.len();
        series.push(outlier);

        assert_eq!(detector.detect(&series), vec![outlier_index]);
    }

    #[test]
    fn test_short_series_is_never_flagged() {
        let detector = AnomalyDetector::new(2.5, 5);
        let series = vec![1.0, 2.0, 100.0];

        assert!(detector.detect(&series).is_empty());
    }

    #[test]
    fn test_single_point_window_cannot_produce_nan() {
        // min_window = 1 では標本分散の分母が 0 になるため、
        // 2点目からしか判定しない
        let detector = AnomalyDetector::new(2.5, 1);

        assert!(detector.detect(&[10.0, 500.0]).is_empty());
        assert_eq!(detector.detect(&[10.0, 10.0, 500.0]), vec![2]);
    }

    #[test]
    fn test_detection_is_restartable() {
        let detector = AnomalyDetector::default();
        let series: Vec<f64> = (0..30).map(|i| if i == 25 { 500.0 } else { 10.0 }).collect();

        let first = detector.detect(&series);
        let second = detector.detect(&series);
        assert_eq!(first, second);
    }
}
