//! 異常検知システム
//!
//! メトリクス履歴に対する Z-score ベースの外れ値検知。

mod detector;

pub use detector::AnomalyDetector;
