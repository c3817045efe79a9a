//! 変化分類システム
//!
//! 連続する2つのスナップショット間の差分を計算し、深刻度を割り当てる。

mod classifier;
mod types;

pub use classifier::{classify_severity, compute_change, thresholds_for};
pub use types::{ChangeEvent, Severity, SeverityThresholds};
