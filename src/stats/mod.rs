//! 統計的有意性評価
//!
//! コントロールとバリアントの2標本比較（Welch の t 検定）。

mod significance;

pub use significance::{SignificanceEngine, SignificanceResult};
