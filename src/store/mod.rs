//! メトリクスストア
//!
//! URL 毎のメトリクススナップショットを追記専用で記録する時系列ストア。

mod manager;
mod types;

pub use manager::MetricStore;
pub use types::MetricSnapshot;
