//! A/Bテスト管理システム
//!
//! 実験のライフサイクル状態機械と、バリアント毎の観測値の蓄積。

mod manager;
mod types;

pub use manager::ABTestManager;
pub use types::{
    ABTest, ABTestConfig, ABTestObservation, TestEvent, TestMonitor, TestStatus, VariantLabel,
    VariantSummary,
};
