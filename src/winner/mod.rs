//! 勝者選定とデプロイ
//!
//! 有意性評価の結果から勝者を決定し、勝ちバリアントを安全に適用する。
//! 適用前にはバックアップを取り、ロールバックで復元できる。

mod deployer;
mod selector;

pub use deployer::{ContentStore, FsContentStore, WinnerDeployer};
pub use selector::{select_winner, WinnerDecision, WinnerLabel};
