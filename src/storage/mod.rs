//! 永続化レイヤ
//!
//! SQLite ベースのストレージ。接続プールのライフサイクルは呼び出し側が
//! 所有する（プロセス開始時に開き、終了時に閉じる）。

mod database;

pub use database::Database;
