//! 追記専用メトリクスストア

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::types::MetricSnapshot;
use crate::error::{Error, Result};
use crate::storage::Database;

/// メトリクスストア
///
/// 書き込みは URL 単位で直列化される（URL 毎のロック）。異なる URL への
/// 書き込みは並行して進む。外部スケジューラから重複起動されても、
/// ロック獲得とタイムスタンプ重複チェックにより順序と一意性が保たれる。
pub struct MetricStore {
    db: Arc<Database>,
    /// 保持ウィンドウ（日数）
    retention_days: u32,
    /// URL 毎の書き込みロック
    url_locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl MetricStore {
    /// 新しいストアを作成
    pub fn new(db: Arc<Database>, retention_days: u32) -> Self {
        Self {
            db,
            retention_days,
            url_locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 現在時刻でスナップショットを追記
    pub async fn append(
        &self,
        url: &str,
        keyword: Option<&str>,
        metrics: HashMap<String, f64>,
    ) -> Result<String> {
        self.append_at(url, keyword, metrics, Utc::now()).await
    }

    /// 指定時刻でスナップショットを追記
    ///
    /// 同一 url + タイムスタンプのスナップショットが既に存在する場合は
    /// `DuplicateTimestamp` を返す。追記後に保持期間を適用し、ウィンドウ外の
    /// スナップショットをアーカイブへ移動する。
    pub async fn append_at(
        &self,
        url: &str,
        keyword: Option<&str>,
        metrics: HashMap<String, f64>,
        timestamp: DateTime<Utc>,
    ) -> Result<String> {
        let lock = self.url_lock(url).await;
        let _guard = lock.lock().await;

        if self.db.snapshot_exists(url, timestamp).await? {
            return Err(Error::DuplicateTimestamp {
                url: url.to_string(),
                timestamp,
            });
        }

        let snapshot = MetricSnapshot {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            keyword: keyword.map(str::to_string),
            timestamp,
            metrics,
        };
        self.db.insert_snapshot(&snapshot).await?;
        debug!("Appended snapshot {} for {}", snapshot.id, url);

        // 保持期間の適用。ウィンドウより古いスナップショットは
        // 削除せずアーカイブへ移動する
        let cutoff = timestamp - Duration::days(self.retention_days as i64);
        self.db.archive_older_than(url, cutoff).await?;

        Ok(snapshot.id)
    }

    /// 単一メトリクスの履歴を時刻昇順で取得
    pub async fn history(
        &self,
        url: &str,
        metric_name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<(DateTime<Utc>, f64)>> {
        self.db.fetch_history(url, metric_name, since).await
    }

    /// 直近のスナップショットを時刻昇順で取得
    pub async fn recent_snapshots(&self, url: &str, limit: u32) -> Result<Vec<MetricSnapshot>> {
        self.db.fetch_recent_snapshots(url, limit).await
    }

    /// アーカイブ済みスナップショットを取得
    pub async fn archived(&self, url: &str) -> Result<Vec<MetricSnapshot>> {
        self.db.fetch_archived(url).await
    }

    /// URL 毎の書き込みロックを取得
    async fn url_lock(&self, url: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.url_locks.read().await;
            if let Some(lock) = locks.get(url) {
                return lock.clone();
            }
        }

        let mut locks = self.url_locks.write().await;
        locks
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
