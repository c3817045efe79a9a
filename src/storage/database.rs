//! SQLite ストレージ実装

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

use crate::abtest::{ABTest, ABTestObservation, TestStatus, VariantLabel};
use crate::change::{ChangeEvent, Severity};
use crate::error::{Error, Result};
use crate::store::MetricSnapshot;

/// スキーマ定義
///
/// `competitive_snapshots` と `serp_snapshots` は外部コラボレータが
/// 書き込むテーブル。スキーマの一部としてここで作成する。
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    id        TEXT PRIMARY KEY,
    url       TEXT NOT NULL,
    keyword   TEXT,
    timestamp TEXT NOT NULL,
    metrics   TEXT NOT NULL,
    UNIQUE (url, timestamp)
);
CREATE INDEX IF NOT EXISTS idx_metrics_url_timestamp ON metrics (url, timestamp);

CREATE TABLE IF NOT EXISTS metrics_archive (
    id          TEXT PRIMARY KEY,
    url         TEXT NOT NULL,
    keyword     TEXT,
    timestamp   TEXT NOT NULL,
    metrics     TEXT NOT NULL,
    archived_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS changes (
    id             TEXT PRIMARY KEY,
    url            TEXT NOT NULL,
    metric_name    TEXT NOT NULL,
    old_value      REAL NOT NULL,
    new_value      REAL NOT NULL,
    change_percent REAL NOT NULL,
    severity       TEXT NOT NULL,
    timestamp      TEXT NOT NULL,
    UNIQUE (url, metric_name, timestamp)
);

CREATE TABLE IF NOT EXISTS ab_tests (
    id                  TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    url                 TEXT NOT NULL,
    variant_type        TEXT NOT NULL,
    control_value       TEXT NOT NULL,
    variant_value       TEXT NOT NULL,
    status              TEXT NOT NULL,
    start_date          TEXT,
    end_date            TEXT,
    success_metrics     TEXT NOT NULL,
    minimum_sample_size INTEGER NOT NULL,
    test_duration_days  INTEGER NOT NULL,
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ab_observations (
    id            TEXT PRIMARY KEY,
    test_id       TEXT NOT NULL,
    variant_label TEXT NOT NULL,
    metric_name   TEXT NOT NULL,
    value         REAL NOT NULL,
    timestamp     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ab_observations_test_metric
    ON ab_observations (test_id, metric_name);

CREATE TABLE IF NOT EXISTS competitive_snapshots (
    id             TEXT PRIMARY KEY,
    url            TEXT NOT NULL,
    competitor_url TEXT NOT NULL,
    timestamp      TEXT NOT NULL,
    metrics        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS serp_snapshots (
    id        TEXT PRIMARY KEY,
    keyword   TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    results   TEXT NOT NULL
);
"#;

/// SQLite データベースハンドル
///
/// 接続プールを所有する明示的なストアオブジェクト。シングルトンではなく、
/// 呼び出し側が生成して各サブシステムに渡す。
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// データベースに接続してスキーマを初期化
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // インメモリDBは接続毎に独立するため、プールを1接続に制限する
        let max_connections = if url.contains(":memory:") {
            1
        } else {
            max_connections
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;

        info!("Database connected: {}", url);
        Ok(db)
    }

    /// スキーマを初期化
    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// 接続プールを閉じる
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // --- スナップショット操作 ---

    /// スナップショットを挿入
    pub async fn insert_snapshot(&self, snapshot: &MetricSnapshot) -> Result<()> {
        let metrics_json = serde_json::to_string(&snapshot.metrics)?;

        sqlx::query(
            "INSERT INTO metrics (id, url, keyword, timestamp, metrics) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.url)
        .bind(&snapshot.keyword)
        .bind(snapshot.timestamp)
        .bind(metrics_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 指定 url + タイムスタンプのスナップショットが存在するか
    pub async fn snapshot_exists(&self, url: &str, timestamp: DateTime<Utc>) -> Result<bool> {
        let row = sqlx::query("SELECT id FROM metrics WHERE url = ? AND timestamp = ?")
            .bind(url)
            .bind(timestamp)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    /// 単一メトリクスの履歴を時刻昇順で取得
    pub async fn fetch_history(
        &self,
        url: &str,
        metric_name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<(DateTime<Utc>, f64)>> {
        let rows = match since {
            Some(since) => {
                sqlx::query(
                    "SELECT timestamp, metrics FROM metrics \
                     WHERE url = ? AND timestamp >= ? ORDER BY timestamp ASC",
                )
                .bind(url)
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT timestamp, metrics FROM metrics WHERE url = ? ORDER BY timestamp ASC",
                )
                .bind(url)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            let timestamp: DateTime<Utc> = row.try_get("timestamp")?;
            let metrics_json: String = row.try_get("metrics")?;
            let metrics: HashMap<String, f64> = serde_json::from_str(&metrics_json)?;
            if let Some(value) = metrics.get(metric_name) {
                points.push((timestamp, *value));
            }
        }

        Ok(points)
    }

    /// 直近のスナップショットを時刻昇順で取得
    pub async fn fetch_recent_snapshots(
        &self,
        url: &str,
        limit: u32,
    ) -> Result<Vec<MetricSnapshot>> {
        let rows = sqlx::query(
            "SELECT id, url, keyword, timestamp, metrics FROM metrics \
             WHERE url = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(url)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            snapshots.push(Self::row_to_snapshot(&row)?);
        }
        snapshots.reverse();

        Ok(snapshots)
    }

    /// ウィンドウ外の古いスナップショットをアーカイブに移動
    ///
    /// 削除ではなく `metrics_archive` への移動。移動した件数を返す。
    pub async fn archive_older_than(
        &self,
        url: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO metrics_archive (id, url, keyword, timestamp, metrics, archived_at) \
             SELECT id, url, keyword, timestamp, metrics, ? FROM metrics \
             WHERE url = ? AND timestamp < ?",
        )
        .bind(Utc::now())
        .bind(url)
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM metrics WHERE url = ? AND timestamp < ?")
            .bind(url)
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        if deleted > 0 {
            debug!("Archived {} snapshots for {}", deleted, url);
        }
        Ok(deleted)
    }

    /// アーカイブ済みスナップショットを時刻昇順で取得
    pub async fn fetch_archived(&self, url: &str) -> Result<Vec<MetricSnapshot>> {
        let rows = sqlx::query(
            "SELECT id, url, keyword, timestamp, metrics FROM metrics_archive \
             WHERE url = ? ORDER BY timestamp ASC",
        )
        .bind(url)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            snapshots.push(Self::row_to_snapshot(&row)?);
        }

        Ok(snapshots)
    }

    fn row_to_snapshot(row: &sqlx::sqlite::SqliteRow) -> Result<MetricSnapshot> {
        let metrics_json: String = row.try_get("metrics")?;
        Ok(MetricSnapshot {
            id: row.try_get("id")?,
            url: row.try_get("url")?,
            keyword: row.try_get("keyword")?,
            timestamp: row.try_get("timestamp")?,
            metrics: serde_json::from_str(&metrics_json)?,
        })
    }

    // --- 変化イベント操作 ---

    /// 計算済みの変化イベントをキャッシュ
    ///
    /// 同一 url + メトリクス + タイムスタンプの再計算結果は同じ値になる
    /// ため、既存行はそのまま残す（再分析でキャッシュが重複しない）。
    pub async fn insert_change(&self, event: &ChangeEvent) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO changes \
             (id, url, metric_name, old_value, new_value, change_percent, severity, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&event.url)
        .bind(&event.metric_name)
        .bind(event.old_value)
        .bind(event.new_value)
        .bind(event.change_percent)
        .bind(event.severity.as_str())
        .bind(event.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// キャッシュ済み変化イベントを時刻昇順で取得
    pub async fn fetch_changes(&self, url: &str) -> Result<Vec<ChangeEvent>> {
        let rows = sqlx::query(
            "SELECT url, metric_name, old_value, new_value, change_percent, severity, timestamp \
             FROM changes WHERE url = ? ORDER BY timestamp ASC",
        )
        .bind(url)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let severity_str: String = row.try_get("severity")?;
            let severity = Severity::parse(&severity_str)
                .ok_or_else(|| Error::Storage(format!("invalid severity: {}", severity_str)))?;
            events.push(ChangeEvent {
                url: row.try_get("url")?,
                metric_name: row.try_get("metric_name")?,
                old_value: row.try_get("old_value")?,
                new_value: row.try_get("new_value")?,
                change_percent: row.try_get("change_percent")?,
                severity,
                timestamp: row.try_get("timestamp")?,
            });
        }

        Ok(events)
    }

    // --- A/Bテスト操作 ---

    /// テストを挿入
    pub async fn insert_test(&self, test: &ABTest) -> Result<()> {
        let success_metrics = serde_json::to_string(&test.success_metrics)?;

        sqlx::query(
            "INSERT INTO ab_tests \
             (id, name, url, variant_type, control_value, variant_value, status, \
              start_date, end_date, success_metrics, minimum_sample_size, \
              test_duration_days, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&test.id)
        .bind(&test.name)
        .bind(&test.url)
        .bind(&test.variant_type)
        .bind(&test.control_value)
        .bind(&test.variant_value)
        .bind(test.status.as_str())
        .bind(test.start_date)
        .bind(test.end_date)
        .bind(success_metrics)
        .bind(test.minimum_sample_size as i64)
        .bind(test.test_duration_days as i64)
        .bind(test.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// テストの状態と日付を更新
    pub async fn update_test(&self, test: &ABTest) -> Result<()> {
        sqlx::query(
            "UPDATE ab_tests SET status = ?, start_date = ?, end_date = ? WHERE id = ?",
        )
        .bind(test.status.as_str())
        .bind(test.start_date)
        .bind(test.end_date)
        .bind(&test.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// テストを取得
    pub async fn fetch_test(&self, test_id: &str) -> Result<Option<ABTest>> {
        let row = sqlx::query(
            "SELECT id, name, url, variant_type, control_value, variant_value, status, \
             start_date, end_date, success_metrics, minimum_sample_size, \
             test_duration_days, created_at FROM ab_tests WHERE id = ?",
        )
        .bind(test_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status_str: String = row.try_get("status")?;
        let status = TestStatus::parse(&status_str)
            .ok_or_else(|| Error::Storage(format!("invalid test status: {}", status_str)))?;
        let success_metrics_json: String = row.try_get("success_metrics")?;

        Ok(Some(ABTest {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            variant_type: row.try_get("variant_type")?,
            control_value: row.try_get("control_value")?,
            variant_value: row.try_get("variant_value")?,
            status,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            success_metrics: serde_json::from_str(&success_metrics_json)?,
            minimum_sample_size: row.try_get::<i64, _>("minimum_sample_size")? as u32,
            test_duration_days: row.try_get::<i64, _>("test_duration_days")? as u32,
            created_at: row.try_get("created_at")?,
        }))
    }

    /// 観測値を追記
    ///
    /// 読み取り・変更を伴わない純粋な追記。並行書き込みに対して安全。
    pub async fn insert_observation(&self, observation: &ABTestObservation) -> Result<()> {
        sqlx::query(
            "INSERT INTO ab_observations (id, test_id, variant_label, metric_name, value, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&observation.test_id)
        .bind(observation.variant_label.as_str())
        .bind(&observation.metric_name)
        .bind(observation.value)
        .bind(observation.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// テストの観測値を取得
    pub async fn fetch_observations(
        &self,
        test_id: &str,
        metric_name: &str,
    ) -> Result<Vec<ABTestObservation>> {
        let rows = sqlx::query(
            "SELECT test_id, variant_label, metric_name, value, timestamp \
             FROM ab_observations WHERE test_id = ? AND metric_name = ? \
             ORDER BY timestamp ASC",
        )
        .bind(test_id)
        .bind(metric_name)
        .fetch_all(&self.pool)
        .await?;

        let mut observations = Vec::with_capacity(rows.len());
        for row in rows {
            let label_str: String = row.try_get("variant_label")?;
            let variant_label = VariantLabel::parse(&label_str)
                .ok_or_else(|| Error::Storage(format!("invalid variant label: {}", label_str)))?;
            observations.push(ABTestObservation {
                test_id: row.try_get("test_id")?,
                variant_label,
                metric_name: row.try_get("metric_name")?,
                value: row.try_get("value")?,
                timestamp: row.try_get("timestamp")?,
            });
        }

        Ok(observations)
    }
}
