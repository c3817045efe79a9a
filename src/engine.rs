//! 最適化エンジンのファサード
//!
//! トラッキングパイプライン（記録 → 差分 → 異常検知 → 通知）と
//! A/Bテストの外部向け操作をひとつに束ねる。`Database` と
//! `ContentStore` は呼び出し側が生成して注入する。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::abtest::{ABTestConfig, ABTestManager, TestStatus};
use crate::alert::{build_channels, AlertDispatcher, AlertRule, DeliveryResult, DispatcherConfig};
use crate::anomaly::AnomalyDetector;
use crate::change::{compute_change, ChangeEvent};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::stats::{SignificanceEngine, SignificanceResult};
use crate::storage::Database;
use crate::store::MetricStore;
use crate::winner::{select_winner, ContentStore, WinnerDecision, WinnerDeployer, WinnerLabel};

/// 1回のトラッキング実行の結果
#[derive(Debug, Clone)]
pub struct TrackingReport {
    /// 追記されたスナップショットのID
    pub snapshot_id: String,
    /// 直前スナップショットとの差分
    pub changes: Vec<ChangeEvent>,
    /// アラート配送結果
    pub deliveries: Vec<DeliveryResult>,
    /// メトリクス毎の異常インデックス
    pub anomalies: HashMap<String, Vec<usize>>,
}

/// メトリクス毎のコントロール/バリアント比較
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricComparison {
    pub control_count: usize,
    pub control_mean: f64,
    pub variant_count: usize,
    pub variant_mean: f64,
    pub improvement_percent: f64,
}

/// テスト分析結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestAnalysis {
    pub test_id: String,
    /// 主要メトリクス（最初の成功メトリクス）に基づく勝者
    pub winner: WinnerLabel,
    pub improvement_percent: f64,
    pub metrics_comparison: HashMap<String, MetricComparison>,
    pub statistical_significance: HashMap<String, SignificanceResult>,
}

/// 最適化エンジン
pub struct OptimizationEngine {
    store: MetricStore,
    detector: AnomalyDetector,
    dispatcher: AlertDispatcher,
    rules: Vec<AlertRule>,
    tests: ABTestManager,
    significance: SignificanceEngine,
    deployer: WinnerDeployer,
    db: Arc<Database>,
    /// テストID → 勝者決定
    decisions: Arc<RwLock<HashMap<String, WinnerDecision>>>,
}

impl OptimizationEngine {
    /// エンジンを構築
    pub fn new(
        db: Arc<Database>,
        content_store: Arc<dyn ContentStore>,
        config: &EngineConfig,
    ) -> Self {
        let significance = SignificanceEngine::default();
        let rules = config
            .alerts
            .rules
            .iter()
            .map(|(metric_name, rule)| AlertRule {
                metric_name: metric_name.clone(),
                threshold_percent: rule.threshold_percent,
                severity: rule.severity,
                channels: rule.channels.clone(),
            })
            .collect();

        let dispatcher = AlertDispatcher::new(
            build_channels(&config.alerts),
            DispatcherConfig {
                retry_count: config.alerts.retry_count,
                backoff_base: std::time::Duration::from_millis(config.alerts.backoff_base_ms),
                dedup_cooldown: chrono::Duration::hours(config.alerts.dedup_cooldown_hours as i64),
            },
        );

        Self {
            store: MetricStore::new(db.clone(), config.retention.window_days),
            detector: AnomalyDetector::new(config.anomaly.z_threshold, config.anomaly.min_window),
            dispatcher,
            rules,
            tests: ABTestManager::new(db.clone(), significance.clone()),
            significance,
            deployer: WinnerDeployer::new(content_store),
            db,
            decisions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// メトリクスストアへの参照
    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    /// A/Bテストマネージャーへの参照
    pub fn tests(&self) -> &ABTestManager {
        &self.tests
    }

    // --- トラッキングパイプライン ---

    /// トラッキング実行の結果を記録し、パイプライン全体を駆動する
    ///
    /// スナップショット追記 → 直前との差分計算 → 履歴の異常検知 →
    /// ルール照合とアラート配送、の順で処理する。配送失敗は結果に
    /// 含まれるだけで、この関数をエラーにはしない。
    pub async fn record_metrics(
        &self,
        url: &str,
        keyword: Option<&str>,
        metrics: HashMap<String, f64>,
    ) -> Result<TrackingReport> {
        self.record_metrics_at(url, keyword, metrics, Utc::now())
            .await
    }

    /// 指定時刻でトラッキング結果を記録
    pub async fn record_metrics_at(
        &self,
        url: &str,
        keyword: Option<&str>,
        metrics: HashMap<String, f64>,
        timestamp: DateTime<Utc>,
    ) -> Result<TrackingReport> {
        let metric_names: Vec<String> = metrics.keys().cloned().collect();
        let snapshot_id = self
            .store
            .append_at(url, keyword, metrics, timestamp)
            .await?;

        let changes = self.diff_latest(url, None).await?;
        let mut deliveries = Vec::new();
        for event in &changes {
            self.db.insert_change(event).await?;
            deliveries.extend(self.dispatcher.dispatch(event, &self.rules).await);
        }

        let mut anomalies = HashMap::new();
        for metric_name in metric_names {
            let indices = self.scan_anomalies(url, &metric_name).await?;
            if !indices.is_empty() {
                warn!(
                    "Anomalous history for {} / {}: indices {:?}",
                    url, metric_name, indices
                );
                anomalies.insert(metric_name, indices);
            }
        }

        Ok(TrackingReport {
            snapshot_id,
            changes,
            deliveries,
            anomalies,
        })
    }

    /// 直近2スナップショット間の変化を検出
    ///
    /// `threshold` 以上の変化率（絶対値）のイベントのみ返し、
    /// `changes` テーブルにキャッシュする。
    pub async fn detect_metric_changes(
        &self,
        url: &str,
        threshold: f64,
    ) -> Result<Vec<ChangeEvent>> {
        let events = self.diff_latest(url, Some(threshold)).await?;
        for event in &events {
            self.db.insert_change(event).await?;
        }
        Ok(events)
    }

    /// メトリクス履歴の異常インデックスを取得
    pub async fn scan_anomalies(&self, url: &str, metric_name: &str) -> Result<Vec<usize>> {
        let history = self.store.history(url, metric_name, None).await?;
        let values: Vec<f64> = history.iter().map(|(_, v)| *v).collect();
        Ok(self.detector.detect(&values))
    }

    /// 直近2スナップショットを比較してイベントを生成
    async fn diff_latest(&self, url: &str, threshold: Option<f64>) -> Result<Vec<ChangeEvent>> {
        let snapshots = self.store.recent_snapshots(url, 2).await?;
        if snapshots.len() < 2 {
            return Ok(Vec::new());
        }
        let (old, new) = (&snapshots[0], &snapshots[1]);

        let mut events = Vec::new();
        let mut names: Vec<&String> = new.metrics.keys().collect();
        names.sort();
        for metric_name in names {
            match compute_change(old, new, metric_name) {
                Ok(event) => {
                    if threshold.map_or(true, |t| event.change_percent.abs() >= t) {
                        events.push(event);
                    }
                }
                Err(Error::InsufficientBaseline { .. }) => {
                    // ベースラインの無いメトリクスは差分を定義できない
                    debug!("Skipping {} for {}: no usable baseline", metric_name, url);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(events)
    }

    // --- A/Bテスト操作 ---

    /// A/Bテストを作成
    pub async fn create_ab_test(&self, config: ABTestConfig) -> Result<String> {
        self.tests.create(config).await
    }

    /// テスト結果を分析し、勝者決定を記録する
    ///
    /// running のテストは完了させてから評価する。draft / cancelled の
    /// テストには評価できる結果が存在しない。
    pub async fn analyze_test_results(&self, test_id: &str) -> Result<TestAnalysis> {
        let test = self.tests.get(test_id).await?;

        let statistical_significance = match test.status {
            TestStatus::Running => self.tests.complete(test_id).await?,
            TestStatus::Completed => {
                let mut results = HashMap::new();
                for metric_name in &test.success_metrics {
                    let observations = self.tests.observations(test_id, metric_name).await?;
                    results.insert(
                        metric_name.clone(),
                        self.significance.evaluate(
                            &observations,
                            metric_name,
                            test.minimum_sample_size,
                        ),
                    );
                }
                results
            }
            status => {
                return Err(Error::StateTransition {
                    from: status,
                    to: TestStatus::Completed,
                });
            }
        };

        let monitor = self.tests.monitor(test_id).await?;
        let mut metrics_comparison = HashMap::new();
        for (metric_name, summary) in &monitor.metrics {
            let improvement_percent = if summary.control_mean != 0.0 {
                (summary.variant_mean - summary.control_mean) / summary.control_mean * 100.0
            } else {
                0.0
            };
            metrics_comparison.insert(
                metric_name.clone(),
                MetricComparison {
                    control_count: summary.control_count,
                    control_mean: summary.control_mean,
                    variant_count: summary.variant_count,
                    variant_mean: summary.variant_mean,
                    improvement_percent,
                },
            );
        }

        // 勝者は最初の成功メトリクスで決める
        let primary = test.success_metrics.first().ok_or_else(|| {
            Error::validation("success_metrics", "must not be empty")
        })?;
        let primary_significance = &statistical_significance[primary];
        let primary_summary = &monitor.metrics[primary];
        let decision = select_winner(
            test_id,
            primary_significance,
            primary_summary.control_mean,
            primary_summary.variant_mean,
        );

        let analysis = TestAnalysis {
            test_id: test_id.to_string(),
            winner: decision.winner,
            improvement_percent: decision.improvement_percent,
            metrics_comparison,
            statistical_significance,
        };

        {
            let mut decisions = self.decisions.write().await;
            decisions.insert(test_id.to_string(), decision);
        }

        Ok(analysis)
    }

    /// 記録済みの勝者決定を取得
    pub async fn winner_decision(&self, test_id: &str) -> Option<WinnerDecision> {
        let decisions = self.decisions.read().await;
        decisions.get(test_id).cloned()
    }

    /// 勝ちバリアントをデプロイ
    ///
    /// `analyze_test_results` が記録した決定を適用する。適用前に現行
    /// コンテンツのバックアップを取る。成功時は `deployed_at` を設定する。
    pub async fn deploy_winner(&self, test_id: &str) -> Result<WinnerDecision> {
        let decision = self.winner_decision(test_id).await.ok_or_else(|| {
            Error::validation("test_id", "no winner decision recorded; analyze results first")
        })?;

        let test = self.tests.get(test_id).await?;
        let deployed_at = self.deployer.deploy(&test, decision.winner).await?;

        let mut decisions = self.decisions.write().await;
        let decision = decisions
            .entry(test_id.to_string())
            .and_modify(|d| d.deployed_at = Some(deployed_at))
            .or_insert(decision)
            .clone();

        Ok(decision)
    }

    /// 直近のデプロイをロールバック
    pub async fn rollback(&self, test_id: &str) -> Result<()> {
        let test = self.tests.get(test_id).await?;
        self.deployer.rollback(&test).await
    }
}
