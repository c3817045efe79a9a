//! A/Bテストライフサイクル管理

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use super::types::*;
use crate::error::{Error, Result};
use crate::stats::{SignificanceEngine, SignificanceResult};
use crate::storage::Database;

/// A/Bテスト管理システム
///
/// 状態遷移は単調で、許可されない遷移は `StateTransition` として
/// 同期的に拒否される。ライフサイクルイベントは broadcast チャンネルで
/// 通知される。
pub struct ABTestManager {
    db: Arc<Database>,
    /// テストキャッシュ
    tests: Arc<RwLock<HashMap<String, ABTest>>>,
    /// 有意性評価エンジン
    significance: SignificanceEngine,
    /// イベント通知チャンネル
    event_sender: broadcast::Sender<TestEvent>,
}

impl ABTestManager {
    /// 新しいマネージャーを作成
    pub fn new(db: Arc<Database>, significance: SignificanceEngine) -> Self {
        let (event_sender, _) = broadcast::channel(256);

        Self {
            db,
            tests: Arc::new(RwLock::new(HashMap::new())),
            significance,
            event_sender,
        }
    }

    /// イベントチャンネルを購読
    pub fn subscribe(&self) -> broadcast::Receiver<TestEvent> {
        self.event_sender.subscribe()
    }

    /// テストを作成（draft 状態）
    pub async fn create(&self, config: ABTestConfig) -> Result<String> {
        config.validate()?;

        let test = ABTest {
            id: Uuid::new_v4().to_string(),
            name: config.name,
            url: config.url,
            variant_type: config.variant_type,
            control_value: config.control_value,
            variant_value: config.variant_value,
            status: TestStatus::Draft,
            start_date: None,
            end_date: None,
            success_metrics: config.success_metrics,
            minimum_sample_size: config.minimum_sample_size,
            test_duration_days: config.test_duration_days,
            created_at: Utc::now(),
        };

        self.db.insert_test(&test).await?;

        let test_id = test.id.clone();
        {
            let mut tests = self.tests.write().await;
            tests.insert(test_id.clone(), test);
        }

        self.send_event(TestEvent::Created {
            test_id: test_id.clone(),
        });
        info!("Created A/B test {}", test_id);

        Ok(test_id)
    }

    /// テストを開始（draft → running）
    ///
    /// `start_date` を現在時刻に、`end_date` を期間終了時刻に設定する。
    pub async fn deploy(&self, test_id: &str) -> Result<()> {
        let mut test = self.get(test_id).await?;
        self.ensure_transition(&test, TestStatus::Running)?;

        let now = Utc::now();
        let end_date = now + Duration::days(test.test_duration_days as i64);
        test.status = TestStatus::Running;
        test.start_date = Some(now);
        test.end_date = Some(end_date);

        self.db.update_test(&test).await?;
        self.cache(test).await;

        self.send_event(TestEvent::Started {
            test_id: test_id.to_string(),
            end_date,
        });
        info!("A/B test {} is now running until {}", test_id, end_date);

        Ok(())
    }

    /// 観測値を記録
    ///
    /// running 状態のテストのみ受け付ける。純粋な追記のため
    /// 並行書き込みに対して安全。
    pub async fn record_observation(
        &self,
        test_id: &str,
        variant_label: VariantLabel,
        metric_name: &str,
        value: f64,
    ) -> Result<()> {
        let test = self.get(test_id).await?;
        if test.status != TestStatus::Running {
            return Err(Error::StateTransition {
                from: test.status,
                to: TestStatus::Running,
            });
        }

        let observation = ABTestObservation {
            test_id: test_id.to_string(),
            variant_label,
            metric_name: metric_name.to_string(),
            value,
            timestamp: Utc::now(),
        };
        self.db.insert_observation(&observation).await
    }

    /// 実行中テストの中間統計を取得（読み取り専用、状態を変更しない）
    pub async fn monitor(&self, test_id: &str) -> Result<TestMonitor> {
        let test = self.get(test_id).await?;

        let mut metrics = HashMap::new();
        for metric_name in &test.success_metrics {
            let observations = self.db.fetch_observations(test_id, metric_name).await?;
            metrics.insert(metric_name.clone(), summarize(&observations));
        }

        let elapsed_days = test
            .start_date
            .map(|start| (Utc::now() - start).num_days());

        Ok(TestMonitor {
            test_id: test_id.to_string(),
            status: test.status,
            elapsed_days,
            metrics,
        })
    }

    /// テストを完了し、成功メトリクス毎に有意性を評価
    pub async fn complete(&self, test_id: &str) -> Result<HashMap<String, SignificanceResult>> {
        let mut test = self.get(test_id).await?;
        self.ensure_transition(&test, TestStatus::Completed)?;

        test.status = TestStatus::Completed;
        self.db.update_test(&test).await?;

        let mut results = HashMap::new();
        for metric_name in &test.success_metrics {
            let observations = self.db.fetch_observations(test_id, metric_name).await?;
            let result =
                self.significance
                    .evaluate(&observations, metric_name, test.minimum_sample_size);
            if result.needs_more_data {
                warn!(
                    "A/B test {} metric {} completed without enough data",
                    test_id, metric_name
                );
            }
            results.insert(metric_name.clone(), result);
        }

        self.cache(test).await;
        self.send_event(TestEvent::Completed {
            test_id: test_id.to_string(),
        });
        info!("Completed A/B test {}", test_id);

        Ok(results)
    }

    /// テストを中止（draft | running → cancelled）
    pub async fn cancel(&self, test_id: &str) -> Result<()> {
        let mut test = self.get(test_id).await?;
        self.ensure_transition(&test, TestStatus::Cancelled)?;

        test.status = TestStatus::Cancelled;
        self.db.update_test(&test).await?;
        self.cache(test).await;

        self.send_event(TestEvent::Cancelled {
            test_id: test_id.to_string(),
        });
        info!("Cancelled A/B test {}", test_id);

        Ok(())
    }

    /// テストを取得
    pub async fn get(&self, test_id: &str) -> Result<ABTest> {
        {
            let tests = self.tests.read().await;
            if let Some(test) = tests.get(test_id) {
                return Ok(test.clone());
            }
        }

        let test = self
            .db
            .fetch_test(test_id)
            .await?
            .ok_or_else(|| Error::TestNotFound(test_id.to_string()))?;
        self.cache(test.clone()).await;
        Ok(test)
    }

    /// テストの観測値を取得
    pub async fn observations(
        &self,
        test_id: &str,
        metric_name: &str,
    ) -> Result<Vec<ABTestObservation>> {
        self.db.fetch_observations(test_id, metric_name).await
    }

    fn ensure_transition(&self, test: &ABTest, to: TestStatus) -> Result<()> {
        if !test.status.can_transition_to(to) {
            return Err(Error::StateTransition {
                from: test.status,
                to,
            });
        }
        Ok(())
    }

    async fn cache(&self, test: ABTest) {
        let mut tests = self.tests.write().await;
        tests.insert(test.id.clone(), test);
    }

    fn send_event(&self, event: TestEvent) {
        // 購読者がいない場合の送信失敗は無視してよい
        let _ = self.event_sender.send(event);
    }
}

/// 観測値からバリアント毎の件数と平均を集計
fn summarize(observations: &[ABTestObservation]) -> VariantSummary {
    let mut summary = VariantSummary::default();
    let mut control_sum = 0.0;
    let mut variant_sum = 0.0;

    for obs in observations {
        match obs.variant_label {
            VariantLabel::Control => {
                summary.control_count += 1;
                control_sum += obs.value;
            }
            VariantLabel::Variant => {
                summary.variant_count += 1;
                variant_sum += obs.value;
            }
        }
    }

    if summary.control_count > 0 {
        summary.control_mean = control_sum / summary.control_count as f64;
    }
    if summary.variant_count > 0 {
        summary.variant_mean = variant_sum / summary.variant_count as f64;
    }

    summary
}
