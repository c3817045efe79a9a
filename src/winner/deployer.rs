//! 勝ちバリアントのデプロイとロールバック

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::selector::WinnerLabel;
use crate::abtest::ABTest;
use crate::error::{Error, Result};

/// コンテンツストアの抽象（コラボレータ境界）
///
/// ライブ配信中のコンテンツ本体を読み書きする。
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// URL のライブコンテンツを読み込む
    async fn read(&self, url: &str) -> Result<String>;

    /// URL のライブコンテンツを書き換える
    async fn write(&self, url: &str, content: &str) -> Result<()>;
}

/// ファイルシステムベースのコンテンツストア
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, url: &str) -> PathBuf {
        let name: String = url
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.root.join(format!("{}.html", name))
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn read(&self, url: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.path_for(url)).await?)
    }

    async fn write(&self, url: &str, content: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path_for(url), content).await?;
        Ok(())
    }
}

/// デプロイ前のバックアップ
#[derive(Debug, Clone)]
struct ContentBackup {
    content: String,
    created_at: DateTime<Utc>,
}

/// 勝者デプロイヤ
///
/// 書き換え前に現行コンテンツのバックアップをテスト毎のスタックへ
/// 積み、ロールバックで直近のバックアップを復元する。
pub struct WinnerDeployer {
    content_store: Arc<dyn ContentStore>,
    backups: Arc<RwLock<HashMap<String, Vec<ContentBackup>>>>,
}

impl WinnerDeployer {
    /// 新しいデプロイヤを作成
    pub fn new(content_store: Arc<dyn ContentStore>) -> Self {
        Self {
            content_store,
            backups: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 勝ちバリアントを適用
    ///
    /// 冪等: ライブコンテンツが既に目標と一致している場合は何もしない
    /// （バックアップも積まない）。
    pub async fn deploy(&self, test: &ABTest, winner: WinnerLabel) -> Result<DateTime<Utc>> {
        let target = match winner {
            WinnerLabel::Variant => &test.variant_value,
            WinnerLabel::Control => &test.control_value,
            WinnerLabel::Inconclusive => {
                return Err(Error::validation(
                    "winner",
                    "cannot deploy an inconclusive result",
                ));
            }
        };

        let current = self.content_store.read(&test.url).await?;
        let now = Utc::now();
        if current == *target {
            debug!("Content for {} already matches the winner, skipping", test.url);
            return Ok(now);
        }

        {
            let mut backups = self.backups.write().await;
            backups.entry(test.id.clone()).or_default().push(ContentBackup {
                content: current,
                created_at: now,
            });
        }

        self.content_store.write(&test.url, target).await?;
        info!("Deployed {} winner for test {} to {}", winner, test.id, test.url);

        Ok(now)
    }

    /// 直近のバックアップを復元
    ///
    /// 復元すべきバックアップが残っていない場合は `NoBackup`。
    pub async fn rollback(&self, test: &ABTest) -> Result<()> {
        let backup = {
            let mut backups = self.backups.write().await;
            backups
                .get_mut(&test.id)
                .and_then(|stack| stack.pop())
                .ok_or_else(|| Error::NoBackup(test.id.clone()))?
        };

        self.content_store.write(&test.url, &backup.content).await?;
        info!(
            "Rolled back test {} to backup from {}",
            test.id, backup.created_at
        );

        Ok(())
    }

    /// テストに積まれているバックアップ数
    pub async fn pending_backups(&self, test_id: &str) -> usize {
        let backups = self.backups.read().await;
        backups.get(test_id).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abtest::TestStatus;
    use tempfile::tempdir;

    fn test_definition(url: &str) -> ABTest {
        ABTest {
            id: "test-1".to_string(),
            name: "title test".to_string(),
            url: url.to_string(),
            variant_type: "title".to_string(),
            control_value: "<h1>Old Title</h1>".to_string(),
            variant_value: "<h1>New Title</h1>".to_string(),
            status: TestStatus::Completed,
            start_date: None,
            end_date: None,
            success_metrics: vec!["seo_score".to_string()],
            minimum_sample_size: 100,
            test_duration_days: 14,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_deploy_then_rollback_restores_content() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FsContentStore::new(dir.path()));
        let deployer = WinnerDeployer::new(store.clone());

        let url = "https://example.com/page";
        let test = test_definition(url);
        let original = "<h1>Live Title</h1>";
        store.write(url, original).await.unwrap();

        deployer.deploy(&test, WinnerLabel::Variant).await.unwrap();
        assert_eq!(store.read(url).await.unwrap(), test.variant_value);

        deployer.rollback(&test).await.unwrap();
        assert_eq!(store.read(url).await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_deploy_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FsContentStore::new(dir.path()));
        let deployer = WinnerDeployer::new(store.clone());

        let url = "https://example.com/page";
        let test = test_definition(url);
        store.write(url, "<h1>Live Title</h1>").await.unwrap();

        deployer.deploy(&test, WinnerLabel::Variant).await.unwrap();
        deployer.deploy(&test, WinnerLabel::Variant).await.unwrap();

        // 2回目の適用ではバックアップが増えない
        assert_eq!(deployer.pending_backups(&test.id).await, 1);
    }

    #[tokio::test]
    async fn test_rollback_without_backup_fails() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FsContentStore::new(dir.path()));
        let deployer = WinnerDeployer::new(store.clone());

        let test = test_definition("https://example.com/page");
        let err = deployer.rollback(&test).await.unwrap_err();
        assert!(matches!(err, Error::NoBackup(_)));
    }

    #[tokio::test]
    async fn test_inconclusive_cannot_be_deployed() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FsContentStore::new(dir.path()));
        let deployer = WinnerDeployer::new(store);

        let test = test_definition("https://example.com/page");
        let err = deployer
            .deploy(&test, WinnerLabel::Inconclusive)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
