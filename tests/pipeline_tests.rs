//! エンジン全体の統合テスト

use chrono::{Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use seopulse::abtest::{ABTestConfig, VariantLabel};
use seopulse::change::Severity;
use seopulse::config::EngineConfig;
use seopulse::error::Error;
use seopulse::storage::Database;
use seopulse::winner::{ContentStore, FsContentStore, WinnerLabel};
use seopulse::OptimizationEngine;

async fn engine_with_store() -> (OptimizationEngine, Arc<FsContentStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::connect("sqlite::memory:", 1).await.unwrap());
    let content_store = Arc::new(FsContentStore::new(dir.path()));
    let engine = OptimizationEngine::new(db, content_store.clone(), &EngineConfig::default());
    (engine, content_store, dir)
}

fn metrics(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[tokio::test]
async fn test_tracking_pipeline_classifies_and_caches_changes() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::connect("sqlite::memory:", 1).await.unwrap());
    let content_store = Arc::new(FsContentStore::new(dir.path()));
    let engine = OptimizationEngine::new(db.clone(), content_store, &EngineConfig::default());

    let url = "https://example.com/a";
    let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();

    let first = engine
        .record_metrics_at(url, None, metrics(&[("seo_score", 85.0)]), t0)
        .await
        .unwrap();
    assert!(first.changes.is_empty());

    let second = engine
        .record_metrics_at(
            url,
            None,
            metrics(&[("seo_score", 68.0)]),
            t0 + Duration::days(1),
        )
        .await
        .unwrap();

    assert_eq!(second.changes.len(), 1);
    let event = &second.changes[0];
    assert!((event.change_percent - (-20.0)).abs() < 1e-9);
    assert_eq!(event.severity, Severity::Critical);

    // 計算済みイベントは changes テーブルにキャッシュされる
    let cached = db.fetch_changes(url).await.unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].severity, Severity::Critical);
    assert_eq!(cached[0].metric_name, "seo_score");
}

#[tokio::test]
async fn test_detect_metric_changes_applies_threshold() {
    let (engine, _store, _dir) = engine_with_store().await;
    let url = "https://example.com/a";
    let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();

    engine
        .record_metrics_at(
            url,
            None,
            metrics(&[("seo_score", 80.0), ("word_count", 1000.0)]),
            t0,
        )
        .await
        .unwrap();
    engine
        .record_metrics_at(
            url,
            None,
            metrics(&[("seo_score", 76.0), ("word_count", 400.0)]),
            t0 + Duration::days(1),
        )
        .await
        .unwrap();

    // seo_score は -5%、word_count は -60%。閾値 20% では後者のみ
    let events = engine.detect_metric_changes(url, 20.0).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].metric_name, "word_count");
    assert_eq!(events[0].severity, Severity::Critical);
}

#[tokio::test]
async fn test_repeated_analysis_does_not_duplicate_change_cache() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::connect("sqlite::memory:", 1).await.unwrap());
    let content_store = Arc::new(FsContentStore::new(dir.path()));
    let engine = OptimizationEngine::new(db.clone(), content_store, &EngineConfig::default());

    let url = "https://example.com/a";
    let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
    engine
        .record_metrics_at(url, None, metrics(&[("seo_score", 80.0)]), t0)
        .await
        .unwrap();
    engine
        .record_metrics_at(
            url,
            None,
            metrics(&[("seo_score", 60.0)]),
            t0 + Duration::days(1),
        )
        .await
        .unwrap();

    // 同じスナップショット対を何度分析してもキャッシュは1行のまま
    engine.detect_metric_changes(url, 5.0).await.unwrap();
    engine.detect_metric_changes(url, 5.0).await.unwrap();

    let cached = db.fetch_changes(url).await.unwrap();
    assert_eq!(cached.len(), 1);
}

#[tokio::test]
async fn test_zero_baseline_is_skipped_not_fatal() {
    let (engine, _store, _dir) = engine_with_store().await;
    let url = "https://example.com/a";
    let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();

    engine
        .record_metrics_at(url, None, metrics(&[("backlink_count", 0.0)]), t0)
        .await
        .unwrap();
    let report = engine
        .record_metrics_at(
            url,
            None,
            metrics(&[("backlink_count", 50.0)]),
            t0 + Duration::days(1),
        )
        .await
        .unwrap();

    // ゼロベースラインのメトリクスは変化イベントにならない
    assert!(report.changes.is_empty());
}

#[tokio::test]
async fn test_anomaly_scan_flags_outlier_point() {
    let (engine, _store, _dir) = engine_with_store().await;
    let url = "https://example.com/a";
    let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();

    for day in 0..12_i64 {
        let value = if day == 11 { 400.0 } else { 100.0 + (day % 2) as f64 };
        engine
            .record_metrics_at(
                url,
                None,
                metrics(&[("load_time_ms", value)]),
                t0 + Duration::days(day),
            )
            .await
            .unwrap();
    }

    let anomalies = engine.scan_anomalies(url, "load_time_ms").await.unwrap();
    assert_eq!(anomalies, vec![11]);
}

#[tokio::test]
async fn test_ab_test_end_to_end_deploy_and_rollback() {
    let (engine, content_store, _dir) = engine_with_store().await;
    let url = "https://example.com/page";
    let live = "<h1>Old Title</h1>";
    content_store.write(url, live).await.unwrap();

    let test_id = engine
        .create_ab_test(ABTestConfig {
            name: "title rewrite".to_string(),
            url: url.to_string(),
            variant_type: "title".to_string(),
            control_value: live.to_string(),
            variant_value: "<h1>New Title</h1>".to_string(),
            success_metrics: vec!["seo_score".to_string()],
            minimum_sample_size: 100,
            test_duration_days: 14,
        })
        .await
        .unwrap();

    engine.tests().deploy(&test_id).await.unwrap();
    for i in 0..150 {
        let wobble = (i % 3) as f64;
        engine
            .tests()
            .record_observation(&test_id, VariantLabel::Control, "seo_score", 74.0 + wobble)
            .await
            .unwrap();
        engine
            .tests()
            .record_observation(&test_id, VariantLabel::Variant, "seo_score", 81.0 + wobble)
            .await
            .unwrap();
    }

    let analysis = engine.analyze_test_results(&test_id).await.unwrap();
    assert_eq!(analysis.winner, WinnerLabel::Variant);
    assert!(analysis.improvement_percent > 5.0);

    let significance = &analysis.statistical_significance["seo_score"];
    assert!(significance.is_significant);
    assert!(significance.p_value.unwrap() < 0.01);

    let comparison = &analysis.metrics_comparison["seo_score"];
    assert_eq!(comparison.control_count, 150);
    assert!(comparison.variant_mean > comparison.control_mean);

    let decision = engine.deploy_winner(&test_id).await.unwrap();
    assert!(decision.deployed_at.is_some());
    assert_eq!(content_store.read(url).await.unwrap(), "<h1>New Title</h1>");

    // ロールバックでデプロイ前の内容がバイト単位で復元される
    engine.rollback(&test_id).await.unwrap();
    assert_eq!(content_store.read(url).await.unwrap(), live);

    // バックアップを使い切った後の再ロールバックは失敗する
    let err = engine.rollback(&test_id).await.unwrap_err();
    assert!(matches!(err, Error::NoBackup(_)));
}

#[tokio::test]
async fn test_underpowered_test_is_inconclusive_and_not_deployable() {
    let (engine, content_store, _dir) = engine_with_store().await;
    let url = "https://example.com/page";
    content_store.write(url, "<h1>Old</h1>").await.unwrap();

    let test_id = engine
        .create_ab_test(ABTestConfig {
            name: "thin test".to_string(),
            url: url.to_string(),
            variant_type: "title".to_string(),
            control_value: "<h1>Old</h1>".to_string(),
            variant_value: "<h1>New</h1>".to_string(),
            success_metrics: vec!["seo_score".to_string()],
            minimum_sample_size: 100,
            test_duration_days: 14,
        })
        .await
        .unwrap();

    engine.tests().deploy(&test_id).await.unwrap();
    for _ in 0..5 {
        engine
            .tests()
            .record_observation(&test_id, VariantLabel::Control, "seo_score", 10.0)
            .await
            .unwrap();
        engine
            .tests()
            .record_observation(&test_id, VariantLabel::Variant, "seo_score", 90.0)
            .await
            .unwrap();
    }

    // 見かけの効果が大きくても、サンプル不足なら結論を出さない
    let analysis = engine.analyze_test_results(&test_id).await.unwrap();
    assert_eq!(analysis.winner, WinnerLabel::Inconclusive);
    assert!(analysis.statistical_significance["seo_score"].needs_more_data);

    let err = engine.deploy_winner(&test_id).await.unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    assert_eq!(content_store.read(url).await.unwrap(), "<h1>Old</h1>");
}

#[tokio::test]
async fn test_analyze_draft_test_is_rejected() {
    let (engine, _store, _dir) = engine_with_store().await;

    let test_id = engine
        .create_ab_test(ABTestConfig {
            name: "draft only".to_string(),
            url: "https://example.com/x".to_string(),
            variant_type: "title".to_string(),
            control_value: "a".to_string(),
            variant_value: "b".to_string(),
            success_metrics: vec!["seo_score".to_string()],
            minimum_sample_size: 10,
            test_duration_days: 7,
        })
        .await
        .unwrap();

    let err = engine.analyze_test_results(&test_id).await.unwrap_err();
    assert!(matches!(err, Error::StateTransition { .. }));
}
