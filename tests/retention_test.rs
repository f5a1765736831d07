// Integration tests for retention enforcement through the engine

mod common;

use chrono::{Duration, Utc};
use common::Fixture;
use platform_backup::metadata::MetadataStore;
use platform_backup::retention::RetentionRule;
use platform_backup::{BackupOptions, EngineConfig, RetentionPolicyConfig};
use pretty_assertions::assert_eq;

/// Create `count` backups and backdate the i-th one by `i + 1` days.
async fn backdated_backups(fixture: &Fixture, count: usize) -> Vec<String> {
    let mut ids = Vec::new();
    for age in 1..=count {
        let metadata = fixture.engine.create_backup(BackupOptions::new()).await.unwrap();
        let mut record = fixture.record(&metadata.id).await;
        record.metadata.timestamp = Utc::now() - Duration::days(age as i64);
        fixture.metadata.upsert(&record).await.unwrap();
        ids.push(metadata.id);
    }
    ids
}

#[tokio::test]
async fn test_max_entries_keeps_newest() {
    let fixture = Fixture::new();
    let ids = backdated_backups(&fixture, 5).await;

    let engine = fixture.engine_with(
        EngineConfig::new().with_retention_policy(RetentionPolicyConfig::new().max_entries(3)),
    );
    let report = engine.enforce_retention_policy().await.unwrap();

    assert_eq!(report.evaluated, 5);
    assert_eq!(report.retained, 3);
    let deleted: Vec<_> = report.deleted.iter().map(|d| (d.backup_id.clone(), d.rule)).collect();
    assert_eq!(
        deleted,
        vec![
            (ids[3].clone(), RetentionRule::Count),
            (ids[4].clone(), RetentionRule::Count),
        ]
    );
    assert_eq!(report.artifacts_removed, 12);
    assert!(report.artifact_failures.is_empty());

    let remaining: Vec<String> = engine
        .list_backups(None)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id().to_string())
        .collect();
    assert_eq!(remaining, ids[..3].to_vec());

    for id in &ids[3..] {
        assert!(fixture.artifacts_of(id).await.is_empty());
    }
    for id in &ids[..3] {
        assert_eq!(fixture.artifacts_of(id).await.len(), 6);
    }
}

#[tokio::test]
async fn test_aged_out_backup_disappears() {
    let fixture = Fixture::new();
    let fresh = fixture.engine.create_backup(BackupOptions::new()).await.unwrap();
    let stale = fixture.engine.create_backup(BackupOptions::new()).await.unwrap();

    let mut record = fixture.record(&stale.id).await;
    record.metadata.timestamp = Utc::now() - Duration::days(40);
    fixture.metadata.upsert(&record).await.unwrap();

    let engine = fixture.engine_with(
        EngineConfig::new().with_retention_policy(RetentionPolicyConfig::new().max_age_days(30)),
    );
    let report = engine.enforce_retention_policy().await.unwrap();

    assert_eq!(report.deleted.len(), 1);
    assert_eq!(report.deleted[0].rule, RetentionRule::Age);

    let listed = engine.list_backups(None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id(), fresh.id);
    assert!(fixture.artifacts_of(&stale.id).await.is_empty());
}

#[tokio::test]
async fn test_retention_runs_after_each_backup() {
    let fixture = Fixture::with_config(
        EngineConfig::new().with_retention_policy(RetentionPolicyConfig::new().max_entries(2)),
    );

    for _ in 0..4 {
        fixture.engine.create_backup(BackupOptions::new()).await.unwrap();
    }

    assert_eq!(fixture.engine.list_backups(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_metadata_only_retention_keeps_artifacts() {
    let fixture = Fixture::new();
    let ids = backdated_backups(&fixture, 2).await;

    let engine = fixture.engine_with(EngineConfig::new().with_retention_policy(
        RetentionPolicyConfig::new().max_entries(1).delete_artifacts(false),
    ));
    let report = engine.enforce_retention_policy().await.unwrap();

    assert_eq!(report.deleted.len(), 1);
    assert_eq!(report.artifacts_removed, 0);
    assert_eq!(fixture.artifacts_of(&ids[1]).await.len(), 6);
    assert!(fixture.metadata.get(&ids[1]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unbounded_policy_deletes_nothing() {
    let fixture = Fixture::new();
    backdated_backups(&fixture, 3).await;

    let report = fixture.engine.enforce_retention_policy().await.unwrap();
    assert!(report.deleted.is_empty());
    assert_eq!(report.retained, 3);
}

#[tokio::test]
async fn test_periodic_task_enforces_policy() {
    let fixture = Fixture::new();
    backdated_backups(&fixture, 3).await;

    let engine = fixture.engine_with(EngineConfig::new().with_retention_policy(
        RetentionPolicyConfig::new()
            .max_entries(1)
            .cleanup_interval(std::time::Duration::from_secs(1)),
    ));
    let handle = engine.spawn_retention_task();

    let mut remaining = usize::MAX;
    for _ in 0..40 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        remaining = engine.list_backups(None).await.unwrap().len();
        if remaining == 1 {
            break;
        }
    }
    handle.abort();

    assert_eq!(remaining, 1);
}
