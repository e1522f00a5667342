//! Integration tests for the stage journal

use chrono::{Duration, Utc};
use tempfile::TempDir;

use ccube_engine::db::{Database, StageEvent};
use ccube_engine::platform::HostInfo;
use ccube_sdk::types::Metrics;

#[tokio::test]
async fn test_journal_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("journal").join("ccube.db");
    let host = HostInfo::new("worker-3", "10.0.0.9");
    let start = Utc::now();

    {
        let db = Database::new(&db_path).await.unwrap();
        db.times()
            .record(&host, 5, StageEvent::FilterStart, start)
            .await
            .unwrap();
        db.times()
            .record(&host, 5, StageEvent::FilterFinish, start + Duration::seconds(3))
            .await
            .unwrap();
        db.close().await.unwrap();
    }

    let db = Database::new(&db_path).await.unwrap();
    let entries = db.times().for_seed(5).await.unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].event, StageEvent::FilterStart);
    assert_eq!(entries[1].event, StageEvent::FilterFinish);
    assert_eq!(entries[1].time - entries[0].time, Duration::seconds(3));
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_stages_share_journal() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("ccube.db");

    let first = Database::new(&db_path).await.unwrap();
    let second = Database::new(&db_path).await.unwrap();
    let host_a = HostInfo::new("worker-a", "10.0.0.1");
    let host_b = HostInfo::new("worker-b", "10.0.0.2");

    let first_times = first.times();
    let second_times = second.times();
    let (a, b) = tokio::join!(
        first_times.record(&host_a, 1, StageEvent::LearnerStart, Utc::now()),
        second_times.record(&host_b, 1, StageEvent::LearnerStart, Utc::now()),
    );
    a.unwrap();
    b.unwrap();

    let entries = first.times().for_seed(1).await.unwrap();
    assert_eq!(entries.len(), 2);

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_metrics_are_kept_per_job() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("ccube.db"))
        .await
        .unwrap();
    let host = HostInfo::new("worker-1", "10.0.0.7");
    let metrics = Metrics {
        accuracy: 0.5,
        precision: 0.5,
        recall: 0.5,
        f_measure: 0.5,
        mcc: 0.0,
        true_positives: 1,
        false_positives: 1,
        true_negatives: 1,
        false_negatives: 1,
    };

    for seed in [1, 2] {
        db.metrics()
            .record(&host, "gpfunction", seed, &metrics)
            .await
            .unwrap();
    }
    db.metrics()
        .record(&host, "other", 1, &metrics)
        .await
        .unwrap();

    let records = db.metrics().for_job("gpfunction").await.unwrap();
    let seeds: Vec<u64> = records.iter().map(|r| r.random_seed).collect();
    assert_eq!(seeds, vec![1, 2]);
    assert!(records.iter().all(|r| r.metrics == metrics));
}
