//! Backup tasks end to end: dump, local file, upload.

mod common;

use std::sync::atomic::Ordering;

use common::{DUMP_CONTENT, DUMP_METADATA, Harness, HarnessConfig, MIB};
use dbflow::api::{
    Backup, BackupFind, BackupStatus, BackupStorageBackend, BackupType, Database, Task,
    TaskRunStatus, TaskStatus, TaskType,
};

fn backup_task(h: &Harness, database: &Database, backend: BackupStorageBackend) -> (Backup, Task) {
    let backup = h
        .runtime
        .create_backup(101, database.id, "nightly", BackupType::Manual, backend, "0007")
        .unwrap();
    let pipeline = h.pipeline("backup");
    let stage = h.stage(&pipeline, "backup");
    let payload = serde_json::json!({ "backupId": backup.id }).to_string();
    let task = h.task(
        &stage,
        Some(database),
        TaskType::Backup,
        TaskStatus::Pending,
        &payload,
    );
    (backup, task)
}

fn reload(h: &Harness, backup: &Backup) -> Backup {
    h.runtime
        .stores()
        .backups
        .find(&BackupFind::by_id(backup.id))
        .unwrap()
}

#[tokio::test]
async fn local_backup_writes_dump() {
    let h = Harness::new();
    let orders = h.database("orders");
    let (backup, task) = backup_task(&h, &orders, BackupStorageBackend::Local);
    assert_eq!(backup.status, BackupStatus::Pending);
    assert_eq!(backup.path, format!("backup/db/{}/nightly.sql", orders.id));

    h.step().await;

    assert_eq!(h.status(&task), TaskStatus::Done);
    let backup = reload(&h, &backup);
    assert_eq!(backup.status, BackupStatus::Done);
    assert_eq!(backup.payload, DUMP_METADATA);
    assert_eq!(backup.comment, "");

    let local = h.runtime.layout().data_dir().join(&backup.path);
    assert_eq!(std::fs::read_to_string(local).unwrap(), DUMP_CONTENT);
    let detail = h.runs(&task)[0].result.clone().unwrap().detail;
    assert_eq!(detail, "Backup database \"orders\"");
}

#[tokio::test]
async fn local_backup_refuses_low_disk() {
    let h = Harness::with_config(HarnessConfig {
        available_disk: 100 * MIB,
        ..Default::default()
    });
    let orders = h.database("orders");
    let (backup, task) = backup_task(&h, &orders, BackupStorageBackend::Local);

    h.step().await;

    assert_eq!(h.status(&task), TaskStatus::Failed);
    let run = &h.runs(&task)[0];
    assert!(
        run.comment
            .contains("the available file system space 100MB is less than the minimal threshold 500MB"),
        "{}",
        run.comment
    );
    assert_eq!(h.driver.dumps.load(Ordering::SeqCst), 0);
    // Nothing was attempted, so the backup is left as it was.
    assert_eq!(reload(&h, &backup).status, BackupStatus::Pending);
    let local = h.runtime.layout().data_dir().join(&backup.path);
    assert!(!local.exists());
}

#[tokio::test]
async fn s3_backup_uploads_and_removes_local_file() {
    // Low disk only guards local backups.
    let h = Harness::with_config(HarnessConfig {
        available_disk: 100 * MIB,
        ..Default::default()
    });
    let orders = h.database("orders");
    let (backup, task) = backup_task(&h, &orders, BackupStorageBackend::S3);

    h.step().await;

    assert_eq!(h.status(&task), TaskStatus::Done);
    assert_eq!(reload(&h, &backup).status, BackupStatus::Done);

    let objects = h.storage.objects.lock().clone();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].0, backup.path);
    assert_eq!(objects[0].1, DUMP_CONTENT.as_bytes());

    let local = h.runtime.layout().data_dir().join(&backup.path);
    assert!(!local.exists());
}

#[tokio::test]
async fn failed_upload_keeps_local_file() {
    let h = Harness::new();
    h.storage.fail.store(true, Ordering::SeqCst);
    let orders = h.database("orders");
    let (backup, task) = backup_task(&h, &orders, BackupStorageBackend::S3);

    h.step().await;

    assert_eq!(h.status(&task), TaskStatus::Failed);
    let backup = reload(&h, &backup);
    assert_eq!(backup.status, BackupStatus::Failed);
    assert!(
        backup
            .comment
            .contains("failed to upload backup to bucket dbflow-backups"),
        "{}",
        backup.comment
    );
    assert!(backup.comment.contains("403 access denied"));

    let local = h.runtime.layout().data_dir().join(&backup.path);
    assert_eq!(std::fs::read_to_string(local).unwrap(), DUMP_CONTENT);
    assert_eq!(h.runs(&task)[0].comment, backup.comment);
}

#[tokio::test]
async fn failed_dump_removes_partial_file() {
    let h = Harness::new();
    h.driver.fail_dump.store(true, Ordering::SeqCst);
    let orders = h.database("orders");
    let (backup, task) = backup_task(&h, &orders, BackupStorageBackend::Local);

    h.step().await;

    assert_eq!(h.status(&task), TaskStatus::Failed);
    let backup = reload(&h, &backup);
    assert_eq!(backup.status, BackupStatus::Failed);
    assert!(backup.comment.contains("connection reset during dump"));
    assert!(backup.comment.contains("failed to dump backup file"));

    let local = h.runtime.layout().data_dir().join(&backup.path);
    assert!(!local.exists());
    assert_eq!(
        h.driver.opened.load(Ordering::SeqCst),
        h.driver.closed.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn timed_out_dump_fails_backup_and_cleans_up() {
    let h = Harness::with_config(HarnessConfig {
        task_timeout_secs: 1,
        ..Default::default()
    });
    h.driver.block_dump.store(true, Ordering::SeqCst);
    let orders = h.database("orders");
    let (backup, task) = backup_task(&h, &orders, BackupStorageBackend::Local);

    h.step().await;

    assert_eq!(h.status(&task), TaskStatus::Failed);
    let run = &h.runs(&task)[0];
    assert_eq!(run.status, TaskRunStatus::Failed);
    assert!(run.comment.contains("did not finish within 1s"), "{}", run.comment);

    let backup = reload(&h, &backup);
    assert_eq!(backup.status, BackupStatus::Failed);
    assert!(backup.comment.contains("failed to dump backup file"), "{}", backup.comment);
    assert!(backup.comment.contains("did not finish within 1s"));

    let local = h.runtime.layout().data_dir().join(&backup.path);
    assert!(!local.exists());
    assert_eq!(h.driver.dumps.load(Ordering::SeqCst), 1);
    assert_eq!(h.driver.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unsupported_backend_fails_before_dump() {
    let h = Harness::new();
    let orders = h.database("orders");
    let (backup, task) = backup_task(&h, &orders, BackupStorageBackend::Gcs);

    h.step().await;

    assert_eq!(h.status(&task), TaskStatus::Failed);
    assert_eq!(h.driver.dumps.load(Ordering::SeqCst), 0);
    let backup = reload(&h, &backup);
    assert_eq!(backup.status, BackupStatus::Failed);
    assert_eq!(backup.comment, "unsupported: backup to GCS not implemented yet");
}

#[tokio::test]
async fn missing_backup_fails_task() {
    let h = Harness::new();
    let orders = h.database("orders");
    let pipeline = h.pipeline("backup");
    let stage = h.stage(&pipeline, "backup");
    let task = h.task(
        &stage,
        Some(&orders),
        TaskType::Backup,
        TaskStatus::Pending,
        r#"{"backupId": 9999}"#,
    );

    h.step().await;

    let run = &h.runs(&task)[0];
    assert_eq!(run.status, TaskRunStatus::Failed);
    assert!(run.comment.starts_with("not found: failed to find backup with ID 9999"));
}

#[tokio::test]
async fn duplicate_backup_name_conflicts() {
    let h = Harness::new();
    let orders = h.database("orders");
    h.runtime
        .create_backup(101, orders.id, "nightly", BackupType::Automatic, BackupStorageBackend::Local, "")
        .unwrap();

    let err = h
        .runtime
        .create_backup(101, orders.id, "nightly", BackupType::Manual, BackupStorageBackend::S3, "")
        .unwrap_err();
    assert_eq!(err.code(), dbflow::ErrorCode::Conflict);
}

#[tokio::test]
async fn backup_name_cannot_escape_backup_dir() {
    let h = Harness::new();
    let orders = h.database("orders");
    for name in ["../../../../tmp/owned", "nested/name", ""] {
        let err = h
            .runtime
            .create_backup(101, orders.id, name, BackupType::Manual, BackupStorageBackend::Local, "")
            .unwrap_err();
        assert_eq!(err.code(), dbflow::ErrorCode::Invalid, "{name:?}");
    }
    let backups = h
        .runtime
        .stores()
        .backups
        .find_list(&BackupFind::default())
        .unwrap();
    assert!(backups.is_empty());
}
