// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::{Args, STATE_DIR_ENV};
use tempfile::TempDir;

fn config_in(dir: &TempDir) -> DaemonConfig {
    let state = dir.path().to_string_lossy().to_string();
    DaemonConfig::load(&Args::default(), move |key| {
        (key == STATE_DIR_ENV).then(|| state.clone())
    })
    .unwrap()
}

#[tokio::test]
async fn startup_binds_the_socket_and_writes_the_pid() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);

    let mut daemon = startup(&config).await.unwrap();

    assert!(config.socket_path.exists());
    let pid = std::fs::read_to_string(&config.lock_path).unwrap();
    assert_eq!(pid.trim(), std::process::id().to_string());

    daemon.shutdown().await.unwrap();
    assert!(!config.socket_path.exists());
    assert!(!config.lock_path.exists());
}

#[tokio::test]
async fn second_daemon_is_refused_and_leaves_the_lock_alone() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let mut first = startup(&config).await.unwrap();

    let err = match startup(&config).await {
        Ok(_) => panic!("second startup should fail"),
        Err(e) => e,
    };

    assert!(matches!(err, DaemonError::LockFailed(_)));
    assert!(config.lock_path.exists());
    assert!(config.socket_path.exists());
    first.shutdown().await.unwrap();
}

#[tokio::test]
async fn corrupt_definitions_abort_startup_and_clean_up() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    std::fs::write(config.data_dir.join(keeper_storage::INSTANCES_FILE), "{not json").unwrap();

    let err = match startup(&config).await {
        Ok(_) => panic!("startup should fail"),
        Err(e) => e,
    };

    assert!(matches!(err, DaemonError::Store(_)));
    assert!(!config.lock_path.exists());
    assert!(!config.socket_path.exists());
}

#[tokio::test]
async fn stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    std::fs::write(&config.socket_path, "stale").unwrap();

    let mut daemon = startup(&config).await.unwrap();

    let metadata = std::fs::symlink_metadata(&config.socket_path).unwrap();
    assert!(!metadata.is_file());
    daemon.shutdown().await.unwrap();
}
