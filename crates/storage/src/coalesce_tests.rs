// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn counting_writer(window: Duration) -> (CoalescedWriter, Arc<AtomicUsize>) {
    let saves = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&saves);
    let writer = CoalescedWriter::spawn("test", window, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (writer, saves)
}

#[tokio::test(start_paused = true)]
async fn requests_inside_a_window_share_one_save() {
    let (writer, saves) = counting_writer(Duration::from_secs(1));

    writer.schedule();
    tokio::time::sleep(Duration::from_millis(300)).await;
    writer.schedule();
    writer.schedule();
    assert_eq!(saves.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(saves.load(Ordering::SeqCst), 1);

    // Nothing dirty, nothing saved
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(saves.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn a_new_request_after_a_save_opens_a_new_window() {
    let (writer, saves) = counting_writer(Duration::from_secs(1));

    writer.schedule();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    writer.schedule();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(saves.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn flush_saves_immediately_and_closes_the_window() {
    let (writer, saves) = counting_writer(Duration::from_secs(1));

    writer.schedule();
    writer.flush().await.unwrap();
    assert_eq!(saves.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(saves.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_saves_pending_work() {
    let (writer, saves) = counting_writer(Duration::from_secs(60));

    writer.schedule();
    writer.shutdown().await.unwrap();
    assert_eq!(saves.load(Ordering::SeqCst), 1);

    let err = writer.flush().await.unwrap_err();
    assert!(matches!(err, StoreError::WriterClosed));
}

#[tokio::test(start_paused = true)]
async fn shutdown_without_pending_work_skips_the_save() {
    let (writer, saves) = counting_writer(Duration::from_secs(1));

    writer.shutdown().await.unwrap();
    assert_eq!(saves.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn flush_reports_save_errors() {
    let writer = CoalescedWriter::spawn("failing", Duration::from_secs(1), || {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    });

    let err = writer.flush().await.unwrap_err();
    assert!(err.to_string().contains("disk full"));
}
