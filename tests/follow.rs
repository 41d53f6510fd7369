use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use logmux::{FollowMode, MergeConfig, MergedLine, MergedLines};
use tempfile::tempdir;

const TIMEOUT: Duration = Duration::from_secs(5);

fn write_log(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("failed to write fixture");
    path
}

fn append(path: &Path, contents: &str) {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .expect("failed to reopen fixture");
    file.write_all(contents.as_bytes())
        .expect("failed to append to fixture");
}

async fn next_line(lines: &mut MergedLines) -> MergedLine {
    tokio::time::timeout(TIMEOUT, lines.next_line())
        .await
        .expect("timed out waiting for a line")
        .unwrap()
        .expect("merge ended unexpectedly")
}

fn follow_config() -> MergeConfig {
    MergeConfig {
        follow: FollowMode::Follow,
        retry_interval: Duration::from_millis(50),
        ..MergeConfig::default()
    }
}

#[tokio::test]
async fn follows_appended_lines() {
    let dir = tempdir().unwrap();
    let a = write_log(dir.path(), "a.log", "10:00 one\n");

    let mut lines = MergedLines::new(follow_config());
    lines.add_source(a.clone()).await.unwrap();

    assert_eq!(next_line(&mut lines).await.bytes(), b"10:00 one\n");
    append(&a, "10:01 two\n");
    assert_eq!(next_line(&mut lines).await.bytes(), b"10:01 two\n");
    append(&a, "10:02 three\n");
    assert_eq!(next_line(&mut lines).await.bytes(), b"10:02 three\n");
}

#[tokio::test]
async fn interleaves_appends_across_files() {
    let dir = tempdir().unwrap();
    let a = write_log(dir.path(), "a.log", "");
    let b = write_log(dir.path(), "b.log", "");

    let mut lines = MergedLines::new(follow_config());
    lines.add_source(a.clone()).await.unwrap();
    lines.add_source(b.clone()).await.unwrap();

    append(&b, "10:00 from-b\n");
    assert_eq!(next_line(&mut lines).await.bytes(), b"10:00 from-b\n");
    append(&a, "10:01 from-a\n");
    assert_eq!(next_line(&mut lines).await.bytes(), b"10:01 from-a\n");
}

#[tokio::test]
async fn completes_partial_writes() {
    let dir = tempdir().unwrap();
    let a = write_log(dir.path(), "a.log", "10:00 par");

    let mut lines = MergedLines::new(follow_config());
    lines.add_source(a.clone()).await.unwrap();

    append(&a, "tial\n");
    assert_eq!(next_line(&mut lines).await.bytes(), b"10:00 partial\n");
}

#[tokio::test]
async fn survives_truncation() {
    let dir = tempdir().unwrap();
    let a = write_log(dir.path(), "a.log", "10:00 before truncate\n");

    let mut lines = MergedLines::new(follow_config());
    lines.add_source(a.clone()).await.unwrap();
    assert_eq!(next_line(&mut lines).await.bytes(), b"10:00 before truncate\n");

    // Rewritten shorter in place, as logrotate's copytruncate does.
    std::fs::write(&a, "10:01 after\n").unwrap();
    assert_eq!(next_line(&mut lines).await.bytes(), b"10:01 after\n");
}

#[tokio::test]
async fn survives_rename_rotation() {
    let dir = tempdir().unwrap();
    let a = write_log(dir.path(), "a.log", "10:00 old file\n");

    let mut lines = MergedLines::new(follow_config());
    lines.add_source(a.clone()).await.unwrap();
    assert_eq!(next_line(&mut lines).await.bytes(), b"10:00 old file\n");

    std::fs::rename(&a, dir.path().join("a.log.1")).unwrap();
    std::fs::write(&a, "10:01 new file\n").unwrap();
    assert_eq!(next_line(&mut lines).await.bytes(), b"10:01 new file\n");
}

#[tokio::test]
async fn picks_up_a_file_created_later() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("late.log");

    let mut lines = MergedLines::new(follow_config());
    assert!(lines.add_source(missing.clone()).await.is_err());

    // Created only after the merge is already waiting; the periodic
    // reopen attempt has to find it.
    let task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(&missing, "10:00 finally\n").unwrap();
    });

    assert_eq!(next_line(&mut lines).await.bytes(), b"10:00 finally\n");
    task.await.unwrap();
}

#[tokio::test]
async fn from_end_skips_existing_content() {
    let dir = tempdir().unwrap();
    let a = write_log(dir.path(), "a.log", "10:00 history\n10:01 more history\n");

    let mut lines = MergedLines::new(MergeConfig {
        follow: FollowMode::FromEnd,
        ..MergeConfig::default()
    });
    lines.add_source(a.clone()).await.unwrap();

    append(&a, "10:02 fresh\n");
    assert_eq!(next_line(&mut lines).await.bytes(), b"10:02 fresh\n");
}

#[tokio::test]
async fn polling_backend_follows_too() {
    let dir = tempdir().unwrap();
    let a = write_log(dir.path(), "a.log", "10:00 start\n");

    let mut lines = MergedLines::new(MergeConfig {
        follow: FollowMode::Follow,
        poll_interval: Some(Duration::from_millis(50)),
        ..MergeConfig::default()
    });
    lines.add_source(a.clone()).await.unwrap();

    assert_eq!(next_line(&mut lines).await.bytes(), b"10:00 start\n");
    append(&a, "10:01 polled\n");
    assert_eq!(next_line(&mut lines).await.bytes(), b"10:01 polled\n");
}

#[tokio::test]
async fn tail_count_then_follow() {
    let dir = tempdir().unwrap();
    let a = write_log(dir.path(), "a.log", "10:00 a\n10:01 b\n10:02 c\n");

    let mut lines = MergedLines::new(MergeConfig {
        tail_count: Some(1),
        ..follow_config()
    });
    lines.add_source(a.clone()).await.unwrap();

    assert_eq!(next_line(&mut lines).await.bytes(), b"10:02 c\n");
    append(&a, "10:03 d\n");
    assert_eq!(next_line(&mut lines).await.bytes(), b"10:03 d\n");
}
