#![forbid(unsafe_code)]

use adgate_contracts::playback::PlaybackCheckpoint;
use adgate_contracts::viewer::ViewerId;
use adgate_contracts::UnixTimeMs;
use adgate_storage::{CheckpointStore, InMemoryCheckpointStore, JsonFileCheckpointStore};

fn viewer(id: &str) -> ViewerId {
    ViewerId::new(id).unwrap()
}

fn checkpoint(ms: u64, at: u64) -> PlaybackCheckpoint {
    PlaybackCheckpoint::v1(ms, UnixTimeMs(at)).unwrap()
}

#[test]
fn at_checkpoint_db_01_in_memory_save_load_clear() {
    let mut s = InMemoryCheckpointStore::new();
    s.save(&viewer("v1"), checkpoint(300_000, 10)).unwrap();
    assert_eq!(s.load(&viewer("v1")).unwrap(), Some(checkpoint(300_000, 10)));
    assert_eq!(s.load(&viewer("v2")).unwrap(), None);
    s.clear(&viewer("v1")).unwrap();
    assert_eq!(s.load(&viewer("v1")).unwrap(), None);
}

#[test]
fn at_checkpoint_db_02_json_file_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("checkpoints.json");

    let mut s = JsonFileCheckpointStore::open(&path).unwrap();
    s.save(&viewer("v1"), checkpoint(300_000, 1_000)).unwrap();
    s.save(&viewer("v2"), checkpoint(5_000, 2_000)).unwrap();
    s.clear(&viewer("v2")).unwrap();
    drop(s);

    let reopened = JsonFileCheckpointStore::open(&path).unwrap();
    assert_eq!(
        reopened.load(&viewer("v1")).unwrap(),
        Some(checkpoint(300_000, 1_000))
    );
    assert_eq!(reopened.load(&viewer("v2")).unwrap(), None);
}

#[test]
fn at_checkpoint_db_03_corrupt_rows_are_dropped_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoints.json");
    std::fs::write(
        &path,
        r#"{"ok":{"accumulated_ms":10,"last_checkpoint":5},"bad":{"accumulated_ms":999999999999,"last_checkpoint":5}}"#,
    )
    .unwrap();
    let s = JsonFileCheckpointStore::open(&path).unwrap();
    assert!(s.load(&viewer("ok")).unwrap().is_some());
    assert!(s.load(&viewer("bad")).unwrap().is_none());
}

#[test]
fn at_checkpoint_db_04_invalid_json_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoints.json");
    std::fs::write(&path, "not json").unwrap();
    assert!(JsonFileCheckpointStore::open(&path).is_err());
}
