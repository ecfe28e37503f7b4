use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::thread;

use gwbatch::store::{FileJobStore, JobRecord, JobStore, StoreError};

fn record(job_id: u64) -> JobRecord {
    JobRecord {
        job_id,
        submit_id: Some(9000 + job_id),
        working_directory: PathBuf::from(format!("/scratch/gwbatch/dev/{job_id}")),
        submit_directory: PathBuf::from("submit"),
    }
}

#[test]
fn test_ids_increase_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job_store.json");

    let first = {
        let store = FileJobStore::open(&path).unwrap();
        vec![store.next_id().unwrap(), store.next_id().unwrap()]
    };
    assert_eq!(first, vec![1, 2]);

    let store = FileJobStore::open(&path).unwrap();
    assert_eq!(store.next_id().unwrap(), 3);
}

#[test]
fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job_store.json");

    {
        let store = FileJobStore::open(&path).unwrap();
        store.put(&record(1)).unwrap();
        store.put(&record(2)).unwrap();
    }

    let store = FileJobStore::open(&path).unwrap();
    assert_eq!(store.get(1).unwrap(), Some(record(1)));
    assert_eq!(store.list().unwrap().len(), 2);
    assert_eq!(store.get(3).unwrap(), None);
}

#[test]
fn test_concurrent_handles_never_share_an_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job_store.json");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                let store = FileJobStore::open(&path).unwrap();
                (0..25).map(|_| store.next_id().unwrap()).collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(ids.insert(id), "id {id} issued twice");
        }
    }
    assert_eq!(ids.len(), 100);
    assert_eq!(ids.iter().max(), Some(&100));
}

#[test]
fn test_concurrent_puts_are_not_lost() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job_store.json");

    let handles: Vec<_> = (1..=8)
        .map(|job_id| {
            let path = path.clone();
            thread::spawn(move || FileJobStore::open(&path).unwrap().put(&record(job_id)).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let store = FileJobStore::open(&path).unwrap();
    let mut ids: Vec<u64> = store.list().unwrap().iter().map(|job| job.job_id).collect();
    ids.sort();
    assert_eq!(ids, (1..=8).collect::<Vec<u64>>());
}

#[test]
fn test_corrupt_store_recovers_from_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job_store.json");
    let store = FileJobStore::open(&path).unwrap();

    for _ in 0..3 {
        store.next_id().unwrap();
    }
    store.put(&record(1)).unwrap();
    fs::write(&path, "{\"job_counter\": 3, \"jobs\": [").unwrap();

    // the backup predates the last write, so its counter is bumped to stay ahead
    let id = store.next_id().unwrap();
    assert!(id > 3, "reissued id {id}");
    assert_eq!(store.next_id().unwrap(), id + 1);
}

#[test]
fn test_missing_primary_recovers_from_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job_store.json");
    let store = FileJobStore::open(&path).unwrap();

    store.put(&record(1)).unwrap();
    store.put(&record(2)).unwrap();
    store.next_id().unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(store.list().unwrap().len(), 2);
}

#[test]
fn test_corrupt_store_without_backup_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job_store.json");
    fs::write(&path, "not json at all").unwrap();

    let store = FileJobStore::open(&path).unwrap();
    assert!(matches!(store.next_id(), Err(StoreError::Corrupt { .. })));
    assert!(matches!(store.get(1), Err(StoreError::Corrupt { .. })));

    // nothing was overwritten
    assert_eq!(fs::read_to_string(&path).unwrap(), "not json at all");
}

#[test]
fn test_repeated_recovery_never_reissues_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job_store.json");
    let store = FileJobStore::open(&path).unwrap();

    let mut last = 0;
    for _ in 0..3 {
        last = store.next_id().unwrap();
    }

    // lose the primary twice, once corrupted and once deleted, with writes in between
    fs::write(&path, "{\"job_counter\": ").unwrap();
    let after_first = store.next_id().unwrap();
    assert!(after_first > last, "id {after_first} reissued after {last}");
    store.put(&record(after_first)).unwrap();

    fs::remove_file(&path).unwrap();
    let after_second = store.next_id().unwrap();
    assert!(after_second > after_first, "id {after_second} reissued after {after_first}");
}

#[test]
fn test_back_to_back_recoveries_keep_increasing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job_store.json");
    let store = FileJobStore::open(&path).unwrap();
    for _ in 0..3 {
        store.next_id().unwrap();
    }

    let mut issued = vec![];
    for _ in 0..3 {
        fs::remove_file(&path).unwrap();
        issued.push(store.next_id().unwrap());
    }

    assert!(issued.windows(2).all(|pair| pair[0] < pair[1]), "ids {issued:?} aren't increasing");
    assert!(issued[0] > 3);
}
