//! Generic copy-on-write record table.
//!
//! One instance per feature. Records are immutable once published: every
//! update deep-copies the current record, mutates the copy, and swaps it
//! in under the single writer lock. Readers hold `Arc` snapshots, so a
//! reader that obtained a record before a commit keeps observing the
//! pre-commit value in full.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;

use strata_types::DirHandle;

use crate::error::StateError;

/// A per-directory state bag owned by exactly one store.
pub trait Record: Clone + Send + Sync + 'static {
    fn dir(&self) -> &DirHandle;
}

pub struct RecordStore<R: Record> {
    table: RwLock<HashMap<DirHandle, Arc<R>>>,
    /// Bumped on every commit; readiness waits subscribe to it.
    version: watch::Sender<u64>,
}

impl<R: Record> Default for RecordStore<R> {
    fn default() -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            version: watch::channel(0).0,
        }
    }
}

impl<R: Record> RecordStore<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, record: R) -> Result<(), StateError> {
        let dir = record.dir().clone();
        {
            let mut table = self.table.write().unwrap();
            if table.contains_key(&dir) {
                return Err(StateError::AlreadyExists(dir));
            }
            table.insert(dir, Arc::new(record));
        }
        self.version.send_modify(|v| *v += 1);
        Ok(())
    }

    /// Returns whether the record was inserted (`false` when one already
    /// existed).
    pub fn add_if_not_exists(&self, record: R) -> bool {
        match self.add(record) {
            Ok(()) => true,
            Err(_) => false,
        }
    }

    /// Remove the record, returning its last published snapshot.
    pub fn remove(&self, dir: &DirHandle) -> Option<Arc<R>> {
        let old = self.table.write().unwrap().remove(dir);
        if old.is_some() {
            self.version.send_modify(|v| *v += 1);
        }
        old
    }

    pub fn get(&self, dir: &DirHandle) -> Result<Arc<R>, StateError> {
        self.table
            .read()
            .unwrap()
            .get(dir)
            .cloned()
            .ok_or_else(|| StateError::RecordNotFound(dir.clone()))
    }

    #[must_use]
    pub fn exists(&self, dir: &DirHandle) -> bool {
        self.table.read().unwrap().contains_key(dir)
    }

    #[must_use]
    pub fn list(&self) -> Vec<Arc<R>> {
        let mut records: Vec<Arc<R>> = self.table.read().unwrap().values().cloned().collect();
        records.sort_by(|a, b| a.dir().cmp(b.dir()));
        records
    }

    /// Copy-on-write update: deep-copies the current record, applies
    /// `mutate` to the copy, and commits it. Returns the pre- and
    /// post-commit snapshots so callers can diff them into change flags.
    pub fn update(
        &self,
        dir: &DirHandle,
        mutate: impl FnOnce(&mut R),
    ) -> Result<(Arc<R>, Arc<R>), StateError> {
        let (old, new) = {
            let mut table = self.table.write().unwrap();
            let old = table
                .get(dir)
                .cloned()
                .ok_or_else(|| StateError::RecordNotFound(dir.clone()))?;
            let mut copy = (*old).clone();
            mutate(&mut copy);
            let new = Arc::new(copy);
            table.insert(dir.clone(), Arc::clone(&new));
            (old, new)
        };
        self.version.send_modify(|v| *v += 1);
        Ok((old, new))
    }

    /// Readiness wait: resolves once `pred` holds for the record,
    /// strictly after the commit that made it hold. Returns immediately
    /// when the condition already holds. Never unbounded; `timeout`
    /// caps the wait.
    pub async fn wait_for(
        &self,
        dir: &DirHandle,
        timeout: Duration,
        pred: impl Fn(&R) -> bool,
    ) -> Result<(), StateError> {
        let mut version = self.version.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            version.borrow_and_update();
            let record = self.get(dir)?;
            if pred(&record) {
                return Ok(());
            }
            let changed = tokio::time::timeout_at(deadline, version.changed()).await;
            match changed {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(StateError::Stopped),
                Err(_) => return Err(StateError::WatchTimeout(dir.clone())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct TestRecord {
        dir: DirHandle,
        payload: Vec<String>,
        loaded: bool,
    }

    impl TestRecord {
        fn new(path: &str) -> Self {
            Self {
                dir: DirHandle::from_path(path),
                payload: Vec::new(),
                loaded: false,
            }
        }
    }

    impl Record for TestRecord {
        fn dir(&self) -> &DirHandle {
            &self.dir
        }
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let store = RecordStore::new();
        store.add(TestRecord::new("/tmp/a")).unwrap();
        let err = store.add(TestRecord::new("/tmp/a")).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
        assert!(!store.add_if_not_exists(TestRecord::new("/tmp/a")));
    }

    #[test]
    fn test_list_is_sorted_by_dir() {
        let store = RecordStore::new();
        store.add(TestRecord::new("/tmp/b")).unwrap();
        store.add(TestRecord::new("/tmp/a")).unwrap();
        let dirs: Vec<_> = store.list().iter().map(|r| r.dir.clone()).collect();
        assert_eq!(
            dirs,
            vec![DirHandle::from_path("/tmp/a"), DirHandle::from_path("/tmp/b")]
        );
    }

    #[test]
    fn test_snapshot_isolation() {
        let store = RecordStore::new();
        let dir = DirHandle::from_path("/tmp/a");
        store.add(TestRecord::new("/tmp/a")).unwrap();

        let before = store.get(&dir).unwrap();
        store
            .update(&dir, |r| {
                r.payload.push("x".to_string());
                r.loaded = true;
            })
            .unwrap();

        // The pre-commit snapshot is unaffected; a fresh read observes
        // the whole mutation.
        assert!(before.payload.is_empty());
        assert!(!before.loaded);
        let after = store.get(&dir).unwrap();
        assert_eq!(after.payload, vec!["x".to_string()]);
        assert!(after.loaded);
    }

    #[test]
    fn test_update_returns_old_and_new() {
        let store = RecordStore::new();
        let dir = DirHandle::from_path("/tmp/a");
        store.add(TestRecord::new("/tmp/a")).unwrap();

        let (old, new) = store.update(&dir, |r| r.loaded = true).unwrap();
        assert!(!old.loaded);
        assert!(new.loaded);
    }

    #[test]
    fn test_update_missing_record_errors() {
        let store: RecordStore<TestRecord> = RecordStore::new();
        let err = store
            .update(&DirHandle::from_path("/tmp/a"), |_| {})
            .unwrap_err();
        assert!(err.is_record_not_found());
    }

    #[test]
    fn test_remove_returns_last_snapshot() {
        let store = RecordStore::new();
        let dir = DirHandle::from_path("/tmp/a");
        store.add(TestRecord::new("/tmp/a")).unwrap();
        store.update(&dir, |r| r.loaded = true).unwrap();

        let old = store.remove(&dir).expect("record existed");
        assert!(old.loaded);
        assert!(!store.exists(&dir));
        assert!(store.remove(&dir).is_none());
    }

    #[tokio::test]
    async fn test_wait_for_returns_immediately_when_already_true() {
        let store = Arc::new(RecordStore::new());
        let dir = DirHandle::from_path("/tmp/a");
        store.add(TestRecord::new("/tmp/a")).unwrap();
        store.update(&dir, |r| r.loaded = true).unwrap();

        store
            .wait_for(&dir, Duration::from_millis(10), |r| r.loaded)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_resolves_after_commit() {
        let store = Arc::new(RecordStore::new());
        let dir = DirHandle::from_path("/tmp/a");
        store.add(TestRecord::new("/tmp/a")).unwrap();

        let waiter = {
            let store = Arc::clone(&store);
            let dir = dir.clone();
            tokio::spawn(async move {
                store
                    .wait_for(&dir, Duration::from_secs(5), |r| r.loaded)
                    .await
            })
        };

        tokio::task::yield_now().await;
        store.update(&dir, |r| r.loaded = true).unwrap();
        waiter.await.unwrap().unwrap();

        // The payload-setting commit is visible to the resolved waiter.
        assert!(store.get(&dir).unwrap().loaded);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let store = Arc::new(RecordStore::new());
        let dir = DirHandle::from_path("/tmp/a");
        store.add(TestRecord::new("/tmp/a")).unwrap();

        let err = store
            .wait_for(&dir, Duration::from_millis(20), |r| r.loaded)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::WatchTimeout(_)));
    }

    #[tokio::test]
    async fn test_wait_for_missing_record_errors() {
        let store: RecordStore<TestRecord> = RecordStore::new();
        let err = store
            .wait_for(&DirHandle::from_path("/tmp/a"), Duration::from_millis(10), |r| {
                r.loaded
            })
            .await
            .unwrap_err();
        assert!(err.is_record_not_found());
    }
}
