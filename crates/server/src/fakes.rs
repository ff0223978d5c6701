//! In-memory stand-ins for the collaborators spec.md §1 places out of scope
//! (`NamespaceStore`, `ByteRangeLockService`, `FlushService`) — enough for
//! `fusexd` to be a runnable, self-contained binary and for integration
//! tests to drive it end to end. A production deployment wires in its own
//! namespace/lock/flush backends; these fakes carry no persistence, mirroring
//! the teacher's own `LockMap` (`src/lock_map.rs`) for per-key mutual
//! exclusion rather than its `sled`-backed `DefaultKeyValueStorage`, since
//! nothing here needs to survive a restart (spec.md §6 "Persisted state:
//! None").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use log::trace;

use fusex_common::clock::Timestamp;
use fusex_common::collaborators::{
    ByteRangeLockService, EntryMetadata, FlushError, FlushService, LockError, NamespaceError, NamespaceStore,
    QuotaSnapshot,
};
use fusex_common::wire::{FlockRecord, LockType};
use fusex_common::{ClientUuid, Inode};

/// A single in-process namespace tree, keyed by inode. `Inode::ZERO` is the
/// root directory, created empty at startup.
pub struct InMemoryNamespace {
    entries: Mutex<HashMap<Inode, EntryMetadata>>,
    next_inode: AtomicU64,
}

impl Default for InMemoryNamespace {
    fn default() -> Self {
        let mut root = EntryMetadata::default();
        root.inode = Inode::ZERO;
        root.mode = 0o40755;
        root.name = "/".to_string();
        let mut entries = HashMap::new();
        entries.insert(Inode::ZERO, root);
        Self {
            entries: Mutex::new(entries),
            // Even inodes are containers (spec.md's `Inode::is_container`
            // convention); start allocation at the first even value above
            // the root so every freshly created directory lands on one.
            next_inode: AtomicU64::new(2),
        }
    }
}

impl InMemoryNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self, is_directory: bool) -> Inode {
        loop {
            let candidate = self.next_inode.fetch_add(1, Ordering::Relaxed);
            let is_even = candidate % 2 == 0;
            if is_even == is_directory {
                return Inode(candidate);
            }
        }
    }
}

#[async_trait]
impl NamespaceStore for InMemoryNamespace {
    async fn get(&self, inode: Inode) -> Result<Option<EntryMetadata>, NamespaceError> {
        Ok(self.entries.lock().expect("namespace lock").get(&inode).cloned())
    }

    async fn list_children(&self, dir_inode: Inode) -> Result<Vec<EntryMetadata>, NamespaceError> {
        let entries = self.entries.lock().expect("namespace lock");
        if !entries.contains_key(&dir_inode) {
            return Err(NamespaceError::NotFound);
        }
        Ok(entries
            .values()
            .filter(|e| e.parent_inode == dir_inode && e.inode != dir_inode)
            .cloned()
            .collect())
    }

    async fn find_child(&self, parent: Inode, name: &str) -> Result<Option<EntryMetadata>, NamespaceError> {
        let entries = self.entries.lock().expect("namespace lock");
        Ok(entries
            .values()
            .find(|e| e.parent_inode == parent && e.name == name)
            .cloned())
    }

    async fn create(&self, mut entry: EntryMetadata) -> Result<EntryMetadata, NamespaceError> {
        let mut entries = self.entries.lock().expect("namespace lock");
        if entries.values().any(|e| e.parent_inode == entry.parent_inode && e.name == entry.name) {
            return Err(NamespaceError::AlreadyExists);
        }
        if entry.inode == Inode::ZERO {
            entry.inode = self.allocate(entry.is_directory());
        }
        trace!("namespace create {:?} under {:?}", entry.inode, entry.parent_inode);
        entries.insert(entry.inode, entry.clone());
        Ok(entry)
    }

    async fn update(&self, entry: EntryMetadata) -> Result<EntryMetadata, NamespaceError> {
        let mut entries = self.entries.lock().expect("namespace lock");
        if !entries.contains_key(&entry.inode) {
            return Err(NamespaceError::NotFound);
        }
        entries.insert(entry.inode, entry.clone());
        Ok(entry)
    }

    async fn rename(&self, inode: Inode, new_parent: Inode, new_name: String) -> Result<EntryMetadata, NamespaceError> {
        let mut entries = self.entries.lock().expect("namespace lock");
        if entries.values().any(|e| e.parent_inode == new_parent && e.name == new_name && e.inode != inode) {
            return Err(NamespaceError::AlreadyExists);
        }
        let entry = entries.get_mut(&inode).ok_or(NamespaceError::NotFound)?;
        entry.parent_inode = new_parent;
        entry.name = new_name;
        Ok(entry.clone())
    }

    async fn delete(&self, inode: Inode) -> Result<(), NamespaceError> {
        let mut entries = self.entries.lock().expect("namespace lock");
        if entries.values().any(|e| e.parent_inode == inode) {
            return Err(NamespaceError::NotEmpty);
        }
        entries.remove(&inode).ok_or(NamespaceError::NotFound)?;
        Ok(())
    }

    async fn set_attr(&self, inode: Inode, key: &str, value: &str) -> Result<(), NamespaceError> {
        let mut entries = self.entries.lock().expect("namespace lock");
        let entry = entries.get_mut(&inode).ok_or(NamespaceError::NotFound)?;
        entry.attrs.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn touch_mtime(&self, inode: Inode, mtime: Timestamp) -> Result<(), NamespaceError> {
        let mut entries = self.entries.lock().expect("namespace lock");
        let entry = entries.get_mut(&inode).ok_or(NamespaceError::NotFound)?;
        entry.mtime = mtime;
        Ok(())
    }

    async fn quota_for(&self, _uid: u32, _gid: u32, _quota_node: Inode) -> Result<QuotaSnapshot, NamespaceError> {
        Ok(QuotaSnapshot::unlimited())
    }
}

/// Byte-range locks, keyed by inode, each inode's range list behind its own
/// lock — the same per-key isolation as the teacher's `LockMap`, just with
/// the value being a `Vec<FlockRecord>` instead of a bare mutex.
#[derive(Default)]
pub struct InMemoryLocks {
    by_inode: Mutex<HashMap<Inode, Vec<(ClientUuid, FlockRecord)>>>,
}

impl InMemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn overlaps(a: &FlockRecord, b: &FlockRecord) -> bool {
        let a_end = if a.len < 0 { u64::MAX } else { a.start + a.len as u64 };
        let b_end = if b.len < 0 { u64::MAX } else { b.start + b.len as u64 };
        a.start < b_end && b.start < a_end
    }
}

#[async_trait]
impl ByteRangeLockService for InMemoryLocks {
    async fn getlk(&self, inode: Inode, req: FlockRecord) -> Result<FlockRecord, LockError> {
        let locks = self.by_inode.lock().expect("lock table");
        if let Some(holders) = locks.get(&inode) {
            if let Some((_, held)) = holders.iter().find(|(_, held)| Self::overlaps(held, &req)) {
                return Ok(held.clone());
            }
        }
        Ok(FlockRecord { lock_type: LockType::Unlock, ..req })
    }

    async fn setlk(&self, inode: Inode, req: FlockRecord, _wait: bool) -> Result<FlockRecord, LockError> {
        let mut locks = self.by_inode.lock().expect("lock table");
        let holders = locks.entry(inode).or_default();

        if req.lock_type == LockType::Unlock {
            holders.retain(|(_, held)| !Self::overlaps(held, &req));
            return Ok(req);
        }

        if let Some((_, held)) = holders.iter().find(|(_, held)| Self::overlaps(held, &req)) {
            return Ok(held.clone());
        }

        holders.push((ClientUuid::default(), req.clone()));
        Ok(req)
    }

    async fn drop_locks_for_uuid(&self, uuid: &ClientUuid) {
        let mut locks = self.by_inode.lock().expect("lock table");
        for holders in locks.values_mut() {
            holders.retain(|(holder, _)| holder != uuid);
        }
        locks.retain(|_, holders| !holders.is_empty());
    }
}

/// Flush bookkeeping is purely advisory at this layer (spec.md §4.4
/// "BEGINFLUSH / ENDFLUSH" only requires the dispatcher to forward the
/// call); tracking in-flight flushes here is enough to make `end_flush`
/// without a matching `begin_flush` observable in tests.
#[derive(Default)]
pub struct InMemoryFlush {
    in_flight: Mutex<HashMap<Inode, Vec<ClientUuid>>>,
}

impl InMemoryFlush {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlushService for InMemoryFlush {
    async fn begin_flush(&self, inode: Inode, uuid: &ClientUuid) -> Result<(), FlushError> {
        self.in_flight.lock().expect("flush table").entry(inode).or_default().push(uuid.clone());
        Ok(())
    }

    async fn end_flush(&self, inode: Inode, uuid: &ClientUuid) -> Result<(), FlushError> {
        let mut in_flight = self.in_flight.lock().expect("flush table");
        if let Some(pending) = in_flight.get_mut(&inode) {
            pending.retain(|u| u != uuid);
            if pending.is_empty() {
                in_flight.remove(&inode);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let ns = InMemoryNamespace::new();
        let entry = EntryMetadata {
            parent_inode: Inode::ZERO,
            name: "foo".to_string(),
            ..Default::default()
        };
        let created = ns.create(entry).await.unwrap();
        let fetched = ns.get(created.inode).await.unwrap().unwrap();
        assert_eq!(fetched.name, "foo");
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let ns = InMemoryNamespace::new();
        let entry = EntryMetadata {
            parent_inode: Inode::ZERO,
            name: "foo".to_string(),
            ..Default::default()
        };
        ns.create(entry.clone()).await.unwrap();
        let err = ns.create(entry).await.unwrap_err();
        assert!(matches!(err, NamespaceError::AlreadyExists));
    }

    #[tokio::test]
    async fn overlapping_write_lock_is_denied() {
        let locks = InMemoryLocks::new();
        let req = FlockRecord { lock_type: LockType::Write, start: 0, len: 10, pid: 1 };
        let granted = locks.setlk(Inode(2), req, false).await.unwrap();
        assert_eq!(granted.lock_type, LockType::Write);

        let conflicting = FlockRecord { lock_type: LockType::Write, start: 5, len: 10, pid: 2 };
        let result = locks.setlk(Inode(2), conflicting, false).await.unwrap();
        assert_eq!(result.pid, 1);
    }

    #[tokio::test]
    async fn flush_tracks_in_flight_by_inode() {
        let flush = InMemoryFlush::new();
        let uuid = ClientUuid::from("client-a");
        flush.begin_flush(Inode(2), &uuid).await.unwrap();
        assert_eq!(flush.in_flight.lock().unwrap().get(&Inode(2)).unwrap().len(), 1);
        flush.end_flush(Inode(2), &uuid).await.unwrap();
        assert!(flush.in_flight.lock().unwrap().get(&Inode(2)).is_none());
    }
}
