//! Persistent B-tree backend (type tag `bdb`)
//!
//! Backed by an embedded sled tree. Batched puts go through `sled::Batch`;
//! enumeration walks a tree cursor. The engine orders keys
//! lexicographically only, so user comparators are refused at
//! configuration time.

use std::ops::Bound;
use std::path::{Path, PathBuf};

use crate::comparator::Comparator;
use crate::error::{KvError, KvResult};
use crate::slice::DataSlice;

use super::{check_prefix, fill_slot, DataStore, DbType, Fileset, KeyValue, PrefixCheck, StoreCommon};

/// Ordered on-disk B-tree backend.
pub struct BTreeDataStore {
    common: StoreCommon,
    db: Option<sled::Db>,
}

impl BTreeDataStore {
    pub fn new() -> Self {
        BTreeDataStore {
            common: StoreCommon::default(),
            db: None,
        }
    }

    fn handle(&self) -> KvResult<&sled::Db> {
        self.db.as_ref().ok_or(KvError::UnknownDatabase)
    }

    /// Walk the tree in ascending order, applying the start/prefix
    /// contract, calling `emit` for each match.
    fn scan<F>(
        &self,
        max_count: u64,
        start: &[u8],
        prefix: &[u8],
        count: usize,
        mut emit: F,
    ) -> KvResult<usize>
    where
        F: FnMut(usize, &[u8], &[u8]),
    {
        let db = self.handle()?;
        let count = if count != 0 { count } else { max_count as usize };
        let iter: Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> =
            if start.is_empty() {
                Box::new(db.iter())
            } else {
                Box::new(db.range((Bound::Excluded(start.to_vec()), Bound::Unbounded)))
            };
        let mut i = 0;
        for item in iter {
            if i >= count {
                break;
            }
            let (k, v) = item.map_err(|_| KvError::Alloc)?;
            match check_prefix(prefix, &k) {
                PrefixCheck::Match => {}
                PrefixCheck::Skip => continue,
                PrefixCheck::Stop => break,
            }
            emit(i, &k, &v);
            i += 1;
        }
        Ok(i)
    }
}

impl Default for BTreeDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore for BTreeDataStore {
    fn db_type(&self) -> DbType {
        DbType::BTree
    }

    fn name(&self) -> &str {
        &self.common.name
    }

    fn path(&self) -> &str {
        &self.common.path
    }

    fn comparator_name(&self) -> &str {
        ""
    }

    fn no_overwrite(&self) -> bool {
        self.common.no_overwrite
    }

    fn open(&mut self, name: &str, path: &str) -> KvResult<()> {
        self.common.name = name.to_string();
        self.common.path = path.to_string();

        let db = if self.common.in_memory {
            sled::Config::new().temporary(true).open()
        } else {
            if !path.is_empty() {
                std::fs::create_dir_all(path).map_err(|e| {
                    tracing::error!(path, error = %e, "could not create database directory");
                    KvError::DatabaseCreate
                })?;
            }
            let full = if path.is_empty() {
                PathBuf::from(name)
            } else {
                Path::new(path).join(name)
            };
            sled::Config::new().path(full).open()
        };
        match db {
            Ok(db) => {
                self.db = Some(db);
                Ok(())
            }
            Err(e) => {
                tracing::error!(name, path, error = %e, "sled open failed");
                Err(KvError::DatabaseCreate)
            }
        }
    }

    fn set_comparator(&mut self, comparator: Comparator) -> KvResult<()> {
        tracing::error!(
            name = comparator.name(),
            "the B-tree backend cannot order keys with a user comparator"
        );
        Err(KvError::ComparisonFunction)
    }

    fn set_no_overwrite(&mut self) {
        self.common.no_overwrite = true;
    }

    fn set_erase_on_get(&mut self, enable: bool) {
        self.common.erase_on_get = enable;
    }

    fn set_in_memory(&mut self, enable: bool) {
        self.common.in_memory = enable;
    }

    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let db = self.handle()?;
        if self.common.no_overwrite {
            // atomic insert-if-absent
            return match db.compare_and_swap(key, None as Option<&[u8]>, Some(value)) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(KvError::KeyExists),
                Err(_) => Err(KvError::Put),
            };
        }
        db.insert(key, value).map_err(|_| KvError::Put)?;
        Ok(())
    }

    fn put_multi(&self, keys: &[&[u8]], values: &[&[u8]]) -> KvResult<()> {
        if keys.len() != values.len() {
            return Err(KvError::Put);
        }
        let db = self.handle()?;
        if self.common.no_overwrite {
            for key in keys {
                if db.contains_key(key).map_err(|_| KvError::Put)? {
                    return Err(KvError::KeyExists);
                }
            }
        }
        let mut batch = sled::Batch::default();
        for (key, value) in keys.iter().zip(values) {
            batch.insert(key.to_vec(), value.to_vec());
        }
        db.apply_batch(batch).map_err(|_| KvError::Put)?;
        Ok(())
    }

    fn get(&self, key: &[u8], value: &mut DataSlice<'static>) -> KvResult<()> {
        let db = self.handle()?;
        let found = db
            .get(key)
            .map_err(|_| KvError::UnknownKey)?
            .ok_or(KvError::UnknownKey)?;
        fill_slot(&found, value)?;
        if self.common.erase_on_get {
            let _ = db.remove(key);
        }
        Ok(())
    }

    fn length(&self, key: &[u8]) -> Option<usize> {
        let db = self.db.as_ref()?;
        db.get(key).ok().flatten().map(|v| v.len())
    }

    fn exists(&self, key: &[u8]) -> bool {
        self.db
            .as_ref()
            .map(|db| db.contains_key(key).unwrap_or(false))
            .unwrap_or(false)
    }

    fn erase(&self, key: &[u8]) -> bool {
        self.db
            .as_ref()
            .and_then(|db| db.remove(key).ok())
            .flatten()
            .is_some()
    }

    fn sync(&self) -> KvResult<()> {
        let db = self.handle()?;
        db.flush().map_err(|_| KvError::Put)?;
        Ok(())
    }

    fn list_keys(
        &self,
        max_count: u64,
        start: &[u8],
        prefix: &[u8],
        out: &mut Vec<DataSlice<'static>>,
    ) -> KvResult<()> {
        let mut size_error = false;
        if !out.is_empty() {
            let mut slots = std::mem::take(out);
            let produced = self.scan(max_count, start, prefix, slots.len(), |i, k, _| {
                if fill_slot(k, &mut slots[i]).is_err() {
                    size_error = true;
                }
            })?;
            slots.truncate(produced);
            *out = slots;
        } else {
            let mut collected = Vec::new();
            self.scan(max_count, start, prefix, 0, |_, k, _| {
                collected.push(DataSlice::from_vec(k.to_vec()));
            })?;
            *out = collected;
        }
        if size_error {
            Err(KvError::Size)
        } else {
            Ok(())
        }
    }

    fn list_keyvals(
        &self,
        max_count: u64,
        start: &[u8],
        prefix: &[u8],
        out: &mut Vec<KeyValue>,
    ) -> KvResult<()> {
        let mut size_error = false;
        if !out.is_empty() {
            let mut slots = std::mem::take(out);
            let produced = self.scan(max_count, start, prefix, slots.len(), |i, k, v| {
                let pair = &mut slots[i];
                if fill_slot(k, &mut pair.0).is_err() {
                    size_error = true;
                }
                if fill_slot(v, &mut pair.1).is_err() {
                    size_error = true;
                }
            })?;
            slots.truncate(produced);
            *out = slots;
        } else {
            let mut collected = Vec::new();
            self.scan(max_count, start, prefix, 0, |_, k, v| {
                collected.push((
                    DataSlice::from_vec(k.to_vec()),
                    DataSlice::from_vec(v.to_vec()),
                ));
            })?;
            *out = collected;
        }
        if size_error {
            Err(KvError::Size)
        } else {
            Ok(())
        }
    }

    fn list_key_range(
        &self,
        lower: &[u8],
        upper: &[u8],
        out: &mut Vec<DataSlice<'static>>,
    ) -> KvResult<()> {
        let db = self.handle()?;
        for item in db.range((Bound::Excluded(lower.to_vec()), Bound::Excluded(upper.to_vec()))) {
            let (k, _) = item.map_err(|_| KvError::Alloc)?;
            out.push(DataSlice::from_vec(k.to_vec()));
        }
        Ok(())
    }

    fn list_keyval_range(
        &self,
        lower: &[u8],
        upper: &[u8],
        out: &mut Vec<KeyValue>,
    ) -> KvResult<()> {
        let db = self.handle()?;
        for item in db.range((Bound::Excluded(lower.to_vec()), Bound::Excluded(upper.to_vec()))) {
            let (k, v) = item.map_err(|_| KvError::Alloc)?;
            out.push((
                DataSlice::from_vec(k.to_vec()),
                DataSlice::from_vec(v.to_vec()),
            ));
        }
        Ok(())
    }

    fn create_fileset(&self) -> Option<Fileset> {
        if self.common.path.is_empty() || self.common.in_memory {
            return None;
        }
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert(Fileset::META_TYPE.to_string(), self.db_type().as_str().to_string());
        metadata.insert(Fileset::META_NAME.to_string(), self.common.name.clone());
        metadata.insert(Fileset::META_COMPARATOR.to_string(), String::new());
        if self.common.no_overwrite {
            metadata.insert(Fileset::META_NO_OVERWRITE.to_string(), String::new());
        }
        Some(Fileset {
            root: PathBuf::from(&self.common.path),
            directories: vec![PathBuf::from(&self.common.name)],
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> BTreeDataStore {
        let mut store = BTreeDataStore::new();
        store
            .open("btree-test", dir.path().to_str().unwrap())
            .unwrap();
        store
    }

    #[test]
    fn test_put_get_erase() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(b"k1", b"v1").unwrap();
        store.put(b"k2", b"").unwrap();

        let mut value = DataSlice::new();
        store.get(b"k1", &mut value).unwrap();
        assert_eq!(value.as_slice(), b"v1");

        assert_eq!(store.length(b"k2"), Some(0));
        assert!(store.erase(b"k1"));
        assert!(!store.erase(b"k1"));
    }

    #[test]
    fn test_no_overwrite_batch() {
        let dir = TempDir::new().unwrap();
        let mut store = BTreeDataStore::new();
        store.set_no_overwrite();
        store
            .open("btree-test", dir.path().to_str().unwrap())
            .unwrap();

        store.put(b"present", b"old").unwrap();
        let keys: Vec<&[u8]> = vec![b"fresh", b"present"];
        let vals: Vec<&[u8]> = vec![b"1", b"new"];
        assert_eq!(store.put_multi(&keys, &vals), Err(KvError::KeyExists));

        let mut value = DataSlice::new();
        store.get(b"present", &mut value).unwrap();
        assert_eq!(value.as_slice(), b"old");
    }

    #[test]
    fn test_list_keys_start_exclusive() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        for k in ["a", "b", "c"] {
            store.put(k.as_bytes(), b"v").unwrap();
        }

        let mut out = Vec::new();
        store.list_keys(10, b"a", b"", &mut out).unwrap();
        let keys: Vec<&[u8]> = out.iter().map(|k| k.as_slice()).collect();
        assert_eq!(keys, vec![&b"b"[..], &b"c"[..]]);
    }

    #[test]
    fn test_range_strictly_between() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        for k in ["a", "b", "c", "d"] {
            store.put(k.as_bytes(), b"v").unwrap();
        }

        let mut out = Vec::new();
        store.list_key_range(b"a", b"d", &mut out).unwrap();
        let keys: Vec<&[u8]> = out.iter().map(|k| k.as_slice()).collect();
        assert_eq!(keys, vec![&b"b"[..], &b"c"[..]]);
    }

    #[test]
    fn test_comparator_refused() {
        unsafe extern "C" fn lex(a: *const u8, alen: usize, b: *const u8, blen: usize) -> i32 {
            let a = std::slice::from_raw_parts(a, alen);
            let b = std::slice::from_raw_parts(b, blen);
            match a.cmp(b) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }
        }
        let mut store = BTreeDataStore::new();
        assert_eq!(
            store.set_comparator(Comparator::new("lex", lex)),
            Err(KvError::ComparisonFunction)
        );
    }

    #[test]
    fn test_fileset_metadata() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let fileset = store.create_fileset().unwrap();
        assert_eq!(
            fileset.metadata.get(Fileset::META_TYPE).unwrap(),
            "bdb"
        );
        assert_eq!(
            fileset.metadata.get(Fileset::META_NAME).unwrap(),
            "btree-test"
        );
    }
}
