//! Persistent LSM backend (type tag `ldb`)
//!
//! Backed by an embedded rocksdb instance. A user comparator is threaded
//! into the engine's ordering; enumeration runs on snapshot-pinned
//! iterators so a scan observes a consistent view.

use std::path::{Path, PathBuf};

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};

use crate::comparator::Comparator;
use crate::error::{KvError, KvResult};
use crate::slice::DataSlice;

use super::{check_prefix, fill_slot, DataStore, DbType, Fileset, KeyValue, PrefixCheck, StoreCommon};

/// Log-structured merge backend.
pub struct LsmDataStore {
    common: StoreCommon,
    db: Option<DB>,
}

impl LsmDataStore {
    pub fn new() -> Self {
        LsmDataStore {
            common: StoreCommon::default(),
            db: None,
        }
    }

    fn handle(&self) -> KvResult<&DB> {
        self.db.as_ref().ok_or(KvError::UnknownDatabase)
    }

    /// Ascending walk over a snapshot, applying the start/prefix contract.
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
        let custom_order = self.common.comparator.is_some();
        let count = if count != 0 { count } else { max_count as usize };
        let snapshot = db.snapshot();
        let mode = if start.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(start, Direction::Forward)
        };
        let mut i = 0;
        let mut first = true;
        for item in snapshot.iterator(mode) {
            if i >= count {
                break;
            }
            let (k, v) = item.map_err(|_| KvError::Alloc)?;
            // the iterator seeks to >= start; the contract is strictly greater
            if first {
                first = false;
                if !start.is_empty() && k.as_ref() == start {
                    continue;
                }
            }
            match check_prefix(prefix, &k) {
                PrefixCheck::Match => {}
                PrefixCheck::Skip => continue,
                PrefixCheck::Stop if custom_order => continue,
                PrefixCheck::Stop => break,
            }
            emit(i, &k, &v);
            i += 1;
        }
        Ok(i)
    }
}

impl Default for LsmDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore for LsmDataStore {
    fn db_type(&self) -> DbType {
        DbType::Lsm
    }

    fn name(&self) -> &str {
        &self.common.name
    }

    fn path(&self) -> &str {
        &self.common.path
    }

    fn comparator_name(&self) -> &str {
        self.common
            .comparator
            .as_ref()
            .map(|c| c.name())
            .unwrap_or("")
    }

    fn no_overwrite(&self) -> bool {
        self.common.no_overwrite
    }

    fn open(&mut self, name: &str, path: &str) -> KvResult<()> {
        self.common.name = name.to_string();
        self.common.path = path.to_string();

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

        let mut options = Options::default();
        options.create_if_missing(true);
        if let Some(cmp) = &self.common.comparator {
            let cmp = cmp.clone();
            let name = cmp.name().to_string();
            options.set_comparator(&name, Box::new(move |a, b| cmp.compare(a, b)));
        }

        match DB::open(&options, full) {
            Ok(db) => {
                self.db = Some(db);
                Ok(())
            }
            Err(e) => {
                tracing::error!(name, path, error = %e, "rocksdb open failed");
                Err(KvError::DatabaseCreate)
            }
        }
    }

    fn set_comparator(&mut self, comparator: Comparator) -> KvResult<()> {
        self.common.comparator = Some(comparator);
        Ok(())
    }

    fn set_no_overwrite(&mut self) {
        self.common.no_overwrite = true;
    }

    fn set_erase_on_get(&mut self, enable: bool) {
        self.common.erase_on_get = enable;
    }

    fn set_in_memory(&mut self, _enable: bool) {}

    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let db = self.handle()?;
        if self.common.no_overwrite && self.exists(key) {
            return Err(KvError::KeyExists);
        }
        db.put(key, value).map_err(|_| KvError::Put)?;
        Ok(())
    }

    fn put_multi(&self, keys: &[&[u8]], values: &[&[u8]]) -> KvResult<()> {
        if keys.len() != values.len() {
            return Err(KvError::Put);
        }
        let db = self.handle()?;
        if self.common.no_overwrite {
            for key in keys {
                if self.exists(key) {
                    return Err(KvError::KeyExists);
                }
            }
        }
        let mut batch = WriteBatch::default();
        for (key, value) in keys.iter().zip(values) {
            batch.put(key, value);
        }
        db.write(batch).map_err(|_| KvError::Put)?;
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
            let _ = db.delete(key);
        }
        Ok(())
    }

    fn length(&self, key: &[u8]) -> Option<usize> {
        let db = self.db.as_ref()?;
        db.get_pinned(key).ok().flatten().map(|v| v.len())
    }

    fn exists(&self, key: &[u8]) -> bool {
        self.db
            .as_ref()
            .map(|db| db.get_pinned(key).map(|v| v.is_some()).unwrap_or(false))
            .unwrap_or(false)
    }

    fn erase(&self, key: &[u8]) -> bool {
        match self.db.as_ref() {
            Some(db) if self.exists(key) => db.delete(key).is_ok(),
            _ => false,
        }
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
        self.range_scan(lower, upper, |k, _| {
            out.push(DataSlice::from_vec(k.to_vec()));
        })
    }

    fn list_keyval_range(
        &self,
        lower: &[u8],
        upper: &[u8],
        out: &mut Vec<KeyValue>,
    ) -> KvResult<()> {
        self.range_scan(lower, upper, |k, v| {
            out.push((
                DataSlice::from_vec(k.to_vec()),
                DataSlice::from_vec(v.to_vec()),
            ));
        })
    }

    fn create_fileset(&self) -> Option<Fileset> {
        if self.common.path.is_empty() {
            return None;
        }
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert(Fileset::META_TYPE.to_string(), self.db_type().as_str().to_string());
        metadata.insert(Fileset::META_NAME.to_string(), self.common.name.clone());
        metadata.insert(
            Fileset::META_COMPARATOR.to_string(),
            self.comparator_name().to_string(),
        );
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

impl LsmDataStore {
    /// Entries strictly between the bounds, under the database's order.
    fn range_scan<F>(&self, lower: &[u8], upper: &[u8], mut emit: F) -> KvResult<()>
    where
        F: FnMut(&[u8], &[u8]),
    {
        let db = self.handle()?;
        let cmp = self.common.comparator.clone();
        let beyond = |key: &[u8]| -> bool {
            match &cmp {
                Some(c) => c.compare(key, upper) != std::cmp::Ordering::Less,
                None => key >= upper,
            }
        };
        let snapshot = db.snapshot();
        let mut first = true;
        for item in snapshot.iterator(IteratorMode::From(lower, Direction::Forward)) {
            let (k, v) = item.map_err(|_| KvError::Alloc)?;
            if first {
                first = false;
                if k.as_ref() == lower {
                    continue;
                }
            }
            if beyond(&k) {
                break;
            }
            emit(&k, &v);
        }
        Ok(())
    }
}
