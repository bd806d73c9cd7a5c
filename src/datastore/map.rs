//! In-process ordered map backend
//!
//! Keys and values are stored by value in a `BTreeMap` behind a
//! reader/writer lock. A user comparator, when attached, is carried inside
//! every key so the standard ordered map honors it.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::comparator::Comparator;
use crate::error::{KvError, KvResult};
use crate::slice::DataSlice;

use super::{check_prefix, fill_slot, DataStore, DbType, Fileset, KeyValue, PrefixCheck, StoreCommon};

/// Map key wrapper ordering itself through the store's comparator.
#[derive(Clone)]
struct MapKey {
    data: Vec<u8>,
    cmp: Option<Arc<Comparator>>,
}

impl MapKey {
    fn new(data: Vec<u8>, cmp: Option<Arc<Comparator>>) -> Self {
        MapKey { data, cmp }
    }
}

impl Ord for MapKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match &self.cmp {
            Some(c) => c.compare(&self.data, &other.data),
            None => self.data.cmp(&other.data),
        }
    }
}

impl PartialOrd for MapKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for MapKey {}

/// In-memory ordered map backend.
pub struct MapDataStore {
    common: StoreCommon,
    map: RwLock<BTreeMap<MapKey, Vec<u8>>>,
}

impl MapDataStore {
    pub fn new() -> Self {
        MapDataStore {
            common: StoreCommon::default(),
            map: RwLock::new(BTreeMap::new()),
        }
    }

    fn probe(&self, key: &[u8]) -> MapKey {
        MapKey::new(
            key.to_vec(),
            self.common.comparator.clone().map(Arc::new),
        )
    }

    /// Shared walk behind list_keys/list_keyvals; `emit` receives each
    /// matching pair and the running index.
    fn scan<F>(&self, max_count: u64, start: &[u8], prefix: &[u8], count: usize, mut emit: F) -> usize
    where
        F: FnMut(usize, &[u8], &[u8]),
    {
        let custom_order = self.common.comparator.is_some();
        let count = if count != 0 { count } else { max_count as usize };
        let map = self.map.read();
        let range = if start.is_empty() {
            map.range::<MapKey, (Bound<MapKey>, Bound<MapKey>)>((Bound::Unbounded, Bound::Unbounded))
        } else {
            map.range((Bound::Excluded(self.probe(start)), Bound::Unbounded))
        };
        let mut i = 0;
        for (k, v) in range {
            if i >= count {
                break;
            }
            match check_prefix(prefix, &k.data) {
                PrefixCheck::Match => {}
                PrefixCheck::Skip => continue,
                // early termination is only sound under the default order
                PrefixCheck::Stop if custom_order => continue,
                PrefixCheck::Stop => break,
            }
            emit(i, &k.data, v);
            i += 1;
        }
        i
    }
}

impl Default for MapDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore for MapDataStore {
    fn db_type(&self) -> DbType {
        DbType::Map
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
        self.map.write().clear();
        Ok(())
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

    fn set_in_memory(&mut self, enable: bool) {
        self.common.in_memory = enable;
    }

    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let probe = self.probe(key);
        let mut map = self.map.write();
        if self.common.no_overwrite && map.contains_key(&probe) {
            return Err(KvError::KeyExists);
        }
        map.insert(probe, value.to_vec());
        Ok(())
    }

    fn put_multi(&self, keys: &[&[u8]], values: &[&[u8]]) -> KvResult<()> {
        if keys.len() != values.len() {
            return Err(KvError::Put);
        }
        for (key, value) in keys.iter().zip(values) {
            self.put(key, value)?;
        }
        Ok(())
    }

    fn get(&self, key: &[u8], value: &mut DataSlice<'static>) -> KvResult<()> {
        let probe = self.probe(key);
        {
            let map = self.map.read();
            let found = map.get(&probe).ok_or(KvError::UnknownKey)?;
            fill_slot(found, value)?;
        }
        if self.common.erase_on_get {
            self.map.write().remove(&probe);
        }
        Ok(())
    }

    fn length(&self, key: &[u8]) -> Option<usize> {
        self.map.read().get(&self.probe(key)).map(|v| v.len())
    }

    fn exists(&self, key: &[u8]) -> bool {
        self.map.read().contains_key(&self.probe(key))
    }

    fn erase(&self, key: &[u8]) -> bool {
        self.map.write().remove(&self.probe(key)).is_some()
    }

    fn sync(&self) -> KvResult<()> {
        Ok(())
    }

    fn list_keys(
        &self,
        max_count: u64,
        start: &[u8],
        prefix: &[u8],
        out: &mut Vec<DataSlice<'static>>,
    ) -> KvResult<()> {
        let usermem = !out.is_empty();
        let mut size_error = false;
        if usermem {
            let mut slots = std::mem::take(out);
            let produced = self.scan(max_count, start, prefix, slots.len(), |i, k, _| {
                if fill_slot(k, &mut slots[i]).is_err() {
                    size_error = true;
                }
            });
            slots.truncate(produced);
            *out = slots;
        } else {
            let mut collected = Vec::new();
            self.scan(max_count, start, prefix, 0, |_, k, _| {
                collected.push(DataSlice::from_vec(k.to_vec()));
            });
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
        let usermem = !out.is_empty();
        let mut size_error = false;
        if usermem {
            let mut slots = std::mem::take(out);
            let produced = self.scan(max_count, start, prefix, slots.len(), |i, k, v| {
                let (key_slot, val_slot) = {
                    let pair = &mut slots[i];
                    (&mut pair.0, &mut pair.1)
                };
                if fill_slot(k, key_slot).is_err() {
                    size_error = true;
                }
                if fill_slot(v, val_slot).is_err() {
                    size_error = true;
                }
            });
            slots.truncate(produced);
            *out = slots;
        } else {
            let mut collected = Vec::new();
            self.scan(max_count, start, prefix, 0, |_, k, v| {
                collected.push((
                    DataSlice::from_vec(k.to_vec()),
                    DataSlice::from_vec(v.to_vec()),
                ));
            });
            *out = collected;
        }
        if size_error {
            Err(KvError::Size)
        } else {
            Ok(())
        }
    }

    fn create_fileset(&self) -> Option<Fileset> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> MapDataStore {
        let mut store = MapDataStore::new();
        store.open("test", "").unwrap();
        store
    }

    #[test]
    fn test_put_get() {
        let store = open_store();
        store.put(b"apple", b"red").unwrap();
        store.put(b"banana", b"yellow").unwrap();

        let mut value = DataSlice::new();
        store.get(b"apple", &mut value).unwrap();
        assert_eq!(value.as_slice(), b"red");

        let mut value = DataSlice::new();
        assert_eq!(
            store.get(b"grape", &mut value),
            Err(KvError::UnknownKey)
        );
    }

    #[test]
    fn test_get_sized_buffer() {
        let store = open_store();
        store.put(b"k", b"hello").unwrap();

        // big enough: copied in place, truncated to true length
        let mut value = DataSlice::with_len(16);
        store.get(b"k", &mut value).unwrap();
        assert_eq!(value.as_slice(), b"hello");

        // too small: Size, true length reported
        let mut value = DataSlice::with_len(3);
        assert_eq!(store.get(b"k", &mut value), Err(KvError::Size));
        assert_eq!(value.len(), 5);
    }

    #[test]
    fn test_no_overwrite() {
        let mut store = MapDataStore::new();
        store.set_no_overwrite();
        store.open("test", "").unwrap();

        store.put(b"x", b"1").unwrap();
        assert_eq!(store.put(b"x", b"2"), Err(KvError::KeyExists));

        let mut value = DataSlice::new();
        store.get(b"x", &mut value).unwrap();
        assert_eq!(value.as_slice(), b"1");
    }

    #[test]
    fn test_erase_on_get() {
        let mut store = MapDataStore::new();
        store.set_erase_on_get(true);
        store.open("test", "").unwrap();

        store.put(b"once", b"v").unwrap();
        let mut value = DataSlice::new();
        store.get(b"once", &mut value).unwrap();
        assert_eq!(value.as_slice(), b"v");
        assert!(!store.exists(b"once"));
    }

    #[test]
    fn test_length_exists_erase() {
        let store = open_store();
        store.put(b"k", b"value").unwrap();

        assert_eq!(store.length(b"k"), Some(5));
        assert!(store.exists(b"k"));
        assert!(store.erase(b"k"));
        assert!(!store.erase(b"k"));
        assert_eq!(store.length(b"k"), None);
    }

    #[test]
    fn test_list_keys_order_and_prefix() {
        let store = open_store();
        for (k, v) in [("a", "1"), ("ab", "2"), ("ac", "3"), ("b", "4")] {
            store.put(k.as_bytes(), v.as_bytes()).unwrap();
        }

        let mut out = Vec::new();
        store.list_keys(10, b"", b"a", &mut out).unwrap();
        let keys: Vec<&[u8]> = out.iter().map(|k| k.as_slice()).collect();
        assert_eq!(keys, vec![&b"a"[..], &b"ab"[..], &b"ac"[..]]);

        let mut out = Vec::new();
        store.list_keys(10, b"a", b"a", &mut out).unwrap();
        let keys: Vec<&[u8]> = out.iter().map(|k| k.as_slice()).collect();
        assert_eq!(keys, vec![&b"ab"[..], &b"ac"[..]]);
    }

    #[test]
    fn test_list_keys_max_count() {
        let store = open_store();
        for k in ["a", "b", "c", "d"] {
            store.put(k.as_bytes(), b"v").unwrap();
        }
        let mut out = Vec::new();
        store.list_keys(2, b"", b"", &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_slice(), b"a");
        assert_eq!(out[1].as_slice(), b"b");
    }

    #[test]
    fn test_list_keys_usermem_overflow() {
        let store = open_store();
        store.put(b"short", b"v").unwrap();
        store.put(b"this-key-is-long", b"v").unwrap();

        let mut out = vec![DataSlice::with_len(8), DataSlice::with_len(8)];
        let err = store.list_keys(2, b"", b"", &mut out);
        assert_eq!(err, Err(KvError::Size));
        // both entries attempted, true sizes reported
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_slice(), b"short");
        assert_eq!(out[1].len(), b"this-key-is-long".len());
    }

    #[test]
    fn test_custom_comparator_order() {
        unsafe extern "C" fn reverse(
            a: *const u8,
            alen: usize,
            b: *const u8,
            blen: usize,
        ) -> i32 {
            let a = std::slice::from_raw_parts(a, alen);
            let b = std::slice::from_raw_parts(b, blen);
            match b.cmp(a) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }
        }

        let mut store = MapDataStore::new();
        store
            .set_comparator(Comparator::new("reverse", reverse))
            .unwrap();
        store.open("test", "").unwrap();

        for k in ["a", "b", "c"] {
            store.put(k.as_bytes(), b"v").unwrap();
        }

        let mut out = Vec::new();
        store.list_keys(10, b"", b"", &mut out).unwrap();
        let keys: Vec<&[u8]> = out.iter().map(|k| k.as_slice()).collect();
        assert_eq!(keys, vec![&b"c"[..], &b"b"[..], &b"a"[..]]);
    }

    #[test]
    fn test_list_keyvals_matches_pointwise_get() {
        let store = open_store();
        for (k, v) in [("k1", "v1"), ("k2", "v2"), ("k3", "v3")] {
            store.put(k.as_bytes(), v.as_bytes()).unwrap();
        }

        let mut pairs = Vec::new();
        store.list_keyvals(10, b"", b"", &mut pairs).unwrap();
        assert_eq!(pairs.len(), 3);
        for (k, v) in &pairs {
            let mut fetched = DataSlice::new();
            store.get(k.as_slice(), &mut fetched).unwrap();
            assert_eq!(fetched.as_slice(), v.as_slice());
        }
    }

    #[test]
    fn test_range_not_implemented() {
        let store = open_store();
        let mut out = Vec::new();
        assert_eq!(
            store.list_key_range(b"a", b"z", &mut out),
            Err(KvError::OpNotImpl)
        );
    }
}
