//! Null backend
//!
//! Accepts every write and answers every lookup with "unknown key".
//! Useful as a sink when measuring the RPC path without storage costs.

use crate::comparator::Comparator;
use crate::error::{KvError, KvResult};
use crate::slice::DataSlice;

use super::{DataStore, DbType, Fileset, KeyValue, StoreCommon};

pub struct NullDataStore {
    common: StoreCommon,
}

impl NullDataStore {
    pub fn new() -> Self {
        NullDataStore {
            common: StoreCommon::default(),
        }
    }
}

impl Default for NullDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore for NullDataStore {
    fn db_type(&self) -> DbType {
        DbType::Null
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
        false
    }

    fn open(&mut self, name: &str, path: &str) -> KvResult<()> {
        self.common.name = name.to_string();
        self.common.path = path.to_string();
        Ok(())
    }

    fn set_comparator(&mut self, _comparator: Comparator) -> KvResult<()> {
        Ok(())
    }

    fn set_no_overwrite(&mut self) {}

    fn set_erase_on_get(&mut self, _enable: bool) {}

    fn set_in_memory(&mut self, _enable: bool) {}

    fn put(&self, _key: &[u8], _value: &[u8]) -> KvResult<()> {
        Ok(())
    }

    fn put_multi(&self, _keys: &[&[u8]], _values: &[&[u8]]) -> KvResult<()> {
        Ok(())
    }

    fn get(&self, _key: &[u8], _value: &mut DataSlice<'static>) -> KvResult<()> {
        Err(KvError::UnknownKey)
    }

    fn length(&self, _key: &[u8]) -> Option<usize> {
        None
    }

    fn exists(&self, _key: &[u8]) -> bool {
        false
    }

    fn erase(&self, _key: &[u8]) -> bool {
        false
    }

    fn sync(&self) -> KvResult<()> {
        Ok(())
    }

    fn list_keys(
        &self,
        _max_count: u64,
        _start: &[u8],
        _prefix: &[u8],
        out: &mut Vec<DataSlice<'static>>,
    ) -> KvResult<()> {
        out.clear();
        Ok(())
    }

    fn list_keyvals(
        &self,
        _max_count: u64,
        _start: &[u8],
        _prefix: &[u8],
        out: &mut Vec<KeyValue>,
    ) -> KvResult<()> {
        out.clear();
        Ok(())
    }

    fn create_fileset(&self) -> Option<Fileset> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_behavior() {
        let mut store = NullDataStore::new();
        store.open("sink", "").unwrap();

        store.put(b"k", b"v").unwrap();
        assert!(!store.exists(b"k"));
        assert_eq!(store.length(b"k"), None);

        let mut value = DataSlice::new();
        assert_eq!(store.get(b"k", &mut value), Err(KvError::UnknownKey));

        let mut out = Vec::new();
        store.list_keys(10, b"", b"", &mut out).unwrap();
        assert!(out.is_empty());
    }
}
