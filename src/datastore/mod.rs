//! Storage engine contract
//!
//! Every backend satisfies the same interface: point operations, batched
//! puts, ordered enumeration with a prefix filter, and an optional range
//! scan. The registry holds backends as `Arc<dyn DataStore>`; the set of
//! backends is closed and enumerated by [`DbType`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::comparator::Comparator;
use crate::error::{KvError, KvResult};
use crate::slice::DataSlice;

pub mod btree;
pub mod lsm;
pub mod map;
pub mod null;

pub use btree::BTreeDataStore;
pub use lsm::LsmDataStore;
pub use map::MapDataStore;
pub use null::NullDataStore;

/// A key-value pair as returned by enumeration.
pub type KeyValue = (DataSlice<'static>, DataSlice<'static>);

/// Backend kinds.
///
/// `Forward` is recognized by the parsers for configuration compatibility
/// but the factory refuses it; no forwarding backend ships in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Map,
    Null,
    BTree,
    Lsm,
    Forward,
}

impl DbType {
    /// Parse a configuration type tag, accepting the historical aliases.
    pub fn parse(s: &str) -> Option<DbType> {
        match s {
            "map" => Some(DbType::Map),
            "null" => Some(DbType::Null),
            "bdb" | "btree" | "berkeleydb" => Some(DbType::BTree),
            "ldb" | "lsm" | "leveldb" => Some(DbType::Lsm),
            "fwd" | "forward" => Some(DbType::Forward),
            _ => None,
        }
    }

    /// Canonical type tag as it appears in configs and fileset metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Map => "map",
            DbType::Null => "null",
            DbType::BTree => "bdb",
            DbType::Lsm => "ldb",
            DbType::Forward => "fwd",
        }
    }
}

/// Descriptor of a database's on-disk footprint, handed to the
/// file-migration collaborator for whole-database moves.
///
/// Purely in-memory backends have no fileset; whole-database migration of
/// those fails with `OpNotImpl`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Fileset {
    /// Directory all entries are relative to, with a trailing separator
    pub root: PathBuf,
    /// Directories to transfer, relative to the root
    pub directories: Vec<PathBuf>,
    /// Metadata consumed by the target's re-attach
    pub metadata: BTreeMap<String, String>,
}

impl Fileset {
    /// Metadata keys understood by the post-migration re-attach.
    pub const META_TYPE: &'static str = "database_type";
    pub const META_NAME: &'static str = "database_name";
    pub const META_COMPARATOR: &'static str = "comparison_function";
    pub const META_NO_OVERWRITE: &'static str = "no_overwrite";
}

/// Fields every backend carries.
#[derive(Default)]
pub(crate) struct StoreCommon {
    pub name: String,
    pub path: String,
    pub comparator: Option<Comparator>,
    pub no_overwrite: bool,
    pub erase_on_get: bool,
    pub in_memory: bool,
}

/// The storage engine contract.
///
/// Configuration methods (`set_*`) are only valid before `open`; the
/// factory constructs, configures, opens, and only then shares the store.
pub trait DataStore: Send + Sync {
    fn db_type(&self) -> DbType;
    fn name(&self) -> &str;
    fn path(&self) -> &str;
    /// Name of the attached comparator, empty for the default order.
    fn comparator_name(&self) -> &str;
    fn no_overwrite(&self) -> bool;

    /// Idempotent preparation of storage. File-backed backends create
    /// intermediate directories; in-memory backends clear prior state.
    fn open(&mut self, name: &str, path: &str) -> KvResult<()>;

    /// Attach a user comparator. Backends whose internal ordering cannot
    /// honor one return `ComparisonFunction`.
    fn set_comparator(&mut self, comparator: Comparator) -> KvResult<()>;
    fn set_no_overwrite(&mut self);
    fn set_erase_on_get(&mut self, enable: bool);
    fn set_in_memory(&mut self, enable: bool);

    /// Insert a key. Under no-overwrite an existing key yields `KeyExists`
    /// and the stored value is untouched. Empty values are valid.
    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()>;

    /// Insert a batch. Under no-overwrite the contract is "at least one
    /// failed, not all inserted"; backends may or may not have applied a
    /// non-conflicting prefix before detecting the conflict.
    fn put_multi(&self, keys: &[&[u8]], values: &[&[u8]]) -> KvResult<()>;

    /// `put_multi` over concatenated buffers with explicit entry sizes.
    fn put_packed(
        &self,
        num_keys: usize,
        packed_keys: &[u8],
        ksizes: &[u64],
        packed_vals: &[u8],
        vsizes: &[u64],
    ) -> KvResult<()> {
        let keys = split_packed(packed_keys, &ksizes[..num_keys])?;
        let vals = split_packed(packed_vals, &vsizes[..num_keys])?;
        self.put_multi(&keys, &vals)
    }

    /// Look up a key.
    ///
    /// If `value` is empty on entry the backend allocates and hands over
    /// the bytes; otherwise it writes in place and truncates to the actual
    /// length, or returns `Size` when the buffer is too small. With
    /// erase-on-get set, a successful read erases the key afterwards (not
    /// atomically with the read).
    fn get(&self, key: &[u8], value: &mut DataSlice<'static>) -> KvResult<()>;

    /// Value length without copying. `None` for an absent key.
    fn length(&self, key: &[u8]) -> Option<usize>;

    fn exists(&self, key: &[u8]) -> bool;

    /// Remove a key; false if it was absent.
    fn erase(&self, key: &[u8]) -> bool;

    /// Durability barrier for persistent backends, no-op otherwise.
    fn sync(&self) -> KvResult<()>;

    /// Enumerate up to `max_count` keys strictly greater than `start`
    /// (empty start = from the first key) that begin with `prefix` (empty
    /// prefix = no filter), ascending under the database's order.
    ///
    /// If `out` is non-empty on entry, each element is a caller-sized slot:
    /// the backend writes entries in place, truncating slots to true
    /// lengths, keeps filling remaining slots after an overflow, and
    /// reports `Size` at the end. If `out` is empty the backend appends
    /// owned entries. On exit `out.len()` is the number of entries the
    /// backend attempted to produce.
    fn list_keys(
        &self,
        max_count: u64,
        start: &[u8],
        prefix: &[u8],
        out: &mut Vec<DataSlice<'static>>,
    ) -> KvResult<()>;

    /// Same contract as `list_keys`, producing key-value pairs.
    fn list_keyvals(
        &self,
        max_count: u64,
        start: &[u8],
        prefix: &[u8],
        out: &mut Vec<KeyValue>,
    ) -> KvResult<()>;

    /// Keys strictly between `lower` and `upper`, ascending. Optional.
    fn list_key_range(
        &self,
        _lower: &[u8],
        _upper: &[u8],
        _out: &mut Vec<DataSlice<'static>>,
    ) -> KvResult<()> {
        Err(KvError::OpNotImpl)
    }

    /// Key-value pairs strictly between `lower` and `upper`. Optional.
    fn list_keyval_range(
        &self,
        _lower: &[u8],
        _upper: &[u8],
        _out: &mut Vec<KeyValue>,
    ) -> KvResult<()> {
        Err(KvError::OpNotImpl)
    }

    /// Descriptor for whole-database migration, `None` for purely
    /// in-memory backends.
    fn create_fileset(&self) -> Option<Fileset>;
}

/// Instantiate an unopened backend of the given kind.
pub fn create_datastore(db_type: DbType) -> KvResult<Box<dyn DataStore>> {
    match db_type {
        DbType::Map => Ok(Box::new(MapDataStore::new())),
        DbType::Null => Ok(Box::new(NullDataStore::new())),
        DbType::BTree => Ok(Box::new(BTreeDataStore::new())),
        DbType::Lsm => Ok(Box::new(LsmDataStore::new())),
        DbType::Forward => {
            tracing::error!("forwarding backend is not available");
            Err(KvError::DatabaseCreate)
        }
    }
}

/// Slice a concatenated buffer into entries according to `sizes`.
pub fn split_packed<'a>(packed: &'a [u8], sizes: &[u64]) -> KvResult<Vec<&'a [u8]>> {
    let mut out = Vec::with_capacity(sizes.len());
    let mut offset = 0usize;
    for &size in sizes {
        let size = size as usize;
        let end = offset.checked_add(size).ok_or(KvError::Size)?;
        if end > packed.len() {
            return Err(KvError::Size);
        }
        out.push(&packed[offset..end]);
        offset = end;
    }
    Ok(out)
}

/// Outcome of testing a candidate key against the prefix filter during an
/// ascending scan.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PrefixCheck {
    /// Key begins with the prefix
    Match,
    /// Key is below the prefix range, keep scanning
    Skip,
    /// The order has passed the prefix range, no later key can match
    Stop,
}

/// Byte-wise prefix test.
///
/// The `Stop` outcome is only sound under the default lexicographic order;
/// scans over a user comparator must treat it as `Skip`.
pub(crate) fn check_prefix(prefix: &[u8], key: &[u8]) -> PrefixCheck {
    if prefix.is_empty() {
        return PrefixCheck::Match;
    }
    if key.len() < prefix.len() {
        // the key can only be a strict prefix of `prefix` or diverge
        return match prefix[..key.len()].cmp(key) {
            std::cmp::Ordering::Less => PrefixCheck::Stop,
            _ => PrefixCheck::Skip,
        };
    }
    match prefix.cmp(&key[..prefix.len()]) {
        std::cmp::Ordering::Equal => PrefixCheck::Match,
        std::cmp::Ordering::Greater => PrefixCheck::Skip,
        std::cmp::Ordering::Less => PrefixCheck::Stop,
    }
}

/// Fill a get/list output slot in either delivery mode.
///
/// Empty slot: take ownership of `found`. Sized slot: copy in place and
/// truncate to the true length, or report `Size` (the slot is still
/// truncated to the true length so the caller learns what it needed).
pub(crate) fn fill_slot(found: &[u8], out: &mut DataSlice<'static>) -> KvResult<()> {
    if out.is_empty() {
        *out = DataSlice::from_vec(found.to_vec());
        return Ok(());
    }
    if out.len() >= found.len() {
        out.as_mut_slice()[..found.len()].copy_from_slice(found);
        out.truncate(found.len());
        Ok(())
    } else {
        out.resize(found.len());
        Err(KvError::Size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_type_parse() {
        assert_eq!(DbType::parse("map"), Some(DbType::Map));
        assert_eq!(DbType::parse("ldb"), Some(DbType::Lsm));
        assert_eq!(DbType::parse("leveldb"), Some(DbType::Lsm));
        assert_eq!(DbType::parse("bdb"), Some(DbType::BTree));
        assert_eq!(DbType::parse("fwd"), Some(DbType::Forward));
        assert_eq!(DbType::parse("bwt"), None);
    }

    #[test]
    fn test_split_packed() {
        let buf = b"abcdef";
        let parts = split_packed(buf, &[2, 0, 4]).unwrap();
        assert_eq!(parts, vec![&b"ab"[..], &b""[..], &b"cdef"[..]]);

        assert!(split_packed(buf, &[7]).is_err());
    }

    #[test]
    fn test_check_prefix() {
        assert_eq!(check_prefix(b"", b"anything"), PrefixCheck::Match);
        assert_eq!(check_prefix(b"ab", b"abc"), PrefixCheck::Match);
        assert_eq!(check_prefix(b"ab", b"ab"), PrefixCheck::Match);
        assert_eq!(check_prefix(b"ab", b"aa"), PrefixCheck::Skip);
        assert_eq!(check_prefix(b"ab", b"ac"), PrefixCheck::Stop);
        assert_eq!(check_prefix(b"ab", b"a"), PrefixCheck::Skip);
        assert_eq!(check_prefix(b"ab", b"b"), PrefixCheck::Stop);
    }

    #[test]
    fn test_forward_refused() {
        assert!(matches!(
            create_datastore(DbType::Forward),
            Err(KvError::DatabaseCreate)
        ));
    }
}
