//! Request and response bodies for every operation
//!
//! Each type encodes to and decodes from a flat little-endian layout.
//! Responses always lead with the i32 status so clients can check `ret`
//! before interpreting the rest.

use super::wire::{WireError, WireReader, WireWriter};
use super::BulkHandle;

/// Response carrying only a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusOut {
    pub ret: i32,
}

impl StatusOut {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.i32(self.ret);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(StatusOut { ret: r.i32()? })
    }
}

#[derive(Debug, Clone)]
pub struct OpenIn {
    pub name: String,
}

impl OpenIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.str(&self.name);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(OpenIn { name: r.str()? })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OpenOut {
    pub ret: i32,
    pub db_id: u64,
}

impl OpenOut {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.i32(self.ret);
        w.u64(self.db_id);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(OpenOut {
            ret: r.i32()?,
            db_id: r.u64()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CountDbOut {
    pub ret: i32,
    pub count: u64,
}

impl CountDbOut {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.i32(self.ret);
        w.u64(self.count);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(CountDbOut {
            ret: r.i32()?,
            count: r.u64()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListDbIn {
    pub max: u64,
}

impl ListDbIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.max);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(ListDbIn { max: r.u64()? })
    }
}

#[derive(Debug, Clone)]
pub struct ListDbOut {
    pub ret: i32,
    pub names: Vec<String>,
    pub ids: Vec<u64>,
}

impl ListDbOut {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.i32(self.ret);
        w.u64(self.names.len() as u64);
        for name in &self.names {
            w.str(name);
        }
        for id in &self.ids {
            w.u64(*id);
        }
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        let ret = r.i32()?;
        let count = r.u64()? as usize;
        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            names.push(r.str()?);
        }
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(r.u64()?);
        }
        Ok(ListDbOut { ret, names, ids })
    }
}

#[derive(Debug, Clone)]
pub struct PutIn {
    pub db_id: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl PutIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.db_id);
        w.bytes(&self.key);
        w.bytes(&self.value);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(PutIn {
            db_id: r.u64()?,
            key: r.bytes()?,
            value: r.bytes()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PutMultiIn {
    pub db_id: u64,
    pub num_keys: u64,
    pub keys_bulk: BulkHandle,
    pub vals_bulk: BulkHandle,
}

impl PutMultiIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.db_id);
        w.u64(self.num_keys);
        self.keys_bulk.encode(&mut w);
        self.vals_bulk.encode(&mut w);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(PutMultiIn {
            db_id: r.u64()?,
            num_keys: r.u64()?,
            keys_bulk: BulkHandle::decode(&mut r)?,
            vals_bulk: BulkHandle::decode(&mut r)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PutPackedIn {
    pub db_id: u64,
    pub num_keys: u64,
    /// Empty means "pull from the requesting origin"
    pub origin_addr: String,
    pub bulk: BulkHandle,
}

impl PutPackedIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.db_id);
        w.u64(self.num_keys);
        w.str(&self.origin_addr);
        self.bulk.encode(&mut w);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(PutPackedIn {
            db_id: r.u64()?,
            num_keys: r.u64()?,
            origin_addr: r.str()?,
            bulk: BulkHandle::decode(&mut r)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BulkPutIn {
    pub db_id: u64,
    pub key: Vec<u8>,
    pub vsize: u64,
    pub value_bulk: BulkHandle,
}

impl BulkPutIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.db_id);
        w.bytes(&self.key);
        w.u64(self.vsize);
        self.value_bulk.encode(&mut w);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(BulkPutIn {
            db_id: r.u64()?,
            key: r.bytes()?,
            vsize: r.u64()?,
            value_bulk: BulkHandle::decode(&mut r)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GetIn {
    pub db_id: u64,
    pub key: Vec<u8>,
    /// Client's value-buffer allowance; the value rides inline only when
    /// it fits
    pub vsize: u64,
}

impl GetIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.db_id);
        w.bytes(&self.key);
        w.u64(self.vsize);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(GetIn {
            db_id: r.u64()?,
            key: r.bytes()?,
            vsize: r.u64()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GetOut {
    pub ret: i32,
    /// True value size (reported even when the value did not fit)
    pub vsize: u64,
    pub value: Vec<u8>,
}

impl GetOut {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.i32(self.ret);
        w.u64(self.vsize);
        w.bytes(&self.value);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(GetOut {
            ret: r.i32()?,
            vsize: r.u64()?,
            value: r.bytes()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GetMultiIn {
    pub db_id: u64,
    pub num_keys: u64,
    pub keys_bulk: BulkHandle,
    /// Read-write: allowances on entry, sizes header plus packed values on
    /// exit
    pub vals_bulk: BulkHandle,
}

impl GetMultiIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.db_id);
        w.u64(self.num_keys);
        self.keys_bulk.encode(&mut w);
        self.vals_bulk.encode(&mut w);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(GetMultiIn {
            db_id: r.u64()?,
            num_keys: r.u64()?,
            keys_bulk: BulkHandle::decode(&mut r)?,
            vals_bulk: BulkHandle::decode(&mut r)?,
        })
    }
}

pub type GetPackedIn = GetMultiIn;

#[derive(Debug, Clone, Copy)]
pub struct GetPackedOut {
    pub ret: i32,
    /// Number of values actually delivered
    pub num_keys: u64,
}

impl GetPackedOut {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.i32(self.ret);
        w.u64(self.num_keys);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(GetPackedOut {
            ret: r.i32()?,
            num_keys: r.u64()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BulkGetIn {
    pub db_id: u64,
    pub key: Vec<u8>,
    pub vsize: u64,
    pub value_bulk: BulkHandle,
}

impl BulkGetIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.db_id);
        w.bytes(&self.key);
        w.u64(self.vsize);
        self.value_bulk.encode(&mut w);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(BulkGetIn {
            db_id: r.u64()?,
            key: r.bytes()?,
            vsize: r.u64()?,
            value_bulk: BulkHandle::decode(&mut r)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BulkGetOut {
    pub ret: i32,
    pub vsize: u64,
}

impl BulkGetOut {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.i32(self.ret);
        w.u64(self.vsize);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(BulkGetOut {
            ret: r.i32()?,
            vsize: r.u64()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct KeyIn {
    pub db_id: u64,
    pub key: Vec<u8>,
}

impl KeyIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.db_id);
        w.bytes(&self.key);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(KeyIn {
            db_id: r.u64()?,
            key: r.bytes()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LengthOut {
    pub ret: i32,
    pub size: u64,
}

impl LengthOut {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.i32(self.ret);
        w.u64(self.size);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(LengthOut {
            ret: r.i32()?,
            size: r.u64()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExistsOut {
    pub ret: i32,
    pub flag: u8,
}

impl ExistsOut {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.i32(self.ret);
        w.u8(self.flag);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(ExistsOut {
            ret: r.i32()?,
            flag: r.u8()?,
        })
    }
}

/// Batched request over one keys buffer and one output buffer.
///
/// Serves length_multi (sizes out), length_packed (sizes out),
/// exists_multi (bit-packed flags out), and erase_multi (no output bulk,
/// handle length 0).
#[derive(Debug, Clone, Copy)]
pub struct KeysBulkIn {
    pub db_id: u64,
    pub num_keys: u64,
    pub keys_bulk: BulkHandle,
    pub out_bulk: BulkHandle,
}

impl KeysBulkIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.db_id);
        w.u64(self.num_keys);
        self.keys_bulk.encode(&mut w);
        self.out_bulk.encode(&mut w);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(KeysBulkIn {
            db_id: r.u64()?,
            num_keys: r.u64()?,
            keys_bulk: BulkHandle::decode(&mut r)?,
            out_bulk: BulkHandle::decode(&mut r)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ListKeysIn {
    pub db_id: u64,
    pub max_keys: u64,
    pub start: Vec<u8>,
    pub prefix: Vec<u8>,
    /// Read-write: allowances on entry, true sizes on exit
    pub ksizes_bulk: BulkHandle,
    /// Write-only: one allowance-sized slot per key
    pub keys_bulk: BulkHandle,
}

impl ListKeysIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.db_id);
        w.u64(self.max_keys);
        w.bytes(&self.start);
        w.bytes(&self.prefix);
        self.ksizes_bulk.encode(&mut w);
        self.keys_bulk.encode(&mut w);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(ListKeysIn {
            db_id: r.u64()?,
            max_keys: r.u64()?,
            start: r.bytes()?,
            prefix: r.bytes()?,
            ksizes_bulk: BulkHandle::decode(&mut r)?,
            keys_bulk: BulkHandle::decode(&mut r)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListKeysOut {
    pub ret: i32,
    pub nkeys: u64,
}

impl ListKeysOut {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.i32(self.ret);
        w.u64(self.nkeys);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(ListKeysOut {
            ret: r.i32()?,
            nkeys: r.u64()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ListKeyvalsIn {
    pub db_id: u64,
    pub max_keys: u64,
    pub start: Vec<u8>,
    pub prefix: Vec<u8>,
    pub ksizes_bulk: BulkHandle,
    pub vsizes_bulk: BulkHandle,
    pub keys_bulk: BulkHandle,
    pub vals_bulk: BulkHandle,
}

impl ListKeyvalsIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.db_id);
        w.u64(self.max_keys);
        w.bytes(&self.start);
        w.bytes(&self.prefix);
        self.ksizes_bulk.encode(&mut w);
        self.vsizes_bulk.encode(&mut w);
        self.keys_bulk.encode(&mut w);
        self.vals_bulk.encode(&mut w);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(ListKeyvalsIn {
            db_id: r.u64()?,
            max_keys: r.u64()?,
            start: r.bytes()?,
            prefix: r.bytes()?,
            ksizes_bulk: BulkHandle::decode(&mut r)?,
            vsizes_bulk: BulkHandle::decode(&mut r)?,
            keys_bulk: BulkHandle::decode(&mut r)?,
            vals_bulk: BulkHandle::decode(&mut r)?,
        })
    }
}

/// Destination of a key migration.
#[derive(Debug, Clone)]
pub struct MigrateTarget {
    pub addr: String,
    pub provider_id: u16,
    pub db_id: u64,
}

impl MigrateTarget {
    fn encode(&self, w: &mut WireWriter) {
        w.str(&self.addr);
        w.u16(self.provider_id);
        w.u64(self.db_id);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(MigrateTarget {
            addr: r.str()?,
            provider_id: r.u16()?,
            db_id: r.u64()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MigrateKeysIn {
    pub source_db_id: u64,
    pub target: MigrateTarget,
    pub num_keys: u64,
    pub keys_bulk: BulkHandle,
    pub flag: u8,
}

impl MigrateKeysIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.source_db_id);
        self.target.encode(&mut w);
        w.u64(self.num_keys);
        self.keys_bulk.encode(&mut w);
        w.u8(self.flag);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(MigrateKeysIn {
            source_db_id: r.u64()?,
            target: MigrateTarget::decode(&mut r)?,
            num_keys: r.u64()?,
            keys_bulk: BulkHandle::decode(&mut r)?,
            flag: r.u8()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MigrateKeyRangeIn {
    pub source_db_id: u64,
    pub target: MigrateTarget,
    pub lower: Vec<u8>,
    pub upper: Vec<u8>,
    pub flag: u8,
}

impl MigrateKeyRangeIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.source_db_id);
        self.target.encode(&mut w);
        w.bytes(&self.lower);
        w.bytes(&self.upper);
        w.u8(self.flag);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(MigrateKeyRangeIn {
            source_db_id: r.u64()?,
            target: MigrateTarget::decode(&mut r)?,
            lower: r.bytes()?,
            upper: r.bytes()?,
            flag: r.u8()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MigrateKeysPrefixedIn {
    pub source_db_id: u64,
    pub target: MigrateTarget,
    pub prefix: Vec<u8>,
    pub flag: u8,
}

impl MigrateKeysPrefixedIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.source_db_id);
        self.target.encode(&mut w);
        w.bytes(&self.prefix);
        w.u8(self.flag);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(MigrateKeysPrefixedIn {
            source_db_id: r.u64()?,
            target: MigrateTarget::decode(&mut r)?,
            prefix: r.bytes()?,
            flag: r.u8()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MigrateAllKeysIn {
    pub source_db_id: u64,
    pub target: MigrateTarget,
    pub flag: u8,
}

impl MigrateAllKeysIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.source_db_id);
        self.target.encode(&mut w);
        w.u8(self.flag);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(MigrateAllKeysIn {
            source_db_id: r.u64()?,
            target: MigrateTarget::decode(&mut r)?,
            flag: r.u8()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MigrateDatabaseIn {
    pub source_db_id: u64,
    /// Address of the node hosting the destination file-migration endpoint
    pub dest_addr: String,
    pub dest_provider_id: u16,
    /// Root directory the fileset lands under on the destination
    pub dest_root: String,
    pub remove_src: u8,
}

impl MigrateDatabaseIn {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.u64(self.source_db_id);
        w.str(&self.dest_addr);
        w.u16(self.dest_provider_id);
        w.str(&self.dest_root);
        w.u8(self.remove_src);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(MigrateDatabaseIn {
            source_db_id: r.u64()?,
            dest_addr: r.str()?,
            dest_provider_id: r.u16()?,
            dest_root: r.str()?,
            remove_src: r.u8()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MigrateDatabaseOut {
    pub ret: i32,
    /// The file-migration collaborator's own status
    pub migrator_ret: i32,
}

impl MigrateDatabaseOut {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.i32(self.ret);
        w.i32(self.migrator_ret);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(buf);
        Ok(MigrateDatabaseOut {
            ret: r.i32()?,
            migrator_ret: r.i32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_in_round_trip() {
        let msg = PutIn {
            db_id: 42,
            key: b"key".to_vec(),
            value: b"value".to_vec(),
        };
        let decoded = PutIn::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.db_id, 42);
        assert_eq!(decoded.key, b"key");
        assert_eq!(decoded.value, b"value");
    }

    #[test]
    fn test_list_db_out_round_trip() {
        let msg = ListDbOut {
            ret: 0,
            names: vec!["alpha".to_string(), "beta".to_string()],
            ids: vec![1, 2],
        };
        let decoded = ListDbOut::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.names, msg.names);
        assert_eq!(decoded.ids, msg.ids);
    }

    #[test]
    fn test_migrate_keys_in_round_trip() {
        let msg = MigrateKeysIn {
            source_db_id: 9,
            target: MigrateTarget {
                addr: "local://peer".to_string(),
                provider_id: 3,
                db_id: 11,
            },
            num_keys: 4,
            keys_bulk: BulkHandle { id: 1, len: 128 },
            flag: super::super::REMOVE_ORIGINAL,
        };
        let decoded = MigrateKeysIn::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.target.addr, "local://peer");
        assert_eq!(decoded.target.provider_id, 3);
        assert_eq!(decoded.keys_bulk, msg.keys_bulk);
        assert_eq!(decoded.flag, 1);
    }

    #[test]
    fn test_truncated_message() {
        let msg = GetIn {
            db_id: 1,
            key: b"k".to_vec(),
            vsize: 10,
        };
        let buf = msg.encode();
        assert!(GetIn::decode(&buf[..buf.len() - 1]).is_err());
    }
}
