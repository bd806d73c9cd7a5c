//! RPC wire surface
//!
//! Operation codes, request/response message types, and the low-level
//! encoding helpers. Inline operands travel in the request/response
//! bodies; bulk operands are named by [`BulkHandle`]s and move through the
//! transport's pull/push channels.

pub mod messages;
pub mod packet;
pub mod wire;

pub use messages::*;
pub use wire::{WireError, WireReader, WireWriter};

/// Integer-coded RPC operations.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Open = 0x01,
    CountDatabases = 0x02,
    ListDatabases = 0x03,
    Put = 0x04,
    PutMulti = 0x05,
    PutPacked = 0x06,
    BulkPut = 0x07,
    Get = 0x08,
    GetMulti = 0x09,
    GetPacked = 0x0a,
    BulkGet = 0x0b,
    Length = 0x0c,
    LengthMulti = 0x0d,
    LengthPacked = 0x0e,
    Exists = 0x0f,
    ExistsMulti = 0x10,
    Erase = 0x11,
    EraseMulti = 0x12,
    ListKeys = 0x13,
    ListKeyvals = 0x14,
    MigrateKeys = 0x15,
    MigrateKeyRange = 0x16,
    MigrateKeysPrefixed = 0x17,
    MigrateAllKeys = 0x18,
    MigrateDatabase = 0x19,
}

impl Op {
    pub fn from_u8(code: u8) -> Result<Op, WireError> {
        Ok(match code {
            0x01 => Op::Open,
            0x02 => Op::CountDatabases,
            0x03 => Op::ListDatabases,
            0x04 => Op::Put,
            0x05 => Op::PutMulti,
            0x06 => Op::PutPacked,
            0x07 => Op::BulkPut,
            0x08 => Op::Get,
            0x09 => Op::GetMulti,
            0x0a => Op::GetPacked,
            0x0b => Op::BulkGet,
            0x0c => Op::Length,
            0x0d => Op::LengthMulti,
            0x0e => Op::LengthPacked,
            0x0f => Op::Exists,
            0x10 => Op::ExistsMulti,
            0x11 => Op::Erase,
            0x12 => Op::EraseMulti,
            0x13 => Op::ListKeys,
            0x14 => Op::ListKeyvals,
            0x15 => Op::MigrateKeys,
            0x16 => Op::MigrateKeyRange,
            0x17 => Op::MigrateKeysPrefixed,
            0x18 => Op::MigrateAllKeys,
            0x19 => Op::MigrateDatabase,
            other => return Err(WireError::UnknownOp(other)),
        })
    }
}

/// Name of a caller-exposed buffer region for bulk transfer.
///
/// The id is scoped to the originating call; the length is the full
/// exposed size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkHandle {
    pub id: u64,
    pub len: u64,
}

impl BulkHandle {
    pub fn encode(&self, w: &mut WireWriter) {
        w.u64(self.id);
        w.u64(self.len);
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<BulkHandle, WireError> {
        Ok(BulkHandle {
            id: r.u64()?,
            len: r.u64()?,
        })
    }
}

/// Flag value selecting remove-original behavior in migration requests.
pub const REMOVE_ORIGINAL: u8 = 1;
pub const KEEP_ORIGINAL: u8 = 0;

/// Sentinel in a returned value-sizes header marking a missing key in
/// `get_packed` responses, distinct from 0 (oversize or empty value).
pub const MISSING_KEY_SIZE: u64 = u64::MAX;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_codes_round_trip() {
        for code in 0x01..=0x19u8 {
            let op = Op::from_u8(code).unwrap();
            assert_eq!(op as u8, code);
        }
        assert!(Op::from_u8(0).is_err());
        assert!(Op::from_u8(0x42).is_err());
    }
}
