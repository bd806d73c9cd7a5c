//! Client side of the wire surface
//!
//! Builds request bodies, exposes bulk buffers with the packed layouts
//! the handlers expect, and interprets the pushed-back results. Works
//! over any [`ClientTransport`].

use std::sync::Arc;

use crate::error::{KvError, KvResult, CODE_OK};
use crate::protocol::wire::{read_sizes_header, write_sizes_header};
use crate::protocol::{
    BulkGetIn, BulkGetOut, BulkPutIn, CountDbOut, ExistsOut, GetIn, GetMultiIn, GetOut,
    GetPackedOut, KeyIn, KeysBulkIn, LengthOut, ListDbIn, ListDbOut, ListKeysIn, ListKeysOut,
    ListKeyvalsIn, MigrateAllKeysIn, MigrateDatabaseIn, MigrateDatabaseOut, MigrateKeyRangeIn, MigrateKeysIn,
    MigrateKeysPrefixedIn, MigrateTarget, Op, OpenIn, OpenOut, PutIn, PutMultiIn, PutPackedIn,
    StatusOut, BulkHandle, KEEP_ORIGINAL, MISSING_KEY_SIZE, REMOVE_ORIGINAL,
};
use crate::provider::DatabaseId;
use crate::transport::{BulkAccess, ClientTransport};

/// Default per-entry allowance for the self-sizing list calls.
const DEFAULT_LIST_ALLOWANCE: u64 = 128;

/// Result of a batched get: per key, the reported size and the delivered
/// bytes. A size of 0 with no bytes means the key was missing, its value
/// was empty, or the value exceeded the caller's allowance.
pub type MultiGetEntry = (u64, Option<Vec<u8>>);

/// Result of a packed get.
pub struct PackedGet {
    /// Values actually delivered by the server
    pub num_delivered: u64,
    /// Whether the server ran out of client buffer (`Size` status)
    pub truncated: bool,
    /// Per key: delivered bytes, or None for a missing key
    pub values: Vec<Option<Vec<u8>>>,
}

/// Handle on one provider at one endpoint.
pub struct Client {
    transport: Arc<dyn ClientTransport>,
    provider_id: u16,
}

fn check(ret: i32) -> KvResult<()> {
    if ret == CODE_OK {
        Ok(())
    } else {
        Err(KvError::from_code(ret))
    }
}

/// Sizes header followed by the concatenated entries.
fn pack_entries(entries: &[&[u8]]) -> Vec<u8> {
    let mut buf = vec![0u8; entries.len() * 8];
    let sizes: Vec<u64> = entries.iter().map(|e| e.len() as u64).collect();
    write_sizes_header(&mut buf, &sizes);
    for entry in entries {
        buf.extend_from_slice(entry);
    }
    buf
}

impl Client {
    pub fn new(transport: Arc<dyn ClientTransport>, provider_id: u16) -> Client {
        Client {
            transport,
            provider_id,
        }
    }

    async fn call(&self, op: Op, body: Vec<u8>) -> KvResult<Vec<u8>> {
        self.transport
            .call(self.provider_id, op, body)
            .await
            .map_err(KvError::from)
    }

    /// Resolve a database name to its id.
    pub async fn open(&self, name: &str) -> KvResult<DatabaseId> {
        let response = self
            .call(
                Op::Open,
                OpenIn {
                    name: name.to_string(),
                }
                .encode(),
            )
            .await?;
        let out = OpenOut::decode(&response)?;
        check(out.ret)?;
        Ok(out.db_id)
    }

    pub async fn count_databases(&self) -> KvResult<u64> {
        let response = self.call(Op::CountDatabases, Vec::new()).await?;
        let out = CountDbOut::decode(&response)?;
        check(out.ret)?;
        Ok(out.count)
    }

    pub async fn list_databases(&self, max: u64) -> KvResult<Vec<(String, DatabaseId)>> {
        let response = self
            .call(Op::ListDatabases, ListDbIn { max }.encode())
            .await?;
        let out = ListDbOut::decode(&response)?;
        check(out.ret)?;
        Ok(out.names.into_iter().zip(out.ids).collect())
    }

    pub async fn put(&self, db_id: DatabaseId, key: &[u8], value: &[u8]) -> KvResult<()> {
        let response = self
            .call(
                Op::Put,
                PutIn {
                    db_id,
                    key: key.to_vec(),
                    value: value.to_vec(),
                }
                .encode(),
            )
            .await?;
        check(StatusOut::decode(&response)?.ret)
    }

    pub async fn put_multi(
        &self,
        db_id: DatabaseId,
        keys: &[&[u8]],
        values: &[&[u8]],
    ) -> KvResult<()> {
        let keys_bulk = self
            .transport
            .expose(pack_entries(keys), BulkAccess::ReadOnly);
        let vals_bulk = self
            .transport
            .expose(pack_entries(values), BulkAccess::ReadOnly);
        let result = self
            .call(
                Op::PutMulti,
                PutMultiIn {
                    db_id,
                    num_keys: keys.len() as u64,
                    keys_bulk,
                    vals_bulk,
                }
                .encode(),
            )
            .await;
        self.transport.reclaim(keys_bulk);
        self.transport.reclaim(vals_bulk);
        check(StatusOut::decode(&result?)?.ret)
    }

    pub async fn put_packed(
        &self,
        db_id: DatabaseId,
        keys: &[&[u8]],
        values: &[&[u8]],
    ) -> KvResult<()> {
        // [ksize...][vsize...][keys...][vals...] in one buffer
        let n = keys.len();
        let mut buf = vec![0u8; 2 * n * 8];
        let ksizes: Vec<u64> = keys.iter().map(|k| k.len() as u64).collect();
        let vsizes: Vec<u64> = values.iter().map(|v| v.len() as u64).collect();
        write_sizes_header(&mut buf[..n * 8], &ksizes);
        write_sizes_header(&mut buf[n * 8..], &vsizes);
        for key in keys {
            buf.extend_from_slice(key);
        }
        for value in values {
            buf.extend_from_slice(value);
        }

        let bulk = self.transport.expose(buf, BulkAccess::ReadOnly);
        let result = self
            .call(
                Op::PutPacked,
                PutPackedIn {
                    db_id,
                    num_keys: n as u64,
                    origin_addr: String::new(),
                    bulk,
                }
                .encode(),
            )
            .await;
        self.transport.reclaim(bulk);
        check(StatusOut::decode(&result?)?.ret)
    }

    /// Put whose value travels by bulk transfer instead of inline.
    pub async fn bulk_put(&self, db_id: DatabaseId, key: &[u8], value: &[u8]) -> KvResult<()> {
        let value_bulk = self
            .transport
            .expose(value.to_vec(), BulkAccess::ReadOnly);
        let result = self
            .call(
                Op::BulkPut,
                BulkPutIn {
                    db_id,
                    key: key.to_vec(),
                    vsize: value.len() as u64,
                    value_bulk,
                }
                .encode(),
            )
            .await;
        self.transport.reclaim(value_bulk);
        check(StatusOut::decode(&result?)?.ret)
    }

    /// Point lookup with an inline value up to `vsize_allowance` bytes.
    pub async fn get(
        &self,
        db_id: DatabaseId,
        key: &[u8],
        vsize_allowance: u64,
    ) -> KvResult<Vec<u8>> {
        let response = self
            .call(
                Op::Get,
                GetIn {
                    db_id,
                    key: key.to_vec(),
                    vsize: vsize_allowance,
                }
                .encode(),
            )
            .await?;
        let out = GetOut::decode(&response)?;
        check(out.ret)?;
        Ok(out.value)
    }

    /// Point lookup whose value is pushed into a bulk buffer.
    pub async fn bulk_get(
        &self,
        db_id: DatabaseId,
        key: &[u8],
        vsize_allowance: u64,
    ) -> KvResult<Vec<u8>> {
        let value_bulk = self
            .transport
            .expose(vec![0u8; vsize_allowance as usize], BulkAccess::WriteOnly);
        let result = self
            .call(
                Op::BulkGet,
                BulkGetIn {
                    db_id,
                    key: key.to_vec(),
                    vsize: vsize_allowance,
                    value_bulk,
                }
                .encode(),
            )
            .await;
        let buf = self.transport.reclaim(value_bulk);
        let out = BulkGetOut::decode(&result?)?;
        check(out.ret)?;
        let mut value = buf.unwrap_or_default();
        value.truncate(out.vsize as usize);
        Ok(value)
    }

    /// Batched get. Per key the caller grants an allowance; values that
    /// fit come back with their size, anything else reports 0.
    pub async fn get_multi(
        &self,
        db_id: DatabaseId,
        keys: &[&[u8]],
        allowances: &[u64],
    ) -> KvResult<Vec<MultiGetEntry>> {
        let n = keys.len();
        let keys_bulk = self
            .transport
            .expose(pack_entries(keys), BulkAccess::ReadOnly);

        let payload: u64 = allowances.iter().sum();
        let mut vals_buf = vec![0u8; n * 8 + payload as usize];
        write_sizes_header(&mut vals_buf[..n * 8], allowances);
        let vals_bulk = self.transport.expose(vals_buf, BulkAccess::ReadWrite);

        let result = self
            .call(
                Op::GetMulti,
                GetMultiIn {
                    db_id,
                    num_keys: n as u64,
                    keys_bulk,
                    vals_bulk,
                }
                .encode(),
            )
            .await;
        self.transport.reclaim(keys_bulk);
        let vals_buf = self.transport.reclaim(vals_bulk).unwrap_or_default();
        check(StatusOut::decode(&result?)?.ret)?;

        // delivered values are packed tightly in key order; a 0 entry
        // transferred nothing
        let vsizes = read_sizes_header(&vals_buf, n)?;
        let mut out = Vec::with_capacity(n);
        let mut offset = n * 8;
        for &vsize in &vsizes {
            if vsize == 0 {
                out.push((0, None));
            } else {
                let value = vals_buf[offset..offset + vsize as usize].to_vec();
                offset += vsize as usize;
                out.push((vsize, Some(value)));
            }
        }
        Ok(out)
    }

    /// Packed get into one shared value buffer of `buf_size` bytes.
    pub async fn get_packed(
        &self,
        db_id: DatabaseId,
        keys: &[&[u8]],
        buf_size: u64,
    ) -> KvResult<PackedGet> {
        let n = keys.len();
        let keys_bulk = self
            .transport
            .expose(pack_entries(keys), BulkAccess::ReadOnly);
        let vals_bulk = self.transport.expose(
            vec![0u8; n * 8 + buf_size as usize],
            BulkAccess::WriteOnly,
        );

        let result = self
            .call(
                Op::GetPacked,
                GetMultiIn {
                    db_id,
                    num_keys: n as u64,
                    keys_bulk,
                    vals_bulk,
                }
                .encode(),
            )
            .await;
        self.transport.reclaim(keys_bulk);
        let vals_buf = self.transport.reclaim(vals_bulk).unwrap_or_default();
        let out = GetPackedOut::decode(&result?)?;
        let truncated = out.ret == KvError::Size.code();
        if !truncated {
            check(out.ret)?;
        }

        let vsizes = read_sizes_header(&vals_buf, n)?;
        let mut values = Vec::with_capacity(n);
        let mut offset = n * 8;
        for &vsize in &vsizes {
            if vsize == MISSING_KEY_SIZE {
                values.push(None);
            } else {
                let end = offset + vsize as usize;
                values.push(Some(vals_buf[offset..end].to_vec()));
                offset = end;
            }
        }
        Ok(PackedGet {
            num_delivered: out.num_keys,
            truncated,
            values,
        })
    }

    pub async fn length(&self, db_id: DatabaseId, key: &[u8]) -> KvResult<u64> {
        let response = self
            .call(
                Op::Length,
                KeyIn {
                    db_id,
                    key: key.to_vec(),
                }
                .encode(),
            )
            .await?;
        let out = LengthOut::decode(&response)?;
        check(out.ret)?;
        Ok(out.size)
    }

    async fn lengths(&self, op: Op, db_id: DatabaseId, keys: &[&[u8]]) -> KvResult<Vec<u64>> {
        let n = keys.len();
        let keys_bulk = self
            .transport
            .expose(pack_entries(keys), BulkAccess::ReadOnly);
        let out_bulk = self
            .transport
            .expose(vec![0u8; n * 8], BulkAccess::WriteOnly);
        let result = self
            .call(
                op,
                KeysBulkIn {
                    db_id,
                    num_keys: n as u64,
                    keys_bulk,
                    out_bulk,
                }
                .encode(),
            )
            .await;
        self.transport.reclaim(keys_bulk);
        let sizes_buf = self.transport.reclaim(out_bulk).unwrap_or_default();
        check(StatusOut::decode(&result?)?.ret)?;
        Ok(read_sizes_header(&sizes_buf, n)?)
    }

    /// Value lengths for a batch of keys; 0 for missing keys.
    pub async fn length_multi(&self, db_id: DatabaseId, keys: &[&[u8]]) -> KvResult<Vec<u64>> {
        self.lengths(Op::LengthMulti, db_id, keys).await
    }

    /// Packed variant of [`Client::length_multi`].
    pub async fn length_packed(&self, db_id: DatabaseId, keys: &[&[u8]]) -> KvResult<Vec<u64>> {
        self.lengths(Op::LengthPacked, db_id, keys).await
    }

    pub async fn exists(&self, db_id: DatabaseId, key: &[u8]) -> KvResult<bool> {
        let response = self
            .call(
                Op::Exists,
                KeyIn {
                    db_id,
                    key: key.to_vec(),
                }
                .encode(),
            )
            .await?;
        let out = ExistsOut::decode(&response)?;
        check(out.ret)?;
        Ok(out.flag != 0)
    }

    pub async fn exists_multi(&self, db_id: DatabaseId, keys: &[&[u8]]) -> KvResult<Vec<bool>> {
        let n = keys.len();
        let keys_bulk = self
            .transport
            .expose(pack_entries(keys), BulkAccess::ReadOnly);
        let out_bulk = self
            .transport
            .expose(vec![0u8; n.div_ceil(8)], BulkAccess::WriteOnly);
        let result = self
            .call(
                Op::ExistsMulti,
                KeysBulkIn {
                    db_id,
                    num_keys: n as u64,
                    keys_bulk,
                    out_bulk,
                }
                .encode(),
            )
            .await;
        self.transport.reclaim(keys_bulk);
        let flags = self.transport.reclaim(out_bulk).unwrap_or_default();
        check(StatusOut::decode(&result?)?.ret)?;
        Ok((0..n).map(|i| flags[i / 8] & (1 << (i % 8)) != 0).collect())
    }

    pub async fn erase(&self, db_id: DatabaseId, key: &[u8]) -> KvResult<()> {
        let response = self
            .call(
                Op::Erase,
                KeyIn {
                    db_id,
                    key: key.to_vec(),
                }
                .encode(),
            )
            .await?;
        check(StatusOut::decode(&response)?.ret)
    }

    pub async fn erase_multi(&self, db_id: DatabaseId, keys: &[&[u8]]) -> KvResult<()> {
        let keys_bulk = self
            .transport
            .expose(pack_entries(keys), BulkAccess::ReadOnly);
        let result = self
            .call(
                Op::EraseMulti,
                KeysBulkIn {
                    db_id,
                    num_keys: keys.len() as u64,
                    keys_bulk,
                    out_bulk: BulkHandle { id: 0, len: 0 },
                }
                .encode(),
            )
            .await;
        self.transport.reclaim(keys_bulk);
        check(StatusOut::decode(&result?)?.ret)
    }

    /// Enumerate keys with explicit per-slot allowances. Returns the
    /// status-checked keys; on a `Size` failure the error carries no
    /// sizes, use [`Client::list_keys`] for self-sizing behavior.
    pub async fn list_keys_with_allowances(
        &self,
        db_id: DatabaseId,
        max_keys: u64,
        start: &[u8],
        prefix: &[u8],
        allowances: &[u64],
    ) -> KvResult<Vec<Vec<u8>>> {
        let (ret, nkeys, true_sizes, keys_buf) = self
            .list_keys_raw(db_id, max_keys, start, prefix, allowances)
            .await?;
        check(ret)?;
        let mut keys = Vec::with_capacity(nkeys);
        let mut offset = 0usize;
        for i in 0..nkeys {
            keys.push(keys_buf[offset..offset + true_sizes[i] as usize].to_vec());
            offset += allowances[i] as usize;
        }
        Ok(keys)
    }

    async fn list_keys_raw(
        &self,
        db_id: DatabaseId,
        max_keys: u64,
        start: &[u8],
        prefix: &[u8],
        allowances: &[u64],
    ) -> KvResult<(i32, usize, Vec<u64>, Vec<u8>)> {
        let n = max_keys as usize;
        let mut ksizes_buf = vec![0u8; n * 8];
        write_sizes_header(&mut ksizes_buf, allowances);
        let ksizes_bulk = self.transport.expose(ksizes_buf, BulkAccess::ReadWrite);
        let payload: u64 = allowances.iter().sum();
        let keys_bulk = self
            .transport
            .expose(vec![0u8; payload as usize], BulkAccess::WriteOnly);

        let result = self
            .call(
                Op::ListKeys,
                ListKeysIn {
                    db_id,
                    max_keys,
                    start: start.to_vec(),
                    prefix: prefix.to_vec(),
                    ksizes_bulk,
                    keys_bulk,
                }
                .encode(),
            )
            .await;
        let ksizes_buf = self.transport.reclaim(ksizes_bulk).unwrap_or_default();
        let keys_buf = self.transport.reclaim(keys_bulk).unwrap_or_default();
        let out = ListKeysOut::decode(&result?)?;
        let true_sizes = read_sizes_header(&ksizes_buf, n)?;
        Ok((out.ret, out.nkeys as usize, true_sizes, keys_buf))
    }

    /// Enumerate keys, sizing slots automatically: a first pass with a
    /// default allowance, and one retry with the reported true sizes if
    /// any key exceeded it.
    pub async fn list_keys(
        &self,
        db_id: DatabaseId,
        max_keys: u64,
        start: &[u8],
        prefix: &[u8],
    ) -> KvResult<Vec<Vec<u8>>> {
        let allowances = vec![DEFAULT_LIST_ALLOWANCE; max_keys as usize];
        let (ret, nkeys, true_sizes, keys_buf) = self
            .list_keys_raw(db_id, max_keys, start, prefix, &allowances)
            .await?;
        if ret == CODE_OK {
            let mut keys = Vec::with_capacity(nkeys);
            let mut offset = 0usize;
            for i in 0..nkeys {
                keys.push(keys_buf[offset..offset + true_sizes[i] as usize].to_vec());
                offset += allowances[i] as usize;
            }
            return Ok(keys);
        }
        if ret != KvError::Size.code() {
            return Err(KvError::from_code(ret));
        }
        self.list_keys_with_allowances(db_id, max_keys, start, prefix, &true_sizes)
            .await
    }

    /// Enumerate key-value pairs with explicit allowances.
    pub async fn list_keyvals(
        &self,
        db_id: DatabaseId,
        max_keys: u64,
        start: &[u8],
        prefix: &[u8],
        key_allowances: &[u64],
        val_allowances: &[u64],
    ) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let n = max_keys as usize;
        let mut ksizes_buf = vec![0u8; n * 8];
        write_sizes_header(&mut ksizes_buf, key_allowances);
        let ksizes_bulk = self.transport.expose(ksizes_buf, BulkAccess::ReadWrite);
        let mut vsizes_buf = vec![0u8; n * 8];
        write_sizes_header(&mut vsizes_buf, val_allowances);
        let vsizes_bulk = self.transport.expose(vsizes_buf, BulkAccess::ReadWrite);

        let keys_payload: u64 = key_allowances.iter().sum();
        let keys_bulk = self
            .transport
            .expose(vec![0u8; keys_payload as usize], BulkAccess::WriteOnly);
        let vals_payload: u64 = val_allowances.iter().sum();
        let vals_bulk = self
            .transport
            .expose(vec![0u8; vals_payload as usize], BulkAccess::WriteOnly);

        let result = self
            .call(
                Op::ListKeyvals,
                ListKeyvalsIn {
                    db_id,
                    max_keys,
                    start: start.to_vec(),
                    prefix: prefix.to_vec(),
                    ksizes_bulk,
                    vsizes_bulk,
                    keys_bulk,
                    vals_bulk,
                }
                .encode(),
            )
            .await;
        let ksizes_buf = self.transport.reclaim(ksizes_bulk).unwrap_or_default();
        let vsizes_buf = self.transport.reclaim(vsizes_bulk).unwrap_or_default();
        let keys_buf = self.transport.reclaim(keys_bulk).unwrap_or_default();
        let vals_buf = self.transport.reclaim(vals_bulk).unwrap_or_default();

        let out = ListKeysOut::decode(&result?)?;
        check(out.ret)?;
        let nkeys = out.nkeys as usize;
        let true_ksizes = read_sizes_header(&ksizes_buf, n)?;
        let true_vsizes = read_sizes_header(&vsizes_buf, n)?;

        let mut pairs = Vec::with_capacity(nkeys);
        let mut key_offset = 0usize;
        let mut val_offset = 0usize;
        for i in 0..nkeys {
            let key = keys_buf[key_offset..key_offset + true_ksizes[i] as usize].to_vec();
            let value = vals_buf[val_offset..val_offset + true_vsizes[i] as usize].to_vec();
            key_offset += key_allowances[i] as usize;
            val_offset += val_allowances[i] as usize;
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    fn flag(remove_original: bool) -> u8 {
        if remove_original {
            REMOVE_ORIGINAL
        } else {
            KEEP_ORIGINAL
        }
    }

    /// Migrate an explicit set of keys to a database on a peer provider.
    pub async fn migrate_keys(
        &self,
        source_db_id: DatabaseId,
        target: MigrateTarget,
        keys: &[&[u8]],
        remove_original: bool,
    ) -> KvResult<()> {
        let keys_bulk = self
            .transport
            .expose(pack_entries(keys), BulkAccess::ReadOnly);
        let result = self
            .call(
                Op::MigrateKeys,
                MigrateKeysIn {
                    source_db_id,
                    target,
                    num_keys: keys.len() as u64,
                    keys_bulk,
                    flag: Self::flag(remove_original),
                }
                .encode(),
            )
            .await;
        self.transport.reclaim(keys_bulk);
        check(StatusOut::decode(&result?)?.ret)
    }

    pub async fn migrate_key_range(
        &self,
        source_db_id: DatabaseId,
        target: MigrateTarget,
        lower: &[u8],
        upper: &[u8],
        remove_original: bool,
    ) -> KvResult<()> {
        let response = self
            .call(
                Op::MigrateKeyRange,
                MigrateKeyRangeIn {
                    source_db_id,
                    target,
                    lower: lower.to_vec(),
                    upper: upper.to_vec(),
                    flag: Self::flag(remove_original),
                }
                .encode(),
            )
            .await?;
        check(StatusOut::decode(&response)?.ret)
    }

    pub async fn migrate_keys_prefixed(
        &self,
        source_db_id: DatabaseId,
        target: MigrateTarget,
        prefix: &[u8],
        remove_original: bool,
    ) -> KvResult<()> {
        let response = self
            .call(
                Op::MigrateKeysPrefixed,
                MigrateKeysPrefixedIn {
                    source_db_id,
                    target,
                    prefix: prefix.to_vec(),
                    flag: Self::flag(remove_original),
                }
                .encode(),
            )
            .await?;
        check(StatusOut::decode(&response)?.ret)
    }

    pub async fn migrate_all_keys(
        &self,
        source_db_id: DatabaseId,
        target: MigrateTarget,
        remove_original: bool,
    ) -> KvResult<()> {
        let response = self
            .call(
                Op::MigrateAllKeys,
                MigrateAllKeysIn {
                    source_db_id,
                    target,
                    flag: Self::flag(remove_original),
                }
                .encode(),
            )
            .await?;
        check(StatusOut::decode(&response)?.ret)
    }

    /// Move a whole database through the file-migration collaborator.
    /// Returns the collaborator's own status alongside any error.
    pub async fn migrate_database(
        &self,
        source_db_id: DatabaseId,
        dest_addr: &str,
        dest_provider_id: u16,
        dest_root: &str,
        remove_original: bool,
    ) -> KvResult<i32> {
        let response = self
            .call(
                Op::MigrateDatabase,
                MigrateDatabaseIn {
                    source_db_id,
                    dest_addr: dest_addr.to_string(),
                    dest_provider_id,
                    dest_root: dest_root.to_string(),
                    remove_src: Self::flag(remove_original),
                }
                .encode(),
            )
            .await?;
        let out = MigrateDatabaseOut::decode(&response)?;
        check(out.ret)?;
        Ok(out.migrator_ret)
    }
}
