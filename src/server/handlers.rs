//! Handlers for the key-value operations
//!
//! Each handler produces the encoded output type for its operation on
//! every exit path, success or failure, so clients can always decode the
//! response.

use std::sync::Arc;

use crate::datastore::{split_packed, DataStore};
use crate::error::{KvError, CODE_OK};
use crate::protocol::wire::{read_sizes_header, write_sizes_header};
use crate::protocol::{
    BulkGetIn, BulkGetOut, BulkPutIn, CountDbOut, ExistsOut, GetIn, GetMultiIn, GetOut,
    GetPackedIn, GetPackedOut, KeyIn, KeysBulkIn, LengthOut, ListDbIn, ListDbOut, ListKeysIn,
    ListKeysOut, ListKeyvalsIn, OpenIn, OpenOut, PutIn, PutMultiIn, PutPackedIn, StatusOut,
    MISSING_KEY_SIZE,
};
use crate::slice::DataSlice;
use crate::transport::{BulkChannel, Forwarder, TransportError};

use super::Node;

pub(super) fn status(ret: i32) -> Vec<u8> {
    StatusOut { ret }.encode()
}

fn transport_code(e: TransportError) -> i32 {
    tracing::error!(error = %e, "bulk transfer failed");
    KvError::from(e).code()
}

/// Locate the database for a request, with the provider lock held for the
/// lookup only.
pub(super) fn find_db(
    node: &Node,
    provider_id: u16,
    db_id: u64,
) -> Result<Arc<dyn DataStore>, i32> {
    let provider = node.provider(provider_id).map_err(|e| {
        tracing::error!(provider_id, "could not find provider");
        e.code()
    })?;
    provider.find_by_id(db_id).map_err(|e| {
        tracing::error!(db_id, "could not find database");
        e.code()
    })
}

pub(super) fn open(node: &Node, provider_id: u16, body: &[u8]) -> Vec<u8> {
    let fail = |ret| OpenOut { ret, db_id: 0 }.encode();
    let provider = match node.provider(provider_id) {
        Ok(p) => p,
        Err(e) => return fail(e.code()),
    };
    let input = match OpenIn::decode(body) {
        Ok(v) => v,
        Err(e) => return fail(KvError::from(e).code()),
    };
    match provider.find_by_name(&input.name) {
        Ok(db_id) => OpenOut {
            ret: CODE_OK,
            db_id,
        }
        .encode(),
        Err(e) => {
            tracing::error!(name = %input.name, "could not find database");
            fail(e.code())
        }
    }
}

pub(super) fn count_databases(node: &Node, provider_id: u16) -> Vec<u8> {
    match node.provider(provider_id) {
        Ok(provider) => CountDbOut {
            ret: CODE_OK,
            count: provider.count_databases(),
        }
        .encode(),
        Err(e) => CountDbOut {
            ret: e.code(),
            count: 0,
        }
        .encode(),
    }
}

pub(super) fn list_databases(node: &Node, provider_id: u16, body: &[u8]) -> Vec<u8> {
    let fail = |ret| ListDbOut {
        ret,
        names: Vec::new(),
        ids: Vec::new(),
    }
    .encode();
    let provider = match node.provider(provider_id) {
        Ok(p) => p,
        Err(e) => return fail(e.code()),
    };
    let input = match ListDbIn::decode(body) {
        Ok(v) => v,
        Err(e) => return fail(KvError::from(e).code()),
    };
    let (names, ids) = provider
        .list_databases(input.max)
        .into_iter()
        .unzip();
    ListDbOut {
        ret: CODE_OK,
        names,
        ids,
    }
    .encode()
}

pub(super) fn put(node: &Node, provider_id: u16, body: &[u8]) -> Vec<u8> {
    let input = match PutIn::decode(body) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return status(code),
    };
    status(KvError::code_of(&db.put(&input.key, &input.value)))
}

pub(super) async fn put_multi(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    channel: &dyn BulkChannel,
) -> Vec<u8> {
    let input = match PutMultiIn::decode(body) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return status(code),
    };
    let n = input.num_keys as usize;

    // stage local buffers and pull both sides
    let mut keys_buf = vec![0u8; input.keys_bulk.len as usize];
    if let Err(e) = channel.pull(input.keys_bulk, 0, &mut keys_buf).await {
        return status(transport_code(e));
    }
    let mut vals_buf = vec![0u8; input.vals_bulk.len as usize];
    if let Err(e) = channel.pull(input.vals_bulk, 0, &mut vals_buf).await {
        return status(transport_code(e));
    }

    let ksizes = match read_sizes_header(&keys_buf, n) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let vsizes = match read_sizes_header(&vals_buf, n) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let keys = match split_packed(&keys_buf[n * 8..], &ksizes) {
        Ok(v) => v,
        Err(e) => return status(e.code()),
    };
    let vals = match split_packed(&vals_buf[n * 8..], &vsizes) {
        Ok(v) => v,
        Err(e) => return status(e.code()),
    };

    status(KvError::code_of(&db.put_multi(&keys, &vals)))
}

pub(super) async fn put_packed(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    channel: &dyn BulkChannel,
    forwarder: &dyn Forwarder,
) -> Vec<u8> {
    let input = match PutPackedIn::decode(body) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return status(code),
    };
    let n = input.num_keys as usize;

    // the buffers may live at a third party when the request was proxied
    let origin_channel = if input.origin_addr.is_empty() {
        None
    } else {
        forwarder.channel_to(&input.origin_addr).await
    };

    let mut buf = vec![0u8; input.bulk.len as usize];
    let pulled = match &origin_channel {
        Some(origin) => origin.pull(input.bulk, 0, &mut buf).await,
        None => channel.pull(input.bulk, 0, &mut buf).await,
    };
    if let Err(e) = pulled {
        return status(transport_code(e));
    }

    // layout: [ksize...][vsize...][keys...][vals...]
    let ksizes = match read_sizes_header(&buf, n) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let vsizes = match read_sizes_header(&buf[n * 8..], n) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let payload = &buf[2 * n * 8..];
    let keys_len: u64 = ksizes.iter().sum();
    if keys_len as usize > payload.len() {
        return status(KvError::Size.code());
    }
    let (packed_keys, packed_vals) = payload.split_at(keys_len as usize);

    status(KvError::code_of(&db.put_packed(
        n,
        packed_keys,
        &ksizes,
        packed_vals,
        &vsizes,
    )))
}

pub(super) async fn bulk_put(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    channel: &dyn BulkChannel,
) -> Vec<u8> {
    let input = match BulkPutIn::decode(body) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return status(code),
    };

    let mut value = vec![0u8; input.vsize as usize];
    if input.vsize > 0 {
        if let Err(e) = channel.pull(input.value_bulk, 0, &mut value).await {
            return status(transport_code(e));
        }
    }
    status(KvError::code_of(&db.put(&input.key, &value)))
}

pub(super) fn get(node: &Node, provider_id: u16, body: &[u8]) -> Vec<u8> {
    let fail = |ret, vsize| GetOut {
        ret,
        vsize,
        value: Vec::new(),
    }
    .encode();
    let input = match GetIn::decode(body) {
        Ok(v) => v,
        Err(e) => return fail(KvError::from(e).code(), 0),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return fail(code, 0),
    };

    let mut value = DataSlice::new();
    match db.get(&input.key, &mut value) {
        Ok(()) => {
            let vsize = value.len() as u64;
            if vsize <= input.vsize {
                GetOut {
                    ret: CODE_OK,
                    vsize,
                    value: value.to_vec(),
                }
                .encode()
            } else {
                fail(KvError::Size.code(), vsize)
            }
        }
        Err(e) => fail(e.code(), 0),
    }
}

pub(super) async fn get_multi(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    channel: &dyn BulkChannel,
) -> Vec<u8> {
    let input = match GetMultiIn::decode(body) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return status(code),
    };
    let n = input.num_keys as usize;

    // pull the packed keys, and the client's allowances from the head of
    // the values region
    let mut keys_buf = vec![0u8; input.keys_bulk.len as usize];
    if let Err(e) = channel.pull(input.keys_bulk, 0, &mut keys_buf).await {
        return status(transport_code(e));
    }
    let mut vals_buf = vec![0u8; input.vals_bulk.len as usize];
    if vals_buf.len() < n * 8 {
        return status(KvError::Size.code());
    }
    if let Err(e) = channel
        .pull(input.vals_bulk, 0, &mut vals_buf[..n * 8])
        .await
    {
        return status(transport_code(e));
    }

    let ksizes = match read_sizes_header(&keys_buf, n) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let allowances = match read_sizes_header(&vals_buf, n) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let keys = match split_packed(&keys_buf[n * 8..], &ksizes) {
        Ok(v) => v,
        Err(e) => return status(e.code()),
    };

    // pack values tightly after the sizes header; an entry that exceeds
    // its allowance is reported as 0 and transfers nothing, like a
    // missing key
    let mut vsizes = vec![0u64; n];
    let mut offset = n * 8;
    for (i, key) in keys.iter().enumerate() {
        let mut value = DataSlice::new();
        match db.get(key, &mut value) {
            Ok(()) => {
                let vsize = value.len();
                if vsize as u64 > allowances[i] {
                    vsizes[i] = 0;
                } else if offset + vsize <= vals_buf.len() {
                    vsizes[i] = vsize as u64;
                    vals_buf[offset..offset + vsize].copy_from_slice(&value);
                    offset += vsize;
                } else {
                    return status(KvError::Size.code());
                }
            }
            Err(_) => {
                vsizes[i] = 0;
            }
        }
    }
    write_sizes_header(&mut vals_buf[..n * 8], &vsizes);

    // push the whole values buffer back
    if let Err(e) = channel.push(input.vals_bulk, 0, &vals_buf).await {
        return status(transport_code(e));
    }
    status(CODE_OK)
}

pub(super) async fn get_packed(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    channel: &dyn BulkChannel,
) -> Vec<u8> {
    let fail = |ret| GetPackedOut { ret, num_keys: 0 }.encode();
    let input = match GetPackedIn::decode(body) {
        Ok(v) => v,
        Err(e) => return fail(KvError::from(e).code()),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return fail(code),
    };
    let n = input.num_keys as usize;

    let mut keys_buf = vec![0u8; input.keys_bulk.len as usize];
    if let Err(e) = channel.pull(input.keys_bulk, 0, &mut keys_buf).await {
        return fail(transport_code(e));
    }
    let ksizes = match read_sizes_header(&keys_buf, n) {
        Ok(v) => v,
        Err(e) => return fail(KvError::from(e).code()),
    };
    let keys = match split_packed(&keys_buf[n * 8..], &ksizes) {
        Ok(v) => v,
        Err(e) => return fail(e.code()),
    };

    let mut vals_buf = vec![0u8; input.vals_bulk.len as usize];
    if vals_buf.len() < n * 8 {
        return fail(KvError::Size.code());
    }
    let mut vsizes = vec![0u64; n];
    let mut available = vals_buf.len() - n * 8;
    let mut offset = n * 8;
    let mut ret = CODE_OK;
    let mut delivered: u64 = 0;

    for (i, key) in keys.iter().enumerate() {
        if available == 0 {
            vsizes[i] = 0;
            ret = KvError::Size.code();
            continue;
        }
        let mut value = DataSlice::new();
        match db.get(key, &mut value) {
            Ok(()) => {
                let vsize = value.len();
                if vsize > available {
                    available = 0;
                    ret = KvError::Size.code();
                    vsizes[i] = 0;
                } else {
                    delivered += 1;
                    vsizes[i] = vsize as u64;
                    vals_buf[offset..offset + vsize].copy_from_slice(&value);
                    offset += vsize;
                    available -= vsize;
                }
            }
            Err(_) => {
                vsizes[i] = MISSING_KEY_SIZE;
            }
        }
    }
    write_sizes_header(&mut vals_buf[..n * 8], &vsizes);

    if let Err(e) = channel.push(input.vals_bulk, 0, &vals_buf).await {
        return fail(transport_code(e));
    }
    GetPackedOut {
        ret,
        num_keys: delivered,
    }
    .encode()
}

pub(super) async fn bulk_get(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    channel: &dyn BulkChannel,
) -> Vec<u8> {
    let fail = |ret, vsize| BulkGetOut { ret, vsize }.encode();
    let input = match BulkGetIn::decode(body) {
        Ok(v) => v,
        Err(e) => return fail(KvError::from(e).code(), 0),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return fail(code, 0),
    };

    let mut value = DataSlice::new();
    if let Err(e) = db.get(&input.key, &mut value) {
        return fail(e.code(), 0);
    }
    let vsize = value.len() as u64;
    if vsize > input.vsize {
        return fail(KvError::Size.code(), vsize);
    }
    if vsize > 0 {
        if let Err(e) = channel.push(input.value_bulk, 0, &value).await {
            return fail(transport_code(e), 0);
        }
    }
    BulkGetOut {
        ret: CODE_OK,
        vsize,
    }
    .encode()
}

pub(super) fn length(node: &Node, provider_id: u16, body: &[u8]) -> Vec<u8> {
    let fail = |ret| LengthOut { ret, size: 0 }.encode();
    let input = match KeyIn::decode(body) {
        Ok(v) => v,
        Err(e) => return fail(KvError::from(e).code()),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return fail(code),
    };
    match db.length(&input.key) {
        Some(size) => LengthOut {
            ret: CODE_OK,
            size: size as u64,
        }
        .encode(),
        None => fail(KvError::UnknownKey.code()),
    }
}

/// Shared by length_multi and length_packed: pull packed keys, push the
/// per-key value sizes (0 for missing keys).
pub(super) async fn length_multi(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    channel: &dyn BulkChannel,
) -> Vec<u8> {
    let input = match KeysBulkIn::decode(body) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return status(code),
    };
    let n = input.num_keys as usize;

    let mut keys_buf = vec![0u8; input.keys_bulk.len as usize];
    if let Err(e) = channel.pull(input.keys_bulk, 0, &mut keys_buf).await {
        return status(transport_code(e));
    }
    let ksizes = match read_sizes_header(&keys_buf, n) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let keys = match split_packed(&keys_buf[n * 8..], &ksizes) {
        Ok(v) => v,
        Err(e) => return status(e.code()),
    };

    let mut sizes_buf = vec![0u8; n * 8];
    let sizes: Vec<u64> = keys
        .iter()
        .map(|key| db.length(key).unwrap_or(0) as u64)
        .collect();
    write_sizes_header(&mut sizes_buf, &sizes);

    if let Err(e) = channel.push(input.out_bulk, 0, &sizes_buf).await {
        return status(transport_code(e));
    }
    status(CODE_OK)
}

pub(super) fn exists(node: &Node, provider_id: u16, body: &[u8]) -> Vec<u8> {
    let fail = |ret| ExistsOut { ret, flag: 0 }.encode();
    let input = match KeyIn::decode(body) {
        Ok(v) => v,
        Err(e) => return fail(KvError::from(e).code()),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return fail(code),
    };
    ExistsOut {
        ret: CODE_OK,
        flag: db.exists(&input.key) as u8,
    }
    .encode()
}

pub(super) async fn exists_multi(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    channel: &dyn BulkChannel,
) -> Vec<u8> {
    let input = match KeysBulkIn::decode(body) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return status(code),
    };
    let n = input.num_keys as usize;

    let mut keys_buf = vec![0u8; input.keys_bulk.len as usize];
    if let Err(e) = channel.pull(input.keys_bulk, 0, &mut keys_buf).await {
        return status(transport_code(e));
    }
    let ksizes = match read_sizes_header(&keys_buf, n) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let keys = match split_packed(&keys_buf[n * 8..], &ksizes) {
        Ok(v) => v,
        Err(e) => return status(e.code()),
    };

    // bit-packed existence flags, LSB first within each byte
    let mut flags = vec![0u8; n.div_ceil(8)];
    for (i, key) in keys.iter().enumerate() {
        if db.exists(key) {
            flags[i / 8] |= 1 << (i % 8);
        }
    }

    if let Err(e) = channel.push(input.out_bulk, 0, &flags).await {
        return status(transport_code(e));
    }
    status(CODE_OK)
}

pub(super) fn erase(node: &Node, provider_id: u16, body: &[u8]) -> Vec<u8> {
    let input = match KeyIn::decode(body) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return status(code),
    };
    if db.erase(&input.key) {
        status(CODE_OK)
    } else {
        status(KvError::Erase.code())
    }
}

pub(super) async fn erase_multi(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    channel: &dyn BulkChannel,
) -> Vec<u8> {
    let input = match KeysBulkIn::decode(body) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return status(code),
    };
    let n = input.num_keys as usize;

    let mut keys_buf = vec![0u8; input.keys_bulk.len as usize];
    if let Err(e) = channel.pull(input.keys_bulk, 0, &mut keys_buf).await {
        return status(transport_code(e));
    }
    let ksizes = match read_sizes_header(&keys_buf, n) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let keys = match split_packed(&keys_buf[n * 8..], &ksizes) {
        Ok(v) => v,
        Err(e) => return status(e.code()),
    };

    // best effort, absent keys are not an error here
    for key in keys {
        db.erase(key);
    }
    status(CODE_OK)
}

pub(super) async fn list_keys(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    channel: &dyn BulkChannel,
) -> Vec<u8> {
    let fail = |ret| ListKeysOut { ret, nkeys: 0 }.encode();
    let input = match ListKeysIn::decode(body) {
        Ok(v) => v,
        Err(e) => return fail(KvError::from(e).code()),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return fail(code),
    };
    let max_keys = input.max_keys as usize;

    // pull the client's per-slot allowances
    let mut ksizes_buf = vec![0u8; max_keys * 8];
    if let Err(e) = channel.pull(input.ksizes_bulk, 0, &mut ksizes_buf).await {
        return fail(transport_code(e));
    }
    let remote_ksizes = match read_sizes_header(&ksizes_buf, max_keys) {
        Ok(v) => v,
        Err(e) => return fail(KvError::from(e).code()),
    };

    // query the backend in backend-allocated mode
    let mut keys = Vec::new();
    if let Err(e) = db.list_keys(input.max_keys, &input.start, &input.prefix, &mut keys) {
        return fail(e.code());
    }
    let num_keys = keys.len().min(max_keys);
    if num_keys == 0 {
        return ListKeysOut {
            ret: CODE_OK,
            nkeys: 0,
        }
        .encode();
    }

    // push the true sizes back so the client learns what it needed even
    // on a size failure
    let mut true_ksizes = vec![0u64; max_keys];
    let mut size_error = false;
    for i in 0..num_keys {
        true_ksizes[i] = keys[i].len() as u64;
        if true_ksizes[i] > remote_ksizes[i] {
            size_error = true;
        }
    }
    write_sizes_header(&mut ksizes_buf, &true_ksizes);
    if let Err(e) = channel.push(input.ksizes_bulk, 0, &ksizes_buf).await {
        return fail(transport_code(e));
    }

    if size_error {
        return ListKeysOut {
            ret: KvError::Size.code(),
            nkeys: num_keys as u64,
        }
        .encode();
    }

    // per-entry pushes into the client's allowance-sized slots
    let mut remote_offset = 0u64;
    for i in 0..num_keys {
        if true_ksizes[i] > 0 {
            if let Err(e) = channel
                .push(input.keys_bulk, remote_offset, &keys[i])
                .await
            {
                return fail(transport_code(e));
            }
        }
        remote_offset += remote_ksizes[i];
    }

    ListKeysOut {
        ret: CODE_OK,
        nkeys: num_keys as u64,
    }
    .encode()
}

pub(super) async fn list_keyvals(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    channel: &dyn BulkChannel,
) -> Vec<u8> {
    let fail = |ret| ListKeysOut { ret, nkeys: 0 }.encode();
    let input = match ListKeyvalsIn::decode(body) {
        Ok(v) => v,
        Err(e) => return fail(KvError::from(e).code()),
    };
    let db = match find_db(node, provider_id, input.db_id) {
        Ok(db) => db,
        Err(code) => return fail(code),
    };
    let max_keys = input.max_keys as usize;

    let mut ksizes_buf = vec![0u8; max_keys * 8];
    if let Err(e) = channel.pull(input.ksizes_bulk, 0, &mut ksizes_buf).await {
        return fail(transport_code(e));
    }
    let mut vsizes_buf = vec![0u8; max_keys * 8];
    if let Err(e) = channel.pull(input.vsizes_bulk, 0, &mut vsizes_buf).await {
        return fail(transport_code(e));
    }
    let remote_ksizes = match read_sizes_header(&ksizes_buf, max_keys) {
        Ok(v) => v,
        Err(e) => return fail(KvError::from(e).code()),
    };
    let remote_vsizes = match read_sizes_header(&vsizes_buf, max_keys) {
        Ok(v) => v,
        Err(e) => return fail(KvError::from(e).code()),
    };

    let mut keyvals = Vec::new();
    if let Err(e) = db.list_keyvals(input.max_keys, &input.start, &input.prefix, &mut keyvals) {
        return fail(e.code());
    }
    let num_keys = keyvals.len().min(max_keys);
    if num_keys == 0 {
        return ListKeysOut {
            ret: CODE_OK,
            nkeys: 0,
        }
        .encode();
    }

    let mut size_error = false;
    let mut true_ksizes = vec![0u64; max_keys];
    let mut true_vsizes = vec![0u64; max_keys];
    for i in 0..num_keys {
        true_ksizes[i] = keyvals[i].0.len() as u64;
        true_vsizes[i] = keyvals[i].1.len() as u64;
        if true_ksizes[i] > remote_ksizes[i] || true_vsizes[i] > remote_vsizes[i] {
            size_error = true;
        }
    }

    write_sizes_header(&mut ksizes_buf, &true_ksizes);
    if let Err(e) = channel.push(input.ksizes_bulk, 0, &ksizes_buf).await {
        return fail(transport_code(e));
    }
    write_sizes_header(&mut vsizes_buf, &true_vsizes);
    if let Err(e) = channel.push(input.vsizes_bulk, 0, &vsizes_buf).await {
        return fail(transport_code(e));
    }

    if size_error {
        return ListKeysOut {
            ret: KvError::Size.code(),
            nkeys: num_keys as u64,
        }
        .encode();
    }

    let mut remote_offset = 0u64;
    for i in 0..num_keys {
        if true_ksizes[i] > 0 {
            if let Err(e) = channel
                .push(input.keys_bulk, remote_offset, &keyvals[i].0)
                .await
            {
                return fail(transport_code(e));
            }
        }
        remote_offset += remote_ksizes[i];
    }
    let mut remote_offset = 0u64;
    for i in 0..num_keys {
        if true_vsizes[i] > 0 {
            if let Err(e) = channel
                .push(input.vals_bulk, remote_offset, &keyvals[i].1)
                .await
            {
                return fail(transport_code(e));
            }
        }
        remote_offset += remote_vsizes[i];
    }

    ListKeysOut {
        ret: CODE_OK,
        nkeys: num_keys as u64,
    }
    .encode()
}
