//! Handlers for cross-provider migration
//!
//! Key migration reads values locally and forwards single-key puts to the
//! target provider; a failed forward aborts the migration and leaves
//! not-yet-processed keys in place. Whole-database migration hands the
//! fileset to the node's file-migration collaborator. No provider lock is
//! held during remote forwards.

use std::sync::Arc;

use crate::datastore::{split_packed, DataStore, KeyValue};
use crate::error::{KvError, CODE_OK};
use crate::protocol::wire::read_sizes_header;
use crate::protocol::{
    MigrateAllKeysIn, MigrateDatabaseIn, MigrateDatabaseOut, MigrateKeyRangeIn, MigrateKeysIn,
    MigrateKeysPrefixedIn, MigrateTarget, Op, PutIn, StatusOut, REMOVE_ORIGINAL,
};
use crate::slice::DataSlice;
use crate::transport::{BulkChannel, Forwarder};

use super::handlers::status;
use super::Node;

/// Keys moved per enumeration round during prefix/all migration.
const MIGRATION_BATCH: u64 = 64;

/// Forward one key-value pair as a `put` to the target database.
async fn forward_put(
    forwarder: &dyn Forwarder,
    target: &MigrateTarget,
    key: &[u8],
    value: &[u8],
) -> Result<(), KvError> {
    let body = PutIn {
        db_id: target.db_id,
        key: key.to_vec(),
        value: value.to_vec(),
    }
    .encode();
    let response = forwarder
        .forward(&target.addr, target.provider_id, Op::Put, body)
        .await
        .map_err(|e| {
            tracing::error!(addr = %target.addr, error = %e, "failed to forward put");
            KvError::Migration
        })?;
    match StatusOut::decode(&response) {
        Ok(out) if out.ret == CODE_OK => Ok(()),
        Ok(out) => {
            tracing::error!(addr = %target.addr, ret = out.ret, "forwarded put failed");
            Err(KvError::Migration)
        }
        Err(_) => Err(KvError::Migration),
    }
}

pub(super) async fn migrate_keys(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    channel: &dyn BulkChannel,
    forwarder: &dyn Forwarder,
) -> Vec<u8> {
    let input = match MigrateKeysIn::decode(body) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let db = match super::handlers::find_db(node, provider_id, input.source_db_id) {
        Ok(db) => db,
        Err(code) => return status(code),
    };
    let n = input.num_keys as usize;

    let mut keys_buf = vec![0u8; input.keys_bulk.len as usize];
    if let Err(e) = channel.pull(input.keys_bulk, 0, &mut keys_buf).await {
        return status(KvError::from(e).code());
    }
    let ksizes = match read_sizes_header(&keys_buf, n) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let keys = match split_packed(&keys_buf[n * 8..], &ksizes) {
        Ok(v) => v,
        Err(e) => return status(e.code()),
    };

    for key in keys {
        let mut value = DataSlice::new();
        if db.get(key, &mut value).is_err() {
            continue;
        }
        if let Err(e) = forward_put(forwarder, &input.target, key, &value).await {
            return status(e.code());
        }
        if input.flag == REMOVE_ORIGINAL {
            db.erase(key);
        }
    }
    status(CODE_OK)
}

/// Shared engine for prefixed and all-keys migration: enumerate in
/// batches, forward each pair, erase behind when removing.
async fn migrate_scan(
    db: Arc<dyn DataStore>,
    target: &MigrateTarget,
    prefix: &[u8],
    remove_original: bool,
    forwarder: &dyn Forwarder,
) -> Vec<u8> {
    let mut start: Vec<u8> = Vec::new();
    loop {
        let mut batch: Vec<KeyValue> = Vec::new();
        if let Err(e) = db.list_keyvals(MIGRATION_BATCH, &start, prefix, &mut batch) {
            tracing::error!(error = %e, "enumeration failed during migration");
            return status(e.code());
        }
        if batch.is_empty() {
            break;
        }
        for (key, value) in &batch {
            if let Err(e) = forward_put(forwarder, target, key, value).await {
                return status(e.code());
            }
            if remove_original {
                db.erase(key);
            }
        }
        // with removal the scan stays anchored at the first key; without
        // it the next round starts after the last migrated key
        if !remove_original {
            if let Some((key, _)) = batch.last() {
                start = key.to_vec();
            }
        }
        if (batch.len() as u64) < MIGRATION_BATCH {
            break;
        }
    }
    status(CODE_OK)
}

pub(super) async fn migrate_keys_prefixed(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    forwarder: &dyn Forwarder,
) -> Vec<u8> {
    let input = match MigrateKeysPrefixedIn::decode(body) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let db = match super::handlers::find_db(node, provider_id, input.source_db_id) {
        Ok(db) => db,
        Err(code) => return status(code),
    };
    migrate_scan(
        db,
        &input.target,
        &input.prefix,
        input.flag == REMOVE_ORIGINAL,
        forwarder,
    )
    .await
}

pub(super) async fn migrate_all_keys(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    forwarder: &dyn Forwarder,
) -> Vec<u8> {
    let input = match MigrateAllKeysIn::decode(body) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let db = match super::handlers::find_db(node, provider_id, input.source_db_id) {
        Ok(db) => db,
        Err(code) => return status(code),
    };
    migrate_scan(
        db,
        &input.target,
        b"",
        input.flag == REMOVE_ORIGINAL,
        forwarder,
    )
    .await
}

pub(super) async fn migrate_key_range(
    node: &Node,
    provider_id: u16,
    body: &[u8],
    forwarder: &dyn Forwarder,
) -> Vec<u8> {
    let input = match MigrateKeyRangeIn::decode(body) {
        Ok(v) => v,
        Err(e) => return status(KvError::from(e).code()),
    };
    let db = match super::handlers::find_db(node, provider_id, input.source_db_id) {
        Ok(db) => db,
        Err(code) => return status(code),
    };

    let mut batch: Vec<KeyValue> = Vec::new();
    if let Err(e) = db.list_keyval_range(&input.lower, &input.upper, &mut batch) {
        return status(e.code());
    }
    for (key, value) in &batch {
        if let Err(e) = forward_put(forwarder, &input.target, key, value).await {
            return status(e.code());
        }
        if input.flag == REMOVE_ORIGINAL {
            db.erase(key);
        }
    }
    status(CODE_OK)
}

pub(super) async fn migrate_database(node: &Node, provider_id: u16, body: &[u8]) -> Vec<u8> {
    let fail = |ret, migrator_ret| MigrateDatabaseOut { ret, migrator_ret }.encode();
    let input = match MigrateDatabaseIn::decode(body) {
        Ok(v) => v,
        Err(e) => return fail(KvError::from(e).code(), 0),
    };
    let provider = match node.provider(provider_id) {
        Ok(p) => p,
        Err(e) => return fail(e.code(), 0),
    };
    let db = match provider.find_by_id(input.source_db_id) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(db_id = input.source_db_id, "could not find database");
            return fail(e.code(), 0);
        }
    };
    let migrator = match node.fileset_migrator() {
        Some(m) => m,
        None => return fail(KvError::FilesetTransfer(0).code(), 0),
    };

    if let Err(e) = db.sync() {
        return fail(e.code(), 0);
    }
    let fileset = match db.create_fileset() {
        Some(f) => f,
        None => return fail(KvError::OpNotImpl.code(), 0),
    };

    match migrator
        .migrate(
            &fileset,
            &input.dest_addr,
            input.dest_provider_id,
            &input.dest_root,
            input.remove_src == REMOVE_ORIGINAL,
        )
        .await
    {
        Ok(()) => {
            let ret = if input.remove_src == REMOVE_ORIGINAL {
                KvError::code_of(&provider.remove_database(input.source_db_id))
            } else {
                CODE_OK
            };
            fail(ret, 0)
        }
        Err(fault) => {
            tracing::error!(status = fault.status, "fileset migration failed");
            fail(KvError::FilesetTransfer(fault.status).code(), fault.status)
        }
    }
}
