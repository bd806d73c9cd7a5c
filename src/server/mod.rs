//! RPC dispatch
//!
//! A [`Node`] hosts one or more providers behind a transport endpoint and
//! routes each incoming operation to its handler. Handlers follow one
//! skeleton: decode inline input, find provider and database under a read
//! lock, stage local buffers, pull remote bytes, invoke the backend, pack
//! results, push remote bytes, respond. Every exit path produces a
//! well-formed response for the operation's output type.

mod handlers;
mod migration;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{KvError, KvResult};
use crate::migration::FilesetMigrator;
use crate::protocol::Op;
use crate::provider::Provider;
use crate::transport::{BulkChannel, Forwarder, RpcTarget};

/// A transport endpoint hosting providers, keyed by provider id.
pub struct Node {
    providers: RwLock<HashMap<u16, Arc<Provider>>>,
    fileset_migrator: RwLock<Option<Arc<dyn FilesetMigrator>>>,
}

impl Node {
    pub fn new() -> Arc<Node> {
        Arc::new(Node {
            providers: RwLock::new(HashMap::new()),
            fileset_migrator: RwLock::new(None),
        })
    }

    /// Register a provider under an id unique within this node.
    pub fn add_provider(&self, provider_id: u16, provider: Arc<Provider>) -> KvResult<()> {
        let mut providers = self.providers.write();
        if providers.contains_key(&provider_id) {
            tracing::error!(provider_id, "a provider with this id already exists");
            return Err(KvError::ProviderExists);
        }
        providers.insert(provider_id, provider);
        tracing::trace!(provider_id, "registered provider");
        Ok(())
    }

    pub fn provider(&self, provider_id: u16) -> KvResult<Arc<Provider>> {
        self.providers
            .read()
            .get(&provider_id)
            .cloned()
            .ok_or(KvError::UnknownProvider)
    }

    /// Attach the whole-database migration collaborator.
    pub fn set_fileset_migrator(&self, migrator: Arc<dyn FilesetMigrator>) {
        *self.fileset_migrator.write() = Some(migrator);
    }

    pub(crate) fn fileset_migrator(&self) -> Option<Arc<dyn FilesetMigrator>> {
        self.fileset_migrator.read().clone()
    }
}

#[async_trait]
impl RpcTarget for Node {
    async fn handle(
        &self,
        provider_id: u16,
        op: Op,
        body: &[u8],
        channel: &dyn BulkChannel,
        forwarder: &dyn Forwarder,
    ) -> Vec<u8> {
        match op {
            Op::Open => handlers::open(self, provider_id, body),
            Op::CountDatabases => handlers::count_databases(self, provider_id),
            Op::ListDatabases => handlers::list_databases(self, provider_id, body),
            Op::Put => handlers::put(self, provider_id, body),
            Op::PutMulti => handlers::put_multi(self, provider_id, body, channel).await,
            Op::PutPacked => handlers::put_packed(self, provider_id, body, channel, forwarder).await,
            Op::BulkPut => handlers::bulk_put(self, provider_id, body, channel).await,
            Op::Get => handlers::get(self, provider_id, body),
            Op::GetMulti => handlers::get_multi(self, provider_id, body, channel).await,
            Op::GetPacked => handlers::get_packed(self, provider_id, body, channel).await,
            Op::BulkGet => handlers::bulk_get(self, provider_id, body, channel).await,
            Op::Length => handlers::length(self, provider_id, body),
            Op::LengthMulti | Op::LengthPacked => {
                handlers::length_multi(self, provider_id, body, channel).await
            }
            Op::Exists => handlers::exists(self, provider_id, body),
            Op::ExistsMulti => handlers::exists_multi(self, provider_id, body, channel).await,
            Op::Erase => handlers::erase(self, provider_id, body),
            Op::EraseMulti => handlers::erase_multi(self, provider_id, body, channel).await,
            Op::ListKeys => handlers::list_keys(self, provider_id, body, channel).await,
            Op::ListKeyvals => handlers::list_keyvals(self, provider_id, body, channel).await,
            Op::MigrateKeys => {
                migration::migrate_keys(self, provider_id, body, channel, forwarder).await
            }
            Op::MigrateKeyRange => {
                migration::migrate_key_range(self, provider_id, body, forwarder).await
            }
            Op::MigrateKeysPrefixed => {
                migration::migrate_keys_prefixed(self, provider_id, body, forwarder).await
            }
            Op::MigrateAllKeys => {
                migration::migrate_all_keys(self, provider_id, body, forwarder).await
            }
            Op::MigrateDatabase => {
                migration::migrate_database(self, provider_id, body).await
            }
        }
    }
}
