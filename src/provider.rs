//! Provider: the registry of open databases
//!
//! A provider owns zero or more databases, the name↔id indices over them,
//! and the comparator registry used at attach time. One reader/writer lock
//! guards the three associative structures: RPC handlers take it in read
//! mode for the lookup only, attach and detach take it in write mode.
//! Database ids come from a monotonic counter and are never reused within
//! a provider lifetime.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::comparator::{ComparatorRegistry, RawCompareFn};
use crate::config;
use crate::datastore::{create_datastore, DataStore, DbType};
use crate::error::{KvError, KvResult};

/// Opaque handle distinguishing attached databases within one provider.
pub type DatabaseId = u64;

/// Everything needed to attach one database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub name: String,
    pub db_type: DbType,
    pub path: String,
    /// Comparator name, empty for the default order
    pub comparator: String,
    pub no_overwrite: bool,
    pub erase_on_get: bool,
    pub in_memory: bool,
}

impl DbConfig {
    pub fn new(name: &str, db_type: DbType) -> Self {
        DbConfig {
            name: name.to_string(),
            db_type,
            path: String::new(),
            comparator: String::new(),
            no_overwrite: false,
            erase_on_get: false,
            in_memory: false,
        }
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn comparator(mut self, name: &str) -> Self {
        self.comparator = name.to_string();
        self
    }

    pub fn no_overwrite(mut self) -> Self {
        self.no_overwrite = true;
        self
    }

    pub fn erase_on_get(mut self) -> Self {
        self.erase_on_get = true;
        self
    }
}

/// Callback invoked before a whole-database migration lands.
pub type PreMigrationCallback = Box<dyn Fn(&Provider, &DbConfig) + Send + Sync>;

/// Callback invoked after a migrated database has been re-attached.
pub type PostMigrationCallback = Box<dyn Fn(&Provider, &DbConfig, DatabaseId) + Send + Sync>;

#[derive(Default)]
struct Registry {
    databases: HashMap<DatabaseId, Arc<dyn DataStore>>,
    name_to_id: BTreeMap<String, DatabaseId>,
    id_to_name: BTreeMap<DatabaseId, String>,
}

#[derive(Default)]
struct MigrationCallbacks {
    pre: Option<PreMigrationCallback>,
    post: Option<PostMigrationCallback>,
}

/// A process-local collection of databases exposed over RPC.
pub struct Provider {
    registry: RwLock<Registry>,
    comparators: RwLock<ComparatorRegistry>,
    next_id: AtomicU64,
    effective_config: RwLock<Value>,
    migration_callbacks: RwLock<MigrationCallbacks>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").finish_non_exhaustive()
    }
}

impl Provider {
    /// Provider with an empty configuration.
    pub fn new() -> Arc<Provider> {
        Arc::new(Provider {
            registry: RwLock::new(Registry::default()),
            comparators: RwLock::new(ComparatorRegistry::new()),
            next_id: AtomicU64::new(1),
            effective_config: RwLock::new(serde_json::json!({
                "comparators": [], "databases": []
            })),
            migration_callbacks: RwLock::new(MigrationCallbacks::default()),
        })
    }

    /// Provider initialized from a JSON configuration. The config is
    /// validated before any state mutation; on a later attach failure all
    /// databases attached so far are removed again.
    pub fn with_config(mut config: Value) -> KvResult<Arc<Provider>> {
        config::validate_and_complete(&mut config)?;
        let provider = Provider::new();
        *provider.effective_config.write() = config;
        provider.populate_from_config()?;
        Ok(provider)
    }

    fn populate_from_config(&self) -> KvResult<()> {
        let config = self.effective_config.read().clone();
        for entry in config::comparator_entries(&config) {
            self.resolve_comparator(&entry.library, &entry.name)?;
        }
        let entries = config::database_entries(&config)?;
        let mut ids = Vec::with_capacity(entries.len());
        for entry in &entries {
            let db_config = DbConfig {
                name: entry.name.clone(),
                db_type: entry.db_type,
                path: entry.path.clone(),
                comparator: entry.comparator.clone(),
                no_overwrite: entry.no_overwrite,
                erase_on_get: false,
                in_memory: false,
            };
            match self.attach_database(&db_config) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    self.remove_all_databases();
                    return Err(e);
                }
            }
        }
        // record the assigned ids in the effective config
        let mut config = self.effective_config.write();
        if let Some(databases) = config["databases"].as_array_mut() {
            for (entry, id) in databases.iter_mut().zip(ids) {
                entry[config::DATABASE_ID_KEY] = Value::from(id);
            }
        }
        Ok(())
    }

    /// Register a comparison function defined in this process.
    pub fn add_comparator(&self, name: &str, func: RawCompareFn) -> KvResult<()> {
        self.comparators.write().add(name, func)
    }

    /// Resolve a comparison function from a shared library (empty library
    /// string resolves in the process's own symbol table) and register it.
    pub fn resolve_comparator(&self, library: &str, name: &str) -> KvResult<()> {
        self.comparators.write().resolve(library, name)
    }

    /// Instantiate a backend, apply its configuration, and install it.
    pub fn attach_database(&self, db_config: &DbConfig) -> KvResult<DatabaseId> {
        let comparator = if db_config.comparator.is_empty() {
            None
        } else {
            let found = self.comparators.read().find(&db_config.comparator);
            match found {
                Some(c) => Some(c),
                None => {
                    tracing::error!(
                        name = %db_config.comparator,
                        "could not find comparison function"
                    );
                    return Err(KvError::ComparisonFunction);
                }
            }
        };

        if self.registry.read().name_to_id.contains_key(&db_config.name) {
            tracing::error!(name = %db_config.name, "database name already attached");
            return Err(KvError::DatabaseCreate);
        }

        let mut store = create_datastore(db_config.db_type)?;
        if let Some(comparator) = comparator {
            store.set_comparator(comparator)?;
        }
        if db_config.no_overwrite {
            store.set_no_overwrite();
        }
        store.set_erase_on_get(db_config.erase_on_get);
        store.set_in_memory(db_config.in_memory);
        store.open(&db_config.name, &db_config.path).map_err(|e| {
            tracing::error!(name = %db_config.name, error = %e, "backend failed to open");
            KvError::DatabaseCreate
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let store: Arc<dyn DataStore> = Arc::from(store);

        let mut registry = self.registry.write();
        registry.name_to_id.insert(db_config.name.clone(), id);
        registry.id_to_name.insert(id, db_config.name.clone());
        registry.databases.insert(id, store);

        tracing::trace!(name = %db_config.name, id, "attached database");
        Ok(id)
    }

    /// Detach and shut down one database.
    pub fn remove_database(&self, id: DatabaseId) -> KvResult<()> {
        let store = {
            let mut registry = self.registry.write();
            let name = registry
                .id_to_name
                .remove(&id)
                .ok_or(KvError::UnknownDatabase)?;
            registry.name_to_id.remove(&name);
            registry.databases.remove(&id)
        };
        if let Some(store) = store {
            let _ = store.sync();
            tracing::trace!(id, "removed database");
        }
        Ok(())
    }

    /// Detach everything (also runs on provider shutdown).
    pub fn remove_all_databases(&self) {
        let stores: Vec<Arc<dyn DataStore>> = {
            let mut registry = self.registry.write();
            registry.name_to_id.clear();
            registry.id_to_name.clear();
            registry.databases.drain().map(|(_, s)| s).collect()
        };
        for store in stores {
            let _ = store.sync();
        }
        tracing::trace!("removed all databases");
    }

    pub fn count_databases(&self) -> u64 {
        self.registry.read().databases.len() as u64
    }

    /// Snapshot of (name, id) pairs in name order, up to `max`.
    pub fn list_databases(&self, max: u64) -> Vec<(String, DatabaseId)> {
        self.registry
            .read()
            .name_to_id
            .iter()
            .take(max as usize)
            .map(|(name, id)| (name.clone(), *id))
            .collect()
    }

    pub fn find_by_name(&self, name: &str) -> KvResult<DatabaseId> {
        self.registry
            .read()
            .name_to_id
            .get(name)
            .copied()
            .ok_or(KvError::DatabaseName)
    }

    pub fn find_by_id(&self, id: DatabaseId) -> KvResult<Arc<dyn DataStore>> {
        self.registry
            .read()
            .databases
            .get(&id)
            .cloned()
            .ok_or(KvError::UnknownDatabase)
    }

    /// The effective configuration, ids included.
    pub fn config(&self) -> Value {
        self.effective_config.read().clone()
    }

    /// The effective configuration as a compact JSON string.
    pub fn config_string(&self) -> String {
        self.effective_config.read().to_string()
    }

    /// Install the callbacks consulted around whole-database migration.
    pub fn set_migration_callbacks(
        &self,
        pre: Option<PreMigrationCallback>,
        post: Option<PostMigrationCallback>,
    ) {
        let mut callbacks = self.migration_callbacks.write();
        callbacks.pre = pre;
        callbacks.post = post;
    }

    pub(crate) fn run_pre_migration_callback(&self, config: &DbConfig) {
        if let Some(cb) = &self.migration_callbacks.read().pre {
            cb(self, config);
        }
    }

    pub(crate) fn run_post_migration_callback(&self, config: &DbConfig, id: DatabaseId) {
        if let Some(cb) = &self.migration_callbacks.read().post {
            cb(self, config, id);
        }
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        self.remove_all_databases();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attach_find_detach() {
        let provider = Provider::new();
        let id = provider
            .attach_database(&DbConfig::new("db-a", DbType::Map))
            .unwrap();

        assert_eq!(provider.count_databases(), 1);
        assert_eq!(provider.find_by_name("db-a").unwrap(), id);
        assert!(provider.find_by_id(id).is_ok());

        provider.remove_database(id).unwrap();
        assert_eq!(provider.count_databases(), 0);
        assert!(matches!(
            provider.find_by_id(id),
            Err(KvError::UnknownDatabase)
        ));
    }

    #[test]
    fn test_ids_are_not_reused() {
        let provider = Provider::new();
        let first = provider
            .attach_database(&DbConfig::new("one", DbType::Map))
            .unwrap();
        provider.remove_database(first).unwrap();
        let second = provider
            .attach_database(&DbConfig::new("one", DbType::Map))
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_duplicate_name_refused() {
        let provider = Provider::new();
        provider
            .attach_database(&DbConfig::new("dup", DbType::Map))
            .unwrap();
        assert_eq!(
            provider.attach_database(&DbConfig::new("dup", DbType::Null)),
            Err(KvError::DatabaseCreate)
        );
        assert_eq!(provider.count_databases(), 1);
    }

    #[test]
    fn test_missing_comparator_refused() {
        let provider = Provider::new();
        let config = DbConfig::new("db", DbType::Map).comparator("nonexistent");
        assert_eq!(
            provider.attach_database(&config),
            Err(KvError::ComparisonFunction)
        );
    }

    #[test]
    fn test_config_population_and_emission() {
        let provider = Provider::with_config(json!({
            "databases": [
                { "name": "m", "type": "map" },
                { "name": "n", "type": "null" }
            ]
        }))
        .unwrap();

        assert_eq!(provider.count_databases(), 2);
        let names: Vec<String> = provider
            .list_databases(10)
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["m".to_string(), "n".to_string()]);

        let effective = provider.config();
        assert!(effective["databases"][0][config::DATABASE_ID_KEY].is_u64());
        assert!(effective["databases"][1][config::DATABASE_ID_KEY].is_u64());
    }

    #[test]
    fn test_config_failure_rolls_back() {
        let err = Provider::with_config(json!({
            "databases": [
                { "name": "ok", "type": "map" },
                { "name": "bad", "type": "fwd" }
            ]
        }));
        assert!(err.is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Provider::with_config(json!({ "databases": "nope" })).is_err());
    }
}
