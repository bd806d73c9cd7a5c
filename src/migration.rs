//! Whole-database migration collaborator
//!
//! Moving a database between providers as files is delegated to a
//! [`FilesetMigrator`]: the source side hands it the database's fileset
//! descriptor, the collaborator transfers the directory tree and drives
//! the destination provider's re-attach from the fileset metadata.
//!
//! [`LocalFilesetMigrator`] is the in-repo implementation for
//! destinations reachable over a shared filesystem; it copies directory
//! trees, records the descriptor as a JSON manifest under the destination
//! root, and re-attaches on a destination provider registered with it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::datastore::{DbType, Fileset};
use crate::provider::{DbConfig, Provider};

/// Failure of a fileset transfer, carrying the collaborator's own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationFault {
    pub status: i32,
}

/// Collaborator statuses surfaced in the `migrator_ret` response field.
pub const FAULT_TRANSFER: i32 = -1;
pub const FAULT_MISSING_METADATA: i32 = -101;
pub const FAULT_NAME_EXISTS: i32 = -102;
pub const FAULT_TYPE_NOT_MIGRATABLE: i32 = -103;
pub const FAULT_UNKNOWN_COMPARATOR: i32 = -104;
pub const FAULT_UNKNOWN_DESTINATION: i32 = -105;
pub const FAULT_ATTACH_FAILED: i32 = -106;

/// Interface the migrate-database handler consumes.
#[async_trait]
pub trait FilesetMigrator: Send + Sync {
    /// Transfer `fileset` to the destination endpoint, removing the
    /// source files when asked, and re-attach the database there.
    async fn migrate(
        &self,
        fileset: &Fileset,
        dest_addr: &str,
        dest_provider_id: u16,
        dest_root: &str,
        remove_source: bool,
    ) -> Result<(), MigrationFault>;
}

/// Shared-filesystem implementation.
#[derive(Default)]
pub struct LocalFilesetMigrator {
    destinations: RwLock<HashMap<(String, u16), Arc<Provider>>>,
}

impl LocalFilesetMigrator {
    pub fn new() -> Arc<LocalFilesetMigrator> {
        Arc::new(LocalFilesetMigrator::default())
    }

    /// Make a provider reachable as a migration destination.
    pub fn register_destination(&self, addr: &str, provider_id: u16, provider: Arc<Provider>) {
        self.destinations
            .write()
            .insert((addr.to_string(), provider_id), provider);
    }

    fn destination(&self, addr: &str, provider_id: u16) -> Option<Arc<Provider>> {
        self.destinations
            .read()
            .get(&(addr.to_string(), provider_id))
            .cloned()
    }
}

fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[async_trait]
impl FilesetMigrator for LocalFilesetMigrator {
    async fn migrate(
        &self,
        fileset: &Fileset,
        dest_addr: &str,
        dest_provider_id: u16,
        dest_root: &str,
        remove_source: bool,
    ) -> Result<(), MigrationFault> {
        // the metadata must describe a re-attachable database
        let db_type = fileset
            .metadata
            .get(Fileset::META_TYPE)
            .and_then(|t| DbType::parse(t))
            .ok_or(MigrationFault {
                status: FAULT_MISSING_METADATA,
            })?;
        let db_name = fileset
            .metadata
            .get(Fileset::META_NAME)
            .cloned()
            .ok_or(MigrationFault {
                status: FAULT_MISSING_METADATA,
            })?;
        let comparator = fileset
            .metadata
            .get(Fileset::META_COMPARATOR)
            .cloned()
            .ok_or(MigrationFault {
                status: FAULT_MISSING_METADATA,
            })?;

        let destination =
            self.destination(dest_addr, dest_provider_id)
                .ok_or(MigrationFault {
                    status: FAULT_UNKNOWN_DESTINATION,
                })?;

        // only file-backed backends travel as filesets
        if !matches!(db_type, DbType::BTree | DbType::Lsm) {
            return Err(MigrationFault {
                status: FAULT_TYPE_NOT_MIGRATABLE,
            });
        }
        if destination.find_by_name(&db_name).is_ok() {
            return Err(MigrationFault {
                status: FAULT_NAME_EXISTS,
            });
        }

        let mut config = DbConfig::new(&db_name, db_type).path(dest_root);
        if !comparator.is_empty() {
            config = config.comparator(&comparator);
        }
        if fileset.metadata.contains_key(Fileset::META_NO_OVERWRITE) {
            config.no_overwrite = true;
        }

        destination.run_pre_migration_callback(&config);

        // transfer the directory trees
        for dir in &fileset.directories {
            let src = fileset.root.join(dir);
            let dst = Path::new(dest_root).join(dir);
            copy_tree(&src, &dst).map_err(|e| {
                tracing::error!(src = %src.display(), dst = %dst.display(), error = %e,
                    "fileset transfer failed");
                MigrationFault {
                    status: FAULT_TRANSFER,
                }
            })?;
        }

        // record the descriptor next to the transferred tree
        let manifest = Path::new(dest_root).join(format!("{}.fileset.json", db_name));
        if let Ok(json) = serde_json::to_string_pretty(fileset) {
            let _ = std::fs::write(manifest, json);
        }

        if remove_source {
            for dir in &fileset.directories {
                let _ = std::fs::remove_dir_all(fileset.root.join(dir));
            }
        }

        let id = destination.attach_database(&config).map_err(|e| {
            tracing::error!(name = %db_name, error = %e, "re-attach at destination failed");
            MigrationFault {
                status: FAULT_ATTACH_FAILED,
            }
        })?;
        destination.run_post_migration_callback(&config, id);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_tree() {
        let src = tempfile::TempDir::new().unwrap();
        let dst = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("a.txt"), b"alpha").unwrap();
        std::fs::write(src.path().join("sub/b.txt"), b"beta").unwrap();

        copy_tree(src.path(), &dst.path().join("tree")).unwrap();

        assert_eq!(
            std::fs::read(dst.path().join("tree/a.txt")).unwrap(),
            b"alpha"
        );
        assert_eq!(
            std::fs::read(dst.path().join("tree/sub/b.txt")).unwrap(),
            b"beta"
        );
    }
}
