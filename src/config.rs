//! Provider configuration
//!
//! Providers are configured with a JSON document:
//!
//! ```json
//! {
//!   "comparators": [ { "name": "<name>", "library": "<path, may be empty>" } ],
//!   "databases":   [ { "name": "<name>", "type": "map|null|bdb|ldb|fwd",
//!                      "path": "<path>", "comparator": "<name>",
//!                      "no_overwrite": false } ]
//! }
//! ```
//!
//! Validation fills in defaults, reports a single reason on failure, and
//! runs before any provider state is touched. After initialization the
//! effective config carries a `__database_id__` per database entry.

use serde_json::Value;

use crate::datastore::DbType;
use crate::error::{KvError, KvResult};

/// Key injected into each database entry of the effective config.
pub const DATABASE_ID_KEY: &str = "__database_id__";

/// A validated comparator entry.
#[derive(Debug, Clone)]
pub struct ComparatorEntry {
    pub name: String,
    pub library: String,
}

/// A validated database entry.
#[derive(Debug, Clone)]
pub struct DatabaseEntry {
    pub name: String,
    pub db_type: DbType,
    pub path: String,
    pub comparator: String,
    pub no_overwrite: bool,
}

fn config_err(reason: &str) -> KvError {
    tracing::error!(reason, "invalid provider configuration");
    KvError::Config(reason.to_string())
}

/// Validate a provider config, filling defaults in place.
///
/// On error the config may have partially-filled defaults but no provider
/// state has been touched; the single failure reason is carried in the
/// error.
pub fn validate_and_complete(config: &mut Value) -> KvResult<()> {
    if config.is_null() {
        *config = serde_json::json!({});
    }
    if !config.is_object() {
        return Err(config_err("config is not an object"));
    }

    // comparators
    if config.get("comparators").is_none() {
        config["comparators"] = Value::Array(Vec::new());
    }
    let comparators = config["comparators"]
        .as_array_mut()
        .ok_or_else(|| config_err("\"comparators\" field should be an array"))?;
    let mut comparator_names = std::collections::HashSet::new();
    for entry in comparators.iter_mut() {
        let obj = entry
            .as_object_mut()
            .ok_or_else(|| config_err("\"comparators\" array should contain objects"))?;
        let name = obj
            .get("name")
            .ok_or_else(|| config_err("missing \"name\" field in comparator"))?
            .as_str()
            .ok_or_else(|| config_err("comparator name should be a string"))?
            .to_string();
        if name.is_empty() {
            return Err(config_err("empty name in comparator"));
        }
        if !obj.contains_key("library") {
            obj.insert("library".to_string(), Value::String(String::new()));
        }
        if !obj["library"].is_string() {
            return Err(config_err("comparator library should be a string"));
        }
        if !comparator_names.insert(name) {
            return Err(config_err("multiple comparators with the same name"));
        }
    }

    // databases
    if config.get("databases").is_none() {
        config["databases"] = Value::Array(Vec::new());
    }
    let databases = config["databases"]
        .as_array_mut()
        .ok_or_else(|| config_err("\"databases\" field should be an array"))?;
    let mut database_names = std::collections::HashSet::new();
    for entry in databases.iter_mut() {
        let obj = entry
            .as_object_mut()
            .ok_or_else(|| config_err("\"databases\" array should contain objects"))?;
        let name = obj
            .get("name")
            .ok_or_else(|| config_err("missing \"name\" field in database"))?
            .as_str()
            .ok_or_else(|| config_err("database name should be a string"))?
            .to_string();
        if name.is_empty() {
            return Err(config_err("database name is empty"));
        }
        let db_type = obj
            .get("type")
            .ok_or_else(|| config_err("missing \"type\" field in database"))?
            .as_str()
            .ok_or_else(|| config_err("database type should be a string"))?;
        if db_type.is_empty() {
            return Err(config_err("database type is empty"));
        }
        if !obj.contains_key("path") {
            obj.insert("path".to_string(), Value::String(String::new()));
        }
        if !obj["path"].is_string() {
            return Err(config_err("database path should be a string"));
        }
        if !obj.contains_key("comparator") {
            obj.insert("comparator".to_string(), Value::String(String::new()));
        }
        if !obj["comparator"].is_string() {
            return Err(config_err("database comparator should be a string"));
        }
        if !obj.contains_key("no_overwrite") {
            obj.insert("no_overwrite".to_string(), Value::Bool(false));
        }
        if !obj["no_overwrite"].is_boolean() {
            return Err(config_err("no_overwrite field should be a boolean"));
        }
        if !database_names.insert(name) {
            return Err(config_err("multiple databases with the same name"));
        }
    }

    Ok(())
}

/// Comparator entries of a validated config.
pub fn comparator_entries(config: &Value) -> Vec<ComparatorEntry> {
    config["comparators"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .map(|e| ComparatorEntry {
                    name: e["name"].as_str().unwrap_or("").to_string(),
                    library: e["library"].as_str().unwrap_or("").to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Database entries of a validated config. Unknown type tags are a
/// configuration error.
pub fn database_entries(config: &Value) -> KvResult<Vec<DatabaseEntry>> {
    let mut out = Vec::new();
    if let Some(entries) = config["databases"].as_array() {
        for e in entries {
            let type_tag = e["type"].as_str().unwrap_or("");
            let db_type = DbType::parse(type_tag)
                .ok_or_else(|| config_err("unknown database type"))?;
            out.push(DatabaseEntry {
                name: e["name"].as_str().unwrap_or("").to_string(),
                db_type,
                path: e["path"].as_str().unwrap_or("").to_string(),
                comparator: e["comparator"].as_str().unwrap_or("").to_string(),
                no_overwrite: e["no_overwrite"].as_bool().unwrap_or(false),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_filled() {
        let mut config = json!({
            "databases": [ { "name": "db", "type": "map" } ]
        });
        validate_and_complete(&mut config).unwrap();
        assert_eq!(config["databases"][0]["path"], "");
        assert_eq!(config["databases"][0]["comparator"], "");
        assert_eq!(config["databases"][0]["no_overwrite"], false);
        assert!(config["comparators"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_null_becomes_empty() {
        let mut config = Value::Null;
        validate_and_complete(&mut config).unwrap();
        assert!(config.is_object());
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let mut config = json!({
            "databases": [
                { "name": "db", "type": "map" },
                { "name": "db", "type": "null" }
            ]
        });
        assert!(matches!(
            validate_and_complete(&mut config),
            Err(KvError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_bad_shapes() {
        for bad in [
            json!([]),
            json!({ "comparators": {} }),
            json!({ "comparators": [ { "library": "x" } ] }),
            json!({ "databases": [ { "type": "map" } ] }),
            json!({ "databases": [ { "name": "db" } ] }),
            json!({ "databases": [ { "name": "db", "type": "map", "no_overwrite": "yes" } ] }),
        ] {
            let mut config = bad;
            assert!(validate_and_complete(&mut config).is_err());
        }
    }

    #[test]
    fn test_database_entries_unknown_type() {
        let mut config = json!({
            "databases": [ { "name": "db", "type": "mystery" } ]
        });
        validate_and_complete(&mut config).unwrap();
        assert!(database_entries(&config).is_err());
    }
}
