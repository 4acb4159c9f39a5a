//! Persistent table registry.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sled::Tree;
use tracing::debug;

use super::table::TableDef;
use crate::error::Error;

/// Meta tree key prefix for table definitions.
const TABLE_KEY_PREFIX: &[u8] = b"table:";

/// Table definitions stored in a database's meta tree.
///
/// All definitions are cached in memory. The tree is read once at open
/// time and written through on every change.
pub struct SchemaRegistry {
    meta_tree: Tree,
    cache: DashMap<String, TableDef>,
}

impl SchemaRegistry {
    /// Load the registry from a meta tree.
    pub fn open(meta_tree: Tree) -> Result<Self, Error> {
        let cache = DashMap::new();
        for entry in meta_tree.scan_prefix(TABLE_KEY_PREFIX) {
            let (key, bytes) = entry?;
            let name = std::str::from_utf8(&key[TABLE_KEY_PREFIX.len()..])
                .map_err(|_| Error::InvalidKey)?
                .to_string();
            cache.insert(name, TableDef::from_bytes(&bytes)?);
        }
        Ok(Self { meta_tree, cache })
    }

    /// Define a new table and persist its definition.
    pub fn create_table(&self, def: TableDef) -> Result<(), Error> {
        def.check()?;
        match self.cache.entry(def.name.clone()) {
            Entry::Occupied(_) => Err(Error::TableExists(def.name)),
            Entry::Vacant(slot) => {
                self.meta_tree
                    .insert(Self::table_key(&def.name), def.to_bytes()?)?;
                debug!(table = %def.name, "Table created");
                slot.insert(def);
                Ok(())
            }
        }
    }

    /// Get a table definition by name.
    pub fn get(&self, name: &str) -> Option<TableDef> {
        self.cache.get(name).map(|entry| entry.value().clone())
    }

    /// Get a table definition or fail with UnknownTable.
    pub fn require(&self, name: &str) -> Result<TableDef, Error> {
        self.get(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    /// Whether the table is defined.
    pub fn contains(&self, name: &str) -> bool {
        self.cache.contains_key(name)
    }

    /// Remove a table definition. Returns whether it existed.
    pub fn drop_table(&self, name: &str) -> Result<bool, Error> {
        let cached = self.cache.remove(name).is_some();
        let stored = self.meta_tree.remove(Self::table_key(name))?.is_some();
        if cached || stored {
            debug!(table = %name, "Table definition dropped");
        }
        Ok(cached || stored)
    }

    /// Names of all defined tables, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn table_key(name: &str) -> Vec<u8> {
        let mut key = TABLE_KEY_PREFIX.to_vec();
        key.extend_from_slice(name.as_bytes());
        key
    }
}
