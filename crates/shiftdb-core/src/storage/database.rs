//! Database handle over sled.
//!
//! One `Database` owns one sled file: a meta tree holding table
//! definitions and the cipher verifier, plus one tree per table. All
//! writers serialize on the write gate; readers never take it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use sled::{Db, Tree};
use tracing::debug;

use super::config::{CipherKey, DatabaseConfig};
use super::key::RowKey;
use super::row::Row;
use super::transaction::WriteBatch;
use crate::error::Error;
use crate::schema::{SchemaRegistry, TableDef};

/// Tree holding table definitions and the cipher verifier.
const META_TREE: &str = "meta";
/// Prefix for per-table trees.
const TABLE_TREE_PREFIX: &str = "table:";
/// Meta key for the cipher salt.
const CIPHER_SALT_KEY: &[u8] = b"cipher:salt";
/// Meta key for the cipher verifier.
const CIPHER_VERIFIER_KEY: &[u8] = b"cipher:verifier";

static SALT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Salt for the cipher verifier: unique per database file.
fn generate_salt() -> [u8; 16] {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before Unix epoch")
        .as_nanos() as u64;
    let count = SALT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut salt = [0u8; 16];
    salt[..8].copy_from_slice(&nanos.to_be_bytes());
    salt[8..].copy_from_slice(&count.to_be_bytes());
    salt
}

/// An open database file.
pub struct Database {
    /// Underlying sled database.
    db: Db,
    /// Table definitions.
    schemas: SchemaRegistry,
    /// Cache of opened per-table trees.
    tables: DashMap<String, Tree>,
    /// Serializes all writers against this file.
    write_gate: Mutex<()>,
    /// Path label for error messages.
    path: String,
}

impl Database {
    /// Open (or create) a database.
    ///
    /// Fails with [`Error::CipherRequired`] when the file is keyed and no
    /// key was supplied, and [`Error::CipherMismatch`] when the supplied
    /// key does not match.
    pub fn open(config: DatabaseConfig) -> Result<Self, Error> {
        let path = if config.temporary {
            "<temporary>".to_string()
        } else {
            config.path.display().to_string()
        };
        let db = config.to_sled_config().open()?;
        let meta_tree = db.open_tree(META_TREE)?;
        Self::verify_cipher(&meta_tree, config.cipher_key.as_ref(), &path)?;
        let schemas = SchemaRegistry::open(meta_tree)?;

        debug!(
            path = %path,
            recovered = db.was_recovered(),
            "Database opened"
        );

        Ok(Self {
            db,
            schemas,
            tables: DashMap::new(),
            write_gate: Mutex::new(()),
            path,
        })
    }

    fn verify_cipher(
        meta_tree: &Tree,
        key: Option<&CipherKey>,
        path: &str,
    ) -> Result<(), Error> {
        let salt = meta_tree.get(CIPHER_SALT_KEY)?;
        match (key, salt) {
            (None, None) => Ok(()),
            (None, Some(_)) => Err(Error::CipherRequired(path.to_string())),
            (Some(key), None) => {
                // First keyed open installs the salt and verifier.
                let salt = generate_salt();
                let verifier = key.verifier(&salt);
                meta_tree.insert(CIPHER_SALT_KEY, &salt[..])?;
                meta_tree.insert(CIPHER_VERIFIER_KEY, &verifier[..])?;
                Ok(())
            }
            (Some(key), Some(salt)) => {
                let expected = key.verifier(&salt);
                match meta_tree.get(CIPHER_VERIFIER_KEY)? {
                    Some(stored) if stored[..] == expected[..] => Ok(()),
                    _ => Err(Error::CipherMismatch(path.to_string())),
                }
            }
        }
    }

    /// Path label this database was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the on-disk state predates this open.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Define a new table.
    pub fn create_table(&self, def: TableDef) -> Result<(), Error> {
        self.schemas.create_table(def)
    }

    /// Get a table definition.
    pub fn table(&self, name: &str) -> Option<TableDef> {
        self.schemas.get(name)
    }

    /// Whether a table is defined.
    pub fn has_table(&self, name: &str) -> bool {
        self.schemas.contains(name)
    }

    /// Names of all defined tables, sorted.
    pub fn list_tables(&self) -> Vec<String> {
        self.schemas.list()
    }

    /// Remove a table: its definition and all its rows.
    ///
    /// Returns whether anything existed to remove.
    pub fn drop_table(&self, name: &str) -> Result<bool, Error> {
        self.tables.remove(name);
        let defined = self.schemas.drop_table(name)?;
        let stored = self.db.drop_tree(Self::tree_name(name))?;
        Ok(defined || stored)
    }

    /// Insert or replace one row. Returns the row's key.
    pub fn put(&self, table: &str, row: Row) -> Result<RowKey, Error> {
        let def = self.schemas.require(table)?;
        def.validate_row(&row)?;
        let key = def.primary_key_of(&row)?;
        let tree = self.table_tree(table)?;
        tree.insert(key.encode(), row.to_bytes()?)?;
        Ok(key)
    }

    /// Get one row by key.
    pub fn get(&self, table: &str, key: &RowKey) -> Result<Option<Row>, Error> {
        let tree = self.table_tree(table)?;
        match tree.get(key.encode())? {
            Some(bytes) => Ok(Some(Row::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether a row with this key exists.
    pub fn contains_key(&self, table: &str, key: &RowKey) -> Result<bool, Error> {
        let tree = self.table_tree(table)?;
        Ok(tree.contains_key(key.encode())?)
    }

    /// Delete one row by key. Returns whether it existed.
    pub fn delete(&self, table: &str, key: &RowKey) -> Result<bool, Error> {
        let tree = self.table_tree(table)?;
        Ok(tree.remove(key.encode())?.is_some())
    }

    /// Rows in key order, starting at `start` (inclusive) when given.
    pub fn scan_from(
        &self,
        table: &str,
        start: Option<&RowKey>,
        limit: Option<usize>,
    ) -> Result<Vec<(RowKey, Row)>, Error> {
        let tree = self.table_tree(table)?;
        let iter = match start {
            Some(key) => tree.range(key.encode()..),
            None => tree.iter(),
        };
        let mut rows = Vec::new();
        for entry in iter {
            if limit.map_or(false, |n| rows.len() >= n) {
                break;
            }
            let (key_bytes, value_bytes) = entry?;
            let key = RowKey::decode(&key_bytes).ok_or(Error::InvalidKey)?;
            rows.push((key, Row::from_bytes(&value_bytes)?));
        }
        Ok(rows)
    }

    /// Number of rows in the table.
    pub fn count(&self, table: &str) -> Result<u64, Error> {
        let tree = self.table_tree(table)?;
        Ok(tree.len() as u64)
    }

    /// Start a write batch against this database.
    pub fn write_batch(&self) -> WriteBatch<'_> {
        WriteBatch::new(self)
    }

    /// Acquire the write gate, blocking until it is free.
    pub fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_gate.lock()
    }

    /// Acquire the write gate, giving up after the timeout.
    pub fn try_lock_writes(&self, timeout: Duration) -> Option<MutexGuard<'_, ()>> {
        self.write_gate.try_lock_for(timeout)
    }

    /// Flush dirty buffers to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    /// Table definitions, for validation inside write batches.
    pub(crate) fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Tree backing a table, for batched and transactional writes.
    pub(crate) fn table_tree(&self, table: &str) -> Result<Tree, Error> {
        if let Some(tree) = self.tables.get(table) {
            return Ok(tree.value().clone());
        }
        if !self.schemas.contains(table) {
            return Err(Error::UnknownTable(table.to_string()));
        }
        let tree = self.db.open_tree(Self::tree_name(table))?;
        self.tables.insert(table.to_string(), tree.clone());
        Ok(tree)
    }

    fn tree_name(table: &str) -> String {
        format!("{TABLE_TREE_PREFIX}{table}")
    }
}
