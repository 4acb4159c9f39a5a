//! Database configuration.

use std::fmt;
use std::path::PathBuf;

/// Context string for cipher key derivation. Changing it invalidates
/// every existing keyed database.
const KEY_DERIVE_CONTEXT: &str = "shiftdb 2025-01-20 database cipher key";

/// Key material for a keyed database file.
///
/// The key is derived from caller-supplied material; the raw material is
/// never stored. Databases opened with a key record a salted verifier in
/// their meta tree so later opens can detect a wrong or missing key.
#[derive(Clone)]
pub struct CipherKey {
    key: [u8; 32],
}

impl CipherKey {
    /// Derive a cipher key from raw key material.
    pub fn new(material: impl AsRef<[u8]>) -> Self {
        Self {
            key: blake3::derive_key(KEY_DERIVE_CONTEXT, material.as_ref()),
        }
    }

    /// Keyed hash of the salt, stored as the open-time verifier.
    pub(crate) fn verifier(&self, salt: &[u8]) -> [u8; 32] {
        *blake3::keyed_hash(&self.key, salt).as_bytes()
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        f.debug_struct("CipherKey").finish_non_exhaustive()
    }
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database directory.
    pub path: PathBuf,
    /// Cache capacity in bytes.
    pub cache_capacity: u64,
    /// How often to flush to disk (None = only on explicit flush).
    pub flush_every_ms: Option<u64>,
    /// Enable compression.
    pub compression: bool,
    /// Use temporary storage (removed on drop).
    pub temporary: bool,
    /// Cipher key for a keyed database file.
    pub cipher_key: Option<CipherKey>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./shiftdb_data"),
            cache_capacity: 1024 * 1024 * 1024, // 1GB
            flush_every_ms: Some(1000),         // Flush every second
            compression: true,
            temporary: false,
            cipher_key: None,
        }
    }
}

impl DatabaseConfig {
    /// Create a config with a custom path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a temporary database config (for testing).
    pub fn temporary() -> Self {
        Self {
            temporary: true,
            ..Default::default()
        }
    }

    /// Set the cache capacity.
    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Set the flush interval.
    pub fn with_flush_interval(mut self, ms: Option<u64>) -> Self {
        self.flush_every_ms = ms;
        self
    }

    /// Open the database with a cipher key.
    pub fn with_cipher_key(mut self, key: CipherKey) -> Self {
        self.cipher_key = Some(key);
        self
    }

    /// Convert to sled configuration.
    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let mut config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .use_compression(self.compression);

        if self.temporary {
            config = config.temporary(true);
        } else {
            config = config.path(&self.path);
        }

        if let Some(ms) = self.flush_every_ms {
            config = config.flush_every_ms(Some(ms));
        } else {
            config = config.flush_every_ms(None);
        }

        config
    }
}
