//! idlink Account Storage
//!
//! Persistence interface for local accounts and their provider links, with
//! pluggable backends:
//! - In-memory maps (default for tests and throwaway sessions)
//! - SQLite (with feature flag, on by default)

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

mod memory;
pub use memory::MemoryAccountStore;

#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteAccountStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Stable identifier of a local account row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id for a newly created account
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Storage key of a provider link: the provider plus the user id that
/// provider assigned to the person.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkKey {
    pub provider_id: String,
    pub provider_user_id: String,
}

impl LinkKey {
    pub fn new(provider_id: impl Into<String>, provider_user_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            provider_user_id: provider_user_id.into(),
        }
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider_id, self.provider_user_id)
    }
}

/// Account storage trait
///
/// Implementations own any transactional guarantees (an atomic
/// find-or-create, cascading deletes). Callers never retry.
pub trait AccountStore: Send + Sync {
    /// Account currently linked to this provider identity, if any
    fn find_account_id(&self, key: &LinkKey) -> Result<Option<AccountId>>;

    /// Create a new account and link the provider identity to it
    fn create_account(&self, key: &LinkKey, display_name: Option<&str>) -> Result<AccountId>;

    /// Link the provider identity to an existing account.
    /// Re-linking the same identity updates the association in place.
    fn associate(&self, key: &LinkKey, account_id: &AccountId) -> Result<()>;

    /// Remove a provider link. Missing links are ignored.
    fn delete_provider_link(&self, key: &LinkKey) -> Result<()>;

    /// Remove an account together with all of its provider links
    fn delete_account(&self, account_id: &AccountId) -> Result<()>;

    /// Ids of every provider with a persisted link to the account
    fn connected_provider_ids(&self, account_id: &AccountId) -> Result<BTreeSet<String>>;

    /// Backend name
    fn name(&self) -> &str;
}

/// Stored representation of an account row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAccount {
    pub id: AccountId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Configuration for account store backends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    pub backend: String,
    pub sqlite_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            sqlite_path: PathBuf::from("./data/idlink.db"),
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `IDLINK_STORE_BACKEND` and `IDLINK_SQLITE_PATH`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend: std::env::var("IDLINK_STORE_BACKEND").unwrap_or(defaults.backend),
            sqlite_path: std::env::var("IDLINK_SQLITE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.sqlite_path),
        }
    }
}

/// Create a store based on configuration
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn AccountStore>> {
    match config.backend.as_str() {
        "memory" => {
            info!("Using in-memory account store");
            Ok(Arc::new(MemoryAccountStore::new()))
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            info!("Using SQLite account store at {}", config.sqlite_path.display());
            Ok(Arc::new(SqliteAccountStore::open(&config.sqlite_path)?))
        }
        other => Err(StoreError::configuration(format!("Unknown store backend: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_memory_store() {
        let store = create_store(&StoreConfig::default()).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let config = StoreConfig {
            backend: "cassandra".to_string(),
            ..StoreConfig::default()
        };
        let err = create_store(&config).err().unwrap();
        assert!(matches!(err, StoreError::Configuration { .. }));
    }

    #[test]
    fn test_config_from_env() {
        std::env::set_var("IDLINK_STORE_BACKEND", "sqlite");
        std::env::set_var("IDLINK_SQLITE_PATH", "/tmp/idlink-test.db");
        let config = StoreConfig::from_env();
        std::env::remove_var("IDLINK_STORE_BACKEND");
        std::env::remove_var("IDLINK_SQLITE_PATH");

        assert_eq!(config.backend, "sqlite");
        assert_eq!(config.sqlite_path, PathBuf::from("/tmp/idlink-test.db"));
    }

    #[test]
    fn test_link_key_display() {
        let key = LinkKey::new("google", "1234");
        assert_eq!(key.to_string(), "google:1234");
    }

    #[test]
    fn test_account_id_serializes_as_plain_string() {
        let id = AccountId::new("acct-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"acct-1\"");
    }
}
