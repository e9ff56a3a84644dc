//! SQLite account store
//!
//! Two tables: `accounts` holds one row per local account and
//! `provider_links` maps `(provider_id, provider_user_id)` to an account.
//! Links cascade on account deletion.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::{AccountId, AccountStore, LinkKey, Result, StoreError, StoredAccount};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    display_name TEXT,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS provider_links (
    provider_id TEXT NOT NULL,
    provider_user_id TEXT NOT NULL,
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    linked_at TEXT NOT NULL,
    PRIMARY KEY (provider_id, provider_user_id)
);
CREATE INDEX IF NOT EXISTS idx_provider_links_account ON provider_links(account_id);
";

/// Account store persisted in a SQLite database.
///
/// The connection is not `Sync`, so it sits behind a mutex and every
/// operation runs to completion while holding it.
pub struct SqliteAccountStore {
    conn: Mutex<Connection>,
}

impl SqliteAccountStore {
    /// Open (or create) the database at `path` and apply the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!("Opened account database {}", path.display());
        Self::init(conn)
    }

    /// Private database that disappears with the store
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn get_account(&self, account_id: &AccountId) -> Result<Option<StoredAccount>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, display_name, created_at FROM accounts WHERE id = ?1",
                params![account_id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, display_name, created_at)) = row else {
            return Ok(None);
        };
        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StoreError::backend(format!("Invalid created_at for {}: {}", id, e)))?
            .with_timezone(&Utc);

        Ok(Some(StoredAccount {
            id: AccountId::new(id),
            display_name,
            created_at,
        }))
    }

    pub fn contains_account(&self, account_id: &AccountId) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE id = ?1",
            params![account_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl AccountStore for SqliteAccountStore {
    fn find_account_id(&self, key: &LinkKey) -> Result<Option<AccountId>> {
        let conn = self.conn.lock();
        let id = conn
            .query_row(
                "SELECT account_id FROM provider_links
                 WHERE provider_id = ?1 AND provider_user_id = ?2",
                params![key.provider_id, key.provider_user_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(id.map(AccountId::new))
    }

    fn create_account(&self, key: &LinkKey, display_name: Option<&str>) -> Result<AccountId> {
        let id = AccountId::generate();
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO accounts (id, display_name, created_at) VALUES (?1, ?2, ?3)",
            params![id.as_str(), display_name, now],
        )?;
        tx.execute(
            "INSERT INTO provider_links (provider_id, provider_user_id, account_id, linked_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(provider_id, provider_user_id) DO UPDATE SET
                account_id = excluded.account_id,
                linked_at = excluded.linked_at",
            params![key.provider_id, key.provider_user_id, id.as_str(), now],
        )?;
        tx.commit()?;

        debug!("Created account [{}] for {}", id, key);
        Ok(id)
    }

    fn associate(&self, key: &LinkKey, account_id: &AccountId) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO provider_links (provider_id, provider_user_id, account_id, linked_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(provider_id, provider_user_id) DO UPDATE SET
                account_id = excluded.account_id,
                linked_at = excluded.linked_at",
            params![
                key.provider_id,
                key.provider_user_id,
                account_id.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn delete_provider_link(&self, key: &LinkKey) -> Result<()> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM provider_links WHERE provider_id = ?1 AND provider_user_id = ?2",
            params![key.provider_id, key.provider_user_id],
        )?;
        if removed == 0 {
            debug!("No stored link for {}", key);
        }
        Ok(())
    }

    fn delete_account(&self, account_id: &AccountId) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM accounts WHERE id = ?1", params![account_id.as_str()])?;
        debug!("Deleted account [{}]", account_id);
        Ok(())
    }

    fn connected_provider_ids(&self, account_id: &AccountId) -> Result<BTreeSet<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT provider_id FROM provider_links WHERE account_id = ?1")?;
        let ids = stmt
            .query_map(params![account_id.as_str()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<String>>>()?;
        Ok(ids)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
