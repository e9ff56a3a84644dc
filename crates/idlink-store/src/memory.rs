//! In-memory account store

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{AccountId, AccountStore, LinkKey, Result, StoreError, StoredAccount};

#[derive(Default)]
struct State {
    accounts: HashMap<AccountId, StoredAccount>,
    links: HashMap<LinkKey, AccountId>,
}

/// Account store backed by process memory. Contents are lost on drop.
#[derive(Default)]
pub struct MemoryAccountStore {
    state: Mutex<State>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_account(&self, account_id: &AccountId) -> bool {
        self.state.lock().accounts.contains_key(account_id)
    }

    pub fn get_account(&self, account_id: &AccountId) -> Option<StoredAccount> {
        self.state.lock().accounts.get(account_id).cloned()
    }

    pub fn account_count(&self) -> usize {
        self.state.lock().accounts.len()
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }
}

impl AccountStore for MemoryAccountStore {
    fn find_account_id(&self, key: &LinkKey) -> Result<Option<AccountId>> {
        Ok(self.state.lock().links.get(key).cloned())
    }

    fn create_account(&self, key: &LinkKey, display_name: Option<&str>) -> Result<AccountId> {
        let id = AccountId::generate();
        let mut state = self.state.lock();
        state.accounts.insert(
            id.clone(),
            StoredAccount {
                id: id.clone(),
                display_name: display_name.map(str::to_string),
                created_at: Utc::now(),
            },
        );
        state.links.insert(key.clone(), id.clone());
        debug!("Created account [{}] for {}", id, key);
        Ok(id)
    }

    fn associate(&self, key: &LinkKey, account_id: &AccountId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.accounts.contains_key(account_id) {
            return Err(StoreError::backend(format!("Account not found: {}", account_id)));
        }
        if let Some(previous) = state.links.insert(key.clone(), account_id.clone()) {
            if &previous != account_id {
                warn!("Moved link {} from account [{}] to [{}]", key, previous, account_id);
            }
        }
        Ok(())
    }

    fn delete_provider_link(&self, key: &LinkKey) -> Result<()> {
        self.state.lock().links.remove(key);
        Ok(())
    }

    fn delete_account(&self, account_id: &AccountId) -> Result<()> {
        let mut state = self.state.lock();
        state.accounts.remove(account_id);
        state.links.retain(|_, linked| *linked != *account_id);
        debug!("Deleted account [{}]", account_id);
        Ok(())
    }

    fn connected_provider_ids(&self, account_id: &AccountId) -> Result<BTreeSet<String>> {
        Ok(self
            .state
            .lock()
            .links
            .iter()
            .filter(|(_, linked)| *linked == account_id)
            .map(|(key, _)| key.provider_id.clone())
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
