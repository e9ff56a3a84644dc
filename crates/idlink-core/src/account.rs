//! Account Entity
//!
//! In-memory view of one local account and the providers currently signed
//! in to it. Every mutation that touches identity goes through the injected
//! [`AccountStore`]; the account itself holds no locks and expects callers to
//! serialize access (one instance per session).

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use idlink_store::{AccountId, AccountStore, LinkKey};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{AccountError, Result};
use crate::provider::{Feature, Provider};

/// Whether the account is backed by a stored row yet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Identity {
    /// No provider link has been resolved against storage
    #[default]
    Unresolved,
    /// Backed by the stored account with this id
    Resolved(AccountId),
}

impl Identity {
    pub fn id(&self) -> Option<&AccountId> {
        match self {
            Identity::Unresolved => None,
            Identity::Resolved(id) => Some(id),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Identity::Resolved(_))
    }
}

#[derive(Debug, Clone)]
struct LinkedProvider {
    provider: Arc<dyn Provider>,
    data: Value,
}

/// A local account reachable through one or more identity providers
pub struct Account {
    store: Arc<dyn AccountStore>,
    identity: Identity,
    display_name: Option<String>,
    newly_created: bool,
    providers: HashMap<String, LinkedProvider>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("identity", &self.identity)
            .field("display_name", &self.display_name)
            .field("newly_created", &self.newly_created)
            .field("providers", &self.connected_provider_ids())
            .finish_non_exhaustive()
    }
}

impl Account {
    /// Empty, unresolved account. Does not touch storage.
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self {
            store,
            identity: Identity::Unresolved,
            display_name: None,
            newly_created: false,
            providers: HashMap::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = Some(name.into());
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn id(&self) -> Option<&AccountId> {
        self.identity.id()
    }

    /// True when the latest resolution created a new stored account
    pub fn is_newly_created(&self) -> bool {
        self.newly_created
    }

    pub fn is_signed_in(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Record a successful provider login and persist the link.
    ///
    /// An unresolved account is resolved here: an existing account linked to
    /// the same provider identity is adopted, otherwise a new one is created.
    /// A resolved account just (re)associates the link with its id.
    pub fn link_provider(&mut self, provider: Arc<dyn Provider>, data: Value) -> Result<()> {
        let key = link_key(provider.as_ref(), &data)?;

        if let Some(id) = self.identity.id().cloned() {
            self.store.associate(&key, &id)?;
            debug!("Associated {} with account [{}]", key, id);
        } else {
            match self.store.find_account_id(&key)? {
                Some(id) => {
                    info!("Signed in to existing account [{}] via {}", id, key.provider_id);
                    self.identity = Identity::Resolved(id);
                    self.newly_created = false;
                }
                None => {
                    let id = self.store.create_account(&key, self.display_name.as_deref())?;
                    info!("Created account [{}] via {}", id, key.provider_id);
                    self.identity = Identity::Resolved(id);
                    self.newly_created = true;
                }
            }
        }

        // Only a persisted link is visible in memory
        self.providers
            .insert(provider.id().to_string(), LinkedProvider { provider, data });
        Ok(())
    }

    /// Unlink a provider from this account, in storage and in memory.
    /// Providers that are not linked are ignored.
    pub fn remove_provider(&mut self, provider: &dyn Provider) -> Result<()> {
        let Some(linked) = self.providers.get(provider.id()) else {
            debug!("Provider {} not linked; nothing to remove", provider.id());
            return Ok(());
        };

        let key = link_key(linked.provider.as_ref(), &linked.data)?;
        self.store.delete_provider_link(&key)?;
        self.providers.remove(provider.id());
        debug!("Removed link {}", key);
        Ok(())
    }

    pub fn provider_data(&self, provider: &dyn Provider) -> Option<&Value> {
        self.providers.get(provider.id()).map(|linked| &linked.data)
    }

    pub fn provider_user_id(&self, provider: &dyn Provider) -> Option<String> {
        self.provider_data(provider).and_then(|data| provider.user_id(data))
    }

    /// Whether any linked provider supports the feature
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.providers
            .values()
            .any(|linked| linked.provider.has_feature(feature))
    }

    /// Linked providers, ordered by provider id
    pub fn connected_providers(&self) -> Vec<Arc<dyn Provider>> {
        let mut providers: Vec<_> = self
            .providers
            .values()
            .map(|linked| linked.provider.clone())
            .collect();
        providers.sort_by(|a, b| a.id().cmp(b.id()));
        providers
    }

    pub fn connected_provider_ids(&self) -> BTreeSet<String> {
        self.providers.keys().cloned().collect()
    }

    /// Providers stored against this account that are not signed in to
    /// this session. Empty for an unresolved account.
    pub fn additional_providers(&self) -> Result<BTreeSet<String>> {
        let Some(id) = self.identity.id() else {
            return Ok(BTreeSet::new());
        };

        let mut stored = self.store.connected_provider_ids(id)?;
        stored.retain(|provider_id| !self.providers.contains_key(provider_id));
        Ok(stored)
    }

    /// Whether `other` can be folded into this account.
    ///
    /// Two views of the same identity always merge. Distinct identities merge
    /// only when no provider is linked on both sides; an overlap needs manual
    /// reconciliation.
    pub fn can_merge(&self, other: &Account) -> bool {
        if self.identity == other.identity {
            return true;
        }
        !self
            .providers
            .keys()
            .any(|provider_id| other.providers.contains_key(provider_id))
    }

    /// Fold `other` into this account.
    ///
    /// When the identities differ the donor's stored account is deleted first
    /// and each of its providers is re-linked here. When they are the same
    /// account only the in-memory links are copied. A provider linked on
    /// both sides keeps this account's payload and the donor's is dropped.
    pub fn merge(&mut self, other: &Account) -> Result<()> {
        let same_identity = self.identity == other.identity;

        if !same_identity {
            match other.id() {
                Some(_) => other.delete()?,
                None => debug!("Donor account is unresolved; nothing stored to delete"),
            }
        }

        let mut donated: Vec<&LinkedProvider> = other.providers.values().collect();
        donated.sort_by(|a, b| a.provider.id().cmp(b.provider.id()));

        for linked in donated {
            let provider_id = linked.provider.id();
            if self.providers.contains_key(provider_id) {
                warn!(
                    "Provider {} linked on both sides of merge; keeping receiver data",
                    provider_id
                );
                continue;
            }

            if same_identity {
                self.providers.insert(provider_id.to_string(), linked.clone());
            } else {
                self.link_provider(linked.provider.clone(), linked.data.clone())?;
            }
        }

        info!(
            "Merged account {:?} into {:?}",
            other.id().map(AccountId::as_str),
            self.id().map(AccountId::as_str)
        );
        Ok(())
    }

    /// Delete the stored account and all of its provider links
    pub fn delete(&self) -> Result<()> {
        let id = self
            .identity
            .id()
            .ok_or_else(|| AccountError::unresolved("delete"))?;
        self.store.delete_account(id)?;
        info!("Deleted account [{}]", id);
        Ok(())
    }
}

fn link_key(provider: &dyn Provider, data: &Value) -> Result<LinkKey> {
    let user_id = provider
        .user_id(data)
        .ok_or_else(|| AccountError::missing_provider_user_id(provider.id()))?;
    Ok(LinkKey::new(provider.id(), user_id))
}
