//! idlink Core
//!
//! Account identity reconciliation:
//! - Linking provider logins to a local account (find-or-create)
//! - Unlinking providers
//! - Detecting duplicate accounts that can be merged
//! - Merging accounts without losing provider links

pub mod account;
pub mod error;
pub mod provider;

pub use account::{Account, Identity};
pub use error::{AccountError, ConfigError, Result};
pub use provider::{ClaimProvider, Feature, Provider, ProviderConfig, ProviderRegistry};

pub use idlink_store::{AccountId, AccountStore, LinkKey, StoreError};
