//! Account Error Types

use idlink_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Account has no resolved id; cannot {operation}")]
    Unresolved { operation: String },

    #[error("Provider {provider} returned no user id for the supplied data")]
    MissingProviderUserId { provider: String },
}

impl AccountError {
    pub fn unresolved(operation: impl Into<String>) -> Self {
        Self::Unresolved { operation: operation.into() }
    }

    pub fn missing_provider_user_id(provider: impl Into<String>) -> Self {
        Self::MissingProviderUserId { provider: provider.into() }
    }
}

/// Errors raised while building providers from configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Duplicate provider id: {0}")]
    DuplicateProvider(String),

    #[error("Invalid provider config: {message}")]
    Invalid { message: String },

    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AccountError>;
