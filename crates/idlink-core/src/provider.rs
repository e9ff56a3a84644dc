//! Identity Providers
//!
//! A provider names an external IDP, advertises optional capabilities and
//! knows how to pull its own user id out of the login payload it produced.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::ConfigError;

/// Optional capability a provider may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Feature {
    /// Basic profile (name, avatar)
    Profile,
    /// Verified email address
    Email,
    /// Sharing content to the provider
    Share,
    /// Interactive posts with call-to-action buttons
    InteractivePost,
    /// Server-side access while the user is away
    OfflineAccess,
    /// Provider issues refreshable tokens
    TokenRefresh,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::Profile,
        Feature::Email,
        Feature::Share,
        Feature::InteractivePost,
        Feature::OfflineAccess,
        Feature::TokenRefresh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Profile => "PROFILE",
            Feature::Email => "EMAIL",
            Feature::Share => "SHARE",
            Feature::InteractivePost => "INTERACTIVE_POST",
            Feature::OfflineAccess => "OFFLINE_ACCESS",
            Feature::TokenRefresh => "TOKEN_REFRESH",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownFeature(s.to_string()))
    }
}

/// An external identity provider
pub trait Provider: Send + Sync + fmt::Debug {
    /// Stable provider id (e.g. "google")
    fn id(&self) -> &str;

    /// Whether the provider supports the capability
    fn has_feature(&self, feature: Feature) -> bool;

    /// Provider-specific user id carried by a login payload
    fn user_id(&self, data: &Value) -> Option<String>;
}

/// Provider definition as found in configuration files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: String,

    /// Top-level payload field holding the provider's user id
    pub user_id_claim: String,

    #[serde(default)]
    pub features: Vec<Feature>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, user_id_claim: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id_claim: user_id_claim.into(),
            features: Vec::new(),
        }
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }

    pub fn with_features(mut self, features: impl IntoIterator<Item = Feature>) -> Self {
        self.features.extend(features);
        self
    }
}

/// Provider that reads the user id from a single payload claim.
/// String and integer claims are accepted.
#[derive(Debug, Clone)]
pub struct ClaimProvider {
    id: String,
    user_id_claim: String,
    features: HashSet<Feature>,
}

impl ClaimProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ConfigError> {
        if config.id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "provider id must not be empty".to_string(),
            });
        }
        if config.user_id_claim.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: format!("provider {} has no user id claim", config.id),
            });
        }
        Ok(Self::build(config))
    }

    fn build(config: ProviderConfig) -> Self {
        Self {
            id: config.id,
            user_id_claim: config.user_id_claim,
            features: config.features.into_iter().collect(),
        }
    }
}

impl Provider for ClaimProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    fn user_id(&self, data: &Value) -> Option<String> {
        match data.get(&self.user_id_claim)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Lookup table of configured providers keyed by provider id
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the stock sign-in providers
    pub fn with_defaults() -> Self {
        let providers = default_provider_configs()
            .into_iter()
            .map(|config| {
                let provider: Arc<dyn Provider> = Arc::new(ClaimProvider::build(config));
                (provider.id().to_string(), provider)
            })
            .collect();
        Self { providers }
    }

    pub fn from_configs(
        configs: impl IntoIterator<Item = ProviderConfig>,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(Arc::new(ClaimProvider::new(config)?))?;
        }
        Ok(registry)
    }

    /// Load a JSON array of provider configs
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let configs: Vec<ProviderConfig> = serde_json::from_str(&raw)?;
        info!("Loaded {} provider definitions from {}", configs.len(), path.display());
        Self::from_configs(configs)
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Result<(), ConfigError> {
        let id = provider.id().to_string();
        if self.providers.contains_key(&id) {
            return Err(ConfigError::DuplicateProvider(id));
        }
        self.providers.insert(id, provider);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn default_provider_configs() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new("email", "email"),
        ProviderConfig::new("facebook", "id").with_features([Feature::Profile, Feature::Share]),
        ProviderConfig::new("github", "id").with_features([Feature::Profile, Feature::Email]),
        ProviderConfig::new("google", "sub").with_features([
            Feature::Profile,
            Feature::Email,
            Feature::InteractivePost,
            Feature::OfflineAccess,
            Feature::TokenRefresh,
        ]),
    ]
}
