//! idlink Development CLI
//!
//! Drives the account linking core against a local store:
//! - `link`: sign in with one or more provider logins
//! - `unlink`: drop a provider from the resolved account
//! - `merge`: fold one signed-in account into another
//! - `additional`: list stored providers not signed in this session
//! - `delete`: remove the resolved account
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `IDLINK_STORE_BACKEND` | `sqlite` | Store backend: `memory` or `sqlite` |
//! | `IDLINK_SQLITE_PATH` | `./data/idlink.db` | SQLite database file |
//! | `IDLINK_PROVIDERS_FILE` | - | JSON list of provider definitions |
//! | `RUST_LOG` | `info` | Log level |

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use idlink_core::{Account, AccountStore, ProviderRegistry};
use idlink_store::{create_store, StoreConfig};

/// idlink Development CLI
#[derive(Parser, Debug)]
#[command(name = "idlink-dev")]
#[command(about = "Link, merge and inspect local accounts reachable through identity providers")]
struct Args {
    /// Store backend: memory, sqlite
    #[arg(long, env = "IDLINK_STORE_BACKEND", default_value = "sqlite")]
    store_backend: String,

    /// SQLite database path
    #[arg(long, env = "IDLINK_SQLITE_PATH", default_value = "./data/idlink.db")]
    sqlite_path: PathBuf,

    /// JSON file with provider definitions (defaults to the stock providers)
    #[arg(long, env = "IDLINK_PROVIDERS_FILE")]
    providers_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with provider logins and report the resolved account
    Link {
        #[command(flatten)]
        session: Session,

        /// Display name stored when a new account is created
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove a provider link from the resolved account
    Unlink {
        #[command(flatten)]
        session: Session,

        /// Provider id to unlink
        #[arg(long)]
        provider: String,
    },
    /// Merge the `--from` account into the `--into` account
    Merge {
        /// Logins of the receiving account, as provider=json
        #[arg(long = "into", required = true, value_parser = parse_login)]
        into: Vec<Login>,

        /// Logins of the donor account, as provider=json
        #[arg(long = "from", required = true, value_parser = parse_login)]
        from: Vec<Login>,

        /// Merge even when both accounts share a provider
        #[arg(long, default_value = "false")]
        force: bool,
    },
    /// List providers stored for the account but not signed in
    Additional {
        #[command(flatten)]
        session: Session,
    },
    /// Delete the resolved account and all of its links
    Delete {
        #[command(flatten)]
        session: Session,
    },
}

#[derive(ClapArgs, Debug)]
struct Session {
    /// Provider login as provider=json, e.g. google='{"sub":"123"}'
    #[arg(long = "login", required = true, value_parser = parse_login)]
    logins: Vec<Login>,
}

#[derive(Debug, Clone)]
struct Login {
    provider: String,
    data: Value,
}

fn parse_login(raw: &str) -> std::result::Result<Login, String> {
    let (provider, data) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected provider=json, got '{}'", raw))?;
    let data = serde_json::from_str(data).map_err(|e| format!("invalid login JSON: {}", e))?;
    Ok(Login {
        provider: provider.trim().to_string(),
        data,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountSummary {
    id: Option<String>,
    display_name: Option<String>,
    newly_created: bool,
    connected_providers: BTreeSet<String>,
    additional_providers: BTreeSet<String>,
}

impl AccountSummary {
    fn of(account: &Account) -> Result<Self> {
        Ok(Self {
            id: account.id().map(ToString::to_string),
            display_name: account.display_name().map(str::to_string),
            newly_created: account.is_newly_created(),
            connected_providers: account.connected_provider_ids(),
            additional_providers: account.additional_providers()?,
        })
    }
}

fn sign_in(
    store: &Arc<dyn AccountStore>,
    registry: &ProviderRegistry,
    logins: &[Login],
    name: Option<&str>,
) -> Result<Account> {
    let mut account = Account::new(store.clone());
    if let Some(name) = name {
        account.set_display_name(name);
    }
    for login in logins {
        let provider = registry
            .get(&login.provider)
            .ok_or_else(|| anyhow!("Unknown provider: {}", login.provider))?;
        account
            .link_provider(provider, login.data.clone())
            .with_context(|| format!("Failed to link {}", login.provider))?;
    }
    Ok(account)
}

fn print_summary(account: &Account) -> Result<()> {
    let summary = AccountSummary::of(account)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let store = create_store(&StoreConfig {
        backend: args.store_backend.clone(),
        sqlite_path: args.sqlite_path.clone(),
    })?;

    let registry = match &args.providers_file {
        Some(path) => ProviderRegistry::from_file(path)
            .with_context(|| format!("Failed to load providers from {}", path.display()))?,
        None => ProviderRegistry::with_defaults(),
    };
    info!(
        "Using {} store with providers: {}",
        store.name(),
        registry.ids().collect::<Vec<_>>().join(", ")
    );

    match args.command {
        Command::Link { session, name } => {
            let account = sign_in(&store, &registry, &session.logins, name.as_deref())?;
            print_summary(&account)?;
        }
        Command::Unlink { session, provider } => {
            let mut account = sign_in(&store, &registry, &session.logins, None)?;
            let provider = registry
                .get(&provider)
                .ok_or_else(|| anyhow!("Unknown provider: {}", provider))?;
            account.remove_provider(provider.as_ref())?;
            print_summary(&account)?;
        }
        Command::Merge { into, from, force } => {
            let mut receiver = sign_in(&store, &registry, &into, None)?;
            let donor = sign_in(&store, &registry, &from, None)?;

            if !receiver.can_merge(&donor) {
                if !force {
                    bail!(
                        "Accounts share a provider under different ids; \
                         reconcile manually or pass --force"
                    );
                }
                warn!("Forcing merge of overlapping accounts; receiver data wins");
            }
            receiver.merge(&donor)?;
            print_summary(&receiver)?;
        }
        Command::Additional { session } => {
            let account = sign_in(&store, &registry, &session.logins, None)?;
            println!("{}", serde_json::to_string_pretty(&account.additional_providers()?)?);
        }
        Command::Delete { session } => {
            let account = sign_in(&store, &registry, &session.logins, None)?;
            account.delete()?;
            info!("Account deleted");
        }
    }

    Ok(())
}
