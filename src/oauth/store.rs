//! Token store contract and reference adapters
//!
//! The gateway consumes tokens through [`TokenStore`]; persistence is owned by
//! the embedding application. Two adapters ship with the crate: an in-memory
//! store and a JSON-file store that survives restarts.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::token::Token;
use crate::{Error, Result};

/// Account id used when none is given
pub const DEFAULT_ACCOUNT: &str = "default";

/// Persistent token storage keyed by tenant / provider / account
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load a token; `account` defaults to [`DEFAULT_ACCOUNT`]
    async fn get_token(
        &self,
        tenant: &str,
        provider: &str,
        account: Option<&str>,
    ) -> Result<Option<Token>>;

    /// Store or replace a token
    async fn set_token(&self, tenant: &str, provider: &str, account: &str, token: Token)
    -> Result<()>;

    /// Delete a token
    async fn revoke_token(&self, tenant: &str, provider: &str, account: &str) -> Result<()>;

    /// Account ids with a stored token
    async fn get_accounts(&self, tenant: &str, provider: &str) -> Result<Vec<String>>;
}

type AccountKey = (String, String, String);

/// In-memory token store
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: DashMap<AccountKey, Token>,
}

impl MemoryTokenStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn key(tenant: &str, provider: &str, account: &str) -> AccountKey {
    (tenant.to_string(), provider.to_string(), account.to_string())
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get_token(
        &self,
        tenant: &str,
        provider: &str,
        account: Option<&str>,
    ) -> Result<Option<Token>> {
        let account = account.unwrap_or(DEFAULT_ACCOUNT);
        Ok(self
            .tokens
            .get(&key(tenant, provider, account))
            .map(|t| t.value().clone()))
    }

    async fn set_token(
        &self,
        tenant: &str,
        provider: &str,
        account: &str,
        token: Token,
    ) -> Result<()> {
        self.tokens.insert(key(tenant, provider, account), token);
        Ok(())
    }

    async fn revoke_token(&self, tenant: &str, provider: &str, account: &str) -> Result<()> {
        self.tokens.remove(&key(tenant, provider, account));
        Ok(())
    }

    async fn get_accounts(&self, tenant: &str, provider: &str) -> Result<Vec<String>> {
        let mut accounts: Vec<String> = self
            .tokens
            .iter()
            .filter(|e| e.key().0 == tenant && e.key().1 == provider)
            .map(|e| e.key().2.clone())
            .collect();
        accounts.sort();
        Ok(accounts)
    }
}

/// JSON-file token store, one file per tenant/provider pair
pub struct FileTokenStore {
    /// Base directory for token storage
    base_dir: PathBuf,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    /// Create a store rooted at `base_dir`, creating it if needed
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir)
                .map_err(|e| Error::Store(format!("Failed to create token storage dir: {e}")))?;
        }

        Ok(Self {
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Open a store from a configured directory; a leading `~` is the home
    /// directory
    pub fn open(dir: &str) -> Result<Self> {
        let path = match dir.strip_prefix('~') {
            Some(rest) => {
                let home = dirs::home_dir()
                    .ok_or_else(|| Error::Store("Cannot determine home directory".to_string()))?;
                home.join(rest.trim_start_matches('/'))
            }
            None => PathBuf::from(dir),
        };

        Self::new(path)
    }

    fn token_path(&self, tenant: &str, provider: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(tenant.as_bytes());
        hasher.update(b":");
        hasher.update(provider.as_bytes());
        let hash = hex::encode(hasher.finalize());
        self.base_dir.join(format!("{}_tokens.json", &hash[..16]))
    }

    fn read_accounts(&self, tenant: &str, provider: &str) -> Result<HashMap<String, Token>> {
        let path = self.token_path(tenant, provider);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(tenant = %tenant, provider = %provider, "No stored tokens found");
                return Ok(HashMap::new());
            }
            Err(e) => return Err(Error::Store(format!("Failed to read token file: {e}"))),
        };

        serde_json::from_str(&content).map_err(|e| {
            warn!(provider = %provider, error = %e, "Failed to parse stored tokens");
            Error::Store(format!("Corrupt token file {}: {e}", path.display()))
        })
    }

    /// Replace the token file atomically: write a sibling temp file, then rename
    fn write_accounts(
        &self,
        tenant: &str,
        provider: &str,
        accounts: &HashMap<String, Token>,
    ) -> Result<()> {
        let path = self.token_path(tenant, provider);

        if accounts.is_empty() {
            return match fs::remove_file(&path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => {
                    Err(Error::Store(format!("Failed to delete token file: {e}")))
                }
                _ => Ok(()),
            };
        }

        let content = serde_json::to_string_pretty(accounts)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .map_err(|e| Error::Store(format!("Failed to write token file: {e}")))?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600));
        }

        fs::rename(&tmp, &path)
            .map_err(|e| Error::Store(format!("Failed to replace token file: {e}")))
    }

    /// Read-modify-write under the write lock; `apply` returns whether the
    /// file needs rewriting
    fn update(
        &self,
        tenant: &str,
        provider: &str,
        apply: impl FnOnce(&mut HashMap<String, Token>) -> bool,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let mut accounts = self.read_accounts(tenant, provider)?;
        let changed = apply(&mut accounts);
        if changed {
            self.write_accounts(tenant, provider, &accounts)?;
        }
        Ok(changed)
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get_token(
        &self,
        tenant: &str,
        provider: &str,
        account: Option<&str>,
    ) -> Result<Option<Token>> {
        let account = account.unwrap_or(DEFAULT_ACCOUNT);
        Ok(self.read_accounts(tenant, provider)?.remove(account))
    }

    async fn set_token(
        &self,
        tenant: &str,
        provider: &str,
        account: &str,
        token: Token,
    ) -> Result<()> {
        self.update(tenant, provider, |accounts| {
            accounts.insert(account.to_string(), token);
            true
        })?;
        info!(provider = %provider, account = %account, "Saved OAuth token");
        Ok(())
    }

    async fn revoke_token(&self, tenant: &str, provider: &str, account: &str) -> Result<()> {
        if self.update(tenant, provider, |accounts| accounts.remove(account).is_some())? {
            info!(provider = %provider, account = %account, "Deleted OAuth token");
        }
        Ok(())
    }

    async fn get_accounts(&self, tenant: &str, provider: &str) -> Result<Vec<String>> {
        let mut accounts: Vec<String> = self.read_accounts(tenant, provider)?.into_keys().collect();
        accounts.sort();
        Ok(accounts)
    }
}
