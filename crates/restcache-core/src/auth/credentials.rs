use std::sync::RwLock;

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::debug;

use super::session::{SessionStore, TOKEN_KEY};
use crate::utils::recover;

const SOURCE: &str = "auth::credentials";

/// Keychain service name tokens are filed under.
const SERVICE_NAME: &str = "restcache";

/// Session token kept in the OS keychain.
///
/// Each profile gets its own keychain entry, so several API endpoints can be
/// signed in at once. The keychain is read once when the store is opened.
#[derive(Debug)]
pub struct KeyringSessionStore {
    profile: String,
    cached: RwLock<Option<String>>,
}

impl KeyringSessionStore {
    pub fn open(profile: impl Into<String>) -> Self {
        let profile = profile.into();
        let cached = match Self::entry_for(&profile).and_then(|e| {
            e.get_password().context("Failed to retrieve token from keychain")
        }) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(%profile, error = %e, "No token in keychain");
                None
            }
        };
        Self {
            profile,
            cached: RwLock::new(cached),
        }
    }

    fn entry_for(profile: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &Self::account(profile)).context("Failed to create keyring entry")
    }

    fn account(profile: &str) -> String {
        format!("{}:{}", profile, TOKEN_KEY)
    }
}

impl SessionStore for KeyringSessionStore {
    fn token(&self) -> Option<String> {
        recover(self.cached.read(), SOURCE, "keyring.token").clone()
    }

    fn set_token(&self, token: &str) -> Result<()> {
        Self::entry_for(&self.profile)?
            .set_password(token)
            .context("Failed to store token in keychain")?;
        *recover(self.cached.write(), SOURCE, "keyring.set_token") = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *recover(self.cached.write(), SOURCE, "keyring.clear") = None;
        match Self::entry_for(&self.profile)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_includes_profile_and_key() {
        assert_eq!(KeyringSessionStore::account("staging"), "staging:token");
    }
}
