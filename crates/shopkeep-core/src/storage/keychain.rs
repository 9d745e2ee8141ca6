use keyring::Entry;
use rand::{distributions::Alphanumeric, Rng};

use super::{KeyValueStore, Result, StoredFields};

const SERVICE_NAME: &str = "shopkeep";

/// Keychain account holding the serialized session map
const SESSION_ACCOUNT: &str = "session";

/// Keychain account holding the passphrase for the encrypted session file
const PASSPHRASE_ACCOUNT: &str = "session-passphrase";

/// Length of a generated file passphrase
const PASSPHRASE_LEN: usize = 43;

/// Session fields stored as a single OS keychain secret.
///
/// The whole map is one entry, so a write replaces every field at once.
pub struct KeyringStore {
    account: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::for_account(SESSION_ACCOUNT)
    }

    pub fn for_account(account: &str) -> Self {
        Self {
            account: account.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Ok(Entry::new(SERVICE_NAME, &self.account)?)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for KeyringStore {
    fn load(&self) -> Result<StoredFields> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(serde_json::from_str(&secret)?),
            Err(keyring::Error::NoEntry) => Ok(StoredFields::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, fields: &StoredFields) -> Result<()> {
        let secret = serde_json::to_string(fields)?;
        self.entry()?.set_password(&secret)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Fetch the passphrase protecting the encrypted session file, creating
/// and storing a random one on first use.
pub fn session_passphrase() -> Result<String> {
    let entry = Entry::new(SERVICE_NAME, PASSPHRASE_ACCOUNT)?;
    match entry.get_password() {
        Ok(passphrase) => Ok(passphrase),
        Err(keyring::Error::NoEntry) => {
            let passphrase: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(PASSPHRASE_LEN)
                .map(char::from)
                .collect();
            entry.set_password(&passphrase)?;
            Ok(passphrase)
        }
        Err(e) => Err(e.into()),
    }
}
