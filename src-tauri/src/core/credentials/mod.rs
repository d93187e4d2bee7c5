//! Credential store (C1).
//!
//! Stores each saved account's auth token and (optionally) its password,
//! keyed by `(base_url, username)`. Two backends decide where the
//! *password* lives, tried in order:
//!
//! 1. OS keychain/credential-manager via the `keyring` crate (preferred).
//! 2. A machine-derived AEAD key, used when the OS keyring is unavailable
//!    (headless Linux without a secret service, sandboxing, etc).
//!
//! The auth token and TempURL signing key are always encrypted with the
//! machine-derived key and persisted in `accounts.json` alongside the
//! account's metadata, regardless of which backend holds the password —
//! a session token is routinely refreshed and isn't worth round-tripping
//! through the OS keychain on every re-authenticate. `accounts.json`
//! records which backend produced the saved password (`scheme`) so the UI
//! can tell the user whether it sits behind OS-level protection or the
//! local fallback. A decrypt failure (corrupted file, key derivation
//! mismatch) degrades that one field to absent rather than surfacing an
//! error — the caller just re-authenticates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::fs::atomic_write_json_pretty;

const SERVICE_NAME: &str = "haio-client";
const ACCOUNTS_FILE: &str = "accounts.json";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("credential not found for account: {0}")]
    NotFound(String),
    #[error("encryption error: {0}")]
    Encryption(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CredentialResult<T> = Result<T, CredentialError>;

/// Identifies which storage scheme produced a saved password, per account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageScheme {
    /// Windows Data Protection API, via the OS credential manager.
    Dpapi,
    /// macOS/Linux OS keychain or secret-service backend.
    Keychain,
    /// Local AEAD-encrypted fallback (XChaCha20-Poly1305, machine-derived key).
    Encrypted,
}

impl StorageScheme {
    fn for_current_platform_keyring() -> Self {
        if cfg!(windows) {
            StorageScheme::Dpapi
        } else {
            StorageScheme::Keychain
        }
    }
}

/// A known account the store has (or had) a saved password for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownAccount {
    pub base_url: String,
    pub username: String,
    pub scheme: StorageScheme,
}

fn account_key(base_url: &str, username: &str) -> String {
    format!("{base_url}|{username}")
}

#[derive(Serialize, Deserialize, Default)]
struct AccountsFile {
    version: u32,
    accounts: HashMap<String, AccountRecord>,
}

#[derive(Clone, Serialize, Deserialize)]
struct Sealed {
    nonce: [u8; 24],
    ciphertext: Vec<u8>,
}

#[derive(Clone, Serialize, Deserialize)]
struct AccountRecord {
    base_url: String,
    username: String,
    scheme: StorageScheme,
    token: Sealed,
    /// Present only when `scheme == Encrypted`; a keychain/dpapi-backed
    /// password lives in the OS store instead, not in this file.
    password: Option<Sealed>,
    temp_url_key: Option<Sealed>,
}

enum PasswordBackend {
    OsKeyring,
    Local,
}

/// Thread-safe credential store; the IO lock serializes `accounts.json`
/// writes so concurrent save/forget calls don't interleave.
pub struct CredentialStore {
    password_backend: PasswordBackend,
    /// Machine-derived key. Encrypts the token and TempURL key unconditionally,
    /// and the password too when the OS keyring is unavailable.
    key: [u8; 32],
    accounts_path: PathBuf,
    io_lock: Mutex<()>,
}

impl CredentialStore {
    /// Probes OS keyring availability and builds a store that uses it for
    /// passwords when present, falling back to the local encrypted scheme.
    pub fn open(config_dir: &Path) -> CredentialResult<Self> {
        let password_backend = if Self::keyring_available() {
            info!("credential store using OS keyring backend for passwords");
            PasswordBackend::OsKeyring
        } else {
            warn!("OS keyring unavailable, falling back to local encrypted password storage");
            PasswordBackend::Local
        };

        Ok(Self {
            password_backend,
            key: Self::derive_vault_key(config_dir)?,
            accounts_path: config_dir.join(ACCOUNTS_FILE),
            io_lock: Mutex::new(()),
        })
    }

    fn keyring_available() -> bool {
        let entry = match keyring::Entry::new(SERVICE_NAME, "__probe__") {
            Ok(e) => e,
            Err(_) => return false,
        };
        match entry.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => true,
            _ => false,
        }
    }

    /// Derives a machine-stable key via Argon2id: no master password is
    /// required, since the goal is only to be opaque to someone reading the
    /// file directly, not to someone with local account access.
    fn derive_vault_key(config_dir: &Path) -> CredentialResult<[u8; 32]> {
        use argon2::{Algorithm, Argon2, Params, Version};

        let mut entropy = String::new();
        entropy.push_str("haio-client-vault-v1:");
        entropy.push_str(&config_dir.to_string_lossy());
        if let Ok(id) = std::fs::read_to_string("/etc/machine-id") {
            entropy.push(':');
            entropy.push_str(id.trim());
        } else if let Ok(hostname) = hostname::get() {
            entropy.push(':');
            entropy.push_str(&hostname.to_string_lossy());
        }

        let salt = b"haio-client-vault-salt-v1";
        let params = Params::new(8 * 1024, 3, 1, Some(32))
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; 32];
        argon2
            .hash_password_into(entropy.as_bytes(), salt, &mut key)
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;
        Ok(key)
    }

    /// Saves (or overwrites) an account's auth token, and optionally its
    /// password. `password: None` leaves a previously-saved password (if
    /// any) untouched — re-authenticating doesn't require re-supplying it.
    pub async fn save(&self, base_url: &str, username: &str, token: &str, password: Option<&str>) -> CredentialResult<()> {
        let key = account_key(base_url, username);
        let _guard = self.io_lock.lock().await;
        let mut accounts = Self::read_accounts(&self.accounts_path)?;

        let scheme = match self.password_backend {
            PasswordBackend::OsKeyring => StorageScheme::for_current_platform_keyring(),
            PasswordBackend::Local => StorageScheme::Encrypted,
        };

        if let Some(password) = password {
            match self.password_backend {
                PasswordBackend::OsKeyring => {
                    let entry = keyring::Entry::new(SERVICE_NAME, &key).map_err(|e| CredentialError::Keyring(e.to_string()))?;
                    entry.set_password(password).map_err(|e| CredentialError::Keyring(e.to_string()))?;
                }
                PasswordBackend::Local => {
                    let sealed = Self::seal(&self.key, password.as_bytes())?;
                    accounts
                        .accounts
                        .entry(key.clone())
                        .or_insert_with(|| AccountRecord {
                            base_url: base_url.to_string(),
                            username: username.to_string(),
                            scheme,
                            token: sealed.clone(),
                            password: None,
                            temp_url_key: None,
                        })
                        .password = Some(sealed);
                }
            }
        }

        let sealed_token = Self::seal(&self.key, token.as_bytes())?;
        let record = accounts.accounts.entry(key).or_insert_with(|| AccountRecord {
            base_url: base_url.to_string(),
            username: username.to_string(),
            scheme,
            token: sealed_token.clone(),
            password: None,
            temp_url_key: None,
        });
        record.scheme = scheme;
        record.token = sealed_token;

        Self::write_accounts(&self.accounts_path, &accounts)?;
        info!(account = %username, "credential saved");
        Ok(())
    }

    /// Loads an account's saved token and password. Either half may be
    /// `None`: no account on record, no password ever saved, or a decrypt
    /// failure on the local fallback (treated as absent rather than an error).
    pub async fn load(&self, base_url: &str, username: &str) -> CredentialResult<(Option<String>, Option<String>)> {
        let key = account_key(base_url, username);
        let _guard = self.io_lock.lock().await;
        let accounts = Self::read_accounts(&self.accounts_path)?;
        let Some(record) = accounts.accounts.get(&key) else {
            return Ok((None, None));
        };

        let token = match Self::unseal(&self.key, &record.token) {
            Ok(plaintext) => String::from_utf8(plaintext).ok(),
            Err(e) => {
                warn!("failed to decrypt saved token, treating as absent: {e}");
                None
            }
        };

        let password = match self.password_backend {
            PasswordBackend::OsKeyring => {
                let entry = keyring::Entry::new(SERVICE_NAME, &key).map_err(|e| CredentialError::Keyring(e.to_string()))?;
                match entry.get_password() {
                    Ok(password) => Some(password),
                    Err(keyring::Error::NoEntry) => None,
                    Err(e) => return Err(CredentialError::Keyring(e.to_string())),
                }
            }
            PasswordBackend::Local => match &record.password {
                Some(sealed) => match Self::unseal(&self.key, sealed) {
                    Ok(plaintext) => String::from_utf8(plaintext).ok(),
                    Err(e) => {
                        warn!("failed to decrypt saved password, treating as absent: {e}");
                        None
                    }
                },
                None => None,
            },
        };

        Ok((token, password))
    }

    /// Saves the account's TempURL signing key, so it survives a restart
    /// without being re-issued to the server.
    pub async fn save_temp_url_key(&self, base_url: &str, username: &str, temp_url_key: &str) -> CredentialResult<()> {
        let key = account_key(base_url, username);
        let _guard = self.io_lock.lock().await;
        let mut accounts = Self::read_accounts(&self.accounts_path)?;
        let Some(record) = accounts.accounts.get_mut(&key) else {
            return Err(CredentialError::NotFound(key));
        };
        record.temp_url_key = Some(Self::seal(&self.key, temp_url_key.as_bytes())?);
        Self::write_accounts(&self.accounts_path, &accounts)?;
        Ok(())
    }

    /// Loads the account's previously saved TempURL signing key, if any.
    pub async fn load_temp_url_key(&self, base_url: &str, username: &str) -> CredentialResult<Option<String>> {
        let key = account_key(base_url, username);
        let _guard = self.io_lock.lock().await;
        let accounts = Self::read_accounts(&self.accounts_path)?;
        let Some(record) = accounts.accounts.get(&key) else {
            return Ok(None);
        };
        let Some(sealed) = &record.temp_url_key else {
            return Ok(None);
        };
        match Self::unseal(&self.key, sealed) {
            Ok(plaintext) => Ok(String::from_utf8(plaintext).ok()),
            Err(e) => {
                warn!("failed to decrypt saved TempURL key, treating as absent: {e}");
                Ok(None)
            }
        }
    }

    /// Removes a saved account entirely (token, password, TempURL key).
    pub async fn forget(&self, base_url: &str, username: &str) -> CredentialResult<()> {
        let key = account_key(base_url, username);
        if matches!(self.password_backend, PasswordBackend::OsKeyring) {
            let entry = keyring::Entry::new(SERVICE_NAME, &key).map_err(|e| CredentialError::Keyring(e.to_string()))?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(CredentialError::Keyring(e.to_string())),
            }
        }

        let _guard = self.io_lock.lock().await;
        let mut accounts = Self::read_accounts(&self.accounts_path)?;
        accounts.accounts.remove(&key);
        Self::write_accounts(&self.accounts_path, &accounts)?;
        info!(account = %username, "credential forgotten");
        Ok(())
    }

    /// Lists accounts with a currently saved credential.
    pub async fn list_known(&self) -> CredentialResult<Vec<KnownAccount>> {
        let _guard = self.io_lock.lock().await;
        let accounts = Self::read_accounts(&self.accounts_path)?;
        Ok(accounts
            .accounts
            .values()
            .map(|r| KnownAccount { base_url: r.base_url.clone(), username: r.username.clone(), scheme: r.scheme })
            .collect())
    }

    // === accounts.json IO ===

    fn read_accounts(path: &Path) -> CredentialResult<AccountsFile> {
        if !path.exists() {
            return Ok(AccountsFile::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_accounts(path: &Path, accounts: &AccountsFile) -> CredentialResult<()> {
        atomic_write_json_pretty(path, accounts)
            .map_err(|e| CredentialError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }

    fn seal(key: &[u8; 32], plaintext: &[u8]) -> CredentialResult<Sealed> {
        let mut nonce = [0u8; 24];
        rand::Rng::fill(&mut OsRng, &mut nonce);
        let ciphertext = Self::encrypt(key, &nonce, plaintext)?;
        Ok(Sealed { nonce, ciphertext })
    }

    fn unseal(key: &[u8; 32], sealed: &Sealed) -> CredentialResult<Vec<u8>> {
        Self::decrypt(key, &sealed.nonce, &sealed.ciphertext)
    }

    fn encrypt(key: &[u8; 32], nonce: &[u8; 24], plaintext: &[u8]) -> CredentialResult<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|e| CredentialError::Encryption(e.to_string()))?;
        cipher
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|e| CredentialError::Encryption(e.to_string()))
    }

    fn decrypt(key: &[u8; 32], nonce: &[u8; 24], ciphertext: &[u8]) -> CredentialResult<Vec<u8>> {
        if ciphertext.len() < 16 {
            return Err(CredentialError::Encryption("ciphertext too short".into()));
        }
        let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|e| CredentialError::Encryption(e.to_string()))?;
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CredentialError::Encryption("authentication failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn local_store(dir: &Path) -> CredentialStore {
        let key = CredentialStore::derive_vault_key(dir).unwrap();
        CredentialStore {
            password_backend: PasswordBackend::Local,
            key,
            accounts_path: dir.join(ACCOUNTS_FILE),
            io_lock: Mutex::new(()),
        }
    }

    #[tokio::test]
    async fn save_and_load_round_trips_token_and_password() {
        let dir = TempDir::new().unwrap();
        let store = local_store(dir.path());

        store.save("https://api.haio.ir", "alice", "tok-123", Some("hunter2")).await.unwrap();
        let (token, password) = store.load("https://api.haio.ir", "alice").await.unwrap();
        assert_eq!(token, Some("tok-123".to_string()));
        assert_eq!(password, Some("hunter2".to_string()));
    }

    #[tokio::test]
    async fn accounts_json_is_written_with_nonempty_token() {
        let dir = TempDir::new().unwrap();
        let store = local_store(dir.path());
        store.save("https://api.haio.ir", "alice", "tok-123", None).await.unwrap();

        let path = dir.path().join(ACCOUNTS_FILE);
        assert!(path.exists());
        let (token, _) = store.load("https://api.haio.ir", "alice").await.unwrap();
        assert_eq!(token, Some("tok-123".to_string()));
    }

    #[tokio::test]
    async fn save_without_password_preserves_previously_saved_password() {
        let dir = TempDir::new().unwrap();
        let store = local_store(dir.path());

        store.save("https://api.haio.ir", "alice", "tok-1", Some("hunter2")).await.unwrap();
        store.save("https://api.haio.ir", "alice", "tok-2", None).await.unwrap();

        let (token, password) = store.load("https://api.haio.ir", "alice").await.unwrap();
        assert_eq!(token, Some("tok-2".to_string()));
        assert_eq!(password, Some("hunter2".to_string()));
    }

    #[tokio::test]
    async fn load_missing_account_returns_none_none() {
        let dir = TempDir::new().unwrap();
        let store = local_store(dir.path());
        let loaded = store.load("https://api.haio.ir", "ghost").await.unwrap();
        assert_eq!(loaded, (None, None));
    }

    #[tokio::test]
    async fn forget_removes_entry() {
        let dir = TempDir::new().unwrap();
        let store = local_store(dir.path());

        store.save("https://api.haio.ir", "alice", "tok-123", Some("hunter2")).await.unwrap();
        store.forget("https://api.haio.ir", "alice").await.unwrap();
        let loaded = store.load("https://api.haio.ir", "alice").await.unwrap();
        assert_eq!(loaded, (None, None));
    }

    #[tokio::test]
    async fn list_known_reports_scheme_encrypted() {
        let dir = TempDir::new().unwrap();
        let store = local_store(dir.path());

        store.save("https://api.haio.ir", "alice", "tok-123", Some("hunter2")).await.unwrap();
        let known = store.list_known().await.unwrap();
        assert_eq!(known.len(), 1);
        assert_eq!(known[0].scheme, StorageScheme::Encrypted);
    }

    #[tokio::test]
    async fn temp_url_key_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = local_store(dir.path());

        store.save("https://api.haio.ir", "alice", "tok-123", None).await.unwrap();
        store.save_temp_url_key("https://api.haio.ir", "alice", "tempkey-abc").await.unwrap();
        let loaded = store.load_temp_url_key("https://api.haio.ir", "alice").await.unwrap();
        assert_eq!(loaded, Some("tempkey-abc".to_string()));
    }

    #[tokio::test]
    async fn corrupted_password_ciphertext_degrades_to_none() {
        let dir = TempDir::new().unwrap();
        let store = local_store(dir.path());
        store.save("https://api.haio.ir", "alice", "tok-123", Some("hunter2")).await.unwrap();

        let path = dir.path().join(ACCOUNTS_FILE);
        let mut accounts = CredentialStore::read_accounts(&path).unwrap();
        for record in accounts.accounts.values_mut() {
            if let Some(password) = record.password.as_mut() {
                password.ciphertext[0] ^= 0xFF;
            }
        }
        CredentialStore::write_accounts(&path, &accounts).unwrap();

        let (token, password) = store.load("https://api.haio.ir", "alice").await.unwrap();
        assert_eq!(token, Some("tok-123".to_string()));
        assert_eq!(password, None);
    }

    #[test]
    fn encrypt_decrypt_round_trips() {
        let key = [7u8; 32];
        let nonce = [1u8; 24];
        let ciphertext = CredentialStore::encrypt(&key, &nonce, b"secret").unwrap();
        let plaintext = CredentialStore::decrypt(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(plaintext, b"secret");
    }

    #[test]
    fn decrypt_tampered_ciphertext_fails() {
        let key = [7u8; 32];
        let nonce = [1u8; 24];
        let mut ciphertext = CredentialStore::encrypt(&key, &nonce, b"secret").unwrap();
        ciphertext[0] ^= 0xFF;
        assert!(CredentialStore::decrypt(&key, &nonce, &ciphertext).is_err());
    }
}
