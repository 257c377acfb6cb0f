//! Durable session storage
//!
//! The session is two string entries, the bearer token and a serialised
//! profile snapshot. On disk they live in one file encrypted with a
//! machine-derived key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use careconnect_core::directory::Directory;

pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";

const SESSION_FILE: &str = "session.enc";
const KEY_SALT: &[u8] = b"careconnect-session-v1";
const NONCE_LEN: usize = 24;

/// Key/value store that survives restarts
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    /// Remove both session entries, attempting each even if one fails
    fn clear_session(&self) -> Result<()> {
        let token = self.remove(TOKEN_KEY);
        let user = self.remove(USER_KEY);
        token.and(user)
    }
}

/// Encrypted storage wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedData {
    /// Base64-encoded nonce
    nonce: String,
    /// Base64-encoded ciphertext
    ciphertext: String,
}

/// File-backed storage, encrypted with XChaCha20-Poly1305
pub struct EncryptedFileStorage {
    path: PathBuf,
    /// Serialises read-modify-write cycles
    lock: Mutex<()>,
}

impl EncryptedFileStorage {
    /// Storage under `data_dir`, or the platform data directory
    pub fn new(data_dir: Option<PathBuf>) -> Result<Self> {
        let auth_dir = Directory::auth_directory(data_dir)
            .ok_or_else(|| anyhow!("Cannot get data directory"))?;
        Ok(Self::at(auth_dir.join(SESSION_FILE)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the machine-specific encryption key
    fn encryption_key(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(machine_id().as_bytes());
        hasher.update(KEY_SALT);

        let mut key = [0u8; 32];
        key.copy_from_slice(&hasher.finalize());
        key
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        use chacha20poly1305::{
            aead::{Aead, KeyInit},
            XChaCha20Poly1305, XNonce,
        };

        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let file_data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let encrypted: EncryptedData = serde_json::from_str(&file_data)?;

        let cipher = XChaCha20Poly1305::new_from_slice(&self.encryption_key())
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        let nonce_bytes = STANDARD.decode(&encrypted.nonce)?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(anyhow!("Corrupt session file: bad nonce length"));
        }
        let nonce = XNonce::from_slice(&nonce_bytes);
        let ciphertext = STANDARD.decode(&encrypted.ciphertext)?;

        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_slice())
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        use chacha20poly1305::{
            aead::{Aead, KeyInit},
            XChaCha20Poly1305, XNonce,
        };
        use rand::RngCore;

        if entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }

        let cipher = XChaCha20Poly1305::new_from_slice(&self.encryption_key())
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let plaintext = serde_json::to_vec(entries)?;
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let encrypted = EncryptedData {
            nonce: STANDARD.encode(nonce_bytes),
            ciphertext: STANDARD.encode(ciphertext),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&encrypted)?)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

impl SessionStorage for EncryptedFileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut entries = self.load().unwrap_or_else(|e| {
            tracing::warn!("Discarding unreadable session file: {:?}", e);
            BTreeMap::new()
        });
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut entries = match self.load() {
            Ok(entries) => entries,
            Err(e) => {
                // nothing trustworthy left to keep
                tracing::warn!("Removing unreadable session file: {:?}", e);
                BTreeMap::new()
            }
        };
        entries.remove(key);
        self.save(&entries)
    }
}

/// In-process storage for tests and throwaway sessions
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Get a machine-specific identifier
#[cfg(target_os = "macos")]
fn machine_id() -> String {
    use std::process::Command;
    let output = Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output();
    if let Ok(output) = output {
        let output_str = String::from_utf8_lossy(&output.stdout);
        for line in output_str.lines() {
            if line.contains("IOPlatformUUID") {
                if let Some(uuid) = line.split('"').nth(3) {
                    return uuid.to_string();
                }
            }
        }
    }
    "macos-default-id".to_string()
}

#[cfg(target_os = "linux")]
fn machine_id() -> String {
    std::fs::read_to_string("/etc/machine-id")
        .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "linux-default-id".to_string())
}

#[cfg(target_os = "windows")]
fn machine_id() -> String {
    use std::process::Command;
    Command::new("wmic")
        .args(["csproduct", "get", "UUID"])
        .output()
        .ok()
        .and_then(|output| {
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .nth(1)
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "windows-default-id".to_string())
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
fn machine_id() -> String {
    "unknown-platform-id".to_string()
}
