//! Mycelia Keystore
//!
//! File-based persistence for the three long-lived secrets: the secp256k1
//! signing scalar, the Ed25519 seed, and the L402 macaroon root key. Each
//! is a raw 32-byte file created with 0600 permissions on first start and
//! never rewritten afterwards. Losing the root key revokes every
//! outstanding macaroon.

use std::fs;
use std::path::{Path, PathBuf};

use mycelia_crypto::{EcdsaKeypair, Ed25519Keypair};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("Failed to read key file: {0}")]
    ReadError(String),
    #[error("Failed to write key file: {0}")]
    WriteError(String),
    #[error("Invalid key format in {0}")]
    InvalidFormat(String),
    #[error("Failed to create directory: {0}")]
    CreateDirError(String),
}

pub type Result<T> = std::result::Result<T, KeystoreError>;

const SECP_KEY_FILE: &str = "oracle_secp256k1.key";
const ED25519_SEED_FILE: &str = "oracle_ed25519.seed";
const ROOT_KEY_FILE: &str = "l402_root_key.bin";

/// The loaded key material, constructed once at boot and shared read-only.
pub struct Keystore {
    ecdsa: EcdsaKeypair,
    ed25519: Ed25519Keypair,
    macaroon_root: [u8; 32],
}

impl Keystore {
    /// Load all three secrets from `dir`, generating any that are missing.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| KeystoreError::CreateDirError(e.to_string()))?;

        let ecdsa = match load_blob(&dir.join(SECP_KEY_FILE))? {
            Some(bytes) => EcdsaKeypair::from_secret_bytes(&bytes)
                .map_err(|_| KeystoreError::InvalidFormat(SECP_KEY_FILE.into()))?,
            None => {
                info!("generating secp256k1 signing key");
                let kp = EcdsaKeypair::generate();
                save_blob(&dir.join(SECP_KEY_FILE), &kp.secret_bytes())?;
                kp
            }
        };

        let ed25519 = match load_blob(&dir.join(ED25519_SEED_FILE))? {
            Some(bytes) => Ed25519Keypair::from_seed_bytes(&bytes)
                .map_err(|_| KeystoreError::InvalidFormat(ED25519_SEED_FILE.into()))?,
            None => {
                info!("generating ed25519 signing key");
                let kp = Ed25519Keypair::generate();
                save_blob(&dir.join(ED25519_SEED_FILE), &kp.seed_bytes())?;
                kp
            }
        };

        let macaroon_root = match load_blob(&dir.join(ROOT_KEY_FILE))? {
            Some(bytes) => bytes,
            None => {
                info!("generating macaroon root key");
                let mut bytes = [0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut bytes);
                save_blob(&dir.join(ROOT_KEY_FILE), &bytes)?;
                bytes
            }
        };

        Ok(Self {
            ecdsa,
            ed25519,
            macaroon_root,
        })
    }

    pub fn ecdsa(&self) -> &EcdsaKeypair {
        &self.ecdsa
    }

    pub fn ed25519(&self) -> &Ed25519Keypair {
        &self.ed25519
    }

    pub fn macaroon_root(&self) -> &[u8; 32] {
        &self.macaroon_root
    }
}

fn load_blob(path: &Path) -> Result<Option<[u8; 32]>> {
    if !path.exists() {
        return Ok(None);
    }
    debug!("loading key from {}", path.display());
    let bytes = fs::read(path).map_err(|e| KeystoreError::ReadError(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeystoreError::InvalidFormat(path.display().to_string()))?;
    Ok(Some(bytes))
}

fn save_blob(path: &Path, bytes: &[u8; 32]) -> Result<()> {
    fs::write(path, bytes).map_err(|e| KeystoreError::WriteError(e.to_string()))?;
    restrict_permissions(path)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| KeystoreError::WriteError(e.to_string()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Default keystore directory under the platform data dir.
pub fn default_keystore_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        });
    base.join("mycelia").join("keys")
}
