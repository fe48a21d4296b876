//! On-disk event store.
//!
//! One JSON file per record under the data directory:
//! `<eid>.announcement.json`, `<eid>.attestation.json`, and the 0600
//! `<eid>.nonces.json` holding the per-digit nonce scalars between
//! announcement and attestation. Nonce files are handed out exactly once:
//! [`EventStore::take_nonces`] deletes the file before returning the
//! scalars, so a second caller finds nothing rather than a reusable nonce.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use mycelia_crypto::NonceSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::event::{Announcement, Attestation};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("event store io: {0}")]
    Io(String),
    #[error("corrupt event record {0}: {1}")]
    Corrupt(String, String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Serialize, Deserialize)]
struct NonceFile {
    event_id: String,
    nonce_secrets: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct MissedMarker {
    event_id: String,
    marked_at: DateTime<Utc>,
}

pub struct EventStore {
    dir: PathBuf,
    /// Serializes the read-then-delete in `take_nonces`.
    nonce_lock: Mutex<()>,
}

impl EventStore {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            nonce_lock: Mutex::new(()),
        })
    }

    fn path(&self, eid: &str, suffix: &str) -> PathBuf {
        self.dir.join(format!("{eid}.{suffix}.json"))
    }

    pub fn save_announcement(&self, announcement: &Announcement) -> Result<()> {
        write_json(&self.path(&announcement.event_id, "announcement"), announcement)
    }

    pub fn announcement(&self, eid: &str) -> Result<Option<Announcement>> {
        read_json(&self.path(eid, "announcement"))
    }

    /// All announcements, ordered by maturity.
    pub fn list_announcements(&self) -> Result<Vec<Announcement>> {
        let mut announcements: Vec<Announcement> = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::Io(e.to_string()))?;
        for entry in entries {
            let path = entry.map_err(|e| StoreError::Io(e.to_string()))?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.ends_with(".announcement.json") {
                if let Some(announcement) = read_json(&path)? {
                    announcements.push(announcement);
                }
            }
        }
        announcements.sort_by_key(|a| a.maturity);
        Ok(announcements)
    }

    pub fn save_attestation(&self, attestation: &Attestation) -> Result<()> {
        write_json(&self.path(&attestation.event_id, "attestation"), attestation)
    }

    pub fn attestation(&self, eid: &str) -> Result<Option<Attestation>> {
        read_json(&self.path(eid, "attestation"))
    }

    /// Persist the per-digit nonce scalars, 0600, before the announcement
    /// becomes visible.
    pub fn save_nonces(&self, eid: &str, nonces: &[NonceSecret]) -> Result<()> {
        let file = NonceFile {
            event_id: eid.to_string(),
            nonce_secrets: nonces.iter().map(|n| hex::encode(n.as_bytes())).collect(),
        };
        let path = self.path(eid, "nonces");
        write_json(&path, &file)?;
        restrict_permissions(&path)
    }

    /// Hand out the nonce scalars exactly once. The file is deleted
    /// before the scalars are returned; a failed attestation afterwards
    /// loses the event, which is the safe direction.
    pub fn take_nonces(&self, eid: &str) -> Result<Option<Vec<NonceSecret>>> {
        let _guard = self.nonce_lock.lock().unwrap();
        let path = self.path(eid, "nonces");
        let file: Option<NonceFile> = read_json(&path)?;
        let Some(file) = file else {
            return Ok(None);
        };
        fs::remove_file(&path).map_err(|e| StoreError::Io(e.to_string()))?;
        debug!(event = eid, "nonce scalars consumed");

        let mut secrets = Vec::with_capacity(file.nonce_secrets.len());
        for encoded in &file.nonce_secrets {
            let bytes: [u8; 32] = hex::decode(encoded)
                .ok()
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| {
                    StoreError::Corrupt(eid.to_string(), "bad nonce encoding".to_string())
                })?;
            secrets.push(NonceSecret::from_bytes(bytes));
        }
        Ok(Some(secrets))
    }

    pub fn mark_missed(&self, eid: &str) -> Result<()> {
        write_json(
            &self.path(eid, "missed"),
            &MissedMarker {
                event_id: eid.to_string(),
                marked_at: Utc::now(),
            },
        )
    }

    pub fn is_missed(&self, eid: &str) -> bool {
        self.path(eid, "missed").exists()
    }

    /// (announced, attested, missed) counts for the status surface.
    pub fn counts(&self) -> Result<(usize, usize, usize)> {
        let mut announced = 0;
        let mut attested = 0;
        let mut missed = 0;
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::Io(e.to_string()))?;
        for entry in entries {
            let path = entry.map_err(|e| StoreError::Io(e.to_string()))?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.ends_with(".announcement.json") {
                announced += 1;
            } else if name.ends_with(".attestation.json") {
                attested += 1;
            } else if name.ends_with(".missed.json") {
                missed += 1;
            }
        }
        Ok((announced, attested, missed))
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content =
        serde_json::to_string_pretty(value).map_err(|e| StoreError::Io(e.to_string()))?;
    fs::write(path, content).map_err(|e| StoreError::Io(e.to_string()))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|e| StoreError::Io(e.to_string()))?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StoreError::Corrupt(path.display().to_string(), e.to_string()))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| StoreError::Io(e.to_string()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_id;
    use mycelia_crypto::generate_nonce;

    fn announcement(eid: &str) -> Announcement {
        Announcement {
            event_id: eid.to_string(),
            pair: "BTCUSD".to_string(),
            maturity: Utc::now(),
            oracle_pubkey: "02ab".to_string(),
            digit_count: 5,
            r_points: vec!["02cd".to_string(); 5],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_announcement_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(dir.path()).unwrap();
        let eid = event_id("BTCUSD", Utc::now());

        store.save_announcement(&announcement(&eid)).unwrap();
        let loaded = store.announcement(&eid).unwrap().unwrap();
        assert_eq!(loaded.event_id, eid);
        assert_eq!(store.list_announcements().unwrap().len(), 1);
    }

    #[test]
    fn test_take_nonces_is_single_use() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(dir.path()).unwrap();

        let nonces: Vec<_> = (0..5).map(|_| generate_nonce().0).collect();
        store.save_nonces("EV", &nonces).unwrap();

        let first = store.take_nonces("EV").unwrap();
        assert_eq!(first.unwrap().len(), 5);

        // The second take must find nothing.
        assert!(store.take_nonces("EV").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonce_file_is_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(dir.path()).unwrap();
        store.save_nonces("EV", &[generate_nonce().0]).unwrap();

        let mode = fs::metadata(dir.path().join("EV.nonces.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_missed_marker_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(dir.path()).unwrap();

        store.save_announcement(&announcement("EV")).unwrap();
        store.mark_missed("EV").unwrap();

        assert!(store.is_missed("EV"));
        assert_eq!(store.counts().unwrap(), (1, 0, 1));
    }
}
