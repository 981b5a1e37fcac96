/// Durable persistence for the session snapshot.
/// Backends: JSON file in the state directory (default, inspectable), or
/// the system keyring: Secret Service (Linux), Keychain (macOS),
/// Credential Manager (Windows).
use anyhow::Result;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::SessionState;

pub const SNAPSHOT_VERSION: u32 = 0;

const SNAPSHOT_FILE: &str = "session.json";
const KEYRING_ACCOUNT: &str = "session";

/// On-device form of the session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub state: SessionState,
    pub version: u32,
}

impl PersistedSnapshot {
    pub fn new(state: SessionState) -> Self {
        Self {
            state,
            version: SNAPSHOT_VERSION,
        }
    }
}

/// Storage seam for the session store. `save` must not return until the
/// snapshot is durable; an immediate process restart reads it back.
pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &PersistedSnapshot) -> Result<()>;
    /// Load the most recent snapshot. Missing, unreadable, or corrupt
    /// data reads as `None` ("no prior session")
    fn load(&self) -> Option<PersistedSnapshot>;
    fn clear(&self) -> Result<()>;
}

fn decode_snapshot(json: &str) -> Option<PersistedSnapshot> {
    let mut snapshot: PersistedSnapshot = match serde_json::from_str(json) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Discarding corrupt session snapshot: {}", e);
            return None;
        }
    };

    if snapshot.version != SNAPSHOT_VERSION {
        tracing::warn!(
            "Discarding session snapshot with unknown version {}",
            snapshot.version
        );
        return None;
    }

    // A tampered or hand-edited snapshot must not grant authentication
    snapshot.state.enforce_invariant();
    Some(snapshot)
}

/// JSON file in the state directory
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(SNAPSHOT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        // Write to a sibling temp file, then rename into place so a
        // crash mid-write never leaves a truncated snapshot
        let json = serde_json::to_string(snapshot)?;
        let tmp = self.path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, &json)?;

        // Snapshot holds tokens; keep it owner-only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load(&self) -> Option<PersistedSnapshot> {
        match fs::read_to_string(&self.path) {
            Ok(json) => decode_snapshot(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!("Failed to read session snapshot: {}", e);
                None
            }
        }
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Snapshot stored as the secret of a system keyring entry
pub struct KeyringSnapshotStore {
    service: String,
}

impl KeyringSnapshotStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }
}

impl SnapshotStore for KeyringSnapshotStore {
    fn save(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        let entry = Entry::new(&self.service, KEYRING_ACCOUNT)?;
        let json = serde_json::to_string(snapshot)?;
        entry.set_password(&json)?;
        Ok(())
    }

    fn load(&self) -> Option<PersistedSnapshot> {
        let entry = match Entry::new(&self.service, KEYRING_ACCOUNT) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Keyring unavailable: {}", e);
                return None;
            }
        };

        match entry.get_password() {
            Ok(json) => decode_snapshot(&json),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                tracing::warn!("Failed to read session snapshot from keyring: {}", e);
                None
            }
        }
    }

    fn clear(&self) -> Result<()> {
        let entry = Entry::new(&self.service, KEYRING_ACCOUNT)?;
        match entry.delete_password() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Already cleared
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserProfile;

    fn snapshot() -> PersistedSnapshot {
        let mut state = SessionState::empty();
        state.user = Some(UserProfile {
            id: "1".to_string(),
            username: "octocat".to_string(),
            name: None,
            email: None,
            avatar_url: None,
            github_url: None,
            bio: None,
            company: None,
            location: None,
        });
        state.token = Some("jwt".to_string());
        state.github_token = Some("gho_abc".to_string());
        state.enforce_invariant();
        PersistedSnapshot::new(state)
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());

        assert!(store.load().is_none());

        store.save(&snapshot()).unwrap();
        let loaded = store.load().unwrap();
        assert!(loaded.state.is_authenticated);
        assert_eq!(loaded.state.token.as_deref(), Some("jwt"));
        assert_eq!(loaded.version, SNAPSHOT_VERSION);

        store.clear().unwrap();
        assert!(store.load().is_none());
        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_snapshot_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());

        fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_unknown_version_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());

        fs::write(store.path(), r#"{"state":{},"version":99}"#).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_tampered_snapshot_does_not_authenticate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());

        // isAuthenticated claims true but the token is missing
        fs::write(
            store.path(),
            r#"{"state":{"user":{"id":"1","username":"octocat"},"isAuthenticated":true},"version":0}"#,
        )
        .unwrap();

        let loaded = store.load().unwrap();
        assert!(!loaded.state.is_authenticated);
    }

    #[test]
    #[ignore] // Requires system keyring
    fn test_keyring_store_roundtrip() {
        let store = KeyringSnapshotStore::new("bugsight-test");

        store.save(&snapshot()).unwrap();
        let loaded = store.load().unwrap();
        assert!(loaded.state.is_authenticated);

        store.clear().unwrap();
        assert!(store.load().is_none());
    }
}
