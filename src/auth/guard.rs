/// In-flight marker for the authorization-code exchange.
///
/// A marker file in the state directory, set before the exchange call is
/// issued and cleared on a terminal outcome. It deliberately has no
/// expiry: a guard left behind by a crash mid-exchange must be cleared by
/// the explicit `reset` operation, because a silent timeout could
/// double-spend a still-valid single-use code.
use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const GUARD_FILE: &str = "oauth_processing";

pub struct ExchangeGuard {
    path: PathBuf,
}

impl ExchangeGuard {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(GUARD_FILE),
        }
    }

    /// Set the guard. Returns false if it was already held; the create is
    /// atomic, so two concurrent acquirers cannot both win.
    pub fn acquire(&self) -> Result<bool> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_set(&self) -> bool {
        self.path.exists()
    }

    /// Clear the guard. Idempotent; also the manual recovery path for a
    /// guard stranded by a crash.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let guard = ExchangeGuard::new(dir.path());

        assert!(!guard.is_set());
        assert!(guard.acquire().unwrap());
        assert!(guard.is_set());

        // Second acquire loses
        assert!(!guard.acquire().unwrap());

        guard.clear().unwrap();
        assert!(!guard.is_set());
        assert!(guard.acquire().unwrap());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let guard = ExchangeGuard::new(dir.path());

        guard.clear().unwrap();
        guard.acquire().unwrap();
        guard.clear().unwrap();
        guard.clear().unwrap();
    }
}
