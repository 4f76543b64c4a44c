//! File-backed credential persistence.
//!
//! The auth layer's state is an opaque JSON blob. We store it in a single
//! file and rewrite it whenever the transport reports a rotation.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::bot::transport::Credentials;

const CREDS_FILE: &str = "creds.json";

#[derive(Debug)]
pub enum AuthError {
    Read { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    Write { path: PathBuf, source: std::io::Error },
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read credentials '{}': {}", path.display(), source)
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse credentials '{}': {}", path.display(), source)
            }
            Self::Write { path, source } => {
                write!(f, "failed to write credentials '{}': {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } | Self::Write { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
        }
    }
}

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            path: dir.as_ref().join(CREDS_FILE),
        }
    }

    /// Load stored credentials; a missing file means a fresh registration
    /// and yields the empty blob.
    pub fn load_or_init(&self) -> Result<Credentials, AuthError> {
        if !self.path.exists() {
            debug!("No credentials at {:?}, starting fresh", self.path);
            return Ok(Credentials::default());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| AuthError::Read {
            path: self.path.clone(),
            source: e,
        })?;
        let value = serde_json::from_str(&content).map_err(|e| AuthError::Parse {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(Credentials(value))
    }

    pub fn save(&self, credentials: &Credentials) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuthError::Write {
                path: self.path.clone(),
                source: e,
            })?;
        }
        let content = serde_json::to_string_pretty(&credentials.0).map_err(|e| {
            AuthError::Parse {
                path: self.path.clone(),
                source: e,
            }
        })?;
        std::fs::write(&self.path, content).map_err(|e| AuthError::Write {
            path: self.path.clone(),
            source: e,
        })?;
        debug!("Saved credentials to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_empty_blob() {
        let tmp = TempDir::new().unwrap();
        let store = CredentialStore::new(tmp.path().join("auth"));
        let creds = store.load_or_init().unwrap();
        assert!(creds.0.is_null());
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = CredentialStore::new(tmp.path().join("auth"));

        let creds = Credentials(serde_json::json!({"session": "abc", "epoch": 4}));
        store.save(&creds).unwrap();

        let loaded = store.load_or_init().unwrap();
        assert_eq!(loaded.0["session"], "abc");
        assert_eq!(loaded.0["epoch"], 4);
    }

    #[test]
    fn test_save_overwrites_previous_state() {
        let tmp = TempDir::new().unwrap();
        let store = CredentialStore::new(tmp.path());

        store
            .save(&Credentials(serde_json::json!({"epoch": 1})))
            .unwrap();
        store
            .save(&Credentials(serde_json::json!({"epoch": 2})))
            .unwrap();

        let loaded = store.load_or_init().unwrap();
        assert_eq!(loaded.0["epoch"], 2);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CREDS_FILE), "{ not json").unwrap();
        let store = CredentialStore::new(tmp.path());
        assert!(matches!(
            store.load_or_init(),
            Err(AuthError::Parse { .. })
        ));
    }
}
