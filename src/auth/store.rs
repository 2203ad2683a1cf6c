//! On-disk storage for the long-lived GitHub authorization token.

use secrecy::{ExposeSecret, SecretString};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// The long-lived credential. It is exchanged for short-lived backend tokens
/// and never sent to the backend itself.
#[derive(Clone)]
pub struct AuthCredential {
    access_token: SecretString,
}

impl AuthCredential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }
}

impl std::fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCredential")
            .field("access_token", &crate::logging::mask_token(self.access_token()))
            .finish()
    }
}

/// A single credential file readable and writable by the owner only.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored credential. A missing or blank file yields `None`.
    pub fn load(&self) -> io::Result<Option<AuthCredential>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let token = content.trim();
                if token.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(AuthCredential::new(token)))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replace the stored credential: temp file, fsync, rename, mode 0600.
    pub fn save(&self, credential: &AuthCredential) -> io::Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let temp_path = self.path.with_file_name(format!(
            ".{}.tmp.{}",
            self.path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy(),
            std::process::id()
        ));

        {
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                opts.mode(0o600);
            }

            let mut file = opts.open(&temp_path)?;
            file.write_all(credential.access_token().as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;

        #[cfg(unix)]
        {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }

    /// Delete the stored credential. Missing file is not an error.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("nope"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_trims() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("github-token");
        let store = CredentialStore::new(&path);

        store.save(&AuthCredential::new("gho_123456789")).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.access_token(), "gho_123456789");

        std::fs::write(&path, "  gho_padded\n").unwrap();
        assert_eq!(store.load().unwrap().unwrap().access_token(), "gho_padded");
    }

    #[test]
    fn test_blank_file_is_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("github-token");
        std::fs::write(&path, "\n\n").unwrap();
        assert!(CredentialStore::new(path).load().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("github-token"));
        store.save(&AuthCredential::new("gho_secret")).unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_save_overwrites_and_leaves_single_file() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("github-token"));
        store.save(&AuthCredential::new("first")).unwrap();
        store.save(&AuthCredential::new("second")).unwrap();

        assert_eq!(store.load().unwrap().unwrap().access_token(), "second");
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("github-token"));
        store.save(&AuthCredential::new("gho_x")).unwrap();
        tokio_test::assert_ok!(store.remove());
        tokio_test::assert_ok!(store.remove());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_debug_is_masked() {
        let cred = AuthCredential::new("gho_abcdefghijklmnop");
        let debug = format!("{cred:?}");
        assert!(debug.contains("gho_a...lmnop"));
        assert!(!debug.contains("abcdefghijk"));
    }
}
