//! Key vault lookup
//!
//! Keychain files live in one or more vault directories and are referred to
//! by file name. A name must resolve to exactly one file.

use std::path::{Path, PathBuf};

use fwsign_core::SignatureChain;
use tracing::debug;

use crate::error::{Result, WorkflowError};

/// Resolves keychain file names to paths
pub trait KeyVault {
    fn find_by_filename(&self, name: &str) -> Result<PathBuf>;
}

/// Vault backed by a set of directories, searched recursively
#[derive(Debug, Clone, Default)]
pub struct DirectoryVault {
    roots: Vec<PathBuf>,
}

impl DirectoryVault {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn collect_matches(dir: &Path, name: &str, found: &mut Vec<PathBuf>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                Self::collect_matches(&path, name, found)?;
            } else if entry.file_name() == name {
                found.push(path);
            }
        }
        Ok(())
    }
}

impl KeyVault for DirectoryVault {
    fn find_by_filename(&self, name: &str) -> Result<PathBuf> {
        let mut found = Vec::new();
        for root in &self.roots {
            if root.is_dir() {
                Self::collect_matches(root, name, &mut found)?;
            }
        }

        match found.len() {
            0 => Err(WorkflowError::KeyNotFound(name.to_string()).into()),
            1 => {
                let path = found.remove(0);
                debug!("Resolved key '{}' to {}", name, path.display());
                Ok(path)
            }
            matches => Err(WorkflowError::AmbiguousKey {
                name: name.to_string(),
                matches,
            }
            .into()),
        }
    }
}

/// Read and parse a keychain file from the vault
pub fn load_keychain(vault: &dyn KeyVault, name: &str) -> Result<SignatureChain> {
    let path = vault.find_by_filename(name)?;
    let bytes = std::fs::read(&path)?;
    Ok(SignatureChain::from_bytes(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthorityError;
    use tempfile::TempDir;

    #[test]
    fn test_resolves_unique_name() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("prod/keys")).unwrap();
        std::fs::write(dir.path().join("prod/keys/root.kc"), b"x").unwrap();
        std::fs::write(dir.path().join("other.kc"), b"x").unwrap();

        let vault = DirectoryVault::new([dir.path().to_path_buf()]);
        assert_eq!(
            vault.find_by_filename("root.kc").unwrap(),
            dir.path().join("prod/keys/root.kc")
        );
    }

    #[test]
    fn test_missing_and_ambiguous() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        std::fs::write(a.path().join("csk.kc"), b"x").unwrap();
        std::fs::write(b.path().join("csk.kc"), b"y").unwrap();

        let vault = DirectoryVault::new([a.path().to_path_buf(), b.path().to_path_buf()]);
        assert!(matches!(
            vault.find_by_filename("csk.kc"),
            Err(AuthorityError::Workflow(WorkflowError::AmbiguousKey { matches: 2, .. }))
        ));
        assert!(matches!(
            vault.find_by_filename("none.kc"),
            Err(AuthorityError::Workflow(WorkflowError::KeyNotFound(_)))
        ));
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let vault = DirectoryVault::new([PathBuf::from("/nonexistent/fwsign/vault")]);
        assert!(matches!(
            vault.find_by_filename("root.kc"),
            Err(AuthorityError::Workflow(WorkflowError::KeyNotFound(_)))
        ));
    }
}
