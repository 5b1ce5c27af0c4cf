//! Out-of-band artifacts, e.g. course content exports.
//!
//! Artifacts are plain files in one directory. Producing them is someone
//! else's job; the hub only streams them to authenticated nodes.

use crate::error::{ServerError, ServerResult};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Read-only view of the artifact directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: Option<PathBuf>,
}

impl ArtifactStore {
    /// Serves artifacts from `root`; `None` serves nothing.
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    /// Resolves an artifact name to an existing file path.
    ///
    /// # Errors
    ///
    /// - [`ServerError::InvalidRequest`] for names with path separators
    ///   or parent references
    /// - [`ServerError::ArtifactNotFound`] if the file does not exist or no
    ///   directory is configured
    pub fn resolve(&self, name: &str) -> ServerResult<PathBuf> {
        validate_name(name)?;
        let root = self
            .root
            .as_deref()
            .ok_or_else(|| ServerError::ArtifactNotFound(name.to_string()))?;
        let path = root.join(name);
        if !path.is_file() {
            return Err(ServerError::ArtifactNotFound(name.to_string()));
        }
        Ok(path)
    }

    /// Opens an artifact for reading.
    pub fn open(&self, name: &str) -> ServerResult<File> {
        let path = self.resolve(name)?;
        Ok(File::open(path)?)
    }

    /// Configured directory.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }
}

fn validate_name(name: &str) -> ServerResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(ServerError::InvalidRequest(format!(
            "Invalid artifact name: {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn opens_existing_artifact() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("course-7.mbz"), b"backup bytes").unwrap();
        let store = ArtifactStore::new(Some(dir.path().to_path_buf()));

        let mut contents = Vec::new();
        store
            .open("course-7.mbz")
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"backup bytes");
    }

    #[test]
    fn rejects_traversal() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(Some(dir.path().to_path_buf()));
        for name in ["../secret", "a/b", "a\\b", "", ".."] {
            assert!(
                matches!(store.resolve(name), Err(ServerError::InvalidRequest(_))),
                "{name} accepted"
            );
        }
    }

    #[test]
    fn missing_artifact_is_not_found() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(Some(dir.path().to_path_buf()));
        assert!(matches!(
            store.resolve("nope.mbz"),
            Err(ServerError::ArtifactNotFound(_))
        ));
        assert!(matches!(
            ArtifactStore::new(None).resolve("nope.mbz"),
            Err(ServerError::ArtifactNotFound(_))
        ));
    }
}
