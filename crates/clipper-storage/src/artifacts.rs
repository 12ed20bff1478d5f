//! On-disk artifact layout.
//!
//! ```text
//! {media_root}/uploads/{upload-...}     served at /uploads/{name}
//! {media_root}/processed/{processed-...} served at /processed/{name}
//! ```

use std::path::{Component, Path, PathBuf};

use crate::error::{StorageError, StorageResult};

pub const UPLOADS_DIR: &str = "uploads";
pub const PROCESSED_DIR: &str = "processed";

/// Artifact directories under one media root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `root`. Relative roots are resolved against
    /// the current directory.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = std::path::absolute(root.as_ref())?;
        Ok(Self {
            root: normalize(&root),
        })
    }

    /// Create the artifact directories.
    pub async fn ensure_dirs(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(self.uploads_dir()).await?;
        tokio::fs::create_dir_all(self.processed_dir()).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join(PROCESSED_DIR)
    }

    pub fn upload_path(&self, filename: &str) -> PathBuf {
        self.uploads_dir().join(filename)
    }

    pub fn processed_path(&self, filename: &str) -> PathBuf {
        self.processed_dir().join(filename)
    }

    /// Public URL of an artifact, if it lives in a served directory.
    pub fn url_for(&self, path: &Path) -> Option<String> {
        let path = normalize(path);
        let relative = path.strip_prefix(&self.root).ok()?;

        let mut components = relative.components();
        let dir = match components.next()? {
            Component::Normal(dir) => dir.to_str()?,
            _ => return None,
        };
        let file = match components.next()? {
            Component::Normal(file) => file.to_str()?,
            _ => return None,
        };
        if components.next().is_some() || (dir != UPLOADS_DIR && dir != PROCESSED_DIR) {
            return None;
        }
        Some(format!("/{}/{}", dir, file))
    }

    /// Resolve a client-supplied path and require it to stay under the root.
    ///
    /// Relative paths are taken relative to the media root.
    pub fn resolve_within(&self, path: impl AsRef<Path>) -> StorageResult<PathBuf> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let resolved = normalize(&joined);

        if resolved.starts_with(&self.root) && resolved != self.root {
            Ok(resolved)
        } else {
            Err(StorageError::PathOutsideRoot(path.to_path_buf()))
        }
    }
}

/// Lexically collapse `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_layout_and_urls() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        store.ensure_dirs().await.unwrap();

        assert!(store.uploads_dir().is_dir());
        assert!(store.processed_dir().is_dir());

        let processed = store.processed_path("processed-1-cat.mp4");
        assert_eq!(store.url_for(&processed).as_deref(), Some("/processed/processed-1-cat.mp4"));

        let upload = store.upload_path("upload-1-cat.mp4");
        assert_eq!(store.url_for(&upload).as_deref(), Some("/uploads/upload-1-cat.mp4"));

        assert_eq!(store.url_for(&store.root().join("other/x.mp4")), None);
        assert_eq!(store.url_for(Path::new("/elsewhere/processed/x.mp4")), None);
    }

    #[test]
    fn test_resolve_within() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        let inside = store.resolve_within("uploads/a.mp4").unwrap();
        assert_eq!(inside, store.upload_path("a.mp4"));

        let absolute = store.resolve_within(store.processed_path("b.mp4")).unwrap();
        assert_eq!(absolute, store.processed_path("b.mp4"));

        assert!(matches!(
            store.resolve_within("../../etc/passwd"),
            Err(StorageError::PathOutsideRoot(_))
        ));
        assert!(store.resolve_within("/etc/passwd").is_err());
        assert!(store.resolve_within(".").is_err());
    }
}
