//! File sink for generated units.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::core::path::join_normalized;
use crate::error::{ForgeError, Result};

/// Destination for generated files.
///
/// `write` may be called concurrently for distinct paths and fails with
/// [`ForgeError::PathCollision`] when a path is written twice. Repairs go
/// through `replace`.
#[async_trait]
pub trait FileSink: Send + Sync {
    async fn write(&self, path: &str, content: &str) -> Result<()>;
    async fn replace(&self, path: &str, content: &str) -> Result<()>;
    async fn read(&self, path: &str) -> Result<String>;
}

/// Writes files under a project root directory.
#[derive(Debug)]
pub struct DiskSink {
    root: PathBuf,
    written: Mutex<HashSet<String>>,
}

impl DiskSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            written: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root-relative form of `path`; `./a/../b` and `b` are the same file.
    fn relative(path: &str) -> Result<String> {
        join_normalized("", path)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ForgeError::Validation(format!("unsafe output path '{path}'")))
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root.join(Self::relative(path)?))
    }

    fn claim(&self, relative: String) -> Result<()> {
        let mut written = self
            .written
            .lock()
            .map_err(|_| ForgeError::Validation("sink registry poisoned".to_string()))?;
        if written.contains(&relative) {
            return Err(ForgeError::PathCollision { path: relative });
        }
        written.insert(relative);
        Ok(())
    }

    async fn store(&self, target: &Path, content: &str) -> Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ForgeError::io(parent, err))?;
        }
        tokio::fs::write(target, content)
            .await
            .map_err(|err| ForgeError::io(target, err))?;
        debug!(path = %target.display(), bytes = content.len(), "wrote file");
        Ok(())
    }
}

#[async_trait]
impl FileSink for DiskSink {
    async fn write(&self, path: &str, content: &str) -> Result<()> {
        let relative = Self::relative(path)?;
        let target = self.root.join(&relative);
        self.claim(relative)?;
        self.store(&target, content).await
    }

    async fn replace(&self, path: &str, content: &str) -> Result<()> {
        let target = self.resolve(path)?;
        self.store(&target, content).await
    }

    async fn read(&self, path: &str) -> Result<String> {
        let target = self.resolve(path)?;
        tokio::fs::read_to_string(&target)
            .await
            .map_err(|err| ForgeError::io(target, err))
    }
}
