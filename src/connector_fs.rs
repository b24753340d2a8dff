//! Filesystem connector.
//!
//! Walks a local directory tree and yields one [`ItemDescriptor`] per
//! matching document. Items are processed in place; nothing is copied.
//!
//! - **identity**: first 16 hex chars of SHA-256 over the canonical path, so
//!   the same file always maps to the same state record.
//! - **fingerprint**: `"{size}-{mtime_ms}"`.
//!
//! Office lock files (`~$deck.pptx`) and dot-files are never yielded.
//! Hidden directories are not descended into. Entries that cannot be read
//! (dangling links, unreadable folders, files removed mid-walk) are logged
//! and skipped; only a missing root fails discovery.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::FilesystemConnectorConfig;
use crate::models::{ItemDescriptor, Locator};
use crate::traits::Connector;

pub struct FilesystemConnector {
    name: String,
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl FilesystemConnector {
    pub fn new(name: impl Into<String>, config: &FilesystemConnectorConfig) -> Result<Self> {
        let root = &config.root;
        if !root.is_dir() {
            bail!(
                "Filesystem connector root does not exist or is not a directory: {}",
                root.display()
            );
        }

        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        excludes.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            name: name.into(),
            root: root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    /// Lazily walk the tree. Entries come out in file-name order per directory.
    pub fn iter(&self) -> impl Iterator<Item = ItemDescriptor> + '_ {
        WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unreadable entry");
                        return None;
                    }
                };
                if !entry.file_type().is_file() || is_lock_file(entry.file_name()) {
                    return None;
                }

                let path = entry.path();
                let relative = path.strip_prefix(&self.root).unwrap_or(path);
                let rel_str = relative.to_string_lossy().replace('\\', "/");
                if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                    return None;
                }

                match describe_file(path) {
                    Ok(item) => Some(item),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                        None
                    }
                }
            })
    }
}

#[async_trait]
impl Connector for FilesystemConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        "filesystem"
    }

    async fn discover(&self) -> Result<Vec<ItemDescriptor>> {
        if !self.root.is_dir() {
            bail!("Filesystem connector root is gone: {}", self.root.display());
        }
        Ok(self.iter().collect())
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn is_lock_file(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with("~$") || name.starts_with('.')
}

/// Stable identity for a local path.
pub fn path_identity(canonical: &Path) -> String {
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

fn describe_file(path: &Path) -> Result<ItemDescriptor> {
    let canonical = std::fs::canonicalize(path)?;
    let metadata = std::fs::metadata(&canonical)?;
    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_default();
    let size = metadata.len();

    let display_name = canonical
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(ItemDescriptor {
        identity: path_identity(&canonical),
        source_locator: canonical.to_string_lossy().to_string(),
        display_name,
        modified,
        size,
        fingerprint: format!("{}-{}", size, modified.timestamp_millis()),
        locator: Locator::Local(canonical),
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(root: &Path) -> FilesystemConnectorConfig {
        FilesystemConnectorConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.pptx".to_string(), "**/*.pdf".to_string()],
            exclude_globs: vec!["archive/**".to_string()],
            follow_symlinks: false,
        }
    }

    fn touch(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn discovers_matching_documents() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("a.pptx"), b"aaaa");
        touch(&root.join("sub/b.pdf"), b"bb");
        touch(&root.join("notes.txt"), b"ignored");
        touch(&root.join("~$a.pptx"), b"lock");
        touch(&root.join(".hidden.pptx"), b"x");
        touch(&root.join(".cache/c.pptx"), b"x");
        touch(&root.join("archive/old.pptx"), b"x");

        let connector = FilesystemConnector::new("docs", &config(root)).unwrap();
        let items = connector.discover().await.unwrap();
        let names: Vec<_> = items.iter().map(|i| i.display_name.as_str()).collect();
        assert_eq!(names, vec!["a.pptx", "b.pdf"]);

        let a = &items[0];
        assert_eq!(a.size, 4);
        assert_eq!(a.identity.len(), 16);
        assert!(a.fingerprint.starts_with("4-"));
        assert!(matches!(a.locator, Locator::Local(_)));
        assert_eq!(connector.source_label(), "filesystem:docs");
    }

    #[tokio::test]
    async fn identity_is_stable_and_content_independent() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("deck.pptx");
        touch(&file, b"v1");
        let connector = FilesystemConnector::new("docs", &config(tmp.path())).unwrap();
        let first = connector.discover().await.unwrap();

        touch(&file, b"version two");
        let second = connector.discover().await.unwrap();

        assert_eq!(first[0].identity, second[0].identity);
        assert_ne!(first[0].fingerprint, second[0].fingerprint);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn broken_entry_does_not_hide_its_neighbours() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("good.pptx"), b"deck");
        std::os::unix::fs::symlink(root.join("missing.pptx"), root.join("link.pptx")).unwrap();

        let mut cfg = config(root);
        cfg.follow_symlinks = true;
        let connector = FilesystemConnector::new("docs", &cfg).unwrap();

        let items = connector.discover().await.unwrap();
        let names: Vec<_> = items.iter().map(|i| i.display_name.as_str()).collect();
        assert_eq!(names, vec!["good.pptx"]);
    }

    #[tokio::test]
    async fn root_removed_after_setup_fails_discovery() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("docs");
        touch(&root.join("a.pptx"), b"a");
        let connector = FilesystemConnector::new("docs", &config(&root)).unwrap();

        std::fs::remove_dir_all(&root).unwrap();
        assert!(connector.discover().await.is_err());
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = FilesystemConnector::new("docs", &config(&tmp.path().join("nope")));
        assert!(result.is_err());
    }
}
