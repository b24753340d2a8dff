//! Remote document library connector.
//!
//! Two layers:
//!
//! - [`GraphDriveSource`] implements [`RemoteSource`] against a Graph-style
//!   drive API (`/drives/{drive}/items/{id}/children`, `@odata.nextLink`
//!   paging, `@microsoft.graph.downloadUrl` pre-authorized links). It only
//!   speaks HTTP and classifies failures; it never retries.
//! - [`RemoteConnector`] walks one or more configured roots through any
//!   [`RemoteSource`] and produces [`ItemDescriptor`]s for matching files.
//!
//! Authentication is a bearer token read from the environment variable named
//! by `connectors.remote.token_env`; obtaining it is left to an external
//! credential helper.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::config::RemoteConnectorConfig;
use crate::error::SourceError;
use crate::models::{ItemDescriptor, Locator, RemoteRoot};
use crate::traits::{Connector, RemoteEntry, RemoteSource};

// ═══════════════════════════════════════════════════════════════════════
// HTTP source
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveItem {
    id: String,
    name: String,
    #[serde(default)]
    size: u64,
    last_modified_date_time: Option<DateTime<Utc>>,
    e_tag: Option<String>,
    c_tag: Option<String>,
    folder: Option<serde_json::Value>,
    #[serde(rename = "@microsoft.graph.downloadUrl")]
    download_url: Option<String>,
}

pub struct GraphDriveSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GraphDriveSource {
    pub fn new(base_url: &str, token: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &RemoteConnectorConfig) -> Result<Self> {
        let token = match std::env::var(&config.token_env) {
            Ok(token) if !token.trim().is_empty() => token,
            _ => bail!(
                "Remote connector requires a bearer token in ${}",
                config.token_env
            ),
        };
        Self::new(&config.base_url, token, Duration::from_secs(config.timeout_secs))
    }

    fn root_children_url(&self, root: &RemoteRoot) -> String {
        let path = root.path.trim_matches('/');
        if path.is_empty() {
            format!("{}/drives/{}/root/children", self.base_url, root.drive_id)
        } else {
            format!(
                "{}/drives/{}/root:/{}:/children",
                self.base_url, root.drive_id, path
            )
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let response = self.client.get(url).bearer_auth(&self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::from_status(status.as_u16(), &body));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Permanent(format!("malformed listing: {}", e)))
    }

    /// Follow `@odata.nextLink` from `url` and collect every child.
    async fn list_pages(
        &self,
        mut url: String,
        drive_id: &str,
        parent_path: &str,
    ) -> Result<Vec<RemoteEntry>, SourceError> {
        let mut entries = Vec::new();
        loop {
            let page: ChildrenPage = self.get_json(&url).await?;
            for item in page.value {
                entries.push(RemoteEntry {
                    drive_id: drive_id.to_string(),
                    path: format!("{}/{}", parent_path, item.name),
                    is_folder: item.folder.is_some(),
                    id: item.id,
                    name: item.name,
                    size: item.size,
                    modified: item.last_modified_date_time.unwrap_or_default(),
                    ctag: item.c_tag,
                    etag: item.e_tag,
                    download_url: item.download_url,
                });
            }
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl RemoteSource for GraphDriveSource {
    async fn list_root(&self, root: &RemoteRoot) -> Result<Vec<RemoteEntry>, SourceError> {
        let path = root.path.trim_matches('/');
        let parent = if path.is_empty() {
            String::new()
        } else {
            format!("/{}", path)
        };
        self.list_pages(self.root_children_url(root), &root.drive_id, &parent)
            .await
    }

    async fn list_children(&self, folder: &RemoteEntry) -> Result<Vec<RemoteEntry>, SourceError> {
        let url = format!(
            "{}/drives/{}/items/{}/children",
            self.base_url, folder.drive_id, folder.id
        );
        self.list_pages(url, &folder.drive_id, &folder.path).await
    }

    async fn download(
        &self,
        drive_id: &str,
        item_id: &str,
        download_url: Option<&str>,
        dest: &Path,
    ) -> Result<(), SourceError> {
        let request = match download_url {
            // Pre-authorized links reject an Authorization header on some tenants.
            Some(url) => self.client.get(url),
            None => self
                .client
                .get(format!(
                    "{}/drives/{}/items/{}/content",
                    self.base_url, drive_id, item_id
                ))
                .bearer_auth(&self.token),
        };

        let mut response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::from_status(status.as_u16(), &body));
        }

        let part = part_path(dest);
        let result = async {
            let mut file = tokio::fs::File::create(&part).await?;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            drop(file);
            tokio::fs::rename(&part, dest).await?;
            Ok::<(), SourceError>(())
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&part).await;
        }
        result
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

// ═══════════════════════════════════════════════════════════════════════
// Connector
// ═══════════════════════════════════════════════════════════════════════

/// Walks remote libraries and yields descriptors for files with a configured extension.
///
/// Each root is listed independently. A root that cannot be listed is logged
/// and skipped; discovery fails only when every root fails. A failed listing
/// of a sub-folder skips that sub-tree. Folders already seen are not
/// revisited, an item reachable from overlapping roots is reported once, and
/// recursion stops at `max_depth`.
pub struct RemoteConnector {
    name: String,
    source: Arc<dyn RemoteSource>,
    roots: Vec<RemoteRoot>,
    extensions: Vec<String>,
    max_depth: usize,
}

impl RemoteConnector {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn RemoteSource>,
        roots: Vec<RemoteRoot>,
        extensions: &[String],
        max_depth: usize,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            roots,
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            max_depth,
        }
    }

    fn wants(&self, entry: &RemoteEntry) -> bool {
        if entry.name.starts_with("~$") || entry.name.starts_with('.') {
            return false;
        }
        let ext = Path::new(&entry.name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());
        match ext {
            Some(ext) => self.extensions.iter().any(|e| *e == ext),
            None => false,
        }
    }

    /// Walk the tree under one root whose top-level listing succeeded.
    async fn walk(
        &self,
        top: Vec<RemoteEntry>,
        visited: &mut HashSet<(String, String)>,
        seen: &mut HashSet<(String, String)>,
        items: &mut Vec<ItemDescriptor>,
    ) {
        let mut stack: Vec<(RemoteEntry, usize)> = Vec::new();
        self.collect(top, 1, &mut stack, seen, items);

        while let Some((folder, depth)) = stack.pop() {
            if !visited.insert((folder.drive_id.clone(), folder.id.clone())) {
                continue;
            }
            match self.source.list_children(&folder).await {
                Ok(children) => self.collect(children, depth, &mut stack, seen, items),
                Err(e) => {
                    tracing::warn!(folder = %folder.path, error = %e, "skipping folder");
                }
            }
        }
    }

    fn collect(
        &self,
        children: Vec<RemoteEntry>,
        depth: usize,
        stack: &mut Vec<(RemoteEntry, usize)>,
        seen: &mut HashSet<(String, String)>,
        items: &mut Vec<ItemDescriptor>,
    ) {
        for child in children {
            if child.is_folder {
                if depth < self.max_depth {
                    stack.push((child, depth + 1));
                } else {
                    tracing::warn!(folder = %child.path, "max depth reached, not descending");
                }
            } else if self.wants(&child) && seen.insert((child.drive_id.clone(), child.id.clone())) {
                items.push(describe_entry(child));
            }
        }
    }
}

fn describe_entry(entry: RemoteEntry) -> ItemDescriptor {
    // cTag only changes with content; eTag also changes on renames and moves.
    let fingerprint = entry
        .ctag
        .clone()
        .or_else(|| entry.etag.clone())
        .unwrap_or_else(|| format!("{}-{}", entry.size, entry.modified.timestamp_millis()));
    ItemDescriptor {
        identity: entry.id.clone(),
        source_locator: entry.path,
        display_name: entry.name,
        modified: entry.modified,
        size: entry.size,
        fingerprint,
        locator: Locator::Remote {
            drive_id: entry.drive_id,
            item_id: entry.id,
            download_url: entry.download_url,
        },
    }
}

#[async_trait]
impl Connector for RemoteConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        "remote"
    }

    async fn discover(&self) -> Result<Vec<ItemDescriptor>> {
        let mut items = Vec::new();
        let mut visited = HashSet::new();
        let mut seen = HashSet::new();
        let mut failures = Vec::new();

        for root in &self.roots {
            match self.source.list_root(root).await {
                Ok(top) => {
                    let before = items.len();
                    self.walk(top, &mut visited, &mut seen, &mut items).await;
                    tracing::debug!(root = %root.label(), items = items.len() - before, "root walked");
                }
                Err(e) => {
                    tracing::warn!(root = %root.label(), error = %e, "skipping remote root");
                    failures.push(format!("{}: {}", root.label(), e));
                }
            }
        }

        if !self.roots.is_empty() && failures.len() == self.roots.len() {
            bail!("Failed to list every remote root: {}", failures.join("; "));
        }

        items.sort_by(|a, b| a.source_locator.cmp(&b.source_locator));
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn source(server: &MockServer) -> GraphDriveSource {
        GraphDriveSource::new(&server.base_url(), "secret".to_string(), Duration::from_secs(5))
            .unwrap()
    }

    fn decks() -> RemoteRoot {
        RemoteRoot::new("drive1", "Decks")
    }

    #[tokio::test]
    async fn lists_children_across_pages() {
        let server = MockServer::start();
        let next = server.url("/page2");
        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/drives/drive1/root:/Decks:/children")
                .header("authorization", "Bearer secret");
            then.status(200).json_body(json!({
                "value": [
                    { "id": "f1", "name": "q3.pptx", "size": 10,
                      "lastModifiedDateTime": "2024-05-01T10:00:00Z",
                      "eTag": "\"e1\"", "cTag": "\"c1\"",
                      "file": {}, "@microsoft.graph.downloadUrl": "https://dl/1" }
                ],
                "@odata.nextLink": next
            }));
        });
        let second = server.mock(|when, then| {
            when.method(GET).path("/page2");
            then.status(200).json_body(json!({
                "value": [ { "id": "d1", "name": "Archive", "folder": { "childCount": 2 } } ]
            }));
        });

        let entries = source(&server).list_root(&decks()).await.unwrap();
        first.assert();
        second.assert();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "/Decks/q3.pptx");
        assert_eq!(entries[0].drive_id, "drive1");
        assert_eq!(entries[0].etag.as_deref(), Some("\"e1\""));
        assert_eq!(entries[0].ctag.as_deref(), Some("\"c1\""));
        assert!(!entries[0].is_folder);
        assert!(entries[1].is_folder);
    }

    #[tokio::test]
    async fn listing_errors_are_classified() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/drives/drive1/items/busy/children");
            then.status(503).body("try later");
        });
        server.mock(|when, then| {
            when.method(GET).path("/drives/drive1/items/gone/children");
            then.status(404).body("not found");
        });

        let src = source(&server);
        let folder = |id: &str| RemoteEntry {
            drive_id: "drive1".to_string(),
            id: id.to_string(),
            name: id.to_string(),
            path: format!("/{}", id),
            is_folder: true,
            size: 0,
            modified: Utc::now(),
            ctag: None,
            etag: None,
            download_url: None,
        };

        let err = src.list_children(&folder("busy")).await.unwrap_err();
        assert!(err.is_transient());
        let err = src.list_children(&folder("gone")).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn download_writes_complete_file() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/drives/drive1/items/f1/content")
                .header("authorization", "Bearer secret");
            then.status(200).body("deck-bytes");
        });

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("f1.pptx");
        source(&server)
            .download("drive1", "f1", None, &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"deck-bytes");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn failed_download_leaves_nothing_behind() {
        let server = MockServer::start();
        let url = server.url("/dl/f1");
        server.mock(|when, then| {
            when.method(GET).path("/dl/f1");
            then.status(403).body("denied");
        });

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("f1.pptx");
        let err = source(&server)
            .download("drive1", "f1", Some(&url), &dest)
            .await
            .unwrap_err();

        assert!(!err.is_transient());
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn unreachable_library_does_not_hide_the_others() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/drives/sales/root:/Decks:/children");
            then.status(200).json_body(json!({
                "value": [
                    { "id": "s1", "name": "pitch.pptx", "size": 3, "cTag": "c-s1", "file": {} }
                ]
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/drives/legal/root/children");
            then.status(403).body("access denied");
        });
        server.mock(|when, then| {
            when.method(GET).path("/drives/marketing/root/children");
            then.status(200).json_body(json!({
                "value": [
                    { "id": "m1", "name": "brand.pdf", "size": 4, "eTag": "e-m1", "file": {} }
                ]
            }));
        });

        let connector = RemoteConnector::new(
            "libraries",
            Arc::new(source(&server)),
            vec![
                RemoteRoot::new("sales", "Decks"),
                RemoteRoot::new("legal", ""),
                RemoteRoot::new("marketing", ""),
            ],
            &["pptx".to_string(), "pdf".to_string()],
            32,
        );

        let items = connector.discover().await.unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.identity.as_str()).collect();
        assert_eq!(ids, vec!["s1", "m1"]);
        assert_eq!(items[0].fingerprint, "c-s1");
        match &items[0].locator {
            Locator::Remote { drive_id, item_id, .. } => {
                assert_eq!(drive_id, "sales");
                assert_eq!(item_id, "s1");
            }
            other => panic!("unexpected locator {:?}", other),
        }
    }

    #[tokio::test]
    async fn every_library_failing_aborts_discovery() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/drives/sales/root/children");
            then.status(503).body("busy");
        });
        server.mock(|when, then| {
            when.method(GET).path("/drives/legal/root/children");
            then.status(403).body("denied");
        });

        let connector = RemoteConnector::new(
            "libraries",
            Arc::new(source(&server)),
            vec![RemoteRoot::new("sales", ""), RemoteRoot::new("legal", "")],
            &["pptx".to_string()],
            32,
        );

        let err = connector.discover().await.unwrap_err().to_string();
        assert!(err.contains("sales"));
        assert!(err.contains("legal"));
    }

    /// In-memory tree keyed by folder id (the drive id for a root).
    struct FakeTree {
        children: HashMap<String, Vec<RemoteEntry>>,
        failing: HashSet<String>,
        listed: Mutex<Vec<String>>,
    }

    impl FakeTree {
        fn listing(&self, id: String) -> Result<Vec<RemoteEntry>, SourceError> {
            self.listed.lock().unwrap().push(id.clone());
            if self.failing.contains(&id) {
                return Err(SourceError::Transient("timeout".into()));
            }
            Ok(self.children.get(&id).cloned().unwrap_or_default())
        }
    }

    #[async_trait]
    impl RemoteSource for FakeTree {
        async fn list_root(&self, root: &RemoteRoot) -> Result<Vec<RemoteEntry>, SourceError> {
            self.listing(root.drive_id.clone())
        }

        async fn list_children(&self, folder: &RemoteEntry) -> Result<Vec<RemoteEntry>, SourceError> {
            self.listing(folder.id.clone())
        }

        async fn download(
            &self,
            _: &str,
            _: &str,
            _: Option<&str>,
            _: &Path,
        ) -> Result<(), SourceError> {
            Err(SourceError::Permanent("not used".into()))
        }
    }

    fn entry(id: &str, path: &str, is_folder: bool) -> RemoteEntry {
        RemoteEntry {
            drive_id: "root".to_string(),
            id: id.to_string(),
            name: path.rsplit('/').next().unwrap().to_string(),
            path: path.to_string(),
            is_folder,
            size: 5,
            modified: Utc::now(),
            ctag: None,
            etag: if is_folder { None } else { Some(format!("etag-{}", id)) },
            download_url: None,
        }
    }

    fn tree(failing: &[&str]) -> FakeTree {
        let mut children = HashMap::new();
        children.insert(
            "root".to_string(),
            vec![
                entry("a", "/a.pptx", false),
                entry("txt", "/readme.txt", false),
                entry("lock", "/~$a.pptx", false),
                entry("sub", "/sub", true),
                entry("bad", "/bad", true),
            ],
        );
        children.insert(
            "sub".to_string(),
            vec![entry("b", "/sub/b.PPTX", false), entry("deep", "/sub/deep", true)],
        );
        children.insert("deep".to_string(), vec![entry("c", "/sub/deep/c.pdf", false)]);
        children.insert("bad".to_string(), vec![entry("x", "/bad/x.pptx", false)]);
        FakeTree {
            children,
            failing: failing.iter().map(|s| s.to_string()).collect(),
            listed: Mutex::new(Vec::new()),
        }
    }

    fn connector(source: Arc<FakeTree>, max_depth: usize) -> RemoteConnector {
        RemoteConnector::new(
            "library",
            source,
            vec![RemoteRoot::new("root", "")],
            &["pptx".to_string(), "pdf".to_string()],
            max_depth,
        )
    }

    #[tokio::test]
    async fn walks_tree_and_skips_failed_subfolders() {
        let connector = connector(Arc::new(tree(&["bad"])), 32);

        let items = connector.discover().await.unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.identity.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(items[0].fingerprint, "etag-a");
        assert_eq!(connector.source_label(), "remote:library");
    }

    #[tokio::test]
    async fn max_depth_bounds_recursion() {
        let source = Arc::new(tree(&[]));
        let connector = connector(source.clone(), 2);

        let items = connector.discover().await.unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.identity.as_str()).collect();
        assert!(ids.contains(&"b"));
        assert!(!ids.contains(&"c"));
        assert!(!source.listed.lock().unwrap().contains(&"deep".to_string()));
    }

    #[tokio::test]
    async fn single_root_failure_aborts_discovery() {
        let connector = connector(Arc::new(tree(&["root"])), 32);
        assert!(connector.discover().await.is_err());
    }

    #[test]
    fn content_tag_is_preferred_over_entity_tag() {
        let mut deck = entry("a", "/a.pptx", false);
        deck.ctag = Some("content-v1".to_string());
        assert_eq!(describe_entry(deck.clone()).fingerprint, "content-v1");

        // A rename changes the eTag only.
        deck.etag = Some("etag-after-rename".to_string());
        assert_eq!(describe_entry(deck.clone()).fingerprint, "content-v1");

        deck.ctag = None;
        deck.etag = None;
        assert_eq!(
            describe_entry(deck.clone()).fingerprint,
            format!("5-{}", deck.modified.timestamp_millis())
        );
    }
}
