//! Cursor-paged directory listing and path → folder ID resolution

use async_trait::async_trait;
use tracing::{debug, warn};

use super::api::{FileItem, ItemKind, ListPage};
use super::{DriveObject, DriveProvider};
use crate::providers::dir_cache::{join_path, normalize_path, split_path};
use crate::providers::{Lister, ProviderError, RemoteEntry};

impl DriveProvider {
    /// Page through the children of `dir_id`, calling `f` for each item in
    /// ascending id order. `f` returns `true` to stop early; the return value
    /// says whether it did.
    ///
    /// The next cursor is the id of the last item on the page. The listing
    /// ends on a short page, or when no cursor can be derived or it repeats.
    pub(crate) async fn list_all<F>(&self, dir_id: &str, mut f: F) -> Result<bool, ProviderError>
    where
        F: FnMut(&FileItem) -> bool + Send,
    {
        let limit = self.config.page_size.max(1);
        let mut cursor = String::new();
        let mut page = 1u32;

        loop {
            let mut url = self.api_url(&["files"]);
            url.query_pairs_mut()
                .append_pair("operation", "list")
                .append_pair("parentId", dir_id)
                .append_pair("limit", &limit.to_string())
                .append_pair("sort", "id")
                .append_pair("order", "asc")
                .append_pair("cursor", &cursor)
                .append_pair("page", &page.to_string());

            let resp: ListPage = self.get_json(url).await?;
            debug!(
                "[DRIVE] list {} page {}: {} items (server claims count={:?}, totalPages={:?})",
                dir_id, page, resp.items.len(), resp.meta.count, resp.meta.total_pages
            );

            for item in &resp.items {
                if f(item) {
                    return Ok(true);
                }
            }

            if resp.items.len() < limit as usize {
                break;
            }

            let next = match resp.items.last().map(|i| i.id.as_str()).filter(|id| !id.is_empty()) {
                Some(id) => id.to_string(),
                None => match resp.meta.next_cursor.filter(|c| !c.is_empty()) {
                    Some(c) => c,
                    None => break,
                },
            };
            if next == cursor {
                warn!("[DRIVE] list {}: cursor '{}' did not advance, stopping", dir_id, cursor);
                break;
            }
            cursor = next;
            page += 1;
        }

        Ok(false)
    }

    /// Find a direct child of `dir_id` named `leaf`, optionally of one kind
    pub(crate) async fn find_leaf(
        &self,
        dir_id: &str,
        leaf: &str,
        kind: Option<ItemKind>,
    ) -> Result<Option<FileItem>, ProviderError> {
        let mut found = None;
        self.list_all(dir_id, |item| {
            if item.name == leaf && kind.map_or(true, |k| item.kind == k) {
                found = Some(item.clone());
                true
            } else {
                false
            }
        }).await?;
        Ok(found)
    }

    /// Resolve a directory path to its folder ID, filling the dir cache on the way
    pub async fn find_dir(&self, path: &str) -> Result<String, ProviderError> {
        let normalized = normalize_path(path);
        if let Some(id) = self.dir_cache.get(&normalized) {
            return Ok(id);
        }

        let mut current_id = self.dir_cache.root_id().to_string();
        let mut current_path = String::new();

        for part in normalized.split('/') {
            let parent_path = current_path.clone();
            current_path = join_path(&current_path, part);

            if let Some(id) = self.dir_cache.get(&current_path) {
                current_id = id;
                continue;
            }

            match self.find_leaf(&current_id, part, Some(ItemKind::Folder)).await? {
                Some(item) => {
                    self.dir_cache.put(&current_path, &item.id);
                    current_id = item.id;
                }
                None => {
                    return Err(ProviderError::NotFound(format!(
                        "Folder '{}' not found in /{}", part, parent_path
                    )));
                }
            }
        }

        Ok(current_id)
    }

    /// Look up the file at `remote`
    pub async fn new_object(&self, remote: &str) -> Result<DriveObject, ProviderError> {
        let remote = normalize_path(remote);
        if remote.is_empty() {
            return Err(ProviderError::IsDirectory("/".to_string()));
        }
        let (dir, leaf) = split_path(&remote);
        let dir_id = self.find_dir(dir).await?;

        match self.find_leaf(&dir_id, leaf, None).await? {
            Some(item) if item.is_dir() => {
                self.dir_cache.put(&remote, &item.id);
                Err(ProviderError::IsDirectory(remote))
            }
            Some(item) => Ok(DriveObject::from_item(self.clone(), &remote, item)),
            None => Err(ProviderError::NotFound(remote)),
        }
    }
}

#[async_trait]
impl Lister for DriveProvider {
    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, ProviderError> {
        let dir = normalize_path(dir);
        let dir_id = self.find_dir(&dir).await?;

        let mut entries = Vec::new();
        self.list_all(&dir_id, |item| {
            let path = join_path(&dir, &item.name);
            if item.is_dir() {
                self.dir_cache.put(&path, &item.id);
            }
            entries.push(item.to_entry(path));
            false
        }).await?;

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{json, status, MockServer, Recorded};
    use super::*;
    use axum::http::{Method, StatusCode};
    use axum::response::Response;

    fn item(id: &str, name: &str, kind: &str, parent: &str) -> String {
        format!(
            r#"{{"id":"{}","name":"{}","mimeType":"text/plain","size":1,"parentId":"{}","type":"{}","updatedAt":"2026-01-01T00:00:00Z","hash":"h{}"}}"#,
            id, name, parent, kind, id
        )
    }

    fn page(items: &[String], current: u32) -> String {
        format!(
            r#"{{"items":[{}],"meta":{{"count":999,"totalPages":999,"currentPage":{}}}}}"#,
            items.join(","), current
        )
    }

    fn list_handler(r: &Recorded) -> Response {
        if r.method != Method::GET || r.path != "/api/files" {
            return status(StatusCode::NOT_FOUND);
        }
        match r.param("cursor") {
            Some("") => json(StatusCode::OK, &page(&[
                item("1", "a.txt", "file", "root-folder"),
                item("2", "b.txt", "file", "root-folder"),
            ], 1)),
            Some("2") => json(StatusCode::OK, &page(&[
                item("3", "c.txt", "file", "root-folder"),
            ], 2)),
            _ => status(StatusCode::BAD_REQUEST),
        }
    }

    #[tokio::test]
    async fn test_list_pages_by_cursor_until_short_page() {
        let server = MockServer::start(list_handler).await;
        let provider = server.provider(|c| c.page_size = 2);

        let entries = provider.list("").await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries.iter().map(|e| e.path.as_str()).collect::<Vec<_>>(),
            vec!["a.txt", "b.txt", "c.txt"]
        );

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        for r in &requests {
            assert_eq!(r.param("operation"), Some("list"));
            assert_eq!(r.param("parentId"), Some("root-folder"));
            assert_eq!(r.param("limit"), Some("2"));
            assert_eq!(r.param("sort"), Some("id"));
            assert_eq!(r.param("order"), Some("asc"));
            assert!(r.query.contains_key("cursor"));
        }
        assert_eq!(requests[0].param("cursor"), Some(""));
        assert_eq!(requests[0].param("page"), Some("1"));
        assert_eq!(requests[1].param("cursor"), Some("2"));
        assert_eq!(requests[1].param("page"), Some("2"));
    }

    #[tokio::test]
    async fn test_full_last_page_needs_one_empty_page() {
        let server = MockServer::start(|r| match r.param("cursor") {
            Some("") => json(StatusCode::OK, &page(&[
                item("1", "a", "file", "root-folder"),
                item("2", "b", "file", "root-folder"),
            ], 1)),
            _ => json(StatusCode::OK, r#"{"items":[],"meta":{"count":2,"totalPages":1}}"#),
        }).await;
        let provider = server.provider(|c| c.page_size = 2);

        let entries = provider.list("").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(server.count(Method::GET, "/api/files"), 2);
    }

    #[tokio::test]
    async fn test_list_stops_when_cursor_repeats() {
        // A server that ignores the cursor keeps returning the same full page
        let server = MockServer::start(|_| json(StatusCode::OK, &page(&[
            item("7", "x", "file", "root-folder"),
        ], 1))).await;
        let provider = server.provider(|c| c.page_size = 1);

        let entries = provider.list("").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(server.count(Method::GET, "/api/files"), 2);
    }

    #[tokio::test]
    async fn test_next_cursor_used_when_last_id_is_empty() {
        let server = MockServer::start(|r| match r.param("cursor") {
            Some("") => json(StatusCode::OK, r#"{"items":[{"id":"1","name":"a"},{"id":"","name":"b"}],"meta":{"nextCursor":"nc"}}"#),
            Some("nc") => json(StatusCode::OK, r#"{"items":[{"id":"3","name":"c"},{"id":"","name":"d"}],"meta":{}}"#),
            _ => status(StatusCode::BAD_REQUEST),
        }).await;
        let provider = server.provider(|c| c.page_size = 2);

        let entries = provider.list("").await.unwrap();
        assert_eq!(entries.len(), 4);

        // Full second page, but no id and no server cursor to continue from
        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].param("cursor"), Some("nc"));
        assert_eq!(requests[1].param("page"), Some("2"));
    }

    #[tokio::test]
    async fn test_list_stops_without_usable_cursor() {
        let server = MockServer::start(|_| json(
            StatusCode::OK,
            r#"{"items":[{"id":"1","name":"a"},{"id":"","name":"b"}],"meta":{"count":999}}"#,
        )).await;
        let provider = server.provider(|c| c.page_size = 2);

        let entries = provider.list("").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(server.count(Method::GET, "/api/files"), 1);
    }

    #[tokio::test]
    async fn test_list_error_discards_partial_results() {
        let server = MockServer::start(|r| match r.param("cursor") {
            Some("") => json(StatusCode::OK, &page(&[
                item("1", "a", "file", "root-folder"),
                item("2", "b", "file", "root-folder"),
            ], 1)),
            _ => json(StatusCode::INTERNAL_SERVER_ERROR, r#"{"message":"boom"}"#),
        }).await;
        let provider = server.provider(|c| c.page_size = 2);

        let err = provider.list("").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(err.to_string().contains("boom"));
        // Listing calls are not retried
        assert_eq!(server.count(Method::GET, "/api/files"), 2);
    }

    #[tokio::test]
    async fn test_find_dir_walks_and_caches_path() {
        let server = MockServer::start(|r| match r.param("parentId") {
            Some("root-folder") => json(StatusCode::OK, &page(&[
                item("10", "docs", "folder", "root-folder"),
                item("11", "notes.txt", "file", "root-folder"),
            ], 1)),
            Some("10") => json(StatusCode::OK, &page(&[
                item("20", "2026", "folder", "10"),
            ], 1)),
            _ => json(StatusCode::OK, r#"{"items":[]}"#),
        }).await;
        let provider = server.provider(|_| {});

        assert_eq!(provider.find_dir("/docs/2026/").await.unwrap(), "20");
        assert_eq!(provider.dir_cache().get("docs").as_deref(), Some("10"));
        assert_eq!(provider.dir_cache().get_inv("20").as_deref(), Some("docs/2026"));

        // Served from the cache
        assert_eq!(provider.find_dir("docs/2026").await.unwrap(), "20");
        assert_eq!(server.count(Method::GET, "/api/files"), 2);

        let err = provider.find_dir("docs/missing").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_subdirectory_caches_folders() {
        let server = MockServer::start(|r| match r.param("parentId") {
            Some("root-folder") => json(StatusCode::OK, &page(&[
                item("10", "docs", "folder", "root-folder"),
            ], 1)),
            Some("10") => json(StatusCode::OK, &page(&[
                item("30", "drafts", "folder", "10"),
                item("31", "plan.md", "file", "10"),
            ], 1)),
            _ => json(StatusCode::OK, r#"{"items":[]}"#),
        }).await;
        let provider = server.provider(|_| {});

        let entries = provider.list("docs").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].path, "docs/drafts");
        assert_eq!(entries[1].hash.as_deref(), Some("h31"));
        assert_eq!(provider.dir_cache().get("docs/drafts").as_deref(), Some("30"));
    }

    #[tokio::test]
    async fn test_new_object_lookup() {
        let server = MockServer::start(|_| json(StatusCode::OK, &page(&[
            item("10", "docs", "folder", "root-folder"),
            item("11", "notes.txt", "file", "root-folder"),
        ], 1))).await;
        let provider = server.provider(|_| {});

        let obj = provider.new_object("notes.txt").await.unwrap();
        assert_eq!(obj.id(), "11");
        assert_eq!(obj.remote(), "notes.txt");
        assert_eq!(obj.size(), 1);

        assert!(matches!(provider.new_object("docs").await, Err(ProviderError::IsDirectory(_))));
        assert!(matches!(provider.new_object("nope.txt").await, Err(ProviderError::NotFound(_))));
    }
}
