//! Path → folder ID cache shared by listing, upload and change notification.
//!
//! Paths are relative to the filesystem root without leading or trailing
//! slashes; the empty path is the root. A reverse map (ID → path) lets the
//! change stream turn parent IDs back into paths.

use std::collections::HashMap;
use std::sync::RwLock;

/// Maximum number of cached directories before the cache is reset.
const DIR_CACHE_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Default)]
struct Maps {
    by_path: HashMap<String, String>,
    by_id: HashMap<String, String>,
}

#[derive(Debug)]
pub struct DirCache {
    root_id: String,
    maps: RwLock<Maps>,
}

/// Normalize a remote path: forward slashes, no leading/trailing slash, no empty segments.
pub fn normalize_path(path: &str) -> String {
    path.trim()
        .replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Split a normalized path into (parent, leaf). The root's parent is itself.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => ("", path),
    }
}

/// Join a directory path and a name
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

impl DirCache {
    pub fn new(root_id: &str) -> Self {
        Self {
            root_id: root_id.to_string(),
            maps: RwLock::new(Maps::default()),
        }
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Folder ID cached for `path`
    pub fn get(&self, path: &str) -> Option<String> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Some(self.root_id.clone());
        }
        let maps = self.maps.read().unwrap_or_else(|p| p.into_inner());
        maps.by_path.get(&path).cloned()
    }

    /// Path cached for a folder ID
    pub fn get_inv(&self, id: &str) -> Option<String> {
        if id == self.root_id {
            return Some(String::new());
        }
        let maps = self.maps.read().unwrap_or_else(|p| p.into_inner());
        maps.by_id.get(id).cloned()
    }

    /// Cache `path → id`, replacing any previous mapping of either side.
    pub fn put(&self, path: &str, id: &str) {
        let path = normalize_path(path);
        if path.is_empty() {
            return;
        }
        let mut maps = self.maps.write().unwrap_or_else(|p| p.into_inner());
        if maps.by_path.len() >= DIR_CACHE_MAX_ENTRIES {
            tracing::debug!("[DRIVE] dir cache reached {} entries, evicting all", maps.by_path.len());
            maps.by_path.clear();
            maps.by_id.clear();
        }
        if let Some(old_id) = maps.by_path.insert(path.clone(), id.to_string()) {
            maps.by_id.remove(&old_id);
        }
        if let Some(old_path) = maps.by_id.insert(id.to_string(), path.clone()) {
            if old_path != path {
                maps.by_path.remove(&old_path);
            }
        }
    }

    /// Forget `path` and everything below it
    pub fn flush_dir(&self, path: &str) {
        let path = normalize_path(path);
        let mut maps = self.maps.write().unwrap_or_else(|p| p.into_inner());
        if path.is_empty() {
            maps.by_path.clear();
            maps.by_id.clear();
            return;
        }
        let prefix = format!("{}/", path);
        let doomed: Vec<String> = maps.by_path.keys()
            .filter(|p| **p == path || p.starts_with(&prefix))
            .cloned()
            .collect();
        for p in doomed {
            if let Some(id) = maps.by_path.remove(&p) {
                maps.by_id.remove(&id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.maps.read().unwrap_or_else(|p| p.into_inner()).by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_normalize_and_split() {
        assert_eq!(normalize_path("/a//b/./c/"), "a/b/c");
        assert_eq!(normalize_path("\\docs\\x"), "docs/x");
        assert_eq!(normalize_path("/"), "");
        assert_eq!(split_path("a/b/c"), ("a/b", "c"));
        assert_eq!(split_path("c"), ("", "c"));
        assert_eq!(join_path("", "x"), "x");
        assert_eq!(join_path("a", "x"), "a/x");
    }

    #[test]
    fn test_root_always_resolves() {
        let cache = DirCache::new("root-folder");
        assert_eq!(cache.get("").as_deref(), Some("root-folder"));
        assert_eq!(cache.get("/").as_deref(), Some("root-folder"));
        assert_eq!(cache.get_inv("root-folder").as_deref(), Some(""));
        assert!(cache.get("docs").is_none());
    }

    #[test]
    fn test_put_keeps_one_id_per_path() {
        let cache = DirCache::new("root");
        cache.put("docs", "1");
        cache.put("/docs/", "2");
        assert_eq!(cache.get("docs").as_deref(), Some("2"));
        assert!(cache.get_inv("1").is_none());
        assert_eq!(cache.get_inv("2").as_deref(), Some("docs"));

        // Same folder seen under a new name (moved)
        cache.put("archive", "2");
        assert!(cache.get("docs").is_none());
        assert_eq!(cache.get_inv("2").as_deref(), Some("archive"));
    }

    #[test]
    fn test_flush_dir_removes_subtree() {
        let cache = DirCache::new("root");
        cache.put("a", "1");
        cache.put("a/b", "2");
        cache.put("ab", "3");
        cache.flush_dir("a");
        assert!(cache.get("a").is_none());
        assert!(cache.get("a/b").is_none());
        assert_eq!(cache.get("ab").as_deref(), Some("3"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(DirCache::new("root"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let path = format!("d{}/{}", i, j);
                        cache.put(&path, &format!("{}-{}", i, j));
                        assert!(cache.get(&path).is_some());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 800);
    }
}
