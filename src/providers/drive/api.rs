//! Wire types for the drive JSON API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::types::RemoteEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    File,
    Folder,
}

/// A file or folder as the API reports it
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Servers send `null` for some items
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: ItemKind,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Empty string means the server has no hash recorded (yet)
    #[serde(default)]
    pub hash: Option<String>,
}

impl FileItem {
    pub fn is_dir(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// The hash, if the server has actually computed one
    pub fn content_hash(&self) -> Option<&str> {
        self.hash.as_deref().filter(|h| !h.is_empty())
    }

    pub fn to_entry(&self, path: String) -> RemoteEntry {
        RemoteEntry {
            id: self.id.clone(),
            name: self.name.clone(),
            path,
            is_dir: self.is_dir(),
            size: if self.is_dir() { 0 } else { self.size.unwrap_or(0) },
            modified: self.updated_at,
            mime_type: self.mime_type.clone(),
            parent_id: self.parent_id.clone(),
            hash: self.content_hash().map(str::to_string),
        }
    }
}

/// Display-only counters. The server fills these inconsistently (a count of
/// 999 for a three-item folder is normal); nothing may branch on them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default)]
    pub total_pages: Option<i64>,
    #[serde(default)]
    pub current_page: Option<i64>,
    /// Only consulted when the last item carries no usable id
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPage {
    #[serde(default)]
    pub items: Vec<FileItem>,
    /// Advisory, not for control flow
    #[serde(default)]
    pub meta: ListMeta,
}

/// Body of the finalize call
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileRequest<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub parent_id: &'a str,
    pub mime_type: &'a str,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<i64>,
    pub encrypted: bool,
    pub upload_id: &'a str,
    pub updated_at: DateTime<Utc>,
}

/// Payload of one `data:` line on the event stream
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub source: EventSource,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: ItemKind,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Set on moves: the folder the entry moved into
    #[serde(default)]
    pub dest_parent_id: Option<String>,
}
