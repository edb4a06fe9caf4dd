//! Remote file handle with a memoized content hash

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;

use super::api::FileItem;
use super::{DriveProvider, HASH_KINDS};
use crate::providers::{HashKind, HashProvider, ProviderError};

/// A file on the drive.
///
/// The hash is memoized only once the server reports a non-empty value; until
/// then every `hash()` call goes back to the API. Concurrent first calls share
/// one in-flight fetch.
#[derive(Debug)]
pub struct DriveObject {
    provider: DriveProvider,
    remote: String,
    info: FileItem,
    hash: OnceCell<String>,
}

impl DriveObject {
    pub(crate) fn from_item(provider: DriveProvider, remote: &str, info: FileItem) -> Self {
        let hash = OnceCell::new_with(info.content_hash().map(str::to_string));
        Self {
            provider,
            remote: remote.to_string(),
            info,
            hash,
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// Path relative to the filesystem root
    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn size(&self) -> u64 {
        self.info.size.unwrap_or(0)
    }

    pub fn mod_time(&self) -> Option<DateTime<Utc>> {
        self.info.updated_at
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.info.mime_type.as_deref()
    }

    /// Metadata snapshot taken when the handle was created
    pub fn info(&self) -> &FileItem {
        &self.info
    }

    async fn fetch_hash(&self) -> Result<String, ProviderError> {
        let item = self.provider.get_item(&self.info.id).await?;
        match item.content_hash() {
            Some(hash) => Ok(hash.to_string()),
            None => Err(ProviderError::HashUnavailable(self.remote_or_id().to_string())),
        }
    }

    fn remote_or_id(&self) -> &str {
        if self.remote.is_empty() {
            &self.info.id
        } else {
            &self.remote
        }
    }
}

#[async_trait]
impl HashProvider for DriveObject {
    async fn hash(&self, kind: HashKind) -> Result<String, ProviderError> {
        if !HASH_KINDS.contains(&kind) {
            return Err(ProviderError::HashUnsupported(kind));
        }
        let hash = self.hash.get_or_try_init(|| self.fetch_hash()).await?;
        Ok(hash.clone())
    }
}
