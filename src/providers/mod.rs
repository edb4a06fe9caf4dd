//! Storage Providers Module
//!
//! A provider exposes a remote drive as a filesystem through a small set of
//! capability traits. Callers dispatch on capabilities, not on concrete types:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     StorageProvider                      │
//! │                display_name, hash_kinds                  │
//! └──────────────────────────────────────────────────────────┘
//!        │              │               │              │
//!        ▼              ▼               ▼              ▼
//!   ┌────────┐    ┌──────────┐   ┌──────────────┐ ┌──────────────┐
//!   │ Lister │    │ Uploader │   │ HashProvider │ │ ChangeSource │
//!   └────────┘    └──────────┘   └──────────────┘ └──────────────┘
//! ```

pub mod types;
pub mod http_retry;
pub mod dir_cache;
pub mod drive;

pub use types::*;
pub use http_retry::{HttpRetryConfig, Pacer};
pub use dir_cache::DirCache;
pub use drive::{ChangeSubscription, DriveObject, DriveProvider, PollSignal};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Callback invoked for every remote change: (path, kind)
pub type ChangeCallback = Arc<dyn Fn(&str, EntryKind) + Send + Sync>;

/// Base trait every provider implements
pub trait StorageProvider: Send + Sync {
    /// Display name for this provider instance
    fn display_name(&self) -> String;

    /// Hash kinds objects of this provider can report
    fn hash_kinds(&self) -> &'static [HashKind];
}

/// Directory listing
#[async_trait]
pub trait Lister: StorageProvider {
    /// List files and directories directly inside `dir`
    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, ProviderError>;
}

/// Writing new objects
#[async_trait]
pub trait Uploader: StorageProvider {
    type Object: HashProvider;

    /// Upload `reader` to `src.remote`, returning the finalized object
    async fn put(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        src: &ObjectSource,
    ) -> Result<Self::Object, ProviderError>;
}

/// Content hashes of a single object
#[async_trait]
pub trait HashProvider: Send + Sync {
    async fn hash(&self, kind: HashKind) -> Result<String, ProviderError>;
}

/// Live change notifications
pub trait ChangeSource: StorageProvider {
    /// Start delivering changes to `on_change` until `cancel` fires or the
    /// sender side of `poll_interval` is dropped.
    fn change_notify(
        &self,
        cancel: CancellationToken,
        on_change: ChangeCallback,
        poll_interval: mpsc::Receiver<Duration>,
    ) -> ChangeSubscription;
}

/// Maximum length of an API error body surfaced to callers
const MAX_API_ERROR_LEN: usize = 300;

/// Make an API error body safe to show: HTML pages collapse to a marker,
/// whitespace is squashed and the text is truncated.
pub fn sanitize_api_error(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "(empty response)".to_string();
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("<!doctype") || lower.starts_with("<html") {
        return "(HTML error page)".to_string();
    }
    let squashed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    if squashed.chars().count() > MAX_API_ERROR_LEN {
        let cut: String = squashed.chars().take(MAX_API_ERROR_LEN).collect();
        format!("{}…", cut)
    } else {
        squashed
    }
}

/// Turn a non-2xx response into `ProviderError::Remote`
pub async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = http_retry::parse_retry_after(&resp);
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Remote {
        status: status.as_u16(),
        body: sanitize_api_error(&body),
        retry_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_api_error() {
        assert_eq!(sanitize_api_error(""), "(empty response)");
        assert_eq!(sanitize_api_error("<!DOCTYPE html><p>502</p>"), "(HTML error page)");
        assert_eq!(sanitize_api_error("  {\"error\":\n  \"nope\"} "), "{\"error\": \"nope\"}");
        let long = "x".repeat(1000);
        assert_eq!(sanitize_api_error(&long).chars().count(), MAX_API_ERROR_LEN + 1);
    }
}
