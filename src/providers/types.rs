//! Shared types for storage providers
//!
//! This module contains the types shared by the drive provider and its
//! capability traits: configuration structs, entry representations, hash
//! kinds and the error type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Kind of content hash a caller may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    Md5,
    Sha1,
    Sha256,
    /// Server-computed hash reported by the drive API (`hash` field)
    Drive,
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKind::Md5 => write!(f, "MD5"),
            HashKind::Sha1 => write!(f, "SHA-1"),
            HashKind::Sha256 => write!(f, "SHA-256"),
            HashKind::Drive => write!(f, "drive"),
        }
    }
}

/// Whether a change notification refers to a file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Object,
    Directory,
}

/// Generic provider configuration
///
/// Provider-specific fields are stored in the `extra` HashMap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name for this connection
    pub name: String,
    /// API root URL (scheme + host, optionally a port)
    pub host: String,
    /// Bearer token
    pub password: Option<String>,
    /// Extra provider-specific options
    #[serde(default)]
    pub extra: std::collections::HashMap<String, String>,
}

/// Default number of items requested per list page
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Default upload chunk size (500 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 500 * 1024 * 1024;

/// Default cadence for the degraded (no-stream) change polling mode
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Drive API configuration
#[derive(Debug, Clone)]
pub struct DriveConfig {
    /// API root, e.g. `https://drive.example.com`; endpoints live under `/api`
    pub api_root: String,
    /// Bearer token (SecretString for memory zeroization)
    pub api_token: Option<secrecy::SecretString>,
    /// Folder ID that maps to the empty path
    pub root_folder_id: String,
    /// Items requested per list page
    pub page_size: u32,
    /// Upload chunk size in bytes
    pub chunk_size: u64,
    /// Storage channel chunks are written to
    pub channel_id: Option<i64>,
    /// Ask the server to encrypt uploaded parts
    pub encrypt_files: bool,
    /// Use random part names instead of `<name>.part.NNN`
    pub random_chunk_names: bool,
    /// Account id, mixed into upload ids
    pub user_id: Option<i64>,
    /// Initial degraded-mode reconnect cadence for change notifications
    pub poll_interval: Duration,
}

impl DriveConfig {
    /// Minimal config for an API root and root folder, everything else default
    pub fn new(api_root: &str, root_folder_id: &str) -> Self {
        Self {
            api_root: api_root.trim_end_matches('/').to_string(),
            api_token: None,
            root_folder_id: root_folder_id.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            channel_id: None,
            encrypt_files: false,
            random_chunk_names: false,
            user_id: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn from_provider_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let host = config.host.trim();
        if host.is_empty() {
            return Err(ProviderError::InvalidConfig("API host is required".to_string()));
        }
        let api_root = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };

        let root_folder_id = config.extra.get("root_folder_id")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProviderError::InvalidConfig("root_folder_id is required".to_string()))?;

        let mut drive = Self::new(&api_root, &root_folder_id);
        drive.api_token = config.password.clone()
            .filter(|t| !t.is_empty())
            .map(secrecy::SecretString::from);

        if let Some(v) = config.extra.get("page_size") {
            let size: u32 = v.trim().parse()
                .map_err(|_| ProviderError::InvalidConfig(format!("Invalid page_size: {}", v)))?;
            if size == 0 {
                return Err(ProviderError::InvalidConfig("page_size must be at least 1".to_string()));
            }
            drive.page_size = size;
        }

        if let Some(v) = config.extra.get("chunk_size") {
            let size = parse_size_suffix(v)
                .ok_or_else(|| ProviderError::InvalidConfig(format!("Invalid chunk_size: {}", v)))?;
            if size == 0 {
                return Err(ProviderError::InvalidConfig("chunk_size must be non-zero".to_string()));
            }
            drive.chunk_size = size;
        }

        if let Some(v) = config.extra.get("channel_id") {
            drive.channel_id = Some(v.trim().parse()
                .map_err(|_| ProviderError::InvalidConfig(format!("Invalid channel_id: {}", v)))?);
        }

        if let Some(v) = config.extra.get("user_id") {
            drive.user_id = Some(v.trim().parse()
                .map_err(|_| ProviderError::InvalidConfig(format!("Invalid user_id: {}", v)))?);
        }

        drive.encrypt_files = config.extra.get("encrypt_files")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        drive.random_chunk_names = config.extra.get("random_chunk_names")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        if let Some(v) = config.extra.get("poll_interval") {
            let secs: u64 = v.trim().parse()
                .map_err(|_| ProviderError::InvalidConfig(format!("Invalid poll_interval: {}", v)))?;
            drive.poll_interval = Duration::from_secs(secs);
        }

        Ok(drive)
    }
}

/// Parse sizes like `64M`, `1G`, `512k` or a plain byte count
pub fn parse_size_suffix(value: &str) -> Option<u64> {
    let v = value.trim();
    let (digits, multiplier) = match v.chars().last()? {
        'k' | 'K' => (&v[..v.len() - 1], 1u64 << 10),
        'm' | 'M' => (&v[..v.len() - 1], 1 << 20),
        'g' | 'G' => (&v[..v.len() - 1], 1 << 30),
        'b' | 'B' => (&v[..v.len() - 1], 1),
        _ => (v, 1),
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}

/// Remote file/directory entry as returned by a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Remote object ID
    pub id: String,
    /// File or directory name
    pub name: String,
    /// Path relative to the filesystem root
    pub path: String,
    /// Whether this is a directory
    pub is_dir: bool,
    /// File size in bytes (0 for directories)
    pub size: u64,
    /// Last modification time
    pub modified: Option<DateTime<Utc>>,
    /// MIME type (if known)
    pub mime_type: Option<String>,
    /// Parent folder ID
    pub parent_id: Option<String>,
    /// Server-computed content hash, `None` when the server has none recorded
    pub hash: Option<String>,
}

impl RemoteEntry {
    pub fn kind(&self) -> EntryKind {
        if self.is_dir {
            EntryKind::Directory
        } else {
            EntryKind::Object
        }
    }
}

/// Static description of an object about to be uploaded
#[derive(Debug, Clone)]
pub struct ObjectSource {
    /// Destination path relative to the filesystem root
    pub remote: String,
    pub mod_time: DateTime<Utc>,
    /// Declared size; `None` reads the source until EOF
    pub size: Option<u64>,
}

impl ObjectSource {
    pub fn new(remote: &str, mod_time: DateTime<Utc>, size: Option<u64>) -> Self {
        Self {
            remote: remote.to_string(),
            mod_time,
            size,
        }
    }
}

/// Provider error type
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported hash kind: {0}")]
    HashUnsupported(HashKind),

    #[error("hash metadata unavailable for {0}")]
    HashUnavailable(String),

    #[error("Remote error: HTTP {status}: {body}")]
    Remote {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    #[error("Upload aborted at part {part}: {source}")]
    UploadAborted {
        part: u32,
        #[source]
        source: Box<ProviderError>,
    },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProviderError {
    /// Check if this error is transient (worth one more attempt)
    pub fn is_recoverable(&self) -> bool {
        match self {
            ProviderError::NetworkError(_) => true,
            ProviderError::Remote { status, .. } => {
                *status >= 500 || super::http_retry::is_retryable_status(*status)
            }
            _ => false,
        }
    }

    /// Server-requested delay before the next attempt, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::Remote { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status of a remote error
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::ParseError(e.to_string())
        } else {
            ProviderError::NetworkError(e.to_string())
        }
    }
}
