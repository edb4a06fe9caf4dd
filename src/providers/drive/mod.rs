//! Drive Storage Provider
//!
//! Exposes a channel-backed drive service (JSON over HTTP) as a filesystem.
//! Uses an API token (Bearer) for authentication.
//!
//! API Base: {api_root}/api
//! Listing: cursor-based, sorted by id; the `meta` counters are not trusted
//! Upload: sequential chunks to /uploads/{uploadId}, then one finalize POST
//! Changes: Server-Sent Events on /events/stream

pub mod api;
mod list;
mod notify;
mod object;
mod upload;

#[cfg(test)]
pub(crate) mod test_support;

pub use notify::{ChangeSubscription, NotifierState, PollSignal};
pub use object::DriveObject;
pub use upload::UploadSession;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Method;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{
    check_response, DirCache, DriveConfig, HashKind, Pacer, ProviderError, StorageProvider,
};
use api::FileItem;

/// Timeout applied to JSON calls; chunk uploads and the event stream run unbounded.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The only hash kind the API computes
const HASH_KINDS: &[HashKind] = &[HashKind::Drive];

fn drive_log(msg: &str) {
    info!("[DRIVE] {}", msg);
}

#[derive(Clone)]
pub struct DriveProvider {
    config: Arc<DriveConfig>,
    client: reqwest::Client,
    /// `{api_root}/api`
    api_base: Url,
    auth: Option<HeaderValue>,
    pacer: Arc<Pacer>,
    dir_cache: Arc<DirCache>,
}

impl std::fmt::Debug for DriveProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveProvider")
            .field("api_base", &self.api_base.as_str())
            .field("root_folder_id", &self.config.root_folder_id)
            .finish()
    }
}

impl DriveProvider {
    /// Provider with its own pacer and directory cache
    pub fn new(config: DriveConfig) -> Result<Self, ProviderError> {
        let dir_cache = Arc::new(DirCache::new(&config.root_folder_id));
        Self::with_shared(config, Arc::new(Pacer::default()), dir_cache)
    }

    /// Provider using an injected pacer and directory cache
    pub fn with_shared(
        config: DriveConfig,
        pacer: Arc<Pacer>,
        dir_cache: Arc<DirCache>,
    ) -> Result<Self, ProviderError> {
        let mut api_base = Url::parse(&config.api_root).map_err(|e| {
            ProviderError::InvalidConfig(format!("Invalid API root '{}': {}", config.api_root, e))
        })?;
        api_base.path_segments_mut()
            .map_err(|_| ProviderError::InvalidConfig(format!("API root '{}' cannot be a base URL", config.api_root)))?
            .pop_if_empty()
            .push("api");

        // An unusable token must fail here, not as silent 401s later
        let auth = match config.api_token {
            Some(ref token) => Some(
                HeaderValue::from_str(&format!("Bearer {}", token.expose_secret())).map_err(|e| {
                    ProviderError::InvalidConfig(format!("Invalid characters in API token: {}", e))
                })?,
            ),
            None => None,
        };

        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .default_headers(default_headers)
            .build()
            .map_err(|e| ProviderError::NetworkError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config: Arc::new(config),
            client,
            api_base,
            auth,
            pacer,
            dir_cache,
        })
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    pub fn pacer(&self) -> &Arc<Pacer> {
        &self.pacer
    }

    pub fn dir_cache(&self) -> &Arc<DirCache> {
        &self.dir_cache
    }

    /// `{api_root}/api/{segments...}` with every segment percent-encoded
    fn api_url(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match self.auth {
            Some(ref auth) => req.header(AUTHORIZATION, auth.clone()),
            None => req,
        }
    }

    /// Paced GET returning decoded JSON. Single attempt: only chunk uploads retry.
    async fn get_json<T: DeserializeOwned + Send>(&self, url: Url) -> Result<T, ProviderError> {
        debug!("[DRIVE] GET {}", url);
        self.pacer.call(0, || {
            let req = self.request(Method::GET, url.clone()).timeout(REQUEST_TIMEOUT);
            async move {
                let resp = check_response(req.send().await?).await?;
                let body = resp.bytes().await?;
                serde_json::from_slice(&body)
                    .map_err(|e| ProviderError::ParseError(format!("Invalid JSON response: {}", e)))
            }
        }).await
    }

    /// Current metadata of one item
    pub async fn get_item(&self, id: &str) -> Result<FileItem, ProviderError> {
        self.get_json(self.api_url(&["files", id])).await
    }
}

impl StorageProvider for DriveProvider {
    fn display_name(&self) -> String {
        format!("Drive ({})", self.config.api_root)
    }

    fn hash_kinds(&self) -> &'static [HashKind] {
        HASH_KINDS
    }
}
