//! Chunked upload: sequential parts to /uploads/{uploadId}, then one finalize
//! call whose response becomes the object's metadata.

use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use rand::RngCore;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use super::api::{CreateFileRequest, FileItem, ItemKind};
use super::{drive_log, DriveObject, DriveProvider, REQUEST_TIMEOUT};
use crate::providers::dir_cache::{normalize_path, split_path};
use crate::providers::{check_response, ObjectSource, ProviderError, Uploader};

/// Largest buffer reserved up front for one chunk; bigger chunks grow as read.
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

/// State of one upload between the first chunk and finalize
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub file_name: String,
    /// Destination folder ID
    pub dir_id: String,
    pub upload_id: String,
    pub channel_id: Option<i64>,
    pub chunk_size: u64,
    /// Known only when the source declared its size
    pub total_chunks: Option<u64>,
    pub encrypt: bool,
    /// Chunks acknowledged by the server so far
    pub chunks_sent: u32,
    /// Bytes acknowledged by the server so far
    pub bytes_sent: u64,
}

/// Stable upload id for (folder, name, size, mtime, user)
fn upload_id(dir_id: &str, file_name: &str, size: Option<u64>, src: &ObjectSource, user_id: Option<i64>) -> String {
    let size = size.map_or_else(|| "-1".to_string(), |s| s.to_string());
    let key = format!(
        "{}:{}:{}:{}:{}",
        dir_id, file_name, size, src.mod_time.timestamp(), user_id.unwrap_or(0)
    );
    hex::encode(Md5::digest(key.as_bytes()))
}

fn part_name(file_name: &str, part_no: u32, random: bool) -> String {
    if random {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        hex::encode(raw)
    } else {
        format!("{}.part.{:03}", file_name, part_no)
    }
}

/// Read up to `limit` bytes; shorter only at EOF.
async fn read_chunk(reader: &mut (dyn AsyncRead + Send + Unpin), limit: u64) -> Result<Vec<u8>, ProviderError> {
    let mut buf = Vec::with_capacity(limit.min(MAX_PREALLOC) as usize);
    reader.take(limit).read_to_end(&mut buf).await?;
    Ok(buf)
}

impl DriveProvider {
    fn open_session(&self, src: &ObjectSource, file_name: &str, dir_id: &str) -> UploadSession {
        let chunk_size = self.config.chunk_size.max(1);
        UploadSession {
            file_name: file_name.to_string(),
            dir_id: dir_id.to_string(),
            upload_id: upload_id(dir_id, file_name, src.size, src, self.config.user_id),
            channel_id: self.config.channel_id,
            chunk_size,
            total_chunks: src.size.map(|s| s.div_ceil(chunk_size)),
            encrypt: self.config.encrypt_files,
            chunks_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Send every chunk of `reader` for `src`, returning the session to finalize.
    ///
    /// Chunks go out one at a time in order. A transient failure gets one
    /// retry after a pacer backoff step; a second failure aborts the upload.
    pub async fn upload_multipart(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        src: &ObjectSource,
    ) -> Result<UploadSession, ProviderError> {
        let remote = normalize_path(&src.remote);
        let (dir, leaf) = split_path(&remote);
        if leaf.is_empty() {
            return Err(ProviderError::InvalidPath(src.remote.clone()));
        }
        let dir_id = self.find_dir(dir).await?;
        let mut session = self.open_session(src, leaf, &dir_id);

        debug!(
            "[DRIVE] upload {} to folder {}: id={}, chunk={} bytes, planned={:?}",
            remote, dir_id, session.upload_id, session.chunk_size, session.total_chunks
        );

        if src.size == Some(0) {
            return Ok(session);
        }

        loop {
            let want = match src.size {
                Some(size) => (size - session.bytes_sent).min(session.chunk_size),
                None => session.chunk_size,
            };
            if want == 0 {
                break;
            }

            let chunk = read_chunk(reader, want).await?;
            if chunk.is_empty() {
                if src.size.is_some() {
                    return Err(ProviderError::IoError(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("source ended after {} of {:?} bytes", session.bytes_sent, src.size),
                    )));
                }
                break;
            }

            let len = chunk.len() as u64;
            let part_no = session.chunks_sent + 1;
            self.upload_chunk(&session, part_no, Bytes::from(chunk)).await?;
            session.chunks_sent = part_no;
            session.bytes_sent += len;

            if src.size.is_none() && len < want {
                break;
            }
        }

        Ok(session)
    }

    async fn upload_chunk(&self, session: &UploadSession, part_no: u32, chunk: Bytes) -> Result<(), ProviderError> {
        let name = part_name(&session.file_name, part_no, self.config.random_chunk_names);
        let mut url = self.api_url(&["uploads", &session.upload_id]);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("partName", &name)
                .append_pair("fileName", &session.file_name)
                .append_pair("partNo", &part_no.to_string())
                .append_pair("encrypted", if session.encrypt { "true" } else { "false" });
            if let Some(channel) = session.channel_id {
                query.append_pair("channelId", &channel.to_string());
            }
        }

        debug!("[DRIVE] upload part {} ({} bytes) of {}", part_no, chunk.len(), session.file_name);
        let result = self.pacer.call(self.pacer.config().max_retries, || {
            let req = self.request(Method::POST, url.clone())
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(chunk.clone());
            async move {
                check_response(req.send().await?).await?;
                Ok(())
            }
        }).await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_recoverable() => Err(ProviderError::UploadAborted {
                part: part_no,
                source: Box::new(e),
            }),
            Err(e) => Err(e),
        }
    }

    /// Finalize an upload. The response is the canonical metadata of the new
    /// file; nothing re-reads it afterwards.
    pub async fn create_file(&self, src: &ObjectSource, session: &UploadSession) -> Result<FileItem, ProviderError> {
        let mime = mime_guess::from_path(&session.file_name)
            .first_or_octet_stream()
            .to_string();
        let body = CreateFileRequest {
            name: &session.file_name,
            kind: ItemKind::File,
            parent_id: &session.dir_id,
            mime_type: &mime,
            size: src.size.unwrap_or(session.bytes_sent),
            channel_id: session.channel_id,
            encrypted: session.encrypt,
            upload_id: &session.upload_id,
            updated_at: src.mod_time,
        };
        let body = serde_json::to_vec(&body)
            .map_err(|e| ProviderError::ParseError(format!("Encode create request: {}", e)))?;

        let url = self.api_url(&["files"]);
        let item: FileItem = self.pacer.call(0, || {
            let req = self.request(Method::POST, url.clone())
                .timeout(REQUEST_TIMEOUT)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
            async move {
                let resp = check_response(req.send().await?).await?;
                let bytes = resp.bytes().await?;
                serde_json::from_slice(&bytes)
                    .map_err(|e| ProviderError::ParseError(format!("Invalid create response: {}", e)))
            }
        }).await?;

        if item.id.is_empty() {
            return Err(ProviderError::ParseError("Create response has no file id".to_string()));
        }
        Ok(item)
    }
}

#[async_trait]
impl Uploader for DriveProvider {
    type Object = DriveObject;

    async fn put(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        src: &ObjectSource,
    ) -> Result<DriveObject, ProviderError> {
        let remote = normalize_path(&src.remote);
        let session = self.upload_multipart(reader, src).await?;
        let item = self.create_file(src, &session).await?;
        drive_log(&format!(
            "Uploaded {} ({} bytes, {} parts) as {}",
            remote, session.bytes_sent, session.chunks_sent, item.id
        ));
        Ok(DriveObject::from_item(self.clone(), &remote, item))
    }
}
