//! Multipart upload sources and progress reporting.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::multipart::Part;
use reqwest::Body;

use super::ApiError;

/// Size of the chunks an in-memory upload is split into.
/// Small enough for progress to move visibly on slow links.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Callback receiving upload progress as a whole percentage (0-100).
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Turns byte counts into percentage reports.
///
/// Reports `floor(loaded * 100 / total)` and only when the value grows, so the
/// sequence seen by the callback is strictly increasing and ends at 100 once
/// every byte has been produced. Nothing is reported when the total is unknown.
pub struct ProgressTracker {
    total: Option<u64>,
    loaded: u64,
    last_reported: Option<u8>,
    callback: ProgressFn,
}

impl ProgressTracker {
    pub fn new(total: Option<u64>, callback: ProgressFn) -> Self {
        Self {
            total: total.filter(|&t| t > 0),
            loaded: 0,
            last_reported: None,
            callback,
        }
    }

    pub fn advance(&mut self, bytes: usize) {
        self.loaded = self.loaded.saturating_add(bytes as u64);
        let Some(total) = self.total else {
            return;
        };

        let percent = (u128::from(self.loaded.min(total)) * 100 / u128::from(total)) as u8;
        if self.last_reported.map_or(true, |last| percent > last) {
            self.last_reported = Some(percent);
            (self.callback)(percent);
        }
    }

    pub fn loaded(&self) -> u64 {
        self.loaded
    }
}

/// Wrap a callback so it only hears percentages above the highest one already
/// reported through this wrapper.
///
/// Each attempt of a retried upload builds its own [`ProgressTracker`]; sharing
/// one wrapper across the attempts keeps the caller's sequence increasing.
pub fn high_water_mark(callback: ProgressFn) -> ProgressFn {
    // highest percentage + 1, zero until the first report
    let reported = AtomicU8::new(0);
    Arc::new(move |percent| {
        let next = percent.saturating_add(1);
        if reported.fetch_max(next, Ordering::SeqCst) < next {
            callback(percent);
        }
    })
}

enum UploadBody {
    Bytes(Bytes),
    Stream {
        stream: BoxStream<'static, std::io::Result<Bytes>>,
        len: Option<u64>,
    },
}

/// A file to send as the `file` field of a multipart upload.
pub struct UploadFile {
    file_name: String,
    content_type: Option<String>,
    body: UploadBody,
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.len())
            .finish()
    }
}

impl UploadFile {
    pub fn from_bytes(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            body: UploadBody::Bytes(data.into()),
        }
    }

    /// Wrap a byte stream. `len` is the declared size, if the source knows it.
    pub fn from_stream<S>(file_name: impl Into<String>, stream: S, len: Option<u64>) -> Self
    where
        S: futures::Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Self {
            file_name: file_name.into(),
            content_type: None,
            body: UploadBody::Stream {
                stream: stream.boxed(),
                len,
            },
        }
    }

    /// Read a file from disk into memory.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::from_bytes(file_name, data).with_content_type_from_name())
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    fn with_content_type_from_name(mut self) -> Self {
        let ext = self
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());
        self.content_type = match ext.as_deref() {
            Some("png") => Some("image/png".to_string()),
            Some("jpg") | Some("jpeg") => Some("image/jpeg".to_string()),
            Some("gif") => Some("image/gif".to_string()),
            Some("webp") => Some("image/webp".to_string()),
            Some("svg") => Some("image/svg+xml".to_string()),
            _ => None,
        };
        self
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Total size in bytes, when known.
    pub fn len(&self) -> Option<u64> {
        match &self.body {
            UploadBody::Bytes(bytes) => Some(bytes.len() as u64),
            UploadBody::Stream { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Copy of an in-memory file, for sending it again. Streams can be sent once.
    pub fn try_clone(&self) -> Option<Self> {
        match &self.body {
            UploadBody::Bytes(bytes) => Some(Self {
                file_name: self.file_name.clone(),
                content_type: self.content_type.clone(),
                body: UploadBody::Bytes(bytes.clone()),
            }),
            UploadBody::Stream { .. } => None,
        }
    }

    /// Build the multipart part, counting bytes as the transport pulls them.
    pub(crate) fn into_part(self, on_progress: Option<ProgressFn>) -> Result<Part, ApiError> {
        let len = self.len();
        let stream: BoxStream<'static, std::io::Result<Bytes>> = match self.body {
            UploadBody::Bytes(bytes) => {
                let chunks: Vec<std::io::Result<Bytes>> = (0..bytes.len())
                    .step_by(UPLOAD_CHUNK_SIZE)
                    .map(|start| {
                        let end = (start + UPLOAD_CHUNK_SIZE).min(bytes.len());
                        Ok(bytes.slice(start..end))
                    })
                    .collect();
                stream::iter(chunks).boxed()
            }
            UploadBody::Stream { stream, .. } => stream,
        };

        let stream = match on_progress {
            Some(callback) => {
                let mut tracker = ProgressTracker::new(len, callback);
                stream
                    .inspect_ok(move |chunk| tracker.advance(chunk.len()))
                    .boxed()
            }
            None => stream,
        };

        let body = Body::wrap_stream(stream);
        let part = match len {
            Some(len) => Part::stream_with_length(body, len),
            None => Part::stream(body),
        };
        let part = part.file_name(self.file_name);
        match self.content_type {
            Some(content_type) => Ok(part.mime_str(&content_type)?),
            None => Ok(part),
        }
    }
}
