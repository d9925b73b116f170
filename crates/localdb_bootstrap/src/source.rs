//! Sources the engine image can be fetched from.
//!
//! The transport is abstracted via [`ImageSource`] so the manager can be
//! driven by HTTP, by local files, or by an in-memory mock in tests.

use crate::config::BootstrapConfig;
use crate::error::{BootstrapError, BootstrapResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Stream of body chunks. Errors are reported as messages.
pub type ChunkStream = BoxStream<'static, Result<Bytes, String>>;

const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// An opened image response.
pub struct ImageResponse {
    /// Declared body length, if the source reported one.
    pub content_length: Option<u64>,
    /// The body.
    pub body: ChunkStream,
}

impl std::fmt::Debug for ImageResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Something that can stream the engine image.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Starts fetching `url`.
    async fn open(&self, url: &str) -> Result<ImageResponse, String>;
}

/// Picks the source matching the scheme of `config.wasm_url`.
///
/// `http://` and `https://` give an [`HttpSource`]; `file://` URLs and plain
/// paths give a [`FileSource`].
///
/// # Errors
///
/// Returns [`BootstrapError::Config`] for other schemes or if the HTTP client
/// cannot be built.
pub fn source_for_config(config: &BootstrapConfig) -> BootstrapResult<Arc<dyn ImageSource>> {
    let url = config.wasm_url.as_str();
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(Arc::new(HttpSource::new(config)?))
    } else if url.starts_with("file://") || !url.contains("://") {
        Ok(Arc::new(FileSource))
    } else {
        Err(BootstrapError::Config(format!(
            "unsupported image URL scheme: {url}"
        )))
    }
}

/// Streams the image over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    /// Builds a client using the timeout and user agent from `config`.
    pub fn new(config: &BootstrapConfig) -> BootstrapResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| BootstrapError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageSource for HttpSource {
    async fn open(&self, url: &str) -> Result<ImageResponse, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        let content_length = response.content_length().filter(|&len| len > 0);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| format!("read failed: {e}")))
            .boxed();

        Ok(ImageResponse {
            content_length,
            body,
        })
    }
}

/// Streams the image from the local filesystem.
///
/// Accepts `file://` URLs and plain paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSource;

impl FileSource {
    fn path_for(url: &str) -> PathBuf {
        PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
    }
}

#[async_trait]
impl ImageSource for FileSource {
    async fn open(&self, url: &str) -> Result<ImageResponse, String> {
        let path = Self::path_for(url);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| format!("cannot open {}: {e}", path.display()))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| format!("cannot stat {}: {e}", path.display()))?
            .len();

        let body = stream::unfold(Some(file), |state| async move {
            let mut file = state?;
            let mut buf = vec![0u8; FILE_CHUNK_SIZE];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(Bytes::from(buf)), Some(file)))
                }
                Err(e) => Some((Err(format!("read failed: {e}")), None)),
            }
        })
        .boxed();

        Ok(ImageResponse {
            content_length: Some(len).filter(|&l| l > 0),
            body,
        })
    }
}

#[derive(Debug, Default)]
struct MockState {
    chunks: Vec<Bytes>,
    content_length: Option<u64>,
    open_error: Option<String>,
    stream_error: Option<String>,
    chunk_delay: Option<Duration>,
}

/// An in-memory image source for testing.
///
/// By default the declared length equals the sum of the chunks.
#[derive(Debug, Default)]
pub struct MockSource {
    state: Mutex<MockState>,
    opens: AtomicUsize,
}

impl MockSource {
    /// Creates a source serving `image` in chunks of `chunk_size` bytes.
    pub fn new(image: &[u8], chunk_size: usize) -> Self {
        let source = Self::default();
        source.set_image(image, chunk_size);
        source
    }

    /// Replaces the served image and resets the declared length to match.
    pub fn set_image(&self, image: &[u8], chunk_size: usize) {
        let chunks: Vec<Bytes> = image
            .chunks(chunk_size.max(1))
            .map(Bytes::copy_from_slice)
            .collect();
        let mut state = self.state.lock();
        state.content_length = Some(image.len() as u64).filter(|&l| l > 0);
        state.chunks = chunks;
    }

    /// Overrides the declared length. `None` simulates a missing header.
    pub fn set_content_length(&self, len: Option<u64>) {
        self.state.lock().content_length = len;
    }

    /// Makes `open` fail with `message`.
    pub fn fail_open(&self, message: impl Into<String>) {
        self.state.lock().open_error = Some(message.into());
    }

    /// Makes the body fail with `message` after the last chunk.
    pub fn fail_stream(&self, message: impl Into<String>) {
        self.state.lock().stream_error = Some(message.into());
    }

    /// Removes any configured failure.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.open_error = None;
        state.stream_error = None;
    }

    /// Sleeps before yielding each chunk.
    pub fn set_chunk_delay(&self, delay: Duration) {
        self.state.lock().chunk_delay = Some(delay);
    }

    /// Returns how many times the source was opened.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSource for MockSource {
    async fn open(&self, _url: &str) -> Result<ImageResponse, String> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let (items, content_length, delay) = {
            let state = self.state.lock();
            if let Some(err) = &state.open_error {
                return Err(err.clone());
            }
            let mut items: Vec<Result<Bytes, String>> =
                state.chunks.iter().cloned().map(Ok).collect();
            if let Some(err) = &state.stream_error {
                items.push(Err(err.clone()));
            }
            (items, state.content_length, state.chunk_delay)
        };

        let body = stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed();

        Ok(ImageResponse {
            content_length,
            body,
        })
    }
}
