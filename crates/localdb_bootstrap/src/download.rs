//! Progress-tracked download of the engine image.

use crate::error::{BootstrapError, BootstrapResult};
use crate::progress::{Phase, PhaseProgress, ProgressEvent};
use crate::source::ImageSource;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// A fully received image.
#[derive(Debug, Clone)]
pub struct DownloadedImage {
    /// The image bytes.
    pub bytes: Bytes,
    /// Lowercase hex SHA-256 of `bytes`.
    pub sha256: String,
}

/// Downloads `url` from `source`, reporting [`Phase::Wasm`] progress through
/// `emit`.
///
/// The whole body is buffered before returning. The final event, with
/// progress 100 and the elapsed time, is emitted only on success.
///
/// # Errors
///
/// Returns [`BootstrapError::Download`] if the source cannot be opened, the
/// stream fails, the body is empty, the byte count differs from the declared
/// length, or the digest differs from `expected_sha256`.
pub async fn fetch_image(
    source: &dyn ImageSource,
    url: &str,
    expected_sha256: Option<&str>,
    mut emit: impl FnMut(ProgressEvent),
) -> BootstrapResult<DownloadedImage> {
    let response = source
        .open(url)
        .await
        .map_err(|e| BootstrapError::download(url, e))?;

    let expected_len = response.content_length;
    debug!(url, ?expected_len, "image response opened");

    let mut tracker = PhaseProgress::start(Phase::Wasm, expected_len);
    let mut buffer = match expected_len {
        Some(len) => BytesMut::with_capacity(len.min(512 * 1024 * 1024) as usize),
        None => BytesMut::new(),
    };
    let mut hasher = Sha256::new();

    let mut body = response.body;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| BootstrapError::download(url, e))?;
        hasher.update(&chunk);
        buffer.extend_from_slice(&chunk);
        if let Some(event) = tracker.advance(chunk.len() as u64) {
            emit(event);
        }
    }

    let received = tracker.done();
    if received == 0 {
        return Err(BootstrapError::download(url, "empty response body"));
    }
    if let Some(expected) = expected_len {
        if received != expected {
            return Err(BootstrapError::download(
                url,
                format!("stream ended after {received} of {expected} bytes"),
            ));
        }
    }

    let sha256 = to_hex(&hasher.finalize());
    if let Some(expected) = expected_sha256 {
        if !expected.eq_ignore_ascii_case(&sha256) {
            return Err(BootstrapError::download(
                url,
                format!("digest mismatch: expected {expected}, got {sha256}"),
            ));
        }
    }

    let done = tracker.finish();
    info!(
        url,
        bytes = received,
        elapsed_ms = done.elapsed.map(|d| d.as_millis() as u64),
        "image downloaded"
    );
    emit(done);

    Ok(DownloadedImage {
        bytes: buffer.freeze(),
        sha256,
    })
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
