//! Streaming downloads to a local directory.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use reqwest::header::HeaderMap;
use reqwest::{Method, Response};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{CallError, Cause, ErrorKind};
use crate::naming::filename_from_url;
use crate::rest::{CallOptions, RestClient};
use crate::session::SessionProvider;

/// Per-download settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Replace an existing file instead of skipping the download.
    pub overwrite: bool,
    /// Use this name instead of the one derived from the URL.
    pub file_name: Option<String>,
    /// Appended to a URL-derived name that has no extension.
    pub extension: Option<String>,
    /// Block size in bytes; the client's configured size when `None`.
    pub chunk_size: Option<usize>,
}

impl DownloadOptions {
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = Some(ext.into());
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Name of the file written for `url`.
    pub fn resolve_file_name(&self, url: &str) -> String {
        match self.file_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => filename_from_url(url, self.extension.as_deref()),
        }
    }
}

/// Result of [`RestClient::download`].
#[derive(Debug)]
pub enum DownloadOutcome {
    /// The file was already present and overwriting was not requested.
    /// No request was made.
    AlreadyExists(PathBuf),
    Completed {
        path: PathBuf,
        bytes_written: u64,
        response: Response,
    },
}

impl DownloadOutcome {
    pub fn path(&self) -> &Path {
        match self {
            DownloadOutcome::AlreadyExists(path) => path,
            DownloadOutcome::Completed { path, .. } => path,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, DownloadOutcome::AlreadyExists(_))
    }
}

impl<P: SessionProvider> RestClient<P> {
    /// Streams `url` into `output_dir`.
    ///
    /// `size` is the expected length (usually from [`RestClient::head`]) and
    /// only drives progress reporting. The output directory must exist. A
    /// partially written file is removed when the download fails.
    #[tracing::instrument(skip(self, headers, options))]
    pub async fn download(
        &self,
        url: &str,
        headers: &HeaderMap,
        output_dir: &Path,
        size: Option<u64>,
        options: &DownloadOptions,
    ) -> Result<DownloadOutcome, CallError> {
        let filename = options.resolve_file_name(url);
        if filename.is_empty() {
            return Err(
                CallError::new(ErrorKind::MalformedUrl, "Incorrectly formatted url supplied.")
                    .with_cause(Cause::Detail(format!("no file name in url: {}", url))),
            );
        }
        let target = output_dir.join(&filename);

        let exists = tokio::fs::try_exists(&target)
            .await
            .map_err(CallError::filesystem)?;
        if exists && !options.overwrite {
            warn!("File {:?} already exists. Not overwriting.", target);
            return Ok(DownloadOutcome::AlreadyExists(target));
        }

        let chunk_size = options.chunk_size.unwrap_or(self.config().chunk_size).max(1);
        debug!(
            "Get call url: {}, headers: {:?}, file: {:?}, size: {:?}, overwrite: {}",
            url, headers, target, size, options.overwrite
        );
        info!("Starting download to {:?}", target);

        let mut file = File::create(&target).await.map_err(CallError::filesystem)?;
        let result = self
            .stream_to(&mut file, url, headers, size, chunk_size)
            .await;
        drop(file);

        match result {
            Ok((response, bytes_written)) => Ok(DownloadOutcome::Completed {
                path: target,
                bytes_written,
                response,
            }),
            Err(e) => {
                debug!("Download failed, removing partial file: {:?}", target);
                if let Err(remove_err) = tokio::fs::remove_file(&target).await {
                    warn!("Failed to remove partial file {:?}: {}", target, remove_err);
                }
                Err(e)
            }
        }
    }

    async fn stream_to<W>(
        &self,
        writer: &mut W,
        url: &str,
        headers: &HeaderMap,
        size: Option<u64>,
        chunk_size: usize,
    ) -> Result<(Response, u64), CallError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut response = self
            .call(Method::GET, url, CallOptions::new(headers.clone()))
            .await?;
        let mut progress = Progress::new(size, chunk_size);
        let written = write_chunks(&mut response, writer, chunk_size, &mut progress).await?;
        Ok((response, written))
    }
}

/// A body read block by block. An empty block marks the end of the body.
#[async_trait]
trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Result<Bytes, CallError>;
}

#[async_trait]
impl ChunkSource for Response {
    async fn next_chunk(&mut self) -> Result<Bytes, CallError> {
        let chunk = self.chunk().await.map_err(CallError::transport)?;
        Ok(chunk.unwrap_or_default())
    }
}

/// Copies `source` to `writer` in blocks of `chunk_size` bytes until an
/// empty chunk arrives. Network chunks are gathered until a full block is
/// available; only the last block may be shorter. Returns the number of
/// bytes written.
async fn write_chunks<S, W>(
    source: &mut S,
    writer: &mut W,
    chunk_size: usize,
    progress: &mut Progress,
) -> Result<u64, CallError>
where
    S: ChunkSource,
    W: AsyncWrite + Unpin + Send,
{
    let mut written = 0u64;
    let mut pending = BytesMut::with_capacity(chunk_size);

    loop {
        let chunk = source.next_chunk().await?;
        if chunk.is_empty() {
            break;
        }

        pending.extend_from_slice(&chunk);
        while pending.len() >= chunk_size {
            let block = pending.split_to(chunk_size);
            writer
                .write_all(&block)
                .await
                .map_err(CallError::filesystem)?;
            written += block.len() as u64;
            progress.advance();
        }
    }

    if !pending.is_empty() {
        writer
            .write_all(&pending)
            .await
            .map_err(CallError::filesystem)?;
        written += pending.len() as u64;
        progress.advance();
    }
    info!("Download complete");

    writer.flush().await.map_err(CallError::filesystem)?;
    Ok(written)
}

/// Percentage progress of a download of known size.
#[derive(Debug, Clone, PartialEq)]
struct Progress {
    percent: f64,
    increment: Option<f64>,
}

impl Progress {
    fn new(size: Option<u64>, chunk_size: usize) -> Self {
        let increment = size
            .filter(|s| *s > 0)
            .map(|s| chunk_size as f64 / s as f64 * 100.0);
        if increment.is_some() {
            info!("Downloading...0%");
        }
        Self {
            percent: 0.0,
            increment,
        }
    }

    /// Records one block and returns the reported percentage, capped at 100.
    fn advance(&mut self) -> Option<u8> {
        let increment = self.increment?;
        self.percent += increment;
        let shown = self.percent.min(100.0) as u8;
        info!("Downloading...{}%", shown);
        Some(shown)
    }
}
