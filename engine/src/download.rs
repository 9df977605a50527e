use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
    pin::Pin,
    time::Duration,
};

use async_stream::try_stream;
use bytes::Bytes;
use color_eyre::{Result, eyre::Context};
use log::{debug, warn};
use reqwest::Client;
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_stream::{Stream, StreamExt};

use crate::with_deadline;

pub type ByteStream<'a> = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'a>>;

pub trait Downloader {
    /// Streams the body found at `url`
    fn fetch<'a>(&'a self, url: &'a str) -> ByteStream<'a>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Downloader for HttpDownloader {
    fn fetch<'a>(&'a self, url: &'a str) -> ByteStream<'a> {
        Box::pin(try_stream! {
            let res = self
                .client
                .get(url)
                .send()
                .await
                .with_context(|| format!("requesting {url}"))?
                .error_for_status()
                .with_context(|| format!("downloading {url}"))?;

            let mut stream = res.bytes_stream();
            while let Some(chunk) = stream.next().await {
                yield chunk.context("reading download")?;
            }
        })
    }
}

/// Writes the stream to `dest` through a `.part` sibling that is renamed once
/// the stream is complete. The partial file is removed on failure or timeout.
pub async fn save_to_file(
    mut stream: ByteStream<'_>,
    dest: &Path,
    deadline: Option<Duration>,
) -> Result<u64> {
    let partial = partial_path(dest);
    let written = with_deadline(deadline, "download", write_stream(&mut stream, &partial)).await;

    match written {
        Ok(len) => {
            tokio::fs::rename(&partial, dest)
                .await
                .with_context(|| format!("moving download into place at {}", dest.display()))?;
            debug!("Saved {len} bytes to {}", dest.display());
            Ok(len)
        }
        Err(e) => {
            if let Err(rm_err) = tokio::fs::remove_file(&partial).await {
                if rm_err.kind() != ErrorKind::NotFound {
                    warn!("Couldn't remove {}: {rm_err}", partial.display());
                }
            }
            Err(e)
        }
    }
}

async fn write_stream(stream: &mut ByteStream<'_>, path: &Path) -> Result<u64> {
    let mut file = File::create(path)
        .await
        .with_context(|| format!("creating {}", path.display()))?;
    let mut len = 0u64;
    while let Some(chunk) = stream.try_next().await? {
        file.write_all(&chunk).await?;
        len += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(len)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}
