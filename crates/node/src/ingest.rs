//! Streaming ingestion of uploaded bytes into files, with checksums.

use crate::error::{NodeError, NodeResult};
use async_compression::tokio::bufread::{BzDecoder, GzipDecoder};
use futures::TryStreamExt;
use shoal_core::Checksum;
use shoal_core::node::Compression;
use shoal_storage::FileDigest;
use std::io;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio_util::io::StreamReader;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Write `reader` to `dest`, decompressing if asked, and return the digest of
/// the bytes written. A partial `dest` is removed on failure.
pub(crate) async fn write_stream<R>(
    reader: R,
    compression: Option<Compression>,
    dest: &Path,
) -> NodeResult<FileDigest>
where
    R: AsyncRead + Unpin + Send,
{
    let reader = BufReader::new(reader);
    let result = match compression {
        None => copy_hashed(reader, dest).await,
        Some(Compression::Gzip) => {
            let mut decoder = GzipDecoder::new(reader);
            decoder.multiple_members(true);
            copy_hashed(decoder, dest).await
        }
        Some(Compression::Bzip2) => copy_hashed(BzDecoder::new(reader), dest).await,
    };
    if result.is_err() {
        let _ = fs::remove_file(dest).await;
    }
    result
}

async fn copy_hashed<R: AsyncRead + Unpin>(mut reader: R, dest: &Path) -> NodeResult<FileDigest> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::File::create(dest).await?;
    let mut hasher = Checksum::hasher();
    let mut size = 0u64;
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await.map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData => {
                NodeError::invalid(format!("cannot decode uploaded data: {e}"))
            }
            _ => NodeError::Io(e),
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n]).await?;
        size += n as u64;
    }
    file.sync_all().await?;
    Ok(FileDigest {
        size,
        checksum: hasher.finalize(),
    })
}

/// Decompress (or copy) a local file into `dest`.
pub(crate) async fn decode_file(
    src: &Path,
    compression: Option<Compression>,
    dest: &Path,
) -> NodeResult<FileDigest> {
    let file = fs::File::open(src).await?;
    write_stream(file, compression, dest).await
}

/// Fetch an http(s) URL into `dest`. Returns the last path segment of the
/// URL as the file name.
pub(crate) async fn fetch_url(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> NodeResult<(String, FileDigest)> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| NodeError::invalid(format!("invalid upload_url {url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(NodeError::invalid(format!(
            "unsupported upload_url scheme: {}",
            parsed.scheme()
        )));
    }
    let name = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .unwrap_or("download")
        .to_string();

    let response = client.get(parsed).send().await?.error_for_status()?;
    let body = StreamReader::new(Box::pin(response.bytes_stream().map_err(io::Error::other)));
    let digest = write_stream(body, None, dest).await?;
    Ok((name, digest))
}
