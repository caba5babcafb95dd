use std::path::Path;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::WriteError;
use crate::transport::StreamHandle;

/// Drains `handle` into `destination`, calling `on_progress` after every write.
///
/// Network chunks larger than `chunk_size` are written and reported in
/// `chunk_size` pieces. The file is truncated first and left as-is on failure.
pub async fn write_stream<F>(
    handle: StreamHandle,
    destination: &Path,
    chunk_size: usize,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<u64, WriteError>
where
    F: FnMut(u64),
{
    let chunk_size = chunk_size.max(1);
    let mut file = File::create(destination)
        .await
        .map_err(|source| WriteError::Create {
            path: destination.to_path_buf(),
            source,
        })?;

    let mut body = handle.body;
    let mut written: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(WriteError::Cancelled { path: destination.to_path_buf() });
            }
            next = body.next() => next,
        };

        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|source| WriteError::Read {
            path: destination.to_path_buf(),
            source,
        })?;

        for piece in chunk.chunks(chunk_size) {
            file.write_all(piece)
                .await
                .map_err(|source| WriteError::Write {
                    path: destination.to_path_buf(),
                    source,
                })?;
            written += piece.len() as u64;
            on_progress(piece.len() as u64);
        }
    }

    file.flush().await.map_err(|source| WriteError::Write {
        path: destination.to_path_buf(),
        source,
    })?;

    Ok(written)
}
