//! Hybrid stream consumer for the client.
//!
//! Decodes a streaming response body into [`StreamChunk`]s on a background
//! task so the caller can drop the stream at any point to abort the request.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use reqwest::Response;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use proveit_protocol::{StreamChunk, StreamReader};

use super::error::{ClientError, Result};

/// Channel buffer size for decoded chunks.
const CHUNK_CHANNEL_BUFFER: usize = 32;

/// Decoded response body.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Create a [`ChunkStream`] from a successful streaming response.
pub fn into_chunk_stream(response: Response) -> ChunkStream {
    let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_BUFFER);

    tokio::spawn(async move {
        if let Err(e) = forward_chunks(response, tx.clone()).await {
            let _ = tx.send(Err(e)).await;
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

async fn forward_chunks(
    response: Response,
    tx: mpsc::Sender<Result<StreamChunk>>,
) -> Result<()> {
    let mut reader = StreamReader::new(Box::pin(response.bytes_stream()));
    let mut seen_terminal = false;

    loop {
        // Returns as soon as the receiver is dropped, even while the body is idle.
        let result = tokio::select! {
            _ = tx.closed() => {
                debug!("Chunk receiver dropped, closing response");
                return Ok(());
            }
            next = reader.next() => match next {
                Some(result) => result,
                None => break,
            },
        };
        let chunk = result.map_err(ClientError::Http)?;
        if let StreamChunk::Event(event) = &chunk
            && event.is_terminal()
        {
            seen_terminal = true;
        }
        if tx.send(Ok(chunk)).await.is_err() {
            debug!("Chunk receiver dropped, closing response");
            return Ok(());
        }
    }

    if !seen_terminal {
        return Err(ClientError::StreamEnded);
    }
    Ok(())
}
