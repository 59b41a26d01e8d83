//! Line-delimited JSON-RPC over a byte stream (stdin/stdout in production).

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::dispatcher::{response_value, Dispatcher};
use crate::error::RpcError;

const TRANSPORT: &str = "stdio";
/// Longest accepted input line.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;
const OUTBOUND_CAPACITY: usize = 64;

/// Serve requests from `input` until EOF or shutdown. Requests run
/// concurrently; responses are written whole, one per line, in completion order.
pub async fn serve<R, W>(
    dispatcher: Arc<Dispatcher>,
    input: R,
    output: W,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

    let writer = tokio::spawn(async move {
        let mut sink = FramedWrite::new(output, LinesCodec::new());
        while let Some(line) = rx.recv().await {
            if let Err(e) = sink.send(line).await {
                tracing::error!("Failed to write stdio response: {}", e);
                break;
            }
        }
    });

    let tracker = TaskTracker::new();
    tracing::info!("stdio transport ready");

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = lines.next() => next,
        };

        match next {
            None => {
                tracing::info!("stdin closed");
                break;
            }
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let dispatcher = dispatcher.clone();
                let tx = tx.clone();
                let cancel = shutdown.child_token();
                tracker.spawn(async move {
                    if let Some(response) = dispatcher.handle_text(&line, TRANSPORT, &cancel).await {
                        let _ = tx.send(response.to_string()).await;
                    }
                });
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                tracing::warn!("Discarding stdio message over {} bytes", MAX_LINE_BYTES);
                let error = RpcError::MessageTooLarge {
                    size: MAX_LINE_BYTES + 1,
                    max_bytes: MAX_LINE_BYTES,
                };
                let _ = tx.send(response_value(error.into_response(None)).to_string()).await;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                tracing::error!("stdin read failed: {}", e);
                break;
            }
        }
    }

    tracker.close();
    tracker.wait().await;
    drop(tx);
    let _ = writer.await;
    Ok(())
}
