use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::RelayError;

/// Deltas buffered between the upstream reader and the response body.
const RELAY_BUFFER: usize = 32;

/// Response body fed by a background task that reads the upstream stream.
///
/// Dropping the body (client went away) cancels the task, which drops the
/// upstream response and with it the upstream connection.
pub struct RelayBody {
    rx: mpsc::Receiver<Result<String, RelayError>>,
    _cancel_on_drop: DropGuard,
}

impl Stream for RelayBody {
    type Item = Result<String, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Spawn the forwarding task and return the body it feeds.
pub fn spawn_relay<S>(deltas: S) -> RelayBody
where
    S: Stream<Item = Result<String, RelayError>> + Send + 'static,
{
    let token = CancellationToken::new();
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);
    tokio::spawn(forward_deltas(deltas, tx, token.clone()));
    RelayBody {
        rx,
        _cancel_on_drop: token.drop_guard(),
    }
}

async fn forward_deltas<S>(
    deltas: S,
    tx: mpsc::Sender<Result<String, RelayError>>,
    token: CancellationToken,
) where
    S: Stream<Item = Result<String, RelayError>> + Send,
{
    let mut deltas = std::pin::pin!(deltas);
    let mut forwarded = 0usize;

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(forwarded, "client disconnected; abandoning upstream");
                return;
            }
            next = deltas.next() => next,
        };

        match next {
            Some(Ok(text)) => {
                forwarded += 1;
                if tx.send(Ok(text)).await.is_err() {
                    tracing::debug!(forwarded, "response body dropped; abandoning upstream");
                    return;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(forwarded, "upstream failed mid-stream: {e}");
                // Surfacing the error aborts the chunked body on the client side.
                let _ = tx.send(Err(e)).await;
                return;
            }
            None => {
                tracing::debug!(forwarded, "upstream stream complete");
                return;
            }
        }
    }
}
