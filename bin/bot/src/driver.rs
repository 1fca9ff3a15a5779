//! Line-oriented event loop.
//!
//! Reads one JSON event per line. Session changes are applied in line order
//! before the next line is read; messages and remember requests run on their
//! own tasks. Replies are written as JSON lines through a single writer task.

use crate::dispatch::Dispatcher;
use crate::error::DriverError;
use crate::event::{BotEvent, BotOutput, Reply};
use kanna_ai::LlmBackend;
use kanna_conversation::DocumentRepository;
use kanna_core::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const REPLY_BUFFER: usize = 64;

/// Drives `dispatcher` from `input` until EOF or `shutdown` resolves.
///
/// In-flight events are allowed to finish before returning.
///
/// # Errors
///
/// Returns an error if reading the input or writing a reply fails.
pub async fn run<B, R, I, O, S>(
    dispatcher: Arc<Dispatcher<B, R>>,
    input: I,
    output: O,
    shutdown: S,
) -> Result<(), DriverError>
where
    B: LlmBackend + 'static,
    R: DocumentRepository + 'static,
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin + Send + 'static,
    S: Future<Output = ()>,
{
    let (replies, pending) = mpsc::channel(REPLY_BUFFER);
    let writer = tokio::spawn(write_replies(output, pending));

    let mut lines = input.lines();
    let mut tasks = JoinSet::new();
    tokio::pin!(shutdown);

    let read_result = loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown requested");
                break Ok(());
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let event = match parse_event(&line) {
                        Some(BotEvent::Activate(request)) => {
                            dispatcher.activate(&request);
                            continue;
                        }
                        Some(BotEvent::Connectivity(change)) => {
                            dispatcher.connectivity_changed(&change);
                            continue;
                        }
                        Some(event) => event,
                        None => continue,
                    };
                    let dispatcher = Arc::clone(&dispatcher);
                    let replies = replies.clone();
                    tasks.spawn(async move {
                        match dispatcher.handle(event).await {
                            Ok(Some(reply)) => {
                                if replies.send(reply).await.is_err() {
                                    warn!("reply writer stopped; dropping reply");
                                }
                            }
                            Ok(None) => {}
                            Err(report) => error!(error = %report, "event handling failed"),
                        }
                    });
                }
                Ok(None) => {
                    debug!("event stream closed");
                    break Ok(());
                }
                Err(e) => break Err(DriverError::ReadFailed { reason: e.to_string() }),
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "event task panicked");
                }
            }
        }
    };

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "event task panicked");
        }
    }
    drop(replies);

    let write_result = writer.await.map_err(|e| DriverError::WriteFailed {
        reason: e.to_string(),
    })?;
    read_result?;
    write_result
}

fn parse_event(line: &str) -> Option<BotEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "skipping unparsable event line");
            None
        }
    }
}

async fn write_replies<O>(
    mut output: O,
    mut pending: mpsc::Receiver<Reply>,
) -> Result<(), DriverError>
where
    O: AsyncWrite + Unpin,
{
    while let Some(reply) = pending.recv().await {
        let mut line = serde_json::to_vec(&BotOutput::Reply(reply)).map_err(|e| {
            DriverError::WriteFailed {
                reason: e.to_string(),
            }
        })?;
        line.push(b'\n');
        output
            .write_all(&line)
            .await
            .map_err(|e| DriverError::WriteFailed {
                reason: e.to_string(),
            })?;
        output.flush().await.map_err(|e| DriverError::WriteFailed {
            reason: e.to_string(),
        })?;
    }
    Ok(())
}
