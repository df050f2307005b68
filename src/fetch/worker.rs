//! Fetch worker: the transfer loop and its single finalization path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result, TransferError};
use crate::types::{Event, FetchReport, FetchState, Progress};

use super::partial::PartialFile;
use super::transport::Transport;
use super::{FetchOptions, FetchShared};

/// Everything the worker needs, moved onto its task
pub(super) struct FetchContext {
    pub(super) url: url::Url,
    pub(super) destination: PathBuf,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) event_tx: broadcast::Sender<Event>,
    pub(super) options: FetchOptions,
    pub(super) shared: Arc<FetchShared>,
    pub(super) cancel_token: CancellationToken,
}

/// Why a transfer stopped before completing
enum Stop {
    Cancelled,
    Failed(TransferError),
}

impl From<TransferError> for Stop {
    fn from(e: TransferError) -> Self {
        Stop::Failed(e)
    }
}

/// Run one transfer to a terminal state
///
/// Phases:
/// 1. Pre-checks (cancellation, extension filter)
/// 2. Open the transport and publish the declared length
/// 3. Stream chunks to the destination, observing cancellation between chunks
/// 4. Flush, then publish Completed, or finalize as Cancelled/Failed
pub(super) async fn run_fetch(ctx: FetchContext, partial: PartialFile) -> Result<FetchReport> {
    let started = Instant::now();

    match transfer(&ctx).await {
        Ok(bytes) if ctx.shared.try_complete(&ctx.cancel_token) => {
            let destination = partial.commit();
            let bytes_expected = ctx.shared.bytes_expected();
            tracing::info!(
                url = %ctx.url,
                destination = ?destination,
                bytes,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "fetch complete"
            );
            ctx.event_tx
                .send(Event::FetchCompleted {
                    destination: destination.clone(),
                    bytes,
                })
                .ok();
            Ok(FetchReport {
                source: ctx.url.to_string(),
                destination,
                bytes_transferred: bytes,
                bytes_expected,
                elapsed: started.elapsed(),
            })
        }
        // Cancelled after the last chunk but before Completed was published
        Ok(_) => finalize(&ctx, partial, Stop::Cancelled).await,
        Err(stop) => finalize(&ctx, partial, stop).await,
    }
}

/// The one exit path for every non-Completed outcome
///
/// Order matters: the file is removed first, then the terminal state is
/// published, then observers are notified.
async fn finalize(ctx: &FetchContext, partial: PartialFile, stop: Stop) -> Result<FetchReport> {
    partial.discard().await;

    match stop {
        Stop::Cancelled => {
            ctx.shared.set_state(FetchState::Cancelled);
            tracing::warn!(url = %ctx.url, destination = ?ctx.destination, "fetch cancelled");
            ctx.event_tx
                .send(Event::FetchCancelled {
                    destination: ctx.destination.clone(),
                })
                .ok();
            Err(Error::Cancelled)
        }
        Stop::Failed(e) => {
            ctx.shared.set_state(FetchState::Failed);
            tracing::error!(
                url = %ctx.url,
                reason = e.reason_code(),
                error = %e,
                "fetch failed"
            );
            ctx.event_tx
                .send(Event::FetchFailed {
                    error: e.to_string(),
                    reason: e.reason_code().to_string(),
                })
                .ok();
            Err(Error::Transfer(e))
        }
    }
}

/// Stream the body to disk, returning the number of bytes written
async fn transfer(ctx: &FetchContext) -> std::result::Result<u64, Stop> {
    if ctx.cancel_token.is_cancelled() {
        return Err(Stop::Cancelled);
    }

    if ctx.options.filter_extensions
        && !crate::utils::has_supported_extension(&ctx.url, &ctx.options.supported_extensions)
    {
        return Err(TransferError::UnsupportedFileType {
            url: ctx.url.to_string(),
            supported: ctx.options.supported_extensions.clone(),
        }
        .into());
    }

    let mut body = tokio::select! {
        biased;
        _ = ctx.cancel_token.cancelled() => return Err(Stop::Cancelled),
        opened = ctx.transport.open(&ctx.url) => opened?,
    };

    let expected = body.content_length.filter(|&n| n > 0);
    ctx.shared.set_bytes_expected(expected);
    ctx.event_tx
        .send(Event::FetchStarted {
            url: ctx.url.to_string(),
            total: expected,
        })
        .ok();

    if let Some(required) = expected
        && ctx.options.check_disk_space
    {
        check_disk_space(ctx, required)?;
    }

    let io_error = |e: std::io::Error| {
        Stop::Failed(TransferError::Io {
            path: ctx.destination.clone(),
            reason: e.to_string(),
        })
    };

    let mut file = tokio::fs::File::create(&ctx.destination)
        .await
        .map_err(io_error)?;

    let mut total = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel_token.cancelled() => return Err(Stop::Cancelled),
            next = body.chunks.next() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Err(e.into()),
            None => break,
        };
        if chunk.is_empty() {
            continue;
        }

        file.write_all(&chunk).await.map_err(io_error)?;
        total = ctx.shared.add_bytes(chunk.len() as u64);

        ctx.event_tx
            .send(Event::FetchProgress {
                bytes_transferred: total,
                progress: Progress::from_bytes(total, expected),
            })
            .ok();
    }

    file.flush().await.map_err(io_error)?;
    file.sync_all().await.map_err(io_error)?;
    drop(file);

    if let Some(expected) = expected
        && total != expected
    {
        return Err(TransferError::LengthMismatch {
            expected,
            received: total,
        }
        .into());
    }

    tracing::debug!(url = %ctx.url, bytes = total, "body fully written");
    Ok(total)
}

fn check_disk_space(ctx: &FetchContext, required: u64) -> std::result::Result<(), Stop> {
    let dir = crate::utils::parent_dir(&ctx.destination);
    match crate::utils::get_available_space(&dir) {
        Ok(available) if available < required => Err(TransferError::InsufficientSpace {
            required,
            available,
        }
        .into()),
        Ok(_) => Ok(()),
        Err(e) => {
            // Not fatal: the write itself will fail if space really runs out
            tracing::warn!(dir = ?dir, error = %e, "could not check free disk space");
            Ok(())
        }
    }
}
