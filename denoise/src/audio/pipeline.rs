use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task;
use tracing::{debug, warn};

use super::AudioError;
use super::denoiser::{DenoisedChunk, Denoiser};

const BACKPRESSURE_WARN_EVERY: u64 = 50;

/// Drives one session: denoises chunks from `rx` in arrival order and
/// forwards them to `tx`. The denoiser is flushed exactly once when the
/// input closes, the output closes, or a chunk fails.
pub async fn denoise_task(
    denoiser: Arc<Denoiser>,
    mut rx: mpsc::Receiver<Vec<u8>>,
    tx: mpsc::Sender<DenoisedChunk>,
    dropped_counter: Arc<AtomicU64>,
) -> Result<(), AudioError> {
    let outcome = forward_chunks(&denoiser, &mut rx, &tx, &dropped_counter).await;
    let flushed = denoiser.flush();

    match outcome {
        Ok(()) => flushed,
        Err(err) => {
            if let Err(flush_err) = flushed {
                warn!(error = %flush_err, "failed to flush denoiser after pipeline error");
            }
            Err(err)
        }
    }
}

async fn forward_chunks(
    denoiser: &Arc<Denoiser>,
    rx: &mut mpsc::Receiver<Vec<u8>>,
    tx: &mpsc::Sender<DenoisedChunk>,
    dropped_counter: &AtomicU64,
) -> Result<(), AudioError> {
    loop {
        let chunk = tokio::select! {
            chunk = rx.recv() => chunk,
            () = tx.closed() => {
                warn!("denoise pipeline receiver closed");
                return Err(AudioError::OutputChannelClosed);
            }
        };
        let Some(chunk) = chunk else {
            debug!(provider = %denoiser.provider(), "denoise pipeline input closed");
            return Ok(());
        };

        let session = Arc::clone(denoiser);
        let denoised = task::spawn_blocking(move || session.denoise(&chunk))
            .await
            .map_err(|err| AudioError::TaskJoin(err.to_string()))??;

        match tx.try_send(denoised) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = dropped_counter.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_multiple_of(BACKPRESSURE_WARN_EVERY) {
                    warn!(
                        dropped_denoised_chunks = dropped,
                        "dropping denoised chunks because receiver is saturated"
                    );
                }
            }
            Err(TrySendError::Closed(_)) => {
                return Err(AudioError::OutputChannelClosed);
            }
        }
    }
}
