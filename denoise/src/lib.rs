//! Per-session voice noise suppression.
//!
//! Each live call owns one [`Denoiser`], built by [`get_denoiser`] from the
//! session's negotiated [`AudioFormat`]. Every inbound chunk is resampled to
//! the 48 kHz mono engine format, cleaned by RNNoise in 480-sample frames and
//! resampled back, together with a chunk-level speech confidence.

pub mod audio;
pub mod config;
mod error;
pub mod metrics;

use tracing_subscriber::EnvFilter;

pub use audio::{
    AudioEncoding, AudioError, AudioFormat, DenoisedChunk, Denoiser, Provider, denoise_task,
    denoiser_from_options, get_denoiser,
};
pub use config::DenoiseOptions;
pub use error::SetupError;
pub use metrics::DenoiseReport;

const DEFAULT_LOG_FILTER: &str = "info";

/// Installs the process-wide `tracing` subscriber. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init_logging() -> Result<(), SetupError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| SetupError::LoggingInit(err.to_string()))
}
