mod denoiser;
pub mod engine;
pub mod factory;
pub mod format;
pub mod pipeline;
pub mod resampler;

use thiserror::Error;

pub use denoiser::{DenoisedChunk, Denoiser, KrispDenoiser, RnNoiseDenoiser};
pub use engine::{ENGINE_SAMPLE_RATE, FRAME_SIZE, NoiseEngine, NoiseSuppressor};
pub use factory::{Provider, denoiser_from_options, get_denoiser};
pub use format::{AudioEncoding, AudioFormat};
pub use pipeline::denoise_task;
pub use resampler::{bytes_to_f32, f32_to_bytes, resample};

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("unsupported audio format: {0}")]
    Format(String),
    #[error("invalid frame size: expected {expected} samples, got {actual}")]
    InvalidFrameSize { expected: usize, actual: usize },
    #[error("failed to initialize noise engine: {0}")]
    EngineInit(String),
    #[error("noise engine is not initialized")]
    EngineNotInitialized,
    #[error("noise engine has already been destroyed")]
    DoubleFree,
    #[error("denoising provider `{0}` is not implemented")]
    ProviderNotImplemented(Provider),
    #[error("failed to create resampler: {0}")]
    ResamplerCreate(String),
    #[error("failed to process resampler chunk: {0}")]
    ResamplerProcess(String),
    #[error("denoising task failed: {0}")]
    TaskJoin(String),
    #[error("output channel receiver dropped")]
    OutputChannelClosed,
}
