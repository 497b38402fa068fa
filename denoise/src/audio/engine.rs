use std::panic;
use std::sync::{Mutex, PoisonError};

use nnnoiseless::DenoiseState;
use tracing::{debug, warn};

use super::AudioError;

/// Samples per engine frame (10 ms at 48 kHz).
pub const FRAME_SIZE: usize = DenoiseState::FRAME_SIZE;
pub const ENGINE_SAMPLE_RATE: u32 = 48_000;

// nnnoiseless works on i16-scaled floats while the pipeline carries [-1.0, 1.0].
const I16_SCALE: f32 = 32_768.0;

/// A stateful single-channel frame processor.
///
/// Consecutive `suppress_frame` calls model one continuous stream, so
/// implementations serialize calls internally.
pub trait NoiseSuppressor: Send + Sync + 'static {
    /// Cleans one frame of exactly [`FRAME_SIZE`] normalised samples and
    /// returns the voice-activity probability alongside the cleaned frame.
    fn suppress_frame(&self, frame: &[f32]) -> Result<(f64, [f32; FRAME_SIZE]), AudioError>;

    /// Releases the engine. A second call reports [`AudioError::DoubleFree`].
    fn destroy(&self) -> Result<(), AudioError>;
}

/// RNNoise engine bound to one voice session.
pub struct NoiseEngine {
    state: Mutex<Option<Box<DenoiseState<'static>>>>,
}

impl NoiseEngine {
    pub fn create() -> Result<Self, AudioError> {
        let state = panic::catch_unwind(DenoiseState::new).map_err(|_| {
            AudioError::EngineInit("failed to allocate RNNoise state".to_string())
        })?;
        debug!(frame_size = FRAME_SIZE, "noise engine created");

        Ok(Self {
            state: Mutex::new(Some(state)),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl NoiseSuppressor for NoiseEngine {
    fn suppress_frame(&self, frame: &[f32]) -> Result<(f64, [f32; FRAME_SIZE]), AudioError> {
        if frame.len() != FRAME_SIZE {
            return Err(AudioError::InvalidFrameSize {
                expected: FRAME_SIZE,
                actual: frame.len(),
            });
        }

        let mut input = [0.0_f32; FRAME_SIZE];
        for (scaled, sample) in input.iter_mut().zip(frame) {
            *scaled = (*sample * I16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32);
        }

        let mut output = [0.0_f32; FRAME_SIZE];
        let vad = {
            let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let state = guard.as_mut().ok_or(AudioError::EngineNotInitialized)?;
            state.process_frame(&mut output[..], &input[..])
        };

        for sample in &mut output {
            *sample = (*sample / I16_SCALE).clamp(-1.0, 1.0);
        }

        Ok((f64::from(vad).clamp(0.0, 1.0), output))
    }

    fn destroy(&self) -> Result<(), AudioError> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.take() {
            Some(state) => {
                drop(state);
                debug!("noise engine destroyed");
                Ok(())
            }
            None => Err(AudioError::DoubleFree),
        }
    }
}

impl Drop for NoiseEngine {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.is_some() {
            warn!("noise engine dropped without an explicit destroy");
        }
    }
}
