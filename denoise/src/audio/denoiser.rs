use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, info};

use super::AudioError;
use super::engine::{FRAME_SIZE, NoiseEngine, NoiseSuppressor};
use super::factory::Provider;
use super::format::AudioFormat;
use super::resampler::{bytes_to_f32, f32_to_bytes, resample};
use crate::config::DenoiseOptions;
use crate::metrics::{DenoiseReport, DenoiseStats};

/// Cleaned audio in the caller's format plus the chunk-level speech confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct DenoisedChunk {
    pub audio: Vec<u8>,
    pub confidence: f64,
}

/// The denoiser for one voice session, resolved once by the factory.
pub enum Denoiser {
    RnNoise(RnNoiseDenoiser),
    Krisp(KrispDenoiser),
}

impl Denoiser {
    pub fn provider(&self) -> Provider {
        match self {
            Self::RnNoise(_) => Provider::RnNoise,
            Self::Krisp(_) => Provider::Krisp,
        }
    }

    pub fn input_format(&self) -> AudioFormat {
        match self {
            Self::RnNoise(denoiser) => denoiser.input_format(),
            Self::Krisp(denoiser) => denoiser.input_format(),
        }
    }

    /// Cleans one inbound chunk. Calls on the same session are serialized.
    pub fn denoise(&self, chunk: &[u8]) -> Result<DenoisedChunk, AudioError> {
        match self {
            Self::RnNoise(denoiser) => denoiser.denoise(chunk),
            Self::Krisp(denoiser) => denoiser.denoise(chunk),
        }
    }

    /// Tears the session down. Must be called exactly once.
    pub fn flush(&self) -> Result<(), AudioError> {
        match self {
            Self::RnNoise(denoiser) => denoiser.flush(),
            Self::Krisp(denoiser) => denoiser.flush(),
        }
    }

    pub fn report(&self) -> Option<DenoiseReport> {
        match self {
            Self::RnNoise(denoiser) => Some(denoiser.report()),
            Self::Krisp(_) => None,
        }
    }
}

struct SessionState {
    stats: DenoiseStats,
    frames_processed: u64,
}

struct FrameRun {
    samples: Vec<f32>,
    confidence: f64,
    frames: usize,
    padded: bool,
}

pub struct RnNoiseDenoiser<S: NoiseSuppressor = NoiseEngine> {
    engine: S,
    input_format: AudioFormat,
    skip_warmup_frame: bool,
    session: Mutex<SessionState>,
}

impl RnNoiseDenoiser<NoiseEngine> {
    pub fn new(input_format: AudioFormat, options: &DenoiseOptions) -> Result<Self, AudioError> {
        Self::with_engine(NoiseEngine::create()?, input_format, options.skip_warmup_frame)
    }
}

impl<S: NoiseSuppressor> RnNoiseDenoiser<S> {
    pub fn with_engine(
        engine: S,
        input_format: AudioFormat,
        skip_warmup_frame: bool,
    ) -> Result<Self, AudioError> {
        input_format.validate()?;
        debug!(
            input_format = %input_format,
            engine_format = %AudioFormat::ENGINE,
            skip_warmup_frame,
            "rnnoise denoiser initialized"
        );

        Ok(Self {
            engine,
            input_format,
            skip_warmup_frame,
            session: Mutex::new(SessionState {
                stats: DenoiseStats::new(),
                frames_processed: 0,
            }),
        })
    }

    pub fn input_format(&self) -> AudioFormat {
        self.input_format
    }

    pub fn denoise(&self, chunk: &[u8]) -> Result<DenoisedChunk, AudioError> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let process_start = Instant::now();

        match self.denoise_locked(&mut session, chunk) {
            Ok((denoised, run)) => {
                let processing_us = process_start.elapsed().as_micros() as u64;
                session
                    .stats
                    .record_chunk(processing_us, run.frames, run.padded, denoised.confidence);
                debug!(
                    input_bytes = chunk.len(),
                    frames = run.frames,
                    padded = run.padded,
                    confidence = denoised.confidence,
                    processing_us,
                    "audio chunk denoised"
                );
                Ok(denoised)
            }
            Err(err) => {
                session.stats.record_failure();
                Err(err)
            }
        }
    }

    pub fn flush(&self) -> Result<(), AudioError> {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        self.engine.destroy()?;

        let report = session.stats.report();
        info!(
            chunks = report.chunks,
            frames = report.frames,
            failed_chunks = report.failed_chunks,
            average_confidence = report.average_confidence,
            p95_processing_us = report.processing.p95_us,
            "denoising session flushed"
        );
        Ok(())
    }

    pub fn report(&self) -> DenoiseReport {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats
            .report()
    }

    fn denoise_locked(
        &self,
        session: &mut SessionState,
        chunk: &[u8],
    ) -> Result<(DenoisedChunk, FrameRun), AudioError> {
        let resampled = resample(chunk, self.input_format, AudioFormat::ENGINE)?;
        let samples = bytes_to_f32(&resampled, AudioFormat::ENGINE)?;

        let run = self.suppress_samples(session, &samples)?;

        let cleaned = f32_to_bytes(&run.samples, AudioFormat::ENGINE)?;
        let restored = resample(&cleaned, AudioFormat::ENGINE, self.input_format)?;
        let audio = fit_to_length(restored, chunk.len(), self.input_format)?;

        Ok((
            DenoisedChunk {
                audio,
                confidence: run.confidence,
            },
            run,
        ))
    }

    /// Runs `samples` through the engine frame by frame. The last frame is
    /// zero-padded for the engine and its padding is trimmed from the output.
    fn suppress_samples(
        &self,
        session: &mut SessionState,
        samples: &[f32],
    ) -> Result<FrameRun, AudioError> {
        if samples.is_empty() {
            return Ok(FrameRun {
                samples: Vec::new(),
                confidence: 0.0,
                frames: 0,
                padded: false,
            });
        }

        let frame_count = samples.len().div_ceil(FRAME_SIZE);
        let mut cleaned = Vec::with_capacity(samples.len());
        let mut confidence_sum = 0.0;
        let mut padded_frame = [0.0_f32; FRAME_SIZE];
        let mut padded = false;

        for segment in samples.chunks(FRAME_SIZE) {
            let frame: &[f32] = if segment.len() == FRAME_SIZE {
                segment
            } else {
                padded_frame[..segment.len()].copy_from_slice(segment);
                padded_frame[segment.len()..].fill(0.0);
                padded = true;
                &padded_frame
            };

            let (confidence, output) = self.engine.suppress_frame(frame)?;
            confidence_sum += confidence;

            if self.skip_warmup_frame && session.frames_processed == 0 {
                // RNNoise output has a startup transient on the very first frame.
                cleaned.extend_from_slice(segment);
            } else {
                cleaned.extend_from_slice(&output[..segment.len()]);
            }
            session.frames_processed += 1;
        }

        Ok(FrameRun {
            samples: cleaned,
            confidence: confidence_sum / frame_count as f64,
            frames: frame_count,
            padded,
        })
    }
}

/// Placeholder for the Krisp SDK integration; every call reports that the
/// provider is not available in this build.
pub struct KrispDenoiser {
    input_format: AudioFormat,
}

impl KrispDenoiser {
    pub fn new(input_format: AudioFormat) -> Self {
        Self { input_format }
    }

    pub fn input_format(&self) -> AudioFormat {
        self.input_format
    }

    pub fn denoise(&self, _chunk: &[u8]) -> Result<DenoisedChunk, AudioError> {
        Err(AudioError::ProviderNotImplemented(Provider::Krisp))
    }

    pub fn flush(&self) -> Result<(), AudioError> {
        Err(AudioError::ProviderNotImplemented(Provider::Krisp))
    }
}

fn fit_to_length(
    mut audio: Vec<u8>,
    target_len: usize,
    format: AudioFormat,
) -> Result<Vec<u8>, AudioError> {
    if audio.len() < target_len {
        let silence = f32_to_bytes(&vec![0.0; usize::from(format.channels)], format)?;
        while audio.len() < target_len {
            audio.extend_from_slice(&silence);
        }
    }
    audio.truncate(target_len);
    Ok(audio)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::audio::format::AudioEncoding;

    /// Echoes frames back and replays a fixed confidence script.
    struct ScriptedEngine {
        confidences: Vec<f64>,
        calls: AtomicUsize,
        in_flight: AtomicBool,
        overlapped: AtomicBool,
        destroyed: AtomicBool,
    }

    impl ScriptedEngine {
        fn new(confidences: Vec<f64>) -> Self {
            Self {
                confidences,
                calls: AtomicUsize::new(0),
                in_flight: AtomicBool::new(false),
                overlapped: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            }
        }
    }

    impl NoiseSuppressor for ScriptedEngine {
        fn suppress_frame(
            &self,
            frame: &[f32],
        ) -> Result<(f64, [f32; FRAME_SIZE]), AudioError> {
            if frame.len() != FRAME_SIZE {
                return Err(AudioError::InvalidFrameSize {
                    expected: FRAME_SIZE,
                    actual: frame.len(),
                });
            }
            if self.destroyed.load(Ordering::SeqCst) {
                return Err(AudioError::EngineNotInitialized);
            }
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }

            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let confidence = self.confidences[call % self.confidences.len()];
            let mut output = [0.0_f32; FRAME_SIZE];
            output.copy_from_slice(frame);
            thread::yield_now();

            self.in_flight.store(false, Ordering::SeqCst);
            Ok((confidence, output))
        }

        fn destroy(&self) -> Result<(), AudioError> {
            if self.destroyed.swap(true, Ordering::SeqCst) {
                Err(AudioError::DoubleFree)
            } else {
                Ok(())
            }
        }
    }

    fn scripted(confidences: Vec<f64>, input_format: AudioFormat) -> RnNoiseDenoiser<ScriptedEngine> {
        RnNoiseDenoiser::with_engine(ScriptedEngine::new(confidences), input_format, false)
            .expect("denoiser should build")
    }

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|idx| (idx % 200) as f32 / 400.0).collect()
    }

    fn run_samples(denoiser: &RnNoiseDenoiser<ScriptedEngine>, samples: &[f32]) -> FrameRun {
        let mut session = denoiser.session.lock().expect("session lock");
        denoiser
            .suppress_samples(&mut session, samples)
            .expect("frames should process")
    }

    #[test]
    fn frame_aligned_input_calls_engine_once_per_frame() {
        let denoiser = scripted(vec![0.1, 0.3, 0.8], AudioFormat::ENGINE);
        let input = f32_to_bytes(&ramp(3 * FRAME_SIZE), AudioFormat::ENGINE).expect("encode");

        let result = denoiser.denoise(&input).expect("denoise");

        assert_eq!(denoiser.engine.calls.load(Ordering::SeqCst), 3);
        assert!((result.confidence - 0.4).abs() < 1e-9);
        assert_eq!(result.audio, input);
    }

    #[test]
    fn padding_is_trimmed_from_reassembled_samples() {
        let denoiser = scripted(vec![0.5], AudioFormat::ENGINE);
        let samples = ramp(2 * FRAME_SIZE + 37);

        let run = run_samples(&denoiser, &samples);

        assert_eq!(run.frames, 3);
        assert!(run.padded);
        assert_eq!(run.samples.len(), 2 * FRAME_SIZE + 37);
        assert_eq!(run.samples, samples);
        assert_eq!(denoiser.engine.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn padded_frame_counts_toward_confidence_mean() {
        let denoiser = scripted(vec![0.9, 0.0], AudioFormat::ENGINE);
        let run = run_samples(&denoiser, &ramp(FRAME_SIZE + 1));

        assert_eq!(run.frames, 2);
        assert!((run.confidence - 0.45).abs() < 1e-9);
    }

    #[test]
    fn sixteen_khz_chunk_becomes_two_engine_frames() {
        let input_format = AudioFormat::linear16_mono(16_000);
        let denoiser = scripted(vec![0.2, 0.6], input_format);
        let samples: Vec<f32> = (0..320).map(|idx| (idx as f32 * 0.05).sin() * 0.4).collect();
        let input = f32_to_bytes(&samples, input_format).expect("encode");

        let result = denoiser.denoise(&input).expect("denoise");

        assert_eq!(denoiser.engine.calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.audio.len(), 320 * 2);
        assert!((result.confidence - 0.4).abs() < 1e-9);

        let echoed = bytes_to_f32(&result.audio, input_format).expect("decode");
        for (idx, (before, after)) in samples.iter().zip(&echoed).enumerate() {
            assert!(
                (before - after).abs() < 2e-3,
                "sample {idx} was {after}, expected {before}"
            );
        }
    }

    #[test]
    fn empty_chunk_yields_empty_output_and_zero_confidence() {
        let denoiser = scripted(vec![0.7], AudioFormat::linear16_mono(16_000));

        let result = denoiser.denoise(&[]).expect("empty chunk is not an error");

        assert!(result.audio.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(denoiser.engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn format_errors_abort_before_reaching_engine() {
        let denoiser = scripted(vec![0.7], AudioFormat::linear16_mono(16_000));

        let result = denoiser.denoise(&[1, 2, 3]);

        assert!(matches!(result, Err(AudioError::Format(_))));
        assert_eq!(denoiser.engine.calls.load(Ordering::SeqCst), 0);
        assert_eq!(denoiser.report().failed_chunks, 1);
    }

    #[test]
    fn output_length_matches_input_for_uneven_rates() {
        let input_format = AudioFormat::new(96_000, AudioEncoding::Float32, 2);
        let denoiser = scripted(vec![0.5], input_format);
        let samples: Vec<f32> = ramp(202);
        let input = f32_to_bytes(&samples, input_format).expect("encode");

        let result = denoiser.denoise(&input).expect("denoise");

        assert_eq!(result.audio.len(), input.len());
    }

    #[test]
    fn warmup_frame_passes_input_through_once() {
        let engine = ScriptedEngine::new(vec![0.5]);
        let denoiser = RnNoiseDenoiser::with_engine(engine, AudioFormat::ENGINE, true)
            .expect("denoiser should build");
        let samples = ramp(2 * FRAME_SIZE);

        let first = run_samples(&denoiser, &samples);
        let second = run_samples(&denoiser, &samples);

        assert_eq!(first.samples, samples);
        assert_eq!(second.samples, samples);
        assert_eq!(denoiser.session.lock().expect("session lock").frames_processed, 4);
    }

    #[test]
    fn second_flush_reports_double_free() {
        let denoiser = scripted(vec![0.5], AudioFormat::ENGINE);

        assert!(denoiser.flush().is_ok());
        assert!(matches!(denoiser.flush(), Err(AudioError::DoubleFree)));
        assert!(matches!(
            denoiser.denoise(&[0, 0]),
            Err(AudioError::EngineNotInitialized)
        ));
    }

    #[test]
    fn concurrent_calls_on_one_session_never_overlap() {
        let denoiser = Arc::new(scripted(vec![0.5], AudioFormat::ENGINE));
        let input = f32_to_bytes(&ramp(4 * FRAME_SIZE), AudioFormat::ENGINE).expect("encode");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let denoiser = Arc::clone(&denoiser);
                let input = input.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        denoiser.denoise(&input).expect("denoise");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread");
        }

        assert!(!denoiser.engine.overlapped.load(Ordering::SeqCst));
        assert_eq!(denoiser.engine.calls.load(Ordering::SeqCst), 4 * 10 * 4);
        assert_eq!(denoiser.report().chunks, 40);
    }

    #[test]
    fn native_engine_denoiser_processes_and_flushes() {
        let input_format = AudioFormat::linear16_mono(16_000);
        let denoiser = RnNoiseDenoiser::new(input_format, &DenoiseOptions::default())
            .expect("native denoiser should build");
        let samples: Vec<f32> = (0..1_600).map(|idx| (idx as f32 * 0.02).sin() * 0.3).collect();
        let input = f32_to_bytes(&samples, input_format).expect("encode");

        let result = denoiser.denoise(&input).expect("denoise");

        assert_eq!(result.audio.len(), input.len());
        assert!((0.0..=1.0).contains(&result.confidence));
        assert!(denoiser.flush().is_ok());
        assert!(matches!(denoiser.flush(), Err(AudioError::DoubleFree)));
    }

    #[test]
    fn krisp_denoiser_reports_not_implemented() {
        let denoiser = Denoiser::Krisp(KrispDenoiser::new(AudioFormat::ENGINE));

        assert_eq!(denoiser.provider(), Provider::Krisp);
        assert!(denoiser.report().is_none());
        assert!(matches!(
            denoiser.denoise(&[0, 0]),
            Err(AudioError::ProviderNotImplemented(Provider::Krisp))
        ));
        assert!(matches!(
            denoiser.flush(),
            Err(AudioError::ProviderNotImplemented(Provider::Krisp))
        ));
    }
}
