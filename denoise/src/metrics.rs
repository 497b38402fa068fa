use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

const DEFAULT_WINDOW_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSummary {
    pub samples: usize,
    pub average_us: u64,
    pub p95_us: u64,
    pub max_us: u64,
}

impl MetricSummary {
    fn empty() -> Self {
        Self {
            samples: 0,
            average_us: 0,
            p95_us: 0,
            max_us: 0,
        }
    }
}

/// Snapshot of one denoising session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DenoiseReport {
    pub generated_at_ms: u64,
    pub processing: MetricSummary,
    pub chunks: u64,
    pub frames: u64,
    pub padded_frames: u64,
    pub failed_chunks: u64,
    pub average_confidence: f64,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
struct RollingMetric {
    values: VecDeque<u64>,
    capacity: usize,
}

impl RollingMetric {
    fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn record(&mut self, value: u64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    fn summary(&self) -> MetricSummary {
        if self.values.is_empty() {
            return MetricSummary::empty();
        }

        let samples = self.values.len();
        let sum: u64 = self.values.iter().sum();
        let average_us = sum / samples as u64;

        let mut sorted = self.values.iter().copied().collect::<Vec<_>>();
        sorted.sort_unstable();
        let p95_index = ((samples as f64 * 0.95).ceil() as usize)
            .saturating_sub(1)
            .min(samples - 1);
        let p95_us = sorted[p95_index];
        let max_us = sorted[samples - 1];

        MetricSummary {
            samples,
            average_us,
            p95_us,
            max_us,
        }
    }
}

#[derive(Debug)]
pub struct DenoiseStats {
    processing_us: RollingMetric,
    chunks: u64,
    frames: u64,
    padded_frames: u64,
    failed_chunks: u64,
    confidence_sum: f64,
}

impl DenoiseStats {
    pub fn new() -> Self {
        Self {
            processing_us: RollingMetric::new(DEFAULT_WINDOW_SIZE),
            chunks: 0,
            frames: 0,
            padded_frames: 0,
            failed_chunks: 0,
            confidence_sum: 0.0,
        }
    }

    pub fn record_chunk(&mut self, processing_us: u64, frames: usize, padded: bool, confidence: f64) {
        self.processing_us.record(processing_us);
        self.chunks += 1;
        self.frames += frames as u64;
        if padded {
            self.padded_frames += 1;
        }
        self.confidence_sum += confidence;
    }

    pub fn record_failure(&mut self) {
        self.failed_chunks += 1;
    }

    pub fn report(&self) -> DenoiseReport {
        let average_confidence = if self.chunks == 0 {
            0.0
        } else {
            self.confidence_sum / self.chunks as f64
        };

        let mut warnings = Vec::new();
        if self.failed_chunks > 0 {
            warnings.push(format!(
                "{} audio chunks failed to denoise.",
                self.failed_chunks
            ));
        }

        DenoiseReport {
            generated_at_ms: now_epoch_ms(),
            processing: self.processing_us.summary(),
            chunks: self.chunks,
            frames: self.frames,
            padded_frames: self.padded_frames,
            failed_chunks: self.failed_chunks,
            average_confidence,
            warnings,
        }
    }
}

impl Default for DenoiseStats {
    fn default() -> Self {
        Self::new()
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
