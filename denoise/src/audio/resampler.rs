use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use super::AudioError;
use super::format::{AudioEncoding, AudioFormat};

const I16_SCALE: f32 = 32_768.0;
const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32_635;

/// Converts `input` from one PCM layout to another.
///
/// Identical formats return an unchanged copy. Otherwise the buffer is
/// decoded, remixed to the target channel count, rate-converted with linear
/// interpolation and re-encoded. The output always holds
/// `round(frames * to / from)` frames.
pub fn resample(input: &[u8], from: AudioFormat, to: AudioFormat) -> Result<Vec<u8>, AudioError> {
    from.validate()?;
    to.validate()?;
    if from == to {
        return Ok(input.to_vec());
    }

    let frame_width = from.frame_width()?;
    if input.len() % frame_width != 0 {
        return Err(AudioError::Format(format!(
            "{} bytes is not a whole number of {frame_width}-byte frames for {from}",
            input.len()
        )));
    }

    let samples = bytes_to_f32(input, from)?;
    let remixed = remix_channels(&samples, usize::from(from.channels), usize::from(to.channels));
    let converted = if from.sample_rate_hz == to.sample_rate_hz {
        remixed
    } else {
        convert_rate(
            &remixed,
            usize::from(to.channels),
            from.sample_rate_hz,
            to.sample_rate_hz,
        )?
    };

    f32_to_bytes(&converted, to)
}

/// Decodes PCM bytes into interleaved samples normalised to [-1.0, 1.0].
pub fn bytes_to_f32(input: &[u8], format: AudioFormat) -> Result<Vec<f32>, AudioError> {
    format.validate()?;
    let width = format
        .encoding
        .sample_width()
        .ok_or_else(|| AudioError::Format(format!("unsupported encoding {}", format.encoding)))?;
    if input.len() % width != 0 {
        return Err(AudioError::Format(format!(
            "{} bytes is not aligned to the {width}-byte sample width of {}",
            input.len(),
            format.encoding
        )));
    }

    let samples: Vec<f32> = match format.encoding {
        AudioEncoding::Linear16 => input
            .chunks_exact(2)
            .map(|bytes| i16_to_f32(i16::from_le_bytes([bytes[0], bytes[1]])))
            .collect(),
        AudioEncoding::Float32 => input
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect(),
        AudioEncoding::MuLaw => input
            .iter()
            .map(|byte| i16_to_f32(decode_mulaw(*byte)))
            .collect(),
        AudioEncoding::Unspecified => {
            return Err(AudioError::Format(format!(
                "unsupported encoding {}",
                format.encoding
            )));
        }
    };
    Ok(samples)
}

/// Encodes normalised samples as PCM bytes, clamping anything outside [-1.0, 1.0].
pub fn f32_to_bytes(input: &[f32], format: AudioFormat) -> Result<Vec<u8>, AudioError> {
    format.validate()?;

    let bytes: Vec<u8> = match format.encoding {
        AudioEncoding::Linear16 => input
            .iter()
            .flat_map(|sample| f32_to_i16(*sample).to_le_bytes())
            .collect(),
        AudioEncoding::Float32 => input
            .iter()
            .flat_map(|sample| {
                let value = if sample.is_nan() {
                    0.0
                } else {
                    sample.clamp(-1.0, 1.0)
                };
                value.to_le_bytes()
            })
            .collect(),
        AudioEncoding::MuLaw => input
            .iter()
            .map(|sample| encode_mulaw(f32_to_i16(*sample)))
            .collect(),
        AudioEncoding::Unspecified => {
            return Err(AudioError::Format(format!(
                "unsupported encoding {}",
                format.encoding
            )));
        }
    };
    Ok(bytes)
}

fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / I16_SCALE
}

fn f32_to_i16(sample: f32) -> i16 {
    // NaN saturates to 0 through the cast.
    (sample * I16_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

fn remix_channels(samples: &[f32], from_channels: usize, to_channels: usize) -> Vec<f32> {
    if from_channels == to_channels {
        return samples.to_vec();
    }

    let frame_count = samples.len() / from_channels;
    let mut output = Vec::with_capacity(frame_count * to_channels);
    for frame in samples.chunks_exact(from_channels) {
        let sum: f32 = frame.iter().copied().sum();
        let mixed = sum / from_channels as f32;
        output.extend(std::iter::repeat_n(mixed, to_channels));
    }
    output
}

fn output_frame_count(frames: usize, from_rate: u32, to_rate: u32) -> usize {
    let from_rate = u64::from(from_rate);
    let scaled = frames as u64 * u64::from(to_rate) + from_rate / 2;
    (scaled / from_rate) as usize
}

/// Input frames a linear `FastFixedIn` reads before its first output lands on
/// input frame 0.
const INTERPOLATOR_LOOKBACK: u64 = 4;
const MAX_LEAD_IN_FRAMES: u64 = 4_096;
const TAIL_MARGIN_FRAMES: usize = 12;

/// Where the first output frame aligned with input frame 0 sits in the
/// interpolator's output, and how many copies of the first input frame are
/// prepended to put it there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Alignment {
    lead_in: usize,
    skip: usize,
}

fn alignment(from_rate: u32, to_rate: u32) -> Alignment {
    let divisor = gcd(u64::from(from_rate), u64::from(to_rate));
    let from_step = u64::from(from_rate) / divisor;
    let to_step = u64::from(to_rate) / divisor;

    // Output frame n reads input position (n + 1) * from / to - lookback - lead_in.
    let periods = INTERPOLATOR_LOOKBACK.div_ceil(from_step);
    let lead_in = periods * from_step - INTERPOLATOR_LOOKBACK;
    if lead_in <= MAX_LEAD_IN_FRAMES {
        return Alignment {
            lead_in: lead_in as usize,
            skip: (periods * to_step - 1) as usize,
        };
    }

    // No short common period: start within one output frame of input frame 0.
    let first = (INTERPOLATOR_LOOKBACK * to_step).div_ceil(from_step);
    Alignment {
        lead_in: 0,
        skip: (first - 1) as usize,
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn convert_rate(
    interleaved: &[f32],
    channels: usize,
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<f32>, AudioError> {
    let frames = interleaved.len() / channels;
    let expected = output_frame_count(frames, from_rate, to_rate);
    if frames == 0 || expected == 0 {
        return Ok(Vec::new());
    }

    // The chunk is held at its first and last frame on either side, so the
    // interpolator never blends real samples with silence at the edges.
    let Alignment { lead_in, skip } = alignment(from_rate, to_rate);
    let tail = from_rate.div_ceil(to_rate) as usize + TAIL_MARGIN_FRAMES;
    let padded_frames = lead_in + frames + tail;

    let mut planar = vec![Vec::with_capacity(padded_frames); channels];
    for (channel_idx, channel) in planar.iter_mut().enumerate() {
        let first = interleaved[channel_idx];
        let last = interleaved[(frames - 1) * channels + channel_idx];
        channel.extend(std::iter::repeat_n(first, lead_in));
        channel.extend(interleaved.iter().skip(channel_idx).step_by(channels).copied());
        channel.extend(std::iter::repeat_n(last, tail));
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Linear, padded_frames, channels)
            .map_err(|err| AudioError::ResamplerCreate(err.to_string()))?;

    let output = resampler
        .process(&planar, None)
        .map_err(|err| AudioError::ResamplerProcess(err.to_string()))?;

    let produced = output.first().map_or(0, Vec::len);
    if produced < skip + expected {
        return Err(AudioError::ResamplerProcess(format!(
            "interpolator produced {produced} frames, needed {}",
            skip + expected
        )));
    }

    let mut result = Vec::with_capacity(expected * channels);
    for frame_idx in skip..skip + expected {
        for channel_output in &output {
            result.push(channel_output[frame_idx]);
        }
    }
    Ok(result)
}

fn encode_mulaw(sample: i16) -> u8 {
    let mut magnitude = i32::from(sample);
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };
    magnitude = magnitude.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

fn decode_mulaw(byte: u8) -> i16 {
    let value = !byte;
    let exponent = (value >> 4) & 0x07;
    let mantissa = i32::from(value & 0x0F);
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if value & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}
