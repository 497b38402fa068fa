use std::fmt;

use serde::{Deserialize, Serialize};

use super::AudioError;
use super::engine::ENGINE_SAMPLE_RATE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioEncoding {
    Unspecified,
    Linear16,
    Float32,
    #[serde(rename = "MULAW")]
    MuLaw,
}

impl AudioEncoding {
    /// Bytes per sample, or `None` when the encoding cannot be processed.
    pub fn sample_width(self) -> Option<usize> {
        match self {
            Self::Linear16 => Some(2),
            Self::Float32 => Some(4),
            Self::MuLaw => Some(1),
            Self::Unspecified => None,
        }
    }
}

impl fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::Linear16 => "LINEAR16",
            Self::Float32 => "FLOAT32",
            Self::MuLaw => "MULAW",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate_hz: u32,
    pub encoding: AudioEncoding,
    pub channels: u8,
}

impl AudioFormat {
    /// The only layout the noise engine accepts.
    pub const ENGINE: Self = Self {
        sample_rate_hz: ENGINE_SAMPLE_RATE,
        encoding: AudioEncoding::Linear16,
        channels: 1,
    };

    pub const fn new(sample_rate_hz: u32, encoding: AudioEncoding, channels: u8) -> Self {
        Self {
            sample_rate_hz,
            encoding,
            channels,
        }
    }

    pub const fn linear16_mono(sample_rate_hz: u32) -> Self {
        Self::new(sample_rate_hz, AudioEncoding::Linear16, 1)
    }

    pub fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate_hz == 0 {
            return Err(AudioError::Format(format!(
                "sample rate must be greater than 0 in {self}"
            )));
        }
        if self.channels == 0 {
            return Err(AudioError::Format(format!(
                "channels must be greater than 0 in {self}"
            )));
        }
        if self.encoding.sample_width().is_none() {
            return Err(AudioError::Format(format!(
                "unsupported encoding {}",
                self.encoding
            )));
        }
        Ok(())
    }

    /// Bytes per interleaved frame (one sample per channel).
    pub fn frame_width(&self) -> Result<usize, AudioError> {
        self.validate()?;
        let sample_width = self
            .encoding
            .sample_width()
            .ok_or_else(|| AudioError::Format(format!("unsupported encoding {}", self.encoding)))?;
        Ok(sample_width * usize::from(self.channels))
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}/{}ch",
            self.sample_rate_hz, self.encoding, self.channels
        )
    }
}
