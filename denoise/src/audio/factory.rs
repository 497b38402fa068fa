use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::AudioError;
use super::denoiser::{Denoiser, KrispDenoiser, RnNoiseDenoiser};
use super::format::AudioFormat;
use crate::config::DenoiseOptions;

pub const RN_NOISE_IDENTIFIER: &str = "rn_noise";
pub const KRISP_IDENTIFIER: &str = "krisp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Provider {
    #[default]
    #[serde(rename = "rn_noise")]
    RnNoise,
    #[serde(rename = "krisp")]
    Krisp,
}

impl Provider {
    /// Resolves a configured identifier. Matching is exact; anything
    /// unrecognised selects the default provider.
    pub fn from_identifier(identifier: &str) -> Self {
        match identifier {
            RN_NOISE_IDENTIFIER => Self::RnNoise,
            KRISP_IDENTIFIER => Self::Krisp,
            other => {
                if !other.is_empty() {
                    warn!(
                        provider = other,
                        fallback = RN_NOISE_IDENTIFIER,
                        "unknown denoising provider; using default"
                    );
                }
                Self::default()
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RnNoise => RN_NOISE_IDENTIFIER,
            Self::Krisp => KRISP_IDENTIFIER,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the denoiser for one session.
///
/// Unknown, empty or differently-cased identifiers fall back to RNNoise.
/// Construction succeeds for every provider, including ones whose
/// processing is unavailable in this build.
pub fn get_denoiser(
    provider_identifier: &str,
    input_format: AudioFormat,
    options: &DenoiseOptions,
) -> Result<Denoiser, AudioError> {
    let provider = Provider::from_identifier(provider_identifier);
    debug!(
        provider = %provider,
        input_format = %input_format,
        "creating session denoiser"
    );

    match provider {
        Provider::RnNoise => Ok(Denoiser::RnNoise(RnNoiseDenoiser::new(
            input_format,
            options,
        )?)),
        Provider::Krisp => Ok(Denoiser::Krisp(KrispDenoiser::new(input_format))),
    }
}

/// Same as [`get_denoiser`] with the provider taken from
/// `microphone.denoising.provider`.
pub fn denoiser_from_options(
    input_format: AudioFormat,
    options: &DenoiseOptions,
) -> Result<Denoiser, AudioError> {
    get_denoiser(&options.provider, input_format, options)
}
