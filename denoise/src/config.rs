use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::Provider;
use crate::error::SetupError;

pub const PROVIDER_OPTION_KEY: &str = "microphone.denoising.provider";
pub const SKIP_WARMUP_FRAME_OPTION_KEY: &str = "microphone.denoising.skip_warmup_frame";
const PROVIDER_ENV_VAR: &str = "MICROPHONE_DENOISING_PROVIDER";
const SKIP_WARMUP_FRAME_ENV_VAR: &str = "MICROPHONE_DENOISING_SKIP_WARMUP_FRAME";

/// Denoising options of a voice session, keyed by their dotted option names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenoiseOptions {
    #[serde(rename = "microphone.denoising.provider", default)]
    pub provider: String,
    #[serde(rename = "microphone.denoising.skip_warmup_frame", default)]
    pub skip_warmup_frame: bool,
}

impl DenoiseOptions {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (key, value) in pairs {
            options.apply(key.as_ref(), value.as_ref());
        }
        options
    }

    pub fn from_json(content: &str) -> Result<Self, SetupError> {
        serde_json::from_str::<Self>(content).map_err(|err| SetupError::ConfigParse(err.to_string()))
    }

    /// Reads options from a JSON file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, SetupError> {
        if !path.exists() {
            debug!(path = %path.display(), "denoise config not found; using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|err| SetupError::ConfigRead(format!("{}: {err}", path.display())))?;
        Self::from_json(&content)
    }

    pub fn with_env_overrides(mut self) -> Self {
        for (env_name, key) in [
            (PROVIDER_ENV_VAR, PROVIDER_OPTION_KEY),
            (SKIP_WARMUP_FRAME_ENV_VAR, SKIP_WARMUP_FRAME_OPTION_KEY),
        ] {
            if let Ok(value) = std::env::var(env_name) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    self.apply(key, trimmed);
                }
            }
        }
        self
    }

    pub fn provider(&self) -> Provider {
        Provider::from_identifier(&self.provider)
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            PROVIDER_OPTION_KEY => self.provider = value.to_string(),
            SKIP_WARMUP_FRAME_OPTION_KEY => match parse_flag(value) {
                Some(flag) => self.skip_warmup_frame = flag,
                None => {
                    warn!(key, value, "denoise option is not a boolean; resetting to default");
                    self.skip_warmup_frame = false;
                }
            },
            other => debug!(key = other, "ignoring unrelated option"),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
