//! Engine configuration.
//!
//! Everything the offline renderer needs besides the MIDI file itself:
//! stream format, synthesizer patch and the settings of the output chain.
//! Stored as pretty JSON; missing fields take their default values.

use crate::audio::synth::{default_patch, Oscillator, OSCILLATORS};
use crate::audio::{DEFAULT_BLOCK_SIZE, DEFAULT_SAMPLE_RATE};
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Settings of the synthesizer the sequencer plays into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Master volume.
    pub volume: f32,
    /// Oscillator slots.
    pub oscillators: [Oscillator; OSCILLATORS],
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            oscillators: default_patch(),
        }
    }
}

/// Settings of the render graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output samples per second.
    pub sample_rate: u32,
    /// Samples per graph evaluation.
    pub block_size: usize,
    /// Seconds rendered after the last MIDI event, for releases to ring out.
    pub tail_seconds: f64,
    /// Synthesizer patch.
    pub synth: SynthConfig,
    /// Low-pass filter coefficient in [0, 1).
    pub lowness: f32,
    /// Output mixer volume.
    pub mixer_volume: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            tail_seconds: 2.0,
            synth: SynthConfig::default(),
            lowness: 0.25,
            mixer_volume: 1.0,
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns error if parsing fails
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Returns the configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or fails validation
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config = Self::from_json(&json)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Writes the configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file writing fails
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json().context("Failed to serialize config")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write config: {}", path.display()))
    }

    /// Checks that the configuration can drive a graph.
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        ensure!(self.sample_rate > 0, "sample_rate must be positive");
        ensure!(self.block_size > 0, "block_size must be positive");
        ensure!(
            self.tail_seconds.is_finite() && self.tail_seconds >= 0.0,
            "tail_seconds must be a non-negative number, got {}",
            self.tail_seconds
        );
        ensure!(
            (0.0..1.0).contains(&self.lowness),
            "lowness must be in [0, 1), got {}",
            self.lowness
        );
        ensure!(
            self.mixer_volume.is_finite() && self.synth.volume.is_finite(),
            "volumes must be finite"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 22050);
        assert_eq!(config.block_size, 1024);
        assert!(config.validate().is_ok());
        assert!(config.synth.oscillators.iter().any(|o| o.audible));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = EngineConfig::from_json(r#"{"sample_rate": 44100}"#).unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.synth, SynthConfig::default());
    }

    #[test]
    fn test_partial_oscillator() {
        let json = r#"{"synth": {"volume": 0.5, "oscillators": [
            {"audible": true, "attack": 0.5},
            {}, {}, {}
        ]}}"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.synth.volume, 0.5);
        let first = config.synth.oscillators[0];
        assert!(first.audible);
        assert_eq!(first.attack, 0.5);
        assert_eq!(first.frequency_multiplier, 1.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig {
            block_size: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        config.block_size = 64;
        config.sample_rate = 0;
        assert!(config.validate().is_err());

        config.sample_rate = 8000;
        config.lowness = 1.0;
        assert!(config.validate().is_err());

        config.lowness = 0.0;
        config.tail_seconds = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let config = EngineConfig {
            lowness: 0.5,
            ..EngineConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_reports_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"block_size": 0}"#).unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("block_size"));

        assert!(EngineConfig::load(dir.path().join("missing.json")).is_err());
    }
}
