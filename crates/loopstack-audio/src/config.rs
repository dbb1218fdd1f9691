//! Engine configuration.
//!
//! Uses RON (Rust Object Notation) for human-readable configuration files.
//! Every field has a default, so a file only needs the values it changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use loopstack_core::{Frames, SampleRate, ms_to_frames};

use crate::error::ConfigError;

/// Input conditioning applied ahead of the processing chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// Unity trim, no filtering
    Raw,
    /// Boosted trim with a low corner for instrument-level signals
    #[default]
    Guitar,
    /// Moderate trim with a higher corner to cut handling rumble
    Voice,
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Raw => "raw",
            Self::Guitar => "guitar",
            Self::Voice => "voice",
        };
        f.write_str(name)
    }
}

impl FromStr for ProcessingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "guitar" => Ok(Self::Guitar),
            "voice" => Ok(Self::Voice),
            other => Err(ConfigError::Invalid(format!(
                "unknown processing mode '{other}'"
            ))),
        }
    }
}

/// The live routing state mutated by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Skip the processing chain entirely
    pub low_latency: bool,
    pub processing_mode: ProcessingMode,
    /// Route the live input to the output
    pub monitor_enabled: bool,
    /// Master output volume, 0.0 to 1.0
    pub master_volume: f32,
    pub active_track: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            low_latency: true,
            processing_mode: ProcessingMode::Guitar,
            monitor_enabled: false,
            master_volume: 0.85,
            active_track: 0,
        }
    }
}

/// Trim and filter settings for one processing mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeSettings {
    /// Linear input trim
    pub trim: f32,
    /// High-pass corner in Hz; `None` disables the filter
    pub high_pass_hz: Option<f32>,
}

/// Settings for every processing mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeTable {
    pub raw: ModeSettings,
    pub guitar: ModeSettings,
    pub voice: ModeSettings,
}

impl ModeTable {
    pub fn get(&self, mode: ProcessingMode) -> ModeSettings {
        match mode {
            ProcessingMode::Raw => self.raw,
            ProcessingMode::Guitar => self.guitar,
            ProcessingMode::Voice => self.voice,
        }
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        Self {
            raw: ModeSettings {
                trim: 1.0,
                high_pass_hz: None,
            },
            guitar: ModeSettings {
                trim: 2.6,
                high_pass_hz: Some(40.0),
            },
            voice: ModeSettings {
                trim: 1.4,
                high_pass_hz: Some(100.0),
            },
        }
    }
}

/// Weights used when layering an overdub onto a loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixSettings {
    /// Attenuation applied to the existing loop
    pub base_weight: f32,
    /// Gain applied to the new layer
    pub overdub_weight: f32,
    /// Absolute sample limit of the result
    pub clamp_limit: f32,
}

impl Default for MixSettings {
    fn default() -> Self {
        Self {
            base_weight: 0.9,
            overdub_weight: 0.6,
            clamp_limit: 0.95,
        }
    }
}

/// A built-in module to place in the processing chain at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Built-in name, see [`crate::builtin::create_builtin`]
    pub name: String,
    #[serde(default)]
    pub bypassed: bool,
    /// Parameter ID -> value
    #[serde(default)]
    pub parameters: BTreeMap<u32, f32>,
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: SampleRate,
    /// Maximum frames rendered per graph pass
    pub block_size: Frames,
    /// Number of independently loopable tracks
    pub track_count: usize,
    /// Capture queue length between the audio and control threads
    pub capture_queue_seconds: f32,
    /// Recordings stop on their own at this length
    pub max_loop_seconds: f32,
    /// Delay between scheduling playback and its first frame
    pub playback_start_offset_ms: f32,
    /// Time constant of gain changes
    pub gain_smoothing_ms: f32,
    /// Minimum interval between level notifications
    pub meter_interval_ms: f32,
    /// Crossfade one block when a rebuilt graph is installed
    pub crossfade_graph_swaps: bool,
    /// Level of loop playback into the master sum
    pub loop_mix_level: f32,
    pub mix: MixSettings,
    pub modes: ModeTable,
    /// Initial routing state
    pub graph: GraphConfig,
    /// Initial processing chain, in order
    pub modules: Vec<ModuleSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_size: 256,
            track_count: 2,
            capture_queue_seconds: 2.0,
            max_loop_seconds: 120.0,
            playback_start_offset_ms: 10.0,
            gain_smoothing_ms: 10.0,
            meter_interval_ms: 16.0,
            crossfade_graph_swaps: true,
            loop_mix_level: 1.0,
            mix: MixSettings::default(),
            modes: ModeTable::default(),
            graph: GraphConfig::default(),
            modules: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Check ranges that the engine relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be positive".into()));
        }
        if self.track_count == 0 {
            return Err(ConfigError::Invalid("track_count must be at least 1".into()));
        }
        if self.graph.active_track >= self.track_count {
            return Err(ConfigError::Invalid(format!(
                "active_track {} out of range for {} tracks",
                self.graph.active_track, self.track_count
            )));
        }
        if !(0.0..=1.0).contains(&self.graph.master_volume) {
            return Err(ConfigError::Invalid("master_volume must be within 0..=1".into()));
        }
        if self.max_loop_seconds <= 0.0 {
            return Err(ConfigError::Invalid("max_loop_seconds must be positive".into()));
        }
        let mix = &self.mix;
        if mix.base_weight < 0.0 || mix.overdub_weight < 0.0 {
            return Err(ConfigError::Invalid("mix weights must not be negative".into()));
        }
        if mix.clamp_limit <= 0.0 || mix.clamp_limit > 1.0 {
            return Err(ConfigError::Invalid("clamp_limit must be within (0, 1]".into()));
        }
        for (name, settings) in [
            ("raw", self.modes.raw),
            ("guitar", self.modes.guitar),
            ("voice", self.modes.voice),
        ] {
            if settings.trim < 0.0 {
                return Err(ConfigError::Invalid(format!("{name} trim must not be negative")));
            }
            if let Some(hz) = settings.high_pass_hz {
                if hz <= 0.0 || hz >= self.sample_rate as f32 / 2.0 {
                    return Err(ConfigError::Invalid(format!(
                        "{name} high-pass corner {hz} Hz is outside (0, Nyquist)"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Playback start offset in frames; never zero.
    pub fn playback_offset_frames(&self) -> u64 {
        ms_to_frames(self.playback_start_offset_ms, self.sample_rate).max(1) as u64
    }

    pub fn max_loop_frames(&self) -> Frames {
        (self.max_loop_seconds * self.sample_rate as f32) as Frames
    }

    /// Save configuration to a RON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::SerializationFailed(e.to_string()))?;

        std::fs::write(path.as_ref(), ron_string)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Load configuration from a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let ron_string = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Self = ron::from_str(&ron_string)
            .map_err(|e| ConfigError::DeserializationFailed(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.block_size, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_playback_offset_is_positive() {
        let config = EngineConfig {
            playback_start_offset_ms: 0.0,
            ..EngineConfig::default()
        };
        assert_eq!(config.playback_offset_frames(), 1);
        assert_eq!(EngineConfig::default().playback_offset_frames(), 480);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let no_tracks = EngineConfig {
            track_count: 0,
            ..EngineConfig::default()
        };
        assert!(no_tracks.validate().is_err());

        let mut loud = EngineConfig::default();
        loud.mix.clamp_limit = 1.5;
        assert!(loud.validate().is_err());

        let mut bad_track = EngineConfig::default();
        bad_track.graph.active_track = 2;
        assert!(bad_track.validate().is_err());

        let mut bad_corner = EngineConfig::default();
        bad_corner.modes.voice.high_pass_hz = Some(30_000.0);
        assert!(bad_corner.validate().is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Guitar".parse::<ProcessingMode>().unwrap(), ProcessingMode::Guitar);
        assert_eq!("raw".parse::<ProcessingMode>().unwrap(), ProcessingMode::Raw);
        assert!("fuzz".parse::<ProcessingMode>().is_err());
        assert_eq!(ProcessingMode::Voice.to_string(), "voice");
    }

    #[test]
    fn test_mode_table_lookup() {
        let table = ModeTable::default();
        assert_eq!(table.get(ProcessingMode::Raw).high_pass_hz, None);
        assert!(table.get(ProcessingMode::Guitar).trim > table.get(ProcessingMode::Voice).trim);
        assert!(
            table.get(ProcessingMode::Guitar).high_pass_hz.unwrap()
                < table.get(ProcessingMode::Voice).high_pass_hz.unwrap()
        );
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let mut config = EngineConfig {
            track_count: 4,
            ..EngineConfig::default()
        };
        config.graph.processing_mode = ProcessingMode::Voice;
        config.modules.push(ModuleSpec {
            name: "drive".to_string(),
            bypassed: true,
            parameters: BTreeMap::from([(0, 1.5)]),
        });

        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();
        let loaded = EngineConfig::load(file.path()).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "(track_count: 3, graph: (monitor_enabled: true))").unwrap();

        let loaded = EngineConfig::load(file.path()).unwrap();
        assert_eq!(loaded.track_count, 3);
        assert!(loaded.graph.monitor_enabled);
        assert_eq!(loaded.sample_rate, 48000);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "(block_size: 0)").unwrap();
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(file.path(), "not ron at all {").unwrap();
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(ConfigError::DeserializationFailed(_))
        ));
    }
}
