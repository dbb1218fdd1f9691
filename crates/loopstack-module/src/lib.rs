//! Processing module abstraction.
//!
//! This crate defines the `ProcessingModule` trait implemented by every unit
//! that can sit in the engine's processing chain. The engine only ever sees
//! trait objects, so built-in effects and future model-backed modules are
//! interchangeable.
//!
//! Parameters and the bypass flag live in a shared [`ModuleControls`] block
//! of atomics. The control thread keeps a prototype of each module and
//! adjusts it; the graph running on the audio thread holds fresh instances
//! created with [`ProcessingModule::instantiate`] that read the same controls.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use loopstack_core::{ChannelCount, Frames, Sample, SampleRate};

/// Audio buffer for processing
pub struct AudioBuffer<'a> {
    pub inputs: &'a [&'a [Sample]],
    pub outputs: &'a mut [&'a mut [Sample]],
    pub frames: Frames,
}

impl AudioBuffer<'_> {
    /// Copy inputs to outputs unchanged.
    pub fn pass_through(&mut self) {
        let frames = self.frames;
        for (input, output) in self.inputs.iter().zip(self.outputs.iter_mut()) {
            output[..frames].copy_from_slice(&input[..frames]);
        }
    }
}

/// Information about a parameter
#[derive(Debug, Clone)]
pub struct ParameterInfo {
    pub id: u32,
    pub name: String,
    pub min_value: f32,
    pub max_value: f32,
    pub default_value: f32,
}

/// Module metadata
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub unique_id: String,
}

/// Parameter values and bypass flag shared between a module's prototype and
/// its running instances.
///
/// Values are stored as `f32` bits in atomics, so reads on the audio thread
/// never block and writes from the control thread are visible on the next
/// processed block.
#[derive(Debug)]
pub struct ModuleControls {
    bypassed: AtomicBool,
    values: Box<[AtomicU32]>,
    parameters: Vec<ParameterInfo>,
}

impl ModuleControls {
    /// Create controls for the given parameters, each at its default value.
    pub fn new(parameters: Vec<ParameterInfo>) -> Arc<Self> {
        let values = parameters
            .iter()
            .map(|p| AtomicU32::new(p.default_value.to_bits()))
            .collect();
        Arc::new(Self {
            bypassed: AtomicBool::new(false),
            values,
            parameters,
        })
    }

    pub fn parameters(&self) -> &[ParameterInfo] {
        &self.parameters
    }

    fn index_of(&self, id: u32) -> Result<usize, ModuleError> {
        self.parameters
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| ModuleError::InvalidParameter(format!("Unknown parameter ID: {id}")))
    }

    /// Set a parameter, clamped to its declared range.
    pub fn set(&self, id: u32, value: f32) -> Result<(), ModuleError> {
        let index = self.index_of(id)?;
        let info = &self.parameters[index];
        let clamped = value.clamp(info.min_value, info.max_value);
        self.values[index].store(clamped.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn get(&self, id: u32) -> Result<f32, ModuleError> {
        let index = self.index_of(id)?;
        Ok(f32::from_bits(self.values[index].load(Ordering::Acquire)))
    }

    /// Read a parameter by position without bounds errors (audio thread).
    pub fn value_at(&self, index: usize) -> f32 {
        self.values
            .get(index)
            .map_or(0.0, |v| f32::from_bits(v.load(Ordering::Acquire)))
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Acquire)
    }

    pub fn set_bypassed(&self, bypassed: bool) {
        self.bypassed.store(bypassed, Ordering::Release);
    }
}

/// A unit with one stereo input and one stereo output that can be chained
/// in series inside the signal graph.
pub trait ProcessingModule: Send {
    /// Get module information
    fn info(&self) -> &ModuleInfo;

    /// Shared parameter and bypass state
    fn controls(&self) -> &Arc<ModuleControls>;

    /// Create a fresh instance (clean DSP state) bound to the same controls.
    fn instantiate(&self) -> Box<dyn ProcessingModule>;

    /// Initialize the module with sample rate and max block size
    fn initialize(
        &mut self,
        sample_rate: SampleRate,
        max_block_size: Frames,
    ) -> Result<(), ModuleError>;

    /// Process audio. Only called when the module is not bypassed.
    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), ModuleError>;

    /// Get number of input channels
    fn input_channels(&self) -> ChannelCount {
        loopstack_core::CHANNELS
    }

    /// Get number of output channels
    fn output_channels(&self) -> ChannelCount {
        loopstack_core::CHANNELS
    }

    /// Set a parameter value (thread-safe, can be called from the control thread)
    fn set_parameter(&self, id: u32, value: f32) -> Result<(), ModuleError> {
        self.controls().set(id, value)
    }

    /// Get a parameter value
    fn get_parameter(&self, id: u32) -> Result<f32, ModuleError> {
        self.controls().get(id)
    }

    /// Get all parameters
    fn parameters(&self) -> Vec<ParameterInfo> {
        self.controls().parameters().to_vec()
    }

    fn set_bypass(&self, bypassed: bool) {
        self.controls().set_bypassed(bypassed);
    }

    fn is_bypassed(&self) -> bool {
        self.controls().is_bypassed()
    }
}

/// Module-related errors
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("Module initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Module processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level_param() -> ParameterInfo {
        ParameterInfo {
            id: 3,
            name: "Level".to_string(),
            min_value: 0.0,
            max_value: 2.0,
            default_value: 1.0,
        }
    }

    #[test]
    fn test_controls_defaults_and_clamping() {
        let controls = ModuleControls::new(vec![level_param()]);
        assert_eq!(controls.get(3).unwrap(), 1.0);

        controls.set(3, 5.0).unwrap();
        assert_eq!(controls.get(3).unwrap(), 2.0);

        controls.set(3, -1.0).unwrap();
        assert_eq!(controls.value_at(0), 0.0);
    }

    #[test]
    fn test_controls_unknown_parameter() {
        let controls = ModuleControls::new(vec![level_param()]);
        assert!(controls.set(0, 1.0).is_err());
        assert!(controls.get(99).is_err());
        assert_eq!(controls.value_at(7), 0.0);
    }

    #[test]
    fn test_bypass_flag() {
        let controls = ModuleControls::new(Vec::new());
        assert!(!controls.is_bypassed());
        controls.set_bypassed(true);
        assert!(controls.is_bypassed());
    }

    #[test]
    fn test_pass_through() {
        let left = [0.1, 0.2];
        let right = [0.3, 0.4];
        let mut out_l = [0.0; 2];
        let mut out_r = [0.0; 2];

        let inputs: [&[f32]; 2] = [&left, &right];
        let mut outputs: [&mut [f32]; 2] = [&mut out_l, &mut out_r];
        let mut audio = AudioBuffer {
            inputs: &inputs,
            outputs: &mut outputs,
            frames: 2,
        };
        audio.pass_through();

        assert_eq!(out_l, left);
        assert_eq!(out_r, right);
    }
}
