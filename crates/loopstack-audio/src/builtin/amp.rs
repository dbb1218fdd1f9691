//! Amp model slot.
//!
//! Holds the place of an amp model in the chain and passes audio through
//! at the configured output level.

use std::sync::Arc;

use loopstack_core::{CHANNELS, Frames, SampleRate};
use loopstack_module::{
    AudioBuffer, ModuleControls, ModuleError, ModuleInfo, ParameterInfo, ProcessingModule,
};

/// Parameter ID of the output level
pub const LEVEL: u32 = 0;

pub struct AmpSlot {
    controls: Arc<ModuleControls>,
    info: ModuleInfo,
}

impl Default for AmpSlot {
    fn default() -> Self {
        Self {
            controls: ModuleControls::new(vec![ParameterInfo {
                id: LEVEL,
                name: "Level".to_string(),
                min_value: 0.0,
                max_value: 2.0,
                default_value: 1.0,
            }]),
            info: ModuleInfo {
                name: "Amp".to_string(),
                vendor: "loopstack".to_string(),
                version: "1.0.0".to_string(),
                unique_id: "loopstack.builtin.amp".to_string(),
            },
        }
    }
}

impl ProcessingModule for AmpSlot {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn controls(&self) -> &Arc<ModuleControls> {
        &self.controls
    }

    fn instantiate(&self) -> Box<dyn ProcessingModule> {
        Box::new(Self {
            controls: Arc::clone(&self.controls),
            info: self.info.clone(),
        })
    }

    fn initialize(
        &mut self,
        _sample_rate: SampleRate,
        _max_block_size: Frames,
    ) -> Result<(), ModuleError> {
        Ok(())
    }

    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), ModuleError> {
        if audio.inputs.len() != CHANNELS || audio.outputs.len() != CHANNELS {
            return Err(ModuleError::ProcessingFailed(
                "Amp slot requires stereo buffers".to_string(),
            ));
        }

        let level = self.controls.value_at(0);
        let frames = audio.frames;
        for (input, output) in audio.inputs.iter().zip(audio.outputs.iter_mut()) {
            for (o, i) in output[..frames].iter_mut().zip(&input[..frames]) {
                *o = i * level;
            }
        }
        Ok(())
    }
}
