//! Drive stage - input boost ahead of the amp slot.

use std::sync::Arc;

use loopstack_core::{CHANNELS, Frames, SampleRate};
use loopstack_module::{
    AudioBuffer, ModuleControls, ModuleError, ModuleInfo, ParameterInfo, ProcessingModule,
};

/// Parameter ID of the drive amount
pub const DRIVE: u32 = 0;

/// Linear drive gain applied to both channels
///
/// ## Parameter Range
///
/// Drive: 0.0 to 4.0 (linear)
/// - 0.0 = silence
/// - 1.0 = unity (default)
/// - 4.0 = +12 dB
pub struct DriveModule {
    controls: Arc<ModuleControls>,
    sample_rate: SampleRate,
    info: ModuleInfo,
}

impl Default for DriveModule {
    fn default() -> Self {
        Self {
            controls: ModuleControls::new(vec![ParameterInfo {
                id: DRIVE,
                name: "Drive".to_string(),
                min_value: 0.0,
                max_value: 4.0,
                default_value: 1.0,
            }]),
            sample_rate: 48000,
            info: ModuleInfo {
                name: "Drive".to_string(),
                vendor: "loopstack".to_string(),
                version: "1.0.0".to_string(),
                unique_id: "loopstack.builtin.drive".to_string(),
            },
        }
    }
}

impl DriveModule {
    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }
}

impl ProcessingModule for DriveModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn controls(&self) -> &Arc<ModuleControls> {
        &self.controls
    }

    fn instantiate(&self) -> Box<dyn ProcessingModule> {
        Box::new(Self {
            controls: Arc::clone(&self.controls),
            sample_rate: self.sample_rate,
            info: self.info.clone(),
        })
    }

    fn initialize(
        &mut self,
        sample_rate: SampleRate,
        _max_block_size: Frames,
    ) -> Result<(), ModuleError> {
        self.sample_rate = sample_rate;
        Ok(())
    }

    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), ModuleError> {
        if audio.inputs.len() != CHANNELS || audio.outputs.len() != CHANNELS {
            return Err(ModuleError::ProcessingFailed(format!(
                "Drive requires stereo buffers, got {} in / {} out",
                audio.inputs.len(),
                audio.outputs.len()
            )));
        }

        let drive = self.controls.value_at(0);
        let frames = audio.frames;
        for ch in 0..CHANNELS {
            if audio.inputs[ch].len() < frames || audio.outputs[ch].len() < frames {
                return Err(ModuleError::ProcessingFailed(format!(
                    "Channel {ch} is shorter than {frames} frames"
                )));
            }
            for i in 0..frames {
                audio.outputs[ch][i] = audio.inputs[ch][i] * drive;
            }
        }

        Ok(())
    }
}
