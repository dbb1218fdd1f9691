//! Live looping engine.
//!
//! This crate provides the looper signal graph, the capture pipeline and loop
//! store, the audio-thread processor, the control-thread [`LoopEngine`] and
//! integration with cpal for audio I/O.

pub mod builtin;
pub mod capture;
pub mod chain;
pub mod config;
pub mod device;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod graph;
pub mod looper;
pub mod meter;
pub mod mixer;
pub mod playback;
pub mod processor;
pub mod state;
pub mod store;

pub use chain::ModuleChain;
pub use config::{EngineConfig, GraphConfig, MixSettings, ModeSettings, ProcessingMode};
pub use device::{DeviceInfo, list_input_devices, list_output_devices};
pub use engine::{AudioEngine, InputDevice};
pub use error::{ConfigError, EngineError, GraphError};
pub use graph::{InputSpec, SignalGraph, build_graph};
pub use looper::LoopEngine;
pub use processor::AudioProcessor;
pub use state::{EngineState, Transition};
