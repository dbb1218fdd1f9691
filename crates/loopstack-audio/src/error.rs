//! Error types for the audio engine.

use loopstack_core::SampleRate;
use loopstack_module::ModuleError;

/// Signal graph construction errors
///
/// A failed build never replaces the graph that is currently rendering.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Unsupported input stream: {0}")]
    UnsupportedInput(String),

    #[error("Input runs at {actual} Hz but the engine runs at {expected} Hz")]
    SampleRateMismatch {
        expected: SampleRate,
        actual: SampleRate,
    },

    #[error("Module {name} must be stereo in/out, has {inputs} inputs and {outputs} outputs")]
    UnsupportedModule {
        name: String,
        inputs: usize,
        outputs: usize,
    },

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("Node {0} not found")]
    UnknownNode(usize),

    #[error("Graph contains a cycle involving: {0:?}")]
    Cycle(Vec<String>),

    #[error("Node {0} is not on a path from a source to the output")]
    Orphaned(String),

    #[error("Graph has no output node")]
    MissingOutput,
}

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown built-in module: {0}")]
    UnknownModule(String),
}

/// Errors reported by the engine to its orchestrator
///
/// Commands that are merely invalid for the current state are not errors;
/// they return `false` instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An input stream or output sink could not be acquired
    #[error("Audio device unavailable: {0}")]
    Acquisition(String),

    /// The graph could not be rebuilt; the previous graph keeps running
    #[error("Graph rebuild failed: {0}")]
    Graph(#[from] GraphError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("No module at chain position {0}")]
    InvalidModule(usize),

    #[error("Audio command queue is full")]
    QueueFull,
}
