//! Ordered processing chain held on the control thread.
//!
//! The chain owns module prototypes. Every graph build instantiates fresh
//! copies, so the graph on the audio thread never shares DSP state with
//! the prototypes, only their parameter controls.

use loopstack_module::ProcessingModule;

use crate::builtin::create_builtin;
use crate::config::ModuleSpec;
use crate::error::ConfigError;

#[derive(Default)]
pub struct ModuleChain {
    modules: Vec<Box<dyn ProcessingModule>>,
}

impl ModuleChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the chain described by configuration, applying bypass and
    /// parameter values.
    pub fn from_specs(specs: &[ModuleSpec]) -> Result<Self, ConfigError> {
        let mut chain = Self::new();
        for spec in specs {
            let module = create_builtin(&spec.name)
                .ok_or_else(|| ConfigError::UnknownModule(spec.name.clone()))?;
            module.set_bypass(spec.bypassed);
            for (&id, &value) in &spec.parameters {
                module
                    .set_parameter(id, value)
                    .map_err(|e| ConfigError::Invalid(format!("{}: {e}", spec.name)))?;
            }
            chain.push(module);
        }
        Ok(chain)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&dyn ProcessingModule> {
        self.modules.get(index).map(AsRef::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ProcessingModule> {
        self.modules.iter().map(AsRef::as_ref)
    }

    pub fn push(&mut self, module: Box<dyn ProcessingModule>) {
        self.modules.push(module);
    }

    /// Insert at `index`, clamped to the end of the chain. Returns the
    /// position the module ended up at.
    pub fn insert(&mut self, index: usize, module: Box<dyn ProcessingModule>) -> usize {
        let index = index.min(self.modules.len());
        self.modules.insert(index, module);
        index
    }

    pub fn remove(&mut self, index: usize) -> Option<Box<dyn ProcessingModule>> {
        (index < self.modules.len()).then(|| self.modules.remove(index))
    }

    /// Names of the modules, in order
    pub fn names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.info().name.clone()).collect()
    }
}
