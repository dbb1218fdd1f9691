//! Built-in processing modules.
//!
//! These implement the `ProcessingModule` trait just like any externally
//! provided module, so the chain treats them the same way.

pub mod amp;
pub mod drive;

use loopstack_module::ProcessingModule;

/// Create a built-in module by name
///
/// Returns `None` if the name doesn't match any known built-in module.
///
/// # Examples
///
/// ```
/// use loopstack_audio::builtin;
///
/// let drive = builtin::create_builtin("drive").expect("drive module exists");
/// ```
pub fn create_builtin(name: &str) -> Option<Box<dyn ProcessingModule>> {
    match name {
        "drive" => Some(Box::new(drive::DriveModule::default())),
        "amp" => Some(Box::new(amp::AmpSlot::default())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_builtins() {
        let drive = create_builtin("drive").unwrap();
        assert_eq!(drive.info().name, "Drive");
        let amp = create_builtin("amp").unwrap();
        assert_eq!(amp.info().unique_id, "loopstack.builtin.amp");
    }

    #[test]
    fn test_unknown_builtin() {
        assert!(create_builtin("nonexistent").is_none());
    }
}
