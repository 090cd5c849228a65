pub mod config_patch;
mod target_selector;

pub use config_patch::{patch_upstream, PatchOutcome};
pub use target_selector::TargetSelector;
