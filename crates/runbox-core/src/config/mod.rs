//! Process configuration: engine limits, server binding, sink target and extra languages.

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::*;
