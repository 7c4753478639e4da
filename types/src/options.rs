//! Runtime options handed over by the editor-facing layer at
//! initialization.

use serde::Deserialize;

/// Options captured once at startup.
///
/// Features capture the validation flag when a pipeline starts; a flag
/// change never affects chains already in flight.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Options {
    /// Enables the schema- and reference-validation pipeline stages.
    #[serde(default)]
    pub enable_enhanced_validation: bool,
    /// Overrides the CPU-derived worker count of the high-priority
    /// scheduler. `None` keeps the default.
    #[serde(default)]
    pub parallelism: Option<usize>,
}
