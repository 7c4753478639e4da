//! The variables feature: variable definition files.
//!
//! Validation resolves its schema from the module feature's metadata
//! for the same directory; a variables file with no sibling module
//! validates against a permissive schema.

use strata_scheduler::JobKind;
use strata_types::FileName;

use crate::engine::pipeline::FeatureDefinition;

pub const LANGUAGE_ID: &str = "hcl-vars";

#[must_use]
pub fn definition() -> FeatureDefinition {
    FeatureDefinition {
        name: "variables",
        language_id: LANGUAGE_ID,
        file_matches: is_vars_filename,
        parse_kind: JobKind::new("variables.parse"),
        metadata_kind: JobKind::new("variables.load-metadata"),
        ref_targets_kind: JobKind::new("variables.decode-reference-targets"),
        ref_origins_kind: JobKind::new("variables.decode-reference-origins"),
        schema_validation_kind: JobKind::new("variables.schema-validation"),
        ref_validation_kind: JobKind::new("variables.reference-validation"),
    }
}

#[must_use]
pub fn is_vars_filename(name: &FileName) -> bool {
    let n = name.as_str();
    n.ends_with(".vars.hcl") && !n.starts_with('.')
}
