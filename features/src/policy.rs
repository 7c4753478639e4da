//! The policy feature: policy rule files.
//!
//! Policies are self-describing (validation runs against the policy
//! directory's own metadata) and provide the schema context for policy
//! tests.

use strata_scheduler::JobKind;
use strata_types::FileName;

use crate::engine::pipeline::FeatureDefinition;

pub const LANGUAGE_ID: &str = "hcl-policy";

#[must_use]
pub fn definition() -> FeatureDefinition {
    FeatureDefinition {
        name: "policy",
        language_id: LANGUAGE_ID,
        file_matches: is_policy_filename,
        parse_kind: JobKind::new("policy.parse"),
        metadata_kind: JobKind::new("policy.load-metadata"),
        ref_targets_kind: JobKind::new("policy.decode-reference-targets"),
        ref_origins_kind: JobKind::new("policy.decode-reference-origins"),
        schema_validation_kind: JobKind::new("policy.schema-validation"),
        ref_validation_kind: JobKind::new("policy.reference-validation"),
    }
}

#[must_use]
pub fn is_policy_filename(name: &FileName) -> bool {
    let n = name.as_str();
    n.ends_with(".policy.hcl") && !n.starts_with('.')
}
