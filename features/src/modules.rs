//! The module feature: plain configuration directories.
//!
//! Modules are the schema providers for the dependent features:
//! variables and config tests validate against module metadata.

use strata_scheduler::JobKind;
use strata_types::FileName;

use crate::engine::pipeline::FeatureDefinition;

pub const LANGUAGE_ID: &str = "hcl";

#[must_use]
pub fn definition() -> FeatureDefinition {
    FeatureDefinition {
        name: "modules",
        language_id: LANGUAGE_ID,
        file_matches: is_module_filename,
        parse_kind: JobKind::new("modules.parse"),
        metadata_kind: JobKind::new("modules.load-metadata"),
        ref_targets_kind: JobKind::new("modules.decode-reference-targets"),
        ref_origins_kind: JobKind::new("modules.decode-reference-origins"),
        schema_validation_kind: JobKind::new("modules.schema-validation"),
        ref_validation_kind: JobKind::new("modules.reference-validation"),
    }
}

/// Any non-hidden `.hcl` file not claimed by a more specific feature.
#[must_use]
pub fn is_module_filename(name: &FileName) -> bool {
    let n = name.as_str();
    n.ends_with(".hcl")
        && !n.starts_with('.')
        && !crate::variables::is_vars_filename(name)
        && !crate::config_tests::is_test_filename(name)
        && !crate::policy::is_policy_filename(name)
        && !crate::policy_tests::is_policy_test_filename(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(name: &str) -> bool {
        is_module_filename(&FileName::new(name))
    }

    #[test]
    fn test_plain_hcl_files_match() {
        assert!(matches("main.hcl"));
        assert!(matches("outputs.hcl"));
    }

    #[test]
    fn test_specialized_suffixes_do_not_match() {
        assert!(!matches("inputs.vars.hcl"));
        assert!(!matches("smoke.test.hcl"));
        assert!(!matches("deny.policy.hcl"));
        assert!(!matches("deny.policytest.hcl"));
    }

    #[test]
    fn test_hidden_and_foreign_files_do_not_match() {
        assert!(!matches(".hidden.hcl"));
        assert!(!matches("README.md"));
        assert!(!matches("main.hcl.bak"));
    }
}
