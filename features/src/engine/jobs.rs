//! Pipeline stage implementations, shared by every feature.
//!
//! Each stage advances its own progress marker past `Loading` even on
//! failure, records errors on the record, and returns them so the
//! continuation can decide whether downstream stages still make sense.

use std::time::Duration;

use strata_scheduler::JobCtx;
use strata_types::{
    Diagnostic, DiagnosticSource, DirHandle, FileDiagnostics, FileName, Metadata, OpState,
};

use crate::api::{ParsedFiles, ReadOnlyFs, SchemaDecoder};
use crate::engine::store::FeatureStore;

/// Bound on cross-feature readiness waits; a slow cooperating feature
/// must not stall validation indefinitely.
pub(crate) const SCHEMA_WAIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Parse the directory's relevant files into AST handles.
///
/// Directory-wide on first sight; single-file when the triggering event
/// names a file that is already parsed. The single-file path leaves
/// every sibling's artifact and diagnostics bucket untouched, which is
/// what keeps large directories cheap under frequent single-file edits.
pub(crate) fn parse(
    ctx: &JobCtx,
    fs: &dyn ReadOnlyFs,
    decoder: &dyn SchemaDecoder,
    store: &FeatureStore,
    file_matches: fn(&FileName) -> bool,
    dir: &DirHandle,
    changed_file: Option<&FileName>,
) -> anyhow::Result<()> {
    let record = store.get(dir)?;
    store.set_diagnostics_state(dir, DiagnosticSource::HclParsing, OpState::Loading)?;

    let single_file = changed_file.filter(|file| record.parsed_files.contains_key(*file));

    if let Some(file) = single_file {
        let mut files = record.parsed_files.clone();
        let mut bucket = record
            .diagnostics
            .bucket(DiagnosticSource::HclParsing)
            .cloned()
            .unwrap_or_default();

        match fs.read_file(&dir.file(file)) {
            Ok(src) => {
                let outcome = decoder.parse(file, &src);
                files.insert(file.clone(), outcome.ast);
                bucket.insert(file.clone(), outcome.diagnostics);
            }
            Err(err) => {
                bucket.insert(
                    file.clone(),
                    vec![Diagnostic::file_error(format!("failed to read {file}: {err}"))],
                );
            }
        }

        store.update_parsed_files(dir, files, None)?;
        store.update_diagnostics(dir, DiagnosticSource::HclParsing, bucket)?;
        return Ok(());
    }

    let names = match fs.read_dir(dir.path()) {
        Ok(names) => names,
        Err(err) => {
            // The stage still advances so it can be retried by the next
            // event rather than sticking in Loading.
            store.update_parsed_files(dir, ParsedFiles::new(), Some(err.to_string()))?;
            store.update_diagnostics(dir, DiagnosticSource::HclParsing, FileDiagnostics::new())?;
            return Err(err.into());
        }
    };

    let mut files = ParsedFiles::new();
    let mut bucket = FileDiagnostics::new();
    for name in names.into_iter().filter(|name| file_matches(name)) {
        if ctx.is_cancelled() {
            anyhow::bail!("parse of {dir} cancelled");
        }
        match fs.read_file(&dir.file(&name)) {
            Ok(src) => {
                let outcome = decoder.parse(&name, &src);
                files.insert(name.clone(), outcome.ast);
                bucket.insert(name, outcome.diagnostics);
            }
            Err(err) => {
                // One unreadable file must not block its siblings.
                bucket.insert(
                    name.clone(),
                    vec![Diagnostic::file_error(format!("failed to read {name}: {err}"))],
                );
            }
        }
    }

    store.update_parsed_files(dir, files, None)?;
    store.update_diagnostics(dir, DiagnosticSource::HclParsing, bucket)?;
    Ok(())
}

/// Extract schema-picking metadata from the parsed artifacts.
///
/// A failure is recorded but does not block downstream stages; they do
/// best-effort work against a default schema.
pub(crate) fn load_metadata(
    decoder: &dyn SchemaDecoder,
    store: &FeatureStore,
    dir: &DirHandle,
) -> anyhow::Result<()> {
    let record = store.get(dir)?;
    store.set_metadata_state(dir, OpState::Loading)?;

    match decoder.load_metadata(&record.parsed_files) {
        Ok(metadata) => {
            store.update_metadata(dir, metadata, None)?;
            Ok(())
        }
        Err(err) => {
            store.update_metadata(dir, Metadata::default(), Some(err.to_string()))?;
            Err(err)
        }
    }
}

pub(crate) fn decode_reference_targets(
    decoder: &dyn SchemaDecoder,
    store: &FeatureStore,
    dir: &DirHandle,
) -> anyhow::Result<()> {
    let record = store.get(dir)?;
    store.set_reference_targets_state(dir, OpState::Loading)?;

    match decoder.reference_targets(&record.parsed_files, &record.metadata) {
        Ok(targets) => {
            store.update_reference_targets(dir, targets, None)?;
            Ok(())
        }
        Err(err) => {
            store.update_reference_targets(dir, Vec::new(), Some(err.to_string()))?;
            Err(err)
        }
    }
}

pub(crate) fn decode_reference_origins(
    decoder: &dyn SchemaDecoder,
    store: &FeatureStore,
    dir: &DirHandle,
) -> anyhow::Result<()> {
    let record = store.get(dir)?;
    store.set_reference_origins_state(dir, OpState::Loading)?;

    match decoder.reference_origins(&record.parsed_files, &record.metadata) {
        Ok(origins) => {
            store.update_reference_origins(dir, origins, None)?;
            Ok(())
        }
        Err(err) => {
            store.update_reference_origins(dir, Vec::new(), Some(err.to_string()))?;
            Err(err)
        }
    }
}

/// Resolve the schema context for validation.
///
/// Features linked to a schema-providing feature wait (bounded) for that
/// feature's metadata; no record or a timed-out wait falls back to
/// `None`, which the decoder treats as a permissive schema with zero
/// attributes.
async fn resolve_schema(
    store: &FeatureStore,
    schema_store: Option<&FeatureStore>,
    dir: &DirHandle,
) -> anyhow::Result<Option<Metadata>> {
    let Some(schema_store) = schema_store else {
        // Self-describing feature: validate against its own metadata.
        return Ok(Some(store.get(dir)?.metadata.clone()));
    };

    if !schema_store.exists(dir) {
        return Ok(None);
    }
    match schema_store.metadata_ready(dir, SCHEMA_WAIT_TIMEOUT).await {
        Ok(()) => Ok(Some(schema_store.get(dir)?.metadata.clone())),
        Err(err) => {
            tracing::warn!(
                %dir, schema_feature = schema_store.name(), error = %err,
                "schema metadata not ready; validating against permissive schema"
            );
            Ok(None)
        }
    }
}

/// Validate parsed files against the schema. Mirrors parse's
/// full-vs-single-file granularity.
pub(crate) async fn schema_validation(
    ctx: &JobCtx,
    decoder: &dyn SchemaDecoder,
    store: &FeatureStore,
    schema_store: Option<&FeatureStore>,
    dir: &DirHandle,
    changed_file: Option<&FileName>,
) -> anyhow::Result<()> {
    let record = store.get(dir)?;
    store.set_diagnostics_state(dir, DiagnosticSource::SchemaValidation, OpState::Loading)?;

    let schema = resolve_schema(store, schema_store, dir).await?;

    let single_file = changed_file.filter(|file| record.parsed_files.contains_key(*file));
    let mut bucket = if single_file.is_some() {
        record
            .diagnostics
            .bucket(DiagnosticSource::SchemaValidation)
            .cloned()
            .unwrap_or_default()
    } else {
        FileDiagnostics::new()
    };

    for (file, ast) in &record.parsed_files {
        if let Some(single) = single_file
            && single != file
        {
            continue;
        }
        if ctx.is_cancelled() {
            anyhow::bail!("validation of {dir} cancelled");
        }
        bucket.insert(file.clone(), decoder.validate_file(file, ast, schema.as_ref()));
    }

    store.update_diagnostics(dir, DiagnosticSource::SchemaValidation, bucket)?;
    Ok(())
}

/// Flag reference origins with no matching target.
pub(crate) fn reference_validation(
    store: &FeatureStore,
    schema_store: Option<&FeatureStore>,
    dir: &DirHandle,
) -> anyhow::Result<()> {
    let record = store.get(dir)?;
    store.set_diagnostics_state(dir, DiagnosticSource::ReferenceValidation, OpState::Loading)?;

    let mut targets: Vec<&str> = record
        .ref_targets
        .iter()
        .map(|t| t.address.as_str())
        .collect();
    let schema_record = schema_store.and_then(|s| s.get(dir).ok());
    if let Some(schema_record) = &schema_record {
        targets.extend(schema_record.ref_targets.iter().map(|t| t.address.as_str()));
    }

    let mut bucket = FileDiagnostics::new();
    for origin in &record.ref_origins {
        if targets.contains(&origin.address.as_str()) {
            continue;
        }
        bucket
            .entry(origin.file.clone())
            .or_insert_with(Vec::new)
            .push(Diagnostic::new(
                strata_types::Severity::Error,
                format!("no declaration found for \"{}\"", origin.address),
                origin.line,
                0,
            ));
    }

    store.update_diagnostics(dir, DiagnosticSource::ReferenceValidation, bucket)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::FeatureStore;
    use crate::testing::{LineDecoder, MemFs};

    use std::sync::Arc;

    use strata_scheduler::JobCtx;
    use strata_state::StateStore;
    use strata_types::{DeclKind, DirHandle};
    use tokio::sync::watch;

    fn ctx() -> JobCtx {
        JobCtx::new(false, watch::channel(false).1)
    }

    fn feature_store(state: &StateStore, name: &'static str) -> Arc<FeatureStore> {
        Arc::new(FeatureStore::new(
            name,
            Arc::clone(state.jobs()),
            Arc::clone(state.changes()),
        ))
    }

    fn any_hcl(name: &FileName) -> bool {
        name.as_str().ends_with(".hcl")
    }

    fn dir(path: &str) -> DirHandle {
        DirHandle::from_path(path)
    }

    #[test]
    fn test_full_parse_collects_relevant_files_only() {
        let state = StateStore::new();
        let store = feature_store(&state, "modules");
        let fs = MemFs::new();
        let d = dir("/proj/app");
        fs.write("/proj/app/main.hcl", "var region\n");
        fs.write("/proj/app/outputs.hcl", "out endpoint\n");
        fs.write("/proj/app/README.md", "docs\n");
        store.add(&d).unwrap();

        parse(&ctx(), fs.as_ref(), &LineDecoder, &store, any_hcl, &d, None).unwrap();

        let record = store.get(&d).unwrap();
        assert_eq!(record.parsed_files.len(), 2);
        assert!(!record.parsed_files.contains_key(&FileName::new("README.md")));
        assert_eq!(
            record.diagnostics_state.get(DiagnosticSource::HclParsing),
            OpState::Loaded
        );
    }

    #[test]
    fn test_single_file_parse_preserves_sibling_identity() {
        let state = StateStore::new();
        let store = feature_store(&state, "modules");
        let fs = MemFs::new();
        let d = dir("/proj/app");
        fs.write("/proj/app/main.hcl", "var region\n");
        fs.write("/proj/app/outputs.hcl", "out endpoint\n");
        store.add(&d).unwrap();
        parse(&ctx(), fs.as_ref(), &LineDecoder, &store, any_hcl, &d, None).unwrap();
        let before = store.get(&d).unwrap();

        fs.write("/proj/app/main.hcl", "var zone\n");
        let changed = FileName::new("main.hcl");
        parse(
            &ctx(),
            fs.as_ref(),
            &LineDecoder,
            &store,
            any_hcl,
            &d,
            Some(&changed),
        )
        .unwrap();

        let after = store.get(&d).unwrap();
        let sibling = FileName::new("outputs.hcl");
        assert!(Arc::ptr_eq(
            &before.parsed_files[&sibling],
            &after.parsed_files[&sibling]
        ));
        assert!(!Arc::ptr_eq(
            &before.parsed_files[&changed],
            &after.parsed_files[&changed]
        ));
    }

    #[test]
    fn test_changed_file_not_yet_parsed_falls_back_to_full_parse() {
        let state = StateStore::new();
        let store = feature_store(&state, "modules");
        let fs = MemFs::new();
        let d = dir("/proj/app");
        fs.write("/proj/app/main.hcl", "var region\n");
        store.add(&d).unwrap();

        // Nothing parsed yet; a "changed file" hint must not narrow the
        // first parse.
        let changed = FileName::new("main.hcl");
        parse(
            &ctx(),
            fs.as_ref(),
            &LineDecoder,
            &store,
            any_hcl,
            &d,
            Some(&changed),
        )
        .unwrap();
        assert_eq!(store.get(&d).unwrap().parsed_files.len(), 1);
    }

    #[test]
    fn test_unreadable_file_does_not_block_siblings() {
        let state = StateStore::new();
        let store = feature_store(&state, "modules");
        let fs = MemFs::new();
        let d = dir("/proj/app");
        fs.write("/proj/app/main.hcl", "var region\n");
        fs.write("/proj/app/broken.hcl", "var other\n");
        fs.make_unreadable("/proj/app/broken.hcl");
        store.add(&d).unwrap();

        parse(&ctx(), fs.as_ref(), &LineDecoder, &store, any_hcl, &d, None).unwrap();

        let record = store.get(&d).unwrap();
        assert!(record.parsed_files.contains_key(&FileName::new("main.hcl")));
        assert!(!record.parsed_files.contains_key(&FileName::new("broken.hcl")));
        let bucket = record
            .diagnostics
            .bucket(DiagnosticSource::HclParsing)
            .unwrap();
        assert_eq!(bucket[&FileName::new("broken.hcl")].len(), 1);
        assert!(bucket[&FileName::new("main.hcl")].is_empty());
    }

    #[test]
    fn test_parse_of_missing_dir_still_advances_state() {
        let state = StateStore::new();
        let store = feature_store(&state, "modules");
        let fs = MemFs::new();
        let d = dir("/proj/gone");
        store.add(&d).unwrap();

        let result = parse(&ctx(), fs.as_ref(), &LineDecoder, &store, any_hcl, &d, None);
        assert!(result.is_err());

        let record = store.get(&d).unwrap();
        assert!(record.parsing_err.is_some());
        assert_eq!(
            record.diagnostics_state.get(DiagnosticSource::HclParsing),
            OpState::Loaded
        );
    }

    #[test]
    fn test_metadata_failure_is_recorded_and_loaded() {
        let state = StateStore::new();
        let store = feature_store(&state, "modules");
        let fs = MemFs::new();
        let d = dir("/proj/app");
        fs.write("/proj/app/main.hcl", "bad metadata\n");
        store.add(&d).unwrap();
        parse(&ctx(), fs.as_ref(), &LineDecoder, &store, any_hcl, &d, None).unwrap();

        let result = load_metadata(&LineDecoder, &store, &d);
        assert!(result.is_err());

        let record = store.get(&d).unwrap();
        assert!(record.metadata_err.is_some());
        assert_eq!(record.metadata, Metadata::default());
        // The stage never sticks in Loading, even on failure.
        assert_eq!(record.metadata_state, OpState::Loaded);
    }

    #[tokio::test]
    async fn test_validation_is_permissive_without_schema_record() {
        let state = StateStore::new();
        let variables = feature_store(&state, "variables");
        let modules = feature_store(&state, "modules");
        let fs = MemFs::new();
        let d = dir("/proj/env");
        fs.write("/proj/env/prod.vars.hcl", "use region\n");
        variables.add(&d).unwrap();
        parse(
            &ctx(),
            fs.as_ref(),
            &LineDecoder,
            &variables,
            any_hcl,
            &d,
            None,
        )
        .unwrap();

        // No module record exists for the dir: fall back to the
        // permissive schema, zero diagnostics.
        schema_validation(&ctx(), &LineDecoder, &variables, Some(&modules), &d, None)
            .await
            .unwrap();

        let record = variables.get(&d).unwrap();
        assert_eq!(
            record.diagnostics_state.get(DiagnosticSource::SchemaValidation),
            OpState::Loaded
        );
        let count = record
            .diagnostics
            .bucket(DiagnosticSource::SchemaValidation)
            .map_or(0, |bucket| bucket.values().map(Vec::len).sum());
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_validation_flags_undeclared_against_schema_metadata() {
        let state = StateStore::new();
        let variables = feature_store(&state, "variables");
        let modules = feature_store(&state, "modules");
        let fs = MemFs::new();
        let d = dir("/proj/app");
        fs.write("/proj/app/prod.vars.hcl", "use region\nuse missing\n");
        variables.add(&d).unwrap();
        modules.add(&d).unwrap();

        let mut schema = Metadata::default();
        schema
            .declarations
            .insert("region".to_string(), DeclKind::Variable);
        modules.update_metadata(&d, schema, None).unwrap();

        parse(
            &ctx(),
            fs.as_ref(),
            &LineDecoder,
            &variables,
            any_hcl,
            &d,
            None,
        )
        .unwrap();
        schema_validation(&ctx(), &LineDecoder, &variables, Some(&modules), &d, None)
            .await
            .unwrap();

        let record = variables.get(&d).unwrap();
        let bucket = record
            .diagnostics
            .bucket(DiagnosticSource::SchemaValidation)
            .unwrap();
        let diags = &bucket[&FileName::new("prod.vars.hcl")];
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message().contains("missing"));
    }

    #[test]
    fn test_reference_validation_resolves_cross_feature_targets() {
        let state = StateStore::new();
        let variables = feature_store(&state, "variables");
        let modules = feature_store(&state, "modules");
        let d = dir("/proj/app");
        variables.add(&d).unwrap();
        modules.add(&d).unwrap();

        modules
            .update_reference_targets(
                &d,
                vec![strata_types::ReferenceTarget {
                    address: "var.region".to_string(),
                    file: FileName::new("main.hcl"),
                    line: 0,
                }],
                None,
            )
            .unwrap();
        variables
            .update_reference_origins(
                &d,
                vec![
                    strata_types::ReferenceOrigin {
                        address: "var.region".to_string(),
                        file: FileName::new("prod.vars.hcl"),
                        line: 0,
                    },
                    strata_types::ReferenceOrigin {
                        address: "var.gone".to_string(),
                        file: FileName::new("prod.vars.hcl"),
                        line: 1,
                    },
                ],
                None,
            )
            .unwrap();

        reference_validation(&variables, Some(&modules), &d).unwrap();

        let record = variables.get(&d).unwrap();
        let bucket = record
            .diagnostics
            .bucket(DiagnosticSource::ReferenceValidation)
            .unwrap();
        let diags = &bucket[&FileName::new("prod.vars.hcl")];
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message().contains("var.gone"));
        assert_eq!(diags[0].line(), 1);
    }
}
