//! Executor: orchestration loop for a migration run.
//!
//! plan -> ingest -> for each selected resource: gate -> generate -> replace
//! -> rewrite outputs -> flush. Errors local to one resource are logged and
//! the resource is skipped; only plan and working-directory failures abort.

use super::codegen::Generator;
use super::coverage::CoverageTable;
use super::error::Result;
use super::ingest::ingest_plan;
use super::planner::{self, GateOptions, MigrationPlan};
use super::types::{Direction, ResourceDescriptor};
use crate::hcl::document::Workspace;
use crate::hcl::scaffold::{commented, import_block, import_for_each_block, removed_block};
use crate::transport::{Terraform, TypeResolver};
use std::path::PathBuf;
use std::time::Instant;

/// Runtime settings for one run.
#[derive(Debug, Clone)]
pub struct MigrateOptions {
    pub working_dir: PathBuf,
    pub direction: Direction,
    pub gate: GateOptions,
}

/// Outcome of one run.
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// Old addresses that were migrated
    pub migrated: Vec<String>,

    /// Old address and reason for every skipped resource
    pub skipped: Vec<(String, String)>,

    /// Blocks whose output references were rewritten
    pub rewritten: usize,

    /// Old address and file for every reference left behind
    pub dangling: Vec<(String, PathBuf)>,

    pub files: Vec<PathBuf>,

    /// The descriptors as they stood at the end of the run
    pub resources: Vec<ResourceDescriptor>,
}

/// Dry run: list eligible resources and the gate verdict for each.
pub fn plan(
    opts: &MigrateOptions,
    terraform: &dyn Terraform,
    resolver: &dyn TypeResolver,
    coverage: &CoverageTable,
) -> Result<MigrationPlan> {
    let json = terraform.plan_json()?;
    let ingested = ingest_plan(&json);
    Ok(planner::plan(
        &ingested.resources,
        opts.direction,
        coverage,
        resolver,
        opts.gate,
    ))
}

/// Migrate every eligible resource in the working directory.
pub fn migrate(
    opts: &MigrateOptions,
    terraform: &dyn Terraform,
    resolver: &dyn TypeResolver,
    coverage: &CoverageTable,
) -> Result<MigrationReport> {
    let start = Instant::now();
    let json = terraform.plan_json()?;
    let mut resources = ingest_plan(&json).resources;
    let mut workspace = Workspace::load(&opts.working_dir)?;
    let generator = Generator::new(terraform, resolver);
    let mut report = MigrationReport::default();

    for resource in resources.iter_mut() {
        if !opts.direction.selects(resource.kind()) {
            continue;
        }
        let address = resource.old_address();
        if !opts.gate.skip {
            if let Err(e) = coverage.check(resource, opts.gate.strict) {
                tracing::warn!(address = %address, reason = %e, "skipping");
                report.skipped.push((address, e.to_string()));
                continue;
            }
        }
        match migrate_one(resource, &mut workspace, &generator) {
            Ok(()) => {
                tracing::info!(
                    address = %address,
                    to = %resource.new_address().unwrap_or_default(),
                    "migrated"
                );
                report.migrated.push(address);
            }
            Err(e) => {
                tracing::warn!(address = %address, reason = %e, "skipping");
                report.skipped.push((address, e.to_string()));
            }
        }
    }

    let outputs: Vec<_> = resources
        .iter()
        .filter(|r| r.is_migrated())
        .flat_map(|r| r.outputs())
        .collect();
    report.rewritten = workspace.rewrite_outputs(&outputs);

    for resource in resources.iter().filter(|r| r.is_migrated()) {
        let address = resource.old_address();
        for file in workspace.dangling(&address) {
            tracing::warn!(address = %address, file = %file.display(), "reference to migrated address remains");
            report.dangling.push((address.clone(), file));
        }
    }

    report.files = workspace.flush();
    tracing::info!(
        migrated = report.migrated.len(),
        skipped = report.skipped.len(),
        files = report.files.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "migration finished"
    );
    report.resources = resources;
    Ok(report)
}

/// Replace one resource's declaration. The workspace is only touched once
/// generation has succeeded.
fn migrate_one(
    resource: &mut ResourceDescriptor,
    workspace: &mut Workspace,
    generator: &Generator,
) -> Result<()> {
    let old_type = resource.descriptor().old_type.clone();
    let label = resource.descriptor().label.clone();
    let old_address = resource.old_address();
    let old_source = workspace.resource_source(&old_type, &label)?;

    let target = match resource {
        ResourceDescriptor::Patch { target, .. } => {
            Some((target.resource_type.clone(), target.label.clone()))
        }
        _ => None,
    };

    if let Some((target_type, target_label)) = target {
        let existing = workspace.resource_block(&target_type, &target_label)?;
        let generated = generator.generate(resource, &existing)?;
        let record = [commented(&old_source), removed_block(&old_address).to_hcl()].join("\n\n");
        workspace.replace_resource(&target_type, &target_label, &generated.block.to_hcl())?;
        workspace.replace_resource(&old_type, &label, &record)?;
        resource.descriptor_mut().mark_migrated(generated.block);
        return Ok(());
    }

    let old_block = workspace.resource_block(&old_type, &label)?;
    let generated = generator.generate(resource, &old_block)?;
    let new_address = resource.new_address().unwrap_or_default();
    let d = resource.descriptor();
    let import = if d.is_multiple() {
        let pairs: Vec<(String, String)> = d
            .instances
            .iter()
            .map(|i| (i.resource_id.clone(), i.index.key_literal()))
            .collect();
        import_for_each_block(&pairs, &new_address)
    } else {
        let id = d.instances.first().map(|i| i.resource_id.as_str()).unwrap_or_default();
        import_block(id, &new_address)
    };

    let mut parts = vec![
        format!("{}\n", commented(&old_source)),
        removed_block(&old_address).to_hcl(),
        import.to_hcl(),
        generated.block.to_hcl(),
    ];
    parts.extend(generated.companions.iter().map(|b| b.to_hcl()));
    let text = parts.join("\n");

    workspace.replace_resource(&old_type, &label, &text)?;
    resource.descriptor_mut().mark_migrated(generated.block);
    Ok(())
}
