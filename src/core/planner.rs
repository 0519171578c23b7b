//! Migration plan: which resources would move, where to, and whether the
//! coverage gate lets them.

use super::coverage::CoverageTable;
use super::types::{Direction, ResourceDescriptor, ResourceKind, AZAPI_RESOURCE};
use crate::transport::TypeResolver;
use std::fmt;

/// Gate outcome for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Migrate,
    Blocked(String),
}

/// One eligible resource.
#[derive(Debug, Clone)]
pub struct PlannedMigration {
    pub old_address: String,
    pub new_type: String,
    pub kind: ResourceKind,
    pub instances: usize,
    pub verdict: Verdict,
}

impl fmt::Display for PlannedMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = if self.instances == 1 { "" } else { "s" };
        write!(
            f,
            "  {} -> {} ({} instance{})",
            self.old_address, self.new_type, self.instances, plural
        )?;
        match &self.verdict {
            Verdict::Migrate => Ok(()),
            Verdict::Blocked(reason) => write!(f, " BLOCKED: {}", reason),
        }
    }
}

/// The full dry-run result.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub direction: Direction,
    pub entries: Vec<PlannedMigration>,
    pub to_migrate: u32,
    pub blocked: u32,
}

impl MigrationPlan {
    pub fn summary(&self) -> String {
        format!("Plan: {} to migrate, {} blocked.", self.to_migrate, self.blocked)
    }
}

/// Gate settings shared by `plan` and `migrate`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateOptions {
    pub strict: bool,
    pub skip: bool,
}

/// Evaluate every resource selected by `direction`.
pub fn plan(
    resources: &[ResourceDescriptor],
    direction: Direction,
    coverage: &CoverageTable,
    resolver: &dyn TypeResolver,
    gate: GateOptions,
) -> MigrationPlan {
    let mut entries = Vec::new();
    let mut to_migrate = 0u32;
    let mut blocked = 0u32;

    for resource in resources.iter().filter(|r| direction.selects(r.kind())) {
        let (new_type, mut verdict) = target_of(resource, resolver);
        if verdict == Verdict::Migrate && !gate.skip {
            if let Err(e) = coverage.check(resource, gate.strict) {
                verdict = Verdict::Blocked(e.to_string());
            }
        }
        match verdict {
            Verdict::Migrate => to_migrate += 1,
            Verdict::Blocked(_) => blocked += 1,
        }
        entries.push(PlannedMigration {
            old_address: resource.old_address(),
            new_type,
            kind: resource.kind(),
            instances: resource.descriptor().instances.len(),
            verdict,
        });
    }

    MigrationPlan {
        direction,
        entries,
        to_migrate,
        blocked,
    }
}

fn target_of(resource: &ResourceDescriptor, resolver: &dyn TypeResolver) -> (String, Verdict) {
    match resource {
        ResourceDescriptor::Untyped(d) => {
            let id = d.instances.first().map(|i| i.resource_id.as_str()).unwrap_or_default();
            match resolver.resolve(id) {
                Ok(t) => (t, Verdict::Migrate),
                Err(e) => ("?".to_string(), Verdict::Blocked(e.to_string())),
            }
        }
        ResourceDescriptor::Typed(_) => (AZAPI_RESOURCE.to_string(), Verdict::Migrate),
        ResourceDescriptor::Patch { target, .. } => (target.address(), Verdict::Migrate),
    }
}
