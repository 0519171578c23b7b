//! CLI subcommands: plan, migrate.

use crate::core::coverage::{skip_coverage_check, CoverageTable};
use crate::core::executor::{self, MigrateOptions, MigrationReport};
use crate::core::planner::{GateOptions, MigrationPlan, Verdict};
use crate::core::resolver::StaticTypeResolver;
use crate::core::types::Direction;
use crate::transport::local::TerraformCli;
use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

/// Provider the resources are moved to.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetProvider {
    /// azapi_resource / azapi_update_resource -> typed azurerm resources
    Azurerm,
    /// typed azurerm resources -> azapi_resource
    Azapi,
}

impl From<TargetProvider> for Direction {
    fn from(target: TargetProvider) -> Self {
        match target {
            TargetProvider::Azurerm => Direction::ToTyped,
            TargetProvider::Azapi => Direction::ToUntyped,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the resources that would be migrated
    Plan {
        /// Terraform working directory
        #[arg(short, long, default_value = ".")]
        working_dir: PathBuf,

        /// Provider to migrate to
        #[arg(long, value_enum, default_value = "azurerm")]
        to: TargetProvider,

        /// Block resources with uncovered properties instead of warning
        #[arg(long)]
        strict: bool,

        /// terraform binary
        #[arg(long, default_value = "terraform")]
        terraform: PathBuf,
    },

    /// Rewrite the working directory so the next apply moves state in place
    Migrate {
        /// Terraform working directory
        #[arg(short, long, default_value = ".")]
        working_dir: PathBuf,

        /// Provider to migrate to
        #[arg(long, value_enum, default_value = "azurerm")]
        to: TargetProvider,

        /// Skip resources with uncovered properties instead of warning
        #[arg(long)]
        strict: bool,

        /// terraform binary
        #[arg(long, default_value = "terraform")]
        terraform: PathBuf,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Plan {
            working_dir,
            to,
            strict,
            terraform,
        } => cmd_plan(&options(working_dir, to, strict), &terraform),
        Commands::Migrate {
            working_dir,
            to,
            strict,
            terraform,
        } => cmd_migrate(&options(working_dir, to, strict), &terraform),
    }
}

fn options(working_dir: PathBuf, to: TargetProvider, strict: bool) -> MigrateOptions {
    MigrateOptions {
        working_dir,
        direction: to.into(),
        gate: GateOptions {
            strict,
            skip: skip_coverage_check(),
        },
    }
}

fn cmd_plan(opts: &MigrateOptions, binary: &std::path::Path) -> Result<(), String> {
    let coverage = CoverageTable::embedded().map_err(|e| e.to_string())?;
    let terraform = TerraformCli::new(binary, &opts.working_dir);
    let resolver = StaticTypeResolver::new();
    let plan = executor::plan(opts, &terraform, &resolver, &coverage).map_err(|e| e.to_string())?;
    print!("{}", render_plan(&plan));
    Ok(())
}

fn cmd_migrate(opts: &MigrateOptions, binary: &std::path::Path) -> Result<(), String> {
    let coverage = CoverageTable::embedded().map_err(|e| e.to_string())?;
    let terraform = TerraformCli::new(binary, &opts.working_dir);
    let resolver = StaticTypeResolver::new();
    let report =
        executor::migrate(opts, &terraform, &resolver, &coverage).map_err(|e| e.to_string())?;
    print!("{}", render_report(&report));
    Ok(())
}

/// Plan listing for stdout.
fn render_plan(plan: &MigrationPlan) -> String {
    let mut out = format!(
        "Planning: {} ({} resources)\n\n",
        plan.direction,
        plan.entries.len()
    );
    for entry in &plan.entries {
        let symbol = match entry.verdict {
            Verdict::Migrate => "~",
            Verdict::Blocked(_) => "!",
        };
        out.push_str(&format!("{}{}\n", symbol, entry));
    }
    if !plan.entries.is_empty() {
        out.push('\n');
    }
    out.push_str(&plan.summary());
    out.push('\n');
    out
}

/// Run summary for stdout.
fn render_report(report: &MigrationReport) -> String {
    let mut out = String::new();
    for address in &report.migrated {
        out.push_str(&format!("  ~ {}\n", address));
    }
    for (address, reason) in &report.skipped {
        out.push_str(&format!("  ! {} skipped: {}\n", address, reason));
    }
    for (address, file) in &report.dangling {
        out.push_str(&format!(
            "  ? {} still referenced in {}\n",
            address,
            file.display()
        ));
    }
    out.push_str(&format!(
        "Migrated {}, skipped {}, {} file(s) updated.\n",
        report.migrated.len(),
        report.skipped.len(),
        report.files.len()
    ));
    out
}
