//! Collaborator seams: the Terraform binary and resource type lookup.
//!
//! The engine only talks to these traits; `local` drives the real
//! `terraform` CLI and tests substitute in-memory fakes.

pub mod local;

use crate::core::error::Result;
use crate::hcl::HclBlock;
use serde_json::Value;

/// Output from running an external command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A declaration generated for an existing resource, with its live state.
#[derive(Debug, Clone)]
pub struct ImportedResource {
    /// Fully literal declaration as Terraform generated it
    pub block: HclBlock,

    /// State the declaration was generated from
    pub state: Value,
}

/// Plan and import operations against one working directory.
pub trait Terraform {
    /// `terraform show -json` of a fresh plan.
    fn plan_json(&self) -> Result<String>;

    /// Generate configuration for the resource `id` as `resource_type`.
    fn import(&self, resource_type: &str, id: &str) -> Result<ImportedResource>;
}

/// Maps a resource id to the typed resource type that manages it.
pub trait TypeResolver {
    fn resolve(&self, id: &str) -> Result<String>;
}
