//! Terraform CLI adapter.

use super::{ExecOutput, ImportedResource, Terraform};
use crate::core::error::{MigrateError, Result};
use crate::core::plan::Plan;
use crate::hcl::parse_blocks;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Label of the scratch declaration used while generating configuration.
const IMPORT_LABEL: &str = "azmigrate_import";
const IMPORT_FILE: &str = "azmigrate_import.tf";
const GENERATED_FILE: &str = "azmigrate_generated.tf";

/// Runs `terraform` in a working directory.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: PathBuf,
    working_dir: PathBuf,
}

/// Files removed when dropped, so failed runs leave nothing behind.
struct Scratch(Vec<PathBuf>);

impl Drop for Scratch {
    fn drop(&mut self) {
        for path in &self.0 {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::warn!(file = %path.display(), error = %e, "cannot remove scratch file");
                }
            }
        }
    }
}

impl TerraformCli {
    pub fn new(binary: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            working_dir: working_dir.into(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn exec(&self, args: &[&str]) -> Result<ExecOutput> {
        tracing::debug!(binary = %self.binary.display(), args = ?args, "running terraform");
        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.working_dir)
            .env("TF_IN_AUTOMATION", "1")
            .output()
            .map_err(|e| MigrateError::Terraform {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: format!("failed to spawn {}: {}", self.binary.display(), e),
            })?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Run and return stdout, failing on a non-zero exit.
    fn run(&self, args: &[&str]) -> Result<String> {
        let out = self.exec(args)?;
        if !out.success() {
            return Err(MigrateError::Terraform {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out.stdout)
    }

    fn plan_file(&self) -> Result<tempfile::NamedTempFile> {
        Ok(tempfile::Builder::new()
            .prefix("azmigrate-")
            .suffix(".tfplan")
            .tempfile_in(&self.working_dir)?)
    }
}

impl Terraform for TerraformCli {
    fn plan_json(&self) -> Result<String> {
        let plan_file = self.plan_file()?;
        let path = plan_file.path().to_string_lossy().to_string();
        self.run(&["plan", "-input=false", "-no-color", &format!("-out={}", path)])?;
        self.run(&["show", "-json", &path])
    }

    fn import(&self, resource_type: &str, id: &str) -> Result<ImportedResource> {
        let address = format!("{}.{}", resource_type, IMPORT_LABEL);
        let import_path = self.working_dir.join(IMPORT_FILE);
        let generated_path = self.working_dir.join(GENERATED_FILE);
        let _scratch = Scratch(vec![import_path.clone(), generated_path.clone()]);

        let import = crate::hcl::scaffold::import_block(id, &address);
        std::fs::write(&import_path, import.to_hcl())?;

        let plan_file = self.plan_file()?;
        let plan_path = plan_file.path().to_string_lossy().to_string();
        self.run(&[
            "plan",
            "-input=false",
            "-no-color",
            &format!("-generate-config-out={}", GENERATED_FILE),
            &format!("-out={}", plan_path),
        ])?;

        let generated = std::fs::read_to_string(&generated_path)?;
        let block = parse_blocks(&generated)
            .map_err(|message| MigrateError::HclParse {
                file: generated_path.clone(),
                message,
            })?
            .into_iter()
            .find(|b| b.is_resource(resource_type, IMPORT_LABEL))
            .ok_or_else(|| MigrateError::Generation {
                address: address.clone(),
                message: "terraform generated no configuration".to_string(),
            })?;

        let shown = self.run(&["show", "-json", &plan_path])?;
        let plan = Plan::from_json(&shown)?;
        let state = plan
            .resource_changes
            .into_iter()
            .find(|rc| rc.address == address)
            .map(|rc| {
                if rc.change.after.is_null() {
                    rc.change.before
                } else {
                    rc.change.after
                }
            })
            .unwrap_or_default();

        Ok(ImportedResource { block, state })
    }
}
