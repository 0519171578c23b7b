//! Error taxonomy for ingestion, gating, generation and file rewriting.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Everything that can go wrong while migrating a working directory.
///
/// Most variants are local to one resource and are reported as a skip;
/// only I/O on the working directory and a failed plan abort a run.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// A resource id could not be split into type/name segments
    #[error("invalid resource id '{id}': {reason}")]
    InvalidResourceId { id: String, reason: String },

    /// Coverage gate veto
    #[error("{address}: {reason}")]
    CoverageRejected { address: String, reason: String },

    /// No typed resource type is known for an id
    #[error("no azurerm resource type is known for '{id}'")]
    UnsupportedType { id: String },

    /// More than one typed resource type fits an id
    #[error("resource '{id}' is ambiguous, candidates: {}", .candidates.join(", "))]
    AmbiguousType { id: String, candidates: Vec<String> },

    /// Import or introspection of the replacement failed
    #[error("cannot generate configuration for {address}: {message}")]
    Generation { address: String, message: String },

    /// Snapshot arrays and generated nested blocks disagree
    #[error("cannot reconcile '{path}': state holds {expected} block(s) but {found} were generated")]
    Reconcile {
        path: String,
        expected: usize,
        found: usize,
    },

    /// A configuration file is not valid HCL
    #[error("cannot parse {file}: {message}")]
    HclParse { file: PathBuf, message: String },

    /// The declaration for an address is not in the working directory
    #[error("no declaration found for {address}")]
    MissingBlock { address: String },

    /// The terraform binary failed
    #[error("terraform {command} failed: {stderr}")]
    Terraform { command: String, stderr: String },

    /// JSON (plan or coverage dataset)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
