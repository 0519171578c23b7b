//! azmigrate: move Terraform resources between the azapi and azurerm
//! providers without recreating the infrastructure behind them.
//!
//! Reads `terraform show -json`, imports each resource under its new type,
//! and rewrites the working directory in place with `removed` and `import`
//! blocks so the next apply is a pure state move.

pub mod cli;
pub mod core;
pub mod hcl;
pub mod transport;
