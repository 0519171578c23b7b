//! Terraform plan JSON (`terraform show -json <planfile>`), only the parts
//! migration needs.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub variables: IndexMap<String, Variable>,

    #[serde(default)]
    pub resource_changes: Vec<ResourceChange>,

    #[serde(default)]
    pub configuration: Configuration,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Variable {
    #[serde(default)]
    pub value: Value,
}

/// One instance-level entry of `resource_changes`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceChange {
    pub address: String,

    #[serde(default)]
    pub mode: String,

    #[serde(rename = "type")]
    pub resource_type: String,

    pub name: String,

    /// Integer for `count`, string for `for_each`, absent otherwise
    #[serde(default)]
    pub index: Option<Value>,

    #[serde(default)]
    pub provider_name: String,

    /// Set when the resource lives in a child module
    #[serde(default)]
    pub module_address: Option<String>,

    #[serde(default)]
    pub change: Change,
}

impl ResourceChange {
    pub fn is_managed(&self) -> bool {
        self.mode.is_empty() || self.mode == "managed"
    }

    /// Resource id from the prior state, else from the planned state.
    pub fn resource_id(&self) -> Option<&str> {
        self.change
            .before
            .get("id")
            .or_else(|| self.change.after.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub actions: Vec<String>,

    #[serde(default)]
    pub before: Value,

    #[serde(default)]
    pub after: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub root_module: ConfigModule,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigModule {
    #[serde(default)]
    pub resources: Vec<ConfigResource>,
}

/// A declaration as written, with the references of each expression.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigResource {
    pub address: String,

    #[serde(default)]
    pub mode: String,

    #[serde(rename = "type", default)]
    pub resource_type: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub expressions: Map<String, Value>,
}

impl Plan {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// The configuration entry for a `type.name` address.
    pub fn config_resource(&self, address: &str) -> Option<&ConfigResource> {
        self.configuration
            .root_module
            .resources
            .iter()
            .find(|r| r.address == address)
    }
}
