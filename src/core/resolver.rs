//! Typed resource type resolution from resource ids.

use super::coverage::id_pattern;
use super::error::{MigrateError, Result};
use crate::transport::TypeResolver;
use indexmap::IndexMap;

/// Built-in id pattern -> azurerm type table.
///
/// Patterns with several candidates need a live lookup to disambiguate
/// and are reported as ambiguous.
pub struct StaticTypeResolver {
    types: IndexMap<String, Vec<String>>,
}

const BUILTIN: &[(&str, &[&str])] = &[
    ("/subscriptions/resourcegroups", &["azurerm_resource_group"]),
    (
        "/subscriptions/resourcegroups/providers/microsoft.automation/automationaccounts",
        &["azurerm_automation_account"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.automation/automationaccounts/runbooks",
        &["azurerm_automation_runbook"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.storage/storageaccounts",
        &["azurerm_storage_account"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.keyvault/vaults",
        &["azurerm_key_vault"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.network/virtualnetworks",
        &["azurerm_virtual_network"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.network/virtualnetworks/subnets",
        &["azurerm_subnet"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.network/publicipaddresses",
        &["azurerm_public_ip"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.network/networksecuritygroups",
        &["azurerm_network_security_group"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.managedidentity/userassignedidentities",
        &["azurerm_user_assigned_identity"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.operationalinsights/workspaces",
        &["azurerm_log_analytics_workspace"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.containerregistry/registries",
        &["azurerm_container_registry"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.web/serverfarms",
        &["azurerm_service_plan"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.insights/components",
        &["azurerm_application_insights"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.eventhub/namespaces",
        &["azurerm_eventhub_namespace"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.servicebus/namespaces",
        &["azurerm_servicebus_namespace"],
    ),
    (
        "/subscriptions/resourcegroups/providers/microsoft.web/sites",
        &[
            "azurerm_linux_web_app",
            "azurerm_windows_web_app",
            "azurerm_linux_function_app",
            "azurerm_windows_function_app",
        ],
    ),
];

impl StaticTypeResolver {
    pub fn new() -> Self {
        let types = BUILTIN
            .iter()
            .map(|(pattern, candidates)| {
                (
                    pattern.to_string(),
                    candidates.iter().map(|c| c.to_string()).collect(),
                )
            })
            .collect();
        Self { types }
    }

    /// Add or replace the candidates for an id pattern.
    pub fn with_type(mut self, pattern: &str, resource_type: &str) -> Self {
        self.types
            .insert(pattern.to_lowercase(), vec![resource_type.to_string()]);
        self
    }
}

impl Default for StaticTypeResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeResolver for StaticTypeResolver {
    fn resolve(&self, id: &str) -> Result<String> {
        let pattern = id_pattern(id)?.to_lowercase();
        match self.types.get(&pattern).map(Vec::as_slice) {
            Some([single]) => Ok(single.clone()),
            Some(candidates) if !candidates.is_empty() => Err(MigrateError::AmbiguousType {
                id: id.to_string(),
                candidates: candidates.to_vec(),
            }),
            _ => Err(MigrateError::UnsupportedType { id: id.to_string() }),
        }
    }
}
