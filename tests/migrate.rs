//! End-to-end runs of the migration engine against an in-memory Terraform.

use azmigrate::core::coverage::CoverageTable;
use azmigrate::core::error::{MigrateError, Result};
use azmigrate::core::executor::{self, MigrateOptions};
use azmigrate::core::planner::GateOptions;
use azmigrate::core::resolver::StaticTypeResolver;
use azmigrate::core::types::{Direction, ResourceDescriptor};
use azmigrate::hcl::document::Workspace;
use azmigrate::hcl::{parse_blocks, HclBlock};
use azmigrate::transport::{ImportedResource, Terraform};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;

const RG_ID: &str = "/subscriptions/s/resourceGroups/rg1";

fn account_id(name: &str) -> String {
    format!(
        "{}/providers/Microsoft.Automation/automationAccounts/{}",
        RG_ID, name
    )
}

/// Serves a fixed plan and answers imports from a table keyed by resource id.
#[derive(Default)]
struct FakeTerraform {
    plan: String,
    generated: HashMap<String, (String, Value)>,
}

impl FakeTerraform {
    fn new(plan: Value) -> Self {
        Self {
            plan: plan.to_string(),
            generated: HashMap::new(),
        }
    }

    fn with(mut self, id: &str, hcl: &str, state: Value) -> Self {
        self.generated.insert(id.to_string(), (hcl.to_string(), state));
        self
    }
}

impl Terraform for FakeTerraform {
    fn plan_json(&self) -> Result<String> {
        Ok(self.plan.clone())
    }

    fn import(&self, _resource_type: &str, id: &str) -> Result<ImportedResource> {
        let (hcl, state) = self.generated.get(id).ok_or_else(|| MigrateError::Terraform {
            command: "plan".into(),
            stderr: format!("Cannot import non-existent remote object {}", id),
        })?;
        Ok(ImportedResource {
            block: parse_blocks(hcl).unwrap().remove(0),
            state: state.clone(),
        })
    }
}

fn change(address: &str, rtype: &str, name: &str, index: Value, before: Value) -> Value {
    json!({
        "address": address, "mode": "managed", "type": rtype, "name": name,
        "index": index, "change": {"actions": ["no-op"], "before": before, "after": before}
    })
}

fn rg_change() -> Value {
    change(
        "azurerm_resource_group.rg",
        "azurerm_resource_group",
        "rg",
        Value::Null,
        json!({"id": RG_ID, "name": "rg1", "location": "westeurope"}),
    )
}

fn account_before(name: &str) -> Value {
    json!({
        "id": account_id(name),
        "type": "Microsoft.Automation/automationAccounts@2023-11-01",
        "name": name,
        "parent_id": RG_ID,
        "location": "westeurope",
        "tags": {"env": "dev"},
        "body": {"properties": {"sku": {"name": "Basic"}}},
        "output": "{\"properties\":{\"state\":\"Ok\"}}"
    })
}

fn account_config() -> Value {
    json!({
        "address": "azapi_resource.acc", "mode": "managed", "type": "azapi_resource", "name": "acc",
        "expressions": {
            "parent_id": {"references": ["azurerm_resource_group.rg.id", "azurerm_resource_group.rg"]},
            "name": {"constant_value": "acc1"}
        }
    })
}

fn generated_account(name: &str) -> String {
    format!(
        r#"resource "azurerm_automation_account" "azmigrate_import" {{
  name                          = "{}"
  location                      = "westeurope"
  resource_group_name           = "rg1"
  sku_name                      = "Basic"
  public_network_access_enabled = null
  tags = {{
    env = "dev"
  }}
}}
"#,
        name
    )
}

fn account_state(name: &str) -> Value {
    json!({"id": account_id(name), "name": name, "location": "westeurope", "sku_name": "Basic"})
}

const RG_TF: &str = r#"resource "azurerm_resource_group" "rg" {
  name     = "rg1"
  location = "westeurope"
}
"#;

fn options(dir: &Path, strict: bool) -> MigrateOptions {
    MigrateOptions {
        working_dir: dir.to_path_buf(),
        direction: Direction::ToTyped,
        gate: GateOptions { strict, skip: false },
    }
}

fn top_level(path: &Path) -> Vec<HclBlock> {
    parse_blocks(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_migrate_singleton_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("main.tf"),
        format!(
            "{}\nresource \"azapi_resource\" \"acc\" {{\n  type      = \"Microsoft.Automation/automationAccounts@2023-11-01\"\n  parent_id = azurerm_resource_group.rg.id\n  name      = \"acc1\"\n  location  = \"westeurope\"\n  body = {{\n    properties = {{ sku = {{ name = \"Basic\" }} }}\n  }}\n}}\n",
            RG_TF
        ),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("outputs.tf"),
        "output \"account_id\" {\n  value = azapi_resource.acc.id\n}\n\noutput \"account_name\" {\n  value = azapi_resource.acc.name\n}\n",
    )
    .unwrap();

    let plan = json!({
        "resource_changes": [
            rg_change(),
            change("azapi_resource.acc", "azapi_resource", "acc", Value::Null, account_before("acc1")),
        ],
        "configuration": {"root_module": {"resources": [account_config()]}}
    });
    let tf = FakeTerraform::new(plan).with(
        &account_id("acc1"),
        &generated_account("acc1"),
        account_state("acc1"),
    );
    let coverage = CoverageTable::embedded().unwrap();
    let resolver = StaticTypeResolver::new();

    let report = executor::migrate(&options(dir.path(), true), &tf, &resolver, &coverage).unwrap();
    assert_eq!(report.migrated, vec!["azapi_resource.acc"]);
    assert!(report.skipped.is_empty(), "{:?}", report.skipped);
    assert!(report.dangling.is_empty(), "{:?}", report.dangling);
    assert_eq!(report.files.len(), 2);

    let blocks = top_level(&dir.path().join("main.tf"));
    let replacements: Vec<_> = blocks
        .iter()
        .filter(|b| b.is_resource("azurerm_automation_account", "acc"))
        .collect();
    assert_eq!(replacements.len(), 1);
    let new = replacements[0];
    assert_eq!(new.attribute("resource_group_name"), Some("azurerm_resource_group.rg.name"));
    assert_eq!(new.attribute("sku_name"), Some("\"Basic\""));
    assert!(new.attribute("public_network_access_enabled").is_none());
    assert!(!blocks.iter().any(|b| b.is_resource("azapi_resource", "acc")));

    let removed: Vec<_> = blocks.iter().filter(|b| b.ident == "removed").collect();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].attribute("from"), Some("azapi_resource.acc"));
    let import: Vec<_> = blocks.iter().filter(|b| b.ident == "import").collect();
    assert_eq!(import.len(), 1);
    assert_eq!(import[0].attribute("to"), Some("azurerm_automation_account.acc"));
    assert_eq!(import[0].attribute("id"), Some(format!("\"{}\"", account_id("acc1")).as_str()));

    let main = std::fs::read_to_string(dir.path().join("main.tf")).unwrap();
    assert!(main.contains("# resource \"azapi_resource\" \"acc\" {"));

    let outputs = std::fs::read_to_string(dir.path().join("outputs.tf")).unwrap();
    assert!(outputs.contains("value = azurerm_automation_account.acc.id"));
    assert!(outputs.contains("value = azurerm_automation_account.acc.name"));

    let workspace = Workspace::load(dir.path()).unwrap();
    assert!(workspace.dangling("azapi_resource.acc").is_empty());

    let migrated = report
        .resources
        .iter()
        .find(|r| matches!(r, ResourceDescriptor::Untyped(_)))
        .unwrap();
    assert!(migrated.is_migrated());
    assert_eq!(
        migrated.new_address().as_deref(),
        Some("azurerm_automation_account.acc")
    );
}

#[test]
fn test_migrate_for_each_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("main.tf"),
        "resource \"azapi_resource\" \"acc\" {\n  for_each  = toset([\"blue\", \"green\"])\n  type      = \"Microsoft.Automation/automationAccounts@2023-11-01\"\n  parent_id = \"/subscriptions/s/resourceGroups/rg1\"\n  name      = \"acc-${each.key}\"\n  location  = \"westeurope\"\n}\n",
    )
    .unwrap();

    let plan = json!({
        "resource_changes": [
            change("azapi_resource.acc[\"blue\"]", "azapi_resource", "acc", json!("blue"), account_before("acc-blue")),
            change("azapi_resource.acc[\"green\"]", "azapi_resource", "acc", json!("green"), account_before("acc-green")),
        ]
    });
    let tf = FakeTerraform::new(plan)
        .with(&account_id("acc-blue"), &generated_account("acc-blue"), account_state("acc-blue"))
        .with(&account_id("acc-green"), &generated_account("acc-green"), account_state("acc-green"));
    let coverage = CoverageTable::embedded().unwrap();
    let resolver = StaticTypeResolver::new();

    let report = executor::migrate(&options(dir.path(), false), &tf, &resolver, &coverage).unwrap();
    assert_eq!(report.migrated, vec!["azapi_resource.acc"]);

    let blocks = top_level(&dir.path().join("main.tf"));
    let new = blocks
        .iter()
        .find(|b| b.is_resource("azurerm_automation_account", "acc"))
        .unwrap();
    let for_each = new.attribute("for_each").unwrap();
    assert!(for_each.contains("\"blue\""));
    assert!(for_each.contains("\"acc-green\""));
    assert_eq!(new.attribute("name"), Some("each.value.name"));
    assert_eq!(new.attribute("sku_name"), Some("\"Basic\""));

    let import = blocks.iter().find(|b| b.ident == "import").unwrap();
    assert_eq!(import.attribute("to"), Some("azurerm_automation_account.acc[each.value]"));
    assert!(import.attribute("for_each").unwrap().contains(&account_id("acc-blue")));
}

fn counted_account(name: &str, sku: &str, note: &str) -> String {
    format!(
        r#"resource "azurerm_automation_account" "azmigrate_import" {{
  name                = "{}"
  location            = "westeurope"
  resource_group_name = "rg1"
  sku_name            = "{}"
  tags = {{
    note = "{}"
  }}
}}
"#,
        name, sku, note
    )
}

#[test]
fn test_migrate_count_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("main.tf"),
        "resource \"azapi_resource\" \"acc\" {\n  count     = 2\n  type      = \"Microsoft.Automation/automationAccounts@2023-11-01\"\n  parent_id = \"/subscriptions/s/resourceGroups/rg1\"\n  name      = \"acc-${count.index}\"\n}\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("outputs.tf"),
        "output \"first\" {\n  value = azapi_resource.acc[0].name\n}\n",
    )
    .unwrap();

    let plan = json!({
        "resource_changes": [
            change("azapi_resource.acc[0]", "azapi_resource", "acc", json!(0), account_before("acc-0")),
            change("azapi_resource.acc[1]", "azapi_resource", "acc", json!(1), account_before("acc-1")),
        ]
    });
    let tf = FakeTerraform::new(plan)
        .with(&account_id("acc-0"), &counted_account("acc-0", "Basic", "ü—0"), account_state("acc-0"))
        .with(&account_id("acc-1"), &counted_account("acc-1", "Free", "ü—1"), account_state("acc-1"));
    let coverage = CoverageTable::embedded().unwrap();
    let resolver = StaticTypeResolver::new();

    let report = executor::migrate(&options(dir.path(), false), &tf, &resolver, &coverage).unwrap();
    assert_eq!(report.migrated, vec!["azapi_resource.acc"]);
    assert!(report.dangling.is_empty(), "{:?}", report.dangling);

    let blocks = top_level(&dir.path().join("main.tf"));
    let at = blocks
        .iter()
        .position(|b| b.is_resource("azurerm_automation_account", "acc"))
        .unwrap();
    let new = &blocks[at];
    assert_eq!(new.attribute("count"), Some("2"));
    assert_eq!(new.attribute("name"), Some("\"acc-${count.index}\""));
    assert_eq!(
        new.attribute("sku_name"),
        Some("local.acc_instances[count.index].sku_name")
    );
    assert!(new.attribute("tags").unwrap().contains("\"ü—${count.index}\""));

    let locals = &blocks[at + 1];
    assert_eq!(locals.ident, "locals");
    let table = locals.attribute("acc_instances").unwrap();
    assert!(table.contains("\"0\""));
    assert!(table.contains("\"Free\""));

    let import = blocks.iter().find(|b| b.ident == "import").unwrap();
    assert_eq!(import.attribute("to"), Some("azurerm_automation_account.acc[each.value]"));
    let keys = import.attribute("for_each").unwrap();
    assert!(keys.contains(&format!("\"{}\" = 0", account_id("acc-0"))));
    assert!(keys.contains(&format!("\"{}\" = 1", account_id("acc-1"))));

    let outputs = std::fs::read_to_string(dir.path().join("outputs.tf")).unwrap();
    assert!(outputs.contains("value = azurerm_automation_account.acc[0].name"));
}

#[test]
fn test_migrate_patch_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let id = account_id("acc1");
    std::fs::write(
        dir.path().join("main.tf"),
        format!(
            "{}\nresource \"azurerm_automation_account\" \"acc\" {{\n  name                = \"acc1\"\n  location            = azurerm_resource_group.rg.location\n  resource_group_name = azurerm_resource_group.rg.name\n  sku_name            = \"Basic\"\n}}\n\nresource \"azapi_update_resource\" \"lockdown\" {{\n  type        = \"Microsoft.Automation/automationAccounts@2023-11-01\"\n  resource_id = azurerm_automation_account.acc.id\n  body = {{\n    properties = {{ publicNetworkAccess = false }}\n  }}\n}}\n\noutput \"patched\" {{\n  value = azapi_update_resource.lockdown.id\n}}\n",
            RG_TF
        ),
    )
    .unwrap();

    let typed_before = json!({
        "id": id, "name": "acc1", "location": "westeurope",
        "resource_group_name": "rg1", "sku_name": "Basic",
        "public_network_access_enabled": true
    });
    let patch_before = json!({
        "id": id, "resource_id": id,
        "type": "Microsoft.Automation/automationAccounts@2023-11-01",
        "body": {"properties": {"publicNetworkAccess": false}}
    });
    let plan = json!({
        "resource_changes": [
            rg_change(),
            change("azurerm_automation_account.acc", "azurerm_automation_account", "acc", Value::Null, typed_before),
            change("azapi_update_resource.lockdown", "azapi_update_resource", "lockdown", Value::Null, patch_before),
        ]
    });
    let live = "resource \"azurerm_automation_account\" \"azmigrate_import\" {\n  name                          = \"acc1\"\n  location                      = \"westeurope\"\n  resource_group_name           = \"rg1\"\n  sku_name                      = \"Basic\"\n  public_network_access_enabled = false\n}\n";
    let live_state = json!({
        "id": id, "name": "acc1", "location": "westeurope",
        "resource_group_name": "rg1", "sku_name": "Basic",
        "public_network_access_enabled": false
    });
    let tf = FakeTerraform::new(plan).with(&id, live, live_state);
    let coverage = CoverageTable::embedded().unwrap();
    let resolver = StaticTypeResolver::new();

    let report = executor::migrate(&options(dir.path(), false), &tf, &resolver, &coverage).unwrap();
    assert_eq!(report.migrated, vec!["azapi_update_resource.lockdown"]);

    let blocks = top_level(&dir.path().join("main.tf"));
    let target = blocks
        .iter()
        .find(|b| b.is_resource("azurerm_automation_account", "acc"))
        .unwrap();
    assert_eq!(target.attribute("location"), Some("azurerm_resource_group.rg.location"));
    assert_eq!(target.attribute("public_network_access_enabled"), Some("false"));
    assert!(!blocks.iter().any(|b| b.is_resource("azapi_update_resource", "lockdown")));
    assert!(!blocks.iter().any(|b| b.ident == "import"));
    let removed = blocks.iter().find(|b| b.ident == "removed").unwrap();
    assert_eq!(removed.attribute("from"), Some("azapi_update_resource.lockdown"));

    let output = blocks.iter().find(|b| b.ident == "output").unwrap();
    assert_eq!(output.attribute("value"), Some("azurerm_automation_account.acc.id"));
}

#[test]
fn test_migrate_failures_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("main.tf"),
        "resource \"azapi_resource\" \"acc\" {\n  name = \"acc1\"\n}\n\nresource \"azapi_resource\" \"gone\" {\n  name = \"gone\"\n}\n\nresource \"azapi_resource\" \"site\" {\n  name = \"app\"\n}\n",
    )
    .unwrap();

    let mut site = account_before("app");
    site["id"] = json!(format!("{}/providers/Microsoft.Web/sites/app", RG_ID));
    site["type"] = json!("Microsoft.Web/sites@2023-01-01");
    let plan = json!({
        "resource_changes": [
            change("azapi_resource.acc", "azapi_resource", "acc", Value::Null, account_before("acc1")),
            change("azapi_resource.gone", "azapi_resource", "gone", Value::Null, account_before("gone")),
            change("azapi_resource.site", "azapi_resource", "site", Value::Null, site),
        ]
    });
    // only acc1 can be imported
    let tf = FakeTerraform::new(plan).with(
        &account_id("acc1"),
        &generated_account("acc1"),
        account_state("acc1"),
    );
    let coverage = CoverageTable::embedded().unwrap();
    let resolver = StaticTypeResolver::new();

    let report = executor::migrate(&options(dir.path(), false), &tf, &resolver, &coverage).unwrap();
    assert_eq!(report.migrated, vec!["azapi_resource.acc"]);
    let skipped: Vec<&str> = report.skipped.iter().map(|(a, _)| a.as_str()).collect();
    assert_eq!(skipped, vec!["azapi_resource.gone", "azapi_resource.site"]);
    assert!(report.skipped[0].1.contains("non-existent"));
    assert!(report.skipped[1].1.contains("ambiguous"));

    let blocks = top_level(&dir.path().join("main.tf"));
    assert!(blocks.iter().any(|b| b.is_resource("azapi_resource", "gone")));
    assert!(blocks.iter().any(|b| b.is_resource("azapi_resource", "site")));
    assert!(blocks.iter().any(|b| b.is_resource("azurerm_automation_account", "acc")));
}

#[test]
fn test_migrate_plan_dry_run_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let source = "resource \"azapi_resource\" \"acc\" {\n  name = \"acc1\"\n}\n";
    std::fs::write(dir.path().join("main.tf"), source).unwrap();

    let mut before = account_before("acc1");
    before["body"] = json!({"properties": {"sku": {"name": "Basic"}, "brandNew": true}});
    let plan = json!({
        "resource_changes": [
            change("azapi_resource.acc", "azapi_resource", "acc", Value::Null, before),
        ]
    });
    let tf = FakeTerraform::new(plan);
    let coverage = CoverageTable::embedded().unwrap();
    let resolver = StaticTypeResolver::new();

    let listing = executor::plan(&options(dir.path(), true), &tf, &resolver, &coverage).unwrap();
    assert_eq!(listing.summary(), "Plan: 0 to migrate, 1 blocked.");
    assert!(listing.entries[0].to_string().contains("properties.brandNew"));

    let report = executor::migrate(&options(dir.path(), true), &tf, &resolver, &coverage).unwrap();
    assert!(report.migrated.is_empty());
    assert!(report.files.is_empty());
    assert_eq!(std::fs::read_to_string(dir.path().join("main.tf")).unwrap(), source);
}
