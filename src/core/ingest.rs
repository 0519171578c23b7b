//! Plan ingestion: Terraform plan JSON -> resource descriptors.
//!
//! Besides the descriptors, ingestion builds the reference-value map: every
//! literal in the plan keyed by the attribute path that produces it. That map
//! resolves references and becomes each instance's outputs.

use super::coverage::strip_array_indices;
use super::plan::{Plan, ResourceChange};
use super::types::{
    Descriptor, Instance, InstanceIndex, Output, PatchTarget, Reference, ResourceDescriptor,
    AZAPI_RESOURCE, AZAPI_UPDATE_RESOURCE, AZURERM_PREFIX,
};
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

/// Result of ingesting one plan.
#[derive(Debug, Default)]
pub struct Ingested {
    pub resources: Vec<ResourceDescriptor>,

    /// Fully-qualified attribute path -> literal value
    pub ref_values: IndexMap<String, Value>,
}

/// Parse and ingest a plan. A malformed plan yields nothing to migrate.
pub fn ingest_plan(json: &str) -> Ingested {
    match Plan::from_json(json) {
        Ok(plan) => ingest(&plan),
        Err(e) => {
            tracing::warn!(error = %e, "malformed plan, nothing to migrate");
            Ingested::default()
        }
    }
}

/// Build descriptors from a parsed plan.
pub fn ingest(plan: &Plan) -> Ingested {
    let changes: Vec<&ResourceChange> = plan
        .resource_changes
        .iter()
        .filter(|rc| rc.is_managed() && rc.module_address.is_none())
        .collect();

    let mut ref_values = IndexMap::new();
    for (name, variable) in &plan.variables {
        flatten(&format!("var.{}", name), &variable.value, &mut ref_values);
    }
    for rc in &changes {
        record_values(rc, &mut ref_values);
    }

    let typed_by_id: IndexMap<String, &ResourceChange> = changes
        .iter()
        .filter(|rc| rc.resource_type.starts_with(AZURERM_PREFIX))
        .filter_map(|rc| rc.resource_id().map(|id| (id.to_lowercase(), *rc)))
        .collect();

    let mut groups: IndexMap<(String, String), Vec<&ResourceChange>> = IndexMap::new();
    for rc in &changes {
        if !is_migratable(&rc.resource_type) {
            continue;
        }
        if rc.change.before.is_null() {
            tracing::debug!(address = %rc.address, "not deployed yet, skipping");
            continue;
        }
        groups
            .entry((rc.resource_type.clone(), rc.name.clone()))
            .or_default()
            .push(rc);
    }

    let mut resources = Vec::new();
    let mut patched: IndexSet<String> = IndexSet::new();
    for ((resource_type, label), group) in &groups {
        let address = format!("{}.{}", resource_type, label);
        let Some(instances) = build_instances(&address, group, &ref_values) else {
            continue;
        };
        let mut descriptor = Descriptor::new(label.as_str(), resource_type.as_str(), instances);
        descriptor.references = references(plan, &address, &ref_values);

        if resource_type.starts_with(AZURERM_PREFIX) {
            resources.push(ResourceDescriptor::Typed(descriptor));
            continue;
        }
        descriptor.input_properties = input_properties(&descriptor.instances);
        descriptor.output_properties = output_properties(&descriptor);

        if resource_type == AZAPI_RESOURCE {
            resources.push(ResourceDescriptor::Untyped(descriptor));
            continue;
        }

        if descriptor.is_multiple() {
            tracing::warn!(address = %address, "patch resources with count/for_each are not supported, dropping");
            continue;
        }
        let target_id = group[0]
            .change
            .before
            .get("resource_id")
            .and_then(Value::as_str)
            .unwrap_or(&descriptor.instances[0].resource_id)
            .to_lowercase();
        let Some(target) = typed_by_id.get(&target_id) else {
            tracing::warn!(address = %address, resource_id = %target_id, "patch target is not in the plan, dropping");
            continue;
        };
        let Some(index) = InstanceIndex::from_json(target.index.as_ref()) else {
            continue;
        };
        patched.insert(format!("{}.{}", target.resource_type, target.name));
        resources.push(ResourceDescriptor::Patch {
            descriptor,
            target: PatchTarget {
                resource_type: target.resource_type.clone(),
                label: target.name.clone(),
                index,
                resource_id: target.resource_id().unwrap_or_default().to_string(),
                after: target.change.after.clone(),
            },
        });
    }

    // typed resources owned by a patch move together with it
    resources.retain(|r| {
        !matches!(r, ResourceDescriptor::Typed(d) if patched.contains(&d.old_base_address()))
    });

    tracing::info!(
        resources = resources.len(),
        values = ref_values.len(),
        "ingested plan"
    );
    Ingested {
        resources,
        ref_values,
    }
}

fn is_migratable(resource_type: &str) -> bool {
    resource_type == AZAPI_RESOURCE
        || resource_type == AZAPI_UPDATE_RESOURCE
        || resource_type.starts_with(AZURERM_PREFIX)
}

fn build_instances(
    address: &str,
    group: &[&ResourceChange],
    ref_values: &IndexMap<String, Value>,
) -> Option<Vec<Instance>> {
    let mut instances = Vec::with_capacity(group.len());
    for rc in group {
        let Some(index) = InstanceIndex::from_json(rc.index.as_ref()) else {
            tracing::warn!(address = %rc.address, "unrecognized instance index, dropping");
            return None;
        };
        let Some(resource_id) = rc.resource_id() else {
            tracing::warn!(address = %rc.address, "no resource id in state, dropping");
            return None;
        };
        let api_version = if rc.resource_type.starts_with("azapi_") {
            rc.change
                .before
                .get("type")
                .and_then(Value::as_str)
                .and_then(|t| t.split_once('@'))
                .map(|(_, version)| version.to_string())
        } else {
            None
        };
        instances.push(Instance {
            index,
            resource_id: resource_id.to_string(),
            api_version,
            outputs: outputs_of(&rc.address, ref_values),
            before: rc.change.before.clone(),
            after: rc.change.after.clone(),
        });
    }

    let kind = instances.first()?.index.kind();
    if instances.iter().any(|i| i.index.kind() != kind) {
        tracing::warn!(address = %address, "instances mix index kinds, dropping");
        return None;
    }
    Some(instances)
}

/// Flatten `value` into `out` as `prefix.a.b.0.c` -> leaf. Nulls are skipped.
pub fn flatten(prefix: &str, value: &Value, out: &mut IndexMap<String, Value>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, v) in map {
                flatten(&join(prefix, key), v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten(&join(prefix, &i.to_string()), v, out);
            }
        }
        scalar => {
            out.insert(prefix.to_string(), scalar.clone());
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// Path under which a JSON-encoded azapi output is exposed.
fn decoded_output_prefix(address: &str) -> String {
    format!("jsondecode({}.output)", address)
}

fn record_values(rc: &ResourceChange, out: &mut IndexMap<String, Value>) {
    let before = &rc.change.before;
    flatten(&rc.address, before, out);
    if rc.resource_type == AZAPI_RESOURCE {
        if let Some(Value::String(raw)) = before.get("output") {
            match serde_json::from_str::<Value>(raw) {
                Ok(decoded) => flatten(&decoded_output_prefix(&rc.address), &decoded, out),
                Err(e) => tracing::debug!(address = %rc.address, error = %e, "output is not JSON"),
            }
        }
    }
}

fn outputs_of(address: &str, ref_values: &IndexMap<String, Value>) -> Vec<Output> {
    let plain = format!("{}.", address);
    let decoded = decoded_output_prefix(address);
    ref_values
        .iter()
        .filter(|(path, _)| path.starts_with(&plain) || path.starts_with(&decoded))
        .map(|(path, value)| Output::new(path.as_str(), value.clone()))
        .collect()
}

/// References written in the declaration, widened by the id/name rule and
/// resolved against the reference-value map.
fn references(plan: &Plan, address: &str, ref_values: &IndexMap<String, Value>) -> Vec<Reference> {
    let Some(config) = plan.config_resource(address) else {
        return Vec::new();
    };
    let mut written = Vec::new();
    for expr in config.expressions.values() {
        collect_references(expr, &mut written);
    }
    infer_references(written)
        .into_iter()
        .filter_map(|name| match ref_values.get(&name) {
            Some(value) if !value.is_object() && !value.is_array() => Some(Reference {
                value: value.clone(),
                name,
            }),
            _ => None,
        })
        .collect()
}

fn collect_references(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                match (key.as_str(), v) {
                    ("references", Value::Array(items)) => {
                        for name in items.iter().filter_map(Value::as_str) {
                            if !out.iter().any(|n| n == name) {
                                out.push(name.to_string());
                            }
                        }
                    }
                    _ => collect_references(v, out),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        _ => {}
    }
}

/// `t.n.id` also brings `t.n.name` (and `t.n.location` for resource
/// groups); `t.n.name` brings `t.n.id`.
pub fn infer_references(written: Vec<String>) -> Vec<String> {
    let mut names: IndexSet<String> = IndexSet::new();
    for name in written {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() == 3 {
            let base = format!("{}.{}", parts[0], parts[1]);
            match parts[2] {
                "id" => {
                    names.insert(format!("{}.name", base));
                    if parts[0].contains("resource_group") {
                        names.insert(format!("{}.location", base));
                    }
                }
                "name" => {
                    names.insert(format!("{}.id", base));
                }
                _ => {}
            }
        }
        names.insert(name);
    }
    names.into_iter().collect()
}

fn body_of(before: &Value) -> Value {
    match before.get("body") {
        Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or(Value::Null),
        Some(body) => body.clone(),
        None => Value::Null,
    }
}

fn identity_of(before: &Value) -> Option<&Value> {
    match before.get("identity") {
        Some(Value::Array(items)) => items.first(),
        Some(identity @ Value::Object(_)) => Some(identity),
        _ => None,
    }
}

/// Body property paths plus the first-class `location`, `tags` and
/// `identity` attributes, deduplicated.
fn input_properties(instances: &[Instance]) -> Vec<String> {
    let mut props: IndexSet<String> = IndexSet::new();
    for instance in instances {
        let before = &instance.before;
        let mut leaves = IndexMap::new();
        flatten("", &body_of(before), &mut leaves);
        props.extend(leaves.keys().map(|path| strip_array_indices(path)));

        if before
            .get("location")
            .and_then(Value::as_str)
            .is_some_and(|l| !l.is_empty())
        {
            props.insert("location".to_string());
        }
        if before
            .get("tags")
            .and_then(Value::as_object)
            .is_some_and(|t| !t.is_empty())
        {
            props.insert("tags".to_string());
        }
        if let Some(identity) = identity_of(before) {
            if identity
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| !t.is_empty() && t != "None")
            {
                props.insert("identity.type".to_string());
            }
            if identity
                .get("identity_ids")
                .and_then(Value::as_array)
                .is_some_and(|ids| !ids.is_empty())
            {
                props.insert("identity.userAssignedIdentities".to_string());
            }
        }
    }
    props.into_iter().collect()
}

/// Response property paths exposed through `output`.
fn output_properties(descriptor: &Descriptor) -> Vec<String> {
    const USER_IDENTITIES: &str = "identity.userAssignedIdentities.";
    let mut props: IndexSet<String> = IndexSet::new();
    for instance in &descriptor.instances {
        let address = descriptor.old_address(&instance.index);
        let prefixes = [
            format!("{}.", decoded_output_prefix(&address)),
            format!("{}.output.", address),
        ];
        for output in &instance.outputs {
            let Some(path) = prefixes
                .iter()
                .find_map(|p| output.old_name.strip_prefix(p.as_str()))
            else {
                continue;
            };
            let path = match path.strip_prefix(USER_IDENTITIES) {
                // keys are identity ids, keep only the field name
                Some(rest) => format!("{}{}", USER_IDENTITIES, rest.rsplit('.').next().unwrap_or(rest)),
                None => strip_array_indices(path),
            };
            props.insert(path);
        }
    }
    props.into_iter().collect()
}
