//! Resource descriptors: the in-memory model of a resource under migration.
//!
//! A descriptor is created once per declared address by plan ingestion,
//! gated by coverage, then given its replacement block by the transform
//! engine. Only its effect on the configuration files outlives the run.

use crate::hcl::HclBlock;
use serde_json::Value;
use std::fmt;

pub const AZAPI_RESOURCE: &str = "azapi_resource";
pub const AZAPI_UPDATE_RESOURCE: &str = "azapi_update_resource";
pub const AZURERM_PREFIX: &str = "azurerm_";

// ============================================================================
// Instances
// ============================================================================

/// How one instance is addressed under its declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstanceIndex {
    /// Singleton resource, no `count`/`for_each`
    None,
    /// `count`-based instance
    Count(i64),
    /// `for_each`-based instance
    Key(String),
}

/// The index kind shared by all instances of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Singleton,
    Count,
    ForEach,
}

impl InstanceIndex {
    /// Interpret the `index` field of a plan resource change.
    pub fn from_json(index: Option<&Value>) -> Option<Self> {
        match index {
            None | Some(Value::Null) => Some(Self::None),
            Some(Value::Number(n)) => n.as_i64().map(Self::Count),
            Some(Value::String(s)) => Some(Self::Key(s.clone())),
            Some(_) => None,
        }
    }

    pub fn kind(&self) -> IndexKind {
        match self {
            Self::None => IndexKind::Singleton,
            Self::Count(_) => IndexKind::Count,
            Self::Key(_) => IndexKind::ForEach,
        }
    }

    /// The HCL literal of the instance key: `0` or `"blue"`.
    pub fn key_literal(&self) -> String {
        match self {
            Self::None => "null".to_string(),
            Self::Count(i) => i.to_string(),
            Self::Key(k) => crate::hcl::quote(k),
        }
    }

    /// The instance key as a string map key: `"0"` or `"blue"`.
    pub fn map_key(&self) -> String {
        match self {
            Self::None => crate::hcl::quote(""),
            Self::Count(i) => crate::hcl::quote(&i.to_string()),
            Self::Key(k) => crate::hcl::quote(k),
        }
    }
}

/// Address suffix: empty, `[0]` or `["blue"]`.
impl fmt::Display for InstanceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Count(i) => write!(f, "[{}]", i),
            Self::Key(k) => write!(f, "[{}]", crate::hcl::quote(k)),
        }
    }
}

/// One concrete deployment behind an address.
#[derive(Debug, Clone)]
pub struct Instance {
    pub index: InstanceIndex,

    /// Azure resource id of the deployed resource
    pub resource_id: String,

    /// API version recorded in an `azapi` type string
    pub api_version: Option<String>,

    /// Old attribute paths of this instance and the values they resolve to
    pub outputs: Vec<Output>,

    /// Prior state snapshot from the plan
    pub before: Value,

    /// Planned state snapshot from the plan
    pub after: Value,
}

/// A symbolic expression and the literal it currently resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub name: String,
    pub value: Value,
}

/// Maps an old attribute path to its equivalent after migration.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub old_name: String,
    pub new_name: Option<String>,

    /// Concrete value of the old path, used to locate the new path
    pub value: Value,
}

impl Output {
    pub fn new(old_name: impl Into<String>, value: Value) -> Self {
        Self {
            old_name: old_name.into(),
            new_name: None,
            value,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.new_name.as_deref().is_some_and(|n| !n.is_empty())
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Fields shared by every descriptor variant.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// Declaration name
    pub label: String,

    pub old_type: String,

    /// Resolved during generation
    pub new_type: Option<String>,

    /// Non-empty, homogeneous in index kind
    pub instances: Vec<Instance>,

    pub references: Vec<Reference>,

    /// Dotted body property paths, array indices stripped
    pub input_properties: Vec<String>,

    /// Dotted response property paths, array indices stripped
    pub output_properties: Vec<String>,

    /// Replacement declaration, set when migrated
    pub block: Option<HclBlock>,

    /// Blocks emitted after the declaration (e.g. a `locals` table)
    pub companions: Vec<HclBlock>,

    migrated: bool,
}

impl Descriptor {
    pub fn new(label: impl Into<String>, old_type: impl Into<String>, instances: Vec<Instance>) -> Self {
        Self {
            label: label.into(),
            old_type: old_type.into(),
            new_type: None,
            instances,
            references: Vec::new(),
            input_properties: Vec::new(),
            output_properties: Vec::new(),
            block: None,
            companions: Vec::new(),
            migrated: false,
        }
    }

    pub fn index_kind(&self) -> IndexKind {
        self.instances
            .first()
            .map(|i| i.index.kind())
            .unwrap_or(IndexKind::Singleton)
    }

    pub fn is_multiple(&self) -> bool {
        self.index_kind() != IndexKind::Singleton
    }

    pub fn is_for_each(&self) -> bool {
        self.index_kind() == IndexKind::ForEach
    }

    /// `type.label` without instance index.
    pub fn old_base_address(&self) -> String {
        format!("{}.{}", self.old_type, self.label)
    }

    pub fn old_address(&self, index: &InstanceIndex) -> String {
        format!("{}.{}{}", self.old_type, self.label, index)
    }

    /// `None` until the new type has been resolved.
    pub fn new_address(&self, index: &InstanceIndex) -> Option<String> {
        self.new_type
            .as_ref()
            .map(|t| format!("{}.{}{}", t, self.label, index))
    }

    pub fn is_migrated(&self) -> bool {
        self.migrated
    }

    /// Record the replacement block. The flag never goes back to false.
    pub fn mark_migrated(&mut self, block: HclBlock) {
        self.block = Some(block);
        self.migrated = true;
    }

    /// Outputs whose new path is known.
    pub fn resolved_outputs(&self) -> Vec<Output> {
        self.instances
            .iter()
            .flat_map(|i| i.outputs.iter())
            .filter(|o| o.is_resolved())
            .cloned()
            .collect()
    }
}

/// The typed resource an `azapi_update_resource` patches.
#[derive(Debug, Clone)]
pub struct PatchTarget {
    pub resource_type: String,
    pub label: String,
    pub index: InstanceIndex,
    pub resource_id: String,

    /// Planned state of the target declaration
    pub after: Value,
}

impl PatchTarget {
    pub fn address(&self) -> String {
        format!("{}.{}{}", self.resource_type, self.label, self.index)
    }
}

/// A resource under migration.
#[derive(Debug, Clone)]
pub enum ResourceDescriptor {
    /// `azapi_resource`
    Untyped(Descriptor),
    /// `azurerm_*`
    Typed(Descriptor),
    /// `azapi_update_resource` and the typed resource it patches
    Patch {
        descriptor: Descriptor,
        target: PatchTarget,
    },
}

impl ResourceDescriptor {
    pub fn descriptor(&self) -> &Descriptor {
        match self {
            Self::Untyped(d) | Self::Typed(d) => d,
            Self::Patch { descriptor, .. } => descriptor,
        }
    }

    pub fn descriptor_mut(&mut self) -> &mut Descriptor {
        match self {
            Self::Untyped(d) | Self::Typed(d) => d,
            Self::Patch { descriptor, .. } => descriptor,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Untyped(_) => ResourceKind::Untyped,
            Self::Typed(_) => ResourceKind::Typed,
            Self::Patch { .. } => ResourceKind::Patch,
        }
    }

    /// Address of the old declaration, without instance index.
    pub fn old_address(&self) -> String {
        self.descriptor().old_base_address()
    }

    /// Address of the replacement declaration, without instance index.
    /// Patches land on their target.
    pub fn new_address(&self) -> Option<String> {
        match self {
            Self::Patch { target, .. } => Some(target.address()),
            _ => self.descriptor().new_address(&InstanceIndex::None),
        }
    }

    pub fn is_migrated(&self) -> bool {
        self.descriptor().is_migrated()
    }

    pub fn outputs(&self) -> Vec<Output> {
        self.descriptor().resolved_outputs()
    }
}

/// Resource family, used for direction filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Untyped,
    Typed,
    Patch,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untyped => write!(f, "untyped"),
            Self::Typed => write!(f, "typed"),
            Self::Patch => write!(f, "patch"),
        }
    }
}

/// Which provider family resources move to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// azapi -> azurerm
    #[default]
    ToTyped,
    /// azurerm -> azapi
    ToUntyped,
}

impl Direction {
    /// Whether a descriptor of this kind is migrated in this direction.
    pub fn selects(&self, kind: ResourceKind) -> bool {
        match self {
            Self::ToTyped => matches!(kind, ResourceKind::Untyped | ResourceKind::Patch),
            Self::ToUntyped => kind == ResourceKind::Typed,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToTyped => write!(f, "azapi -> azurerm"),
            Self::ToUntyped => write!(f, "azurerm -> azapi"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance(index: InstanceIndex, id: &str) -> Instance {
        Instance {
            index,
            resource_id: id.to_string(),
            api_version: None,
            outputs: Vec::new(),
            before: Value::Null,
            after: Value::Null,
        }
    }

    #[test]
    fn test_types_index_from_json() {
        assert_eq!(InstanceIndex::from_json(None), Some(InstanceIndex::None));
        assert_eq!(
            InstanceIndex::from_json(Some(&json!(2))),
            Some(InstanceIndex::Count(2))
        );
        assert_eq!(
            InstanceIndex::from_json(Some(&json!("blue"))),
            Some(InstanceIndex::Key("blue".to_string()))
        );
        assert_eq!(InstanceIndex::from_json(Some(&json!([1]))), None);
    }

    #[test]
    fn test_types_index_display() {
        assert_eq!(InstanceIndex::None.to_string(), "");
        assert_eq!(InstanceIndex::Count(3).to_string(), "[3]");
        assert_eq!(InstanceIndex::Key("a".into()).to_string(), "[\"a\"]");
        assert_eq!(InstanceIndex::Count(3).key_literal(), "3");
        assert_eq!(InstanceIndex::Count(3).map_key(), "\"3\"");
    }

    #[test]
    fn test_types_addresses() {
        let mut d = Descriptor::new(
            "test",
            AZAPI_RESOURCE,
            vec![instance(InstanceIndex::Count(0), "/a"), instance(InstanceIndex::Count(1), "/b")],
        );
        assert!(d.is_multiple());
        assert!(!d.is_for_each());
        assert_eq!(d.old_address(&InstanceIndex::Count(1)), "azapi_resource.test[1]");
        assert_eq!(d.new_address(&InstanceIndex::None), None);
        d.new_type = Some("azurerm_automation_account".to_string());
        assert_eq!(
            d.new_address(&InstanceIndex::Count(0)).unwrap(),
            "azurerm_automation_account.test[0]"
        );
    }

    #[test]
    fn test_types_migrated_is_monotonic() {
        let mut d = Descriptor::new("t", AZAPI_RESOURCE, vec![instance(InstanceIndex::None, "/a")]);
        assert!(!d.is_migrated());
        d.mark_migrated(HclBlock::resource("azurerm_x", "t"));
        assert!(d.is_migrated());
        assert!(d.block.is_some());
    }

    #[test]
    fn test_types_resolved_outputs() {
        let mut inst = instance(InstanceIndex::None, "/a");
        inst.outputs.push(Output::new("azapi_resource.t.id", json!("/a")));
        let mut resolved = Output::new("azapi_resource.t.name", json!("n"));
        resolved.new_name = Some("azurerm_x.t.name".to_string());
        inst.outputs.push(resolved);
        let d = Descriptor::new("t", AZAPI_RESOURCE, vec![inst]);
        let outs = d.resolved_outputs();
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].old_name, "azapi_resource.t.name");
    }

    #[test]
    fn test_types_direction_selects() {
        assert!(Direction::ToTyped.selects(ResourceKind::Untyped));
        assert!(Direction::ToTyped.selects(ResourceKind::Patch));
        assert!(!Direction::ToTyped.selects(ResourceKind::Typed));
        assert!(Direction::ToUntyped.selects(ResourceKind::Typed));
        assert_eq!(Direction::default(), Direction::ToTyped);
    }

    #[test]
    fn test_types_patch_new_address() {
        let d = Descriptor::new("p", AZAPI_UPDATE_RESOURCE, vec![instance(InstanceIndex::None, "/a")]);
        let r = ResourceDescriptor::Patch {
            descriptor: d,
            target: PatchTarget {
                resource_type: "azurerm_storage_account".into(),
                label: "sa".into(),
                index: InstanceIndex::None,
                resource_id: "/a".into(),
                after: Value::Null,
            },
        };
        assert_eq!(r.old_address(), "azapi_update_resource.p");
        assert_eq!(r.new_address().unwrap(), "azurerm_storage_account.sa");
        assert_eq!(r.kind(), ResourceKind::Patch);
    }
}
