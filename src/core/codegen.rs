//! Configuration generation: dispatch per descriptor variant.
//!
//! Untyped and typed descriptors get a new declaration of the opposite
//! family, built from Terraform's generated configuration with references
//! re-injected and instances merged. Patches get their target declaration
//! reconciled in place.

use super::error::{MigrateError, Result};
use super::types::{Descriptor, IndexKind, InstanceIndex, PatchTarget, ResourceDescriptor, AZAPI_RESOURCE};
use crate::hcl::combine::{
    combine_blocks, for_each_constants, reproduces_count, row_key, DivergenceMap, MergeMode,
};
use crate::hcl::reconcile::reconcile;
use crate::hcl::rewrite::{inject_references, resolve_outputs, value_prop_map};
use crate::hcl::HclBlock;
use crate::transport::{ImportedResource, Terraform, TypeResolver};

/// Meta-configuration moved from the old declaration onto the new one.
const CARRIED_BLOCKS: &[&str] = &["lifecycle", "provisioner"];

/// A replacement declaration plus blocks emitted after it.
#[derive(Debug, Clone)]
pub struct Generated {
    pub block: HclBlock,
    pub companions: Vec<HclBlock>,
}

/// Generates replacement declarations through Terraform.
pub struct Generator<'a> {
    terraform: &'a dyn Terraform,
    resolver: &'a dyn TypeResolver,
}

impl<'a> Generator<'a> {
    pub fn new(terraform: &'a dyn Terraform, resolver: &'a dyn TypeResolver) -> Self {
        Self {
            terraform,
            resolver,
        }
    }

    /// Generate the replacement for `resource`.
    ///
    /// `existing` is the declaration being replaced; for a patch it is the
    /// target's declaration. Sets the new type and resolves outputs, but
    /// leaves the migrated flag to the caller.
    pub fn generate(&self, resource: &mut ResourceDescriptor, existing: &HclBlock) -> Result<Generated> {
        match resource {
            ResourceDescriptor::Untyped(d) => {
                let id = d
                    .instances
                    .first()
                    .map(|i| i.resource_id.clone())
                    .unwrap_or_default();
                let new_type = self.resolver.resolve(&id)?;
                self.generate_resource(d, new_type, existing)
            }
            ResourceDescriptor::Typed(d) => self.generate_resource(d, AZAPI_RESOURCE.to_string(), existing),
            ResourceDescriptor::Patch { descriptor, target } => {
                let block = self.generate_patch(descriptor, target, existing)?;
                Ok(Generated {
                    block,
                    companions: Vec::new(),
                })
            }
        }
    }

    fn import(&self, address: &str, resource_type: &str, id: &str) -> Result<ImportedResource> {
        self.terraform
            .import(resource_type, id)
            .map_err(|e| MigrateError::Generation {
                address: address.to_string(),
                message: e.to_string(),
            })
    }

    fn generate_resource(&self, d: &mut Descriptor, new_type: String, old: &HclBlock) -> Result<Generated> {
        d.new_type = Some(new_type.clone());

        let mut blocks = Vec::with_capacity(d.instances.len());
        for instance in d.instances.iter_mut() {
            let old_address = format!("{}.{}{}", d.old_type, d.label, instance.index);
            let new_address = format!("{}.{}{}", new_type, d.label, instance.index);
            let imported = self.import(&old_address, &new_type, &instance.resource_id)?;

            let mut block = imported.block;
            block.labels = vec![new_type.clone(), d.label.clone()];
            block.prune_nulls();

            let props = value_prop_map(&block, &new_address);
            resolve_outputs(&mut instance.outputs, &props, &old_address, &new_address);
            blocks.push(inject_references(&block, &d.references));
        }

        let mut companions = Vec::new();
        let mut block = match d.index_kind() {
            IndexKind::Singleton => blocks.into_iter().next().ok_or_else(|| MigrateError::Generation {
                address: d.old_base_address(),
                message: "no instances".to_string(),
            })?,
            IndexKind::Count => {
                let output = HclBlock::resource(&new_type, &d.label);
                let (mut merged, divergence) = combine_blocks(&blocks, output, MergeMode::Count);
                if let Some(locals) = count_fallback(d, &mut merged, &divergence) {
                    companions.push(locals);
                }
                let count = old
                    .attribute("count")
                    .map(str::to_string)
                    .unwrap_or_else(|| d.instances.len().to_string());
                merged.prepend_attribute("count", count);
                merged
            }
            IndexKind::ForEach => {
                let output = HclBlock::resource(&new_type, &d.label);
                let (mut merged, divergence) = combine_blocks(&blocks, output, MergeMode::ForEach);
                let for_each = match old.attribute("for_each") {
                    Some(expr) if divergence.is_empty() => expr.to_string(),
                    _ => for_each_constants(&divergence, &d.instances),
                };
                merged.prepend_attribute("for_each", for_each);
                merged
            }
        };
        carry_meta(old, &mut block);

        tracing::debug!(
            address = %d.old_base_address(),
            new_type = %new_type,
            instances = d.instances.len(),
            "generated replacement"
        );
        d.companions = companions.clone();
        Ok(Generated { block, companions })
    }

    fn generate_patch(&self, d: &mut Descriptor, target: &PatchTarget, existing: &HclBlock) -> Result<HclBlock> {
        let target_address = target.address();
        let imported = self.import(&d.old_base_address(), &target.resource_type, &target.resource_id)?;

        let mut regenerated = imported.block;
        regenerated.labels = vec![target.resource_type.clone(), target.label.clone()];
        regenerated.prune_nulls();
        let regenerated = inject_references(&regenerated, &d.references);

        let block = reconcile(existing, &regenerated, &imported.state, &target.after)?;

        d.new_type = Some(target.resource_type.clone());
        let props = value_prop_map(&block, &target_address);
        let old_address = d.old_address(&InstanceIndex::None);
        for instance in d.instances.iter_mut() {
            resolve_outputs(&mut instance.outputs, &props, &old_address, &target_address);
        }
        Ok(block)
    }
}

/// Rewrite count templates that do not reproduce every instance to index a
/// `locals` table, and return that table.
fn count_fallback(d: &Descriptor, merged: &mut HclBlock, divergence: &DivergenceMap) -> Option<HclBlock> {
    let indices: Vec<i64> = d
        .instances
        .iter()
        .map(|i| match i.index {
            InstanceIndex::Count(n) => n,
            _ => 0,
        })
        .collect();
    let table = format!("{}_instances", d.label);

    let mut fallback = DivergenceMap::new();
    for (path, values) in divergence {
        let template = merged.attribute_at(path).unwrap_or_default().to_string();
        if reproduces_count(&template, values, &indices) {
            continue;
        }
        let lookup = format!("local.{}[count.index].{}", table, row_key(path));
        merged.set_attribute_at(path, &lookup);
        fallback.insert(path.clone(), values.clone());
    }
    if fallback.is_empty() {
        return None;
    }
    let mut locals = HclBlock::new("locals", vec![]);
    locals.set_attribute(table, for_each_constants(&fallback, &d.instances));
    Some(locals)
}

fn carry_meta(old: &HclBlock, new: &mut HclBlock) {
    if let Some(expr) = old.attribute("depends_on") {
        new.set_attribute("depends_on", expr);
    }
    for block in old.blocks.iter().filter(|b| CARRIED_BLOCKS.contains(&b.ident.as_str())) {
        new.push_block(block.clone());
    }
}
