//! State-diff patch: fold a regenerated declaration into a hand-edited one,
//! touching only what the before/after snapshots say has changed.

use super::{HclBlock, META_ATTRIBUTES, META_BLOCKS};
use crate::core::error::{MigrateError, Result};
use serde_json::Value;

/// Reconcile `existing` with `regenerated`.
///
/// `before` is the live state the regenerated block was produced from and
/// `after` the planned state of the existing declaration. Attributes and
/// nested blocks whose snapshots agree keep their existing expression.
pub fn reconcile(
    existing: &HclBlock,
    regenerated: &HclBlock,
    before: &Value,
    after: &Value,
) -> Result<HclBlock> {
    patch(existing, regenerated, before, after, "")
}

fn patch(
    existing: &HclBlock,
    regenerated: &HclBlock,
    before: &Value,
    after: &Value,
    path: &str,
) -> Result<HclBlock> {
    let mut out = existing.clone();

    let mut names: Vec<&String> = existing.attributes.keys().collect();
    for name in regenerated.attributes.keys() {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    for name in names {
        if META_ATTRIBUTES.contains(&name.as_str()) {
            continue;
        }
        let was = field(before, name);
        let now = field(after, name);
        if was == now {
            continue;
        }
        if was.is_null() {
            // added: only the planned state has it
            out.remove_attribute(name);
            continue;
        }
        match regenerated.attribute(name) {
            Some(expr) => out.set_attribute(name.as_str(), expr),
            None => {
                out.remove_attribute(name);
            }
        }
    }

    let mut types = existing.block_types();
    for t in regenerated.block_types() {
        if !types.contains(&t) {
            types.push(t);
        }
    }
    for t in types {
        if META_BLOCKS.contains(&t.as_str()) {
            continue;
        }
        let was = items(before, &t);
        let now = items(after, &t);
        if was == now {
            continue;
        }
        let current: Vec<&HclBlock> = existing.blocks_of(&t).collect();
        let generated: Vec<&HclBlock> = regenerated.blocks_of(&t).collect();

        let replacement: Vec<HclBlock> = if current.is_empty()
            || generated.is_empty()
            || current.len() != generated.len()
        {
            generated.into_iter().cloned().collect()
        } else {
            let child_path = join(path, &t);
            if was.len() != generated.len() {
                return Err(MigrateError::Reconcile {
                    path: child_path,
                    expected: was.len(),
                    found: generated.len(),
                });
            }
            let mut patched = Vec::with_capacity(generated.len());
            for (i, (cur, gen)) in current.iter().zip(&generated).enumerate() {
                let planned = now.get(i).copied().unwrap_or(&Value::Null);
                patched.push(patch(
                    cur,
                    gen,
                    was[i],
                    planned,
                    &format!("{}.{}", child_path, i),
                )?);
            }
            patched
        };
        splice_blocks(&mut out, &t, replacement);
    }

    Ok(out)
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", path, segment)
    }
}

/// An object field, `null` when absent.
fn field<'a>(snapshot: &'a Value, name: &str) -> &'a Value {
    snapshot.get(name).unwrap_or(&Value::Null)
}

/// Nested block snapshots are lists of objects; a lone object counts as one.
fn items<'a>(snapshot: &'a Value, name: &str) -> Vec<&'a Value> {
    match snapshot.get(name) {
        Some(Value::Array(values)) => values.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

/// Replace all nested blocks of one type, keeping their position.
fn splice_blocks(block: &mut HclBlock, ident: &str, replacement: Vec<HclBlock>) {
    let at = block
        .blocks
        .iter()
        .position(|b| b.ident == ident)
        .unwrap_or(block.blocks.len());
    block.remove_blocks(ident);
    let at = at.min(block.blocks.len());
    block.blocks.splice(at..at, replacement);
}
