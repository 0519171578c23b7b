//! Symbolic-reference recovery and output rewriting.
//!
//! Generated declarations are fully literal. These passes put references
//! back in (`"/subscriptions/.../rg1"` -> `azurerm_resource_group.rg.id`)
//! and move every consumer of an old attribute path onto the new one.

use super::{literal_for, quote, HclBlock, META_ATTRIBUTES};
use crate::core::types::{Output, Reference};
use indexmap::IndexMap;

/// Replace literals equal to a reference's value with the reference.
///
/// Longer values are tried first. A whole quoted literal becomes the bare
/// reference; an id-like value that starts a longer path becomes a
/// `${...}` interpolation.
pub fn inject_references(block: &HclBlock, references: &[Reference]) -> HclBlock {
    let mut ordered: Vec<(&str, &str)> = references
        .iter()
        .filter_map(|r| r.value.as_str().map(|v| (r.name.as_str(), v)))
        .filter(|(_, v)| !v.is_empty())
        .collect();
    ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let mut out = block.clone();
    inject_into(&mut out, &ordered);
    out
}

fn inject_into(block: &mut HclBlock, references: &[(&str, &str)]) {
    for (name, expr) in block.attributes.iter_mut() {
        if META_ATTRIBUTES.contains(&name.as_str()) {
            continue;
        }
        *expr = inject_expr(expr, references);
    }
    for nested in &mut block.blocks {
        inject_into(nested, references);
    }
}

fn inject_expr(expr: &str, references: &[(&str, &str)]) -> String {
    let mut out = expr.to_string();
    for (name, value) in references {
        let literal = quote(value);
        out = replace_values(&out, &literal, name);
        if value.starts_with('/') {
            let open = format!("{}/", &literal[..literal.len() - 1]);
            out = out.replace(&open, &format!("\"${{{}}}/", name));
        }
    }
    out
}

/// Replace `literal` with `name` wherever it is a value. A literal followed
/// by `=` is an object key and stays quoted.
fn replace_values(text: &str, literal: &str, name: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(literal) {
        let end = pos + literal.len();
        let after = rest[end..].trim_start();
        let is_key = after.starts_with('=') && !after.starts_with("==");
        out.push_str(&rest[..pos]);
        out.push_str(if is_key { literal } else { name });
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}

/// Reverse index from literal attribute text to its address-qualified path.
///
/// Nested attributes are addressed as `<address>.<block>.<i>.<attr>`.
/// Literals that occur at more than one path are left out.
pub fn value_prop_map(block: &HclBlock, address: &str) -> IndexMap<String, String> {
    let mut seen: IndexMap<String, Option<String>> = IndexMap::new();
    collect_values(block, address, &mut seen);
    seen.into_iter()
        .filter_map(|(literal, path)| path.map(|p| (literal, p)))
        .collect()
}

fn collect_values(block: &HclBlock, prefix: &str, seen: &mut IndexMap<String, Option<String>>) {
    for (name, expr) in &block.attributes {
        if META_ATTRIBUTES.contains(&name.as_str()) {
            continue;
        }
        let path = format!("{}.{}", prefix, name);
        match seen.get_mut(expr) {
            Some(slot) => *slot = None,
            None => {
                seen.insert(expr.clone(), Some(path));
            }
        }
    }
    for t in block.block_types() {
        for (i, nested) in block.blocks_of(&t).enumerate() {
            collect_values(nested, &format!("{}.{}.{}", prefix, t, i), seen);
        }
    }
}

/// Give each output its new path: `<old>.id` maps to `<new>.id`, everything
/// else is looked up by value in the replacement's value index.
pub fn resolve_outputs(
    outputs: &mut [Output],
    props: &IndexMap<String, String>,
    old_address: &str,
    new_address: &str,
) {
    let old_id = format!("{}.id", old_address);
    for output in outputs.iter_mut() {
        if output.old_name == old_id {
            output.new_name = Some(format!("{}.id", new_address));
            continue;
        }
        if let Some(path) = literal_for(&output.value).and_then(|lit| props.get(&lit)) {
            output.new_name = Some(path.clone());
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Byte offsets of whole-traversal occurrences of `needle` in `text`.
///
/// A match may not continue an identifier or traversal on the left, nor an
/// identifier on the right, so `a.b.id` is not found in `a.b.identity`.
pub fn find_traversals(text: &str, needle: &str) -> Vec<usize> {
    let mut found = Vec::new();
    if needle.is_empty() {
        return found;
    }
    let mut from = 0;
    while let Some(pos) = text[from..].find(needle) {
        let start = from + pos;
        let end = start + needle.len();
        let left = text[..start].chars().next_back();
        let right = text[end..].chars().next();
        let left_ok = left.map_or(true, |c| !is_ident_char(c) && c != '.');
        let right_ok = right.map_or(true, |c| !is_ident_char(c) && c != '-');
        if left_ok && right_ok {
            found.push(start);
            from = end;
        } else {
            from = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
    }
    found
}

/// Replace whole-traversal occurrences of `old` with `new`.
pub fn replace_traversal(text: &str, old: &str, new: &str) -> String {
    let hits = find_traversals(text, old);
    if hits.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for start in hits {
        out.push_str(&text[last..start]);
        out.push_str(new);
        last = start + old.len();
    }
    out.push_str(&text[last..]);
    out
}

/// Apply every resolved output rename to a piece of configuration text.
pub fn rewrite_outputs(text: &str, outputs: &[Output]) -> String {
    let mut renames: Vec<(&str, &str)> = outputs
        .iter()
        .filter_map(|o| match o.new_name.as_deref() {
            Some(new) if !new.is_empty() && new != o.old_name => Some((o.old_name.as_str(), new)),
            _ => None,
        })
        .collect();
    renames.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut out = text.to_string();
    for (old, new) in renames {
        out = replace_traversal(&out, old, new);
    }
    out
}
