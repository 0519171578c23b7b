//! Multi-instance merge: N literal declarations become one templated
//! declaration plus a divergence map of the values that differ.

use super::{object_literal, HclBlock};
use crate::core::types::Instance;
use indexmap::IndexMap;

/// Attribute path (`name`, `identity.type`) -> per-instance expression text.
pub type DivergenceMap = IndexMap<String, Vec<String>>;

/// How the merged declaration expands into instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    Count,
    ForEach,
}

/// Merge per-instance blocks into `output`.
///
/// Shared literals are copied verbatim. Divergent attributes become
/// `each.value.<key>` (for_each) or a `${count.index}` template built from
/// the common prefix and suffix (count); either way the per-instance values
/// are recorded in the returned divergence map.
///
/// Only the first nested block of each type per instance takes part.
pub fn combine_blocks(
    blocks: &[HclBlock],
    output: HclBlock,
    mode: MergeMode,
) -> (HclBlock, DivergenceMap) {
    let inputs: Vec<Option<&HclBlock>> = blocks.iter().map(Some).collect();
    merge(&inputs, output, "", mode)
}

fn merge(
    inputs: &[Option<&HclBlock>],
    mut output: HclBlock,
    prefix: &str,
    mode: MergeMode,
) -> (HclBlock, DivergenceMap) {
    let mut divergence = DivergenceMap::new();
    if inputs.is_empty() {
        return (output, divergence);
    }

    let mut names: Vec<&str> = Vec::new();
    for block in inputs.iter().flatten() {
        for key in block.attributes.keys() {
            if !names.contains(&key.as_str()) {
                names.push(key);
            }
        }
    }

    for name in names {
        let values: Vec<Option<&str>> = inputs
            .iter()
            .map(|b| b.and_then(|b| b.attribute(name)))
            .collect();
        let shared = match values[0] {
            Some(first) if values.iter().all(|v| *v == Some(first)) => Some(first),
            _ => None,
        };
        if let Some(text) = shared {
            output.set_attribute(name, text);
            continue;
        }

        let path = format!("{}{}", prefix, name);
        let texts: Vec<String> = values
            .iter()
            .map(|v| v.unwrap_or("null").to_string())
            .collect();
        let expr = match mode {
            MergeMode::ForEach => format!("each.value.{}", row_key(&path)),
            MergeMode::Count => count_template(&texts),
        };
        output.set_attribute(name, expr);
        divergence.insert(path, texts);
    }

    let mut types: Vec<String> = Vec::new();
    for block in inputs.iter().flatten() {
        for t in block.block_types() {
            if !types.contains(&t) {
                types.push(t);
            }
        }
    }

    for t in types {
        if inputs.iter().flatten().any(|b| b.blocks_of(&t).nth(1).is_some()) {
            tracing::warn!(
                block = %t,
                path = %prefix,
                "repeated nested blocks: only the first of each instance is merged"
            );
        }
        let nested: Vec<Option<&HclBlock>> = inputs
            .iter()
            .map(|b| b.and_then(|b| b.blocks_of(&t).next()))
            .collect();
        let labels = nested
            .iter()
            .flatten()
            .next()
            .map(|b| b.labels.clone())
            .unwrap_or_default();
        let child_prefix = format!("{}{}.", prefix, t);
        let (child, child_divergence) =
            merge(&nested, HclBlock::new(t.clone(), labels), &child_prefix, mode);
        output.push_block(child);
        divergence.extend(child_divergence);
    }

    (output, divergence)
}

/// Object key used for a divergent path in the constants table.
pub fn row_key(path: &str) -> String {
    path.replace('.', "_")
}

/// `"<prefix>${count.index}<suffix>"` for string literals, otherwise the
/// common prefix/suffix (cut at token boundaries) around `count.index`.
pub fn count_template(values: &[String]) -> String {
    let bodies: Option<Vec<&str>> = values.iter().map(|v| string_body(v)).collect();
    match bodies {
        Some(bodies) => {
            let (mut prefix, suffix) = common_affixes(&bodies);
            while prefix.ends_with(['\\', '$', '%']) {
                prefix.pop();
            }
            format!("\"{}${{count.index}}{}\"", prefix, suffix)
        }
        None => {
            let raw: Vec<&str> = values.iter().map(String::as_str).collect();
            let (mut prefix, suffix) = common_affixes(&raw);
            if inside_string(&prefix) {
                while prefix.ends_with(['\\', '$', '%']) {
                    prefix.pop();
                }
                return format!("{}${{count.index}}{}", prefix, suffix);
            }
            let prefix = match prefix.char_indices().rev().find(|(_, c)| !is_ident_char(*c)) {
                Some((i, c)) => prefix[..i + c.len_utf8()].to_string(),
                None => String::new(),
            };
            let suffix = match suffix.find(|c: char| !is_ident_char(c)) {
                Some(i) => suffix[i..].to_string(),
                None => String::new(),
            };
            format!("{}count.index{}", prefix, suffix)
        }
    }
}

/// Whether `prefix` ends inside an open quoted string.
fn inside_string(prefix: &str) -> bool {
    let mut open = false;
    let mut escaped = false;
    for c in prefix.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if open => escaped = true,
            '"' => open = !open,
            _ => {}
        }
    }
    open
}

/// Whether a count template evaluates to each instance's literal.
pub fn reproduces_count(template: &str, values: &[String], indices: &[i64]) -> bool {
    values.len() == indices.len()
        && values.iter().zip(indices).all(|(value, i)| {
            let n = i.to_string();
            template.replace("${count.index}", &n).replace("count.index", &n) == *value
        })
}

/// One map literal keyed by instance key, each row holding that instance's
/// divergent values.
pub fn for_each_constants(divergence: &DivergenceMap, instances: &[Instance]) -> String {
    let rows: Vec<(String, String)> = instances
        .iter()
        .enumerate()
        .map(|(i, instance)| {
            let row: Vec<(String, String)> = divergence
                .iter()
                .map(|(path, values)| {
                    let value = values.get(i).cloned().unwrap_or_else(|| "null".to_string());
                    (row_key(path), value)
                })
                .collect();
            (instance.index.map_key(), object_literal(&row, 2))
        })
        .collect();
    object_literal(&rows, 1)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Content of a plain quoted literal without interpolation.
fn string_body(expr: &str) -> Option<&str> {
    let body = expr.strip_prefix('"')?.strip_suffix('"')?;
    if body.contains("${") || body.contains("%{") {
        return None;
    }
    let mut escaped = false;
    for c in body.chars() {
        match c {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return None,
            _ => escaped = false,
        }
    }
    Some(body)
}

/// Longest common prefix and (non-overlapping) suffix, on char boundaries.
fn common_affixes(values: &[&str]) -> (String, String) {
    let Some(first) = values.first() else {
        return (String::new(), String::new());
    };
    let chars: Vec<Vec<char>> = values.iter().map(|v| v.chars().collect()).collect();
    let min_len = chars.iter().map(Vec::len).min().unwrap_or(0);

    let mut p = 0;
    while p < min_len && chars.iter().all(|c| c[p] == chars[0][p]) {
        p += 1;
    }
    let mut s = 0;
    while s < min_len - p
        && chars
            .iter()
            .all(|c| c[c.len() - 1 - s] == chars[0][chars[0].len() - 1 - s])
    {
        s += 1;
    }
    let first: Vec<char> = first.chars().collect();
    let prefix: String = first[..p].iter().collect();
    let suffix: String = first[first.len() - s..].iter().collect();
    (prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::InstanceIndex;
    use proptest::prelude::*;

    fn block(name: &str, sku: &str) -> HclBlock {
        let mut b = HclBlock::resource("azurerm_automation_account", "test");
        b.set_attribute("name", name);
        b.set_attribute("sku_name", sku);
        let mut identity = HclBlock::new("identity", vec![]);
        identity.set_attribute("type", "\"SystemAssigned\"");
        b.push_block(identity);
        b
    }

    fn instance(index: InstanceIndex) -> Instance {
        Instance {
            index,
            resource_id: String::new(),
            api_version: None,
            outputs: Vec::new(),
            before: serde_json::Value::Null,
            after: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_combine_shared_literals_copied() {
        let blocks = vec![block("\"a\"", "\"Basic\""), block("\"a\"", "\"Basic\"")];
        let out = HclBlock::resource("azurerm_automation_account", "test");
        let (merged, divergence) = combine_blocks(&blocks, out, MergeMode::ForEach);
        assert!(divergence.is_empty());
        assert_eq!(merged.attribute("name"), Some("\"a\""));
        assert_eq!(merged.attribute_at("identity.type"), Some("\"SystemAssigned\""));
    }

    #[test]
    fn test_combine_for_each_divergence() {
        let blocks = vec![block("\"acc-a\"", "\"Basic\""), block("\"acc-b\"", "\"Basic\"")];
        let out = HclBlock::resource("azurerm_automation_account", "test");
        let (merged, divergence) = combine_blocks(&blocks, out, MergeMode::ForEach);
        assert_eq!(merged.attribute("name"), Some("each.value.name"));
        assert_eq!(merged.attribute("sku_name"), Some("\"Basic\""));
        assert_eq!(divergence["name"], vec!["\"acc-a\"", "\"acc-b\""]);
    }

    #[test]
    fn test_combine_count_template() {
        let blocks = vec![block("\"acc-0\"", "\"Basic\""), block("\"acc-1\"", "\"Free\"")];
        let out = HclBlock::resource("azurerm_automation_account", "test");
        let (merged, divergence) = combine_blocks(&blocks, out, MergeMode::Count);
        assert_eq!(merged.attribute("name"), Some("\"acc-${count.index}\""));
        assert_eq!(divergence.len(), 2);
        assert!(reproduces_count(
            merged.attribute("name").unwrap(),
            &divergence["name"],
            &[0, 1]
        ));
        assert!(!reproduces_count(
            merged.attribute("sku_name").unwrap(),
            &divergence["sku_name"],
            &[0, 1]
        ));
    }

    #[test]
    fn test_combine_count_template_multibyte_boundary() {
        let values = vec!["f(1)·0".to_string(), "f(1)·1".to_string()];
        assert_eq!(count_template(&values), "f(1)·count.index");

        let values = vec!["[\"x—0\"]".to_string(), "[\"x—1\"]".to_string()];
        let template = count_template(&values);
        assert_eq!(template, "[\"x—${count.index}\"]");
        assert!(reproduces_count(&template, &values, &[0, 1]));

        let mut a = HclBlock::resource("azurerm_automation_account", "test");
        a.set_attribute("tags", "{ note = \"a—0\" }");
        let mut b = HclBlock::resource("azurerm_automation_account", "test");
        b.set_attribute("tags", "{ note = \"a—1\" }");
        let out = HclBlock::resource("azurerm_automation_account", "test");
        let (merged, divergence) = combine_blocks(&[a, b], out, MergeMode::Count);
        assert_eq!(divergence["tags"].len(), 2);
        assert_eq!(merged.attribute("tags"), Some("{ note = \"a—${count.index}\" }"));
    }

    #[test]
    fn test_combine_nested_divergence_path() {
        let mut a = block("\"x\"", "\"Basic\"");
        let mut b = block("\"x\"", "\"Basic\"");
        a.blocks[0].set_attribute("type", "\"SystemAssigned\"");
        b.blocks[0].set_attribute("type", "\"UserAssigned\"");
        let out = HclBlock::resource("azurerm_automation_account", "test");
        let (merged, divergence) = combine_blocks(&[a, b], out, MergeMode::ForEach);
        assert_eq!(merged.attribute_at("identity.type"), Some("each.value.identity_type"));
        assert_eq!(divergence["identity.type"].len(), 2);
    }

    #[test]
    fn test_combine_missing_attribute_is_hole() {
        let a = block("\"x\"", "\"Basic\"");
        let mut b = block("\"x\"", "\"Basic\"");
        b.set_attribute("tags", "{ env = \"dev\" }");
        let out = HclBlock::resource("azurerm_automation_account", "test");
        let (_, divergence) = combine_blocks(&[a, b], out, MergeMode::ForEach);
        assert_eq!(divergence["tags"], vec!["null", "{ env = \"dev\" }"]);
    }

    #[test]
    fn test_combine_nested_block_hole() {
        let a = block("\"x\"", "\"Basic\"");
        let mut b = block("\"x\"", "\"Basic\"");
        b.blocks.clear();
        let out = HclBlock::resource("azurerm_automation_account", "test");
        let (merged, divergence) = combine_blocks(&[a, b], out, MergeMode::Count);
        assert_eq!(merged.blocks_of("identity").count(), 1);
        assert_eq!(divergence["identity.type"], vec!["\"SystemAssigned\"", "null"]);
    }

    #[test]
    fn test_count_template_non_string() {
        assert_eq!(count_template(&["1".to_string(), "2".to_string()]), "count.index");
        assert_eq!(
            count_template(&["[1, 5]".to_string(), "[1, 6]".to_string()]),
            "[1, count.index]"
        );
        assert_eq!(
            count_template(&["true".to_string(), "false".to_string()]),
            "count.index"
        );
    }

    #[test]
    fn test_for_each_constants_table() {
        let mut divergence = DivergenceMap::new();
        divergence.insert("name".into(), vec!["\"a\"".into(), "\"b\"".into()]);
        divergence.insert("identity.type".into(), vec!["\"x\"".into(), "\"y\"".into()]);
        let instances = vec![
            instance(InstanceIndex::Key("blue".into())),
            instance(InstanceIndex::Key("green".into())),
        ];
        let table = for_each_constants(&divergence, &instances);
        let expected = "{\n  \"blue\"  = {\n    name          = \"a\"\n    identity_type = \"x\"\n  }\n  \"green\" = {\n    name          = \"b\"\n    identity_type = \"y\"\n  }\n}";
        assert_eq!(table, expected);
    }

    #[test]
    fn test_for_each_constants_count_keys() {
        let mut divergence = DivergenceMap::new();
        divergence.insert("name".into(), vec!["\"a\"".into(), "\"b\"".into()]);
        let instances = vec![instance(InstanceIndex::Count(0)), instance(InstanceIndex::Count(1))];
        let table = for_each_constants(&divergence, &instances);
        assert!(table.contains("\"0\" = {"));
        assert!(table.contains("\"1\" = {"));
    }

    proptest! {
        #[test]
        fn prop_identical_values_never_diverge(value in "[a-z0-9-]{1,12}", n in 2usize..6) {
            let literal = format!("\"{}\"", value);
            let blocks: Vec<HclBlock> = (0..n).map(|_| block(&literal, "\"Basic\"")).collect();
            let out = HclBlock::resource("azurerm_automation_account", "test");
            let (merged, divergence) = combine_blocks(&blocks, out, MergeMode::Count);
            prop_assert!(divergence.is_empty());
            prop_assert_eq!(merged.attribute("name"), Some(literal.as_str()));
        }

        #[test]
        fn prop_for_each_divergence_has_one_value_per_instance(n in 2usize..8) {
            let blocks: Vec<HclBlock> = (0..n)
                .map(|i| block(&format!("\"acc-{}\"", i), "\"Basic\""))
                .collect();
            let out = HclBlock::resource("azurerm_automation_account", "test");
            let (merged, divergence) = combine_blocks(&blocks, out, MergeMode::ForEach);
            prop_assert_eq!(merged.attribute("name"), Some("each.value.name"));
            prop_assert_eq!(divergence["name"].len(), n);
        }

        #[test]
        fn prop_count_template_reproduces_indexed_names(n in 2usize..12, stem in "[a-z]{1,6}") {
            let values: Vec<String> = (0..n).map(|i| format!("\"{}-{}\"", stem, i)).collect();
            let indices: Vec<i64> = (0..n as i64).collect();
            let template = count_template(&values);
            prop_assert!(reproduces_count(&template, &values, &indices));
        }
    }
}
