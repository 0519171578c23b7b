//! Scaffold blocks that move state from the old address to the new one
//! without touching the deployed resource.

use super::{object_literal, quote, HclBlock};

/// Turn a declaration's source into a line-commented record.
pub fn commented(source: &str) -> String {
    source
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                "#".to_string()
            } else {
                format!("# {}", line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `removed { from = <address> lifecycle { destroy = false } }`
pub fn removed_block(from: &str) -> HclBlock {
    let mut block = HclBlock::new("removed", vec![]);
    block.set_attribute("from", from);
    let mut lifecycle = HclBlock::new("lifecycle", vec![]);
    lifecycle.set_attribute("destroy", "false");
    block.push_block(lifecycle);
    block
}

/// `import { id = "<id>" to = <address> }`
pub fn import_block(id: &str, to: &str) -> HclBlock {
    let mut block = HclBlock::new("import", vec![]);
    block.set_attribute("id", quote(id));
    block.set_attribute("to", to);
    block
}

/// `for_each` import for a multi-instance resource: each concrete id is
/// mapped to the instance key it is adopted under.
///
/// `instances` holds `(resource id, instance key literal)` pairs.
pub fn import_for_each_block(instances: &[(String, String)], to: &str) -> HclBlock {
    let entries: Vec<(String, String)> = instances
        .iter()
        .map(|(id, key)| (quote(id), key.clone()))
        .collect();
    let mut block = HclBlock::new("import", vec![]);
    block.set_attribute("for_each", object_literal(&entries, 1));
    block.set_attribute("id", "each.key");
    block.set_attribute("to", format!("{}[each.value]", to));
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hcl::parse_blocks;

    #[test]
    fn test_scaffold_commented() {
        let text = commented("resource \"a\" \"b\" {\n\n  x = 1\n}");
        assert_eq!(text, "# resource \"a\" \"b\" {\n#\n#   x = 1\n# }");
        assert!(parse_blocks(&text).unwrap().is_empty());
    }

    #[test]
    fn test_scaffold_removed_block() {
        let text = removed_block("azapi_resource.test").to_hcl();
        assert_eq!(
            text,
            "removed {\n  from = azapi_resource.test\n\n  lifecycle {\n    destroy = false\n  }\n}\n"
        );
    }

    #[test]
    fn test_scaffold_import_block() {
        let block = import_block("/subscriptions/s/resourceGroups/g", "azurerm_resource_group.test");
        assert_eq!(block.attribute("id"), Some("\"/subscriptions/s/resourceGroups/g\""));
        assert_eq!(block.attribute("to"), Some("azurerm_resource_group.test"));
    }

    #[test]
    fn test_scaffold_import_for_each() {
        let block = import_for_each_block(
            &[
                ("/x/a".to_string(), "0".to_string()),
                ("/x/b".to_string(), "1".to_string()),
            ],
            "azurerm_x.test",
        );
        let text = block.to_hcl();
        assert!(text.contains("\"/x/a\" = 0"));
        assert!(text.contains("to = azurerm_x.test[each.value]"));
        let reparsed = parse_blocks(&text).unwrap();
        assert_eq!(reparsed[0].attribute("id"), Some("each.key"));
    }
}
