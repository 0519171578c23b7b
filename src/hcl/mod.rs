//! HCL transform engine.
//!
//! Declarations are held as [`HclBlock`] trees whose attribute values are the
//! raw expression text, the same view `terraform fmt` and `hclwrite` work with.
//! Parsing goes through `hcl-edit`; rendering is ours so that generated blocks
//! come out formatted consistently.

pub mod combine;
pub mod document;
pub mod reconcile;
pub mod rewrite;
pub mod scaffold;

use hcl_edit::structure::{Block, Structure};
use hcl_edit::Span;
use indexmap::IndexMap;
use std::fmt;
use std::ops::Range;

/// Meta-arguments that belong to Terraform rather than to the provider schema.
pub const META_ATTRIBUTES: &[&str] = &["count", "for_each", "depends_on", "provider"];

/// Meta-blocks that belong to Terraform rather than to the provider schema.
pub const META_BLOCKS: &[&str] = &["lifecycle", "provisioner", "connection"];

/// A declaration block: `ident "label"... { attributes; nested blocks }`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HclBlock {
    pub ident: String,
    pub labels: Vec<String>,
    /// Attribute name -> raw expression text, in source order
    pub attributes: IndexMap<String, String>,
    pub blocks: Vec<HclBlock>,
}

/// A top-level block together with its byte range in the source.
#[derive(Debug, Clone)]
pub struct LocatedBlock {
    pub span: Range<usize>,
    pub block: HclBlock,
}

impl HclBlock {
    pub fn new(ident: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            ident: ident.into(),
            labels,
            attributes: IndexMap::new(),
            blocks: Vec::new(),
        }
    }

    /// An empty `resource "<type>" "<label>"` block.
    pub fn resource(resource_type: &str, label: &str) -> Self {
        Self::new("resource", vec![resource_type.to_string(), label.to_string()])
    }

    pub fn is_resource(&self, resource_type: &str, label: &str) -> bool {
        self.ident == "resource"
            && self.labels.len() == 2
            && self.labels[0] == resource_type
            && self.labels[1] == label
    }

    pub fn label(&self, i: usize) -> Option<&str> {
        self.labels.get(i).map(String::as_str)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, expr: impl Into<String>) {
        self.attributes.insert(name.into(), expr.into());
    }

    /// Set an attribute and move it in front of all others.
    pub fn prepend_attribute(&mut self, name: impl Into<String>, expr: impl Into<String>) {
        let name = name.into();
        self.attributes.shift_remove(&name);
        self.attributes.shift_insert(0, name, expr.into());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        self.attributes.shift_remove(name)
    }

    pub fn blocks_of<'a>(&'a self, ident: &'a str) -> impl Iterator<Item = &'a HclBlock> + 'a {
        self.blocks.iter().filter(move |b| b.ident == ident)
    }

    /// Distinct nested block identifiers in first-seen order.
    pub fn block_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for b in &self.blocks {
            if !types.contains(&b.ident) {
                types.push(b.ident.clone());
            }
        }
        types
    }

    pub fn push_block(&mut self, block: HclBlock) {
        self.blocks.push(block);
    }

    /// Remove every nested block with the given identifier.
    pub fn remove_blocks(&mut self, ident: &str) -> Vec<HclBlock> {
        let (removed, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.blocks).into_iter().partition(|b| b.ident == ident);
        self.blocks = kept;
        removed
    }

    /// Set the attribute at a dotted path such as `identity.type`.
    /// Intermediate segments select the first nested block of that type.
    /// Returns false when a segment does not exist.
    pub fn set_attribute_at(&mut self, path: &str, expr: &str) -> bool {
        match path.split_once('.') {
            None => {
                self.set_attribute(path, expr);
                true
            }
            Some((head, rest)) => match self.blocks.iter_mut().find(|b| b.ident == head) {
                Some(nested) => nested.set_attribute_at(rest, expr),
                None => false,
            },
        }
    }

    /// Read the attribute at a dotted path (see [`HclBlock::set_attribute_at`]).
    pub fn attribute_at(&self, path: &str) -> Option<&str> {
        match path.split_once('.') {
            None => self.attribute(path),
            Some((head, rest)) => self.blocks.iter().find(|b| b.ident == head)?.attribute_at(rest),
        }
    }

    /// Drop `attr = null` everywhere; generated configuration is full of them.
    pub fn prune_nulls(&mut self) {
        self.attributes.retain(|_, v| v.trim() != "null");
        for b in &mut self.blocks {
            b.prune_nulls();
        }
    }

    /// Render the block as formatted HCL.
    pub fn to_hcl(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out, 0);
        out
    }

    fn write_to(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        out.push_str(&indent);
        out.push_str(&self.ident);
        for label in &self.labels {
            out.push(' ');
            out.push_str(&quote(label));
        }
        if self.attributes.is_empty() && self.blocks.is_empty() {
            out.push_str(" {}\n");
            return;
        }
        out.push_str(" {\n");

        let inner = "  ".repeat(depth + 1);
        let attrs: Vec<(&String, &String)> = self.attributes.iter().collect();
        let mut i = 0;
        while i < attrs.len() {
            // Align `=` across a run of single-line attributes, like `terraform fmt`.
            let mut j = i;
            while j < attrs.len() && !attrs[j].1.contains('\n') {
                j += 1;
            }
            if j == i {
                out.push_str(&format!("{}{} = {}\n", inner, attrs[i].0, attrs[i].1));
                i += 1;
                continue;
            }
            let width = attrs[i..j].iter().map(|(k, _)| k.len()).max().unwrap_or(0);
            for (k, v) in &attrs[i..j] {
                out.push_str(&format!("{}{:<width$} = {}\n", inner, k, v, width = width));
            }
            i = j;
        }

        for (n, b) in self.blocks.iter().enumerate() {
            if n > 0 || !self.attributes.is_empty() {
                out.push('\n');
            }
            b.write_to(out, depth + 1);
        }
        out.push_str(&indent);
        out.push_str("}\n");
    }

    fn from_edit(block: &Block, source: &str) -> Self {
        let labels = block.labels.iter().map(|l| l.as_str().to_string()).collect();
        let mut out = HclBlock::new(block.ident.as_str(), labels);
        for structure in block.body.iter() {
            match structure {
                Structure::Attribute(attr) => {
                    let text = match attr.value.span() {
                        Some(range) if range.end <= source.len() => source[range].to_string(),
                        _ => attr.value.to_string(),
                    };
                    out.attributes
                        .insert(attr.key.as_str().to_string(), text.trim().to_string());
                }
                Structure::Block(nested) => out.blocks.push(HclBlock::from_edit(nested, source)),
            }
        }
        out
    }
}

impl fmt::Display for HclBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hcl())
    }
}

/// Parse a source file into its top-level blocks with byte spans.
/// Top-level attributes (not valid in Terraform files) are ignored.
pub fn parse_located(source: &str) -> Result<Vec<LocatedBlock>, String> {
    let body = hcl_edit::parser::parse_body(source).map_err(|e| e.to_string())?;
    let mut located = Vec::new();
    for structure in body.iter() {
        if let Structure::Block(block) = structure {
            let span = block
                .span()
                .ok_or_else(|| format!("block '{}' has no source span", block.ident.as_str()))?;
            // end the span at the closing brace, not at trailing whitespace
            let end = match source.get(span.clone()) {
                Some(text) => span.start + text.trim_end().len(),
                None => span.end,
            };
            let span = span.start..end;
            located.push(LocatedBlock {
                span,
                block: HclBlock::from_edit(block, source),
            });
        }
    }
    Ok(located)
}

/// Parse a source file into its top-level blocks.
pub fn parse_blocks(source: &str) -> Result<Vec<HclBlock>, String> {
    Ok(parse_located(source)?.into_iter().map(|l| l.block).collect())
}

/// Quote a string as an HCL string literal.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render `{ key = value ... }` for an attribute nested `depth` levels deep.
/// Keys are emitted as given, so callers quote them when needed.
pub fn object_literal(entries: &[(String, String)], depth: usize) -> String {
    if entries.is_empty() {
        return "{}".to_string();
    }
    let inner = "  ".repeat(depth + 1);
    let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let mut out = String::from("{\n");
    for (k, v) in entries {
        out.push_str(&format!("{}{:<width$} = {}\n", inner, k, v, width = width));
    }
    out.push_str(&"  ".repeat(depth));
    out.push('}');
    out
}

/// The HCL literal text of a JSON scalar, or `None` for null and containers.
pub fn literal_for(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(quote(s)),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
