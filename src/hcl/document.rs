//! Working-directory document store.
//!
//! Every `*.tf` file is loaded once, mutated in memory by splicing text at
//! block spans, and written back once at the end of a run.

use super::rewrite::{find_traversals, rewrite_outputs};
use super::{parse_located, HclBlock, LocatedBlock};
use crate::core::error::{MigrateError, Result};
use crate::core::types::Output;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Block types that carry migration scaffolding rather than live config.
const SCAFFOLD_BLOCKS: &[&str] = &["removed", "import"];

/// One configuration file.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    source: String,
    dirty: bool,
}

impl Document {
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self::from_source(path, source))
    }

    pub fn from_source(path: &Path, source: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            source: source.into(),
            dirty: false,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn blocks(&self) -> Result<Vec<LocatedBlock>> {
        parse_located(&self.source).map_err(|message| MigrateError::HclParse {
            file: self.path.clone(),
            message,
        })
    }

    fn splice(&mut self, span: Range<usize>, text: &str) {
        if self.source[span.clone()] != *text {
            self.source.replace_range(span, text);
            self.dirty = true;
        }
    }

    /// Rewrite output paths in every live top-level block.
    /// Returns the number of blocks changed.
    fn rewrite_outputs(&mut self, outputs: &[Output]) -> Result<usize> {
        let located = self.blocks()?;
        let mut changed = 0;
        for entry in located.iter().rev() {
            if SCAFFOLD_BLOCKS.contains(&entry.block.ident.as_str()) {
                continue;
            }
            let text = &self.source[entry.span.clone()];
            let rewritten = rewrite_outputs(text, outputs);
            if rewritten != text {
                self.splice(entry.span.clone(), &rewritten);
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn mentions(&self, address: &str) -> Result<bool> {
        Ok(self.blocks()?.iter().any(|entry| {
            !SCAFFOLD_BLOCKS.contains(&entry.block.ident.as_str())
                && !find_traversals(&self.source[entry.span.clone()], address).is_empty()
        }))
    }
}

/// All configuration files of one working directory.
#[derive(Debug)]
pub struct Workspace {
    documents: Vec<Document>,
}

impl Workspace {
    /// Load every `*.tf` file directly under `dir`, in name order.
    pub fn load(dir: &Path) -> Result<Self> {
        let pattern = dir.join("*.tf");
        let mut paths: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
            })?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable path");
                    None
                }
            })
            .collect();
        paths.sort();

        let documents = paths
            .iter()
            .map(|p| Document::load(p))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(dir = %dir.display(), files = documents.len(), "loaded working directory");
        Ok(Self { documents })
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Locate a resource declaration: (document index, block with span).
    pub fn find_resource(&self, resource_type: &str, label: &str) -> Option<(usize, LocatedBlock)> {
        for (i, doc) in self.documents.iter().enumerate() {
            let located = match doc.blocks() {
                Ok(located) => located,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unparsable file");
                    continue;
                }
            };
            if let Some(found) = located
                .into_iter()
                .find(|l| l.block.is_resource(resource_type, label))
            {
                return Some((i, found));
            }
        }
        None
    }

    fn locate(&self, resource_type: &str, label: &str) -> Result<(usize, LocatedBlock)> {
        self.find_resource(resource_type, label)
            .ok_or_else(|| MigrateError::MissingBlock {
                address: format!("{}.{}", resource_type, label),
            })
    }

    pub fn resource_block(&self, resource_type: &str, label: &str) -> Result<HclBlock> {
        Ok(self.locate(resource_type, label)?.1.block)
    }

    /// The declaration's source text exactly as written.
    pub fn resource_source(&self, resource_type: &str, label: &str) -> Result<String> {
        let (i, found) = self.locate(resource_type, label)?;
        Ok(self.documents[i].source[found.span].to_string())
    }

    /// Replace a declaration with `text`, in place.
    pub fn replace_resource(&mut self, resource_type: &str, label: &str, text: &str) -> Result<PathBuf> {
        let (i, found) = self.locate(resource_type, label)?;
        let doc = &mut self.documents[i];
        doc.splice(found.span, text.trim_end_matches('\n'));
        Ok(doc.path.clone())
    }

    /// Rewrite resolved outputs across all live declarations.
    /// Files that cannot be parsed are logged and left alone.
    pub fn rewrite_outputs(&mut self, outputs: &[Output]) -> usize {
        if outputs.iter().all(|o| !o.is_resolved()) {
            return 0;
        }
        let mut changed = 0;
        for doc in &mut self.documents {
            match doc.rewrite_outputs(outputs) {
                Ok(n) => changed += n,
                Err(e) => tracing::warn!(error = %e, "output rewrite skipped"),
            }
        }
        changed
    }

    /// Files whose live declarations still traverse `address`.
    pub fn dangling(&self, address: &str) -> Vec<PathBuf> {
        self.documents
            .iter()
            .filter(|doc| doc.mentions(address).unwrap_or(false))
            .map(|doc| doc.path.clone())
            .collect()
    }

    /// Write every changed file once (temp file + rename).
    /// A file that cannot be written is logged and stays dirty.
    pub fn flush(&mut self) -> Vec<PathBuf> {
        let mut written = Vec::new();
        for doc in self.documents.iter_mut().filter(|d| d.dirty) {
            match write_atomic(&doc.path, &doc.source) {
                Ok(()) => {
                    doc.dirty = false;
                    tracing::info!(file = %doc.path.display(), "updated");
                    written.push(doc.path.clone());
                }
                Err(e) => tracing::error!(file = %doc.path.display(), error = %e, "cannot write file"),
            }
        }
        written
    }
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
