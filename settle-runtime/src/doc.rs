//! JSON block documents
//!
//! A small concrete source format so the runtime can be driven without an
//! external compiler:
//!
//! ```json
//! {"blocks": [
//!   {"name": "handle clicks",
//!    "match":  [{"e": "?e", "a": "tag", "v": "click"}],
//!    "commit": [{"e": "?e", "a": "handled", "v": true}]}
//! ]}
//! ```
//!
//! Each block may also carry `key` (stable identity, defaults to the
//! name), `bind` (derived output) and `singleRun`.

use crate::block::{ActionTemplate, Block, BlockKey, Pattern, Term};
use crate::collab::{BuildOutput, DocBuilder, DocParser, ParseOutput};
use serde::{Deserialize, Serialize};
use settle_types::{CompileError, ExtraInfo};
use std::collections::{BTreeSet, HashSet};

/// One parsed block document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockDoc {
    #[serde(default)]
    pub blocks: Vec<BlockSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default, rename = "match")]
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub bind: Vec<ActionTemplate>,
    #[serde(default)]
    pub commit: Vec<ActionTemplate>,
    #[serde(default)]
    pub single_run: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocParser;

impl DocParser for JsonDocParser {
    type Doc = BlockDoc;

    fn parse_doc(&self, code: &str, context: &str) -> ParseOutput<BlockDoc> {
        let mut output = ParseOutput {
            results: BlockDoc::default(),
            text: code.to_string(),
            spans: Vec::new(),
            extra_info: ExtraInfo::new(),
            errors: Vec::new(),
        };
        if code.trim().is_empty() {
            return output;
        }

        match serde_json::from_str::<BlockDoc>(code) {
            Ok(doc) => output.results = doc,
            Err(err) => {
                let start = offset_of(code, err.line(), err.column());
                let stop = (start + 1).min(code.len()).max(start);
                tracing::debug!(%context, error = %err, "document failed to parse");
                output
                    .errors
                    .push(CompileError::new(format!("{}-parse", context), err.to_string(), start, stop));
            }
        }
        output
    }
}

/// Byte offset of a 1-based line and column
fn offset_of(code: &str, line: usize, column: usize) -> usize {
    let line_start: usize = code
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(code.len())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocBuilder;

impl JsonDocBuilder {
    fn build_block(spec: &BlockSpec, ix: usize) -> Result<Block, String> {
        let key = spec
            .key
            .clone()
            .or_else(|| spec.name.clone())
            .unwrap_or_else(|| format!("block-{}", ix));
        let name = spec.name.clone().unwrap_or_else(|| key.clone());

        let mut bound: BTreeSet<&str> = BTreeSet::new();
        for pattern in &spec.patterns {
            for term in [&pattern.e, &pattern.a, &pattern.v] {
                match term {
                    Term::Var(var) => {
                        bound.insert(var.as_str());
                    }
                    Term::Mint(vars) => {
                        if let Some(var) = vars.iter().find(|v| !bound.contains(v.as_str())) {
                            return Err(format!("variable ?{} is used before it is bound", var));
                        }
                    }
                    Term::Const(_) => {}
                }
            }
        }
        for template in spec.bind.iter().chain(&spec.commit) {
            if let Some(var) = template.vars().into_iter().find(|v| !bound.contains(v)) {
                return Err(format!("variable ?{} is never bound", var));
            }
        }

        let mut block = Block::new(BlockKey::new(key), name);
        block.patterns = spec.patterns.clone();
        block.bind_actions = spec.bind.clone();
        block.commit_actions = spec.commit.clone();
        block.single_run = spec.single_run;
        Ok(block)
    }
}

impl DocBuilder<BlockDoc> for JsonDocBuilder {
    fn build_doc(&self, doc: &BlockDoc) -> BuildOutput {
        let mut output = BuildOutput::default();
        let mut keys = HashSet::new();

        for (ix, spec) in doc.blocks.iter().enumerate() {
            match Self::build_block(spec, ix) {
                Ok(block) if !keys.insert(block.key.clone()) => {
                    output.errors.push(CompileError::new(
                        format!("block-{}", ix),
                        format!("duplicate block key {}", block.key),
                        0,
                        0,
                    ));
                }
                Ok(block) => output.blocks.push(block),
                Err(message) => {
                    output
                        .errors
                        .push(CompileError::new(format!("block-{}", ix), message, 0, 0));
                }
            }
        }
        output
    }
}
