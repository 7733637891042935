//! Compile diagnostics forwarded to the editor
//!
//! Parser and builder errors are opaque to the store. They only need to be
//! turned into spans plus extra info so an editor can decorate the source.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Free-form per-span information keyed by span id
pub type ExtraInfo = BTreeMap<String, serde_json::Value>;

/// A decorated range in the source document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: usize,
    pub stop: usize,
    pub kind: String,
    pub id: String,
}

/// An error reported by the parser or the block builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileError {
    pub id: String,
    pub message: String,
    pub start: usize,
    pub stop: usize,
}

impl CompileError {
    pub fn new(id: impl Into<String>, message: impl Into<String>, start: usize, stop: usize) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            start,
            stop,
        }
    }

    /// Add this error's decoration to an outgoing span list.
    pub fn inject_span(&self, spans: &mut Vec<SourceSpan>, extra_info: &mut ExtraInfo) {
        spans.push(SourceSpan {
            start: self.start,
            stop: self.stop,
            kind: "document_comment".to_string(),
            id: self.id.clone(),
        });
        extra_info.insert(
            self.id.clone(),
            json!({ "kind": "error", "message": self.message }),
        );
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}..{})", self.message, self.start, self.stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_span() {
        let error = CompileError::new("err-1", "unknown tag", 4, 9);
        let mut spans = Vec::new();
        let mut extra = ExtraInfo::new();

        error.inject_span(&mut spans, &mut extra);

        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 4);
        assert_eq!(spans[0].id, "err-1");
        assert_eq!(extra["err-1"]["message"], "unknown tag");
    }
}
