//! Collaborators the runtime drives but does not implement
//!
//! Turning source text into blocks, analysing a program and moving
//! messages to a peer all happen outside the core. The orchestrator only
//! sees these traits.

use crate::block::Block;
use crate::evaluation::Evaluation;
use parking_lot::Mutex;
use settle_types::{CompileError, ExtraInfo, Outbound, SourceSpan};

/// Everything a parser produces for one document
#[derive(Debug, Clone, Default)]
pub struct ParseOutput<D> {
    /// The parsed document, handed to a [`DocBuilder`]
    pub results: D,
    /// Source text echoed back to the editor
    pub text: String,
    pub spans: Vec<SourceSpan>,
    pub extra_info: ExtraInfo,
    pub errors: Vec<CompileError>,
}

/// Turns source text into a document
pub trait DocParser {
    type Doc;

    /// Parse `code`. `context` names the document being parsed.
    fn parse_doc(&self, code: &str, context: &str) -> ParseOutput<Self::Doc>;
}

/// Blocks compiled from a parsed document
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub blocks: Vec<Block>,
    pub errors: Vec<CompileError>,
}

/// Compiles a parsed document into blocks
pub trait DocBuilder<D> {
    fn build_doc(&self, doc: &D) -> BuildOutput;
}

/// Read-only inspection of a freshly built program
pub trait Analyzer {
    fn analyze(
        &self,
        _evaluation: &Evaluation,
        _blocks: &[Block],
        _spans: &[SourceSpan],
        _extra_info: &ExtraInfo,
    ) {
    }
}

/// An analyzer that looks at nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAnalysis;

impl Analyzer for NoAnalysis {}

/// Delivers outbound messages to the peer
pub trait Transport: Send + Sync {
    fn send(&self, message: Outbound);
}

/// A transport that keeps every message, for tests and embedding
#[derive(Debug, Default)]
pub struct CollectingTransport {
    sent: Mutex<Vec<Outbound>>,
}

impl CollectingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything sent so far.
    pub fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl Transport for CollectingTransport {
    fn send(&self, message: Outbound) {
        self.sent.lock().push(message);
    }
}
