//! The runtime client: one evaluation driven by inbound messages
//!
//! [`RuntimeClient`] is what a transport loop talks to. It owns the current
//! [`Evaluation`], remembers the last parsed program, and turns each
//! [`Inbound`] message into evaluation calls and [`Outbound`] replies.
//!
//! Eval has two paths:
//!
//! - **fresh** tears the old evaluation down and builds a new one from the
//!   last parse;
//! - **persist** keeps the stores and swaps only the session blocks,
//!   reconciling their derived output so entity ids survive the edit.

use crate::action::Action;
use crate::block::{Block, BlockArena};
use crate::collab::{Analyzer, DocBuilder, DocParser, NoAnalysis, Transport};
use crate::config::Config;
use crate::database::{Database, DatabaseKind};
use crate::error::{EvalError, Result};
use crate::evaluation::{Evaluation, EvaluationState};
use crate::ids::Interner;
use settle_types::{CompileError, ExtraInfo, Inbound, LoadInfo, Outbound, SourceSpan, Triple};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Database that owns the user's blocks
pub const SESSION_DB: &str = "session";

/// Database that receives injected events
pub const EVENT_DB: &str = "event";

/// The last program handed to `parse` or `load`
#[derive(Debug, Clone, Default)]
struct Program {
    code: String,
    blocks: Vec<Block>,
    spans: Vec<SourceSpan>,
    extra_info: ExtraInfo,
    errors: Vec<CompileError>,
}

pub struct RuntimeClient<P, B> {
    config: Config,
    parser: P,
    builder: B,
    analyzer: Box<dyn Analyzer + Send>,
    transport: Arc<dyn Transport>,
    interner: Arc<Interner>,
    evaluation: Option<Evaluation>,
    program: Program,
}

impl<P, B> RuntimeClient<P, B>
where
    P: DocParser,
    B: DocBuilder<P::Doc>,
{
    pub fn new(config: Config, parser: P, builder: B, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            parser,
            builder,
            analyzer: Box::new(NoAnalysis),
            transport,
            interner: Arc::new(Interner::new()),
            evaluation: None,
            program: Program::default(),
        }
    }

    pub fn with_analyzer(mut self, analyzer: impl Analyzer + Send + 'static) -> Self {
        self.analyzer = Box::new(analyzer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn evaluation(&self) -> Option<&Evaluation> {
        self.evaluation.as_ref()
    }

    pub fn interner(&self) -> &Arc<Interner> {
        &self.interner
    }

    /// Source of the last parsed program
    pub fn code(&self) -> &str {
        &self.program.code
    }

    /// Parse `code`, remembering the program for the next eval.
    ///
    /// Returns every parse and build error.
    fn compile(&mut self, code: &str, context: &str) -> Vec<CompileError> {
        let parsed = self.parser.parse_doc(code, context);
        let built = self.builder.build_doc(&parsed.results);

        let mut program = Program {
            code: code.to_string(),
            blocks: built.blocks,
            spans: parsed.spans,
            extra_info: parsed.extra_info,
            errors: parsed.errors,
        };
        program.errors.extend(built.errors);
        for error in &program.errors {
            error.inject_span(&mut program.spans, &mut program.extra_info);
        }
        tracing::debug!(
            %context,
            blocks = program.blocks.len(),
            errors = program.errors.len(),
            "compiled program"
        );

        let errors = program.errors.clone();
        self.program = program;
        errors
    }

    /// Compile `code` and start a fresh evaluation of it.
    pub fn load(&mut self, code: &str, context: &str) -> Result<()> {
        let errors = self.compile(code, context);
        self.send_errors(&errors);
        self.fresh_eval()
    }

    /// Decode and handle one JSON line. Undecodable input is logged and dropped.
    pub fn handle_json(&mut self, line: &str) {
        match Inbound::decode(line) {
            Ok(message) => self.handle_message(message),
            Err(err) => tracing::warn!(error = %err, "dropping inbound message"),
        }
    }

    pub fn handle_message(&mut self, message: Inbound) {
        let kind = message.kind();
        tracing::debug!(%kind, "handling message");

        let outcome = match message {
            Inbound::Event { insert } => self.inject_event(insert),
            Inbound::Parse { code, generation } => {
                self.compile(&code, "user");
                self.transport.send(Outbound::Parse {
                    generation,
                    text: self.program.code.clone(),
                    spans: self.program.spans.clone(),
                    extra_info: self.program.extra_info.clone(),
                });
                Ok(())
            }
            Inbound::Eval { persist } => {
                let errors = self.program.errors.clone();
                self.send_errors(&errors);
                let running = self
                    .evaluation
                    .as_ref()
                    .map_or(false, |e| e.state() == EvaluationState::Running);
                if persist && running {
                    self.persist_eval()
                } else {
                    self.fresh_eval()
                }
            }
            Inbound::Close => self.close(),
            Inbound::DumpState => self.dump_state(),
            Inbound::Load { info } => self.load_state(info),
            Inbound::FindPerformance { request_id } => {
                let snapshot = self
                    .evaluation
                    .as_ref()
                    .map(|e| e.metrics().snapshot())
                    .unwrap_or_default();
                self.transport.send(Outbound::Performance {
                    request_id,
                    fixpoints: snapshot.fixpoints,
                    rounds: snapshot.rounds,
                    blocks: snapshot.blocks,
                });
                Ok(())
            }
        };

        if let Err(err) = outcome {
            self.report(kind, err);
        }
    }

    fn report(&self, kind: &str, err: EvalError) {
        tracing::warn!(inbound = %kind, error = %err, "message failed");
        // The evaluation's own reporter already sent divergence.
        if !matches!(err, EvalError::Diverged { .. }) {
            self.transport
                .send(Outbound::error(err.kind(), err.to_string()));
        }
    }

    fn send_errors(&self, errors: &[CompileError]) {
        if errors.is_empty() {
            return;
        }
        let mut spans = Vec::new();
        let mut extra_info = ExtraInfo::new();
        for error in errors {
            error.inject_span(&mut spans, &mut extra_info);
        }
        self.transport.send(Outbound::Comments { spans, extra_info });
    }

    fn inject_event(&mut self, insert: Vec<Triple>) -> Result<()> {
        let Some(evaluation) = self.evaluation.as_mut() else {
            tracing::debug!(facts = insert.len(), "event before eval; ignoring");
            return Ok(());
        };
        let actions = insert
            .iter()
            .map(|triple| Action::Add {
                db: EVENT_DB.to_string(),
                triple: self.interner.intern_triple(triple),
            })
            .collect();
        evaluation.execute_actions(actions)?;
        Ok(())
    }

    /// A new evaluation with the standard databases and client hooks.
    fn make_evaluation(&self, blocks: Vec<Block>) -> Result<Evaluation> {
        let mut evaluation = Evaluation::new(self.config.clone());
        let mut blocks = Some(blocks);
        for kind in Evaluation::standard_kinds(&self.config) {
            let mut database = Database::of_kind(kind.clone(), self.config.store_options());
            if kind == DatabaseKind::Session {
                database = database.with_blocks(blocks.take().unwrap_or_default());
            }
            evaluation.register_database(database)?;
        }

        let transport = self.transport.clone();
        evaluation.set_error_reporter(move |kind, message| {
            transport.send(Outbound::error(kind, message));
        });
        let transport = self.transport.clone();
        evaluation.subscribe_results(move |diff| transport.send(Outbound::result(diff)));
        Ok(evaluation)
    }

    /// Replace the evaluation with a new one for the current program.
    fn start_evaluation(&mut self) -> Result<&mut Evaluation> {
        if let Some(mut old) = self.evaluation.take() {
            if let Err(err) = old.close() {
                tracing::debug!(error = %err, "previous evaluation already closed");
            }
        }
        let evaluation = self.make_evaluation(self.program.blocks.clone())?;
        let blocks: Vec<Block> = evaluation
            .database(SESSION_DB)
            .map(|db| db.blocks().iter().cloned().collect())
            .unwrap_or_default();
        self.analyzer.analyze(
            &evaluation,
            &blocks,
            &self.program.spans,
            &self.program.extra_info,
        );
        Ok(self.evaluation.insert(evaluation))
    }

    fn fresh_eval(&mut self) -> Result<()> {
        tracing::debug!(blocks = self.program.blocks.len(), "fresh eval");
        self.start_evaluation()?.fixpoint(None)?;
        Ok(())
    }

    fn persist_eval(&mut self) -> Result<()> {
        let mut next = BlockArena::from_blocks(self.program.blocks.clone());
        let Some(evaluation) = self.evaluation.as_mut() else {
            return Err(EvalError::Closed);
        };
        let mut changes = evaluation.create_changes()?;
        let diff = evaluation.update_binds(SESSION_DB, &mut next, &mut changes)?;
        tracing::debug!(
            retired = diff.retired.len(),
            retained = diff.retained.len(),
            added = diff.added.len(),
            "persist eval"
        );
        evaluation.replace_blocks(SESSION_DB, next)?;
        evaluation.fixpoint(Some(changes))?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match self.evaluation.take() {
            Some(mut evaluation) => evaluation.close(),
            None => {
                tracing::debug!("close without an evaluation");
                Ok(())
            }
        }
    }

    fn dump_state(&mut self) -> Result<()> {
        let Some(evaluation) = self.evaluation.as_ref() else {
            return Err(EvalError::Closed);
        };
        let info = LoadInfo {
            code: Some(self.program.code.clone()),
            databases: BTreeMap::from([(SESSION_DB.to_string(), evaluation.save(SESSION_DB)?)]),
        };
        let state = serde_json::to_string(&info)?;
        self.transport.send(Outbound::DumpState { state });
        Ok(())
    }

    fn load_state(&mut self, info: LoadInfo) -> Result<()> {
        if let Some(code) = info.code.as_deref() {
            let errors = self.compile(code, "user");
            self.send_errors(&errors);
        }
        self.start_evaluation()?.load(info.databases)?;
        Ok(())
    }
}

impl<P, B> std::fmt::Debug for RuntimeClient<P, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeClient")
            .field("evaluation", &self.evaluation)
            .field("blocks", &self.program.blocks.len())
            .field("interned", &self.interner.len())
            .finish()
    }
}
