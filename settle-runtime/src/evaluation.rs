//! Evaluations: a registry of databases driven to fixpoint
//!
//! An [`Evaluation`] owns every registered [`Database`] and runs their
//! blocks until nothing changes. One round:
//!
//! 1. every non-dormant block of every database (registration order, then
//!    block order) is evaluated against the same snapshot of all facts;
//! 2. bind output is folded into per-fact support counts, and the writes
//!    that follow from it go into one [`Changes`] batch ahead of the
//!    blocks' commit actions;
//! 3. the batch is committed into a diff per database;
//! 4. each diff is applied to its store, then every store dispatches, then
//!    every store clears its dirty state.
//!
//! Blocks keep the state of a round only once its batch commits. A round
//! whose diff is empty everywhere ends the fixpoint. Subscribers registered
//! with [`Evaluation::subscribe_results`] receive one net diff per settled
//! fixpoint; changes applied by a fixpoint that failed are carried into the
//! next one.

use crate::action::Action;
use crate::block::{ArenaDiff, BindDelta, BlockArena, BlockKey, Facts};
use crate::changes::Changes;
use crate::config::Config;
use crate::database::{Database, DatabaseKind};
use crate::error::{EvalError, Result};
use crate::metrics::EvaluationMetrics;
use crate::support::BindSupport;
use settle_types::{Attribute, Diff, Id, Triple, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

/// Receives `(kind, message)` for errors that must reach the outside world
pub type ErrorReporter = Box<dyn FnMut(&str, &str) + Send>;

type ResultSubscriber = Box<dyn Fn(&Diff) + Send + Sync>;

/// Lifecycle of an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationState {
    /// No database registered yet
    Uninitialized,
    Running,
    /// A fixpoint diverged; only `close` is allowed
    Poisoned,
    /// Terminal
    Closed,
}

/// Every registered database seen as one relational universe
struct Universe<'a>(&'a [Database]);

impl Facts for Universe<'_> {
    fn scan(
        &self,
        scope: Option<&str>,
        e: Option<&Id>,
        a: Option<&Attribute>,
        v: Option<&Value>,
    ) -> Vec<Triple> {
        self.0
            .iter()
            .filter(|db| scope.map_or(true, |scope| db.name() == scope))
            .flat_map(|db| db.store().scan(e, a, v))
            .collect()
    }
}

pub struct Evaluation {
    config: Config,
    databases: Vec<Database>,
    closed: bool,
    poisoned: bool,
    in_round: bool,
    /// Committed outside a fixpoint and not yet reported
    pending: Diff,
    fired_single_run: HashSet<BlockKey>,
    support: BindSupport,
    error_reporter: Option<ErrorReporter>,
    result_subscribers: Vec<ResultSubscriber>,
    metrics: Arc<EvaluationMetrics>,
}

impl Evaluation {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            databases: Vec::new(),
            closed: false,
            poisoned: false,
            in_round: false,
            pending: Diff::new(),
            fired_single_run: HashSet::new(),
            support: BindSupport::new(),
            error_reporter: None,
            result_subscribers: Vec::new(),
            metrics: Arc::new(EvaluationMetrics::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> EvaluationState {
        if self.closed {
            EvaluationState::Closed
        } else if self.poisoned {
            EvaluationState::Poisoned
        } else if self.databases.is_empty() {
            EvaluationState::Uninitialized
        } else {
            EvaluationState::Running
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.closed {
            Err(EvalError::Closed)
        } else if self.poisoned {
            Err(EvalError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn ensure_between_rounds(&self, operation: &'static str) -> Result<()> {
        self.ensure_usable()?;
        if self.in_round {
            return Err(EvalError::RoundInProgress(operation));
        }
        Ok(())
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.databases
            .iter()
            .position(|db| db.name() == name)
            .ok_or_else(|| EvalError::UnknownDatabase(name.to_string()))
    }

    pub fn register_database(&mut self, database: Database) -> Result<()> {
        self.ensure_between_rounds("register a database")?;
        if self.databases.iter().any(|db| db.name() == database.name()) {
            return Err(EvalError::DuplicateDatabase(database.name().to_string()));
        }
        tracing::debug!(db = %database.name(), kind = %database.kind(), "registered database");
        self.databases.push(database);
        Ok(())
    }

    pub fn unregister_database(&mut self, name: &str) -> Result<Database> {
        self.ensure_between_rounds("unregister a database")?;
        let ix = self.index_of(name)?;
        tracing::debug!(db = %name, "unregistered database");
        Ok(self.databases.remove(ix))
    }

    pub fn database(&self, name: &str) -> Option<&Database> {
        self.databases.iter().find(|db| db.name() == name)
    }

    pub fn database_mut(&mut self, name: &str) -> Option<&mut Database> {
        self.databases.iter_mut().find(|db| db.name() == name)
    }

    /// Registered database names, in registration order
    pub fn database_names(&self) -> impl Iterator<Item = &str> {
        self.databases.iter().map(Database::name)
    }

    /// Every registered fact, optionally restricted to one database
    pub fn scan(
        &self,
        scope: Option<&str>,
        e: Option<&Id>,
        a: Option<&Attribute>,
        v: Option<&Value>,
    ) -> Vec<Triple> {
        Universe(&self.databases).scan(scope, e, a, v)
    }

    pub fn set_error_reporter<F>(&mut self, reporter: F)
    where
        F: FnMut(&str, &str) + Send + 'static,
    {
        self.error_reporter = Some(Box::new(reporter));
    }

    /// Hand an error to the registered reporter, or log it.
    pub fn report_error(&mut self, kind: &str, message: &str) {
        match self.error_reporter.as_mut() {
            Some(reporter) => reporter(kind, message),
            None => tracing::error!(%kind, %message, "unreported evaluation error"),
        }
    }

    /// Receive one net diff per settled fixpoint.
    pub fn subscribe_results<F>(&mut self, subscriber: F)
    where
        F: Fn(&Diff) + Send + Sync + 'static,
    {
        self.result_subscribers.push(Box::new(subscriber));
    }

    pub fn metrics(&self) -> &Arc<EvaluationMetrics> {
        &self.metrics
    }

    /// An empty batch for a caller to fill before committing.
    pub fn create_changes(&self) -> Result<Changes> {
        self.ensure_usable()?;
        Ok(Changes::new())
    }

    /// Apply `changes` and propagate, without running blocks.
    ///
    /// The applied diff is held back and reported with the next fixpoint.
    pub fn commit(&mut self, changes: Changes) -> Result<Diff> {
        self.ensure_between_rounds("commit changes")?;
        let applied = self.apply_changes(changes)?;
        self.pending.merge(applied.clone());
        Ok(applied)
    }

    /// Inject actions from outside and settle their consequences.
    pub fn execute_actions(&mut self, actions: Vec<Action>) -> Result<Diff> {
        self.fixpoint(Some(Changes::from(actions)))
    }

    /// Run rounds until nothing changes, committing `initial` first.
    ///
    /// Returns the net diff of this fixpoint, which is also what result
    /// subscribers receive.
    pub fn fixpoint(&mut self, initial: Option<Changes>) -> Result<Diff> {
        self.ensure_between_rounds("run a fixpoint")?;
        self.in_round = true;
        let started = Instant::now();
        let mut net = std::mem::take(&mut self.pending);
        let outcome = self.run_rounds(initial, &mut net);
        self.in_round = false;

        if let Err(err) = outcome {
            // Whatever reached the stores is reported by the next fixpoint.
            self.pending = net;
            if let EvalError::Diverged { .. } = err {
                self.poisoned = true;
                let message = err.to_string();
                tracing::error!(error = %message, "fixpoint diverged");
                self.report_error(err.kind(), &message);
            }
            return Err(err);
        }

        self.metrics.record_fixpoint(started.elapsed());
        if !net.is_empty() {
            for subscriber in &self.result_subscribers {
                subscriber(&net);
            }
        }
        Ok(net)
    }

    fn run_rounds(&mut self, initial: Option<Changes>, net: &mut Diff) -> Result<()> {
        if let Some(changes) = initial.filter(|c| !c.is_empty()) {
            net.merge(self.apply_changes(changes)?);
        }

        let mut rounds = 0;
        loop {
            if rounds >= self.config.max_rounds {
                return Err(EvalError::Diverged { rounds });
            }
            rounds += 1;
            self.metrics.record_round();

            let (commits, binds) = self.evaluate_blocks();
            let mut plan = self.support.plan(&binds, &Universe(&self.databases));
            let mut changes = Changes::from(std::mem::take(&mut plan.actions));
            changes.append(commits);

            let applied = if changes.is_empty() {
                Diff::new()
            } else {
                match self.apply_changes(changes) {
                    Ok(applied) => applied,
                    Err(err) => {
                        self.settle_blocks(false);
                        return Err(err);
                    }
                }
            };
            self.settle_blocks(true);
            self.support.apply(plan);

            if applied.is_empty() {
                break;
            }
            tracing::debug!(round = rounds, size = applied.len(), "round applied");
            net.merge(applied);
        }
        tracing::debug!(rounds, size = net.len(), "fixpoint settled");
        Ok(())
    }

    /// Evaluate every live block against the current snapshot.
    fn evaluate_blocks(&mut self) -> (Changes, BindDelta) {
        let mut changes = Changes::new();
        let mut binds = BindDelta::new();
        for ix in 0..self.databases.len() {
            if self.databases[ix].blocks().is_empty() {
                continue;
            }
            // Blocks are moved out so they can be mutated while the
            // stores are read.
            let mut arena = std::mem::take(self.databases[ix].blocks_mut());
            let home = self.databases[ix].name().to_string();
            let user = self.databases[ix].kind().is_user();
            let universe = Universe(&self.databases);

            for block in arena.iter_mut().filter(|b| !b.dormant) {
                let started = Instant::now();
                let run = block.evaluate(&universe, &home, &mut changes, &mut binds);
                self.metrics.record_block(
                    &block.key,
                    &block.name,
                    user,
                    started.elapsed(),
                    run.matches > 0,
                );
                tracing::trace!(block = %block.key, matches = run.matches, emitted = run.emitted, "evaluated block");
            }

            *self.databases[ix].blocks_mut() = arena;
        }
        (changes, binds)
    }

    /// Keep or drop the state every block staged this round.
    fn settle_blocks(&mut self, keep: bool) {
        for db in &mut self.databases {
            for block in db.blocks_mut().iter_mut() {
                if !keep {
                    block.discard();
                } else if block.settle() {
                    tracing::debug!(block = %block.key, "single-run block fired; now dormant");
                    self.fired_single_run.insert(block.key.clone());
                }
            }
        }
    }

    /// Commit `changes` into the stores and run one propagation round.
    fn apply_changes(&mut self, changes: Changes) -> Result<Diff> {
        let diffs = changes.commit(&self.databases)?;
        let mut applied = Diff::new();
        for (name, diff) in &diffs {
            let ix = self.index_of(name)?;
            let report = self.databases[ix].store_mut().apply(diff);
            applied.extend(report.applied);
        }
        self.propagate();
        Ok(applied)
    }

    /// Dispatch every store, then clear every store.
    fn propagate(&mut self) {
        for db in &self.databases {
            db.store().dispatch_if_dirty();
        }
        for db in &mut self.databases {
            db.store_mut().clear_dirty();
        }
    }

    /// Reconcile the bind output of `db`'s current blocks against `next`.
    ///
    /// Retained blocks (same key) carry their state into `next` and their
    /// output is recomputed against current facts: facts the new body still
    /// derives stay put, the rest are retracted through `changes`. Retired
    /// blocks give up all of their output. Support counts move at once, so
    /// `changes` must be committed by the caller.
    pub fn update_binds(
        &mut self,
        db: &str,
        next: &mut BlockArena,
        changes: &mut Changes,
    ) -> Result<ArenaDiff> {
        self.ensure_between_rounds("update binds")?;
        let ix = self.index_of(db)?;

        // Retired blocks are consumed, so take a working copy of the arena.
        let mut current = self.databases[ix].blocks().clone();
        let diff = current.diff(next);
        let universe = Universe(&self.databases);

        let mut binds = BindDelta::new();
        for key in &diff.retired {
            if let Some(block) = current.get_mut(key) {
                let retracted = block.retract(&mut binds);
                tracing::debug!(block = %key, retracted, "retired block");
            }
        }
        for key in &diff.retained {
            if let (Some(previous), Some(block)) = (current.get(key), next.get_mut(key)) {
                block.reconcile_from(previous, &universe, db, &mut binds);
            }
        }

        let mut plan = self.support.plan(&binds, &universe);
        changes.extend(std::mem::take(&mut plan.actions));
        self.support.apply(plan);
        Ok(diff)
    }

    /// Swap `db`'s block set for `next`, returning the old set.
    ///
    /// Single-run blocks that already fired in this evaluation arrive dormant.
    pub fn replace_blocks(&mut self, db: &str, mut next: BlockArena) -> Result<BlockArena> {
        self.ensure_between_rounds("replace blocks")?;
        let ix = self.index_of(db)?;
        for block in next.iter_mut() {
            if block.single_run && self.fired_single_run.contains(&block.key) {
                block.dormant = true;
            }
        }
        Ok(self.databases[ix].replace_blocks(next))
    }

    /// Every fact in `db`, sorted
    pub fn save(&self, db: &str) -> Result<Vec<Triple>> {
        self.ensure_usable()?;
        let ix = self.index_of(db)?;
        Ok(self.databases[ix].store().triples())
    }

    /// Every fact of every database, by name
    pub fn save_all(&self) -> Result<BTreeMap<String, Vec<Triple>>> {
        self.ensure_usable()?;
        Ok(self
            .databases
            .iter()
            .map(|db| (db.name().to_string(), db.store().triples()))
            .collect())
    }

    /// Replace the content of the named databases and settle.
    ///
    /// Every single-run block goes dormant first so restored state does
    /// not repeat one-shot effects.
    pub fn load(&mut self, snapshot: BTreeMap<String, Vec<Triple>>) -> Result<Diff> {
        self.ensure_between_rounds("load")?;
        for name in snapshot.keys() {
            self.index_of(name)?;
        }

        for db in &mut self.databases {
            for block in db.blocks_mut().iter_mut().filter(|b| b.single_run) {
                block.dormant = true;
                self.fired_single_run.insert(block.key.clone());
            }
        }

        let mut applied = Diff::new();
        for (name, triples) in snapshot {
            let ix = self.index_of(&name)?;
            let store = self.databases[ix].store_mut();
            let mut diff = store.clear_diff();
            diff.merge(Diff::from_parts(Vec::new(), triples));
            let report = store.apply(&diff);
            tracing::debug!(db = %name, size = report.applied.len(), "loaded database");
            applied.extend(report.applied);
        }
        self.propagate();
        self.pending.merge(applied);

        self.fixpoint(None)
    }

    /// Tear down every database. Nothing may run afterwards.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(EvalError::Closed);
        }
        if self.in_round {
            return Err(EvalError::RoundInProgress("close"));
        }
        tracing::debug!(databases = self.databases.len(), "closing evaluation");
        self.databases.clear();
        self.result_subscribers.clear();
        self.support.clear();
        self.pending = Diff::new();
        self.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Databases an orchestrator registers for a fresh evaluation
    pub fn standard_kinds(config: &Config) -> Vec<DatabaseKind> {
        let mut kinds = vec![DatabaseKind::Session, DatabaseKind::Browser, DatabaseKind::Event];
        if config.with_ide {
            kinds.extend([DatabaseKind::View, DatabaseKind::Editor, DatabaseKind::Inspector]);
        }
        kinds.push(DatabaseKind::System);
        kinds.extend(
            config
                .extra_databases
                .iter()
                .map(|name| DatabaseKind::Custom(name.clone())),
        );
        kinds
    }
}

impl std::fmt::Debug for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluation")
            .field("state", &self.state())
            .field("databases", &self.databases)
            .field("fired_single_run", &self.fired_single_run.len())
            .field("bind_support", &self.support.len())
            .finish()
    }
}
