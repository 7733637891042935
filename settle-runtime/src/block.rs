//! Compiled rule blocks
//!
//! A [`Block`] is a conjunctive query over triples plus the actions to run
//! for each solution. It has two kinds of output:
//!
//! - **bind** actions describe facts that hold exactly while the query
//!   matches. The block remembers what it derived last time and reports
//!   only the difference as a [`BindDelta`]. Turning derivations into store
//!   writes is the evaluation's job, since several blocks may derive the
//!   same fact.
//! - **commit** actions are persistent writes. They run once for each
//!   solution the block had not seen on its previous evaluation.
//!
//! [`Block::evaluate`] only stages the block's next state. The evaluation
//! keeps it with [`Block::settle`] once the round's writes are committed,
//! or drops it with [`Block::discard`] so the round can be retried.
//!
//! Blocks live in a [`BlockArena`] addressed by stable [`BlockKey`]s.
//! Recompiling source produces a new arena; [`BlockArena::diff`] says which
//! blocks were retired, retained and added so state can be carried over.

use crate::action::Action;
use crate::changes::Changes;
use crate::ids::mint_id;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use settle_types::{Attribute, Id, Triple, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// Variable bindings for one query solution
pub type Bindings = BTreeMap<String, Value>;

/// Read access to the facts a block can join over
pub trait Facts {
    /// Triples matching the bound positions, in `scope` or in every
    /// database when `scope` is `None`.
    fn scan(
        &self,
        scope: Option<&str>,
        e: Option<&Id>,
        a: Option<&Attribute>,
        v: Option<&Value>,
    ) -> Vec<Triple>;

    fn contains(&self, db: &str, triple: &Triple) -> bool {
        !self
            .scan(Some(db), Some(&triple.e), Some(&triple.a), Some(&triple.v))
            .is_empty()
    }
}

/// Stable source identity of a block
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockKey(pub String);

impl BlockKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockKey {
    fn from(key: &str) -> Self {
        BlockKey(key.to_string())
    }
}

/// One position of a pattern or action template
///
/// In JSON a term is a scalar, a string starting with `?` for a variable,
/// or `{"mint": [vars...]}` for a derived id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Var(String),
    Const(Value),
    /// A derived id, minted from the block key and these variables
    Mint(Vec<String>),
}

impl Term {
    pub fn var(name: impl Into<String>) -> Self {
        Term::Var(name.into())
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Term::Const(value.into())
    }

    pub fn mint<S: Into<String>>(vars: impl IntoIterator<Item = S>) -> Self {
        Term::Mint(vars.into_iter().map(Into::into).collect())
    }

    /// Variables this term reads
    pub fn vars(&self) -> Vec<&str> {
        match self {
            Term::Var(name) => vec![name.as_str()],
            Term::Const(_) => Vec::new(),
            Term::Mint(vars) => vars.iter().map(String::as_str).collect(),
        }
    }

    /// The value of this term under `bindings`, if it has one.
    pub fn resolve(&self, bindings: &Bindings, block: &BlockKey) -> Option<Value> {
        match self {
            Term::Var(name) => bindings.get(name).cloned(),
            Term::Const(value) => Some(value.clone()),
            Term::Mint(vars) => {
                let mut parts = Vec::with_capacity(vars.len());
                for var in vars {
                    parts.push((var.as_str(), bindings.get(var)?));
                }
                Some(Value::from(mint_id(block.as_str(), parts)))
            }
        }
    }

    /// Match `value` against this term, binding a fresh variable.
    fn unify(&self, value: &Value, bindings: &mut Bindings) -> bool {
        match self {
            Term::Var(name) => match bindings.get(name) {
                Some(bound) => bound == value,
                None => {
                    bindings.insert(name.clone(), value.clone());
                    true
                }
            },
            Term::Const(constant) => constant == value,
            Term::Mint(_) => false,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawTerm {
    Mint { mint: Vec<String> },
    Scalar(Value),
}

impl Serialize for Term {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Term::Var(name) => serializer.serialize_str(&format!("?{}", name)),
            Term::Const(value) => value.serialize(serializer),
            Term::Mint(vars) => RawTerm::Mint { mint: vars.clone() }.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Term {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawTerm::deserialize(deserializer)? {
            RawTerm::Mint { mint } if mint.is_empty() => {
                Err(de::Error::custom("mint needs at least one variable"))
            }
            RawTerm::Mint { mint } => Ok(Term::Mint(mint)),
            RawTerm::Scalar(Value::Text(text)) => match text.strip_prefix('?') {
                Some("") => Err(de::Error::custom("variable needs a name")),
                Some(name) => Ok(Term::Var(name.to_string())),
                None => Ok(Term::Const(Value::Text(text))),
            },
            RawTerm::Scalar(value) => Ok(Term::Const(value)),
        }
    }
}

/// A triple pattern, optionally restricted to one database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub e: Term,
    pub a: Term,
    pub v: Term,
}

impl Pattern {
    pub fn new(e: Term, a: Term, v: Term) -> Self {
        Self {
            scope: None,
            e,
            a,
            v,
        }
    }

    pub fn in_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    fn solve(&self, facts: &dyn Facts, bindings: &Bindings, block: &BlockKey) -> Vec<Bindings> {
        let e = self.e.resolve(bindings, block);
        let a = self.a.resolve(bindings, block);
        let v = self.v.resolve(bindings, block);

        // Entities and attributes are always text.
        let e = match e {
            Some(value) => match value.as_id() {
                Some(id) => Some(id),
                None => return Vec::new(),
            },
            None => None,
        };
        let a = match a {
            Some(value) => match value.as_str() {
                Some(name) => Some(Attribute::new(name)),
                None => return Vec::new(),
            },
            None => None,
        };

        let mut out = Vec::new();
        for triple in facts.scan(self.scope.as_deref(), e.as_ref(), a.as_ref(), v.as_ref()) {
            let mut next = bindings.clone();
            if self.e.unify(&Value::from(&triple.e), &mut next)
                && self.a.unify(&Value::from(triple.a.as_str()), &mut next)
                && self.v.unify(&triple.v, &mut next)
            {
                out.push(next);
            }
        }
        out
    }
}

/// Operation produced by an action template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateOp {
    #[default]
    Add,
    Remove,
    Set,
    Erase,
}

/// An action with terms in place of values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTemplate {
    #[serde(default)]
    pub op: TemplateOp,
    /// Target database; the block's own database when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
    pub e: Term,
    pub a: Term,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<Term>,
}

impl ActionTemplate {
    pub fn new(op: TemplateOp, e: Term, a: Term, v: Option<Term>) -> Self {
        Self {
            op,
            db: None,
            e,
            a,
            v,
        }
    }

    pub fn add(e: Term, a: Term, v: Term) -> Self {
        Self::new(TemplateOp::Add, e, a, Some(v))
    }

    pub fn in_db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    /// Variables this template reads
    pub fn vars(&self) -> Vec<&str> {
        let mut vars = self.e.vars();
        vars.extend(self.a.vars());
        if let Some(v) = &self.v {
            vars.extend(v.vars());
        }
        vars
    }

    /// Build the concrete action for one solution.
    pub fn instantiate(&self, bindings: &Bindings, block: &BlockKey, home: &str) -> Option<Action> {
        let db = self.db.clone().unwrap_or_else(|| home.to_string());
        let e = self.e.resolve(bindings, block)?.as_id()?;
        let a = Attribute::new(self.a.resolve(bindings, block)?.as_str()?);
        let value = match &self.v {
            Some(term) => Some(term.resolve(bindings, block)?),
            None => None,
        };

        match (self.op, value) {
            (TemplateOp::Add, Some(v)) => Some(Action::Add {
                db,
                triple: Triple { e, a, v },
            }),
            (TemplateOp::Remove, Some(v)) => Some(Action::Remove {
                db,
                triple: Triple { e, a, v },
            }),
            (TemplateOp::Set, Some(v)) => Some(Action::Set { db, e, a, v }),
            (TemplateOp::Erase, _) | (TemplateOp::Remove, None) => Some(Action::Erase { db, e, a }),
            (TemplateOp::Add | TemplateOp::Set, None) => None,
        }
    }
}

/// State a block carries between evaluations
#[derive(Debug, Clone, Default, PartialEq)]
struct BlockState {
    /// Facts currently derived by bind actions, keyed by target database
    bound: BTreeSet<(String, Triple)>,
    /// Solutions seen on the previous evaluation
    seen: BTreeSet<Bindings>,
}

/// Facts a block started or stopped deriving, keyed by target database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindDelta {
    pub gained: Vec<(String, Triple)>,
    pub lost: Vec<(String, Triple)>,
}

impl BindDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.gained.len() + self.lost.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gained.is_empty() && self.lost.is_empty()
    }

    /// Record the move from `previous` to `next`, returning its size.
    fn record(
        &mut self,
        previous: &BTreeSet<(String, Triple)>,
        next: &BTreeSet<(String, Triple)>,
    ) -> usize {
        let before = self.len();
        self.lost.extend(previous.difference(next).cloned());
        self.gained.extend(next.difference(previous).cloned());
        self.len() - before
    }
}

/// Result of evaluating a block once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockRun {
    /// Number of query solutions
    pub matches: usize,
    /// Number of actions emitted
    pub emitted: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub key: BlockKey,
    pub name: String,
    pub patterns: Vec<Pattern>,
    pub bind_actions: Vec<ActionTemplate>,
    pub commit_actions: Vec<ActionTemplate>,
    /// Skipped by fixpoint while set
    pub dormant: bool,
    /// Fires at most once per activation, then goes dormant
    pub single_run: bool,
    state: BlockState,
    staged: Option<BlockState>,
}

impl Block {
    pub fn new(key: impl Into<BlockKey>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            patterns: Vec::new(),
            bind_actions: Vec::new(),
            commit_actions: Vec::new(),
            dormant: false,
            single_run: false,
            state: BlockState::default(),
            staged: None,
        }
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn with_bind(mut self, template: ActionTemplate) -> Self {
        self.bind_actions.push(template);
        self
    }

    pub fn with_commit(mut self, template: ActionTemplate) -> Self {
        self.commit_actions.push(template);
        self
    }

    pub fn run_once(mut self) -> Self {
        self.single_run = true;
        self
    }

    /// Facts this block's bind actions currently derive
    pub fn bound(&self) -> impl Iterator<Item = (&str, &Triple)> {
        self.state.bound.iter().map(|(db, t)| (db.as_str(), t))
    }

    /// Every solution of the block's query
    pub fn solve(&self, facts: &dyn Facts) -> Vec<Bindings> {
        let mut frontier = vec![Bindings::new()];
        for pattern in &self.patterns {
            let mut next = Vec::new();
            for bindings in &frontier {
                next.extend(pattern.solve(facts, bindings, &self.key));
            }
            if next.is_empty() {
                return next;
            }
            frontier = next;
        }
        frontier
    }

    fn bind_output(&self, solutions: &[Bindings], home: &str) -> BTreeSet<(String, Triple)> {
        let mut output = BTreeSet::new();
        for bindings in solutions {
            for template in &self.bind_actions {
                match template.instantiate(bindings, &self.key, home) {
                    Some(Action::Add { db, triple }) => {
                        output.insert((db, triple));
                    }
                    Some(other) => {
                        tracing::warn!(block = %self.key, action = %other, "bind actions may only add");
                    }
                    None => {}
                }
            }
        }
        output
    }

    /// Evaluate against `facts`, staging the block's next state.
    ///
    /// Commit actions go into `changes` and bind output changes into
    /// `binds`. `home` is the database that owns the block; templates
    /// without an explicit database write there.
    pub fn evaluate(
        &mut self,
        facts: &dyn Facts,
        home: &str,
        changes: &mut Changes,
        binds: &mut BindDelta,
    ) -> BlockRun {
        let solutions = self.solve(facts);
        let mut run = BlockRun {
            matches: solutions.len(),
            emitted: 0,
        };
        let mut next = BlockState::default();

        if !self.bind_actions.is_empty() || !self.state.bound.is_empty() {
            next.bound = self.bind_output(&solutions, home);
            run.emitted += binds.record(&self.state.bound, &next.bound);
        }

        next.seen = solutions.into_iter().collect();
        if !self.commit_actions.is_empty() {
            for bindings in next.seen.difference(&self.state.seen) {
                for template in &self.commit_actions {
                    let Some(action) = template.instantiate(bindings, &self.key, home) else {
                        continue;
                    };
                    // Committing a fact that already holds is a no-op.
                    if let Action::Add { db, triple } = &action {
                        if facts.contains(db, triple) {
                            continue;
                        }
                    }
                    changes.push(action);
                    run.emitted += 1;
                }
            }
        }
        self.staged = Some(next);

        run
    }

    /// Keep the state staged by the last [`Block::evaluate`].
    ///
    /// Returns true when this sends a single-run block dormant.
    pub fn settle(&mut self) -> bool {
        let Some(next) = self.staged.take() else {
            return false;
        };
        let fired = self.single_run && !next.seen.is_empty();
        self.state = next;
        if fired {
            self.dormant = true;
        }
        fired
    }

    /// Drop the state staged by the last [`Block::evaluate`].
    pub fn discard(&mut self) {
        self.staged = None;
    }

    /// Take over `previous`'s state, reconciling bind output against `facts`.
    ///
    /// Facts the new body still derives are left alone, so their entity ids
    /// survive; the rest of the change lands in `binds`.
    pub fn reconcile_from(
        &mut self,
        previous: &Block,
        facts: &dyn Facts,
        home: &str,
        binds: &mut BindDelta,
    ) -> usize {
        self.state = previous.state.clone();
        self.staged = None;
        if self.bind_actions.is_empty() && self.state.bound.is_empty() {
            return 0;
        }
        let solutions = self.solve(facts);
        let output = self.bind_output(&solutions, home);
        let emitted = binds.record(&self.state.bound, &output);
        self.state.bound = output;
        emitted
    }

    /// Stop deriving everything this block's bind actions derive.
    pub fn retract(&mut self, binds: &mut BindDelta) -> usize {
        let bound = std::mem::take(&mut self.state.bound);
        binds.record(&bound, &BTreeSet::new())
    }
}

/// How two arenas relate, by block key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArenaDiff {
    /// Keys only in the old arena
    pub retired: Vec<BlockKey>,
    /// Keys in both
    pub retained: Vec<BlockKey>,
    /// Keys only in the new arena
    pub added: Vec<BlockKey>,
}

/// Ordered blocks addressed by key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockArena {
    blocks: Vec<Block>,
}

impl BlockArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an arena, dropping blocks whose key is already taken.
    pub fn from_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        let mut arena = Self::new();
        for block in blocks {
            if let Err(block) = arena.insert(block) {
                tracing::warn!(block = %block.key, "duplicate block key; dropping block");
            }
        }
        arena
    }

    /// Append a block; hands it back if its key is taken.
    pub fn insert(&mut self, block: Block) -> Result<(), Block> {
        if self.contains(&block.key) {
            return Err(block);
        }
        self.blocks.push(block);
        Ok(())
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.blocks.iter().any(|b| &b.key == key)
    }

    pub fn get(&self, key: &BlockKey) -> Option<&Block> {
        self.blocks.iter().find(|b| &b.key == key)
    }

    pub fn get_mut(&mut self, key: &BlockKey) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| &b.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Block> {
        self.blocks.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &BlockKey> {
        self.blocks.iter().map(|b| &b.key)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn diff(&self, next: &BlockArena) -> ArenaDiff {
        let old: HashSet<&BlockKey> = self.keys().collect();
        let new: HashSet<&BlockKey> = next.keys().collect();
        ArenaDiff {
            retired: self.keys().filter(|k| !new.contains(k)).cloned().collect(),
            retained: next.keys().filter(|k| old.contains(k)).cloned().collect(),
            added: next.keys().filter(|k| !old.contains(k)).cloned().collect(),
        }
    }
}

impl FromIterator<Block> for BlockArena {
    fn from_iter<T: IntoIterator<Item = Block>>(iter: T) -> Self {
        Self::from_blocks(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A single-database fact list
    struct Fixed(Vec<Triple>);

    impl Facts for Fixed {
        fn scan(
            &self,
            _scope: Option<&str>,
            e: Option<&Id>,
            a: Option<&Attribute>,
            v: Option<&Value>,
        ) -> Vec<Triple> {
            self.0
                .iter()
                .filter(|t| e.map_or(true, |e| &t.e == e))
                .filter(|t| a.map_or(true, |a| &t.a == a))
                .filter(|t| v.map_or(true, |v| &t.v == v))
                .cloned()
                .collect()
        }
    }

    fn click_block() -> Block {
        Block::new("click", "handle clicks")
            .with_pattern(Pattern::new(
                Term::var("e"),
                Term::constant("tag"),
                Term::constant("click"),
            ))
            .with_commit(ActionTemplate::add(
                Term::var("e"),
                Term::constant("handled"),
                Term::constant(true),
            ))
    }

    #[test]
    fn test_term_json() {
        let terms: Vec<Term> =
            serde_json::from_str(r#"["?e", "tag", 3, true, {"mint": ["e"]}]"#).unwrap();
        assert_eq!(
            terms,
            vec![
                Term::var("e"),
                Term::constant("tag"),
                Term::constant(3),
                Term::constant(true),
                Term::mint(["e"]),
            ]
        );
        assert_eq!(
            serde_json::to_string(&terms).unwrap(),
            r#"["?e","tag",3,true,{"mint":["e"]}]"#
        );
        assert!(serde_json::from_str::<Term>(r#""?""#).is_err());
    }

    #[test]
    fn test_join_shares_variables() {
        let facts = Fixed(vec![
            Triple::new("a", "parent", "b"),
            Triple::new("b", "name", "bee"),
            Triple::new("c", "parent", "d"),
        ]);
        let block = Block::new("k", "join")
            .with_pattern(Pattern::new(
                Term::var("x"),
                Term::constant("parent"),
                Term::var("p"),
            ))
            .with_pattern(Pattern::new(
                Term::var("p"),
                Term::constant("name"),
                Term::var("n"),
            ));

        let solutions = block.solve(&facts);
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0]["n"], Value::from("bee"));
    }

    #[test]
    fn test_repeated_variable_in_pattern() {
        let facts = Fixed(vec![Triple::new("a", "self", "a"), Triple::new("a", "self", "b")]);
        let block = Block::new("k", "loop").with_pattern(Pattern::new(
            Term::var("x"),
            Term::constant("self"),
            Term::var("x"),
        ));
        assert_eq!(block.solve(&facts).len(), 1);
    }

    #[test]
    fn test_commit_fires_once_per_new_solution() {
        let mut block = click_block();
        let facts = Fixed(vec![Triple::new("e1", "tag", "click")]);

        let mut changes = Changes::new();
        let run = block.evaluate(&facts, "session", &mut changes, &mut BindDelta::new());
        assert_eq!(run, BlockRun { matches: 1, emitted: 1 });
        assert_eq!(
            changes.actions(),
            &[Action::add("session", "e1", "handled", true)]
        );
        assert!(!block.settle());

        let mut again = Changes::new();
        block.evaluate(&facts, "session", &mut again, &mut BindDelta::new());
        assert!(again.is_empty());
    }

    #[test]
    fn test_discarded_run_fires_again() {
        let mut block = click_block();
        let facts = Fixed(vec![Triple::new("e1", "tag", "click")]);

        let mut changes = Changes::new();
        block.evaluate(&facts, "session", &mut changes, &mut BindDelta::new());
        block.discard();

        let mut retry = Changes::new();
        block.evaluate(&facts, "session", &mut retry, &mut BindDelta::new());
        assert_eq!(retry, changes);
    }

    #[test]
    fn test_single_run_goes_dormant_on_settle() {
        let mut block = click_block().run_once();
        let facts = Fixed(vec![Triple::new("e1", "tag", "click")]);

        block.evaluate(&facts, "session", &mut Changes::new(), &mut BindDelta::new());
        assert!(!block.dormant);
        assert!(block.settle());
        assert!(block.dormant);
    }

    #[test]
    fn test_bind_output_follows_support() {
        let mut block = Block::new("k", "label")
            .with_pattern(Pattern::new(
                Term::var("e"),
                Term::constant("tag"),
                Term::constant("row"),
            ))
            .with_bind(ActionTemplate::add(
                Term::var("e"),
                Term::constant("class"),
                Term::constant("striped"),
            ));
        let striped = ("session".to_string(), Triple::new("r1", "class", "striped"));

        let mut binds = BindDelta::new();
        let facts = Fixed(vec![Triple::new("r1", "tag", "row")]);
        block.evaluate(&facts, "session", &mut Changes::new(), &mut binds);
        block.settle();
        assert_eq!(binds.gained, vec![striped.clone()]);
        assert!(binds.lost.is_empty());

        let mut binds = BindDelta::new();
        block.evaluate(&Fixed(vec![]), "session", &mut Changes::new(), &mut binds);
        block.settle();
        assert_eq!(binds.lost, vec![striped]);
        assert!(binds.gained.is_empty());
        assert_eq!(block.bound().count(), 0);
    }

    #[test]
    fn test_mint_keeps_identity_across_literal_edit() {
        let facts = Fixed(vec![Triple::new("r1", "tag", "row")]);
        let make = |label: &str| {
            Block::new("cells", "cells")
                .with_pattern(Pattern::new(
                    Term::var("r"),
                    Term::constant("tag"),
                    Term::constant("row"),
                ))
                .with_bind(ActionTemplate::add(
                    Term::mint(["r"]),
                    Term::constant("text"),
                    Term::constant(label),
                ))
        };

        let mut old = make("hello");
        old.evaluate(&facts, "session", &mut Changes::new(), &mut BindDelta::new());
        old.settle();

        let mut new = make("goodbye");
        let mut binds = BindDelta::new();
        assert_eq!(new.reconcile_from(&old, &facts, "session", &mut binds), 2);

        match (&binds.lost[..], &binds.gained[..]) {
            ([(_, gone)], [(_, added)]) => {
                assert_eq!(gone.e, added.e);
                assert_eq!(gone.v, Value::from("hello"));
                assert_eq!(added.v, Value::from("goodbye"));
            }
            other => panic!("unexpected delta: {:?}", other),
        }
    }

    #[test]
    fn test_retract_loses_everything_bound() {
        let mut block = Block::new("k", "label")
            .with_pattern(Pattern::new(Term::var("e"), Term::constant("tag"), Term::var("t")))
            .with_bind(ActionTemplate::add(Term::var("e"), Term::constant("kind"), Term::var("t")));
        let facts = Fixed(vec![Triple::new("a", "tag", "x"), Triple::new("b", "tag", "y")]);
        block.evaluate(&facts, "session", &mut Changes::new(), &mut BindDelta::new());
        block.settle();

        let mut binds = BindDelta::new();
        assert_eq!(block.retract(&mut binds), 2);
        assert!(binds.gained.is_empty());
        assert_eq!(block.bound().count(), 0);
    }

    #[test]
    fn test_instantiate_unbound_var_is_skipped() {
        let template = ActionTemplate::add(Term::var("missing"), Term::constant("a"), Term::constant(1));
        assert!(template
            .instantiate(&Bindings::new(), &BlockKey::from("k"), "session")
            .is_none());
    }

    #[test]
    fn test_arena_diff() {
        let old = BlockArena::from_blocks([Block::new("a", "a"), Block::new("b", "b")]);
        let new = BlockArena::from_blocks([Block::new("b", "b"), Block::new("c", "c")]);
        let diff = old.diff(&new);
        assert_eq!(diff.retired, vec![BlockKey::from("a")]);
        assert_eq!(diff.retained, vec![BlockKey::from("b")]);
        assert_eq!(diff.added, vec![BlockKey::from("c")]);
    }

    #[test]
    fn test_arena_rejects_duplicate_keys() {
        let arena = BlockArena::from_blocks([Block::new("a", "first"), Block::new("a", "second")]);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.get(&BlockKey::from("a")).unwrap().name, "first");
    }
}
