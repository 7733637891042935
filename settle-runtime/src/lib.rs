//! Settle runtime
//!
//! Evaluates rule blocks over fact databases until nothing changes, and
//! drives that evaluation from a stream of JSON messages.
//!
//! # Architecture
//!
//! - [`Database`]: a named [`RecordStore`](settle_incremental::RecordStore)
//!   plus the [`Block`]s it owns
//! - [`Evaluation`]: the database registry and the fixpoint loop
//! - [`Changes`]: staged [`Action`]s committed as one net diff per database
//! - [`RuntimeClient`]: turns inbound messages into evaluation calls and
//!   sends results through a [`Transport`]
//!
//! # Example
//!
//! ```rust
//! use settle_runtime::prelude::*;
//!
//! let clicks = Block::new("clicks", "handle clicks")
//!     .with_pattern(Pattern::new(Term::var("e"), Term::constant("tag"), Term::constant("click")))
//!     .with_commit(ActionTemplate::add(Term::var("e"), Term::constant("handled"), Term::constant(true)));
//!
//! let mut evaluation = Evaluation::new(Config::default());
//! evaluation
//!     .register_database(Database::new("session", DatabaseKind::Session).with_blocks([clicks]))
//!     .unwrap();
//! evaluation
//!     .register_database(Database::new("event", DatabaseKind::Event))
//!     .unwrap();
//!
//! let net = evaluation
//!     .execute_actions(vec![Action::add("event", "e1", "tag", "click")])
//!     .unwrap();
//! assert_eq!(net.insert.len(), 2);
//! ```

#![warn(missing_debug_implementations)]

pub mod action;
pub mod block;
pub mod changes;
pub mod client;
pub mod collab;
pub mod config;
pub mod database;
pub mod doc;
pub mod error;
pub mod evaluation;
pub mod ids;
pub mod metrics;
mod support;

pub use action::Action;
pub use block::{
    ActionTemplate, ArenaDiff, BindDelta, Bindings, Block, BlockArena, BlockKey, BlockRun, Facts,
    Pattern, TemplateOp, Term,
};
pub use changes::Changes;
pub use client::{RuntimeClient, EVENT_DB, SESSION_DB};
pub use collab::{
    Analyzer, BuildOutput, CollectingTransport, DocBuilder, DocParser, NoAnalysis, ParseOutput,
    Transport,
};
pub use config::{AttributeConfig, Config, ConfigError};
pub use database::{Database, DatabaseKind};
pub use doc::{BlockDoc, BlockSpec, JsonDocBuilder, JsonDocParser};
pub use error::{EvalError, Result};
pub use evaluation::{ErrorReporter, Evaluation, EvaluationState};
pub use ids::{mint_id, Interner};
pub use metrics::{BlockMetrics, EvaluationMetrics, MetricsSnapshot};

/// Prelude for common imports
pub mod prelude {
    pub use crate::action::Action;
    pub use crate::block::{ActionTemplate, Block, BlockArena, Pattern, Term};
    pub use crate::changes::Changes;
    pub use crate::config::Config;
    pub use crate::database::{Database, DatabaseKind};
    pub use crate::error::{EvalError, Result};
    pub use crate::evaluation::Evaluation;
    pub use settle_types::{Attribute, Diff, Id, Triple, Value};
}
