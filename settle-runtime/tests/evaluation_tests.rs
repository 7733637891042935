//! Fixpoint behaviour of evaluations

use parking_lot::Mutex;
use settle_incremental::RecordStore;
use settle_runtime::prelude::*;
use settle_runtime::{EvaluationState, TemplateOp};
use std::sync::Arc;

fn click_block() -> Block {
    Block::new("clicks", "handle clicks")
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

fn evaluation_with(blocks: Vec<Block>) -> Evaluation {
    let mut evaluation = Evaluation::new(Config::default());
    evaluation
        .register_database(Database::new("session", DatabaseKind::Session).with_blocks(blocks))
        .unwrap();
    evaluation
        .register_database(Database::new("event", DatabaseKind::Event))
        .unwrap();
    evaluation
}

fn collect_results(evaluation: &mut Evaluation) -> Arc<Mutex<Vec<Diff>>> {
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    evaluation.subscribe_results(move |diff| sink.lock().push(diff.clone()));
    results
}

#[test]
fn test_click_settles_into_one_diff() {
    let mut evaluation = evaluation_with(vec![click_block()]);
    let results = collect_results(&mut evaluation);

    evaluation
        .execute_actions(vec![Action::add("event", "e1", "tag", "click")])
        .unwrap();

    let results = results.lock();
    assert_eq!(results.len(), 1);
    let diff = results[0].clone().normalized();
    assert!(diff.remove.is_empty());
    assert_eq!(
        diff.insert,
        vec![
            Triple::new("e1", "handled", true),
            Triple::new("e1", "tag", "click"),
        ]
    );
    assert_eq!(
        evaluation.save("session").unwrap(),
        vec![Triple::new("e1", "handled", true)]
    );

    // A mirror folding the broadcast sees the whole entity.
    let mut mirror = RecordStore::new("mirror");
    mirror.apply_diff(&results[0]);
    let record = mirror.record(&Id::new("e1")).unwrap();
    assert_eq!(record.get("tag"), Some(&[Value::from("click")][..]));
    assert_eq!(record.get("handled"), Some(&[Value::from(true)][..]));
    assert_eq!(record.len(), 2);
}

#[test]
fn test_fixpoint_is_idempotent() {
    let mut evaluation = evaluation_with(vec![click_block()]);
    let results = collect_results(&mut evaluation);

    evaluation
        .execute_actions(vec![Action::add("event", "e1", "tag", "click")])
        .unwrap();
    let before = evaluation.save_all().unwrap();

    assert!(evaluation.fixpoint(None).unwrap().is_empty());
    assert_eq!(evaluation.save_all().unwrap(), before);
    assert_eq!(results.lock().len(), 1);
}

#[test]
fn test_bind_output_retracts_with_support() {
    let highlight = Block::new("highlight", "highlight selection")
        .with_pattern(
            Pattern::new(Term::var("e"), Term::constant("selected"), Term::constant(true))
                .in_scope("event"),
        )
        .with_bind(ActionTemplate::add(
            Term::var("e"),
            Term::constant("class"),
            Term::constant("active"),
        ));
    let mut evaluation = evaluation_with(vec![highlight]);

    let net = evaluation
        .execute_actions(vec![Action::add("event", "row", "selected", true)])
        .unwrap();
    assert!(net.insert.contains(&Triple::new("row", "class", "active")));

    let net = evaluation
        .execute_actions(vec![Action::remove("event", "row", "selected", true)])
        .unwrap()
        .normalized();
    assert_eq!(
        net.remove,
        vec![
            Triple::new("row", "class", "active"),
            Triple::new("row", "selected", true),
        ]
    );
    assert!(evaluation.save("session").unwrap().is_empty());
}

#[test]
fn test_single_run_block_fires_once() {
    let mut counter = ActionTemplate::add(
        Term::constant("app"),
        Term::constant("boots"),
        Term::constant(1),
    );
    counter.op = TemplateOp::Set;
    let boot = Block::new("boot", "boot").with_commit(counter).run_once();
    let mut evaluation = evaluation_with(vec![boot]);

    let net = evaluation.fixpoint(None).unwrap();
    assert_eq!(net.insert, vec![Triple::new("app", "boots", 1)]);

    // Somebody else resets the fact; the block must not put it back.
    let net = evaluation
        .execute_actions(vec![Action::erase("session", "app", "boots")])
        .unwrap();
    assert_eq!(net.remove, vec![Triple::new("app", "boots", 1)]);
    assert!(net.insert.is_empty());
    assert!(evaluation
        .database("session")
        .unwrap()
        .blocks()
        .iter()
        .all(|b| b.dormant));
}

#[test]
fn test_closed_evaluation_refuses_work() {
    let mut evaluation = evaluation_with(vec![click_block()]);
    evaluation.close().unwrap();

    assert_eq!(evaluation.state(), EvaluationState::Closed);
    assert!(matches!(evaluation.fixpoint(None), Err(EvalError::Closed)));
    assert!(matches!(
        evaluation.execute_actions(vec![Action::add("event", "e1", "tag", "click")]),
        Err(EvalError::Closed)
    ));
    assert!(matches!(evaluation.create_changes(), Err(EvalError::Closed)));
    assert!(matches!(evaluation.save("session"), Err(EvalError::Closed)));
    assert!(matches!(evaluation.close(), Err(EvalError::Closed)));
}

#[test]
fn test_unknown_database_rejects_batch() {
    let mut evaluation = evaluation_with(vec![]);
    let result = evaluation.execute_actions(vec![
        Action::add("session", "e", "x", 1),
        Action::add("nowhere", "e", "x", 1),
    ]);
    assert!(matches!(result, Err(EvalError::UnknownDatabase(name)) if name == "nowhere"));
    assert!(evaluation.save("session").unwrap().is_empty());
    assert_eq!(evaluation.state(), EvaluationState::Running);
}

#[test]
fn test_persist_keeps_minted_identity() {
    let cells = |label: &str| {
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
    let mut evaluation = evaluation_with(vec![cells("hello")]);
    evaluation
        .execute_actions(vec![Action::add("session", "r1", "tag", "row")])
        .unwrap();
    let before = evaluation.scan(Some("session"), None, Some(&Attribute::new("text")), None);
    assert_eq!(before.len(), 1);

    let mut next = BlockArena::from_blocks([cells("goodbye")]);
    let mut changes = evaluation.create_changes().unwrap();
    let diff = evaluation
        .update_binds("session", &mut next, &mut changes)
        .unwrap();
    assert_eq!(diff.retained.len(), 1);
    evaluation.replace_blocks("session", next).unwrap();
    evaluation.fixpoint(Some(changes)).unwrap();

    let after = evaluation.scan(Some("session"), None, Some(&Attribute::new("text")), None);
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].e, before[0].e);
    assert_eq!(after[0].v, Value::from("goodbye"));
    // Facts nobody derived survive the swap.
    assert!(evaluation
        .save("session")
        .unwrap()
        .contains(&Triple::new("r1", "tag", "row")));
}

#[test]
fn test_retired_block_retracts_output() {
    let label = Block::new("label", "label").with_pattern(Pattern::new(
        Term::var("r"),
        Term::constant("tag"),
        Term::constant("row"),
    ))
    .with_bind(ActionTemplate::add(
        Term::var("r"),
        Term::constant("label"),
        Term::constant("x"),
    ));
    let mut evaluation = evaluation_with(vec![label]);
    evaluation
        .execute_actions(vec![Action::add("session", "r1", "tag", "row")])
        .unwrap();

    let mut next = BlockArena::new();
    let mut changes = evaluation.create_changes().unwrap();
    let diff = evaluation
        .update_binds("session", &mut next, &mut changes)
        .unwrap();
    assert_eq!(diff.retired.len(), 1);
    evaluation.replace_blocks("session", next).unwrap();
    let net = evaluation.fixpoint(Some(changes)).unwrap();

    assert_eq!(net.remove, vec![Triple::new("r1", "label", "x")]);
    assert_eq!(
        evaluation.save("session").unwrap(),
        vec![Triple::new("r1", "tag", "row")]
    );
}

#[test]
fn test_load_replaces_content_without_rerunning_single_run() {
    let boot = Block::new("boot", "boot")
        .with_commit(ActionTemplate::add(
            Term::constant("app"),
            Term::constant("booted"),
            Term::constant(true),
        ))
        .run_once();
    let mut evaluation = evaluation_with(vec![boot]);

    let snapshot = [(
        "session".to_string(),
        vec![Triple::new("doc", "title", "saved")],
    )]
    .into_iter()
    .collect();
    let net = evaluation.load(snapshot).unwrap();

    assert_eq!(net.insert, vec![Triple::new("doc", "title", "saved")]);
    assert_eq!(
        evaluation.save("session").unwrap(),
        vec![Triple::new("doc", "title", "saved")]
    );
}

#[test]
fn test_metrics_count_rounds_and_blocks() {
    let mut evaluation = evaluation_with(vec![click_block()]);
    evaluation
        .execute_actions(vec![Action::add("event", "e1", "tag", "click")])
        .unwrap();

    let snapshot = evaluation.metrics().snapshot();
    assert_eq!(snapshot.fixpoints, 1);
    assert_eq!(snapshot.rounds, 2);
    assert_eq!(snapshot.blocks.len(), 1);
    assert_eq!(snapshot.blocks[0].block, "clicks");
    assert!(snapshot.blocks[0].user);
    assert_eq!(snapshot.blocks[0].executions, 2);
}

fn tag_binds_class(key: &str, tag: &str) -> Block {
    Block::new(key, key)
        .with_pattern(Pattern::new(
            Term::var("r"),
            Term::constant("tag"),
            Term::constant(tag),
        ))
        .with_bind(ActionTemplate::add(
            Term::var("r"),
            Term::constant("class"),
            Term::constant("active"),
        ))
}

#[test]
fn test_lost_support_keeps_asserted_fact() {
    let mut evaluation = evaluation_with(vec![tag_binds_class("rows", "row")]);
    evaluation
        .execute_actions(vec![Action::add("session", "r1", "class", "active")])
        .unwrap();

    evaluation
        .execute_actions(vec![Action::add("session", "r1", "tag", "row")])
        .unwrap();
    let net = evaluation
        .execute_actions(vec![Action::remove("session", "r1", "tag", "row")])
        .unwrap();

    assert_eq!(net.remove, vec![Triple::new("r1", "tag", "row")]);
    assert_eq!(
        evaluation.save("session").unwrap(),
        vec![Triple::new("r1", "class", "active")]
    );
}

#[test]
fn test_shared_derivation_survives_until_last_supporter() {
    let mut evaluation = evaluation_with(vec![
        tag_binds_class("rows", "row"),
        tag_binds_class("items", "item"),
    ]);
    evaluation
        .execute_actions(vec![
            Action::add("session", "r1", "tag", "row"),
            Action::add("session", "r1", "tag", "item"),
        ])
        .unwrap();

    let net = evaluation
        .execute_actions(vec![Action::remove("session", "r1", "tag", "row")])
        .unwrap();
    assert_eq!(net.remove, vec![Triple::new("r1", "tag", "row")]);
    assert!(evaluation
        .save("session")
        .unwrap()
        .contains(&Triple::new("r1", "class", "active")));

    let net = evaluation
        .execute_actions(vec![Action::remove("session", "r1", "tag", "item")])
        .unwrap()
        .normalized();
    assert_eq!(
        net.remove,
        vec![
            Triple::new("r1", "class", "active"),
            Triple::new("r1", "tag", "item"),
        ]
    );
    assert!(evaluation.save("session").unwrap().is_empty());
}

#[test]
fn test_failed_round_is_reported_and_retried() {
    let mirror = Block::new("mirror", "mirror clicks")
        .with_pattern(
            Pattern::new(Term::var("e"), Term::constant("tag"), Term::constant("click"))
                .in_scope("event"),
        )
        .with_commit(
            ActionTemplate::add(Term::var("e"), Term::constant("seen"), Term::constant(true))
                .in_db("view"),
        );
    let mut evaluation = evaluation_with(vec![mirror]);
    let results = collect_results(&mut evaluation);

    let first = evaluation.execute_actions(vec![Action::add("event", "e1", "tag", "click")]);
    assert!(matches!(first, Err(EvalError::UnknownDatabase(name)) if name == "view"));
    assert!(results.lock().is_empty());
    assert_eq!(evaluation.state(), EvaluationState::Running);

    // The block did not keep the failed round, so it tries again.
    assert!(matches!(
        evaluation.fixpoint(None),
        Err(EvalError::UnknownDatabase(_))
    ));

    evaluation
        .register_database(Database::new("view", DatabaseKind::View))
        .unwrap();
    let net = evaluation.fixpoint(None).unwrap().normalized();
    assert_eq!(
        net.insert,
        vec![
            Triple::new("e1", "seen", true),
            Triple::new("e1", "tag", "click"),
        ]
    );
    assert_eq!(results.lock().len(), 1);
    assert_eq!(
        evaluation.save("view").unwrap(),
        vec![Triple::new("e1", "seen", true)]
    );
}
