//! Wire protocol behaviour seen from a peer

use settle_types::{Diff, Inbound, Outbound, Triple, Value, WireError};

#[test]
fn test_parse_message_carries_code_and_generation() {
    let msg = Inbound::decode(r#"{"type":"parse","code":"{\"blocks\":[]}","generation":3}"#)
        .unwrap();
    assert_eq!(
        msg,
        Inbound::Parse {
            code: r#"{"blocks":[]}"#.to_string(),
            generation: Some(3),
        }
    );
}

#[test]
fn test_persist_flag() {
    assert_eq!(
        Inbound::decode(r#"{"type":"eval","persist":true}"#).unwrap(),
        Inbound::Eval { persist: true }
    );
}

#[test]
fn test_event_values_keep_json_types() {
    let msg =
        Inbound::decode(r#"{"type":"event","insert":[["e","n",2.5],["e","ok",true],["e","s","x"]]}"#)
            .unwrap();
    let Inbound::Event { insert } = msg else {
        panic!("expected an event");
    };
    let values: Vec<Value> = insert.into_iter().map(|t| t.v).collect();
    assert_eq!(
        values,
        vec![Value::from(2.5), Value::from(true), Value::from("x")]
    );
}

#[test]
fn test_non_string_type_is_unknown() {
    assert!(matches!(
        Inbound::decode(r#"{"type":7}"#),
        Err(WireError::UnknownType(kind)) if kind == "7"
    ));
}

#[test]
fn test_triple_needs_three_parts() {
    let err = Inbound::decode(r#"{"type":"event","insert":[["e","a","v","extra"]]}"#).unwrap_err();
    assert!(matches!(err, WireError::Malformed { ref kind, .. } if kind == "event"));
}

#[test]
fn test_settled_diffs_fold_into_mirror_state() {
    // A peer folding consecutive results sees only the net change.
    let first = Outbound::result(&Diff::from_parts(vec![], vec![Triple::new("e", "x", 1)]));
    let second = Outbound::result(&Diff::from_parts(
        vec![Triple::new("e", "x", 1)],
        vec![Triple::new("e", "x", 2)],
    ));

    let mut net = Diff::new();
    for message in [first, second] {
        net.merge(message.as_diff().unwrap());
    }
    assert_eq!(net, Diff::from_parts(vec![], vec![Triple::new("e", "x", 2)]));
}

#[test]
fn test_performance_encoding() {
    let message = Outbound::Performance {
        request_id: Some(serde_json::json!("r1")),
        fixpoints: 2,
        rounds: 5,
        blocks: vec![],
    };
    insta::assert_snapshot!(
        message.encode().unwrap(),
        @r#"{"type":"performance","requestId":"r1","fixpoints":2,"rounds":5,"blocks":[]}"#
    );
}
