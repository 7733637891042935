//! Wire messages
//!
//! Peers exchange JSON objects discriminated by a `type` field. Inbound
//! messages decode into the closed [`Inbound`] enum; anything without a
//! `type`, or with a `type` this build does not know, is rejected with a
//! [`WireError`] so the caller can log and drop it.

use crate::diagnostics::{ExtraInfo, SourceSpan};
use crate::diff::Diff;
use crate::eav::Triple;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Inbound message types understood by this build
pub const INBOUND_TYPES: &[&str] = &[
    "event",
    "parse",
    "eval",
    "close",
    "dumpState",
    "load",
    "findPerformance",
];

#[derive(Debug, Error)]
pub enum WireError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Message has no type field")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Malformed {kind} message: {reason}")]
    Malformed { kind: String, reason: String },
}

pub type Result<T> = std::result::Result<T, WireError>;

/// Saved database content carried by `load`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub databases: BTreeMap<String, Vec<Triple>>,
}

/// Messages received from a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Inbound {
    /// Externally injected facts
    Event { insert: Vec<Triple> },

    /// New source text to parse (does not evaluate)
    Parse {
        #[serde(default)]
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generation: Option<u64>,
    },

    /// Evaluate the last parse, either keeping session state or starting fresh
    Eval {
        #[serde(default)]
        persist: bool,
    },

    Close,

    DumpState,

    Load { info: LoadInfo },

    #[serde(rename_all = "camelCase")]
    FindPerformance {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<serde_json::Value>,
    },
}

impl Inbound {
    /// Decode one inbound JSON message.
    pub fn decode(json: &str) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_str(json)?;
        let kind = match raw.get("type") {
            Some(serde_json::Value::String(kind)) => kind.clone(),
            Some(other) => return Err(WireError::UnknownType(other.to_string())),
            None => return Err(WireError::MissingType),
        };
        if !INBOUND_TYPES.contains(&kind.as_str()) {
            return Err(WireError::UnknownType(kind));
        }
        serde_json::from_value(raw).map_err(|e| WireError::Malformed {
            kind,
            reason: e.to_string(),
        })
    }

    /// The wire name of this message
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Event { .. } => "event",
            Inbound::Parse { .. } => "parse",
            Inbound::Eval { .. } => "eval",
            Inbound::Close => "close",
            Inbound::DumpState => "dumpState",
            Inbound::Load { .. } => "load",
            Inbound::FindPerformance { .. } => "findPerformance",
        }
    }
}

/// Timing for one block in a performance report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTiming {
    pub block: String,
    pub user: bool,
    pub executions: u64,
    pub total_ns: u64,
}

/// Messages sent to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    /// One settled diff for a mirroring store
    Result {
        insert: Vec<Triple>,
        remove: Vec<Triple>,
    },

    #[serde(rename_all = "camelCase")]
    Parse {
        generation: Option<u64>,
        text: String,
        spans: Vec<SourceSpan>,
        extra_info: ExtraInfo,
    },

    Error { kind: String, message: String },

    #[serde(rename_all = "camelCase")]
    Comments {
        spans: Vec<SourceSpan>,
        extra_info: ExtraInfo,
    },

    DumpState { state: String },

    #[serde(rename_all = "camelCase")]
    Performance {
        request_id: Option<serde_json::Value>,
        fixpoints: u64,
        rounds: u64,
        blocks: Vec<BlockTiming>,
    },
}

impl Outbound {
    pub fn result(diff: &Diff) -> Self {
        Outbound::Result {
            insert: diff.insert.clone(),
            remove: diff.remove.clone(),
        }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Outbound::Error {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The diff carried by a `result` message
    pub fn as_diff(&self) -> Option<Diff> {
        match self {
            Outbound::Result { insert, remove } => {
                Some(Diff::from_parts(remove.clone(), insert.clone()))
            }
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_event() {
        let msg = Inbound::decode(r#"{"type":"event","insert":[["e1","tag","click"]]}"#).unwrap();
        assert_eq!(
            msg,
            Inbound::Event {
                insert: vec![Triple::new("e1", "tag", "click")]
            }
        );
        assert_eq!(msg.kind(), "event");
    }

    #[test]
    fn test_decode_eval_defaults() {
        let msg = Inbound::decode(r#"{"type":"eval"}"#).unwrap();
        assert_eq!(msg, Inbound::Eval { persist: false });
    }

    #[test]
    fn test_decode_camel_case_types() {
        assert_eq!(
            Inbound::decode(r#"{"type":"dumpState"}"#).unwrap(),
            Inbound::DumpState
        );
        let perf = Inbound::decode(r#"{"type":"findPerformance","requestId":7}"#).unwrap();
        assert_eq!(
            perf,
            Inbound::FindPerformance {
                request_id: Some(serde_json::json!(7))
            }
        );
    }

    #[test]
    fn test_decode_missing_type() {
        assert!(matches!(
            Inbound::decode(r#"{"insert":[]}"#),
            Err(WireError::MissingType)
        ));
        assert!(matches!(Inbound::decode("[1,2]"), Err(WireError::MissingType)));
    }

    #[test]
    fn test_decode_unknown_type() {
        match Inbound::decode(r#"{"type":"teleport"}"#) {
            Err(WireError::UnknownType(kind)) => assert_eq!(kind, "teleport"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed_event() {
        assert!(matches!(
            Inbound::decode(r#"{"type":"event","insert":[["e1"]]}"#),
            Err(WireError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decode_load() {
        let msg = Inbound::decode(
            r#"{"type":"load","info":{"code":"{}","databases":{"session":[["e","a",1]]}}}"#,
        )
        .unwrap();
        match msg {
            Inbound::Load { info } => {
                assert_eq!(info.code.as_deref(), Some("{}"));
                assert_eq!(info.databases["session"], vec![Triple::new("e", "a", 1)]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_encode_result() {
        let diff = Diff::from_parts(
            vec![Triple::new("e1", "x", 1)],
            vec![Triple::new("e1", "x", 2)],
        );
        insta::assert_snapshot!(
            Outbound::result(&diff).encode().unwrap(),
            @r#"{"type":"result","insert":[["e1","x",2]],"remove":[["e1","x",1]]}"#
        );
    }

    #[test]
    fn test_encode_error() {
        insta::assert_snapshot!(
            Outbound::error("diverged", "too many rounds").encode().unwrap(),
            @r#"{"type":"error","kind":"diverged","message":"too many rounds"}"#
        );
    }

    #[test]
    fn test_result_round_trips_to_diff() {
        let diff = Diff::from_parts(vec![], vec![Triple::new("e1", "handled", true)]);
        assert_eq!(Outbound::result(&diff).as_diff(), Some(diff));
    }
}
