//! Wire types for the hot-reload WebSocket protocol.
//!
//! Every update cycle a client observes is either the complete
//! `update-start` → `update` → `update-done` triple or a single `error`
//! frame; the serializing side (the dev server) never interleaves cycles on
//! one socket. `UpdateBody` keeps `added`/`modified`/`deleted` as plain
//! vectors so an empty set still serializes as `[]` — clients index into
//! these fields unconditionally.

use serde::{Deserialize, Serialize};

/// Messages the server receives from clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    RegisterEntrypoints {
        #[serde(rename = "entryPoints", default)]
        entry_points: Vec<String>,
    },
    Log {
        #[serde(default)]
        level: Option<String>,
        #[serde(default)]
        data: Option<serde_json::Value>,
    },
    LogOptIn {
        #[serde(default)]
        include: Option<bool>,
    },
}

/// Messages the server pushes to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Acknowledges `register-entrypoints`.
    BundleRegistered,
    UpdateStart {
        body: UpdateStartBody,
    },
    Update {
        body: UpdateBody,
    },
    UpdateDone,
    Error {
        body: ErrorBody,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateStartBody {
    #[serde(rename = "isInitialUpdate")]
    pub is_initial_update: bool,
}

/// One added or modified module: its id paired with the full define-call
/// text (including the trailing `sourceMappingURL`/`sourceURL` comments).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HmrModule {
    pub module: (u32, String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateBody {
    #[serde(rename = "revisionId")]
    pub revision_id: String,
    #[serde(rename = "isInitialUpdate")]
    pub is_initial_update: bool,
    pub added: Vec<HmrModule>,
    pub modified: Vec<HmrModule>,
    /// Deleted modules are reported as bare ids.
    pub deleted: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse_from_the_wire() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"register-entrypoints","entryPoints":["http://localhost:8081/index.bundle"]}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::RegisterEntrypoints {
                entry_points: vec!["http://localhost:8081/index.bundle".to_string()]
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"log","level":"info","data":["hi"]}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Log { .. }));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"log-opt-in"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::LogOptIn { include: None }));
    }

    #[test]
    fn update_cycle_messages_have_stable_shapes() {
        let start = ServerMessage::UpdateStart {
            body: UpdateStartBody {
                is_initial_update: false,
            },
        };
        assert_eq!(
            serde_json::to_string(&start).unwrap(),
            r#"{"type":"update-start","body":{"isInitialUpdate":false}}"#
        );

        let done = ServerMessage::UpdateDone;
        assert_eq!(serde_json::to_string(&done).unwrap(), r#"{"type":"update-done"}"#);

        let registered = ServerMessage::BundleRegistered;
        assert_eq!(
            serde_json::to_string(&registered).unwrap(),
            r#"{"type":"bundle-registered"}"#
        );
    }

    #[test]
    fn empty_update_still_carries_arrays() {
        let update = ServerMessage::Update {
            body: UpdateBody {
                revision_id: "rev-00000001".to_string(),
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains(r#""added":[]"#));
        assert!(json.contains(r#""modified":[]"#));
        assert!(json.contains(r#""deleted":[]"#));
        assert!(json.contains(r#""revisionId":"rev-00000001""#));
    }

    #[test]
    fn modified_entries_pair_id_and_code() {
        let update = ServerMessage::Update {
            body: UpdateBody {
                revision_id: "rev-00000002".to_string(),
                is_initial_update: false,
                added: Vec::new(),
                modified: vec![HmrModule {
                    module: (3, "__d(function(){}, 3, [], \"leaf.js\");".to_string()),
                }],
                deleted: vec![7],
            },
        };
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains(r#""modified":[{"module":[3,"#));
        assert!(json.contains(r#""deleted":[7]"#));
    }

    #[test]
    fn error_frames_round_trip() {
        let error = ServerMessage::Error {
            body: ErrorBody {
                error_type: "TransformError".to_string(),
                message: "unexpected token".to_string(),
                stack: None,
            },
        };
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(!json.contains("stack"));
        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, error);
    }
}
