//! CouchDB document layout.
//!
//! Every record lives in one database and is addressed by a typed document id:
//!
//! - `session::{session}`
//! - `participant::{session}::{participant}`
//! - `move::{session}::{move}`
//! - `evaluation::{session}::{move}::{evaluator}`
//! - `vote::{session}::{move}::{voter}`
//!
//! Evaluation and vote ids are derived from the unique pair, so CouchDB itself rejects a
//! duplicate with `409 Conflict`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dao::models::{ChangeEvent, ChangeKind, Table};

pub const SEPARATOR: &str = "::";
pub const END_SUFFIX: &str = "\u{ffff}";

const SESSION_PREFIX: &str = "session";
const PARTICIPANT_PREFIX: &str = "participant";
const MOVE_PREFIX: &str = "move";
const EVALUATION_PREFIX: &str = "evaluation";
const VOTE_PREFIX: &str = "vote";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    pub results: Vec<ChangeRow>,
    pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    pub id: String,
    #[serde(default)]
    pub changes: Vec<ChangeRevision>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRevision {
    pub rev: String,
}

/// Envelope adding CouchDB's `_id`/`_rev` to an entity body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDocument<T> {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> CouchDocument<T> {
    /// Wrap a body that has never been stored.
    pub fn fresh(id: String, body: T) -> Self {
        Self {
            id,
            rev: None,
            body,
        }
    }
}

pub fn session_doc_id(session_id: &str) -> String {
    format!("{SESSION_PREFIX}{SEPARATOR}{session_id}")
}

pub fn participant_prefix(session_id: &str) -> String {
    format!("{PARTICIPANT_PREFIX}{SEPARATOR}{session_id}{SEPARATOR}")
}

pub fn participant_doc_id(session_id: &str, id: Uuid) -> String {
    format!("{}{id}", participant_prefix(session_id))
}

pub fn move_prefix(session_id: &str) -> String {
    format!("{MOVE_PREFIX}{SEPARATOR}{session_id}{SEPARATOR}")
}

pub fn move_doc_id(session_id: &str, id: Uuid) -> String {
    format!("{}{id}", move_prefix(session_id))
}

pub fn evaluation_prefix(session_id: &str) -> String {
    format!("{EVALUATION_PREFIX}{SEPARATOR}{session_id}{SEPARATOR}")
}

pub fn evaluation_doc_id(session_id: &str, move_id: Uuid, evaluator_id: Uuid) -> String {
    format!(
        "{}{move_id}{SEPARATOR}{evaluator_id}",
        evaluation_prefix(session_id)
    )
}

pub fn vote_prefix(session_id: &str, move_id: Uuid) -> String {
    format!("{VOTE_PREFIX}{SEPARATOR}{session_id}{SEPARATOR}{move_id}{SEPARATOR}")
}

pub fn vote_doc_id(session_id: &str, move_id: Uuid, voter_id: Uuid) -> String {
    format!("{}{voter_id}", vote_prefix(session_id, move_id))
}

/// Render a `_changes` sequence token back into the `since` query parameter.
pub fn seq_param(seq: &Value) -> String {
    match seq {
        Value::String(token) => token.clone(),
        other => other.to_string(),
    }
}

/// Translate a `_changes` row into a notification when it belongs to `session_id`.
pub fn change_event(row: &ChangeRow, session_id: &str) -> Option<ChangeEvent> {
    if row.deleted {
        return None;
    }

    let mut parts = row.id.split(SEPARATOR);
    let table = match parts.next()? {
        SESSION_PREFIX => Table::Sessions,
        PARTICIPANT_PREFIX => Table::Participants,
        MOVE_PREFIX => Table::Moves,
        EVALUATION_PREFIX => Table::Evaluations,
        VOTE_PREFIX => Table::Votes,
        _ => return None,
    };
    if parts.next()? != session_id {
        return None;
    }

    // First revisions are numbered `1-…`; anything later is an update.
    let kind = match row.changes.first() {
        Some(change) if change.rev.starts_with("1-") => ChangeKind::Insert,
        _ => ChangeKind::Update,
    };

    Some(ChangeEvent {
        table,
        kind,
        session_id: session_id.to_string(),
        key: row.id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, rev: &str) -> ChangeRow {
        ChangeRow {
            id: id.to_string(),
            changes: vec![ChangeRevision {
                rev: rev.to_string(),
            }],
            deleted: false,
        }
    }

    #[test]
    fn pair_ids_are_deterministic() {
        let move_id = Uuid::new_v4();
        let evaluator = Uuid::new_v4();
        assert_eq!(
            evaluation_doc_id("ROOM01", move_id, evaluator),
            evaluation_doc_id("ROOM01", move_id, evaluator)
        );
        assert!(vote_doc_id("ROOM01", move_id, evaluator).starts_with(&vote_prefix("ROOM01", move_id)));
    }

    #[test]
    fn change_rows_map_to_tables() {
        let move_id = Uuid::new_v4();
        let event = change_event(&row(&move_doc_id("ROOM01", move_id), "1-abc"), "ROOM01")
            .unwrap();
        assert_eq!(event.table, Table::Moves);
        assert_eq!(event.kind, ChangeKind::Insert);

        let event = change_event(&row(&session_doc_id("ROOM01"), "4-def"), "ROOM01").unwrap();
        assert_eq!(event.table, Table::Sessions);
        assert_eq!(event.kind, ChangeKind::Update);
    }

    #[test]
    fn change_rows_of_other_sessions_are_ignored() {
        let id = participant_doc_id("OTHER1", Uuid::new_v4());
        assert!(change_event(&row(&id, "1-abc"), "ROOM01").is_none());
        assert!(change_event(&row("_design/app", "1-abc"), "ROOM01").is_none());
    }

    #[test]
    fn numeric_and_string_sequences_render_as_params() {
        assert_eq!(seq_param(&Value::from(42)), "42");
        assert_eq!(seq_param(&Value::from("12-g1AAAA")), "12-g1AAAA");
    }
}
