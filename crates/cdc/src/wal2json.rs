// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decoder for the JSON output plugin (format version 2: one JSON
//! document per change).

use crate::decoder::{DecodeError, PkeyLookup, PluginDecoder};
use pgferry_core::{DmlMessage, Envelope, StreamAction, Tuple, TupleValue};
use pgferry_pgsql::{RawChange, SENTINEL_SCHEMA};
use serde_json::Value;

pub struct Wal2jsonDecoder;

impl Wal2jsonDecoder {
    fn action_of(document: &Value) -> Option<StreamAction> {
        let code = document.get("action")?.as_str()?;
        let mut chars = code.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => StreamAction::from_code(c),
            _ => None,
        }
    }
}

impl PluginDecoder for Wal2jsonDecoder {
    fn name(&self) -> &'static str {
        "wal2json"
    }

    fn slot_options(&self) -> Vec<(String, String)> {
        vec![
            ("format-version".to_string(), "2".to_string()),
            ("include-xids".to_string(), "1".to_string()),
            ("include-timestamp".to_string(), "1".to_string()),
        ]
    }

    fn parse_envelope(&self, change: &RawChange) -> Result<Envelope, DecodeError> {
        let document: Value = serde_json::from_str(&change.data)
            .map_err(|_| DecodeError::Unrecognized(change.data.clone()))?;
        let action = Self::action_of(&document)
            .ok_or_else(|| DecodeError::Unrecognized(change.data.clone()))?;

        let xid = match action {
            StreamAction::Begin | StreamAction::Commit => document
                .get("xid")
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .or(change.xid),
            _ => None,
        };
        let timestamp = document
            .get("timestamp")
            .and_then(Value::as_str)
            .map(str::to_string);
        let filter_out = document.get("schema").and_then(Value::as_str) == Some(SENTINEL_SCHEMA);

        Ok(Envelope {
            action,
            xid,
            lsn: change.lsn,
            commit_lsn: (action == StreamAction::Commit).then_some(change.lsn),
            timestamp,
            message: Some(document),
            filter_out,
        })
    }

    fn parse_dml(
        &self,
        envelope: &Envelope,
        _pkeys: &dyn PkeyLookup,
    ) -> Result<DmlMessage, DecodeError> {
        let document = envelope
            .message
            .as_ref()
            .ok_or_else(|| DecodeError::Malformed {
                what: "message payload",
                input: String::new(),
            })?;
        let field = |name: &'static str| -> Result<String, DecodeError> {
            document
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(DecodeError::Malformed {
                    what: name,
                    input: document.to_string(),
                })
        };

        let mut message = DmlMessage {
            nspname: field("schema")?,
            relname: field("table")?,
            action: envelope.action,
            old_tuple: None,
            new_tuple: None,
        };

        let columns = document.get("columns").map(parse_tuple).transpose()?;
        let identity = document.get("identity").map(parse_tuple).transpose()?;

        match envelope.action {
            StreamAction::Insert => {
                message.new_tuple = Some(columns.ok_or(DecodeError::Malformed {
                    what: "columns",
                    input: document.to_string(),
                })?);
            }
            StreamAction::Delete => {
                message.old_tuple = Some(identity.ok_or(DecodeError::Malformed {
                    what: "identity",
                    input: document.to_string(),
                })?);
            }
            StreamAction::Update => {
                let new_tuple = columns.ok_or(DecodeError::Malformed {
                    what: "columns",
                    input: document.to_string(),
                })?;
                let old_tuple = identity
                    .ok_or_else(|| DecodeError::UpdateWithoutKey(document.to_string()))?;
                if old_tuple.is_empty() || new_tuple.is_empty() {
                    return Err(DecodeError::UpdateWithoutKey(document.to_string()));
                }
                message.old_tuple = Some(old_tuple);
                message.new_tuple = Some(new_tuple);
            }
            StreamAction::Truncate => {}
            _ => {
                return Err(DecodeError::Malformed {
                    what: "DML action",
                    input: document.to_string(),
                })
            }
        }
        Ok(message)
    }
}

/// Convert a wal2json column array into a tuple.
fn parse_tuple(columns: &Value) -> Result<Tuple, DecodeError> {
    let array = columns.as_array().ok_or_else(|| DecodeError::Malformed {
        what: "column array",
        input: columns.to_string(),
    })?;
    let mut tuple = Tuple::default();
    for column in array {
        let name = column
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::Malformed {
                what: "column name",
                input: column.to_string(),
            })?;
        let value = match column.get("value") {
            None | Some(Value::Null) => TupleValue::null(None),
            Some(Value::String(text)) => TupleValue::quoted(None, text.clone()),
            Some(Value::Bool(b)) => TupleValue::raw(None, b.to_string()),
            Some(Value::Number(n)) => TupleValue::raw(None, n.to_string()),
            // Nested json values travel as their serialized text.
            Some(other) => TupleValue::quoted(None, other.to_string()),
        };
        tuple.push(name, value);
    }
    Ok(tuple)
}

#[cfg(test)]
#[path = "wal2json_tests.rs"]
mod tests;
