// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The uniform change-stream envelope and DML tuple model.
//!
//! Receive wraps every raw plugin message into an [`Envelope`] and appends
//! it as one line of JSON to the current segment file. Transform parses the
//! raw payload back out with a plugin decoder and renders SQL; the envelope
//! itself never needs plugin-specific interpretation.

use crate::lsn::Lsn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message kind, serialized as its single-character wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamAction {
    Begin,
    Commit,
    Insert,
    Update,
    Delete,
    Truncate,
    /// Logical decoding message (`pg_logical_emit_message`).
    Message,
    /// Synthetic marker inserted when a WAL segment boundary is crossed.
    SwitchWal,
    Keepalive,
}

impl StreamAction {
    pub fn code(self) -> char {
        match self {
            StreamAction::Begin => 'B',
            StreamAction::Commit => 'C',
            StreamAction::Insert => 'I',
            StreamAction::Update => 'U',
            StreamAction::Delete => 'D',
            StreamAction::Truncate => 'T',
            StreamAction::Message => 'M',
            StreamAction::SwitchWal => 'X',
            StreamAction::Keepalive => 'K',
        }
    }

    pub fn from_code(c: char) -> Option<Self> {
        Some(match c {
            'B' => StreamAction::Begin,
            'C' => StreamAction::Commit,
            'I' => StreamAction::Insert,
            'U' => StreamAction::Update,
            'D' => StreamAction::Delete,
            'T' => StreamAction::Truncate,
            'M' => StreamAction::Message,
            'X' => StreamAction::SwitchWal,
            'K' => StreamAction::Keepalive,
            _ => return None,
        })
    }

    pub fn is_dml(self) -> bool {
        matches!(
            self,
            StreamAction::Insert
                | StreamAction::Update
                | StreamAction::Delete
                | StreamAction::Truncate
        )
    }
}

impl fmt::Display for StreamAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for StreamAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code().to_string())
    }
}

impl<'de> Deserialize<'de> for StreamAction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut chars = s.chars();
        match (chars.next().and_then(StreamAction::from_code), chars.next()) {
            (Some(action), None) => Ok(action),
            _ => Err(serde::de::Error::custom(format!("invalid action {s:?}"))),
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One line of the received change stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: StreamAction,
    /// Transaction id, present on BEGIN/COMMIT only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xid: Option<u32>,
    pub lsn: Lsn,
    #[serde(
        rename = "commitLsn",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub commit_lsn: Option<Lsn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Raw plugin payload, or null for synthetic messages.
    pub message: Option<serde_json::Value>,
    /// Set on messages targeting pgferry's own metadata schema; such
    /// envelopes are never turned into SQL.
    #[serde(rename = "filterOut", default, skip_serializing_if = "is_false")]
    pub filter_out: bool,
}

impl Envelope {
    /// A synthetic segment-boundary marker for the start of a new file.
    pub fn switch_wal(lsn: Lsn) -> Self {
        Envelope {
            action: StreamAction::SwitchWal,
            xid: None,
            lsn,
            commit_lsn: None,
            timestamp: None,
            message: None,
            filter_out: false,
        }
    }

    /// A synthetic keepalive carrying the source clock.
    pub fn keepalive(lsn: Lsn, timestamp: impl Into<String>) -> Self {
        Envelope {
            action: StreamAction::Keepalive,
            xid: None,
            lsn,
            commit_lsn: None,
            timestamp: Some(timestamp.into()),
            message: None,
            filter_out: false,
        }
    }
}

/// One decoded column value.
///
/// `is_quoted` values hold the unescaped text and are re-quoted when SQL is
/// rendered; raw values (numbers, bit strings, NULL-free tokens) pass
/// through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_oid: Option<u32>,
    pub is_null: bool,
    pub is_quoted: bool,
    pub str: String,
}

impl TupleValue {
    pub fn null(type_oid: Option<u32>) -> Self {
        TupleValue {
            type_oid,
            is_null: true,
            is_quoted: false,
            str: String::new(),
        }
    }

    pub fn quoted(type_oid: Option<u32>, unescaped: impl Into<String>) -> Self {
        TupleValue {
            type_oid,
            is_null: false,
            is_quoted: true,
            str: unescaped.into(),
        }
    }

    pub fn raw(type_oid: Option<u32>, token: impl Into<String>) -> Self {
        TupleValue {
            type_oid,
            is_null: false,
            is_quoted: false,
            str: token.into(),
        }
    }
}

/// Column names and values, in plugin output order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tuple {
    pub columns: Vec<String>,
    pub values: Vec<TupleValue>,
}

impl Tuple {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn push(&mut self, column: impl Into<String>, value: TupleValue) {
        self.columns.push(column.into());
        self.values.push(value);
    }
}

/// A decoded DML statement, ready for SQL rendering.
///
/// INSERT carries `new_tuple`; DELETE carries `old_tuple`; UPDATE carries
/// both (old = key columns for the WHERE clause, new = SET columns);
/// TRUNCATE carries neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmlMessage {
    pub nspname: String,
    pub relname: String,
    pub action: StreamAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_tuple: Option<Tuple>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tuple: Option<Tuple>,
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
