// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decoder for the text output plugin.
//!
//! Payload shapes:
//!
//! ```text
//! BEGIN 529
//! table public.t: INSERT: id[integer]:3 v[text]:'c'
//! table public.t: UPDATE: old-key: id[integer]:1 new-tuple: id[integer]:1 v[text]:'x'
//! table public.t: DELETE: id[integer]:1
//! table public.t: TRUNCATE: (no flags)
//! COMMIT 529 (at 2026-01-01 00:00:00.000000+00)
//! ```
//!
//! Column values come in three shapes: single-quoted strings with doubled
//! single quotes, `B'...'` bit strings, and bare tokens ending at a space.
//! UPDATE messages without explicit `old-key:`/`new-tuple:` sections are
//! split along the table's primary key; an empty side after that split is
//! malformed.

use crate::decoder::{DecodeError, PkeyLookup, PluginDecoder};
use pgferry_core::{DmlMessage, Envelope, StreamAction, Tuple, TupleValue};
use pgferry_pgsql::{RawChange, SENTINEL_SCHEMA};

pub struct TestDecodingDecoder;

impl PluginDecoder for TestDecodingDecoder {
    fn name(&self) -> &'static str {
        "test_decoding"
    }

    fn slot_options(&self) -> Vec<(String, String)> {
        vec![
            ("include-xids".to_string(), "1".to_string()),
            ("include-timestamp".to_string(), "1".to_string()),
            ("skip-empty-xacts".to_string(), "1".to_string()),
        ]
    }

    fn parse_envelope(&self, change: &RawChange) -> Result<Envelope, DecodeError> {
        let data = change.data.as_str();
        let mut envelope = Envelope {
            action: StreamAction::Message,
            xid: change.xid,
            lsn: change.lsn,
            commit_lsn: None,
            timestamp: None,
            message: Some(serde_json::Value::String(data.to_string())),
            filter_out: false,
        };

        if let Some(rest) = data.strip_prefix("BEGIN ") {
            envelope.action = StreamAction::Begin;
            envelope.xid = parse_xid(rest)?;
            return Ok(envelope);
        }
        if let Some(rest) = data.strip_prefix("COMMIT ") {
            envelope.action = StreamAction::Commit;
            envelope.commit_lsn = Some(change.lsn);
            let (xid_part, timestamp) = match rest.split_once(" (at ") {
                Some((xid_part, ts)) => (xid_part, ts.strip_suffix(')').map(str::to_string)),
                None => (rest, None),
            };
            envelope.xid = parse_xid(xid_part)?;
            envelope.timestamp = timestamp;
            return Ok(envelope);
        }
        if data.starts_with("message: ") {
            envelope.action = StreamAction::Message;
            envelope.xid = None;
            return Ok(envelope);
        }
        if let Some((nspname, _, action, _)) = parse_table_header(data) {
            envelope.action = action;
            // The transaction id travels on BEGIN/COMMIT only.
            envelope.xid = None;
            envelope.filter_out = nspname == SENTINEL_SCHEMA;
            return Ok(envelope);
        }
        Err(DecodeError::Unrecognized(data.to_string()))
    }

    fn parse_dml(
        &self,
        envelope: &Envelope,
        pkeys: &dyn PkeyLookup,
    ) -> Result<DmlMessage, DecodeError> {
        let raw = envelope
            .message
            .as_ref()
            .and_then(|m| m.as_str())
            .ok_or_else(|| DecodeError::Malformed {
                what: "message payload",
                input: String::new(),
            })?;
        let (nspname, relname, action, rest) =
            parse_table_header(raw).ok_or_else(|| DecodeError::Unrecognized(raw.to_string()))?;

        let mut message = DmlMessage {
            nspname: nspname.clone(),
            relname: relname.clone(),
            action,
            old_tuple: None,
            new_tuple: None,
        };

        match action {
            StreamAction::Insert => {
                message.new_tuple = Some(parse_columns(rest)?);
            }
            StreamAction::Delete => {
                message.old_tuple = Some(parse_columns(rest)?);
            }
            StreamAction::Update => {
                let (old_tuple, new_tuple) = parse_update(rest, &nspname, &relname, pkeys)?;
                message.old_tuple = Some(old_tuple);
                message.new_tuple = Some(new_tuple);
            }
            StreamAction::Truncate => {}
            _ => {
                return Err(DecodeError::Malformed {
                    what: "DML action",
                    input: raw.to_string(),
                })
            }
        }
        Ok(message)
    }
}

fn parse_xid(text: &str) -> Result<Option<u32>, DecodeError> {
    text.trim()
        .parse()
        .map(Some)
        .map_err(|_| DecodeError::Malformed {
            what: "transaction id",
            input: text.to_string(),
        })
}

/// Split `table <nsp>.<rel>: <ACTION>: <rest>`.
fn parse_table_header(data: &str) -> Option<(String, String, StreamAction, &str)> {
    let after_table = data.strip_prefix("table ")?;
    for (word, action) in [
        ("INSERT", StreamAction::Insert),
        ("UPDATE", StreamAction::Update),
        ("DELETE", StreamAction::Delete),
        ("TRUNCATE", StreamAction::Truncate),
    ] {
        let marker = format!(": {word}:");
        if let Some(pos) = after_table.find(&marker) {
            let relation = &after_table[..pos];
            let rest = after_table[pos + marker.len()..].trim_start();
            let (nspname, relname) = split_qualified(relation)?;
            return Some((nspname, relname, action, rest));
        }
    }
    None
}

/// Split a possibly-quoted `schema.relation` pair, unquoting each side.
fn split_qualified(relation: &str) -> Option<(String, String)> {
    let (nspname, rest) = parse_ident(relation)?;
    let rest = rest.strip_prefix('.')?;
    let (relname, leftover) = parse_ident(rest)?;
    if !leftover.is_empty() {
        return None;
    }
    Some((nspname, relname))
}

/// Parse one identifier off the front, handling double-quote wrapping with
/// doubled-quote escapes.
fn parse_ident(text: &str) -> Option<(String, &str)> {
    if let Some(rest) = text.strip_prefix('"') {
        let mut name = String::new();
        let mut chars = rest.char_indices();
        while let Some((pos, c)) = chars.next() {
            if c != '"' {
                name.push(c);
                continue;
            }
            match chars.next() {
                Some((_, '"')) => name.push('"'),
                Some((next_pos, _)) => return Some((name, &rest[next_pos..])),
                None => return Some((name, &rest[pos + 1..])),
            }
        }
        None
    } else {
        let end = text.find('.').unwrap_or(text.len());
        Some((text[..end].to_string(), &text[end..]))
    }
}

/// Parse an UPDATE payload into (key tuple, set tuple).
fn parse_update(
    rest: &str,
    nspname: &str,
    relname: &str,
    pkeys: &dyn PkeyLookup,
) -> Result<(Tuple, Tuple), DecodeError> {
    if let Some(after_old) = rest.strip_prefix("old-key:") {
        let (old_part, new_part) =
            after_old
                .split_once("new-tuple:")
                .ok_or_else(|| DecodeError::Malformed {
                    what: "new-tuple section",
                    input: rest.to_string(),
                })?;
        let old_tuple = parse_columns(old_part.trim())?;
        let new_tuple = parse_columns(new_part.trim())?;
        if old_tuple.is_empty() || new_tuple.is_empty() {
            return Err(DecodeError::UpdateWithoutKey(rest.to_string()));
        }
        return Ok((old_tuple, new_tuple));
    }

    // No explicit sections: classify columns along the primary key.
    let all = parse_columns(rest)?;
    let key_names = pkeys.pkey_attrs(nspname, relname);
    let mut old_tuple = Tuple::default();
    let mut new_tuple = Tuple::default();
    for (column, value) in all.columns.into_iter().zip(all.values) {
        if key_names.contains(&column) {
            old_tuple.push(column, value);
        } else {
            new_tuple.push(column, value);
        }
    }
    if old_tuple.is_empty() || new_tuple.is_empty() {
        return Err(DecodeError::UpdateWithoutKey(rest.to_string()));
    }
    Ok((old_tuple, new_tuple))
}

/// Scan a `name[type]:value` column list.
fn parse_columns(text: &str) -> Result<Tuple, DecodeError> {
    let mut tuple = Tuple::default();
    let mut rest = text.trim();

    while !rest.is_empty() {
        let malformed = |what: &'static str| DecodeError::Malformed {
            what,
            input: text.to_string(),
        };

        // Column name, possibly quoted.
        let (name, after_name) = if rest.starts_with('"') {
            parse_ident(rest).ok_or_else(|| malformed("column name"))?
        } else {
            let end = rest.find('[').ok_or_else(|| malformed("column name"))?;
            (rest[..end].to_string(), &rest[end..])
        };

        // Type name in brackets, depth-tracked for array types.
        if !after_name.starts_with('[') {
            return Err(malformed("type name"));
        }
        let mut depth = 0usize;
        let mut close = None;
        for (pos, c) in after_name.char_indices() {
            match c {
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(pos);
                        break;
                    }
                }
                _ => {}
            }
        }
        let close = close.ok_or_else(|| malformed("type name"))?;
        let after_type = &after_name[close + 1..];
        let value_text = after_type
            .strip_prefix(':')
            .ok_or_else(|| malformed("column separator"))?;

        let (value, after_value) = parse_value(value_text, text)?;
        tuple.push(name, value);
        rest = after_value.trim_start();
    }
    Ok(tuple)
}

/// One value in one of the three shapes.
fn parse_value<'a>(text: &'a str, whole: &str) -> Result<(TupleValue, &'a str), DecodeError> {
    // Bit strings keep their B'...' prefix and pass through raw.
    if let Some(rest) = text.strip_prefix("B'") {
        let end = rest.find('\'').ok_or_else(|| DecodeError::Malformed {
            what: "bit string",
            input: whole.to_string(),
        })?;
        let token = format!("B'{}'", &rest[..end]);
        return Ok((TupleValue::raw(None, token), &rest[end + 1..]));
    }

    // Quoted strings unescape doubled single quotes.
    if let Some(rest) = text.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = rest.char_indices();
        while let Some((pos, c)) = chars.next() {
            if c != '\'' {
                value.push(c);
                continue;
            }
            match chars.next() {
                Some((_, '\'')) => value.push('\''),
                Some((next_pos, _)) => {
                    return Ok((TupleValue::quoted(None, value), &rest[next_pos..]))
                }
                None => return Ok((TupleValue::quoted(None, value), &rest[pos + 1..])),
            }
        }
        return Err(DecodeError::Malformed {
            what: "quoted value",
            input: whole.to_string(),
        });
    }

    // Bare token to the next space.
    let end = text.find(' ').unwrap_or(text.len());
    let token = &text[..end];
    let value = if token == "null" {
        TupleValue::null(None)
    } else {
        TupleValue::raw(None, token)
    };
    Ok((value, &text[end..]))
}

#[cfg(test)]
#[path = "test_decoding_tests.rs"]
mod tests;
