// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQL text helpers shared by the schema pipeline, the clone workers, and
//! the CDC transform stage.

/// Quote an identifier the way the source would print it.
///
/// Plain lower-case identifiers pass through; anything else is wrapped in
/// double quotes with embedded quotes doubled.
pub fn quote_ident(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Quote a text literal with single-quote doubling.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Qualified `schema.name` with both sides quoted as needed.
pub fn qualified(nspname: &str, relname: &str) -> String {
    format!("{}.{}", quote_ident(nspname), quote_ident(relname))
}

#[cfg(test)]
#[path = "sqltext_tests.rs"]
mod tests;
