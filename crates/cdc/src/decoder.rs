// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output-plugin decoding capability.
//!
//! Two plugins are supported with identical envelope semantics; the
//! receive and transform stages are polymorphic over this trait and never
//! look inside a raw payload themselves.

use pgferry_core::{DmlMessage, Envelope};
use pgferry_pgsql::RawChange;
use pgferry_store::CatalogStore;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unrecognized plugin message: {0}")]
    Unrecognized(String),
    #[error("malformed {what} in {input:?}")]
    Malformed { what: &'static str, input: String },
    #[error("update without key: {0}")]
    UpdateWithoutKey(String),
    #[error("unknown plugin {0:?}")]
    UnknownPlugin(String),
}

/// Primary-key lookup the text decoder needs to split UPDATE columns into
/// key and non-key tuples.
pub trait PkeyLookup: Send + Sync {
    fn pkey_attrs(&self, nspname: &str, relname: &str) -> Vec<String>;
}

impl PkeyLookup for CatalogStore {
    fn pkey_attrs(&self, nspname: &str, relname: &str) -> Vec<String> {
        CatalogStore::pkey_attrs(self, nspname, relname)
    }
}

/// A plugin-specific parser.
pub trait PluginDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// The options the slot is consumed with for this plugin.
    fn slot_options(&self) -> Vec<(String, String)>;

    /// Wrap one raw change into the uniform envelope.
    fn parse_envelope(&self, change: &RawChange) -> Result<Envelope, DecodeError>;

    /// Decode the DML payload carried by an envelope.
    fn parse_dml(
        &self,
        envelope: &Envelope,
        pkeys: &dyn PkeyLookup,
    ) -> Result<DmlMessage, DecodeError>;
}

/// Look up a decoder by plugin name.
pub fn decoder_for(plugin: &str) -> Result<Box<dyn PluginDecoder>, DecodeError> {
    match plugin {
        "test_decoding" => Ok(Box::new(crate::test_decoding::TestDecodingDecoder)),
        "wal2json" => Ok(Box::new(crate::wal2json::Wal2jsonDecoder)),
        other => Err(DecodeError::UnknownPlugin(other.to_string())),
    }
}
