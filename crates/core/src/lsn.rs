// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log sequence numbers.
//!
//! An LSN is a monotonic 64-bit position in the source's write-ahead log,
//! rendered as two 32-bit hex halves separated by a slash (`0/1A2B3C4D`).
//! Segment arithmetic here is what the CDC receive stage uses to rotate
//! per-segment files and synthesize `SWITCH WAL` markers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Timeline identifier reported by the source's control data.
pub type TimelineId = u32;

/// Error parsing an `X/X` LSN rendering.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid LSN {input:?}")]
pub struct LsnParseError {
    pub input: String,
}

/// A position in the source write-ahead log.
///
/// Serialized as its `X/X` text rendering so JSON files match what the
/// source itself prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    /// The number of the segment containing this LSN.
    pub fn segment_number(self, wal_segment_size: u64) -> u64 {
        self.0 / wal_segment_size
    }

    /// The first LSN of the segment containing this LSN.
    pub fn segment_start(self, wal_segment_size: u64) -> Lsn {
        Lsn(self.0 - self.0 % wal_segment_size)
    }

    /// True when `other` lives in a later segment than `self`.
    pub fn crosses_segment(self, other: Lsn, wal_segment_size: u64) -> bool {
        other.segment_number(wal_segment_size) > self.segment_number(wal_segment_size)
    }

    /// Contiguous 16-hex rendering used in file names, where the `X/X`
    /// form is not usable because of the slash.
    pub fn to_hex(self) -> String {
        format!("{:016X}", self.0)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = LsnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || LsnParseError {
            input: s.to_string(),
        };
        let (hi, lo) = s.split_once('/').ok_or_else(err)?;
        if hi.is_empty() || lo.is_empty() || hi.len() > 8 || lo.len() > 8 {
            return Err(err());
        }
        let hi = u64::from_str_radix(hi, 16).map_err(|_| err())?;
        let lo = u64::from_str_radix(lo, 16).map_err(|_| err())?;
        Ok(Lsn(hi << 32 | lo))
    }
}

impl From<u64> for Lsn {
    fn from(v: u64) -> Self {
        Lsn(v)
    }
}

impl From<Lsn> for u64 {
    fn from(lsn: Lsn) -> Self {
        lsn.0
    }
}

impl Serialize for Lsn {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Lsn {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "lsn_tests.rs"]
mod tests;
