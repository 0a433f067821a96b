//! Log positions and positional scan markers
//!
//! `LogPosition` is the opaque, totally ordered checkpoint token for the
//! server's change log. Its textual form is the `HIGH/LOW` hexadecimal pair
//! used by the server (e.g. `0/16B3748`).
//!
//! `PositionMarker` addresses a row inside a table's physical layout as
//! `(page,tuple)` and orders snapshot output.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Log Position
// ============================================================================

/// A point in the server's change log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LogPosition(u64);

impl LogPosition {
    /// The lowest possible position
    pub const ZERO: LogPosition = LogPosition(0);

    /// Create from a raw 64-bit log address
    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    /// Raw 64-bit log address
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for LogPosition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |message: &str| Error::InvalidLogPosition {
            value: s.to_string(),
            message: message.to_string(),
        };

        let (high, low) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("expected format like '0/1949850'"))?;
        let high = u32::from_str_radix(high, 16).map_err(|_| invalid("invalid high word"))?;
        let low = u32::from_str_radix(low, 16).map_err(|_| invalid("invalid low word"))?;

        Ok(Self((u64::from(high) << 32) | u64::from(low)))
    }
}

impl Serialize for LogPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LogPosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Position Marker
// ============================================================================

/// Physical address of a row: page number and tuple index within the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionMarker {
    /// Page (block) number
    pub page: u64,
    /// Tuple index within the page
    pub tuple: u32,
}

impl PositionMarker {
    /// Create a new marker
    pub const fn new(page: u64, tuple: u32) -> Self {
        Self { page, tuple }
    }
}

impl fmt::Display for PositionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.page, self.tuple)
    }
}

impl FromStr for PositionMarker {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidMarker {
            value: s.to_string(),
        };

        let inner = s
            .trim()
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(invalid)?;
        let (page, tuple) = inner.split_once(',').ok_or_else(invalid)?;

        Ok(Self {
            page: page.trim().parse().map_err(|_| invalid())?,
            tuple: tuple.trim().parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for PositionMarker {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PositionMarker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
