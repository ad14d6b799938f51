//! Core type definitions for pinstate.

use std::fmt;

/// Identifier of an in-flight transaction.
///
/// Derived from the clock in microseconds and forced strictly increasing
/// within one engine, so it is unique enough to name archive directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TxId(pub u64);

impl TxId {
    /// Creates a transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 64-bit FNV-1a hash of a manifest's canonical encoding.
///
/// Displays as 16 lowercase hex digits, the form used in archive
/// directory names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ManifestHash(pub u64);

impl ManifestHash {
    /// Wraps a raw hash value.
    #[must_use]
    pub const fn new(hash: u64) -> Self {
        Self(hash)
    }

    /// Returns the raw hash value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ManifestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Kind of installable content a manifest entry or artifact refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContentType {
    /// Wildcard: matches any stored type when verifying.
    Any,
    /// Engine build.
    Engine,
    /// Game build.
    Game,
    /// Content pack.
    Pack,
    /// Mod.
    Mod,
    /// Runtime component.
    Runtime,
    /// A type code this build does not know.
    Unknown(u32),
}

impl ContentType {
    /// Converts a wire value to a content type.
    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Any,
            1 => Self::Engine,
            2 => Self::Game,
            3 => Self::Pack,
            4 => Self::Mod,
            5 => Self::Runtime,
            other => Self::Unknown(other),
        }
    }

    /// Converts the content type to its wire value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Any => 0,
            Self::Engine => 1,
            Self::Game => 2,
            Self::Pack => 3,
            Self::Mod => 4,
            Self::Runtime => 5,
            Self::Unknown(other) => other,
        }
    }

    /// Returns true for the verification wildcard.
    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("ANY"),
            Self::Engine => f.write_str("ENGINE"),
            Self::Game => f.write_str("GAME"),
            Self::Pack => f.write_str("PACK"),
            Self::Mod => f.write_str("MOD"),
            Self::Runtime => f.write_str("RUNTIME"),
            Self::Unknown(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}
