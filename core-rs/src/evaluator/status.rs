//! Evaluation status vocabulary
//!
//! Callers match on these names; they never change meaning.

use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    ParameterNotAllowed,
    ParameterLessThanAllowed,
    ParameterGreaterThanAllowed,
    ParameterNotAMatch,
    OrViolation,
    NorViolation,
    NoArrayElementPasses,
    NotEveryArrayElementPasses,
    ParameterNotSubsetOfAllowed,
    NoZippedElementPasses,
    NotEveryZippedElementPasses,
    ZippedArrayLengthMismatch,
    UnresolvedPluck,
    BitmaskOverflow,
    BitmaskNotAllowed,
    AllowanceExceeded,
    LeadingBytesNotAMatch,
    CalldataOutOfBounds,
}

impl Status {
    pub const ALL: [Status; 18] = [
        Status::ParameterNotAllowed,
        Status::ParameterLessThanAllowed,
        Status::ParameterGreaterThanAllowed,
        Status::ParameterNotAMatch,
        Status::OrViolation,
        Status::NorViolation,
        Status::NoArrayElementPasses,
        Status::NotEveryArrayElementPasses,
        Status::ParameterNotSubsetOfAllowed,
        Status::NoZippedElementPasses,
        Status::NotEveryZippedElementPasses,
        Status::ZippedArrayLengthMismatch,
        Status::UnresolvedPluck,
        Status::BitmaskOverflow,
        Status::BitmaskNotAllowed,
        Status::AllowanceExceeded,
        Status::LeadingBytesNotAMatch,
        Status::CalldataOutOfBounds,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Status::ParameterNotAllowed => "ParameterNotAllowed",
            Status::ParameterLessThanAllowed => "ParameterLessThanAllowed",
            Status::ParameterGreaterThanAllowed => "ParameterGreaterThanAllowed",
            Status::ParameterNotAMatch => "ParameterNotAMatch",
            Status::OrViolation => "OrViolation",
            Status::NorViolation => "NorViolation",
            Status::NoArrayElementPasses => "NoArrayElementPasses",
            Status::NotEveryArrayElementPasses => "NotEveryArrayElementPasses",
            Status::ParameterNotSubsetOfAllowed => "ParameterNotSubsetOfAllowed",
            Status::NoZippedElementPasses => "NoZippedElementPasses",
            Status::NotEveryZippedElementPasses => "NotEveryZippedElementPasses",
            Status::ZippedArrayLengthMismatch => "ZippedArrayLengthMismatch",
            Status::UnresolvedPluck => "UnresolvedPluck",
            Status::BitmaskOverflow => "BitmaskOverflow",
            Status::BitmaskNotAllowed => "BitmaskNotAllowed",
            Status::AllowanceExceeded => "AllowanceExceeded",
            Status::LeadingBytesNotAMatch => "LeadingBytesNotAMatch",
            Status::CalldataOutOfBounds => "CalldataOutOfBounds",
        }
    }

    /// Malformed input, never recovered by trying another branch
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Status::CalldataOutOfBounds)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A failed evaluation: what failed, where, and the offending value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{status} at node {index}")]
pub struct Violation {
    pub status: Status,
    pub index: usize,
    #[serde(
        serialize_with = "serialize_info",
        skip_serializing_if = "Option::is_none"
    )]
    pub info: Option<Vec<u8>>,
}

fn serialize_info<S: Serializer>(info: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match info {
        Some(bytes) => serializer.serialize_str(&crate::primitives::to_hex(bytes)),
        None => serializer.serialize_none(),
    }
}

impl Violation {
    pub fn new(status: Status, index: usize) -> Self {
        Violation {
            status,
            index,
            info: None,
        }
    }

    pub fn with_info(mut self, info: impl Into<Vec<u8>>) -> Self {
        self.info = Some(info.into());
        self
    }
}
