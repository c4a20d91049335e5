//! Error types for rolecheck

use crate::allowance::LedgerError;
use crate::condition::{IntegrityError, PackError};
use crate::evaluator::Violation;
use crate::primitives::HexError;
use crate::rbac::CheckError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Packed tree error: {0}")]
    Pack(#[from] PackError),

    #[error("Permission denied: {0}")]
    Violation(#[from] Violation),

    #[error("Allowance error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Check error: {0}")]
    Check(#[from] CheckError),

    #[error("Hex error: {0}")]
    Hex(#[from] HexError),

    #[error("Hex error: {0}")]
    FromHex(#[from] hex::FromHexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
