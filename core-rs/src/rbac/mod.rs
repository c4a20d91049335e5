//! Permission checking module
//!
//! Provides the orchestrator that clears operations against stored
//! condition trees and gates allowance commits on downstream success.

pub mod permission_checker;

pub use permission_checker::{CheckError, ExecutionError, Operation, PermissionChecker};
