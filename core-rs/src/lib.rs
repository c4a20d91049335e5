//! # rolecheck - permission condition engine
//!
//! Decides whether one attempted operation (target, binary payload, value
//! transfer) satisfies a permission expressed as a tree of conditions, and
//! accounts for the rate-limited budgets ("allowances") the operation uses.
//!
//! ## Flow
//!
//! ```text
//!  configuration time            per operation
//! ┌──────────────────┐   ┌──────────────────────────────────────┐
//! │ Condition / nodes│   │ payload ─► decoder ◄─ evaluator      │
//! │        │         │   │                          │           │
//! │  integrity check │──►│ ConditionTree      Consumption intents│
//! │        │         │   │                          │           │
//! │ ConditionStore   │   │ downstream ok? ─► AllowanceLedger    │
//! └──────────────────┘   └──────────────────────────────────────┘
//! ```
//!
//! Trees are validated once when submitted; evaluation never mutates the
//! ledger, and consumption is committed only after the gated operation
//! itself succeeded.

pub mod abi;
pub mod allowance;
pub mod condition;
pub mod config;
pub mod decoder;
pub mod errors;
pub mod evaluator;
pub mod primitives;
pub mod rbac;

pub use allowance::{Allowance, AllowanceLedger, Clock, ConsumeEvent, FixedClock, LedgerError, SystemClock};
pub use condition::{Condition, ConditionTree, Encoding, IntegrityError, Operator, RawNode, TreeHandle};
pub use config::EngineConfig;
pub use errors::EngineError;
pub use evaluator::{Consumption, Context, Status, Violation};
pub use primitives::{Address, AllowanceKey};
pub use rbac::{CheckError, ExecutionError, Operation, PermissionChecker};

/// Version of the packed tree format
pub const PACKED_FORMAT_VERSION: u8 = condition::packing::PACK_VERSION;
