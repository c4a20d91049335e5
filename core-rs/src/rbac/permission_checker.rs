//! Permission Checker for condition-gated operations
//!
//! Ties the engine together for one attempted operation: selects the
//! applicable tree, evaluates it against the payload, and commits allowance
//! consumption only once the operation and its downstream effect succeeded.
//!
//! Trees are validated once at submission; evaluation reads them behind an
//! `Arc`, so re-scoping a target never disturbs a check already running.

use crate::allowance::{
    Allowance, AllowanceLedger, Clock, ConsumeEvent, LedgerError, SystemClock,
};
use crate::condition::{self, ConditionStore, ConditionTree, IntegrityError, RawNode, Scope, TreeHandle};
use crate::evaluator::{self, Consumption, Context, Violation};
use crate::primitives::{to_hex, Address, AllowanceKey};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// One attempted call, already unwrapped from any batching envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub target: Address,
    pub payload: Vec<u8>,
    /// Value transfer attached to the call
    pub value: u128,
}

impl Operation {
    pub fn new(target: Address, payload: Vec<u8>, value: u128) -> Self {
        Operation {
            target,
            payload,
            value,
        }
    }

    /// Leading 4 bytes of the payload, if it has them
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.payload.get(..4).and_then(|head| head.try_into().ok())
    }
}

/// Why an operation was not cleared
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    #[error("no condition tree for {0}")]
    TreeNotFound(String),

    #[error("permission denied: {0}")]
    Violation(#[from] Violation),

    #[error(transparent)]
    Allowance(#[from] LedgerError),

    #[error("re-entrant check rejected while an operation is in flight")]
    ReentrantCall,
}

/// Outcome of a gated execution that did not complete
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError<E> {
    #[error(transparent)]
    Check(#[from] CheckError),

    #[error("downstream operation failed: {0}")]
    Downstream(E),
}

/// Marks an operation in flight until dropped
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Result<Self, CheckError> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Rejected re-entrant permission check");
            return Err(CheckError::ReentrantCall);
        }
        Ok(InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Permission Checker - condition evaluation and allowance accounting
///
/// Handles one top-level operation at a time; a check started while another
/// is in flight (including from inside a downstream closure) is rejected.
pub struct PermissionChecker {
    store: RwLock<ConditionStore>,
    ledger: Mutex<AllowanceLedger>,
    avatar: Address,
    clock: Box<dyn Clock>,
    in_flight: AtomicBool,
}

impl PermissionChecker {
    /// Create a checker on the system clock
    ///
    /// # Arguments
    /// * `avatar` - Account `EqualToAvatar` conditions compare against
    pub fn new(avatar: Address) -> Self {
        Self::with_clock(avatar, Box::new(SystemClock))
    }

    /// Create a checker on a caller-supplied clock
    pub fn with_clock(avatar: Address, clock: Box<dyn Clock>) -> Self {
        PermissionChecker {
            store: RwLock::new(ConditionStore::new()),
            ledger: Mutex::new(AllowanceLedger::new()),
            avatar,
            clock,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Replace the allowance ledger, e.g. with a loaded snapshot
    pub fn with_ledger(self, ledger: AllowanceLedger) -> Self {
        *self.lock_ledger() = ledger;
        self
    }

    pub fn avatar(&self) -> Address {
        self.avatar
    }

    fn read_store(&self) -> RwLockReadGuard<'_, ConditionStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_store(&self) -> RwLockWriteGuard<'_, ConditionStore> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_ledger(&self) -> MutexGuard<'_, AllowanceLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and store a flattened tree
    ///
    /// # Returns
    /// The tree's content handle; submitting an identical tree again returns
    /// the same handle and stores nothing new.
    pub fn submit_tree(&self, nodes: Vec<RawNode>) -> Result<TreeHandle, IntegrityError> {
        let tree = condition::check(nodes)?;
        Ok(self.write_store().insert(tree))
    }

    pub fn tree(&self, handle: &TreeHandle) -> Option<Arc<ConditionTree>> {
        self.read_store().get(handle)
    }

    /// Apply a tree to every call to `target`
    pub fn scope_target(&self, target: Address, handle: TreeHandle) -> Result<(), CheckError> {
        self.assign(Scope::Target(target), handle)
    }

    /// Apply a tree to calls to `target` with the given selector
    ///
    /// Function scopes take precedence over the target-wide scope.
    pub fn scope_function(
        &self,
        target: Address,
        selector: [u8; 4],
        handle: TreeHandle,
    ) -> Result<(), CheckError> {
        self.assign(Scope::Function(target, selector), handle)
    }

    fn assign(&self, scope: Scope, handle: TreeHandle) -> Result<(), CheckError> {
        match self.write_store().assign(scope, handle) {
            Some(_) => {
                info!("Scope {:?} now uses tree {}", scope, handle.short());
                Ok(())
            }
            None => Err(CheckError::TreeNotFound(handle.to_string())),
        }
    }

    pub fn set_allowance(&self, key: AllowanceKey, allowance: Allowance) {
        self.lock_ledger().set_allowance(key, allowance);
    }

    /// Stored allowance state, not time-projected
    pub fn allowance(&self, key: &AllowanceKey) -> Option<Allowance> {
        self.lock_ledger().get(key).copied()
    }

    /// Balance available now, refills included
    pub fn preview_allowance(&self, key: &AllowanceKey) -> u128 {
        self.lock_ledger().preview(key, self.clock.now())
    }

    /// Copy of the ledger, for persisting
    pub fn ledger_snapshot(&self) -> AllowanceLedger {
        self.lock_ledger().clone()
    }

    fn resolve(&self, operation: &Operation) -> Result<TreeHandle, CheckError> {
        let selector = operation.selector();
        self.read_store()
            .resolve(&operation.target, selector)
            .ok_or_else(|| {
                CheckError::TreeNotFound(format!(
                    "target {} selector {}",
                    operation.target,
                    selector.map_or_else(|| "none".to_string(), |s| to_hex(&s))
                ))
            })
    }

    fn evaluate(
        &self,
        handle: &TreeHandle,
        operation: &Operation,
        consumptions: Vec<Consumption>,
    ) -> Result<Vec<Consumption>, CheckError> {
        let tree = self
            .tree(handle)
            .ok_or_else(|| CheckError::TreeNotFound(handle.to_string()))?;
        let ledger = self.lock_ledger();
        let context = Context {
            payload: &operation.payload,
            value: operation.value,
            avatar: self.avatar,
            ledger: &ledger,
            now: self.clock.now(),
        };
        let consumptions = evaluator::evaluate(&tree, &context, consumptions)?;
        debug!(
            "Operation on {} cleared by tree {}",
            operation.target,
            handle.short()
        );
        Ok(consumptions)
    }

    fn commit(&self, consumptions: &[Consumption]) -> Result<Vec<ConsumeEvent>, CheckError> {
        let now = self.clock.now();
        Ok(self.lock_ledger().commit(consumptions, now)?)
    }

    /// Evaluate one operation against a stored tree
    ///
    /// # Returns
    /// The consumption intents a successful execution would commit. Nothing
    /// is debited.
    pub fn check(
        &self,
        handle: &TreeHandle,
        operation: &Operation,
    ) -> Result<Vec<Consumption>, CheckError> {
        let _guard = InFlight::enter(&self.in_flight)?;
        self.evaluate(handle, operation, Vec::new())
    }

    /// Evaluate one operation against the tree scoped to its target
    pub fn check_scoped(&self, operation: &Operation) -> Result<Vec<Consumption>, CheckError> {
        let _guard = InFlight::enter(&self.in_flight)?;
        let handle = self.resolve(operation)?;
        self.evaluate(&handle, operation, Vec::new())
    }

    /// Evaluate pre-unwrapped sub-operations in order
    ///
    /// Intents are threaded through, so an allowance shared by several
    /// sub-operations is accounted once across the batch.
    pub fn check_batch(&self, operations: &[Operation]) -> Result<Vec<Consumption>, CheckError> {
        let _guard = InFlight::enter(&self.in_flight)?;
        self.evaluate_batch(operations)
    }

    fn evaluate_batch(&self, operations: &[Operation]) -> Result<Vec<Consumption>, CheckError> {
        let mut consumptions = Vec::new();
        for operation in operations {
            let handle = self.resolve(operation)?;
            consumptions = self.evaluate(&handle, operation, consumptions)?;
        }
        Ok(consumptions)
    }

    /// Check, run the downstream operation, then commit
    ///
    /// # Arguments
    /// * `handle` - Tree to evaluate
    /// * `operation` - The attempted call
    /// * `downstream` - Performs the call; runs only if the check passed
    ///
    /// # Returns
    /// The downstream result and the applied ledger changes. Consumption is
    /// committed only if `downstream` returned `Ok`.
    pub fn execute<T, E, F>(
        &self,
        handle: &TreeHandle,
        operation: &Operation,
        downstream: F,
    ) -> Result<(T, Vec<ConsumeEvent>), ExecutionError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let _guard = InFlight::enter(&self.in_flight)?;
        let consumptions = self.evaluate(handle, operation, Vec::new())?;
        self.finish(consumptions, downstream)
    }

    /// `execute` with the tree resolved from the operation's scope
    pub fn execute_scoped<T, E, F>(
        &self,
        operation: &Operation,
        downstream: F,
    ) -> Result<(T, Vec<ConsumeEvent>), ExecutionError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let _guard = InFlight::enter(&self.in_flight)?;
        let handle = self.resolve(operation)?;
        let consumptions = self.evaluate(&handle, operation, Vec::new())?;
        self.finish(consumptions, downstream)
    }

    /// `execute` for a batch of pre-unwrapped sub-operations, committed as one
    pub fn execute_batch<T, E, F>(
        &self,
        operations: &[Operation],
        downstream: F,
    ) -> Result<(T, Vec<ConsumeEvent>), ExecutionError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let _guard = InFlight::enter(&self.in_flight)?;
        let consumptions = self.evaluate_batch(operations)?;
        self.finish(consumptions, downstream)
    }

    fn finish<T, E, F>(
        &self,
        consumptions: Vec<Consumption>,
        downstream: F,
    ) -> Result<(T, Vec<ConsumeEvent>), ExecutionError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let output = downstream().map_err(|e| {
            debug!("Downstream failed, discarding {} intents", consumptions.len());
            ExecutionError::Downstream(e)
        })?;
        let events = self.commit(&consumptions)?;
        Ok((output, events))
    }
}
