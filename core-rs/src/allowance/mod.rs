//! Allowance accounting
//!
//! Allowances are consumable budgets that refill over time. Reads are
//! time-projected but never stored (`preview`); the stored state changes
//! only through `commit`, which re-validates every intent against the
//! current balances and applies all of them or none.

pub mod clock;

pub use clock::{Clock, FixedClock, SystemClock};

use crate::evaluator::Consumption;
use crate::primitives::AllowanceKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Commit-time failures, distinct from evaluation violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("allowance {key} exceeded: {requested} requested, {available} available")]
    AllowanceExceeded {
        key: AllowanceKey,
        available: u128,
        requested: u128,
    },

    #[error("ledger file error: {0}")]
    Io(String),

    #[error("ledger format error: {0}")]
    Format(String),
}

/// A refilling budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allowance {
    /// Amount added per elapsed period
    pub refill: u128,
    /// Ceiling refills never exceed
    pub max_refill: u128,
    /// Refill period in seconds; 0 disables refills
    pub period: u64,
    pub balance: u128,
    /// Start of the current refill period
    pub timestamp: u64,
}

impl Allowance {
    /// `max_refill` of 0 means no ceiling
    pub fn new(balance: u128, max_refill: u128, refill: u128, period: u64, timestamp: u64) -> Self {
        Allowance {
            refill,
            max_refill: if max_refill == 0 { u128::MAX } else { max_refill },
            period,
            balance,
            timestamp,
        }
    }

    /// Budget that never refills
    pub fn fixed(balance: u128) -> Self {
        Allowance::new(balance, 0, 0, 0, 0)
    }

    /// State after every period completed by `now` has been credited
    pub fn accrue(&self, now: u64) -> Allowance {
        let mut next = *self;
        if self.period == 0 || now < self.timestamp.saturating_add(self.period) {
            return next;
        }

        let elapsed = (now - self.timestamp) / self.period;
        if self.balance < self.max_refill {
            let credit = self.refill.saturating_mul(elapsed as u128);
            next.balance = self.balance.saturating_add(credit).min(self.max_refill);
        }
        next.timestamp = self.timestamp + elapsed * self.period;
        next
    }
}

/// Balance change applied by a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeEvent {
    pub allowance_key: AllowanceKey,
    pub consumed: u128,
    pub new_balance: u128,
}

/// Allowance state keyed by allowance id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowanceLedger {
    allowances: HashMap<AllowanceKey, Allowance>,
}

impl AllowanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an allowance
    pub fn set_allowance(&mut self, key: AllowanceKey, allowance: Allowance) {
        info!(
            "Allowance {} set: balance {}, refill {} every {}s",
            key, allowance.balance, allowance.refill, allowance.period
        );
        self.allowances.insert(key, allowance);
    }

    /// Stored state as-is, not time-projected
    pub fn get(&self, key: &AllowanceKey) -> Option<&Allowance> {
        self.allowances.get(key)
    }

    /// Time-projected state, stored state untouched
    pub fn accrued(&self, key: &AllowanceKey, now: u64) -> Option<Allowance> {
        self.allowances.get(key).map(|allowance| allowance.accrue(now))
    }

    /// Available balance at `now`; unknown keys have none
    pub fn preview(&self, key: &AllowanceKey, now: u64) -> u128 {
        self.accrued(key, now).map_or(0, |allowance| allowance.balance)
    }

    pub fn len(&self) -> usize {
        self.allowances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowances.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &AllowanceKey> {
        self.allowances.keys()
    }

    /// Debit every intent, or nothing
    ///
    /// Intents are aggregated per key and checked against the balances
    /// accrued at `now`, not against the balance snapshot they carry.
    pub fn commit(
        &mut self,
        consumptions: &[Consumption],
        now: u64,
    ) -> Result<Vec<ConsumeEvent>, LedgerError> {
        let mut totals: Vec<(AllowanceKey, u128)> = Vec::new();
        for consumption in consumptions {
            match totals
                .iter_mut()
                .find(|(key, _)| *key == consumption.allowance_key)
            {
                Some((_, total)) => *total = total.saturating_add(consumption.consumed),
                None => totals.push((consumption.allowance_key, consumption.consumed)),
            }
        }

        let mut updated = Vec::with_capacity(totals.len());
        for (key, requested) in &totals {
            let current = self.accrued(key, now);
            let available = current.map_or(0, |allowance| allowance.balance);
            match current {
                Some(mut allowance) if *requested <= available => {
                    allowance.balance -= requested;
                    updated.push((*key, *requested, allowance));
                }
                _ if *requested == 0 => {}
                _ => {
                    debug!(
                        "Commit rejected: allowance {} has {}, {} requested",
                        key, available, requested
                    );
                    return Err(LedgerError::AllowanceExceeded {
                        key: *key,
                        available,
                        requested: *requested,
                    });
                }
            }
        }

        let mut events = Vec::with_capacity(updated.len());
        for (key, consumed, allowance) in updated {
            self.allowances.insert(key, allowance);
            info!(
                "ConsumeAllowance {}: consumed {}, new balance {}",
                key, consumed, allowance.balance
            );
            events.push(ConsumeEvent {
                allowance_key: key,
                consumed,
                new_balance: allowance.balance,
            });
        }
        Ok(events)
    }

    /// Load a JSON snapshot; a missing file is an empty ledger
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        if !path.exists() {
            debug!("No ledger at {}, starting empty", path.display());
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| LedgerError::Io(format!("{}: {}", path.display(), e)))?;
        let allowances: BTreeMap<AllowanceKey, Allowance> = serde_json::from_str(&content)
            .map_err(|e| LedgerError::Format(format!("{}: {}", path.display(), e)))?;
        Ok(AllowanceLedger {
            allowances: allowances.into_iter().collect(),
        })
    }

    /// Write a JSON snapshot, keys in sorted order
    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        let sorted: BTreeMap<&AllowanceKey, &Allowance> = self.allowances.iter().collect();
        let content = serde_json::to_string_pretty(&sorted)
            .map_err(|e| LedgerError::Format(e.to_string()))?;
        fs::write(path, content).map_err(|e| LedgerError::Io(format!("{}: {}", path.display(), e)))
    }
}
