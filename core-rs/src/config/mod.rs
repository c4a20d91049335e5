/**
 * config
 * Parser for engine configuration files (YAML format) and condition tree files
 *
 * Format:
 * ```yaml
 * apiVersion: rolecheck/v1
 * kind: Engine
 * metadata:
 *   name: treasury
 * spec:
 *   avatar: "0x5afe000000000000000000000000000000000001"
 *   ledgerPath: allowances.json
 *   allowances:
 *     - key: "0x0000000000000000000000000000000000000000000000000000000000000001"
 *       balance: 1000
 *       maxRefill: 1000
 *       refill: 100
 *       period: 3600
 *       timestamp: 0
 * ```
 */

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::allowance::{Allowance, AllowanceLedger, Clock};
use crate::condition::{Condition, RawNode};
use crate::errors::{EngineError, Result};
use crate::primitives::{Address, AllowanceKey};
use crate::rbac::PermissionChecker;

pub const API_VERSION: &str = "rolecheck/v1";
pub const KIND: &str = "Engine";

/// Engine file structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: EngineSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    pub name: String,
}

/// Engine specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineSpec {
    /// Account `EqualToAvatar` compares against
    pub avatar: Address,
    /// JSON ledger snapshot; relative paths resolve against the engine file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowances: Vec<AllowanceConfig>,
}

/// Initial allowance state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllowanceConfig {
    pub key: AllowanceKey,
    pub balance: u64,
    /// 0 means no ceiling
    #[serde(default)]
    pub max_refill: u64,
    #[serde(default)]
    pub refill: u64,
    #[serde(default)]
    pub period: u64,
    #[serde(default)]
    pub timestamp: u64,
}

impl AllowanceConfig {
    pub fn to_allowance(&self) -> Allowance {
        Allowance::new(
            u128::from(self.balance),
            u128::from(self.max_refill),
            u128::from(self.refill),
            self.period,
            self.timestamp,
        )
    }
}

impl EngineConfig {
    /// Load an engine file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML engine file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(EngineError::FileNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let content = fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&content)?;
        debug!("Loaded engine config '{}' from {}", config.metadata.name, path.display());
        Ok(config)
    }

    /// Parse and validate engine YAML
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate engine structure
    ///
    /// Ensures:
    /// - apiVersion is "rolecheck/v1"
    /// - kind is "Engine"
    /// - metadata.name is non-empty
    /// - no allowance key is configured twice
    pub fn validate(&self) -> Result<()> {
        if self.api_version != API_VERSION {
            return Err(EngineError::ValidationError(format!(
                "Invalid apiVersion: expected '{}', got '{}'",
                API_VERSION, self.api_version
            )));
        }

        if self.kind != KIND {
            return Err(EngineError::ValidationError(format!(
                "Invalid kind: expected '{}', got '{}'",
                KIND, self.kind
            )));
        }

        if self.metadata.name.is_empty() {
            return Err(EngineError::ValidationError(
                "metadata.name cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for allowance in &self.spec.allowances {
            if !seen.insert(allowance.key) {
                return Err(EngineError::ValidationError(format!(
                    "Duplicate allowance key: {}",
                    allowance.key
                )));
            }
        }

        Ok(())
    }

    pub fn new(name: String, avatar: Address) -> Self {
        EngineConfig {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: Metadata { name },
            spec: EngineSpec {
                avatar,
                ledger_path: None,
                allowances: Vec::new(),
            },
        }
    }

    /// Save the engine file as YAML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path.as_ref(), yaml)?;
        Ok(())
    }

    /// Ledger snapshot location for an engine file loaded from `config_path`
    pub fn resolve_ledger_path(&self, config_path: &Path) -> Option<PathBuf> {
        let ledger_path = self.spec.ledger_path.as_ref()?;
        if ledger_path.is_absolute() {
            return Some(ledger_path.clone());
        }
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        Some(base.join(ledger_path))
    }

    /// Configured allowances, overlaid by the persisted snapshot if one exists
    ///
    /// Snapshot entries win: they carry consumption committed since the
    /// engine file was written.
    pub fn ledger(&self, snapshot: Option<&Path>) -> Result<AllowanceLedger> {
        let mut ledger = AllowanceLedger::new();
        for allowance in &self.spec.allowances {
            ledger.set_allowance(allowance.key, allowance.to_allowance());
        }

        if let Some(path) = snapshot {
            let persisted = AllowanceLedger::load(path)?;
            for key in persisted.keys() {
                if let Some(allowance) = persisted.get(key) {
                    ledger.set_allowance(*key, *allowance);
                }
            }
        }

        Ok(ledger)
    }

    /// Build a checker for this engine
    pub fn checker(&self, clock: Box<dyn Clock>, snapshot: Option<&Path>) -> Result<PermissionChecker> {
        let ledger = self.ledger(snapshot)?;
        Ok(PermissionChecker::with_clock(self.spec.avatar, clock).with_ledger(ledger))
    }
}

/// Parse a nested tree document; JSON when `json` is set, YAML otherwise
pub fn parse_tree(content: &str, json: bool) -> Result<Condition> {
    if json {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Load a tree file and flatten it breadth-first
///
/// Files ending in `.json` are read as JSON, anything else as YAML.
pub fn load_tree_file<P: AsRef<Path>>(path: P) -> Result<Vec<RawNode>> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(EngineError::FileNotFound(
            path.to_string_lossy().to_string(),
        ));
    }

    let content = fs::read_to_string(path)?;
    let json = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
    let condition = parse_tree(&content, json)?;
    Ok(condition.flatten())
}
