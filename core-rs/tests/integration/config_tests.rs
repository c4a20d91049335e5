//! Integration tests for engine configuration files
//!
//! Tests loading an engine file and tree files from disk, checking an
//! operation, and persisting the ledger snapshot between runs.

use rolecheck::abi::{encode_call, Token};
use rolecheck::allowance::{AllowanceLedger, FixedClock};
use rolecheck::config::{self, EngineConfig};
use rolecheck::errors::EngineError;
use rolecheck::primitives::{Address, AllowanceKey};
use rolecheck::rbac::Operation;
use std::fs;
use tempfile::TempDir;

const ENGINE: &str = r#"
apiVersion: rolecheck/v1
kind: Engine
metadata:
  name: payroll
spec:
  avatar: "0x5afe000000000000000000000000000000000001"
  ledgerPath: state/ledger.json
  allowances:
    - key: "0x0000000000000000000000000000000000000000000000000000000000000001"
      balance: 100
"#;

const TREE: &str = r#"
encoding: abiEncoded
operator: matches
children:
  - encoding: static
    operator: lessThan
    compValue: "0x0000000000000000000000000000000000000000000000000000000000000064"
  - encoding: static
    operator: withinAllowance
    compValue: "0x0000000000000000000000000000000000000000000000000000000000000001"
"#;

fn write_project(dir: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    let engine_path = dir.path().join("engine.yaml");
    let tree_path = dir.path().join("tree.yaml");
    fs::create_dir_all(dir.path().join("state")).unwrap();
    fs::write(&engine_path, ENGINE).unwrap();
    fs::write(&tree_path, TREE).unwrap();
    (engine_path, tree_path)
}

/// Test: consumption committed in one run is visible in the next
#[test]
fn test_ledger_persists_between_runs() {
    let temp_dir = TempDir::new().unwrap();
    let (engine_path, tree_path) = write_project(&temp_dir);
    let key: AllowanceKey = "0x0000000000000000000000000000000000000000000000000000000000000001"
        .parse()
        .unwrap();
    let operation = Operation::new(
        Address::ZERO,
        encode_call([1, 2, 3, 4], &[Token::uint(10), Token::uint(30)]),
        0,
    );

    let engine = EngineConfig::load(&engine_path).unwrap();
    let ledger_path = engine.resolve_ledger_path(&engine_path).unwrap();
    assert_eq!(ledger_path, temp_dir.path().join("state/ledger.json"));

    // first run
    let checker = engine
        .checker(Box::new(FixedClock::new(0)), Some(ledger_path.as_path()))
        .unwrap();
    let handle = checker
        .submit_tree(config::load_tree_file(&tree_path).unwrap())
        .unwrap();
    checker
        .execute(&handle, &operation, || Ok::<_, ()>(()))
        .unwrap();
    checker.ledger_snapshot().save(&ledger_path).unwrap();

    // second run
    let checker = engine
        .checker(Box::new(FixedClock::new(0)), Some(ledger_path.as_path()))
        .unwrap();
    assert_eq!(checker.preview_allowance(&key), 70);

    let persisted = AllowanceLedger::load(&ledger_path).unwrap();
    assert_eq!(persisted.get(&key).unwrap().balance, 70);
}

#[test]
fn test_missing_engine_file() {
    let result = EngineConfig::load("/nonexistent/engine.yaml");
    assert!(matches!(result, Err(EngineError::FileNotFound(_))));
}

#[test]
fn test_malformed_tree_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("tree.yaml");
    fs::write(&path, "encoding: sideways\noperator: pass\n").unwrap();

    assert!(matches!(
        config::load_tree_file(&path),
        Err(EngineError::Yaml(_))
    ));
}

#[test]
fn test_bad_avatar_rejected() {
    let yaml = ENGINE.replace(
        "0x5afe000000000000000000000000000000000001",
        "0x5afe",
    );
    assert!(matches!(
        EngineConfig::from_yaml_str(&yaml),
        Err(EngineError::Yaml(_))
    ));
}
