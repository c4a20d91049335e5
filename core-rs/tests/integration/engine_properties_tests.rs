//! Integration tests for engine-wide properties
//!
//! Exercises the integrity checker, decoder and evaluator together through
//! the public API:
//! - Evaluation purity and side-effect-free previews
//! - Empty and mismatched arrays under quantifiers and zips
//! - Leading-bytes handling for encoded calls, top-level and nested
//! - Nesting depth capped at submission
//! - Allowance exhaustion across repeated executions
//! - Packed form round trips

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rolecheck::abi::{encode_call, Token};
use rolecheck::allowance::{Allowance, AllowanceLedger, FixedClock};
use rolecheck::condition::packing::MAX_DEPTH;
use rolecheck::condition::{
    self, pack, unpack, Condition, Encoding, IntegrityError, Operator, RawNode,
};
use rolecheck::evaluator::{evaluate, Consumption, Context, Status, Violation};
use rolecheck::primitives::{Address, AllowanceKey};
use rolecheck::rbac::{CheckError, ExecutionError, Operation, PermissionChecker};

const SELECTOR: [u8; 4] = [0xde, 0xad, 0xbe, 0xef];
const AVATAR: Address = Address([0xaa; 20]);

fn word(value: u128) -> Vec<u8> {
    let mut out = vec![0u8; 32];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

fn calldata(children: Vec<Condition>) -> Condition {
    Condition::node(Encoding::AbiEncoded, Operator::Matches, children)
}

fn pluck_array(index: u8) -> Condition {
    Condition::leaf(Encoding::Array, Operator::Pluck, vec![index])
        .with_children(vec![Condition::static_pass()])
}

fn zip_pair(operator: Operator, fields: Vec<Condition>) -> Condition {
    Condition::leaf(Encoding::None, operator, vec![1, 2]).with_children(vec![Condition::node(
        Encoding::Tuple,
        Operator::Matches,
        fields,
    )])
}

fn run(
    condition: &Condition,
    payload: &[u8],
    value: u128,
    ledger: &AllowanceLedger,
    now: u64,
) -> Result<Vec<Consumption>, Violation> {
    let tree = condition::check(condition.flatten()).unwrap();
    let context = Context {
        payload,
        value,
        avatar: AVATAR,
        ledger,
        now,
    };
    evaluate(&tree, &context, Vec::new())
}

fn failure(result: Result<Vec<Consumption>, Violation>) -> (Status, usize) {
    let violation = result.unwrap_err();
    (violation.status, violation.index)
}

/// Test: identical inputs give identical outcomes and never touch the ledger
#[test]
fn test_check_is_pure() {
    let key = AllowanceKey::from_label("spend");
    let mut ledger = AllowanceLedger::new();
    ledger.set_allowance(key, Allowance::new(500, 1000, 100, 60, 0));
    let before = ledger.clone();

    let tree = calldata(vec![
        Condition::leaf(Encoding::Static, Operator::LessThan, word(900)),
        Condition::leaf(Encoding::Static, Operator::WithinAllowance, key.0.to_vec()),
    ]);

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let a: u128 = rng.gen_range(0..1200);
        let b: u128 = rng.gen_range(0..1200);
        let now: u64 = rng.gen_range(0..600);
        let payload = encode_call(SELECTOR, &[Token::uint(a), Token::uint(b)]);

        let first = run(&tree, &payload, 0, &ledger, now);
        let second = run(&tree, &payload, 0, &ledger, now);
        assert_eq!(first, second);
        assert_eq!(ledger, before);

        if a < 900 && b <= ledger.preview(&key, now) {
            assert_eq!(first.unwrap()[0].consumed, b);
        } else {
            assert!(first.is_err());
        }
    }
}

/// Test: previews project refills without storing them
#[test]
fn test_preview_never_mutates_ledger() {
    let key = AllowanceKey::from_label("refilling");
    let mut ledger = AllowanceLedger::new();
    ledger.set_allowance(key, Allowance::new(10, 100, 5, 60, 1_000));
    let before = ledger.clone();

    assert_eq!(ledger.preview(&key, 1_000), 10);
    assert_eq!(ledger.preview(&key, 1_059), 10);
    assert_eq!(ledger.preview(&key, 1_060), 15);
    assert_eq!(ledger.preview(&key, 1_000 + 60 * 100), 100);
    assert_eq!(ledger.preview(&AllowanceKey::from_label("unknown"), 5_000), 0);

    assert_eq!(ledger, before);
    assert_eq!(ledger.get(&key).unwrap().timestamp, 1_000);
}

/// Test: ArrayEvery over an empty array passes, ArraySome fails
#[test]
fn test_array_quantifiers_over_empty_array() {
    let ledger = AllowanceLedger::new();
    let payload = encode_call(SELECTOR, &[Token::Array(vec![])]);
    let quantified = |operator| {
        calldata(vec![Condition::node(
            Encoding::Array,
            operator,
            vec![Condition::leaf(Encoding::Static, Operator::EqualTo, word(1))],
        )])
    };

    assert_eq!(
        run(&quantified(Operator::ArrayEvery), &payload, 0, &ledger, 0).unwrap(),
        vec![]
    );
    assert_eq!(
        failure(run(&quantified(Operator::ArraySome), &payload, 0, &ledger, 0)),
        (Status::NoArrayElementPasses, 1)
    );
}

#[test]
fn test_array_quantifiers_over_elements() {
    let ledger = AllowanceLedger::new();
    let payload = encode_call(
        SELECTOR,
        &[Token::Array(vec![Token::uint(1), Token::uint(5), Token::uint(9)])],
    );
    let quantified = |operator| {
        calldata(vec![Condition::node(
            Encoding::Array,
            operator,
            vec![Condition::leaf(Encoding::Static, Operator::LessThan, word(6))],
        )])
    };

    assert!(run(&quantified(Operator::ArraySome), &payload, 0, &ledger, 0).is_ok());
    assert_eq!(
        failure(run(&quantified(Operator::ArrayEvery), &payload, 0, &ledger, 0)),
        (Status::NotEveryArrayElementPasses, 1)
    );
}

/// Test: zips over two empty plucked arrays
#[test]
fn test_zip_over_empty_arrays() {
    let ledger = AllowanceLedger::new();
    let payload = encode_call(SELECTOR, &[Token::Array(vec![]), Token::Array(vec![])]);
    let zipped = |operator| {
        calldata(vec![
            pluck_array(1),
            pluck_array(2),
            zip_pair(
                operator,
                vec![Condition::static_pass(), Condition::static_pass()],
            ),
        ])
    };

    assert!(run(&zipped(Operator::ZipEvery), &payload, 0, &ledger, 0).is_ok());
    assert_eq!(
        failure(run(&zipped(Operator::ZipSome), &payload, 0, &ledger, 0)),
        (Status::NoZippedElementPasses, 3)
    );
}

/// Test: unequal lengths fail whatever the elements hold
#[test]
fn test_zip_length_mismatch() {
    let ledger = AllowanceLedger::new();
    let payload = encode_call(
        SELECTOR,
        &[
            Token::Array(vec![Token::uint(1), Token::uint(2)]),
            Token::Array(vec![Token::uint(1)]),
        ],
    );

    for operator in [Operator::ZipSome, Operator::ZipEvery] {
        let tree = calldata(vec![
            pluck_array(1),
            pluck_array(2),
            zip_pair(
                operator,
                vec![Condition::static_pass(), Condition::static_pass()],
            ),
        ]);
        assert_eq!(
            failure(run(&tree, &payload, 0, &ledger, 0)),
            (Status::ZippedArrayLengthMismatch, 3)
        );
    }
}

/// Test: zipped rows pair elements by index
#[test]
fn test_zip_pairs_elements() {
    let ledger = AllowanceLedger::new();
    let tree = |operator| {
        calldata(vec![
            pluck_array(1),
            pluck_array(2),
            zip_pair(
                operator,
                vec![
                    Condition::leaf(Encoding::Static, Operator::EqualTo, word(2)),
                    Condition::leaf(Encoding::Static, Operator::LessThan, word(50)),
                ],
            ),
        ])
    };
    let payload = encode_call(
        SELECTOR,
        &[
            Token::Array(vec![Token::uint(1), Token::uint(2)]),
            Token::Array(vec![Token::uint(99), Token::uint(10)]),
        ],
    );

    assert!(run(&tree(Operator::ZipSome), &payload, 0, &ledger, 0).is_ok());
    assert_eq!(
        failure(run(&tree(Operator::ZipEvery), &payload, 0, &ledger, 0)),
        (Status::NotEveryZippedElementPasses, 3)
    );
}

/// Test: three plucked arrays zip into three-field rows
#[test]
fn test_zip_three_arrays() {
    let ledger = AllowanceLedger::new();
    let tree = |operator| {
        calldata(vec![
            pluck_array(1),
            pluck_array(2),
            pluck_array(3),
            Condition::leaf(Encoding::None, operator, vec![1, 2, 3]).with_children(vec![
                Condition::node(
                    Encoding::Tuple,
                    Operator::Matches,
                    vec![
                        Condition::leaf(Encoding::Static, Operator::EqualTo, word(2)),
                        Condition::leaf(Encoding::Static, Operator::LessThan, word(50)),
                        Condition::leaf(Encoding::Static, Operator::GreaterThan, word(150)),
                    ],
                ),
            ]),
        ])
    };
    let array = |values: &[u128]| Token::Array(values.iter().map(|&v| Token::uint(v)).collect());

    let payload = encode_call(
        SELECTOR,
        &[array(&[1, 2]), array(&[10, 20]), array(&[100, 200])],
    );
    assert!(run(&tree(Operator::ZipSome), &payload, 0, &ledger, 0).is_ok());
    assert_eq!(
        failure(run(&tree(Operator::ZipEvery), &payload, 0, &ledger, 0)),
        (Status::NotEveryZippedElementPasses, 4)
    );

    let rows_match = encode_call(
        SELECTOR,
        &[array(&[2, 2]), array(&[10, 20]), array(&[151, 200])],
    );
    assert!(run(&tree(Operator::ZipEvery), &rows_match, 0, &ledger, 0).is_ok());

    let short_third = encode_call(SELECTOR, &[array(&[1, 2]), array(&[10, 20]), array(&[100])]);
    assert_eq!(
        failure(run(&tree(Operator::ZipSome), &short_third, 0, &ledger, 0)),
        (Status::ZippedArrayLengthMismatch, 4)
    );
}

/// Test: a bytes parameter carrying its own call is decoded and matched
#[test]
fn test_nested_encoded_call() {
    const INNER: [u8; 4] = [0x12, 0x34, 0x56, 0x78];
    let ledger = AllowanceLedger::new();
    let mut inner_leading = vec![0x00, 0x04];
    inner_leading.extend_from_slice(&INNER);
    let tree = calldata(vec![
        Condition::leaf(Encoding::Static, Operator::EqualTo, word(7)),
        Condition::node(
            Encoding::AbiEncoded,
            Operator::Matches,
            vec![
                Condition::leaf(Encoding::Static, Operator::EqualTo, word(1)),
                Condition::static_pass(),
            ],
        )
        .with_comp_value(inner_leading),
    ]);
    let outer = |selector: [u8; 4], first: u128| {
        let inner = encode_call(selector, &[Token::uint(first), Token::uint(2)]);
        encode_call(SELECTOR, &[Token::uint(7), Token::Bytes(inner)])
    };

    assert!(run(&tree, &outer(INNER, 1), 0, &ledger, 0).is_ok());
    assert_eq!(
        failure(run(&tree, &outer(INNER, 9), 0, &ledger, 0)),
        (Status::ParameterNotAllowed, 3)
    );
    assert_eq!(
        failure(run(&tree, &outer(SELECTOR, 1), 0, &ledger, 0)),
        (Status::LeadingBytesNotAMatch, 2)
    );
}

/// Test: nesting is capped at submission so evaluation depth stays bounded
#[test]
fn test_nesting_depth_capped() {
    let chain = |links: usize| {
        let mut condition = Condition::new(Encoding::None, Operator::Pass);
        for _ in 0..links {
            condition = Condition::node(Encoding::None, Operator::And, vec![condition]);
        }
        condition
    };
    let checker = PermissionChecker::new(AVATAR);
    let operation = Operation::new(Address::ZERO, SELECTOR.to_vec(), 0);

    let deepest = checker.submit_tree(chain(MAX_DEPTH).flatten()).unwrap();
    assert_eq!(checker.check(&deepest, &operation), Ok(Vec::new()));

    assert_eq!(
        checker.submit_tree(chain(MAX_DEPTH + 1).flatten()).unwrap_err(),
        IntegrityError::TreeTooDeep(MAX_DEPTH + 1)
    );
    let far_too_deep: Vec<RawNode> = (0..5_000)
        .map(|index: usize| RawNode::new(index.saturating_sub(1), Encoding::None, Operator::And, vec![]))
        .collect();
    assert_eq!(
        condition::check(far_too_deep).unwrap_err(),
        IntegrityError::TreeTooDeep(MAX_DEPTH + 1)
    );
}

/// Test: Matches(EqualTo 42, GreaterThan 100) fails at the comparison node
#[test]
fn test_matches_reports_failing_node() {
    let ledger = AllowanceLedger::new();
    let tree = calldata(vec![
        Condition::leaf(Encoding::Static, Operator::EqualTo, word(42)),
        Condition::leaf(Encoding::Static, Operator::GreaterThan, word(100)),
    ]);

    let pass = encode_call(SELECTOR, &[Token::uint(42), Token::uint(101)]);
    assert!(run(&tree, &pass, 0, &ledger, 0).is_ok());

    let low = encode_call(SELECTOR, &[Token::uint(42), Token::uint(99)]);
    let violation = run(&tree, &low, 0, &ledger, 0).unwrap_err();
    assert_eq!(violation.status, Status::ParameterLessThanAllowed);
    assert_eq!(violation.index, 2);
    assert_eq!(violation.info, Some(word(99)));
}

/// Test: declared leading bytes must match before the body is read
#[test]
fn test_leading_bytes_checked_before_body() {
    let ledger = AllowanceLedger::new();
    let mut leading = vec![0x00, 0x04];
    leading.extend_from_slice(&SELECTOR);
    let tree = calldata(vec![Condition::leaf(
        Encoding::Static,
        Operator::EqualTo,
        word(1),
    )])
    .with_comp_value(leading);

    let pass = encode_call(SELECTOR, &[Token::uint(1)]);
    assert!(run(&tree, &pass, 0, &ledger, 0).is_ok());

    let wrong_selector = encode_call([0xca, 0xfe, 0xba, 0xbe], &[Token::uint(1)]);
    assert_eq!(
        failure(run(&tree, &wrong_selector, 0, &ledger, 0)),
        (Status::LeadingBytesNotAMatch, 0)
    );

    let wrong_value = encode_call(SELECTOR, &[Token::uint(0x99)]);
    assert_eq!(
        failure(run(&tree, &wrong_value, 0, &ledger, 0)),
        (Status::ParameterNotAllowed, 1)
    );
}

/// Test: a payload shorter than its declared layout fails closed
#[test]
fn test_truncated_payload_fails_closed() {
    let ledger = AllowanceLedger::new();
    let tree = Condition::node(
        Encoding::None,
        Operator::Or,
        vec![
            calldata(vec![Condition::static_pass(), Condition::static_pass()]),
            Condition::new(Encoding::None, Operator::Pass),
        ],
    );
    let payload = encode_call(SELECTOR, &[Token::uint(1)]);

    assert_eq!(
        failure(run(&tree, &payload, 0, &ledger, 0)).0,
        Status::CalldataOutOfBounds
    );
}

/// Test: Pluck carrying two children is rejected at submission
#[test]
fn test_pluck_with_two_children_rejected() {
    let tree = calldata(vec![Condition::leaf(Encoding::Static, Operator::Pluck, vec![1])
        .with_children(vec![Condition::static_pass(), Condition::static_pass()])]);

    assert_eq!(
        condition::check(tree.flatten()).unwrap_err(),
        IntegrityError::LeafNodeCannotHaveChildren(1)
    );
}

/// Test: balance N clears exactly N gated calls
#[test]
fn test_call_allowance_exhausts_after_n_calls() {
    const N: u128 = 4;
    let clock = FixedClock::new(1_000);
    let checker = PermissionChecker::with_clock(AVATAR, Box::new(clock));
    let key = AllowanceKey::from_label("calls");
    checker.set_allowance(key, Allowance::fixed(N));

    let handle = checker
        .submit_tree(
            Condition::leaf(Encoding::None, Operator::CallWithinAllowance, key.0.to_vec())
                .flatten(),
        )
        .unwrap();
    let operation = Operation::new(Address([0x11; 20]), vec![], 0);

    for remaining in (0..N).rev() {
        let (_, events) = checker
            .execute(&handle, &operation, || Ok::<_, ()>(()))
            .unwrap();
        assert_eq!(events[0].new_balance, remaining);
    }

    let exhausted = checker.execute(&handle, &operation, || Ok::<_, ()>(()));
    match exhausted {
        Err(ExecutionError::Check(CheckError::Violation(violation))) => {
            assert_eq!(violation.status, Status::AllowanceExceeded);
            assert_eq!(violation.index, 0);
        }
        other => panic!("Expected AllowanceExceeded, got {:?}", other.map(|_| ())),
    }
    assert_eq!(checker.allowance(&key).unwrap().balance, 0);
}

/// Test: ether allowances use the attached value transfer
#[test]
fn test_ether_allowance_uses_value() {
    let key = AllowanceKey::from_label("eth");
    let mut ledger = AllowanceLedger::new();
    ledger.set_allowance(key, Allowance::fixed(1_000));
    let tree = Condition::leaf(Encoding::None, Operator::EtherWithinAllowance, key.0.to_vec());

    let consumptions = run(&tree, &[], 600, &ledger, 0).unwrap();
    assert_eq!(consumptions[0].consumed, 600);
    assert_eq!(consumptions[0].balance, 1_000);

    assert_eq!(
        failure(run(&tree, &[], 1_001, &ledger, 0)),
        (Status::AllowanceExceeded, 0)
    );
}

/// Test: accepted trees survive pack/unpack unchanged
#[test]
fn test_pack_unpack_round_trip() {
    let trees = vec![
        calldata(vec![
            Condition::leaf(Encoding::Static, Operator::EqualTo, word(42)),
            Condition::leaf(Encoding::Static, Operator::GreaterThan, word(100)),
        ]),
        calldata(vec![
            pluck_array(1),
            pluck_array(2),
            zip_pair(
                Operator::ZipEvery,
                vec![Condition::static_pass(), Condition::static_pass()],
            ),
        ]),
        Condition::node(
            Encoding::None,
            Operator::Or,
            vec![
                Condition::leaf(Encoding::None, Operator::CallWithinAllowance, vec![7u8; 32]),
                Condition::leaf(Encoding::EtherValue, Operator::LessThan, word(10)),
            ],
        ),
    ];

    for tree in trees {
        let nodes = tree.flatten();
        let accepted = condition::check(nodes.clone()).unwrap();
        let packed = pack(&nodes).unwrap();
        assert_eq!(packed.handle(), accepted.handle());
        assert_eq!(unpack(packed.bytes()).unwrap(), nodes);
    }
}
