// Status Vocabulary Contract Tests
//
// Callers pattern-match on status names and integrity error names, and store
// operator/encoding codes inside packed trees. These tests pin all of them.

use rolecheck::condition::{Encoding, IntegrityError, Operator};
use rolecheck::evaluator::{Status, Violation};

/// WHY: Callers match on evaluation status names
/// BREAKS: Every consumer that renders or branches on a denial reason
#[test]
fn evaluation_status_names_are_stable() {
    let pinned = [
        "ParameterNotAllowed",
        "ParameterLessThanAllowed",
        "ParameterGreaterThanAllowed",
        "OrViolation",
        "NoArrayElementPasses",
        "NotEveryArrayElementPasses",
        "NoZippedElementPasses",
        "NotEveryZippedElementPasses",
        "ZippedArrayLengthMismatch",
        "AllowanceExceeded",
        "LeadingBytesNotAMatch",
        "CalldataOutOfBounds",
    ];

    let names: Vec<&str> = Status::ALL.iter().map(Status::as_str).collect();
    for name in pinned {
        assert!(names.contains(&name), "Status {} must exist", name);
    }
}

/// WHY: Malformed input must never be recovered by trying another branch
/// BREAKS: Fail-closed evaluation if any other status becomes fatal
#[test]
fn only_out_of_bounds_is_fatal() {
    for status in Status::ALL {
        assert_eq!(
            status.is_fatal(),
            status == Status::CalldataOutOfBounds,
            "{} fatality changed",
            status
        );
    }
}

/// WHY: Denials are serialized for audit trails
/// REASON: status as name, offending value as 0x hex
#[test]
fn violation_json_shape() {
    let violation = Violation::new(Status::ParameterGreaterThanAllowed, 4).with_info(vec![0x01, 0xff]);
    let json = serde_json::to_value(&violation).unwrap();

    assert_eq!(json["status"], "ParameterGreaterThanAllowed");
    assert_eq!(json["index"], 4);
    assert_eq!(json["info"], "0x01ff");

    let bare = serde_json::to_value(Violation::new(Status::OrViolation, 0)).unwrap();
    assert!(bare.get("info").is_none(), "Absent info must be omitted");
}

/// WHY: Integrity failures are named at submission time
/// BREAKS: Tooling that reports why a tree was refused
#[test]
fn integrity_error_names_are_stable() {
    let cases = [
        (IntegrityError::UnsuitableRootNode, "UnsuitableRootNode"),
        (IntegrityError::UnsuitableParameterType(1), "UnsuitableParameterType"),
        (IntegrityError::UnsuitableCompValue(1), "UnsuitableCompValue"),
        (IntegrityError::LeafNodeCannotHaveChildren(1), "LeafNodeCannotHaveChildren"),
        (IntegrityError::UnsuitableChildCount(1), "UnsuitableChildCount"),
        (IntegrityError::UnsuitableChildTypeTree(1), "UnsuitableChildTypeTree"),
        (IntegrityError::UnsupportedOperator(1), "UnsupportedOperator"),
        (
            IntegrityError::NonStructuralChildrenMustComeLast(1),
            "NonStructuralChildrenMustComeLast",
        ),
        (IntegrityError::UnsuitablePluckOrder(1), "UnsuitablePluckOrder"),
        (IntegrityError::TreeTooDeep(1), "TreeTooDeep"),
    ];

    for (error, name) in cases {
        assert_eq!(error.as_str(), name);
        assert_eq!(error.index(), Some(if name == "UnsuitableRootNode" { 0 } else { 1 }));
    }
}

/// WHY: Codes are written into packed trees
/// BREAKS: Every stored tree if a code moves
#[test]
fn operator_codes_are_pinned() {
    let pinned = [
        (Operator::Pass, 0),
        (Operator::And, 1),
        (Operator::Or, 2),
        (Operator::Nor, 3),
        (Operator::Matches, 5),
        (Operator::ArraySome, 6),
        (Operator::ArrayEvery, 7),
        (Operator::ArraySubset, 8),
        (Operator::ZipSome, 9),
        (Operator::ZipEvery, 10),
        (Operator::Pluck, 11),
        (Operator::Slice, 12),
        (Operator::EqualToAvatar, 15),
        (Operator::EqualTo, 16),
        (Operator::GreaterThan, 17),
        (Operator::LessThan, 18),
        (Operator::SignedIntGreaterThan, 19),
        (Operator::SignedIntLessThan, 20),
        (Operator::Bitmask, 21),
        (Operator::WithinAllowance, 28),
        (Operator::EtherWithinAllowance, 29),
        (Operator::CallWithinAllowance, 30),
    ];

    assert_eq!(pinned.len(), Operator::ALL.len());
    for (operator, code) in pinned {
        assert_eq!(operator.as_u8(), code, "{} code changed", operator);
        assert_eq!(Operator::from_u8(code), Some(operator));
    }
    for unused in [4u8, 13, 14, 22, 27, 31, 255] {
        assert_eq!(Operator::from_u8(unused), None);
    }
}

#[test]
fn encoding_codes_are_pinned() {
    let pinned = [
        (Encoding::None, 0),
        (Encoding::Static, 1),
        (Encoding::Dynamic, 2),
        (Encoding::Tuple, 3),
        (Encoding::Array, 4),
        (Encoding::AbiEncoded, 5),
        (Encoding::EtherValue, 6),
    ];

    for (encoding, code) in pinned {
        assert_eq!(encoding.as_u8(), code);
        assert_eq!(Encoding::from_u8(code), Some(encoding));
    }
    assert_eq!(Encoding::from_u8(7), None);
}

/// WHY: Tree files name operators and encodings in camelCase
#[test]
fn tree_file_names_are_camel_case() {
    assert_eq!(serde_json::to_value(Operator::EqualToAvatar).unwrap(), "equalToAvatar");
    assert_eq!(serde_json::to_value(Encoding::AbiEncoded).unwrap(), "abiEncoded");
    assert_eq!(serde_json::to_value(Encoding::EtherValue).unwrap(), "etherValue");
}
