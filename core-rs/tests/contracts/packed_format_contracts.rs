// Packed Format Contract Tests
//
// Packed trees are stored and exchanged between processes, and their
// content hash is the key every scope points at. The byte layout and the
// hashing rule must not drift.

use rolecheck::condition::{self, pack, unpack, Encoding, IntegrityError, Operator, PackError, RawNode};
use sha2::{Digest, Sha256};

fn sample() -> Vec<RawNode> {
    let mut one = vec![0u8; 32];
    one[31] = 1;
    vec![
        RawNode::new(
            0,
            Encoding::AbiEncoded,
            Operator::Matches,
            vec![0x00, 0x04, 0xde, 0xad, 0xbe, 0xef],
        ),
        RawNode::new(0, Encoding::Static, Operator::EqualTo, one),
    ]
}

/// WHY: Stored trees must decode identically in every release
/// BREAKS: Every persisted tree and every handle derived from it
#[test]
fn packed_layout_is_pinned() {
    let packed = pack(&sample()).unwrap();

    let mut expected = vec![
        b'R', b'C', // magic
        0x01, // version
        0x00, 0x02, // node count
        0x00, 0x00, 0x05, 0x05, 0x00, 0x06, 0x00, 0x04, 0xde, 0xad, 0xbe, 0xef,
        0x00, 0x00, 0x01, 0x10, 0x00, 0x20,
    ];
    expected.extend_from_slice(&[0u8; 31]);
    expected.push(0x01);

    assert_eq!(packed.bytes(), expected.as_slice());
}

/// WHY: Handles are domain-separated SHA-256 over the packed bytes
/// REASON: identical trees must collapse to one stored copy across processes
#[test]
fn handle_is_domain_separated_sha256() {
    let packed = pack(&sample()).unwrap();

    let mut hasher = Sha256::new();
    hasher.update(b"rolecheck:tree:v1");
    hasher.update(packed.bytes());
    let digest = hasher.finalize();

    assert_eq!(&packed.handle().0[..], &digest[..]);
    assert_eq!(condition::check(sample()).unwrap().handle(), packed.handle());
}

/// WHY: Packing re-validates ordering before anything is hashed
#[test]
fn pack_rejects_malformed_lists() {
    assert!(matches!(
        pack(&[]),
        Err(IntegrityError::MalformedTree { .. })
    ));

    let mut rooted_elsewhere = sample();
    rooted_elsewhere[0].parent = 1;
    assert_eq!(
        pack(&rooted_elsewhere).unwrap_err(),
        IntegrityError::UnsuitableRootNode
    );

    let mut forward_parent = sample();
    forward_parent.push(RawNode::new(3, Encoding::Static, Operator::Pass, vec![]));
    assert!(matches!(
        pack(&forward_parent),
        Err(IntegrityError::MalformedTree { index: 2, .. })
    ));
}

/// WHY: Corrupted packed bytes must never decode to a different tree
#[test]
fn unpack_rejects_corruption() {
    let bytes = pack(&sample()).unwrap().into_bytes();

    let mut bad_magic = bytes.clone();
    bad_magic[0] = b'X';
    assert_eq!(unpack(&bad_magic), Err(PackError::BadMagic));

    let mut future = bytes.clone();
    future[2] = 2;
    assert_eq!(unpack(&future), Err(PackError::UnsupportedVersion(2)));

    assert!(matches!(
        unpack(&bytes[..bytes.len() - 1]),
        Err(PackError::Truncated(_))
    ));

    let mut trailing = bytes.clone();
    trailing.push(0);
    assert_eq!(unpack(&trailing), Err(PackError::TrailingBytes(1)));

    let mut unknown_operator = bytes.clone();
    unknown_operator[8] = 4;
    assert_eq!(
        unpack(&unknown_operator),
        Err(PackError::UnknownOperator { index: 0, code: 4 })
    );

    let mut unknown_encoding = bytes;
    unknown_encoding[7] = 9;
    assert_eq!(
        unpack(&unknown_encoding),
        Err(PackError::UnknownEncoding { index: 0, code: 9 })
    );
}
