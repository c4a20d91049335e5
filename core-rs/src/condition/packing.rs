//! Packed storage form of a condition tree
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! "RC" | version u8 | count u16 | count × node
//! node = parent u16 | encoding u8 | operator u8 | comp_len u16 | comp bytes
//! ```
//!
//! The tree handle is a domain-separated SHA-256 over the packed bytes, so
//! two structurally identical trees share one handle and one stored copy.

use super::integrity::IntegrityError;
use super::{Encoding, Operator, RawNode};
use sha2::{Digest, Sha256};
use std::fmt;

pub const PACK_MAGIC: [u8; 2] = *b"RC";
pub const PACK_VERSION: u8 = 1;
pub const HANDLE_DOMAIN: &[u8] = b"rolecheck:tree:v1";
pub const MAX_NODES: usize = u16::MAX as usize;
pub const MAX_COMP_VALUE_LEN: usize = u16::MAX as usize;
/// Deepest root-to-leaf path, counting the root as depth 0
pub const MAX_DEPTH: usize = 64;

const HEADER_LEN: usize = 5;
const NODE_HEADER_LEN: usize = 6;

/// Content hash identifying a stored tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeHandle(pub [u8; 32]);

impl TreeHandle {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 8 hex digits, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for TreeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Errors decoding packed bytes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackError {
    #[error("not a packed condition tree (bad magic)")]
    BadMagic,

    #[error("unsupported packed tree version {0}")]
    UnsupportedVersion(u8),

    #[error("packed tree truncated at byte {0}")]
    Truncated(usize),

    #[error("{0} trailing bytes after packed tree")]
    TrailingBytes(usize),

    #[error("unknown encoding code {code} at node {index}")]
    UnknownEncoding { index: usize, code: u8 },

    #[error("unknown operator code {code} at node {index}")]
    UnknownOperator { index: usize, code: u8 },
}

/// Packed bytes plus their content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedTree {
    bytes: Vec<u8>,
    handle: TreeHandle,
}

impl PackedTree {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn handle(&self) -> TreeHandle {
        self.handle
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Hash packed bytes under the tree domain tag
pub fn content_hash(packed: &[u8]) -> TreeHandle {
    let mut hasher = Sha256::new();
    hasher.update(HANDLE_DOMAIN);
    hasher.update(packed);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    TreeHandle(out)
}

/// Verify the flattened ordering rules
///
/// Node 0 is the root and names itself as parent; every other node's parent
/// index is strictly smaller than its own.
/// No node sits more than `MAX_DEPTH` levels below the root.
pub fn check_structure(nodes: &[RawNode]) -> Result<(), IntegrityError> {
    if nodes.is_empty() {
        return Err(IntegrityError::MalformedTree {
            index: 0,
            reason: "tree has no nodes".to_string(),
        });
    }
    if nodes.len() > MAX_NODES {
        return Err(IntegrityError::MalformedTree {
            index: MAX_NODES,
            reason: format!("more than {} nodes", MAX_NODES),
        });
    }
    if nodes[0].parent != 0 {
        return Err(IntegrityError::UnsuitableRootNode);
    }
    let mut depth = vec![0usize; nodes.len()];
    for (index, node) in nodes.iter().enumerate() {
        if index > 0 && node.parent >= index {
            return Err(IntegrityError::MalformedTree {
                index,
                reason: format!("parent {} does not precede child", node.parent),
            });
        }
        if index > 0 {
            depth[index] = depth[node.parent] + 1;
            if depth[index] > MAX_DEPTH {
                return Err(IntegrityError::TreeTooDeep(index));
            }
        }
        if node.comp_value.len() > MAX_COMP_VALUE_LEN {
            return Err(IntegrityError::MalformedTree {
                index,
                reason: format!("compValue longer than {} bytes", MAX_COMP_VALUE_LEN),
            });
        }
    }
    Ok(())
}

/// Pack a flattened tree
///
/// # Errors
/// `UnsuitableRootNode` if the root's parent is not 0, `MalformedTree` for
/// an empty list, a parent that does not precede its child, or sizes beyond
/// the format's 16-bit fields.
/// `TreeTooDeep` past `MAX_DEPTH`.
pub fn pack(nodes: &[RawNode]) -> Result<PackedTree, IntegrityError> {
    check_structure(nodes)?;

    let body: usize = nodes
        .iter()
        .map(|node| NODE_HEADER_LEN + node.comp_value.len())
        .sum();
    let mut bytes = Vec::with_capacity(HEADER_LEN + body);
    bytes.extend_from_slice(&PACK_MAGIC);
    bytes.push(PACK_VERSION);
    bytes.extend_from_slice(&(nodes.len() as u16).to_be_bytes());

    for node in nodes {
        bytes.extend_from_slice(&(node.parent as u16).to_be_bytes());
        bytes.push(node.encoding.as_u8());
        bytes.push(node.operator.as_u8());
        bytes.extend_from_slice(&(node.comp_value.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&node.comp_value);
    }

    let handle = content_hash(&bytes);
    Ok(PackedTree { bytes, handle })
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], PackError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(PackError::Truncated(self.pos))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, PackError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, PackError> {
        let raw = self.take(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }
}

/// Decode packed bytes back into the flattened node list
pub fn unpack(bytes: &[u8]) -> Result<Vec<RawNode>, PackError> {
    let mut reader = Reader { bytes, pos: 0 };

    if reader.take(2)? != PACK_MAGIC {
        return Err(PackError::BadMagic);
    }
    let version = reader.u8()?;
    if version != PACK_VERSION {
        return Err(PackError::UnsupportedVersion(version));
    }

    let count = reader.u16()? as usize;
    let mut nodes = Vec::with_capacity(count);
    for index in 0..count {
        let parent = reader.u16()? as usize;
        let encoding_code = reader.u8()?;
        let operator_code = reader.u8()?;
        let encoding = Encoding::from_u8(encoding_code).ok_or(PackError::UnknownEncoding {
            index,
            code: encoding_code,
        })?;
        let operator = Operator::from_u8(operator_code).ok_or(PackError::UnknownOperator {
            index,
            code: operator_code,
        })?;
        let comp_len = reader.u16()? as usize;
        let comp_value = reader.take(comp_len)?.to_vec();
        nodes.push(RawNode::new(parent, encoding, operator, comp_value));
    }

    let trailing = bytes.len() - reader.pos;
    if trailing > 0 {
        return Err(PackError::TrailingBytes(trailing));
    }

    Ok(nodes)
}
