//! Condition tree model
//!
//! A permission is a tree of condition nodes. Each node declares how its
//! bytes are laid out in the payload (`Encoding`), what it checks
//! (`Operator`), an optional comparison value and ordered children.
//!
//! Trees travel in two forms:
//! - `Condition`: nested, convenient to author (YAML tree files, tests)
//! - `RawNode` list: flattened with explicit parent indices, node 0 is the
//!   root and every parent index is strictly smaller than its child's
//!
//! Accepted trees are held as an immutable `ConditionTree` arena produced by
//! the integrity checker.

pub mod comp_value;
pub mod integrity;
pub mod packing;
pub mod shape;
pub mod store;

pub use integrity::{check, IntegrityError};
pub use packing::{pack, unpack, PackError, PackedTree, TreeHandle};
pub use shape::Shape;
pub use store::{ConditionStore, Scope};

use crate::primitives::hex_bytes;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// How a node's bytes are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum Encoding {
    /// No payload bytes; hosts logical and resource operators
    None = 0,
    /// One 32-byte word
    Static = 1,
    /// Length-prefixed byte string
    Dynamic = 2,
    /// Ordered fixed set of fields
    Tuple = 3,
    /// Length-prefixed sequence of same-shaped elements
    Array = 4,
    /// Self-contained encoded region behind a leading-bytes header
    AbiEncoded = 5,
    /// The attached value transfer, not part of the payload
    EtherValue = 6,
}

impl Encoding {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0 => Encoding::None,
            1 => Encoding::Static,
            2 => Encoding::Dynamic,
            3 => Encoding::Tuple,
            4 => Encoding::Array,
            5 => Encoding::AbiEncoded,
            6 => Encoding::EtherValue,
            _ => return None,
        })
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Encoding::None => "None",
            Encoding::Static => "Static",
            Encoding::Dynamic => "Dynamic",
            Encoding::Tuple => "Tuple",
            Encoding::Array => "Array",
            Encoding::AbiEncoded => "AbiEncoded",
            Encoding::EtherValue => "EtherValue",
        }
    }

    /// Encodings that can describe payload structure in a pure type tree
    pub const fn is_payload(&self) -> bool {
        !matches!(self, Encoding::None | Encoding::EtherValue)
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a node checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum Operator {
    Pass = 0,
    And = 1,
    Or = 2,
    Nor = 3,
    Matches = 5,
    ArraySome = 6,
    ArrayEvery = 7,
    ArraySubset = 8,
    ZipSome = 9,
    ZipEvery = 10,
    Pluck = 11,
    Slice = 12,
    EqualToAvatar = 15,
    EqualTo = 16,
    GreaterThan = 17,
    LessThan = 18,
    SignedIntGreaterThan = 19,
    SignedIntLessThan = 20,
    Bitmask = 21,
    WithinAllowance = 28,
    EtherWithinAllowance = 29,
    CallWithinAllowance = 30,
}

impl Operator {
    pub const ALL: [Operator; 22] = [
        Operator::Pass,
        Operator::And,
        Operator::Or,
        Operator::Nor,
        Operator::Matches,
        Operator::ArraySome,
        Operator::ArrayEvery,
        Operator::ArraySubset,
        Operator::ZipSome,
        Operator::ZipEvery,
        Operator::Pluck,
        Operator::Slice,
        Operator::EqualToAvatar,
        Operator::EqualTo,
        Operator::GreaterThan,
        Operator::LessThan,
        Operator::SignedIntGreaterThan,
        Operator::SignedIntLessThan,
        Operator::Bitmask,
        Operator::WithinAllowance,
        Operator::EtherWithinAllowance,
        Operator::CallWithinAllowance,
    ];

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        Operator::ALL.iter().copied().find(|op| op.as_u8() == code)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Operator::Pass => "Pass",
            Operator::And => "And",
            Operator::Or => "Or",
            Operator::Nor => "Nor",
            Operator::Matches => "Matches",
            Operator::ArraySome => "ArraySome",
            Operator::ArrayEvery => "ArrayEvery",
            Operator::ArraySubset => "ArraySubset",
            Operator::ZipSome => "ZipSome",
            Operator::ZipEvery => "ZipEvery",
            Operator::Pluck => "Pluck",
            Operator::Slice => "Slice",
            Operator::EqualToAvatar => "EqualToAvatar",
            Operator::EqualTo => "EqualTo",
            Operator::GreaterThan => "GreaterThan",
            Operator::LessThan => "LessThan",
            Operator::SignedIntGreaterThan => "SignedIntGreaterThan",
            Operator::SignedIntLessThan => "SignedIntLessThan",
            Operator::Bitmask => "Bitmask",
            Operator::WithinAllowance => "WithinAllowance",
            Operator::EtherWithinAllowance => "EtherWithinAllowance",
            Operator::CallWithinAllowance => "CallWithinAllowance",
        }
    }

    /// `And`, `Or`, `Nor`
    pub const fn is_logical(&self) -> bool {
        matches!(self, Operator::And | Operator::Or | Operator::Nor)
    }

    pub const fn is_array_quantifier(&self) -> bool {
        matches!(
            self,
            Operator::ArraySome | Operator::ArrayEvery | Operator::ArraySubset
        )
    }

    pub const fn is_zip(&self) -> bool {
        matches!(self, Operator::ZipSome | Operator::ZipEvery)
    }

    pub const fn is_allowance(&self) -> bool {
        matches!(
            self,
            Operator::WithinAllowance
                | Operator::EtherWithinAllowance
                | Operator::CallWithinAllowance
        )
    }

    /// Operators that never evaluate children
    pub const fn is_leaf(&self) -> bool {
        matches!(
            self,
            Operator::Pass
                | Operator::Pluck
                | Operator::EqualToAvatar
                | Operator::EqualTo
                | Operator::GreaterThan
                | Operator::LessThan
                | Operator::SignedIntGreaterThan
                | Operator::SignedIntLessThan
                | Operator::Bitmask
        ) || self.is_allowance()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One node of a flattened condition tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNode {
    pub parent: usize,
    pub encoding: Encoding,
    pub operator: Operator,
    #[serde(with = "hex_bytes", default)]
    pub comp_value: Vec<u8>,
}

impl RawNode {
    pub fn new(parent: usize, encoding: Encoding, operator: Operator, comp_value: Vec<u8>) -> Self {
        RawNode {
            parent,
            encoding,
            operator,
            comp_value,
        }
    }
}

/// Nested condition, the authoring form of a tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub encoding: Encoding,
    pub operator: Operator,
    #[serde(
        with = "hex_bytes",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub comp_value: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Condition>,
}

impl Condition {
    pub fn new(encoding: Encoding, operator: Operator) -> Self {
        Condition {
            encoding,
            operator,
            comp_value: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Leaf node with a comparison value
    pub fn leaf(encoding: Encoding, operator: Operator, comp_value: impl Into<Vec<u8>>) -> Self {
        Condition::new(encoding, operator).with_comp_value(comp_value)
    }

    /// Inner node with children and no comparison value
    pub fn node(encoding: Encoding, operator: Operator, children: Vec<Condition>) -> Self {
        Condition::new(encoding, operator).with_children(children)
    }

    pub fn with_comp_value(mut self, comp_value: impl Into<Vec<u8>>) -> Self {
        self.comp_value = comp_value.into();
        self
    }

    pub fn with_children(mut self, children: Vec<Condition>) -> Self {
        self.children = children;
        self
    }

    /// `Static` node that passes anything, the usual type-only placeholder
    pub fn static_pass() -> Self {
        Condition::new(Encoding::Static, Operator::Pass)
    }

    /// Flatten breadth-first; node 0 is the root and parents precede children
    pub fn flatten(&self) -> Vec<RawNode> {
        let mut out = Vec::new();
        let mut queue: VecDeque<(&Condition, usize)> = VecDeque::new();
        queue.push_back((self, 0));

        while let Some((condition, parent)) = queue.pop_front() {
            let index = out.len();
            out.push(RawNode::new(
                parent,
                condition.encoding,
                condition.operator,
                condition.comp_value.clone(),
            ));
            for child in &condition.children {
                queue.push_back((child, index));
            }
        }

        out
    }

    /// Rebuild the nested form from a flattened list
    ///
    /// Returns `None` if the list fails `packing::check_structure`: empty, a
    /// parent index that does not precede its child, or nested past
    /// `packing::MAX_DEPTH`.
    pub fn unflatten(nodes: &[RawNode]) -> Option<Condition> {
        packing::check_structure(nodes).ok()?;
        let children = child_lists(nodes)?;

        // children sit at higher indices, so a reverse pass sees them first
        let mut built: Vec<Option<Condition>> = vec![None; nodes.len()];
        for index in (0..nodes.len()).rev() {
            let node = &nodes[index];
            built[index] = Some(Condition {
                encoding: node.encoding,
                operator: node.operator,
                comp_value: node.comp_value.clone(),
                children: children[index]
                    .iter()
                    .filter_map(|&child| built[child].take())
                    .collect(),
            });
        }
        built[0].take()
    }
}

/// Child index lists for a flattened tree, in index order
///
/// Returns `None` if any non-root parent index is not strictly smaller than
/// its child's index.
pub(crate) fn child_lists(nodes: &[RawNode]) -> Option<Vec<Vec<usize>>> {
    let mut children = vec![Vec::new(); nodes.len()];
    for (index, node) in nodes.iter().enumerate().skip(1) {
        if node.parent >= index {
            return None;
        }
        children[node.parent].push(index);
    }
    Some(children)
}

/// A validated, immutable condition tree
///
/// Only the integrity checker constructs these; holding one means every
/// structural and type rule has been verified.
#[derive(Debug, Clone)]
pub struct ConditionTree {
    nodes: Vec<RawNode>,
    children: Vec<Vec<usize>>,
    shapes: Vec<Shape>,
    packed: PackedTree,
}

impl ConditionTree {
    pub(crate) fn new(
        nodes: Vec<RawNode>,
        children: Vec<Vec<usize>>,
        shapes: Vec<Shape>,
        packed: PackedTree,
    ) -> Self {
        ConditionTree {
            nodes,
            children,
            shapes,
            packed,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &RawNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[RawNode] {
        &self.nodes
    }

    pub fn children(&self, index: usize) -> &[usize] {
        &self.children[index]
    }

    pub fn shape(&self, index: usize) -> &Shape {
        &self.shapes[index]
    }

    pub fn handle(&self) -> TreeHandle {
        self.packed.handle()
    }

    pub fn packed(&self) -> &PackedTree {
        &self.packed
    }
}
