//! Integrity checker
//!
//! Runs once when a tree is submitted, never per evaluation. Every rule is
//! local to a node plus metadata computed in index order (parents precede
//! children) or reverse index order (children follow parents), so no pass
//! recurses.
//!
//! Passes:
//! 1. packing structure (root, parent ordering, size limits)
//! 2. per node: encoding/operator compatibility, child counts, compValue
//!    layout, pluck placement
//! 3. shapes, resolved bottom-up
//! 4. placement: root shape, child ordering under `Matches`, slice targets
//! 5. zip references, pairing types and evaluation order

use super::comp_value;
use super::packing;
use super::{child_lists, ConditionTree, Encoding, Operator, RawNode, Shape};
use std::collections::HashMap;
use tracing::{info, warn};

/// Most sub-conditions an `ArraySubset` node may carry
pub const MAX_SUBSET_CHILDREN: usize = 256;

/// Configuration-time rejections; the index names the offending node
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("malformed tree at node {index}: {reason}")]
    MalformedTree { index: usize, reason: String },

    #[error("unsuitable root node")]
    UnsuitableRootNode,

    #[error("node {0}: operator does not apply to this encoding")]
    UnsuitableParameterType(usize),

    #[error("node {0}: unsuitable compValue")]
    UnsuitableCompValue(usize),

    #[error("node {0}: leaf node cannot have children")]
    LeafNodeCannotHaveChildren(usize),

    #[error("node {0}: unsuitable child count")]
    UnsuitableChildCount(usize),

    #[error("node {0}: children do not form a suitable type tree")]
    UnsuitableChildTypeTree(usize),

    #[error("node {0}: operator not supported in this position")]
    UnsupportedOperator(usize),

    #[error("node {0}: non-structural children must come last")]
    NonStructuralChildrenMustComeLast(usize),

    #[error("node {0}: zip evaluated before the arrays it references are plucked")]
    UnsuitablePluckOrder(usize),

    #[error("node {0}: tree nested deeper than {} levels", packing::MAX_DEPTH)]
    TreeTooDeep(usize),
}

impl IntegrityError {
    /// Stable name callers can match on
    pub const fn as_str(&self) -> &'static str {
        match self {
            IntegrityError::MalformedTree { .. } => "MalformedTree",
            IntegrityError::UnsuitableRootNode => "UnsuitableRootNode",
            IntegrityError::UnsuitableParameterType(_) => "UnsuitableParameterType",
            IntegrityError::UnsuitableCompValue(_) => "UnsuitableCompValue",
            IntegrityError::LeafNodeCannotHaveChildren(_) => "LeafNodeCannotHaveChildren",
            IntegrityError::UnsuitableChildCount(_) => "UnsuitableChildCount",
            IntegrityError::UnsuitableChildTypeTree(_) => "UnsuitableChildTypeTree",
            IntegrityError::UnsupportedOperator(_) => "UnsupportedOperator",
            IntegrityError::NonStructuralChildrenMustComeLast(_) => {
                "NonStructuralChildrenMustComeLast"
            }
            IntegrityError::UnsuitablePluckOrder(_) => "UnsuitablePluckOrder",
            IntegrityError::TreeTooDeep(_) => "TreeTooDeep",
        }
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            IntegrityError::MalformedTree { index, .. } => Some(*index),
            IntegrityError::UnsuitableRootNode => Some(0),
            IntegrityError::UnsuitableParameterType(index)
            | IntegrityError::UnsuitableCompValue(index)
            | IntegrityError::LeafNodeCannotHaveChildren(index)
            | IntegrityError::UnsuitableChildCount(index)
            | IntegrityError::UnsuitableChildTypeTree(index)
            | IntegrityError::UnsupportedOperator(index)
            | IntegrityError::NonStructuralChildrenMustComeLast(index)
            | IntegrityError::UnsuitablePluckOrder(index)
            | IntegrityError::TreeTooDeep(index) => Some(*index),
        }
    }
}

type CheckResult<T> = Result<T, IntegrityError>;

/// Validate a flattened tree and build its immutable arena
pub fn check(nodes: Vec<RawNode>) -> CheckResult<ConditionTree> {
    match validate(&nodes) {
        Ok((children, shapes)) => {
            let packed = packing::pack(&nodes)?;
            info!(
                "Condition tree {} accepted ({} nodes)",
                packed.handle().short(),
                nodes.len()
            );
            Ok(ConditionTree::new(nodes, children, shapes, packed))
        }
        Err(e) => {
            warn!("Condition tree rejected: {} ({})", e, e.as_str());
            Err(e)
        }
    }
}

fn validate(nodes: &[RawNode]) -> CheckResult<(Vec<Vec<usize>>, Vec<Shape>)> {
    packing::check_structure(nodes)?;
    let children = child_lists(nodes).ok_or_else(|| IntegrityError::MalformedTree {
        index: 0,
        reason: "parent does not precede child".to_string(),
    })?;

    let pure = pure_type_flags(nodes, &children);
    let plucks = check_nodes(nodes, &children, &pure)?;
    let shapes = resolve_shapes(nodes, &children)?;
    check_placement(nodes, &children, &shapes)?;
    check_zips(nodes, &children, &shapes, &plucks)?;

    Ok((children, shapes))
}

/// Nodes whose whole subtree is `Pass` over payload encodings
fn pure_type_flags(nodes: &[RawNode], children: &[Vec<usize>]) -> Vec<bool> {
    let mut pure = vec![false; nodes.len()];
    for index in (0..nodes.len()).rev() {
        let node = &nodes[index];
        pure[index] = node.operator == Operator::Pass
            && node.encoding.is_payload()
            && children[index].iter().all(|&child| pure[child]);
    }
    pure
}

fn encoding_allowed(operator: Operator, encoding: Encoding) -> bool {
    use Encoding as E;
    use Operator as O;

    match operator {
        O::Pass => true,
        O::And | O::Or | O::Nor => encoding == E::None,
        O::Matches => matches!(encoding, E::Tuple | E::Array | E::AbiEncoded),
        O::ArraySome | O::ArrayEvery | O::ArraySubset => encoding == E::Array,
        O::ZipSome | O::ZipEvery => encoding == E::None,
        O::Pluck => matches!(encoding, E::Static | E::Dynamic | E::Array),
        O::Slice => matches!(encoding, E::Static | E::Dynamic),
        O::EqualToAvatar => encoding == E::Static,
        O::EqualTo => encoding != E::None,
        O::GreaterThan | O::LessThan | O::SignedIntGreaterThan | O::SignedIntLessThan => {
            matches!(encoding, E::Static | E::EtherValue)
        }
        O::Bitmask => matches!(encoding, E::Static | E::Dynamic),
        O::WithinAllowance => matches!(encoding, E::Static | E::EtherValue),
        O::EtherWithinAllowance | O::CallWithinAllowance => encoding == E::None,
    }
}

fn check_child_count(
    node: &RawNode,
    index: usize,
    children: &[usize],
    pure: &[bool],
) -> CheckResult<()> {
    let count = children.len();

    if node.operator.is_leaf() {
        if count == 0 {
            return Ok(());
        }
        // type-only children describe the layout of a composite value
        let composite = matches!(
            node.encoding,
            Encoding::Tuple | Encoding::Array | Encoding::AbiEncoded
        );
        let type_only = children.iter().all(|&child| pure[child]);
        if !composite || !type_only || (node.encoding == Encoding::Array && count > 1) {
            return Err(IntegrityError::LeafNodeCannotHaveChildren(index));
        }
        return Ok(());
    }

    let suitable = match node.operator {
        Operator::ArraySome
        | Operator::ArrayEvery
        | Operator::ZipSome
        | Operator::ZipEvery
        | Operator::Slice => count == 1,
        Operator::ArraySubset => (1..=MAX_SUBSET_CHILDREN).contains(&count),
        _ => count >= 1,
    };
    if !suitable {
        return Err(IntegrityError::UnsuitableChildCount(index));
    }
    Ok(())
}

fn comp_value_suitable(node: &RawNode) -> bool {
    use Encoding as E;
    use Operator as O;

    let value = node.comp_value.as_slice();
    match node.operator {
        O::Pass | O::Matches if node.encoding == E::AbiEncoded => {
            comp_value::leading_bytes(value).is_some()
        }
        O::Pass
        | O::And
        | O::Or
        | O::Nor
        | O::Matches
        | O::ArraySome
        | O::ArrayEvery
        | O::ArraySubset
        | O::EqualToAvatar => value.is_empty(),
        O::EqualTo => match node.encoding {
            E::Static | E::EtherValue => value.len() == 32,
            E::Dynamic | E::AbiEncoded => true,
            E::Tuple | E::Array => !value.is_empty() && value.len() % 32 == 0,
            E::None => false,
        },
        O::GreaterThan
        | O::LessThan
        | O::SignedIntGreaterThan
        | O::SignedIntLessThan
        | O::WithinAllowance
        | O::EtherWithinAllowance
        | O::CallWithinAllowance => value.len() == 32,
        O::Bitmask => comp_value::bitmask(value).map_or(false, |spec| {
            node.encoding != E::Static || spec.shift + spec.mask.len() <= 32
        }),
        O::Pluck => comp_value::pluck_index(value).is_some(),
        O::ZipSome | O::ZipEvery => comp_value::zip_indices(value).is_some(),
        O::Slice => comp_value::slice_range(value)
            .map_or(false, |range| node.encoding != E::Static || range.end() <= 32),
    }
}

/// Forward pass over every node; returns pluck index → node index
fn check_nodes(
    nodes: &[RawNode],
    children: &[Vec<usize>],
    pure: &[bool],
) -> CheckResult<HashMap<u8, usize>> {
    let mut plucks = HashMap::new();
    // every ancestor is Matches or And
    let mut plain_path = vec![true; nodes.len()];
    let mut inside_zip = vec![false; nodes.len()];

    for (index, node) in nodes.iter().enumerate() {
        if index > 0 {
            let parent = &nodes[node.parent];
            plain_path[index] = plain_path[node.parent]
                && matches!(parent.operator, Operator::Matches | Operator::And);
            inside_zip[index] = inside_zip[node.parent] || parent.operator.is_zip();
        }

        if !encoding_allowed(node.operator, node.encoding) {
            return Err(IntegrityError::UnsuitableParameterType(index));
        }
        check_child_count(node, index, &children[index], pure)?;
        if !comp_value_suitable(node) {
            return Err(IntegrityError::UnsuitableCompValue(index));
        }

        if inside_zip[index] && (node.operator == Operator::Pluck || node.operator.is_zip()) {
            return Err(IntegrityError::UnsupportedOperator(index));
        }
        if node.operator == Operator::Pluck {
            if !plain_path[index] {
                return Err(IntegrityError::UnsupportedOperator(index));
            }
            let pluck = comp_value::pluck_index(&node.comp_value)
                .ok_or(IntegrityError::UnsuitableCompValue(index))?;
            if plucks.insert(pluck, index).is_some() {
                return Err(IntegrityError::UnsuitableCompValue(index));
            }
        }
    }

    Ok(plucks)
}

/// Resolve every node's shape, children first
fn resolve_shapes(nodes: &[RawNode], children: &[Vec<usize>]) -> CheckResult<Vec<Shape>> {
    let mut shapes = vec![Shape::Unplaced; nodes.len()];
    for index in (0..nodes.len()).rev() {
        shapes[index] = shape_of(&nodes[index], index, &children[index], &shapes)?;
    }
    Ok(shapes)
}

fn shape_of(
    node: &RawNode,
    index: usize,
    children: &[usize],
    shapes: &[Shape],
) -> CheckResult<Shape> {
    let positional: Vec<&Shape> = children
        .iter()
        .map(|&child| &shapes[child])
        .filter(|shape| shape.is_positional())
        .collect();

    let shape = match node.encoding {
        Encoding::Static => Shape::Static,
        Encoding::Dynamic => Shape::Dynamic,
        Encoding::AbiEncoded => Shape::AbiEncoded,
        Encoding::EtherValue => Shape::Ether,
        Encoding::None if node.operator.is_logical() => match positional.split_first() {
            Some((first, rest)) => {
                if rest.iter().any(|shape| shape != first) {
                    return Err(IntegrityError::UnsuitableChildTypeTree(index));
                }
                (*first).clone()
            }
            None => Shape::Unplaced,
        },
        Encoding::None => Shape::Unplaced,
        Encoding::Tuple => {
            if positional.is_empty() {
                return Err(IntegrityError::UnsuitableChildCount(index));
            }
            Shape::Tuple(positional.into_iter().cloned().collect())
        }
        Encoding::Array => {
            if node.operator.is_array_quantifier() && positional.len() != children.len() {
                return Err(IntegrityError::UnsuitableChildTypeTree(index));
            }
            let (first, rest) = positional
                .split_first()
                .ok_or(IntegrityError::UnsuitableChildCount(index))?;
            if rest.iter().any(|shape| shape != first) {
                return Err(IntegrityError::UnsuitableChildTypeTree(index));
            }
            Shape::Array(Box::new((*first).clone()))
        }
    };
    Ok(shape)
}

fn check_placement(
    nodes: &[RawNode],
    children: &[Vec<usize>],
    shapes: &[Shape],
) -> CheckResult<()> {
    if !matches!(shapes[0], Shape::AbiEncoded | Shape::Ether | Shape::Unplaced) {
        return Err(IntegrityError::UnsuitableRootNode);
    }

    for (index, node) in nodes.iter().enumerate() {
        match node.operator {
            Operator::Matches => {
                let mut structural = true;
                for &child in &children[index] {
                    let positional = shapes[child].is_positional();
                    if positional && !structural {
                        return Err(IntegrityError::NonStructuralChildrenMustComeLast(index));
                    }
                    structural = positional;
                }
            }
            Operator::Slice => {
                let child = children[index][0];
                let range = comp_value::slice_range(&node.comp_value)
                    .ok_or(IntegrityError::UnsuitableCompValue(index))?;
                match shapes[child] {
                    Shape::Static if range.size > 32 => {
                        return Err(IntegrityError::UnsuitableCompValue(index))
                    }
                    Shape::Static | Shape::Dynamic => {}
                    _ => return Err(IntegrityError::UnsuitableChildTypeTree(index)),
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Depth-first pre-order position of every node
fn preorder_positions(children: &[Vec<usize>]) -> Vec<usize> {
    let count = children.len();
    let mut sizes = vec![1usize; count];
    for index in (0..count).rev() {
        sizes[index] += children[index].iter().map(|&c| sizes[c]).sum::<usize>();
    }

    let mut positions = vec![0usize; count];
    for index in 0..count {
        let mut next = positions[index] + 1;
        for &child in &children[index] {
            positions[child] = next;
            next += sizes[child];
        }
    }
    positions
}

fn check_zips(
    nodes: &[RawNode],
    children: &[Vec<usize>],
    shapes: &[Shape],
    plucks: &HashMap<u8, usize>,
) -> CheckResult<()> {
    let zips: Vec<usize> = (0..nodes.len())
        .filter(|&index| nodes[index].operator.is_zip())
        .collect();
    if zips.is_empty() {
        return Ok(());
    }
    let positions = preorder_positions(children);

    for index in zips {
        let refs = comp_value::zip_indices(&nodes[index].comp_value)
            .ok_or(IntegrityError::UnsuitableCompValue(index))?;

        let mut element_shapes = Vec::with_capacity(refs.len());
        for pluck in refs {
            let source = *plucks
                .get(pluck)
                .ok_or(IntegrityError::UnsuitableCompValue(index))?;
            let Shape::Array(element) = &shapes[source] else {
                return Err(IntegrityError::UnsuitableCompValue(index));
            };
            if positions[source] >= positions[index] {
                return Err(IntegrityError::UnsuitablePluckOrder(index));
            }
            element_shapes.push(element.as_ref().clone());
        }

        let child = children[index][0];
        match &shapes[child] {
            Shape::Tuple(fields) if *fields == element_shapes => {}
            _ => return Err(IntegrityError::UnsuitableChildTypeTree(index)),
        }

        // zipped tuples are matched field by field
        let mut stack = vec![child];
        while let Some(at) = stack.pop() {
            let node = &nodes[at];
            match node.encoding {
                Encoding::Tuple => {
                    if !matches!(node.operator, Operator::Matches | Operator::Pass) {
                        return Err(IntegrityError::UnsupportedOperator(at));
                    }
                }
                Encoding::None if node.operator.is_logical() => stack.extend(
                    children[at]
                        .iter()
                        .copied()
                        .filter(|&c| shapes[c].is_positional()),
                ),
                _ => {}
            }
        }
    }
    Ok(())
}
