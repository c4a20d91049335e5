//! Operator evaluator
//!
//! Walks an accepted `ConditionTree` against one operation depth first,
//! locating each node's bytes with the decoder as it goes. The walk never
//! mutates the allowance ledger: resource operators preview balances and
//! emit `Consumption` intents that the caller commits only once the whole
//! operation has succeeded.
//!
//! Failures name the node that failed. A payload that cannot be decoded
//! (`CalldataOutOfBounds`) fails the whole evaluation, even inside an `Or`
//! or `ArraySome` that might otherwise have tried another branch.

pub mod status;

pub use status::{Status, Violation};

use crate::allowance::AllowanceLedger;
use crate::condition::comp_value;
use crate::condition::{ConditionTree, Encoding, Operator, Shape};
use crate::decoder::word::{self, Word};
use crate::decoder::{self, OutOfBounds};
use crate::primitives::{Address, AllowanceKey};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Provisional debit of one allowance, aggregated per key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Consumption {
    pub allowance_key: AllowanceKey,
    /// Balance available when the key was first touched
    pub balance: u128,
    pub consumed: u128,
}

/// Everything one evaluation reads
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub payload: &'a [u8],
    pub value: u128,
    pub avatar: Address,
    pub ledger: &'a AllowanceLedger,
    pub now: u64,
}

/// Evaluate a tree; `consumptions` carries intents from earlier operations
/// of the same batch
pub fn evaluate<'a>(
    tree: &'a ConditionTree,
    context: &Context<'a>,
    consumptions: Vec<Consumption>,
) -> Result<Vec<Consumption>, Violation> {
    let mut walker = Walker {
        tree,
        ether: word::from_u128(context.value),
        avatar: context.avatar.to_word(),
        ledger: context.ledger,
        now: context.now,
        plucked: HashMap::new(),
    };

    let result = walker.walk(0, &View::Borrowed(context.payload), consumptions);
    if let Err(violation) = &result {
        debug!(
            "Tree {} failed: {} at node {}",
            tree.handle().short(),
            violation.status,
            violation.index
        );
    }
    result
}

/// The bytes a node stands for
#[derive(Debug, Clone)]
enum View<'a> {
    Borrowed(&'a [u8]),
    /// Re-viewed bytes produced by `Slice`
    Owned(Vec<u8>),
    /// One element from each zipped array, read as the fields of a tuple
    Zipped(Vec<&'a [u8]>),
}

impl<'a> View<'a> {
    fn bytes(&self) -> Option<&[u8]> {
        match self {
            View::Borrowed(bytes) => Some(bytes),
            View::Owned(bytes) => Some(bytes),
            View::Zipped(_) => None,
        }
    }

    /// A region of the payload itself
    fn region(&self) -> Option<&'a [u8]> {
        match self {
            View::Borrowed(bytes) => Some(bytes),
            View::Owned(_) | View::Zipped(_) => None,
        }
    }
}

type Walk = Result<Vec<Consumption>, Violation>;

struct Walker<'a> {
    tree: &'a ConditionTree,
    ether: Word,
    avatar: Word,
    ledger: &'a AllowanceLedger,
    now: u64,
    plucked: HashMap<u8, &'a [u8]>,
}

fn fail(status: Status, index: usize) -> Violation {
    Violation::new(status, index)
}

fn out_of_bounds(index: usize) -> impl Fn(OutOfBounds) -> Violation {
    move |e| {
        debug!("Node {}: {}", index, e);
        fail(Status::CalldataOutOfBounds, index)
    }
}

impl<'a> Walker<'a> {
    fn walk(&mut self, index: usize, view: &View<'a>, consumptions: Vec<Consumption>) -> Walk {
        let tree = self.tree;
        let node = tree.node(index);
        match node.operator {
            Operator::Pass => Ok(consumptions),
            Operator::Matches => self.matches(index, view, consumptions),
            Operator::And => {
                let mut consumptions = consumptions;
                for &child in tree.children(index) {
                    consumptions = self.walk(child, view, consumptions)?;
                }
                Ok(consumptions)
            }
            Operator::Or => {
                for &child in tree.children(index) {
                    if let Some(passed) = self.attempt(child, view, &consumptions)? {
                        return Ok(passed);
                    }
                }
                Err(fail(Status::OrViolation, index))
            }
            Operator::Nor => {
                for &child in tree.children(index) {
                    if self.attempt(child, view, &consumptions)?.is_some() {
                        return Err(fail(Status::NorViolation, index));
                    }
                }
                Ok(consumptions)
            }
            Operator::ArraySome | Operator::ArrayEvery | Operator::ArraySubset => {
                self.array(index, view, consumptions)
            }
            Operator::ZipSome | Operator::ZipEvery => self.zip(index, consumptions),
            Operator::Pluck => {
                let region = view
                    .region()
                    .ok_or_else(|| fail(Status::ParameterNotAMatch, index))?;
                if let Some(pluck) = comp_value::pluck_index(&node.comp_value) {
                    self.plucked.insert(pluck, region);
                }
                Ok(consumptions)
            }
            Operator::Slice => self.slice(index, view, consumptions),
            Operator::EqualToAvatar => {
                let value = self.word(index, view)?;
                if value != self.avatar {
                    return Err(fail(Status::ParameterNotAllowed, index).with_info(value));
                }
                Ok(consumptions)
            }
            Operator::EqualTo => {
                self.equal_to(index, view)?;
                Ok(consumptions)
            }
            Operator::GreaterThan
            | Operator::LessThan
            | Operator::SignedIntGreaterThan
            | Operator::SignedIntLessThan => {
                self.compare(index, view)?;
                Ok(consumptions)
            }
            Operator::Bitmask => {
                self.bitmask(index, view)?;
                Ok(consumptions)
            }
            Operator::WithinAllowance => {
                let value = self.word(index, view)?;
                let key = self.allowance_key(index)?;
                match word::to_u128(&value) {
                    Some(amount) => self.consume(index, key, amount, consumptions),
                    None => Err(fail(Status::AllowanceExceeded, index).with_info(key.0)),
                }
            }
            Operator::EtherWithinAllowance => {
                let key = self.allowance_key(index)?;
                let amount = word::to_u128(&self.ether).unwrap_or(u128::MAX);
                self.consume(index, key, amount, consumptions)
            }
            Operator::CallWithinAllowance => {
                let key = self.allowance_key(index)?;
                self.consume(index, key, 1, consumptions)
            }
        }
    }

    /// Evaluate a child on a copy of the intents; `None` if it failed
    fn attempt(
        &mut self,
        child: usize,
        view: &View<'a>,
        consumptions: &[Consumption],
    ) -> Result<Option<Vec<Consumption>>, Violation> {
        match self.walk(child, view, consumptions.to_vec()) {
            Ok(passed) => Ok(Some(passed)),
            Err(violation) if violation.status.is_fatal() => Err(violation),
            Err(_) => Ok(None),
        }
    }

    fn region(&self, index: usize, view: &View<'a>) -> Result<&'a [u8], Violation> {
        view.region()
            .ok_or_else(|| fail(Status::ParameterNotAMatch, index))
    }

    /// Content of an `AbiEncoded` node past its leading bytes
    fn abi_body(&self, index: usize, view: &View<'a>) -> Result<&'a [u8], Violation> {
        let bytes = self.region(index, view)?;
        let node = self.tree.node(index);
        let leading = comp_value::leading_bytes(&node.comp_value)
            .ok_or_else(|| fail(Status::LeadingBytesNotAMatch, index))?;
        if bytes.len() < leading.count {
            return Err(fail(Status::CalldataOutOfBounds, index));
        }
        let (head, body) = bytes.split_at(leading.count);
        if let Some(expected) = leading.expected {
            if head != expected {
                return Err(fail(Status::LeadingBytesNotAMatch, index).with_info(head));
            }
        }
        Ok(body)
    }

    fn matches(&mut self, index: usize, view: &View<'a>, consumptions: Vec<Consumption>) -> Walk {
        let tree = self.tree;
        let node = tree.node(index);
        let children = tree.children(index);
        let split = children
            .iter()
            .position(|&child| !tree.shape(child).is_positional())
            .unwrap_or(children.len());
        let (positional, rest) = children.split_at(split);

        let fields: Vec<&'a [u8]> = match (node.encoding, view) {
            (Encoding::Tuple, View::Zipped(fields)) => fields.clone(),
            (Encoding::Tuple, _) | (Encoding::AbiEncoded, _) => {
                let head = if node.encoding == Encoding::AbiEncoded {
                    self.abi_body(index, view)?
                } else {
                    self.region(index, view)?
                };
                let shapes = positional.iter().map(|&child| tree.shape(child));
                decoder::tuple_fields(head, shapes).map_err(out_of_bounds(index))?
            }
            (Encoding::Array, _) => {
                let elements = self.elements(index, view)?;
                if elements.len() != positional.len() {
                    return Err(fail(Status::ParameterNotAMatch, index));
                }
                elements
            }
            _ => return Err(fail(Status::ParameterNotAMatch, index)),
        };
        if fields.len() != positional.len() {
            return Err(fail(Status::ParameterNotAMatch, index));
        }

        let mut consumptions = consumptions;
        for (&child, field) in positional.iter().zip(fields) {
            consumptions = self.walk(child, &View::Borrowed(field), consumptions)?;
        }
        for &child in rest {
            consumptions = self.walk(child, view, consumptions)?;
        }
        Ok(consumptions)
    }

    fn elements(&self, index: usize, view: &View<'a>) -> Result<Vec<&'a [u8]>, Violation> {
        let bytes = self.region(index, view)?;
        let Shape::Array(element) = self.tree.shape(index) else {
            return Err(fail(Status::ParameterNotAMatch, index));
        };
        decoder::array_elements(bytes, element).map_err(out_of_bounds(index))
    }

    fn array(&mut self, index: usize, view: &View<'a>, consumptions: Vec<Consumption>) -> Walk {
        let tree = self.tree;
        let elements = self.elements(index, view)?;
        let children = tree.children(index);

        match tree.node(index).operator {
            Operator::ArraySome => {
                let child = children[0];
                for element in elements {
                    if let Some(passed) = self.attempt(child, &View::Borrowed(element), &consumptions)? {
                        return Ok(passed);
                    }
                }
                Err(fail(Status::NoArrayElementPasses, index))
            }
            Operator::ArrayEvery => {
                let child = children[0];
                let mut consumptions = consumptions;
                for element in elements {
                    consumptions = self
                        .attempt(child, &View::Borrowed(element), &consumptions)?
                        .ok_or_else(|| fail(Status::NotEveryArrayElementPasses, index))?;
                }
                Ok(consumptions)
            }
            _ => {
                if elements.is_empty() || elements.len() > children.len() {
                    return Err(fail(Status::ParameterNotSubsetOfAllowed, index));
                }
                // elements in order, each takes the lowest unused passing sub-condition
                let mut used = vec![false; children.len()];
                let mut consumptions = consumptions;
                for element in elements {
                    let mut taken = false;
                    for (slot, &child) in children.iter().enumerate() {
                        if used[slot] {
                            continue;
                        }
                        if let Some(passed) =
                            self.attempt(child, &View::Borrowed(element), &consumptions)?
                        {
                            consumptions = passed;
                            used[slot] = true;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        return Err(fail(Status::ParameterNotSubsetOfAllowed, index));
                    }
                }
                Ok(consumptions)
            }
        }
    }

    fn zip(&mut self, index: usize, consumptions: Vec<Consumption>) -> Walk {
        let tree = self.tree;
        let node = tree.node(index);
        let child = tree.children(index)[0];
        let refs = comp_value::zip_indices(&node.comp_value)
            .ok_or_else(|| fail(Status::UnresolvedPluck, index))?;
        let Shape::Tuple(fields) = tree.shape(child) else {
            return Err(fail(Status::ParameterNotAMatch, index));
        };

        let mut arrays = Vec::with_capacity(refs.len());
        for (pluck, element) in refs.iter().zip(fields) {
            let bytes = *self
                .plucked
                .get(pluck)
                .ok_or_else(|| fail(Status::UnresolvedPluck, index).with_info(vec![*pluck]))?;
            arrays.push(decoder::array_elements(bytes, element).map_err(out_of_bounds(index))?);
        }

        let length = arrays.first().map_or(0, Vec::len);
        if arrays.iter().any(|array| array.len() != length) {
            return Err(fail(Status::ZippedArrayLengthMismatch, index));
        }

        let rows = (0..length).map(|i| View::Zipped(arrays.iter().map(|array| array[i]).collect()));
        if node.operator == Operator::ZipSome {
            for row in rows {
                if let Some(passed) = self.attempt(child, &row, &consumptions)? {
                    return Ok(passed);
                }
            }
            Err(fail(Status::NoZippedElementPasses, index))
        } else {
            let mut consumptions = consumptions;
            for row in rows {
                consumptions = self
                    .attempt(child, &row, &consumptions)?
                    .ok_or_else(|| fail(Status::NotEveryZippedElementPasses, index))?;
            }
            Ok(consumptions)
        }
    }

    fn slice(&mut self, index: usize, view: &View<'a>, consumptions: Vec<Consumption>) -> Walk {
        let tree = self.tree;
        let node = tree.node(index);
        let child = tree.children(index)[0];
        let range = comp_value::slice_range(&node.comp_value)
            .ok_or_else(|| fail(Status::CalldataOutOfBounds, index))?;
        let bytes = view
            .bytes()
            .ok_or_else(|| fail(Status::ParameterNotAMatch, index))?;
        let sub = bytes
            .get(range.shift..range.end())
            .ok_or_else(|| fail(Status::CalldataOutOfBounds, index))?;

        let sliced = if *tree.shape(child) == Shape::Static {
            let padded =
                word::to_word(sub).ok_or_else(|| fail(Status::CalldataOutOfBounds, index))?;
            View::Owned(padded.to_vec())
        } else {
            match view.region() {
                Some(region) => View::Borrowed(&region[range.shift..range.end()]),
                None => View::Owned(sub.to_vec()),
            }
        };
        self.walk(child, &sliced, consumptions)
    }

    /// The node's 32-byte value; `EtherValue` nodes read the transfer amount
    fn word(&self, index: usize, view: &View<'a>) -> Result<Word, Violation> {
        if self.tree.node(index).encoding == Encoding::EtherValue {
            return Ok(self.ether);
        }
        view.bytes()
            .and_then(|bytes| Word::try_from(bytes).ok())
            .ok_or_else(|| fail(Status::CalldataOutOfBounds, index))
    }

    fn equal_to(&self, index: usize, view: &View<'a>) -> Result<(), Violation> {
        let node = self.tree.node(index);
        let expected = node.comp_value.as_slice();
        let actual: Vec<u8> = match node.encoding {
            Encoding::Static | Encoding::EtherValue => self.word(index, view)?.to_vec(),
            Encoding::Tuple | Encoding::Array => {
                let region = self.region(index, view)?;
                decoder::encoded_region(self.tree.shape(index), region)
                    .map_err(out_of_bounds(index))?
                    .to_vec()
            }
            _ => view
                .bytes()
                .ok_or_else(|| fail(Status::ParameterNotAMatch, index))?
                .to_vec(),
        };
        if actual != expected {
            return Err(fail(Status::ParameterNotAllowed, index).with_info(actual));
        }
        Ok(())
    }

    fn compare(&self, index: usize, view: &View<'a>) -> Result<(), Violation> {
        let node = self.tree.node(index);
        let value = self.word(index, view)?;
        let bound = comp_value::word(&node.comp_value)
            .ok_or_else(|| fail(Status::ParameterNotAllowed, index))?;

        let (ordering, wanted, status) = match node.operator {
            Operator::GreaterThan => (
                word::cmp_unsigned(&value, &bound),
                Ordering::Greater,
                Status::ParameterLessThanAllowed,
            ),
            Operator::LessThan => (
                word::cmp_unsigned(&value, &bound),
                Ordering::Less,
                Status::ParameterGreaterThanAllowed,
            ),
            Operator::SignedIntGreaterThan => (
                word::cmp_signed(&value, &bound),
                Ordering::Greater,
                Status::ParameterLessThanAllowed,
            ),
            _ => (
                word::cmp_signed(&value, &bound),
                Ordering::Less,
                Status::ParameterGreaterThanAllowed,
            ),
        };
        if ordering != wanted {
            return Err(fail(status, index).with_info(value));
        }
        Ok(())
    }

    fn bitmask(&self, index: usize, view: &View<'a>) -> Result<(), Violation> {
        let node = self.tree.node(index);
        let spec = comp_value::bitmask(&node.comp_value)
            .ok_or_else(|| fail(Status::BitmaskNotAllowed, index))?;
        let bytes = view
            .bytes()
            .ok_or_else(|| fail(Status::ParameterNotAMatch, index))?;
        let window = bytes
            .get(spec.shift..spec.shift + spec.mask.len())
            .ok_or_else(|| fail(Status::BitmaskOverflow, index))?;

        let matched = window
            .iter()
            .zip(spec.mask)
            .zip(spec.expected)
            .all(|((value, mask), expected)| value & mask == *expected);
        if !matched {
            return Err(fail(Status::BitmaskNotAllowed, index).with_info(window));
        }
        Ok(())
    }

    fn allowance_key(&self, index: usize) -> Result<AllowanceKey, Violation> {
        comp_value::word(&self.tree.node(index).comp_value)
            .map(AllowanceKey)
            .ok_or_else(|| fail(Status::AllowanceExceeded, index))
    }

    fn consume(
        &self,
        index: usize,
        key: AllowanceKey,
        amount: u128,
        mut consumptions: Vec<Consumption>,
    ) -> Walk {
        let position = match consumptions.iter().position(|c| c.allowance_key == key) {
            Some(position) => position,
            None => {
                consumptions.push(Consumption {
                    allowance_key: key,
                    balance: self.ledger.preview(&key, self.now),
                    consumed: 0,
                });
                consumptions.len() - 1
            }
        };

        let entry = &mut consumptions[position];
        match entry.consumed.checked_add(amount) {
            Some(total) if total <= entry.balance => {
                entry.consumed = total;
                Ok(consumptions)
            }
            _ => Err(fail(Status::AllowanceExceeded, index).with_info(key.0)),
        }
    }
}
