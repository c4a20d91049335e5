//! Payload decoder
//!
//! Locates the bytes a condition node stands for inside an ABI-encoded
//! payload. Every lookup is bounds-checked; a truncated payload or an offset
//! pointing outside the enclosing region is an `OutOfBounds` failure, never
//! a silent pass.
//!
//! A node's *value bytes* depend on its shape:
//! - `Static`: the 32-byte word
//! - `Dynamic` / nested `AbiEncoded`: the unpadded content after the length word
//! - `Tuple`: the region starting at the tuple head (offsets inside it are
//!   relative to that start), open-ended to the end of the enclosing region
//! - `Array`: the region starting at the length word, open-ended likewise

pub mod word;

use crate::condition::Shape;

/// A read fell outside the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("payload read out of bounds at offset {offset}")]
pub struct OutOfBounds {
    pub offset: usize,
}

pub type DecodeResult<T> = Result<T, OutOfBounds>;

fn slice(data: &[u8], start: usize, len: usize) -> DecodeResult<&[u8]> {
    start
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .map(|end| &data[start..end])
        .ok_or(OutOfBounds { offset: start })
}

/// The 32-byte word at `at`
pub fn read_word(data: &[u8], at: usize) -> DecodeResult<&[u8]> {
    slice(data, at, 32)
}

/// A length or offset word; values that cannot address memory are out of bounds
pub fn read_usize(data: &[u8], at: usize) -> DecodeResult<usize> {
    let word = read_word(data, at)?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(OutOfBounds { offset: at });
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(low)).map_err(|_| OutOfBounds { offset: at })
}

fn padded(len: usize, at: usize) -> DecodeResult<usize> {
    len.checked_add(31)
        .map(|n| n / 32 * 32)
        .ok_or(OutOfBounds { offset: at })
}

/// Value bytes of a `shape` field whose encoding starts at `data[pos]`
pub fn value_at<'a>(shape: &Shape, data: &'a [u8], pos: usize) -> DecodeResult<&'a [u8]> {
    match shape {
        Shape::Static => slice(data, pos, 32),
        Shape::Dynamic | Shape::AbiEncoded => {
            let len = read_usize(data, pos)?;
            let start = pos.checked_add(32).ok_or(OutOfBounds { offset: pos })?;
            slice(data, start, len)
        }
        Shape::Tuple(_) | Shape::Array(_) => {
            if pos > data.len() {
                return Err(OutOfBounds { offset: pos });
            }
            Ok(&data[pos..])
        }
        Shape::Ether | Shape::Unplaced => Ok(&data[..0]),
    }
}

/// Locate tuple fields; `data` starts at the tuple head
pub fn tuple_fields<'a, 's>(
    data: &'a [u8],
    fields: impl IntoIterator<Item = &'s Shape>,
) -> DecodeResult<Vec<&'a [u8]>> {
    let mut out = Vec::new();
    let mut head = 0usize;
    for shape in fields {
        let pos = if shape.is_dynamic() {
            read_usize(data, head)?
        } else {
            head
        };
        out.push(value_at(shape, data, pos)?);
        head = head
            .checked_add(shape.head_size())
            .ok_or(OutOfBounds { offset: head })?;
    }
    Ok(out)
}

/// Locate array elements; `data` starts at the length word
pub fn array_elements<'a>(data: &'a [u8], element: &Shape) -> DecodeResult<Vec<&'a [u8]>> {
    let len = read_usize(data, 0)?;
    let body = &data[32..];
    let head = element.head_size();
    let heads = len.checked_mul(head).ok_or(OutOfBounds { offset: 0 })?;
    if heads > body.len() {
        return Err(OutOfBounds { offset: 32 });
    }

    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let at = i * head;
        let pos = if element.is_dynamic() {
            read_usize(body, at)?
        } else {
            at
        };
        out.push(value_at(element, body, pos)?);
    }
    Ok(out)
}

/// Size in bytes of the `shape` encoding starting at `data[pos]`, tails included
fn extent(shape: &Shape, data: &[u8], pos: usize) -> DecodeResult<usize> {
    match shape {
        Shape::Static => Ok(32),
        Shape::Dynamic | Shape::AbiEncoded => {
            let len = read_usize(data, pos)?;
            padded(len, pos)?
                .checked_add(32)
                .ok_or(OutOfBounds { offset: pos })
        }
        Shape::Tuple(fields) => {
            let region = value_at(shape, data, pos)?;
            tuple_extent(region, fields.iter())
        }
        Shape::Array(element) => {
            let len = read_usize(data, pos)?;
            let body = value_at(shape, data, pos + 32)?;
            if len
                .checked_mul(element.head_size())
                .map_or(true, |heads| heads > body.len())
            {
                return Err(OutOfBounds { offset: pos });
            }
            let body_extent = tuple_extent(body, std::iter::repeat(element.as_ref()).take(len))?;
            body_extent.checked_add(32).ok_or(OutOfBounds { offset: pos })
        }
        Shape::Ether | Shape::Unplaced => Ok(0),
    }
}

fn tuple_extent<'s>(data: &[u8], fields: impl Iterator<Item = &'s Shape>) -> DecodeResult<usize> {
    let mut head = 0usize;
    let mut end = 0usize;
    for shape in fields {
        let field_end = if shape.is_dynamic() {
            let offset = read_usize(data, head)?;
            offset
                .checked_add(extent(shape, data, offset)?)
                .ok_or(OutOfBounds { offset })?
        } else {
            head + shape.head_size()
        };
        end = end.max(field_end);
        head = head
            .checked_add(shape.head_size())
            .ok_or(OutOfBounds { offset: head })?;
        end = end.max(head);
    }
    Ok(end)
}

/// Exact encoded region of a `Tuple` or `Array` value
pub fn encoded_region<'a>(shape: &Shape, data: &'a [u8]) -> DecodeResult<&'a [u8]> {
    let size = extent(shape, data, 0)?;
    slice(data, 0, size)
}
