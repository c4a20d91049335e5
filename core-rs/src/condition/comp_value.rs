//! compValue formats
//!
//! Operator-specific layouts of a node's comparison value. The integrity
//! checker accepts a node only if its compValue parses here; the evaluator
//! parses again at use, so the two can never disagree on a layout.

/// Leading bytes skipped when an `AbiEncoded` node declares none (a selector)
pub const DEFAULT_LEADING_BYTES: usize = 4;

/// Reserved pluck index
pub const PLUCK_SENTINEL: u8 = 255;

fn read_u16(bytes: &[u8]) -> usize {
    u16::from_be_bytes([bytes[0], bytes[1]]) as usize
}

/// Header expectation of an `AbiEncoded` node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadingBytes<'a> {
    pub count: usize,
    /// `None` skips the header without checking it
    pub expected: Option<&'a [u8]>,
}

/// Empty, `u16` count, or `u16` count followed by exactly `count` bytes
pub fn leading_bytes(comp_value: &[u8]) -> Option<LeadingBytes<'_>> {
    match comp_value.len() {
        0 => Some(LeadingBytes {
            count: DEFAULT_LEADING_BYTES,
            expected: None,
        }),
        1 => None,
        _ => {
            let count = read_u16(comp_value);
            let rest = &comp_value[2..];
            if rest.is_empty() {
                Some(LeadingBytes {
                    count,
                    expected: None,
                })
            } else if rest.len() == count {
                Some(LeadingBytes {
                    count,
                    expected: Some(rest),
                })
            } else {
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitmask<'a> {
    pub shift: usize,
    pub mask: &'a [u8],
    pub expected: &'a [u8],
}

/// `u16` shift, then mask and expected value of equal non-zero length
pub fn bitmask(comp_value: &[u8]) -> Option<Bitmask<'_>> {
    if comp_value.len() < 4 || comp_value.len() % 2 != 0 {
        return None;
    }
    let shift = read_u16(comp_value);
    let (mask, expected) = comp_value[2..].split_at((comp_value.len() - 2) / 2);
    Some(Bitmask {
        shift,
        mask,
        expected,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceRange {
    pub shift: usize,
    pub size: usize,
}

impl SliceRange {
    pub fn end(&self) -> usize {
        self.shift + self.size
    }
}

/// `u16` shift and `u16` size, size at least 1
pub fn slice_range(comp_value: &[u8]) -> Option<SliceRange> {
    if comp_value.len() != 4 {
        return None;
    }
    let range = SliceRange {
        shift: read_u16(comp_value),
        size: read_u16(&comp_value[2..]),
    };
    (range.size > 0).then_some(range)
}

pub fn pluck_index(comp_value: &[u8]) -> Option<u8> {
    match comp_value {
        [index] if *index != PLUCK_SENTINEL => Some(*index),
        _ => None,
    }
}

/// Two or three distinct pluck indices
pub fn zip_indices(comp_value: &[u8]) -> Option<&[u8]> {
    if !(2..=3).contains(&comp_value.len()) {
        return None;
    }
    for (i, a) in comp_value.iter().enumerate() {
        if comp_value[i + 1..].contains(a) {
            return None;
        }
    }
    Some(comp_value)
}

/// Exactly one 32-byte word
pub fn word(comp_value: &[u8]) -> Option<[u8; 32]> {
    comp_value.try_into().ok()
}
