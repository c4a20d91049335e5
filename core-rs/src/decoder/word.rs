//! 256-bit big-endian word helpers

use std::cmp::Ordering;

pub type Word = [u8; 32];

/// Left-pad up to 32 bytes into a word; longer inputs have no word form
pub fn to_word(bytes: &[u8]) -> Option<Word> {
    if bytes.len() > 32 {
        return None;
    }
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(bytes);
    Some(word)
}

pub fn from_u128(value: u128) -> Word {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// The word as an unsigned integer, if it fits in 128 bits
pub fn to_u128(word: &Word) -> Option<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Some(u128::from_be_bytes(low))
}

pub fn cmp_unsigned(a: &Word, b: &Word) -> Ordering {
    a.cmp(b)
}

/// Two's complement comparison
pub fn cmp_signed(a: &Word, b: &Word) -> Ordering {
    let a_negative = a[0] & 0x80 != 0;
    let b_negative = b[0] & 0x80 != 0;
    match (a_negative, b_negative) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.cmp(b),
    }
}
