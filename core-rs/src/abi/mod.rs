//! ABI encoder
//!
//! Produces payloads in the standard tuple/array/bytes layout the decoder
//! walks: word-aligned static fields in the head, dynamic fields referenced
//! by offsets (relative to the start of the enclosing tuple) and stored in
//! the tail, byte strings length-prefixed and right-padded to a full word.

use crate::primitives::Address;

/// A value to be ABI-encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Any static 32-byte word (uint, int, address, bool, bytes32)
    Word([u8; 32]),
    /// `bytes` / `string`
    Bytes(Vec<u8>),
    /// Ordered fixed set of fields
    Tuple(Vec<Token>),
    /// Length-prefixed sequence of same-shaped elements
    Array(Vec<Token>),
}

impl Token {
    pub fn uint(value: u128) -> Self {
        let mut word = [0u8; 32];
        word[16..].copy_from_slice(&value.to_be_bytes());
        Token::Word(word)
    }

    /// Two's complement, sign-extended to 256 bits
    pub fn int(value: i128) -> Self {
        let mut word = if value < 0 { [0xffu8; 32] } else { [0u8; 32] };
        word[16..].copy_from_slice(&value.to_be_bytes());
        Token::Word(word)
    }

    pub fn address(address: Address) -> Self {
        Token::Word(address.to_word())
    }

    pub fn bool(value: bool) -> Self {
        Token::uint(value as u128)
    }

    fn is_dynamic(&self) -> bool {
        match self {
            Token::Word(_) => false,
            Token::Bytes(_) | Token::Array(_) => true,
            Token::Tuple(fields) => fields.iter().any(Token::is_dynamic),
        }
    }

    fn head_size(&self) -> usize {
        match self {
            Token::Tuple(fields) if !self.is_dynamic() => fields.iter().map(Token::head_size).sum(),
            _ => 32,
        }
    }
}

fn length_word(len: usize) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&(len as u64).to_be_bytes());
    word
}

fn encode_tuple(tokens: &[Token], out: &mut Vec<u8>) {
    let head_len: usize = tokens.iter().map(Token::head_size).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&length_word(head_len + tail.len()));
            encode_token(token, &mut tail);
        } else {
            encode_token(token, &mut head);
        }
    }

    out.extend_from_slice(&head);
    out.extend_from_slice(&tail);
}

fn encode_token(token: &Token, out: &mut Vec<u8>) {
    match token {
        Token::Word(word) => out.extend_from_slice(word),
        Token::Bytes(bytes) => {
            out.extend_from_slice(&length_word(bytes.len()));
            out.extend_from_slice(bytes);
            let padding = (32 - bytes.len() % 32) % 32;
            out.extend(std::iter::repeat(0u8).take(padding));
        }
        Token::Tuple(fields) => encode_tuple(fields, out),
        Token::Array(elements) => {
            out.extend_from_slice(&length_word(elements.len()));
            encode_tuple(elements, out);
        }
    }
}

/// Encode a parameter list, as `abi.encode(...)` would
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_tuple(tokens, &mut out);
    out
}

/// Encode a call: 4-byte selector followed by the encoded parameters
pub fn encode_call(selector: [u8; 4], tokens: &[Token]) -> Vec<u8> {
    let mut out = selector.to_vec();
    encode_tuple(tokens, &mut out);
    out
}
