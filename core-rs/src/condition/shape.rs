//! Static type trees
//!
//! Every accepted node resolves to a `Shape`: the layout of the bytes it
//! stands for. Shapes drive both the integrity checker (type agreement
//! between siblings, zip pairing) and the decoder (head sizes, inline vs
//! pointer-indirected fields).

/// Resolved layout of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Static,
    Dynamic,
    Tuple(Vec<Shape>),
    Array(Box<Shape>),
    /// Self-contained region; its inner layout is local to the node
    AbiEncoded,
    /// The value transfer amount
    Ether,
    /// No position in the payload
    Unplaced,
}

impl Shape {
    /// Whether this shape consumes a field or element of its parent
    pub fn is_positional(&self) -> bool {
        !matches!(self, Shape::Ether | Shape::Unplaced)
    }

    /// Whether the field is pointer-indirected in its parent's head
    pub fn is_dynamic(&self) -> bool {
        match self {
            Shape::Dynamic | Shape::Array(_) | Shape::AbiEncoded => true,
            Shape::Tuple(fields) => fields.iter().any(Shape::is_dynamic),
            Shape::Static | Shape::Ether | Shape::Unplaced => false,
        }
    }

    /// Bytes the field occupies in its parent's head
    pub fn head_size(&self) -> usize {
        match self {
            Shape::Tuple(fields) if !self.is_dynamic() => fields.iter().map(Shape::head_size).sum(),
            _ => 32,
        }
    }
}
