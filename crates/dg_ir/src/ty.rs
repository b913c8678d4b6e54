//! Type descriptors attached to IR values.

use std::fmt;

use internment::Intern;
use serde::{Deserialize, Serialize};

/// The type of an IR value.
#[derive(PartialEq, Eq, Hash, Clone, Debug, Serialize, Deserialize, strum::EnumIs)]
pub enum Type {
    /// The type of instructions that produce no value.
    Void,
    /// An integer of the given bit width.
    Integer(u32),
    /// A floating point number of the given bit width.
    Float(u32),
    /// An opaque pointer into the given address space.
    Pointer { address_space: u32 },
    /// A fixed length vector of first class elements.
    Vector { element: Box<Type>, len: u32 },
    /// A named struct or array type.
    Aggregate(Intern<String>),
    /// The type of basic block labels.
    Label,
}

impl Type {
    pub fn int(bits: u32) -> Self {
        Type::Integer(bits)
    }

    /// A pointer into the default address space.
    pub fn ptr() -> Self {
        Type::Pointer { address_space: 0 }
    }

    pub fn vector(element: Type, len: u32) -> Self {
        Type::Vector {
            element: Box::new(element),
            len,
        }
    }

    pub fn aggregate(name: &str) -> Self {
        Type::Aggregate(Intern::new(name.to_string()))
    }

    /// Can a value of this type be held in a register.
    pub fn is_first_class(&self) -> bool {
        !matches!(self, Type::Void | Type::Aggregate(_) | Type::Label)
    }

    /// Width in bits of scalar and vector types, `None` for everything else.
    pub fn primitive_size_in_bits(&self) -> Option<u64> {
        match self {
            Type::Integer(bits) | Type::Float(bits) => Some(u64::from(*bits)),
            Type::Vector { element, len } => element
                .primitive_size_in_bits()
                .map(|bits| bits * u64::from(*len)),
            _ => None,
        }
    }

    /// Whether a bitcast from `self` to `other` preserves every bit of the
    /// value. This is the compatibility predicate used to match indirect call
    /// sites against candidate callees.
    pub fn can_losslessly_bitcast_to(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }
        if !self.is_first_class() || !other.is_first_class() {
            return false;
        }
        match (self, other) {
            (Type::Vector { .. }, Type::Vector { .. }) => {
                match (self.primitive_size_in_bits(), other.primitive_size_in_bits()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            (
                Type::Pointer { address_space: a },
                Type::Pointer { address_space: b },
            ) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Integer(bits) => write!(f, "i{bits}"),
            Type::Float(bits) => write!(f, "f{bits}"),
            Type::Pointer { address_space: 0 } => f.write_str("ptr"),
            Type::Pointer { address_space } => write!(f, "ptr addrspace({address_space})"),
            Type::Vector { element, len } => write!(f, "<{len} x {element}>"),
            Type::Aggregate(name) => write!(f, "%{}", name.as_str()),
            Type::Label => f.write_str("label"),
        }
    }
}
