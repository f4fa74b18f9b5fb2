//! Property keys, attributes and descriptors

use crate::object::ObjectId;
use crate::value::Value;
use std::sync::Arc;

/// Property key (string, symbol or integer index)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String property key
    String(Arc<str>),
    /// Symbol property key
    Symbol(u64),
    /// Integer index (for element storage)
    Index(u32),
}

impl PropertyKey {
    /// Create a string property key.
    ///
    /// Canonical array-index strings become `Index` keys so `"3"` and `3`
    /// name the same property.
    pub fn string(s: &str) -> Self {
        match parse_index(s) {
            Some(i) => Self::Index(i),
            None => Self::String(Arc::from(s)),
        }
    }

    /// Create an index property key
    pub fn index(i: u32) -> Self {
        Self::Index(i)
    }

    /// Get the index, if this is an index key
    #[inline]
    pub fn as_index(&self) -> Option<u32> {
        match self {
            Self::Index(i) => Some(*i),
            _ => None,
        }
    }

    /// Check if this is the given string key
    pub fn is_str(&self, name: &str) -> bool {
        matches!(self, Self::String(s) if &**s == name)
    }
}

/// Parse a canonical array index (no leading zeros, below 2^32 - 1)
fn parse_index(s: &str) -> Option<u32> {
    if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
        return None;
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u64 = s.parse().ok()?;
    (n < u32::MAX as u64).then_some(n as u32)
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        Self::Index(i)
    }
}

impl std::fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Symbol(id) => write!(f, "Symbol({id})"),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

bitflags::bitflags! {
    /// Property attribute flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyAttributes: u8 {
        /// Value can be changed
        const WRITABLE = 1 << 0;
        /// Shows up in enumeration
        const ENUMERABLE = 1 << 1;
        /// Can be deleted or have its attributes changed
        const CONFIGURABLE = 1 << 2;
        /// Getter/setter pair instead of a value; takes no slot
        const ACCESSOR = 1 << 3;
    }
}

impl Default for PropertyAttributes {
    /// Ordinary assignment-created data property
    fn default() -> Self {
        Self::data()
    }
}

impl PropertyAttributes {
    /// Writable, enumerable, configurable data property
    #[inline]
    pub const fn data() -> Self {
        Self::WRITABLE.union(Self::ENUMERABLE).union(Self::CONFIGURABLE)
    }

    /// Non-writable, non-enumerable, non-configurable data property
    #[inline]
    pub const fn frozen() -> Self {
        Self::empty()
    }

    /// Whether this is an accessor property
    #[inline]
    pub fn is_accessor(self) -> bool {
        self.contains(Self::ACCESSOR)
    }

    /// Whether the property has a slot
    #[inline]
    pub fn has_slot(self) -> bool {
        !self.is_accessor()
    }
}

/// Property descriptor
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyDescriptor {
    /// Data property
    Data {
        /// The value
        value: Value,
        /// Attributes
        attributes: PropertyAttributes,
    },
    /// Accessor property
    Accessor {
        /// Getter function
        get: Option<ObjectId>,
        /// Setter function
        set: Option<ObjectId>,
        /// Attributes (`ACCESSOR` is implied)
        attributes: PropertyAttributes,
    },
}

impl PropertyDescriptor {
    /// Create a data property with default attributes
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            attributes: PropertyAttributes::data(),
        }
    }

    /// Create a data property with specific attributes
    pub fn data_with_attrs(value: Value, attributes: PropertyAttributes) -> Self {
        Self::Data {
            value,
            attributes: attributes - PropertyAttributes::ACCESSOR,
        }
    }

    /// Create an accessor property
    pub fn accessor(get: Option<ObjectId>, set: Option<ObjectId>) -> Self {
        Self::Accessor {
            get,
            set,
            attributes: PropertyAttributes::ENUMERABLE
                | PropertyAttributes::CONFIGURABLE
                | PropertyAttributes::ACCESSOR,
        }
    }

    /// Attributes as stored in the layout
    pub fn attributes(&self) -> PropertyAttributes {
        match self {
            Self::Data { attributes, .. } => *attributes - PropertyAttributes::ACCESSOR,
            Self::Accessor { attributes, .. } => {
                (*attributes | PropertyAttributes::ACCESSOR) - PropertyAttributes::WRITABLE
            }
        }
    }

    /// Get the value (for data properties)
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// Check if writable
    pub fn is_writable(&self) -> bool {
        self.attributes().contains(PropertyAttributes::WRITABLE)
    }

    /// Check if configurable
    pub fn is_configurable(&self) -> bool {
        self.attributes().contains(PropertyAttributes::CONFIGURABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_strings_canonicalize() {
        assert_eq!(PropertyKey::string("7"), PropertyKey::Index(7));
        assert_eq!(PropertyKey::string("07").as_index(), None);
        assert_eq!(PropertyKey::string("4294967295").as_index(), None);
        assert!(PropertyKey::string("length").is_str("length"));
    }

    #[test]
    fn test_accessor_attributes_have_no_slot() {
        let desc = PropertyDescriptor::accessor(None, None);
        assert!(desc.attributes().is_accessor());
        assert!(!desc.attributes().has_slot());
        assert!(!desc.is_writable());
        assert!(PropertyAttributes::data().has_slot());
    }

    #[test]
    fn test_data_descriptor_strips_accessor_bit() {
        let desc = PropertyDescriptor::data_with_attrs(
            Value::Int32(1),
            PropertyAttributes::ACCESSOR | PropertyAttributes::WRITABLE,
        );
        assert_eq!(desc.attributes(), PropertyAttributes::WRITABLE);
    }
}
