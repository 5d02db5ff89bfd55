//! Core type definitions for the resource model.

use serde::{Deserialize, Serialize};

/// Scalar data types a property can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Binary data.
    Binary,
    /// Boolean value.
    Boolean,
    /// 8-bit unsigned integer.
    Byte,
    /// Date and time.
    DateTime,
    /// Fixed-precision decimal.
    Decimal,
    /// 64-bit floating point.
    Double,
    /// 128-bit globally unique identifier.
    Guid,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit floating point.
    Single,
    /// UTF-8 string.
    String,
}

impl DataType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Byte
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Single
                | DataType::Double
                | DataType::Decimal
        )
    }

    /// Check if this type carries a length (binary and string).
    pub fn has_length(&self) -> bool {
        matches!(self, DataType::Binary | DataType::String)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Binary => "binary",
            DataType::Boolean => "boolean",
            DataType::Byte => "byte",
            DataType::DateTime => "datetime",
            DataType::Decimal => "decimal",
            DataType::Double => "double",
            DataType::Guid => "guid",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Single => "single",
            DataType::String => "string",
        };
        write!(f, "{}", name)
    }
}

/// Cardinality of one association end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Multiplicity {
    /// Any number of partners.
    Many,
    /// Exactly one partner.
    One,
    /// At most one partner.
    ZeroOrOne,
}

impl Multiplicity {
    /// Check whether a subject/object multiplicity pair is legal.
    ///
    /// One–One is the single forbidden combination.
    pub fn legal_pair(subject: Multiplicity, object: Multiplicity) -> bool {
        !(subject == Multiplicity::One && object == Multiplicity::One)
    }

    /// Check if this end admits at most a single partner.
    pub fn is_single(&self) -> bool {
        matches!(self, Multiplicity::One | Multiplicity::ZeroOrOne)
    }
}

impl std::fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Multiplicity::Many => write!(f, "many"),
            Multiplicity::One => write!(f, "one"),
            Multiplicity::ZeroOrOne => write!(f, "zero_or_one"),
        }
    }
}

/// Role a navigation property plays inside its association.
///
/// Maintained by the graph's bind/unbind operations; `Undefined` means
/// the property is not currently bound to an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Not bound to an association.
    Undefined,
    /// Subject end of the association.
    Subject,
    /// Object end of the association.
    Object,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Undefined => write!(f, "undefined"),
            Direction::Subject => write!(f, "subject"),
            Direction::Object => write!(f, "object"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_checks() {
        assert!(DataType::Int32.is_numeric());
        assert!(DataType::Decimal.is_numeric());
        assert!(!DataType::String.is_numeric());
        assert!(!DataType::Guid.is_numeric());

        assert!(DataType::String.has_length());
        assert!(DataType::Binary.has_length());
        assert!(!DataType::Boolean.has_length());
    }

    #[test]
    fn test_legal_multiplicity_pairs() {
        use Multiplicity::*;

        assert!(!Multiplicity::legal_pair(One, One));

        for subject in [Many, One, ZeroOrOne] {
            for object in [Many, One, ZeroOrOne] {
                if subject == One && object == One {
                    continue;
                }
                assert!(Multiplicity::legal_pair(subject, object));
            }
        }
    }

    #[test]
    fn test_display_names() {
        assert_eq!(DataType::DateTime.to_string(), "datetime");
        assert_eq!(Multiplicity::ZeroOrOne.to_string(), "zero_or_one");
        assert_eq!(Direction::Subject.to_string(), "subject");
    }
}
