//! Datatypes and values for collected points.
//!
//! The agent works with a closed enumeration of wire datatypes and an exact
//! `Value` representation for each of them. Keeping the widths explicit
//! (`Int16` vs `UInt16` and so on) matters here: the codec produces a
//! different byte layout for each, and a lossy intermediate representation
//! would silently corrupt round trips.

use serde::{Deserialize, Serialize};

use crate::core::error::{AgentError, Result};

/// Declared datatype of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Single bit within one byte.
    Bool,
    /// One raw byte.
    Byte,
    /// Raw byte run of declared length.
    Bytes,
    /// 16-bit signed, big-endian.
    Int16,
    /// 16-bit unsigned, big-endian.
    UInt16,
    /// 32-bit signed, big-endian.
    Int32,
    /// 32-bit unsigned, big-endian.
    UInt32,
    /// IEEE-754 single precision, big-endian.
    Float32,
    /// Length-prefixed string (`[max, actual]` header + payload).
    String,
}

impl DataType {
    /// Wire size in bytes for fixed-size types; `None` for `Bytes`/`String`.
    pub const fn wire_len(&self) -> Option<usize> {
        match self {
            Self::Bool | Self::Byte => Some(1),
            Self::Int16 | Self::UInt16 => Some(2),
            Self::Int32 | Self::UInt32 | Self::Float32 => Some(4),
            Self::Bytes | Self::String => None,
        }
    }

    /// Canonical lowercase name, as used in persisted tag records.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Byte => "byte",
            Self::Bytes => "bytes",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Float32 => "float32",
            Self::String => "string",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DataType {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        let all = [
            Self::Bool,
            Self::Byte,
            Self::Bytes,
            Self::Int16,
            Self::UInt16,
            Self::Int32,
            Self::UInt32,
            Self::Float32,
            Self::String,
        ];
        all.into_iter()
            .find(|dt| s.eq_ignore_ascii_case(dt.as_str()))
            .ok_or_else(|| AgentError::Config(format!("unknown datatype: {}", s)))
    }
}

/// A typed tag value.
///
/// `Null` represents a missing value: an unset initial value or a failed
/// read.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Bytes(Vec<u8>),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Float32(f32),
    String(String),
    #[default]
    Null,
}

impl Value {
    /// Check if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the carried variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Byte(_) => "byte",
            Self::Bytes(_) => "bytes",
            Self::Int16(_) => "int16",
            Self::UInt16(_) => "uint16",
            Self::Int32(_) => "int32",
            Self::UInt32(_) => "uint32",
            Self::Float32(_) => "float32",
            Self::String(_) => "string",
            Self::Null => "null",
        }
    }

    /// Try to get the value as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::Byte(v) => Some(*v != 0),
            Self::Int16(v) => Some(*v != 0),
            Self::UInt16(v) => Some(*v != 0),
            Self::Int32(v) => Some(*v != 0),
            Self::UInt32(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to get the value as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(v) => Some(i64::from(*v)),
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Int16(v) => Some(i64::from(*v)),
            Self::UInt16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::UInt32(v) => Some(i64::from(*v)),
            Self::Float32(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Try to get the value as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float32(v) => Some(f64::from(*v)),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Try to get the value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a persisted string representation into a typed value.
    ///
    /// Used when loading tag initial values from the config store.
    pub fn parse(s: &str, datatype: DataType) -> Result<Self> {
        let mismatch = || AgentError::TypeMismatch {
            expected: datatype,
            got: format!("string {:?}", s),
        };
        match datatype {
            DataType::Bool => parse_bool(s).map(Self::Bool).ok_or_else(mismatch),
            DataType::Byte => s.parse().map(Self::Byte).map_err(|_| mismatch()),
            DataType::Bytes => Ok(Self::Bytes(s.as_bytes().to_vec())),
            DataType::Int16 => s.parse().map(Self::Int16).map_err(|_| mismatch()),
            DataType::UInt16 => s.parse().map(Self::UInt16).map_err(|_| mismatch()),
            DataType::Int32 => s.parse().map(Self::Int32).map_err(|_| mismatch()),
            DataType::UInt32 => s.parse().map(Self::UInt32).map_err(|_| mismatch()),
            DataType::Float32 => s.parse().map(Self::Float32).map_err(|_| mismatch()),
            DataType::String => Ok(Self::String(s.to_string())),
        }
    }

    /// Coerce this value to the target datatype.
    ///
    /// Used by the write path to bring caller-supplied values onto the
    /// tag's declared wire type. Numeric values cross-convert, strings are
    /// parsed. Failure is a `TypeMismatch`.
    pub fn coerce(&self, datatype: DataType) -> Result<Self> {
        let mismatch = || AgentError::TypeMismatch {
            expected: datatype,
            got: self.kind().to_string(),
        };

        if let Self::String(s) = self {
            if !matches!(
                datatype,
                DataType::String | DataType::Bytes | DataType::Byte
            ) {
                return Self::parse(s, datatype);
            }
        }

        match datatype {
            DataType::Bool => self.as_bool().map(Self::Bool).ok_or_else(mismatch),
            DataType::Byte => match self {
                Self::Byte(v) => Ok(Self::Byte(*v)),
                Self::String(s) => s.bytes().next().map(Self::Byte).ok_or_else(mismatch),
                _ => self
                    .as_i64()
                    .map(|v| Self::Byte(v as u8))
                    .ok_or_else(mismatch),
            },
            DataType::Bytes => match self {
                Self::Bytes(v) => Ok(Self::Bytes(v.clone())),
                Self::String(s) => Ok(Self::Bytes(s.as_bytes().to_vec())),
                _ => Err(mismatch()),
            },
            DataType::Int16 => self
                .as_i64()
                .map(|v| Self::Int16(v as i16))
                .ok_or_else(mismatch),
            DataType::UInt16 => self
                .as_i64()
                .map(|v| Self::UInt16(v as u16))
                .ok_or_else(mismatch),
            DataType::Int32 => self
                .as_i64()
                .map(|v| Self::Int32(v as i32))
                .ok_or_else(mismatch),
            DataType::UInt32 => self
                .as_i64()
                .map(|v| Self::UInt32(v as u32))
                .ok_or_else(mismatch),
            DataType::Float32 => self
                .as_f64()
                .map(|v| Self::Float32(v as f32))
                .ok_or_else(mismatch),
            DataType::String => match self {
                Self::Null => Err(mismatch()),
                _ => Ok(Self::String(self.to_string())),
            },
        }
    }
}

/// Lenient bool parsing: accepts `true`/`false` in any case and `1`/`0`.
fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" => Some(true),
        "0" => Some(false),
        _ if s.eq_ignore_ascii_case("true") => Some(true),
        _ if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Byte(v) => write!(f, "{}", v),
            Self::Bytes(v) => {
                for b in v {
                    write!(f, "{:02X}", b)?;
                }
                Ok(())
            }
            Self::Int16(v) => write!(f, "{}", v),
            Self::UInt16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::Float32(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Null => Ok(()),
        }
    }
}

// Convenient From implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Self::Byte(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int16(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::UInt16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt32(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float32(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatype_from_str() {
        assert_eq!("uint16".parse::<DataType>().unwrap(), DataType::UInt16);
        assert_eq!("Float32".parse::<DataType>().unwrap(), DataType::Float32);
        assert!("word".parse::<DataType>().is_err());
    }

    #[test]
    fn test_wire_len() {
        assert_eq!(DataType::Bool.wire_len(), Some(1));
        assert_eq!(DataType::Int32.wire_len(), Some(4));
        assert_eq!(DataType::String.wire_len(), None);
    }

    #[test]
    fn test_parse_initial_values() {
        assert_eq!(
            Value::parse("42", DataType::Int16).unwrap(),
            Value::Int16(42)
        );
        assert_eq!(Value::parse("1", DataType::Bool).unwrap(), Value::Bool(true));
        assert_eq!(
            Value::parse("3.5", DataType::Float32).unwrap(),
            Value::Float32(3.5)
        );
        assert!(Value::parse("abc", DataType::Int32).is_err());
    }

    #[test]
    fn test_coerce_numeric_cross() {
        let v = Value::Int32(300);
        assert_eq!(v.coerce(DataType::UInt16).unwrap(), Value::UInt16(300));
        assert_eq!(v.coerce(DataType::Float32).unwrap(), Value::Float32(300.0));

        let f = Value::Float32(12.7);
        assert_eq!(f.coerce(DataType::Int16).unwrap(), Value::Int16(12));
    }

    #[test]
    fn test_coerce_string_to_number() {
        let v = Value::String("1234".into());
        assert_eq!(v.coerce(DataType::UInt16).unwrap(), Value::UInt16(1234));
        assert!(Value::String("x".into()).coerce(DataType::Int16).is_err());
    }

    #[test]
    fn test_coerce_null_fails() {
        assert!(Value::Null.coerce(DataType::Int16).is_err());
        assert!(Value::Null.coerce(DataType::String).is_err());
    }
}
