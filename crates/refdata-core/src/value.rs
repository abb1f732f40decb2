//! Reference data values and their typed-byte encoding.
//!
//! Stored values are a one-byte type tag followed by the raw payload.
//! Text payloads are UTF-8; binary payloads are opaque.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A reference data payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Text(String),
    Binary(Vec<u8>),
    Null,
}

/// The tag of a [`Value`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Null,
    Text,
    Binary,
}

impl ValueType {
    /// The single-byte tag used in the stored encoding.
    pub fn tag(self) -> u8 {
        match self {
            ValueType::Null => 0,
            ValueType::Text => 1,
            ValueType::Binary => 2,
        }
    }

    pub fn from_tag(tag: u8) -> CoreResult<Self> {
        match tag {
            0 => Ok(ValueType::Null),
            1 => Ok(ValueType::Text),
            2 => Ok(ValueType::Binary),
            other => Err(CoreError::CorruptData(format!("unknown value tag {other}"))),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Null => "null",
            ValueType::Text => "text",
            ValueType::Binary => "binary",
        };
        f.write_str(name)
    }
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Text(_) => ValueType::Text,
            Value::Binary(_) => ValueType::Binary,
            Value::Null => ValueType::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The text payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Value::Text(s) => s.as_bytes(),
            Value::Binary(b) => b,
            Value::Null => &[],
        }
    }

    /// Number of bytes [`Value::encode_into`] will append.
    pub fn encoded_len(&self) -> usize {
        1 + self.payload().len()
    }

    /// Append the tagged encoding of this value to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.value_type().tag());
        buf.extend_from_slice(self.payload());
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Decode a value previously written by [`Value::encode_into`].
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        TypedBytes::from_encoded(bytes)?.to_value()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Value::Null => f.write_str("null"),
        }
    }
}

/// A borrowed view of an encoded value: its type plus the raw payload.
///
/// Handed to push-style consumers so large binary values never need an
/// owned copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedBytes<'a> {
    pub value_type: ValueType,
    pub bytes: &'a [u8],
}

impl<'a> TypedBytes<'a> {
    /// Split an encoded value into tag and payload.
    pub fn from_encoded(encoded: &'a [u8]) -> CoreResult<Self> {
        let (&tag, bytes) = encoded
            .split_first()
            .ok_or_else(|| CoreError::CorruptData("empty value buffer".to_string()))?;
        let value_type = ValueType::from_tag(tag)?;
        if value_type == ValueType::Null && !bytes.is_empty() {
            return Err(CoreError::CorruptData(format!(
                "null value carries {} payload bytes",
                bytes.len()
            )));
        }
        Ok(Self { value_type, bytes })
    }

    pub fn to_value(&self) -> CoreResult<Value> {
        match self.value_type {
            ValueType::Null => Ok(Value::Null),
            ValueType::Binary => Ok(Value::Binary(self.bytes.to_vec())),
            ValueType::Text => std::str::from_utf8(self.bytes)
                .map(|s| Value::Text(s.to_string()))
                .map_err(|e| CoreError::CorruptData(format!("text value is not UTF-8: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_encoding_is_tag_then_utf8() {
        let encoded = Value::text("abc").encode();
        assert_eq!(encoded, vec![1, b'a', b'b', b'c']);
        assert_eq!(Value::decode(&encoded).unwrap(), Value::text("abc"));
    }

    #[test]
    fn binary_and_null_decode() {
        let bin = Value::Binary(vec![0xde, 0xad]);
        assert_eq!(Value::decode(&bin.encode()).unwrap(), bin);
        assert_eq!(Value::decode(&[0]).unwrap(), Value::Null);
    }

    #[test]
    fn unknown_tag_is_corrupt() {
        let err = Value::decode(&[9, 1, 2]).unwrap_err();
        assert!(matches!(err, CoreError::CorruptData(_)));
    }

    #[test]
    fn empty_buffer_is_corrupt() {
        assert!(matches!(
            TypedBytes::from_encoded(&[]),
            Err(CoreError::CorruptData(_))
        ));
    }

    #[test]
    fn invalid_utf8_text_is_corrupt() {
        let err = Value::decode(&[1, 0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, CoreError::CorruptData(_)));
    }

    #[test]
    fn typed_bytes_borrow_payload() {
        let encoded = Value::Binary(vec![7; 32]).encode();
        let typed = TypedBytes::from_encoded(&encoded).unwrap();
        assert_eq!(typed.value_type, ValueType::Binary);
        assert_eq!(typed.bytes.len(), 32);
    }

    #[test]
    fn display_formats() {
        assert_eq!(Value::text("x").to_string(), "x");
        assert_eq!(Value::Binary(vec![1, 2, 3]).to_string(), "<3 bytes>");
        assert_eq!(Value::Null.to_string(), "null");
    }
}
