/*
Record wire format:

[header_len: varint][num_columns: varint][type_code: varint, one per column]
followed by the column data in order.

Type codes: 0 = NULL, 1 = INTEGER, 2 = FLOAT, 3 = TEXT, 4 = BLOB.

Column data: NULL is zero bytes. Non-negative integers are varints; negative
integers are a fixed 4-byte big-endian two's-complement word, and the decoder
tells the two apart by first attempting a canonical varint parse and falling
back to the fixed form. Floats are IEEE-754 doubles, big-endian. Text and
blobs carry a varint length prefix; text is UTF-8.
*/

use std::cmp::Ordering;

use crate::errors::{DbError, Result};
use crate::util::{pack_varint, unpack_varint, varint_len};

pub const TYPE_NULL: u64 = 0;
pub const TYPE_INTEGER: u64 = 1;
pub const TYPE_FLOAT: u64 = 2;
pub const TYPE_TEXT: u64 = 3;
pub const TYPE_BLOB: u64 = 4;

/// A single typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
}

impl Value {
    fn type_code(&self) -> u64 {
        match self {
            Value::Null => TYPE_NULL,
            // booleans travel on the wire as integers 0/1
            Value::Int(_) | Value::Bool(_) => TYPE_INTEGER,
            Value::Float(_) => TYPE_FLOAT,
            Value::Text(_) => TYPE_TEXT,
            Value::Blob(_) => TYPE_BLOB,
        }
    }

    /// Equality used by comparisons everywhere in the engine. Integers and
    /// floats compare numerically across the two tags; any other mixed-tag
    /// pair is unequal. NULL equals only NULL.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            _ => false,
        }
    }

    /// Ordering for `<`/`<=`/`>`/`>=` and ORDER BY. Returns `None` for
    /// pairs with no defined order (NULL involved, or mixed tags other than
    /// the numeric int/float pair).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Truthiness used by conditional jumps and logical folding: NULL, zero
    /// numbers, false and empty text/blobs are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Text(v) => !v.is_empty(),
            Value::Blob(v) => !v.is_empty(),
            Value::Bool(v) => *v,
        }
    }
}

/// A database row: an ordered tuple of typed values.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Record {
        Record { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut header = Vec::new();
        header.extend(pack_varint(self.values.len() as u64));
        for value in &self.values {
            header.extend(pack_varint(value.type_code()));
        }

        let mut out = pack_varint(header.len() as u64);
        out.extend(header);

        for value in &self.values {
            Record::encode_value(value, &mut out)?;
        }

        Ok(out)
    }

    fn encode_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
        match value {
            Value::Null => {}
            Value::Bool(b) => out.push(if *b { 1 } else { 0 }),
            Value::Int(v) => {
                if *v >= 0 {
                    out.extend(pack_varint(*v as u64));
                } else {
                    let fixed = i32::try_from(*v).map_err(|_| {
                        DbError::corrupt(format!(
                            "negative integer {v} does not fit the 4-byte wire form"
                        ))
                    })?;
                    out.extend((fixed as u32).to_be_bytes());
                }
            }
            Value::Float(v) => out.extend(v.to_be_bytes()),
            Value::Text(v) => {
                out.extend(pack_varint(v.len() as u64));
                out.extend(v.as_bytes());
            }
            Value::Blob(v) => {
                out.extend(pack_varint(v.len() as u64));
                out.extend(v.iter());
            }
        }
        Ok(())
    }

    /// Decode a record starting at `offset`. Returns the record and the
    /// number of bytes consumed.
    pub fn decode(data: &[u8], offset: usize) -> Result<(Record, usize)> {
        let mut pos = offset;

        let (_header_len, consumed) = unpack_varint(data, pos)?;
        pos += consumed;

        let (num_columns, consumed) = unpack_varint(data, pos)?;
        pos += consumed;

        let mut type_codes = Vec::with_capacity(num_columns as usize);
        for _ in 0..num_columns {
            let (code, consumed) = unpack_varint(data, pos)?;
            pos += consumed;
            type_codes.push(code);
        }

        let mut values = Vec::with_capacity(type_codes.len());
        for code in type_codes {
            let (value, consumed) = Record::decode_value(data, pos, code)?;
            pos += consumed;
            values.push(value);
        }

        Ok((Record { values }, pos - offset))
    }

    fn decode_value(data: &[u8], offset: usize, type_code: u64) -> Result<(Value, usize)> {
        match type_code {
            TYPE_NULL => Ok((Value::Null, 0)),
            TYPE_INTEGER => Record::decode_integer(data, offset),
            TYPE_FLOAT => {
                let end = offset + 8;
                if end > data.len() {
                    return Err(DbError::corrupt("truncated float column"));
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&data[offset..end]);
                Ok((Value::Float(f64::from_be_bytes(buf)), 8))
            }
            TYPE_TEXT => {
                let (len, consumed) = unpack_varint(data, offset)?;
                let start = offset + consumed;
                let end = start + len as usize;
                if end > data.len() {
                    return Err(DbError::corrupt("truncated text column"));
                }
                let text = std::str::from_utf8(&data[start..end])
                    .map_err(|_| DbError::corrupt("text column is not valid utf-8"))?;
                Ok((Value::Text(text.to_string()), consumed + len as usize))
            }
            TYPE_BLOB => {
                let (len, consumed) = unpack_varint(data, offset)?;
                let start = offset + consumed;
                let end = start + len as usize;
                if end > data.len() {
                    return Err(DbError::corrupt("truncated blob column"));
                }
                Ok((Value::Blob(data[start..end].to_vec()), consumed + len as usize))
            }
            other => Err(DbError::corrupt(format!("invalid type code {other}"))),
        }
    }

    // A canonical varint parse distinguishes the non-negative form from the
    // fixed 4-byte negative form; when the varint attempt fails we retry as
    // the fixed form.
    fn decode_integer(data: &[u8], offset: usize) -> Result<(Value, usize)> {
        if let Ok((value, consumed)) = unpack_varint(data, offset) {
            if value <= i64::MAX as u64 && consumed == varint_len(value) {
                return Ok((Value::Int(value as i64), consumed));
            }
        }

        let end = offset + 4;
        if end > data.len() {
            return Err(DbError::corrupt("truncated integer column"));
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&data[offset..end]);
        Ok((Value::Int(i32::from_be_bytes(buf) as i64), 4))
    }
}
