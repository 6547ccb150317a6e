use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::error::{RecordError, RecordResult};
use crate::catalog::ColumnMetadata;
use crate::sql::Literal;

/// Column data type. All types are fixed-length on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// 4 bytes, little-endian two's complement
    Int,
    /// 4 bytes, IEEE-754 binary32
    Float,
    /// n bytes, zero-padded to the declared length
    Char(usize),
}

impl DataType {
    pub fn size(&self) -> usize {
        match self {
            DataType::Int => 4,
            DataType::Float => 4,
            DataType::Char(n) => *n,
        }
    }

    pub fn name(&self) -> String {
        match self {
            DataType::Int => "int".to_string(),
            DataType::Float => "float".to_string(),
            DataType::Char(n) => format!("char({})", n),
        }
    }
}

/// A typed column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
}

impl Value {
    /// Coerce a parsed literal into a value of the column's type.
    /// Integer literals widen to float for float columns; everything else
    /// must match exactly.
    pub fn from_literal(lit: &Literal, column: &ColumnMetadata) -> RecordResult<Value> {
        match (lit, column.data_type) {
            (Literal::Int(i), DataType::Int) => Ok(Value::Int(*i as i32)),
            (Literal::Int(i), DataType::Float) => Ok(Value::Float(*i as f32)),
            (Literal::Float(f), DataType::Float) => Ok(Value::Float(*f as f32)),
            (Literal::Str(s), DataType::Char(max)) => {
                if s.len() > max {
                    return Err(RecordError::ValueLengthOverflow {
                        column: column.name.clone(),
                        len: s.len(),
                        max,
                    });
                }
                Ok(Value::Str(s.clone()))
            }
            (lit, dt) => Err(RecordError::TypeMismatch {
                expected: dt.name(),
                actual: lit.kind().to_string(),
            }),
        }
    }

    /// Encode into the fixed-length on-disk form of `data_type`
    pub fn encode(&self, data_type: DataType) -> RecordResult<Vec<u8>> {
        match (self, data_type) {
            (Value::Int(i), DataType::Int) => Ok(i.to_le_bytes().to_vec()),
            (Value::Float(f), DataType::Float) => Ok(f.to_le_bytes().to_vec()),
            (Value::Str(s), DataType::Char(max)) => {
                let bytes = s.as_bytes();
                if bytes.len() > max {
                    return Err(RecordError::ValueLengthOverflow {
                        column: String::new(),
                        len: bytes.len(),
                        max,
                    });
                }
                let mut out = vec![0u8; max];
                out[..bytes.len()].copy_from_slice(bytes);
                Ok(out)
            }
            (val, dt) => Err(RecordError::TypeMismatch {
                expected: dt.name(),
                actual: format!("{:?}", val),
            }),
        }
    }

    /// Decode from the fixed-length on-disk form
    pub fn decode(bytes: &[u8], data_type: DataType) -> RecordResult<Value> {
        if bytes.len() != data_type.size() {
            return Err(RecordError::Malformed(format!(
                "expected {} bytes for {}, got {}",
                data_type.size(),
                data_type.name(),
                bytes.len()
            )));
        }
        match data_type {
            DataType::Int => Ok(Value::Int(i32::from_le_bytes(bytes.try_into().unwrap()))),
            DataType::Float => Ok(Value::Float(f32::from_le_bytes(bytes.try_into().unwrap()))),
            DataType::Char(_) => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                let s = String::from_utf8_lossy(&bytes[..end]).into_owned();
                Ok(Value::Str(s))
            }
        }
    }

    /// Typed comparison: numeric for int and float, bytewise for strings.
    /// Values of different type families do not compare.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Some(a.total_cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Schema-driven record codec. All record bytes pass through here; nothing
/// else computes column offsets.
pub struct RowCodec<'a> {
    columns: &'a [ColumnMetadata],
    record_length: usize,
}

impl<'a> RowCodec<'a> {
    pub fn new(columns: &'a [ColumnMetadata]) -> Self {
        let record_length = columns.iter().map(|c| c.data_type.size()).sum();
        Self {
            columns,
            record_length,
        }
    }

    pub fn record_length(&self) -> usize {
        self.record_length
    }

    /// Byte offset of column `idx` within a record
    pub fn column_offset(&self, idx: usize) -> usize {
        self.columns[..idx].iter().map(|c| c.data_type.size()).sum()
    }

    /// Materialize one row of literals into typed values, checking arity
    pub fn coerce_row(&self, literals: &[Literal]) -> RecordResult<Vec<Value>> {
        if literals.len() != self.columns.len() {
            return Err(RecordError::ArityMismatch {
                expected: self.columns.len(),
                actual: literals.len(),
            });
        }
        literals
            .iter()
            .zip(self.columns)
            .map(|(lit, col)| Value::from_literal(lit, col))
            .collect()
    }

    pub fn encode_row(&self, values: &[Value]) -> RecordResult<Vec<u8>> {
        if values.len() != self.columns.len() {
            return Err(RecordError::ArityMismatch {
                expected: self.columns.len(),
                actual: values.len(),
            });
        }
        let mut out = Vec::with_capacity(self.record_length);
        for (value, col) in values.iter().zip(self.columns) {
            out.extend_from_slice(&value.encode(col.data_type)?);
        }
        Ok(out)
    }

    pub fn decode_row(&self, bytes: &[u8]) -> RecordResult<Vec<Value>> {
        if bytes.len() != self.record_length {
            return Err(RecordError::Malformed(format!(
                "expected {} record bytes, got {}",
                self.record_length,
                bytes.len()
            )));
        }
        let mut values = Vec::with_capacity(self.columns.len());
        let mut at = 0;
        for col in self.columns {
            let size = col.data_type.size();
            values.push(Value::decode(&bytes[at..at + size], col.data_type)?);
            at += size;
        }
        Ok(values)
    }

    /// Overwrite a single column inside an encoded record
    pub fn patch_column(&self, bytes: &mut [u8], idx: usize, value: &Value) -> RecordResult<()> {
        let col = &self.columns[idx];
        let at = self.column_offset(idx);
        let encoded = value.encode(col.data_type)?;
        bytes[at..at + encoded.len()].copy_from_slice(&encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnMetadata;

    fn columns() -> Vec<ColumnMetadata> {
        vec![
            ColumnMetadata {
                name: "id".to_string(),
                data_type: DataType::Int,
                primary_key: true,
            },
            ColumnMetadata {
                name: "name".to_string(),
                data_type: DataType::Char(8),
                primary_key: false,
            },
            ColumnMetadata {
                name: "score".to_string(),
                data_type: DataType::Float,
                primary_key: false,
            },
        ]
    }

    #[test]
    fn test_record_length_and_offsets() {
        let cols = columns();
        let codec = RowCodec::new(&cols);
        assert_eq!(codec.record_length(), 4 + 8 + 4);
        assert_eq!(codec.column_offset(0), 0);
        assert_eq!(codec.column_offset(1), 4);
        assert_eq!(codec.column_offset(2), 12);
    }

    #[test]
    fn test_row_round_trip() {
        let cols = columns();
        let codec = RowCodec::new(&cols);
        let row = vec![
            Value::Int(7),
            Value::Str("alice".to_string()),
            Value::Float(2.5),
        ];

        let bytes = codec.encode_row(&row).unwrap();
        assert_eq!(bytes.len(), codec.record_length());
        assert_eq!(codec.decode_row(&bytes).unwrap(), row);
    }

    #[test]
    fn test_char_is_zero_padded() {
        let bytes = Value::Str("ab".to_string()).encode(DataType::Char(8)).unwrap();
        assert_eq!(&bytes[..2], b"ab");
        assert!(bytes[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_overflowing_string_rejected() {
        let cols = columns();
        let codec = RowCodec::new(&cols);
        let result = codec.coerce_row(&[
            Literal::Int(1),
            Literal::Str("much_too_long".to_string()),
            Literal::Float(0.0),
        ]);
        assert!(matches!(
            result,
            Err(RecordError::ValueLengthOverflow { .. })
        ));
    }

    #[test]
    fn test_arity_checked() {
        let cols = columns();
        let codec = RowCodec::new(&cols);
        let result = codec.coerce_row(&[Literal::Int(1)]);
        assert!(matches!(result, Err(RecordError::ArityMismatch { .. })));
    }

    #[test]
    fn test_type_mismatch() {
        let cols = columns();
        let codec = RowCodec::new(&cols);
        let result = codec.coerce_row(&[
            Literal::Str("oops".to_string()),
            Literal::Str("a".to_string()),
            Literal::Float(0.0),
        ]);
        assert!(matches!(result, Err(RecordError::TypeMismatch { .. })));
    }

    #[test]
    fn test_int_literal_widens_to_float() {
        let col = ColumnMetadata {
            name: "score".to_string(),
            data_type: DataType::Float,
            primary_key: false,
        };
        let v = Value::from_literal(&Literal::Int(3), &col).unwrap();
        assert_eq!(v, Value::Float(3.0));
    }

    #[test]
    fn test_typed_compare() {
        use std::cmp::Ordering;

        assert_eq!(Value::Int(1).compare(&Value::Int(2)), Some(Ordering::Less));
        assert_eq!(
            Value::Float(2.5).compare(&Value::Float(2.5)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::Str("abc".to_string()).compare(&Value::Str("abd".to_string())),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Int(1).compare(&Value::Str("1".to_string())), None);
    }

    #[test]
    fn test_patch_column() {
        let cols = columns();
        let codec = RowCodec::new(&cols);
        let mut bytes = codec
            .encode_row(&[
                Value::Int(7),
                Value::Str("alice".to_string()),
                Value::Float(2.5),
            ])
            .unwrap();

        codec
            .patch_column(&mut bytes, 1, &Value::Str("bob".to_string()))
            .unwrap();

        let row = codec.decode_row(&bytes).unwrap();
        assert_eq!(row[1], Value::Str("bob".to_string()));
        assert_eq!(row[0], Value::Int(7));
        assert_eq!(row[2], Value::Float(2.5));
    }
}
