//! Binary encoding of values and record slots.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{
    error::StoreError,
    layout::{
        DATETIME_SIZE, INTEGER_SIZE, SLOT_ID_SIZE, SLOT_SENTINEL, STRING_LEN_SIZE, STRING_MAX_LEN,
    },
    schema::Column,
    value::{datetime_to_micros, micros_to_datetime, ColumnType, Value},
    Result,
};

/// Why a slot body failed strict decoding
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeFault {
    /// The body is too short to hold the fixed part of the column
    Truncated { column: usize },
    /// A string length prefix overruns the body
    StringLength { column: usize, declared: usize },
    /// A string payload is not valid UTF-8
    BadUtf8 { column: usize },
    /// A timestamp is out of the representable range
    BadDateTime { column: usize },
    /// Non-zero bytes follow the last column
    TrailingBytes { at: usize },
}

impl std::fmt::Display for DecodeFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { column } => write!(f, "column {column} is truncated"),
            Self::StringLength { column, declared } => {
                write!(f, "column {column} declares {declared} bytes past the slot end")
            }
            Self::BadUtf8 { column } => write!(f, "column {column} is not valid utf-8"),
            Self::BadDateTime { column } => write!(f, "column {column} is not a valid datetime"),
            Self::TrailingBytes { at } => write!(f, "unexpected bytes at body offset {at}"),
        }
    }
}

/// Outcome of a salvage decode
#[derive(Debug, Clone, PartialEq)]
pub struct Salvaged {
    pub id: u32,
    pub values: Vec<Value>,
    /// Number of columns that were bounded or defaulted
    pub repaired: usize,
}

pub fn write_value<W: Write>(w: &mut W, value: &Value) -> Result<()> {
    match value {
        Value::Int(v) => w.write_i32::<LittleEndian>(*v)?,
        Value::DateTime(v) => w.write_i64::<LittleEndian>(datetime_to_micros(v))?,
        Value::Str(v) => write_str(w, v)?,
    }
    Ok(())
}

pub fn read_value<R: Read>(r: &mut R, kind: ColumnType) -> Result<Value> {
    let value = match kind {
        ColumnType::Integer => Value::Int(r.read_i32::<LittleEndian>()?),
        ColumnType::DateTime => {
            let micros = r.read_i64::<LittleEndian>()?;
            Value::DateTime(
                micros_to_datetime(micros)
                    .ok_or_else(|| StoreError::format(format!("invalid datetime {micros}")))?,
            )
        }
        ColumnType::String => Value::Str(read_str(r)?),
    };
    Ok(value)
}

pub fn write_str<W: Write>(w: &mut W, value: &str) -> Result<()> {
    if value.len() > STRING_MAX_LEN {
        return Err(StoreError::format(format!(
            "string of {} bytes exceeds the {STRING_MAX_LEN} byte limit",
            value.len()
        )));
    }
    w.write_u16::<LittleEndian>(value.len() as u16)?;
    w.write_all(value.as_bytes())?;
    Ok(())
}

pub fn read_str<R: Read>(r: &mut R) -> Result<String> {
    let len = r.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| StoreError::format(format!("invalid string; {e}")))
}

/// Encodes the body of a record slot: id followed by every column in order
pub fn encode_body(id: u32, values: &[Value]) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(SLOT_ID_SIZE + values.len() * DATETIME_SIZE);
    body.write_u32::<LittleEndian>(id)?;
    for value in values {
        write_value(&mut body, value)?;
    }
    Ok(body)
}

/// Strictly decodes a slot body. Any structural deviation is a fault.
pub fn decode_body(
    body: &[u8],
    columns: &[Column],
) -> std::result::Result<(u32, Vec<Value>), DecodeFault> {
    let mut pos = 0;
    let id = match take(body, &mut pos, SLOT_ID_SIZE) {
        Some(b) => u32::from_le_bytes(b.try_into().unwrap_or_default()),
        None => return Err(DecodeFault::Truncated { column: 0 }),
    };

    let mut values = Vec::with_capacity(columns.len());
    for column in columns {
        values.push(decode_column(body, &mut pos, column)?);
    }

    match body[pos..].iter().position(|b| *b != 0) {
        Some(at) => Err(DecodeFault::TrailingBytes { at: pos + at }),
        None => Ok((id, values)),
    }
}

/// Decodes as much of a damaged or truncated body as can be bounded.
///
/// Fixed fields cut off by the end of `body` take their default value. A
/// string whose declared length cannot be trusted is bounded by the end of
/// `body` instead (trailing zero padding stripped, longest valid UTF-8
/// prefix kept) and every column after it takes its default value.
///
/// Returns `None` when not even the record id is present.
pub fn salvage_body(body: &[u8], columns: &[Column]) -> Option<Salvaged> {
    let mut pos = 0;
    let id = u32::from_le_bytes(take(body, &mut pos, SLOT_ID_SIZE)?.try_into().ok()?);

    let mut values = Vec::with_capacity(columns.len());
    let mut repaired = 0;
    let mut bounded = false;

    for column in columns {
        if bounded {
            values.push(column.kind.default_value());
            repaired += 1;
            continue;
        }

        match decode_column(body, &mut pos, column) {
            Ok(value) => values.push(value),
            Err(DecodeFault::StringLength { .. }) | Err(DecodeFault::BadUtf8 { .. }) => {
                let start = (pos + STRING_LEN_SIZE).min(body.len());
                values.push(Value::Str(bound_string(&body[start..])));
                repaired += 1;
                bounded = true;
            }
            Err(_) => {
                values.push(column.kind.default_value());
                repaired += 1;
                bounded = true;
            }
        }
    }

    Some(Salvaged {
        id,
        values,
        repaired,
    })
}

fn bound_string(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
    let bytes = &bytes[..end.min(STRING_MAX_LEN)];
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(e) => String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned(),
    }
}

fn decode_column(
    body: &[u8],
    pos: &mut usize,
    column: &Column,
) -> std::result::Result<Value, DecodeFault> {
    let ordinal = column.ordinal;
    match column.kind {
        ColumnType::Integer => {
            let bytes = take(body, pos, INTEGER_SIZE).ok_or(DecodeFault::Truncated {
                column: ordinal,
            })?;
            Ok(Value::Int(i32::from_le_bytes(
                bytes.try_into().unwrap_or_default(),
            )))
        }
        ColumnType::DateTime => {
            let start = *pos;
            let bytes = take(body, pos, DATETIME_SIZE).ok_or(DecodeFault::Truncated {
                column: ordinal,
            })?;
            let micros = i64::from_le_bytes(bytes.try_into().unwrap_or_default());
            micros_to_datetime(micros)
                .map(Value::DateTime)
                .ok_or_else(|| {
                    *pos = start;
                    DecodeFault::BadDateTime { column: ordinal }
                })
        }
        ColumnType::String => {
            let start = *pos;
            let len_bytes = take(body, pos, STRING_LEN_SIZE).ok_or(DecodeFault::Truncated {
                column: ordinal,
            })?;
            let declared = u16::from_le_bytes(len_bytes.try_into().unwrap_or_default()) as usize;
            let payload = match take(body, pos, declared) {
                Some(p) => p,
                None => {
                    *pos = start;
                    return Err(DecodeFault::StringLength {
                        column: ordinal,
                        declared,
                    });
                }
            };
            match std::str::from_utf8(payload) {
                Ok(s) => Ok(Value::Str(s.to_string())),
                Err(_) => {
                    *pos = start;
                    Err(DecodeFault::BadUtf8 { column: ordinal })
                }
            }
        }
    }
}

fn take<'a>(body: &'a [u8], pos: &mut usize, len: usize) -> Option<&'a [u8]> {
    let end = pos.checked_add(len)?;
    let bytes = body.get(*pos..end)?;
    *pos = end;
    Some(bytes)
}

/// Builds a complete slot: marker, capacity, padded body and sentinel
pub fn encode_slot(marker: u8, capacity: usize, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(capacity + super::layout::SLOT_OVERHEAD);
    out.push(marker);
    out.extend_from_slice(&(capacity as u32).to_le_bytes());
    out.extend_from_slice(body);
    out.resize(out.len() + capacity.saturating_sub(body.len()), 0);
    out.extend_from_slice(&SLOT_SENTINEL);
    out
}
