//! Binary blob format for entity field maps
//!
//! ```text
//! [magic: u8 = 0xB7][version: u8][field_count: u32]
//! repeated field_count times, sorted by name:
//!   [name_len: u16][name: utf8][tag: u8][payload_len: u32][payload]
//! ```
//!
//! All integers are little-endian. Every field carries its payload length,
//! so [`extract_field`] can walk the blob and skip fields it does not need
//! without decoding them.

use crate::error::{Error, Result};
use crate::value::{FieldMap, FieldValue};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// First byte of every binary blob
pub const BLOB_MAGIC: u8 = 0xB7;
/// Current blob format version
pub const BLOB_VERSION: u8 = 1;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_VECTOR: u8 = 5;
const TAG_BINARY: u8 = 6;
/// Encrypted field; the payload is ciphertext of `[tag][payload]`
pub(crate) const TAG_SEALED: u8 = 7;

/// A field as it sits in the blob
#[derive(Debug, Clone, PartialEq)]
pub enum RawField {
    /// Plain value
    Plain(FieldValue),
    /// Ciphertext produced by a [`FieldCipher`](crate::cipher::FieldCipher)
    Sealed(Vec<u8>),
}

/// Borrowed form of [`RawField`] used while encoding
#[derive(Debug, Clone, Copy)]
pub enum RawFieldRef<'a> {
    /// Plain value
    Plain(&'a FieldValue),
    /// Ciphertext
    Sealed(&'a [u8]),
}

/// True if the bytes start like a binary blob
pub fn is_binary_blob(blob: &[u8]) -> bool {
    blob.first() == Some(&BLOB_MAGIC)
}

/// Encode a single value into `(tag, payload)`
pub fn encode_value(value: &FieldValue) -> (u8, Vec<u8>) {
    match value {
        FieldValue::Null => (TAG_NULL, Vec::new()),
        FieldValue::Bool(b) => (TAG_BOOL, vec![u8::from(*b)]),
        FieldValue::Int(i) => (TAG_INT, i.to_le_bytes().to_vec()),
        FieldValue::Double(d) => (TAG_DOUBLE, d.to_le_bytes().to_vec()),
        FieldValue::String(s) => (TAG_STRING, s.as_bytes().to_vec()),
        FieldValue::Vector(v) => {
            let mut out = Vec::with_capacity(v.len() * 4);
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
            (TAG_VECTOR, out)
        }
        FieldValue::Binary(b) => (TAG_BINARY, b.clone()),
    }
}

/// Decode a value from its tag and payload
pub fn decode_value(tag: u8, payload: &[u8]) -> Result<FieldValue> {
    let fixed = |n: usize| -> Result<()> {
        if payload.len() != n {
            return Err(Error::Corrupt(format!(
                "field tag {} expects {} payload bytes, got {}",
                tag,
                n,
                payload.len()
            )));
        }
        Ok(())
    };
    match tag {
        TAG_NULL => Ok(FieldValue::Null),
        TAG_BOOL => {
            fixed(1)?;
            Ok(FieldValue::Bool(payload[0] != 0))
        }
        TAG_INT => {
            fixed(8)?;
            let mut c = Cursor::new(payload);
            Ok(FieldValue::Int(c.read_i64::<LittleEndian>()?))
        }
        TAG_DOUBLE => {
            fixed(8)?;
            let mut c = Cursor::new(payload);
            Ok(FieldValue::Double(c.read_f64::<LittleEndian>()?))
        }
        TAG_STRING => String::from_utf8(payload.to_vec())
            .map(FieldValue::String)
            .map_err(|e| Error::Corrupt(format!("string field is not utf-8: {}", e))),
        TAG_VECTOR => {
            if payload.len() % 4 != 0 {
                return Err(Error::Corrupt(format!(
                    "vector payload length {} not a multiple of 4",
                    payload.len()
                )));
            }
            let mut c = Cursor::new(payload);
            let mut v = Vec::with_capacity(payload.len() / 4);
            for _ in 0..payload.len() / 4 {
                v.push(c.read_f32::<LittleEndian>()?);
            }
            Ok(FieldValue::Vector(v))
        }
        TAG_BINARY => Ok(FieldValue::Binary(payload.to_vec())),
        other => Err(Error::Corrupt(format!("unknown field tag {}", other))),
    }
}

/// Encode fields given in ascending name order
pub fn encode_raw<'a, I>(fields: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, RawFieldRef<'a>)>,
{
    let entries: Vec<(&str, RawFieldRef<'_>)> = fields.into_iter().collect();
    let mut buf = Vec::with_capacity(6 + entries.len() * 16);
    buf.push(BLOB_MAGIC);
    buf.push(BLOB_VERSION);
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());

    for (name, field) in entries {
        let (tag, payload) = match field {
            RawFieldRef::Plain(v) => encode_value(v),
            RawFieldRef::Sealed(bytes) => (TAG_SEALED, bytes.to_vec()),
        };
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.push(tag);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
    }
    buf
}

/// Encode a plain field map
pub fn encode_map(fields: &FieldMap) -> Vec<u8> {
    encode_raw(
        fields
            .iter()
            .map(|(k, v)| (k.as_str(), RawFieldRef::Plain(v))),
    )
}

/// Walks the blob header and field entries without decoding payloads
struct FieldCursor<'a> {
    cursor: Cursor<&'a [u8]>,
    remaining: u32,
}

impl<'a> FieldCursor<'a> {
    fn new(blob: &'a [u8]) -> Result<Self> {
        let mut cursor = Cursor::new(blob);
        let magic = cursor.read_u8().map_err(|_| truncated("header"))?;
        if magic != BLOB_MAGIC {
            return Err(Error::Corrupt(format!(
                "bad blob magic 0x{:02x}",
                magic
            )));
        }
        let version = cursor.read_u8().map_err(|_| truncated("header"))?;
        if version != BLOB_VERSION {
            return Err(Error::Corrupt(format!(
                "unsupported blob version {}",
                version
            )));
        }
        let remaining = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| truncated("field count"))?;
        Ok(FieldCursor { cursor, remaining })
    }

    /// Next `(name, tag, payload)` triple
    fn next_entry(&mut self) -> Result<Option<(&'a str, u8, &'a [u8])>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let data: &'a [u8] = *self.cursor.get_ref();

        let name_len = self
            .cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| truncated("field name length"))? as usize;
        let start = self.cursor.position() as usize;
        let name_bytes = data
            .get(start..start + name_len)
            .ok_or_else(|| truncated("field name"))?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|e| Error::Corrupt(format!("field name is not utf-8: {}", e)))?;
        self.cursor.set_position((start + name_len) as u64);

        let tag = self.cursor.read_u8().map_err(|_| truncated("field tag"))?;
        let len = self
            .cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| truncated("payload length"))? as usize;
        let start = self.cursor.position() as usize;
        let payload = data
            .get(start..start + len)
            .ok_or_else(|| truncated("payload"))?;
        self.cursor.set_position((start + len) as u64);
        Ok(Some((name, tag, payload)))
    }

    fn finish(mut self) -> Result<()> {
        let mut rest = Vec::new();
        self.cursor.read_to_end(&mut rest)?;
        if !rest.is_empty() {
            return Err(Error::Corrupt(format!(
                "{} trailing bytes after last field",
                rest.len()
            )));
        }
        Ok(())
    }
}

fn truncated(what: &str) -> Error {
    Error::Corrupt(format!("blob truncated while reading {}", what))
}

/// Decode every field, keeping sealed fields as ciphertext
pub fn decode_raw(blob: &[u8]) -> Result<Vec<(String, RawField)>> {
    let mut fc = FieldCursor::new(blob)?;
    let mut out = Vec::new();
    while let Some((name, tag, payload)) = fc.next_entry()? {
        let field = if tag == TAG_SEALED {
            RawField::Sealed(payload.to_vec())
        } else {
            RawField::Plain(decode_value(tag, payload)?)
        };
        out.push((name.to_string(), field));
    }
    fc.finish()?;
    Ok(out)
}

/// Decode the whole blob into a field map.
///
/// Sealed fields come back as `Binary(ciphertext)`; use
/// [`EntityCodec`](crate::cipher::EntityCodec) to open them.
pub fn decode_map(blob: &[u8]) -> Result<FieldMap> {
    Ok(decode_raw(blob)?
        .into_iter()
        .map(|(name, raw)| match raw {
            RawField::Plain(v) => (name, v),
            RawField::Sealed(c) => (name, FieldValue::Binary(c)),
        })
        .collect())
}

/// Decode a single field without materializing the rest of the blob
pub fn extract_field(blob: &[u8], field: &str) -> Result<Option<FieldValue>> {
    let mut fc = FieldCursor::new(blob)?;
    while let Some((name, tag, payload)) = fc.next_entry()? {
        if name == field {
            return if tag == TAG_SEALED {
                Ok(Some(FieldValue::Binary(payload.to_vec())))
            } else {
                decode_value(tag, payload).map(Some)
            };
        }
        // Names are sorted; once past the target it is absent
        if name > field {
            return Ok(None);
        }
    }
    Ok(None)
}

/// Names of all fields in blob order
pub fn field_names(blob: &[u8]) -> Result<Vec<String>> {
    let mut fc = FieldCursor::new(blob)?;
    let mut names = Vec::new();
    while let Some((name, _, _)) = fc.next_entry()? {
        names.push(name.to_string());
    }
    Ok(names)
}
