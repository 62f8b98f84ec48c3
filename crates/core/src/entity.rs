//! BaseEntity: the canonical storage unit
//!
//! An entity is a primary key plus a blob holding an ordered field map. The
//! blob and the decoded map are both cached lazily:
//!
//! - `blob` empty means the map was mutated and the blob is dirty; it is
//!   re-encoded on the next [`BaseEntity::serialize`] / [`BaseEntity::blob`].
//! - `fields` empty means the blob has not been decoded yet; single-field
//!   reads go straight to the blob via [`codec::extract_field`].
//!
//! Reads never invalidate anything. Only `set_field` and `remove_field`
//! touch the caches.

use crate::codec;
use crate::error::{Error, Result};
use crate::value::{FieldMap, FieldValue};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Blob encoding of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    /// Compact binary blob (see [`codec`])
    Binary,
    /// UTF-8 JSON object
    Json,
}

/// A schema-less record keyed by primary key
#[derive(Debug, Clone)]
pub struct BaseEntity {
    primary_key: String,
    format: Format,
    blob: OnceCell<Vec<u8>>,
    fields: OnceCell<FieldMap>,
}

impl BaseEntity {
    /// Empty entity in binary format
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self::from_fields(primary_key, FieldMap::new())
    }

    /// Entity from an already-built field map
    pub fn from_fields(primary_key: impl Into<String>, fields: FieldMap) -> Self {
        BaseEntity {
            primary_key: primary_key.into(),
            format: Format::Binary,
            blob: OnceCell::new(),
            fields: OnceCell::with_value(fields),
        }
    }

    /// Entity from a JSON object text; keeps the JSON format tag
    pub fn from_json(primary_key: impl Into<String>, json: &str) -> Result<Self> {
        let fields = parse_json_object(json.as_bytes())?;
        Ok(BaseEntity {
            primary_key: primary_key.into(),
            format: Format::Json,
            blob: OnceCell::new(),
            fields: OnceCell::with_value(fields),
        })
    }

    /// Wrap stored bytes without decoding them.
    ///
    /// A leading `{` selects the JSON format, the blob magic selects binary.
    /// Only the header is checked here; field payloads are validated when
    /// they are first read.
    pub fn deserialize(primary_key: impl Into<String>, blob: &[u8]) -> Result<Self> {
        let format = match blob.first() {
            Some(b'{') => Format::Json,
            Some(&codec::BLOB_MAGIC) => Format::Binary,
            Some(other) => {
                return Err(Error::Corrupt(format!(
                    "entity blob starts with unexpected byte 0x{:02x}",
                    other
                )))
            }
            None => return Err(Error::Corrupt("empty entity blob".to_string())),
        };
        Ok(BaseEntity {
            primary_key: primary_key.into(),
            format,
            blob: OnceCell::with_value(blob.to_vec()),
            fields: OnceCell::new(),
        })
    }

    /// Primary key
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Format tag
    pub fn format(&self) -> Format {
        self.format
    }

    /// Switch the format used for the next serialization
    pub fn set_format(&mut self, format: Format) -> Result<()> {
        if format != self.format {
            self.ensure_fields()?;
            self.format = format;
            self.blob = OnceCell::new();
        }
        Ok(())
    }

    /// Encoded blob, re-encoded if dirty
    pub fn blob(&self) -> &[u8] {
        self.blob.get_or_init(|| {
            let empty = FieldMap::new();
            let fields = self.fields.get().unwrap_or(&empty);
            encode_fields(fields, self.format)
        })
    }

    /// Owned copy of the encoded blob
    pub fn serialize(&self) -> Vec<u8> {
        self.blob().to_vec()
    }

    /// Fully decoded field map (decoded once, then cached)
    pub fn fields(&self) -> Result<&FieldMap> {
        self.fields.get_or_try_init(|| match self.blob.get() {
            Some(blob) => decode_fields(blob, self.format),
            None => Ok(FieldMap::new()),
        })
    }

    /// Consume into the field map
    pub fn into_fields(self) -> Result<FieldMap> {
        self.fields()?;
        Ok(self.fields.into_inner().unwrap_or_default())
    }

    /// Read a single field.
    ///
    /// Uses the decoded map when present; otherwise a binary blob is walked
    /// without decoding the other fields.
    pub fn get_field(&self, name: &str) -> Result<Option<FieldValue>> {
        if let Some(fields) = self.fields.get() {
            return Ok(fields.get(name).cloned());
        }
        match (self.format, self.blob.get()) {
            (Format::Binary, Some(blob)) => codec::extract_field(blob, name),
            _ => Ok(self.fields()?.get(name).cloned()),
        }
    }

    /// Whether the field exists (null counts as present)
    pub fn has_field(&self, name: &str) -> Result<bool> {
        Ok(self.get_field(name)?.is_some())
    }

    /// Field rendered as text (see [`FieldValue::to_text`])
    pub fn get_field_as_string(&self, name: &str) -> Result<Option<String>> {
        Ok(self.get_field(name)?.map(|v| v.to_text()))
    }

    /// Field as integer, if convertible
    pub fn get_field_as_int(&self, name: &str) -> Result<Option<i64>> {
        Ok(self.get_field(name)?.and_then(|v| v.as_int()))
    }

    /// Field as double, if convertible
    pub fn get_field_as_double(&self, name: &str) -> Result<Option<f64>> {
        Ok(self.get_field(name)?.and_then(|v| v.as_f64()))
    }

    /// Field as bool, if convertible
    pub fn get_field_as_bool(&self, name: &str) -> Result<Option<bool>> {
        Ok(self.get_field(name)?.and_then(|v| v.as_bool()))
    }

    /// Field as float vector
    pub fn get_field_as_vector(&self, name: &str) -> Result<Option<Vec<f32>>> {
        Ok(match self.get_field(name)? {
            Some(FieldValue::Vector(v)) => Some(v),
            _ => None,
        })
    }

    /// Set a field; marks the blob dirty
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Result<()> {
        self.ensure_fields()?;
        if let Some(fields) = self.fields.get_mut() {
            fields.insert(name.into(), value.into());
        }
        self.blob = OnceCell::new();
        Ok(())
    }

    /// Remove a field; returns the old value
    pub fn remove_field(&mut self, name: &str) -> Result<Option<FieldValue>> {
        self.ensure_fields()?;
        let old = self.fields.get_mut().and_then(|f| f.remove(name));
        if old.is_some() {
            self.blob = OnceCell::new();
        }
        Ok(old)
    }

    /// All fields whose name starts with `prefix`
    pub fn extract_fields_with_prefix(&self, prefix: &str) -> Result<FieldMap> {
        Ok(self
            .fields()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Render the field map as a JSON object
    pub fn to_json(&self) -> Result<String> {
        Ok(fields_to_json(self.fields()?).to_string())
    }

    fn ensure_fields(&mut self) -> Result<()> {
        self.fields()?;
        Ok(())
    }
}

impl PartialEq for BaseEntity {
    fn eq(&self, other: &Self) -> bool {
        if self.primary_key != other.primary_key {
            return false;
        }
        match (self.fields(), other.fields()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

fn fields_to_json(fields: &FieldMap) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    serde_json::Value::Object(map)
}

fn encode_fields(fields: &FieldMap, format: Format) -> Vec<u8> {
    match format {
        Format::Binary => codec::encode_map(fields),
        Format::Json => fields_to_json(fields).to_string().into_bytes(),
    }
}

fn decode_fields(blob: &[u8], format: Format) -> Result<FieldMap> {
    match format {
        Format::Binary => codec::decode_map(blob),
        Format::Json => parse_json_object(blob),
    }
}

fn parse_json_object(bytes: &[u8]) -> Result<FieldMap> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::Corrupt(format!("entity JSON does not parse: {}", e)))?;
    match value {
        serde_json::Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
            .collect()),
        other => Err(Error::Corrupt(format!(
            "entity JSON must be an object, got {}",
            other
        ))),
    }
}
