//! Field-level encryption hook
//!
//! Key management and the actual cipher live outside this crate. The core
//! only calls [`FieldCipher::encrypt`] / [`FieldCipher::decrypt`] at the blob
//! boundary for fields the [`EntityCodec`] marks as encrypted. Index
//! managers always see plaintext field maps.

use crate::codec::{self, RawField, RawFieldRef};
use crate::entity::BaseEntity;
use crate::error::{Error, Result};
use crate::value::FieldMap;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Encrypts and decrypts single field payloads
pub trait FieldCipher: Send + Sync {
    /// Encrypt the encoded `[tag][payload]` bytes of `table.field`
    fn encrypt(&self, table: &str, field: &str, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Reverse of [`FieldCipher::encrypt`]
    fn decrypt(&self, table: &str, field: &str, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Converts entities to stored blobs and back, sealing marked fields
#[derive(Clone, Default)]
pub struct EntityCodec {
    cipher: Option<Arc<dyn FieldCipher>>,
    encrypted: HashMap<String, BTreeSet<String>>,
}

impl fmt::Debug for EntityCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCodec")
            .field("has_cipher", &self.cipher.is_some())
            .field("encrypted", &self.encrypted)
            .finish()
    }
}

impl EntityCodec {
    /// Codec without encryption
    pub fn plain() -> Self {
        Self::default()
    }

    /// Codec that seals marked fields with `cipher`
    pub fn with_cipher(cipher: Arc<dyn FieldCipher>) -> Self {
        EntityCodec {
            cipher: Some(cipher),
            encrypted: HashMap::new(),
        }
    }

    /// Mark `table.field` as encrypted
    pub fn encrypt_field(mut self, table: impl Into<String>, field: impl Into<String>) -> Self {
        self.encrypted
            .entry(table.into())
            .or_default()
            .insert(field.into());
        self
    }

    /// Whether `table.field` is sealed on write
    pub fn is_encrypted(&self, table: &str, field: &str) -> bool {
        self.cipher.is_some()
            && self
                .encrypted
                .get(table)
                .map_or(false, |fields| fields.contains(field))
    }

    fn sealed_fields(&self, table: &str) -> Option<(&Arc<dyn FieldCipher>, &BTreeSet<String>)> {
        match (&self.cipher, self.encrypted.get(table)) {
            (Some(cipher), Some(fields)) if !fields.is_empty() => Some((cipher, fields)),
            _ => None,
        }
    }

    /// Encode an entity for storage under `table`
    pub fn encode(&self, table: &str, entity: &BaseEntity) -> Result<Vec<u8>> {
        let (cipher, sealed) = match self.sealed_fields(table) {
            Some(s) => s,
            None => return Ok(entity.serialize()),
        };

        let fields = entity.fields()?;
        let mut ciphertexts: Vec<Option<Vec<u8>>> = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            if sealed.contains(name) {
                let (tag, payload) = codec::encode_value(value);
                let mut plain = Vec::with_capacity(payload.len() + 1);
                plain.push(tag);
                plain.extend_from_slice(&payload);
                ciphertexts.push(Some(cipher.encrypt(table, name, &plain)?));
            } else {
                ciphertexts.push(None);
            }
        }

        Ok(codec::encode_raw(fields.iter().zip(ciphertexts.iter()).map(
            |((name, value), sealed)| match sealed {
                Some(c) => (name.as_str(), RawFieldRef::Sealed(c.as_slice())),
                None => (name.as_str(), RawFieldRef::Plain(value)),
            },
        )))
    }

    /// Decode a stored blob, opening sealed fields
    pub fn decode(&self, table: &str, primary_key: &str, blob: &[u8]) -> Result<BaseEntity> {
        let cipher = match (&self.cipher, codec::is_binary_blob(blob)) {
            (Some(c), true) => c,
            _ => return BaseEntity::deserialize(primary_key, blob),
        };

        let raw = codec::decode_raw(blob)?;
        if !raw.iter().any(|(_, f)| matches!(f, RawField::Sealed(_))) {
            return BaseEntity::deserialize(primary_key, blob);
        }

        let mut fields = FieldMap::new();
        for (name, field) in raw {
            let value = match field {
                RawField::Plain(v) => v,
                RawField::Sealed(ciphertext) => {
                    let plain = cipher.decrypt(table, &name, &ciphertext)?;
                    let (tag, payload) = plain.split_first().ok_or_else(|| {
                        Error::Corrupt(format!("decrypted field {}.{} is empty", table, name))
                    })?;
                    codec::decode_value(*tag, payload)?
                }
            };
            fields.insert(name, value);
        }
        Ok(BaseEntity::from_fields(primary_key, fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldValue;

    struct XorCipher(u8);

    impl FieldCipher for XorCipher {
        fn encrypt(&self, _table: &str, _field: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
            Ok(plaintext.iter().map(|b| b ^ self.0).collect())
        }

        fn decrypt(&self, _table: &str, _field: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
            Ok(ciphertext.iter().map(|b| b ^ self.0).collect())
        }
    }

    fn patient() -> BaseEntity {
        let mut e = BaseEntity::new("p1");
        e.set_field("name", "Bob").unwrap();
        e.set_field("ssn", "123-45-6789").unwrap();
        e
    }

    #[test]
    fn test_plain_codec_is_passthrough() {
        let codec = EntityCodec::plain();
        let e = patient();
        let blob = codec.encode("patients", &e).unwrap();
        assert_eq!(blob, e.serialize());
        assert_eq!(codec.decode("patients", "p1", &blob).unwrap(), e);
    }

    #[test]
    fn test_marked_fields_are_sealed() {
        let codec = EntityCodec::with_cipher(Arc::new(XorCipher(0x5a)))
            .encrypt_field("patients", "ssn");
        assert!(codec.is_encrypted("patients", "ssn"));
        assert!(!codec.is_encrypted("patients", "name"));

        let blob = codec.encode("patients", &patient()).unwrap();
        let needle = b"123-45-6789";
        assert!(!blob.windows(needle.len()).any(|w| w == needle));

        // Without the cipher the field reads as ciphertext
        let opaque = BaseEntity::deserialize("p1", &blob).unwrap();
        assert!(matches!(
            opaque.get_field("ssn").unwrap(),
            Some(FieldValue::Binary(_))
        ));

        let back = codec.decode("patients", "p1", &blob).unwrap();
        assert_eq!(back, patient());
    }

    #[test]
    fn test_other_tables_untouched() {
        let codec = EntityCodec::with_cipher(Arc::new(XorCipher(1))).encrypt_field("patients", "ssn");
        let e = patient();
        assert_eq!(codec.encode("visitors", &e).unwrap(), e.serialize());
    }
}
