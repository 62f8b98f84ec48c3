//! Core types for mosaicdb
//!
//! This crate defines the foundational types shared by every layer:
//! - Error / Status: error taxonomy and the status object managers return
//! - FieldValue / FieldMap: typed schema-less field values
//! - BaseEntity: the canonical storage unit with a lazily decoded blob
//! - codec: the binary blob format
//! - key: storage key schema and component escaping
//! - cipher: field encryption hook applied at the blob boundary

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cipher;
pub mod codec;
pub mod entity;
pub mod error;
pub mod key;
pub mod value;

pub use cipher::{EntityCodec, FieldCipher};
pub use entity::{BaseEntity, Format};
pub use error::{Error, ErrorClass, Result, Status, StatusCode};
pub use value::{FieldMap, FieldValue};
