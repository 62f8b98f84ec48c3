//! Durability layer for mosaicdb
//!
//! This crate implements the on-disk logging and metadata files:
//! - encoding: CRC-framed WAL records
//! - wal: segmented write-ahead log with configurable fsync policy
//! - manifest: atomically replaced table/sequence metadata
//!
//! The storage engine owns the memtable and SSTables; this crate only makes
//! sure a committed batch survives a crash and that the engine can find its
//! flushed tables again on open.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod manifest;
pub mod wal;

pub use encoding::{decode_record, encode_record, Decoded};
pub use manifest::Manifest;
pub use wal::{DurabilityMode, WalOp, WalReader, WalRecord, WalWriter};
