//! Database builder for fluent configuration
//!
//! Settings not expressible in `mosaic.toml` go through here: the entity
//! codec (field encryption) and the clock used for TTL expiry.

use std::path::PathBuf;
use std::sync::Arc;

use mosaic_core::{EntityCodec, Error, Result};
use mosaic_durability::DurabilityMode;
use mosaic_index::Clock;

use super::{Database, MosaicConfig};

/// Builder for [`Database`]
///
/// ```ignore
/// use mosaic_engine::Database;
///
/// // Defaults from mosaic.toml
/// let db = Database::open("/data/mydb")?;
///
/// // fsync every commit, encrypted `users.ssn`
/// let db = Database::builder()
///     .path("/data/mydb")
///     .strict()
///     .codec(EntityCodec::with_cipher(cipher).encrypt_field("users", "ssn"))
///     .open()?;
/// ```
#[derive(Clone, Default)]
pub struct DatabaseBuilder {
    path: Option<PathBuf>,
    config: Option<MosaicConfig>,
    durability: Option<DurabilityMode>,
    codec: EntityCodec,
    clock: Option<Clock>,
}

impl std::fmt::Debug for DatabaseBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseBuilder")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("durability", &self.durability)
            .field("codec", &self.codec)
            .field("custom_clock", &self.clock.is_some())
            .finish()
    }
}

impl DatabaseBuilder {
    /// Builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Database directory; required
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Use `config` instead of the directory's `mosaic.toml`. The config is
    /// written back so later opens pick it up.
    pub fn config(mut self, config: MosaicConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// fsync on every commit
    pub fn strict(mut self) -> Self {
        self.durability = Some(DurabilityMode::Strict);
        self
    }

    /// Group commit fsyncs (100ms or 1000 commits, whichever comes first)
    pub fn buffered(mut self) -> Self {
        self.durability = Some(DurabilityMode::default());
        self
    }

    /// Codec wrapping entity blobs, e.g. with field encryption
    pub fn codec(mut self, codec: EntityCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Clock used for TTL expiry, in epoch seconds
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Open the database
    pub fn open(self) -> Result<Arc<Database>> {
        let path = self
            .path
            .ok_or_else(|| Error::InvalidArgument("DatabaseBuilder::open() requires a path".into()))?;
        let mut config = match self.config {
            Some(config) => config,
            None => Database::load_config(&path)?,
        };
        if let Some(mode) = self.durability {
            config.durability = match mode {
                DurabilityMode::Strict => "always".to_string(),
                DurabilityMode::Batched { .. } => "standard".to_string(),
            };
        }
        Database::open_inner(path, config, self.codec, self.clock)
    }
}
