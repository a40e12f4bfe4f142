use std::path::{Path, PathBuf};

use lyric_vault_core::{SecretKey, VaultError};
use lyric_vault_store_jsonl::JsonlStore;

use crate::{ArtefactService, ImageThumbnailSink};

pub const DEFAULT_STORE_FILE: &str = "lyrics.jsonl";
pub const DEFAULT_KEY_FILE: &str = "secret.key";
pub const DEFAULT_THUMBNAIL_DIR: &str = "thumbnails";

/// Where the vault keeps its store, key and thumbnails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    pub store_path: PathBuf,
    pub key_file: PathBuf,
    pub thumbnail_root: PathBuf,
}

impl VaultConfig {
    /// Default layout under a single data directory.
    #[must_use]
    pub fn from_data_dir(data_dir: &Path) -> Self {
        Self {
            store_path: data_dir.join(DEFAULT_STORE_FILE),
            key_file: data_dir.join(DEFAULT_KEY_FILE),
            thumbnail_root: data_dir.join(DEFAULT_THUMBNAIL_DIR),
        }
    }

    /// Load the key and open the store.
    ///
    /// # Errors
    /// Returns [`VaultError::KeyMaterial`] when the key file is missing or
    /// malformed, and [`VaultError::Store`] when the store file cannot be read.
    pub fn open_service(&self) -> Result<ArtefactService<JsonlStore>, VaultError> {
        let key = SecretKey::load(&self.key_file)?;
        let store = JsonlStore::open(&self.store_path).map_err(|err| {
            VaultError::Store(format!("open {}: {err:#}", self.store_path.display()))
        })?;
        tracing::debug!(
            store = %store.path().display(),
            key_file = %self.key_file.display(),
            "vault opened"
        );
        Ok(ArtefactService::new(store, &key))
    }

    #[must_use]
    pub fn thumbnail_sink(&self) -> ImageThumbnailSink {
        ImageThumbnailSink::new(&self.thumbnail_root)
    }
}
