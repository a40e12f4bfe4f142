use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use lyric_vault_core::{ArtefactId, VaultError};

/// Longest edge of a generated thumbnail, in pixels.
pub const THUMBNAIL_MAX_EDGE: u32 = 128;

/// Destination for artefact thumbnails.
pub trait ThumbnailSink {
    /// Derive a thumbnail from `image_source` for artefact `id` and return
    /// where it was written.
    ///
    /// # Errors
    /// Returns [`VaultError::Thumbnail`] when the image cannot be read,
    /// resized or written.
    fn save(&self, image_source: &Path, category: &str, id: ArtefactId)
        -> Result<PathBuf, VaultError>;
}

/// Writes PNG thumbnails to `<root>/<category>/<id>.png`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageThumbnailSink {
    root: PathBuf,
}

impl ImageThumbnailSink {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn thumbnail_path(&self, category: &str, id: ArtefactId) -> PathBuf {
        self.root.join(category).join(format!("{id}.png"))
    }
}

impl ThumbnailSink for ImageThumbnailSink {
    fn save(
        &self,
        image_source: &Path,
        category: &str,
        id: ArtefactId,
    ) -> Result<PathBuf, VaultError> {
        let failed = |reason: String| VaultError::Thumbnail { id, reason };

        let source = image::open(image_source)
            .map_err(|err| failed(format!("cannot open {}: {err}", image_source.display())))?;
        // Fit inside the bounding box, never upscale.
        let thumbnail =
            if source.width() > THUMBNAIL_MAX_EDGE || source.height() > THUMBNAIL_MAX_EDGE {
                source.thumbnail(THUMBNAIL_MAX_EDGE, THUMBNAIL_MAX_EDGE)
            } else {
                source
            };

        let target = self.thumbnail_path(category, id);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| failed(format!("cannot create {}: {err}", parent.display())))?;
        }
        thumbnail
            .save_with_format(&target, ImageFormat::Png)
            .map_err(|err| failed(format!("cannot write {}: {err}", target.display())))?;

        tracing::debug!(
            artefact_id = %id,
            width = thumbnail.width(),
            height = thumbnail.height(),
            path = %target.display(),
            "thumbnail written"
        );
        Ok(target)
    }
}
