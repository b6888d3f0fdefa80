//! Baseline store: `<dir>/<id>.png` plus `<dir>/<id>.json` metadata.

use crate::driver::Viewport;
use crate::result::{SanarError, SanarResult};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Capture metadata stored next to a baseline image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineMetadata {
    /// Baseline id
    #[serde(default)]
    pub baseline_id: String,
    /// Page URL at capture time
    #[serde(default)]
    pub url_captured: Option<String>,
    /// Element selector, `None` for full page
    #[serde(default)]
    pub selector_captured: Option<String>,
    /// Browser viewport at capture time
    #[serde(default)]
    pub viewport_size: Option<Viewport>,
    /// Capture time, RFC 3339
    #[serde(default)]
    pub captured_at: Option<String>,
}

/// A loaded baseline
#[derive(Debug, Clone)]
pub struct VisualBaseline {
    /// Baseline id
    pub id: String,
    /// Reference image
    pub image: RgbaImage,
    /// Capture metadata
    pub metadata: BaselineMetadata,
}

impl VisualBaseline {
    /// Image size as (width, height)
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Directory of baselines
#[derive(Debug, Clone)]
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    /// Store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn image_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.png"))
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Whether both files of `id` exist
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.image_path(id).exists() && self.metadata_path(id).exists()
    }

    /// Read only the metadata of `id`.
    ///
    /// # Errors
    ///
    /// [`SanarError::Baseline`] if missing or malformed.
    pub fn metadata(&self, id: &str) -> SanarResult<BaselineMetadata> {
        let path = self.metadata_path(id);
        let text = std::fs::read_to_string(&path).map_err(|e| SanarError::Baseline {
            baseline_id: id.to_string(),
            message: format!("{}: {e}", path.display()),
        })?;
        serde_json::from_str(&text).map_err(|e| SanarError::Baseline {
            baseline_id: id.to_string(),
            message: format!("{}: {e}", path.display()),
        })
    }

    /// Load image and metadata of `id`.
    ///
    /// # Errors
    ///
    /// [`SanarError::Baseline`] if either file is missing or unreadable.
    pub fn load(&self, id: &str) -> SanarResult<VisualBaseline> {
        if !self.exists(id) {
            return Err(SanarError::Baseline {
                baseline_id: id.to_string(),
                message: format!("not found in {}", self.dir.display()),
            });
        }
        let metadata = self.metadata(id)?;
        let image = image::open(self.image_path(id))
            .map_err(|e| SanarError::Baseline {
                baseline_id: id.to_string(),
                message: e.to_string(),
            })?
            .to_rgba8();
        info!(baseline_id = id, width = image.width(), height = image.height(), "baseline loaded");
        Ok(VisualBaseline {
            id: id.to_string(),
            image,
            metadata,
        })
    }

    /// Write a baseline from PNG bytes. Returns the image path.
    ///
    /// # Errors
    ///
    /// Undecodable PNG or I/O failure.
    pub fn save(&self, id: &str, png: &[u8], mut metadata: BaselineMetadata) -> SanarResult<PathBuf> {
        let image = image::load_from_memory(png)?;
        std::fs::create_dir_all(&self.dir)?;
        let image_path = self.image_path(id);
        image.to_rgba8().save(&image_path)?;
        metadata.baseline_id = id.to_string();
        if metadata.captured_at.is_none() {
            metadata.captured_at = Some(chrono::Utc::now().to_rfc3339());
        }
        std::fs::write(self.metadata_path(id), serde_json::to_string_pretty(&metadata)?)?;
        info!(baseline_id = id, path = %image_path.display(), "baseline saved");
        Ok(image_path)
    }

    /// Viewport recorded for the first of `ids` that has one
    #[must_use]
    pub fn first_viewport<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Option<Viewport> {
        ids.into_iter()
            .filter_map(|id| self.metadata(id).ok())
            .find_map(|m| m.viewport_size)
    }
}
