//! Visual regression: pixel comparison against stored baselines with an
//! oracle override for rendering noise.
//!
//! ```text
//! load baseline ──► capture ──► same size? ──no──► DimensionMismatch
//!                                   │yes
//!                                   ▼
//!                          pixel diff ratio ≤ threshold ──► PASS
//!                                   │ over
//!                                   ▼
//!                    save diff image, fallback on? ──no──► FAIL
//!                                   │yes
//!                                   ▼
//!                   stitched image ──► oracle YES ──► PASS (override)
//!                                      NO / unclear / error ──► FAIL
//! ```

mod baseline;
mod pixel;
mod stitch;

pub use baseline::{BaselineMetadata, BaselineStore, VisualBaseline};
pub use pixel::{compare, DiffOptions, PixelDiff};
pub use stitch::{stitch, BASELINE_LABEL, CURRENT_LABEL, LABEL_BAND_HEIGHT};

use crate::driver::BrowserDriver;
use crate::oracle::{Oracle, Verdict};
use crate::result::{SanarError, SanarResult};
use image::{ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Encode an RGBA image as PNG.
///
/// # Errors
///
/// Encoder failure.
pub fn encode_png(img: &RgbaImage) -> SanarResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buffer);
    encoder.write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        image::ExtendedColorType::Rgba8,
    )?;
    Ok(buffer)
}

/// Pass/fail of one visual step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VisualStatus {
    /// Within threshold or overridden
    Pass,
    /// Over threshold and not overridden
    Fail,
}

/// Sub-result recorded for every compared visual step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualAssertionResult {
    /// Step id
    pub step_id: u32,
    /// Baseline id
    pub baseline_id: String,
    /// Outcome
    pub status: VisualStatus,
    /// Mismatched share of pixels
    pub pixel_difference_ratio: f64,
    /// Mismatched pixel count
    pub mismatched_pixels: u64,
    /// Allowed ratio
    pub pixel_threshold: f64,
    /// Whether the oracle overrode a pixel failure
    pub llm_override: bool,
    /// Oracle answer, when consulted
    pub llm_reasoning: Option<String>,
    /// Saved diff image
    pub diff_image_path: Option<PathBuf>,
    /// Element captured, `None` for full page
    pub element_selector: Option<String>,
}

impl VisualAssertionResult {
    /// Whether the step passed
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == VisualStatus::Pass
    }

    /// Error for a failed comparison
    #[must_use]
    pub fn to_error(&self) -> SanarError {
        SanarError::VisualMismatch {
            baseline_id: self.baseline_id.clone(),
            ratio: self.pixel_difference_ratio,
            threshold: self.pixel_threshold,
        }
    }
}

/// Parameters of one visual step
#[derive(Debug, Clone, PartialEq)]
pub struct VisualCheck {
    /// Step id
    pub step_id: u32,
    /// Baseline to compare against
    pub baseline_id: String,
    /// Capture only this element
    pub element_selector: Option<String>,
    /// Allowed mismatched ratio
    pub pixel_threshold: f64,
    /// Ask the oracle when pixels disagree
    pub use_llm_fallback: bool,
}

/// Runs visual checks against one baseline store
#[derive(Debug, Clone)]
pub struct VisualComparator {
    store: BaselineStore,
    options: DiffOptions,
    diff_dir: PathBuf,
}

impl VisualComparator {
    /// Comparator reading baselines from `store` and writing diffs to `diff_dir`
    pub fn new(store: BaselineStore, options: DiffOptions, diff_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            options,
            diff_dir: diff_dir.into(),
        }
    }

    /// Baseline store
    #[must_use]
    pub const fn store(&self) -> &BaselineStore {
        &self.store
    }

    /// Compare the current page (or element) with a baseline.
    ///
    /// A completed comparison returns `Ok` even when it failed; check
    /// [`VisualAssertionResult::passed`].
    ///
    /// # Errors
    ///
    /// Missing baseline or failed capture (Setup class), and
    /// [`SanarError::DimensionMismatch`] before any diffing.
    pub async fn check(
        &self,
        driver: &dyn BrowserDriver,
        oracle: Option<&dyn Oracle>,
        check: &VisualCheck,
    ) -> SanarResult<VisualAssertionResult> {
        let id = check.baseline_id.as_str();
        info!(
            baseline_id = id,
            selector = check.element_selector.as_deref().unwrap_or("page"),
            threshold = check.pixel_threshold,
            "visual assertion"
        );
        let baseline = self.store.load(id)?;
        let captured = driver.screenshot(check.element_selector.as_deref()).await?;
        let current = image::load_from_memory(&captured)?.to_rgba8();

        if baseline.dimensions() != current.dimensions() {
            error!(
                baseline_id = id,
                baseline = ?baseline.dimensions(),
                current = ?current.dimensions(),
                "visual dimensions differ"
            );
            self.save_image(&current, &format!("{id}_current"));
            return Err(SanarError::DimensionMismatch {
                baseline_id: id.to_string(),
                baseline: baseline.dimensions(),
                current: current.dimensions(),
            });
        }

        let Some(diff) = compare(&baseline.image, &current, &self.options) else {
            return Err(SanarError::DimensionMismatch {
                baseline_id: id.to_string(),
                baseline: baseline.dimensions(),
                current: current.dimensions(),
            });
        };
        let ratio = diff.ratio();
        info!(baseline_id = id, mismatched = diff.mismatched, total = diff.total, ratio, "pixel comparison");

        let mut result = VisualAssertionResult {
            step_id: check.step_id,
            baseline_id: id.to_string(),
            status: VisualStatus::Pass,
            pixel_difference_ratio: ratio,
            mismatched_pixels: diff.mismatched,
            pixel_threshold: check.pixel_threshold,
            llm_override: false,
            llm_reasoning: None,
            diff_image_path: None,
            element_selector: check.element_selector.clone(),
        };
        if ratio <= check.pixel_threshold {
            return Ok(result);
        }

        warn!(baseline_id = id, ratio, threshold = check.pixel_threshold, "pixel difference over threshold");
        result.status = VisualStatus::Fail;
        result.diff_image_path = self.save_image(&diff.image, &format!("{id}_diff"));

        match oracle.filter(|_| check.use_llm_fallback) {
            Some(oracle) => {
                let (verdict, reasoning) = ask_oracle(oracle, &baseline, &current).await;
                info!(baseline_id = id, ?verdict, "oracle visual verdict");
                if verdict.is_yes() {
                    result.status = VisualStatus::Pass;
                    result.llm_override = true;
                }
                result.llm_reasoning = Some(reasoning);
            }
            None => warn!(baseline_id = id, "oracle fallback skipped"),
        }
        Ok(result)
    }

    fn save_image(&self, img: &RgbaImage, stem: &str) -> Option<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = self.diff_dir.join(format!("{stem}_{stamp}.png"));
        let saved = std::fs::create_dir_all(&self.diff_dir)
            .map_err(SanarError::from)
            .and_then(|()| img.save(&path).map_err(SanarError::from));
        match saved {
            Ok(()) => {
                info!(path = %path.display(), "visual image saved");
                Some(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not save visual image");
                None
            }
        }
    }
}

fn visual_prompt(baseline: &VisualBaseline) -> String {
    let meta = &baseline.metadata;
    format!(
        r#"You are reviewing an automated visual regression check.
The image has two halves. The LEFT half, labeled '{BASELINE_LABEL}', is the approved baseline.
The RIGHT half, labeled '{CURRENT_LABEL}', is the current capture.

Decide whether the halves are equivalent for a user.
Ignore anti-aliasing, single-pixel shifts, font smoothing, blinking cursors and timestamps.
Treat as real differences: moved, resized, missing or added elements, changed text,
major color changes of key elements, missing or different images and icons.

Baseline id: "{}"
Captured URL: "{}"
Captured selector: "{}"

Answer with YES or NO first, then one sentence naming the deciding difference or similarity."#,
        baseline.id,
        meta.url_captured.as_deref().unwrap_or("N/A"),
        meta.selector_captured.as_deref().unwrap_or("full page"),
    )
}

async fn ask_oracle(
    oracle: &dyn Oracle,
    baseline: &VisualBaseline,
    current: &RgbaImage,
) -> (Verdict, String) {
    let Some(stitched) = stitch(&baseline.image, current) else {
        return (Verdict::Unclear, String::from("images could not be stitched"));
    };
    let png = match encode_png(&stitched) {
        Ok(png) => png,
        Err(e) => return (Verdict::Unclear, format!("stitched image encoding failed: {e}")),
    };
    match oracle.generate_multimodal(&visual_prompt(baseline), &png).await {
        Ok(answer) => (Verdict::parse(&answer), answer),
        Err(e) => {
            warn!(error = %e, "oracle visual comparison failed");
            (Verdict::Unclear, format!("oracle error: {e}"))
        }
    }
}

/// Default diff directory below an output directory
#[must_use]
pub fn diff_dir(output_dir: &Path) -> PathBuf {
    output_dir.join("visual_diffs")
}
