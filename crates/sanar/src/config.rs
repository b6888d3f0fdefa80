//! Engine configuration.
//!
//! Usually read from a YAML file; every field has a default so partial files
//! are fine:
//!
//! ```yaml
//! enable_healing: true
//! healing_mode: soft
//! healing_retries_per_step: 2
//! oracle:
//!   base_url: http://localhost:8081
//!   model: qwen2.5-vl
//! ```

use crate::driver::{DriverConfig, Viewport};
use crate::result::{SanarError, SanarResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How failures are repaired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingMode {
    /// Ask the oracle for one replacement selector and retry the step
    #[default]
    Soft,
    /// Abandon the run and re-record the whole test
    Hard,
}

impl HealingMode {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Hard => "hard",
        }
    }
}

impl std::fmt::Display for HealingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HealingMode {
    type Err = SanarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soft" => Ok(Self::Soft),
            "hard" => Ok(Self::Hard),
            other => Err(SanarError::config(format!("unknown healing mode '{other}'"))),
        }
    }
}

/// Oracle endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL of an OpenAI-compatible server
    pub base_url: Option<String>,
    /// Model name sent with each request
    pub model: String,
    /// Bearer token
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Minimum time between calls
    pub min_interval_ms: u64,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "default".to_string(),
            api_key: None,
            min_interval_ms: 1000,
            timeout_secs: 120,
        }
    }
}

impl OracleConfig {
    /// Whether an endpoint is set
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.base_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }

    /// Minimum interval as a duration
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Replay engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Soft or hard healing
    pub healing_mode: HealingMode,
    /// Master switch for healing
    pub enable_healing: bool,
    /// Oracle calls allowed per failing step in soft mode
    pub healing_retries_per_step: u32,
    /// Timeout for element actions and assertions
    pub action_timeout_ms: u64,
    /// Timeout for navigation
    pub navigation_timeout_ms: u64,
    /// Poll interval while waiting on the page
    pub poll_interval_ms: u64,
    /// Time allowed for validating a healed selector
    pub selector_validation_timeout_ms: u64,
    /// Default mismatched-pixel ratio allowed by visual steps
    pub pixel_threshold: f64,
    /// Per-pixel color distance threshold (0 = exact)
    pub pixelmatch_threshold: f64,
    /// Count anti-aliased pixels as mismatches
    pub include_anti_aliasing: bool,
    /// Where baselines live
    pub baseline_dir: PathBuf,
    /// Where failure screenshots and diff images go
    pub output_dir: PathBuf,
    /// Run the browser headless
    pub headless: bool,
    /// Fixed viewport
    pub viewport: Option<Viewport>,
    /// Record navigation timing after the first navigation
    pub capture_performance: bool,
    /// Attach the network log to the result
    pub capture_network: bool,
    /// Oracle endpoint
    pub oracle: OracleConfig,
    /// External recorder used for hard healing
    pub recorder_command: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            healing_mode: HealingMode::Soft,
            enable_healing: false,
            healing_retries_per_step: 1,
            action_timeout_ms: 5000,
            navigation_timeout_ms: 30_000,
            poll_interval_ms: 50,
            selector_validation_timeout_ms: 2000,
            pixel_threshold: 0.01,
            pixelmatch_threshold: 0.1,
            include_anti_aliasing: true,
            baseline_dir: PathBuf::from("./visual_baselines"),
            output_dir: PathBuf::from("./output"),
            headless: true,
            viewport: None,
            capture_performance: true,
            capture_network: true,
            oracle: OracleConfig::default(),
            recorder_command: None,
        }
    }
}

impl EngineConfig {
    /// Default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a YAML config file and validate it.
    ///
    /// # Errors
    ///
    /// Unreadable file, invalid YAML, or failed [`EngineConfig::validate`].
    pub fn from_file(path: &Path) -> SanarResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SanarError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    /// Parse YAML text and validate it.
    ///
    /// # Errors
    ///
    /// Invalid YAML or failed [`EngineConfig::validate`].
    pub fn from_yaml(yaml: &str) -> SanarResult<Self> {
        let config: Self =
            serde_yaml_ng::from_str(yaml).map_err(|e| SanarError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// [`SanarError::Config`] naming the first bad field.
    pub fn validate(&self) -> SanarResult<()> {
        for (name, value) in [
            ("pixel_threshold", self.pixel_threshold),
            ("pixelmatch_threshold", self.pixelmatch_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SanarError::config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(SanarError::config("poll_interval_ms must be positive"));
        }
        if let Some(vp) = self.viewport {
            if vp.width == 0 || vp.height == 0 {
                return Err(SanarError::config("viewport must be non-empty"));
            }
        }
        Ok(())
    }

    /// Enable healing in the given mode
    #[must_use]
    pub const fn with_healing(mut self, mode: HealingMode) -> Self {
        self.enable_healing = true;
        self.healing_mode = mode;
        self
    }

    /// Set the soft-healing retry bound
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.healing_retries_per_step = retries;
        self
    }

    /// Set the action timeout
    #[must_use]
    pub const fn with_action_timeout_ms(mut self, ms: u64) -> Self {
        self.action_timeout_ms = ms;
        self
    }

    /// Set the navigation timeout
    #[must_use]
    pub const fn with_navigation_timeout_ms(mut self, ms: u64) -> Self {
        self.navigation_timeout_ms = ms;
        self
    }

    /// Set the poll interval
    #[must_use]
    pub const fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the default pixel threshold
    #[must_use]
    pub const fn with_pixel_threshold(mut self, threshold: f64) -> Self {
        self.pixel_threshold = threshold;
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Fix the viewport
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Some(Viewport { width, height });
        self
    }

    /// Set the baseline directory
    #[must_use]
    pub fn with_baseline_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.baseline_dir = dir.into();
        self
    }

    /// Set the output directory
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the oracle settings
    #[must_use]
    pub fn with_oracle(mut self, oracle: OracleConfig) -> Self {
        self.oracle = oracle;
        self
    }

    /// Set the hard-healing recorder program
    #[must_use]
    pub fn with_recorder_command(mut self, command: impl Into<String>) -> Self {
        self.recorder_command = Some(command.into());
        self
    }

    /// Action timeout
    #[must_use]
    pub const fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    /// Navigation timeout, never shorter than the action timeout
    #[must_use]
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms.max(self.action_timeout_ms))
    }

    /// Selector validation timeout
    #[must_use]
    pub const fn selector_validation_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_validation_timeout_ms)
    }

    /// Browser launch settings for a run
    #[must_use]
    pub fn driver_config(&self, viewport: Viewport) -> DriverConfig {
        DriverConfig::new().headless(self.headless).viewport(viewport.width, viewport.height)
    }
}
