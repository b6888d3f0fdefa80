//! Persisted test files and the closed action vocabulary.
//!
//! The file format is plain JSON:
//!
//! ```json
//! {
//!   "test_name": "login",
//!   "feature_description": "User logs in",
//!   "recorded_at": "2024-05-01T10:00:00Z",
//!   "steps": [
//!     {"step_id": 1, "action": "navigate", "description": "Open",
//!      "parameters": {"url": "https://example.com"}, "selector": null, "wait_after_secs": 0}
//!   ]
//! }
//! ```
//!
//! Action tags are checked when the file is loaded; parameters are checked
//! when a step is turned into a [`StepAction`] right before it runs.

use crate::driver::{LoadState, ScrollDirection, SelectOption, WaitState};
use crate::result::{SanarError, SanarResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Closed set of step actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Load a URL
    Navigate,
    /// Click an element
    Click,
    /// Fill an input
    Type,
    /// Check a checkbox
    Check,
    /// Uncheck a checkbox
    Uncheck,
    /// Pick a `<select>` option
    Select,
    /// Scroll the page
    Scroll,
    /// Wait for a page load state
    WaitForLoadState,
    /// Wait for an element state
    WaitForSelector,
    /// Exact text match
    AssertTextEquals,
    /// Substring text match
    AssertTextContains,
    /// Element is visible
    AssertVisible,
    /// Element is hidden or absent
    AssertHidden,
    /// Attribute has a value
    AssertAttributeEquals,
    /// Exact number of matches
    AssertElementCount,
    /// Checkbox is checked
    AssertChecked,
    /// Checkbox is not checked
    AssertNotChecked,
    /// Element is enabled
    AssertEnabled,
    /// Element is disabled
    AssertDisabled,
    /// Screenshot matches a stored baseline
    AssertVisualMatch,
    /// Oracle judges the description holds
    AssertLlmVerification,
    /// Older name for [`ActionKind::AssertLlmVerification`]
    AssertPassedVerification,
}

impl ActionKind {
    /// Every action, in declaration order
    pub const ALL: [Self; 22] = [
        Self::Navigate,
        Self::Click,
        Self::Type,
        Self::Check,
        Self::Uncheck,
        Self::Select,
        Self::Scroll,
        Self::WaitForLoadState,
        Self::WaitForSelector,
        Self::AssertTextEquals,
        Self::AssertTextContains,
        Self::AssertVisible,
        Self::AssertHidden,
        Self::AssertAttributeEquals,
        Self::AssertElementCount,
        Self::AssertChecked,
        Self::AssertNotChecked,
        Self::AssertEnabled,
        Self::AssertDisabled,
        Self::AssertVisualMatch,
        Self::AssertLlmVerification,
        Self::AssertPassedVerification,
    ];

    /// Tag used in test files
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::Click => "click",
            Self::Type => "type",
            Self::Check => "check",
            Self::Uncheck => "uncheck",
            Self::Select => "select",
            Self::Scroll => "scroll",
            Self::WaitForLoadState => "wait_for_load_state",
            Self::WaitForSelector => "wait_for_selector",
            Self::AssertTextEquals => "assert_text_equals",
            Self::AssertTextContains => "assert_text_contains",
            Self::AssertVisible => "assert_visible",
            Self::AssertHidden => "assert_hidden",
            Self::AssertAttributeEquals => "assert_attribute_equals",
            Self::AssertElementCount => "assert_element_count",
            Self::AssertChecked => "assert_checked",
            Self::AssertNotChecked => "assert_not_checked",
            Self::AssertEnabled => "assert_enabled",
            Self::AssertDisabled => "assert_disabled",
            Self::AssertVisualMatch => "assert_visual_match",
            Self::AssertLlmVerification => "assert_llm_verification",
            Self::AssertPassedVerification => "assert_passed_verification",
        }
    }

    /// Parse a tag
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == tag)
    }

    /// Whether the step must carry a selector
    #[must_use]
    pub const fn requires_selector(&self) -> bool {
        !matches!(
            self,
            Self::Navigate
                | Self::Scroll
                | Self::WaitForLoadState
                | Self::AssertVisualMatch
                | Self::AssertLlmVerification
                | Self::AssertPassedVerification
        )
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStep {
    /// Step number, unique within the test
    pub step_id: u32,
    /// Action tag
    pub action: ActionKind,
    /// Human description of the intent
    #[serde(default)]
    pub description: String,
    /// Action parameters
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// CSS selector or `xpath=` path
    #[serde(default)]
    pub selector: Option<String>,
    /// Pause after the step succeeds
    #[serde(default)]
    pub wait_after_secs: f64,
    /// Unknown fields, preserved on rewrite
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TestStep {
    /// Step with no parameters
    #[must_use]
    pub fn new(step_id: u32, action: ActionKind, description: impl Into<String>) -> Self {
        Self {
            step_id,
            action,
            description: description.into(),
            parameters: Map::new(),
            selector: None,
            wait_after_secs: 0.0,
            extra: Map::new(),
        }
    }

    /// Set the selector
    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    /// Set a parameter
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Selector if present and non-blank
    #[must_use]
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// A recorded test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Test name
    pub test_name: String,
    /// What the test covers
    #[serde(default)]
    pub feature_description: String,
    /// Recording time, as written by the recorder
    #[serde(default)]
    pub recorded_at: Option<String>,
    /// Steps in execution order
    pub steps: Vec<TestStep>,
    /// Unknown fields, preserved on rewrite
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TestCase {
    /// Parse a test from JSON text.
    ///
    /// # Errors
    ///
    /// [`SanarError::UnknownAction`] for tags outside the vocabulary,
    /// [`SanarError::TestFileParse`] for anything else malformed.
    pub fn from_json(json: &str, origin: &str) -> SanarResult<Self> {
        let raw: Value = serde_json::from_str(json).map_err(|e| SanarError::TestFileParse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        if let Some(steps) = raw.get("steps").and_then(Value::as_array) {
            for step in steps {
                let tag = step.get("action").and_then(Value::as_str).unwrap_or_default();
                if ActionKind::from_tag(tag).is_none() {
                    let step_id = step.get("step_id").and_then(Value::as_u64).unwrap_or(0);
                    return Err(SanarError::UnknownAction {
                        step_id: step_id as u32,
                        action: tag.to_string(),
                    });
                }
            }
        }
        serde_json::from_value(raw).map_err(|e| SanarError::TestFileParse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Load a test file.
    ///
    /// # Errors
    ///
    /// [`SanarError::TestFileNotFound`] if missing, otherwise as
    /// [`TestCase::from_json`].
    pub fn load(path: &Path) -> SanarResult<Self> {
        if !path.exists() {
            return Err(SanarError::TestFileNotFound {
                path: path.display().to_string(),
            });
        }
        let text = std::fs::read_to_string(path)?;
        let case = Self::from_json(&text, &path.display().to_string())?;
        debug!(path = %path.display(), steps = case.steps.len(), "test file loaded");
        Ok(case)
    }

    /// Write the test back as pretty JSON
    ///
    /// # Errors
    ///
    /// I/O or serialization failure
    pub fn save(&self, path: &Path) -> SanarResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Step by id
    #[must_use]
    pub fn step(&self, step_id: u32) -> Option<&TestStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Baseline ids referenced by visual steps, in order
    #[must_use]
    pub fn baseline_ids(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.action == ActionKind::AssertVisualMatch)
            .filter_map(|s| s.parameters.get("baseline_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }
}

/// A step with its parameters checked and typed
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Load a URL
    Navigate {
        /// Target URL
        url: String,
    },
    /// Click
    Click,
    /// Fill an input
    Type {
        /// Text to enter
        text: String,
    },
    /// Check or uncheck
    SetChecked(bool),
    /// Pick an option
    Select(SelectOption),
    /// Scroll the page
    Scroll(ScrollDirection),
    /// Wait for load state
    WaitForLoadState(LoadState),
    /// Wait for an element state
    WaitForSelector {
        /// Target state
        state: WaitState,
        /// Override of the action timeout
        timeout_ms: Option<u64>,
    },
    /// Exact text
    AssertTextEquals(String),
    /// Substring
    AssertTextContains(String),
    /// Visible
    AssertVisible,
    /// Hidden or absent
    AssertHidden,
    /// Attribute value
    AssertAttributeEquals {
        /// Attribute name
        name: String,
        /// Expected value
        expected: String,
    },
    /// Number of matches
    AssertElementCount(usize),
    /// Checked state
    AssertChecked(bool),
    /// Enabled state
    AssertEnabled(bool),
    /// Visual comparison
    AssertVisualMatch {
        /// Baseline id
        baseline_id: String,
        /// Ask the oracle when pixels disagree
        use_llm_fallback: bool,
        /// Override of the configured threshold
        pixel_threshold: Option<f64>,
    },
    /// Oracle verification of the description
    AssertLlmVerification,
}

impl StepAction {
    /// Check `step` and build its typed action.
    ///
    /// # Errors
    ///
    /// Input-class errors for missing/invalid parameters or a missing
    /// selector on an element action.
    pub fn from_step(step: &TestStep) -> SanarResult<Self> {
        let kind = step.action;
        if kind.requires_selector() && step.selector().is_none() {
            return Err(SanarError::InvalidStep {
                step_id: step.step_id,
                message: format!("action '{kind}' requires a selector"),
            });
        }
        if Duration::try_from_secs_f64(step.wait_after_secs).is_err() {
            return Err(SanarError::InvalidStep {
                step_id: step.step_id,
                message: format!("wait_after_secs {} is not a usable duration", step.wait_after_secs),
            });
        }
        let params = Params { step };
        let action = match kind {
            ActionKind::Navigate => Self::Navigate {
                url: params.string("url")?,
            },
            ActionKind::Click => Self::Click,
            ActionKind::Type => Self::Type {
                text: params.string("text")?,
            },
            ActionKind::Check => Self::SetChecked(true),
            ActionKind::Uncheck => Self::SetChecked(false),
            ActionKind::Select => Self::Select(params.select_option()?),
            ActionKind::Scroll => Self::Scroll(params.parse_enum("direction")?),
            ActionKind::WaitForLoadState => {
                let state = match params.optional_string("state") {
                    Some(_) => params.parse_enum("state")?,
                    None => LoadState::Load,
                };
                Self::WaitForLoadState(state)
            }
            ActionKind::WaitForSelector => {
                let state = match params.optional_string("state") {
                    Some(_) => params.parse_enum("state")?,
                    None => WaitState::Visible,
                };
                Self::WaitForSelector {
                    state,
                    timeout_ms: params.optional_u64("timeout_ms")?,
                }
            }
            ActionKind::AssertTextEquals => Self::AssertTextEquals(params.string("expected_text")?),
            ActionKind::AssertTextContains => {
                Self::AssertTextContains(params.string("expected_text")?)
            }
            ActionKind::AssertVisible => Self::AssertVisible,
            ActionKind::AssertHidden => Self::AssertHidden,
            ActionKind::AssertAttributeEquals => Self::AssertAttributeEquals {
                name: params.string("attribute_name")?,
                expected: params.string("expected_value")?,
            },
            ActionKind::AssertElementCount => {
                let count = params
                    .optional_u64("expected_count")?
                    .ok_or_else(|| params.missing("expected_count"))?;
                Self::AssertElementCount(count as usize)
            }
            ActionKind::AssertChecked => Self::AssertChecked(true),
            ActionKind::AssertNotChecked => Self::AssertChecked(false),
            ActionKind::AssertEnabled => Self::AssertEnabled(true),
            ActionKind::AssertDisabled => Self::AssertEnabled(false),
            ActionKind::AssertVisualMatch => Self::AssertVisualMatch {
                baseline_id: params.string("baseline_id")?,
                use_llm_fallback: params.optional_bool("use_llm_fallback")?.unwrap_or(true),
                pixel_threshold: params.optional_ratio("pixel_threshold")?,
            },
            ActionKind::AssertLlmVerification | ActionKind::AssertPassedVerification => {
                Self::AssertLlmVerification
            }
        };
        Ok(action)
    }

    /// Whether this action moves the page to a new document
    #[must_use]
    pub const fn is_navigation(&self) -> bool {
        matches!(self, Self::Navigate { .. })
    }
}

struct Params<'a> {
    step: &'a TestStep,
}

impl Params<'_> {
    fn missing(&self, name: &str) -> SanarError {
        SanarError::MissingParameter {
            step_id: self.step.step_id,
            action: self.step.action.to_string(),
            parameter: name.to_string(),
        }
    }

    fn value(&self, name: &str) -> Option<&Value> {
        self.step.parameters.get(name).filter(|v| !v.is_null())
    }

    fn optional_string(&self, name: &str) -> Option<String> {
        match self.value(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn string(&self, name: &str) -> SanarResult<String> {
        self.optional_string(name).ok_or_else(|| self.missing(name))
    }

    fn optional_u64(&self, name: &str) -> SanarResult<Option<u64>> {
        match self.value(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| self.missing(name)),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| self.missing(name)),
            Some(_) => Err(self.missing(name)),
        }
    }

    fn optional_f64(&self, name: &str) -> SanarResult<Option<f64>> {
        match self.value(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n.as_f64().map(Some).ok_or_else(|| self.missing(name)),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| self.missing(name)),
            Some(_) => Err(self.missing(name)),
        }
    }

    fn optional_ratio(&self, name: &str) -> SanarResult<Option<f64>> {
        match self.optional_f64(name)? {
            Some(value) if !(0.0..=1.0).contains(&value) => Err(SanarError::InvalidStep {
                step_id: self.step.step_id,
                message: format!("{name} must be within [0, 1], got {value}"),
            }),
            other => Ok(other),
        }
    }

    fn optional_bool(&self, name: &str) -> SanarResult<Option<bool>> {
        match self.value(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Some(true)),
                "false" | "no" | "0" => Ok(Some(false)),
                _ => Err(self.missing(name)),
            },
            Some(_) => Err(self.missing(name)),
        }
    }

    fn parse_enum<T: serde::de::DeserializeOwned>(&self, name: &str) -> SanarResult<T> {
        let raw = self.string(name)?.to_ascii_lowercase();
        serde_json::from_value(Value::String(raw)).map_err(|_| self.missing(name))
    }

    fn select_option(&self) -> SanarResult<SelectOption> {
        if let Some(label) = self.optional_string("option_label") {
            return Ok(SelectOption::Label(label));
        }
        if let Some(value) = self.optional_string("option_value") {
            return Ok(SelectOption::Value(value));
        }
        if let Some(index) = self.optional_u64("option_index")? {
            return Ok(SelectOption::Index(index as usize));
        }
        Err(self.missing("option_label|option_value|option_index"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::result::ErrorClass;
    use serde_json::json;

    fn sample_json() -> String {
        json!({
            "test_name": "login",
            "feature_description": "User logs in",
            "recorded_at": "2024-05-01T10:00:00Z",
            "steps": [
                {"step_id": 1, "action": "navigate", "description": "Open",
                 "parameters": {"url": "https://example.com"}, "selector": null, "wait_after_secs": 0},
                {"step_id": 2, "action": "click", "description": "Submit",
                 "parameters": {}, "selector": "#old-id", "wait_after_secs": 0.5, "recorded_by": "ui"}
            ],
            "schema": 2
        })
        .to_string()
    }

    mod file_tests {
        use super::*;

        #[test]
        fn test_parse_and_preserve_unknown_fields() {
            let case = TestCase::from_json(&sample_json(), "mem").unwrap();
            assert_eq!(case.steps.len(), 2);
            assert_eq!(case.steps[1].action, ActionKind::Click);
            assert_eq!(case.steps[1].extra["recorded_by"], "ui");
            assert_eq!(case.extra["schema"], 2);
            let back: Value = serde_json::to_value(&case).unwrap();
            assert_eq!(back["steps"][1]["recorded_by"], "ui");
            assert_eq!(back["schema"], 2);
        }

        #[test]
        fn test_unknown_action_is_input_error() {
            let json = json!({"test_name": "t", "steps": [{"step_id": 3, "action": "hover"}]}).to_string();
            let err = TestCase::from_json(&json, "mem").unwrap_err();
            assert!(matches!(err, SanarError::UnknownAction { step_id: 3, .. }));
            assert_eq!(err.class(), ErrorClass::Input);
        }

        #[test]
        fn test_malformed_json_is_setup_error() {
            let err = TestCase::from_json("{not json", "mem").unwrap_err();
            assert_eq!(err.class(), ErrorClass::Setup);
        }

        #[test]
        fn test_save_and_load_round_trip() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("login.json");
            let mut case = TestCase::from_json(&sample_json(), "mem").unwrap();
            case.steps[1].selector = Some("[data-testid='login-btn']".into());
            case.save(&path).unwrap();
            let loaded = TestCase::load(&path).unwrap();
            assert_eq!(loaded.steps[1].selector(), Some("[data-testid='login-btn']"));
            assert_eq!(loaded, case);
        }

        #[test]
        fn test_missing_file() {
            let err = TestCase::load(Path::new("/definitely/not/here.json")).unwrap_err();
            assert!(matches!(err, SanarError::TestFileNotFound { .. }));
        }

        #[test]
        fn test_baseline_ids() {
            let case = TestCase {
                test_name: "v".into(),
                feature_description: String::new(),
                recorded_at: None,
                steps: vec![
                    TestStep::new(1, ActionKind::AssertVisualMatch, "home")
                        .with_param("baseline_id", "home"),
                    TestStep::new(2, ActionKind::Click, "x").with_selector("#x"),
                ],
                extra: Map::new(),
            };
            assert_eq!(case.baseline_ids(), vec!["home".to_string()]);
        }
    }

    mod action_tests {
        use super::*;

        #[test]
        fn test_every_tag_round_trips() {
            for kind in ActionKind::ALL {
                assert_eq!(ActionKind::from_tag(kind.as_str()), Some(kind));
                let json = serde_json::to_value(kind).unwrap();
                assert_eq!(json, kind.as_str());
            }
        }

        #[test]
        fn test_typed_parameters() {
            let step = TestStep::new(1, ActionKind::Type, "enter").with_selector("#q").with_param("text", "rust");
            assert_eq!(StepAction::from_step(&step).unwrap(), StepAction::Type { text: "rust".into() });

            let step = TestStep::new(2, ActionKind::AssertElementCount, "count")
                .with_selector("li")
                .with_param("expected_count", 3);
            assert_eq!(StepAction::from_step(&step).unwrap(), StepAction::AssertElementCount(3));

            let step = TestStep::new(3, ActionKind::Select, "pick")
                .with_selector("#c")
                .with_param("option_index", "2");
            assert_eq!(
                StepAction::from_step(&step).unwrap(),
                StepAction::Select(SelectOption::Index(2))
            );

            let step = TestStep::new(4, ActionKind::Scroll, "down").with_param("direction", "Down");
            assert_eq!(
                StepAction::from_step(&step).unwrap(),
                StepAction::Scroll(ScrollDirection::Down)
            );
        }

        #[test]
        fn test_missing_parameters() {
            let step = TestStep::new(1, ActionKind::Type, "enter").with_selector("#q");
            let err = StepAction::from_step(&step).unwrap_err();
            assert!(matches!(err, SanarError::MissingParameter { .. }));
            assert!(!err.is_healable());

            let step = TestStep::new(2, ActionKind::AssertAttributeEquals, "attr")
                .with_selector("#q")
                .with_param("attribute_name", "href");
            assert!(matches!(
                StepAction::from_step(&step).unwrap_err(),
                SanarError::MissingParameter { parameter, .. } if parameter == "expected_value"
            ));

            let step = TestStep::new(3, ActionKind::Click, "no selector");
            assert_eq!(StepAction::from_step(&step).unwrap_err().class(), ErrorClass::Input);

            let step = TestStep::new(4, ActionKind::Scroll, "bad").with_param("direction", "left");
            assert!(StepAction::from_step(&step).is_err());
        }

        #[test]
        fn test_defaults() {
            let step = TestStep::new(1, ActionKind::WaitForLoadState, "wait");
            assert_eq!(
                StepAction::from_step(&step).unwrap(),
                StepAction::WaitForLoadState(LoadState::Load)
            );
            let step = TestStep::new(2, ActionKind::AssertVisualMatch, "v").with_param("baseline_id", "home");
            assert_eq!(
                StepAction::from_step(&step).unwrap(),
                StepAction::AssertVisualMatch {
                    baseline_id: "home".into(),
                    use_llm_fallback: true,
                    pixel_threshold: None
                }
            );
            let step = TestStep::new(3, ActionKind::AssertPassedVerification, "legacy");
            assert_eq!(StepAction::from_step(&step).unwrap(), StepAction::AssertLlmVerification);
        }

        #[test]
        fn test_wait_after_must_fit_a_duration() {
            for wait in [1e300, -1.0, f64::NAN, f64::INFINITY] {
                let mut step = TestStep::new(7, ActionKind::Navigate, "open").with_param("url", "https://a.test");
                step.wait_after_secs = wait;
                let err = StepAction::from_step(&step).unwrap_err();
                assert!(matches!(err, SanarError::InvalidStep { step_id: 7, .. }), "{wait}");
                assert_eq!(err.class(), ErrorClass::Input);
            }

            let mut step = TestStep::new(8, ActionKind::Navigate, "open").with_param("url", "https://a.test");
            step.wait_after_secs = 2.5;
            assert!(StepAction::from_step(&step).is_ok());
        }

        #[test]
        fn test_pixel_threshold_override_range() {
            for bad in [json!(-0.5), json!(1.5), json!("NaN"), json!("inf")] {
                let step = TestStep::new(5, ActionKind::AssertVisualMatch, "v")
                    .with_param("baseline_id", "home")
                    .with_param("pixel_threshold", bad.clone());
                let err = StepAction::from_step(&step).unwrap_err();
                assert!(matches!(err, SanarError::InvalidStep { step_id: 5, .. }), "{bad}");
                assert_eq!(err.class(), ErrorClass::Input);
            }

            for good in [0.0, 0.02, 1.0] {
                let step = TestStep::new(6, ActionKind::AssertVisualMatch, "v")
                    .with_param("baseline_id", "home")
                    .with_param("pixel_threshold", good);
                assert!(matches!(
                    StepAction::from_step(&step).unwrap(),
                    StepAction::AssertVisualMatch { pixel_threshold: Some(t), .. } if (t - good).abs() < f64::EPSILON
                ));
            }
        }
    }
}
