//! Outcome of one replay run.

use crate::driver::{ConsoleMessage, NetworkRequest};
use crate::healing::HealingAttempt;
use crate::result::{ErrorClass, SanarError};
use crate::test_case::TestStep;
use crate::visual::VisualAssertionResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Final verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Every step passed
    Pass,
    /// A step failed
    Fail,
    /// Run abandoned for re-recording
    HealingTriggered,
    /// Run could not start
    Error,
}

impl RunStatus {
    /// Report label
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::HealingTriggered => "HEALING_TRIGGERED",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the run stood when it failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Page URL at failure time
    pub url: Option<String>,
    /// Description of the failing step
    pub step_description: String,
    /// Action of the failing step
    pub action: Option<String>,
    /// Error class
    pub error_class: ErrorClass,
}

/// Everything a run reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Test name
    pub test_name: String,
    /// Test file, when run from disk
    pub test_file: Option<PathBuf>,
    /// Verdict
    pub status: RunStatus,
    /// One-line summary
    pub message: String,
    /// Steps started, including the failing one
    pub steps_executed: usize,
    /// First failing step
    pub failed_step: Option<TestStep>,
    /// Error text
    pub error_details: Option<String>,
    /// Error class
    pub error_class: Option<ErrorClass>,
    /// Screenshot saved on failure
    pub screenshot_on_failure: Option<PathBuf>,
    /// Last error/warning console entries at failure time
    pub console_messages_on_failure: Vec<ConsoleMessage>,
    /// Every healing attempt, in order
    pub healing_attempts: Vec<HealingAttempt>,
    /// Steps whose selector was replaced
    pub healed_steps_count: usize,
    /// Whether healed selectors were written back
    pub healed_file_saved: bool,
    /// One entry per compared visual step
    pub visual_assertion_results: Vec<VisualAssertionResult>,
    /// Details of the failing visual step
    pub visual_failure_details: Option<VisualAssertionResult>,
    /// Navigation timing after the first navigation
    pub performance_timing: Option<serde_json::Value>,
    /// Requests seen during the run
    pub network_requests: Vec<NetworkRequest>,
    /// Page state at failure
    pub failure_context: Option<FailureContext>,
    /// Wall time
    pub duration_seconds: f64,
}

impl RunResult {
    /// Empty result for `test_name`, status `ERROR` until the run finishes
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            test_file: None,
            status: RunStatus::Error,
            message: String::new(),
            steps_executed: 0,
            failed_step: None,
            error_details: None,
            error_class: None,
            screenshot_on_failure: None,
            console_messages_on_failure: Vec::new(),
            healing_attempts: Vec::new(),
            healed_steps_count: 0,
            healed_file_saved: false,
            visual_assertion_results: Vec::new(),
            visual_failure_details: None,
            performance_timing: None,
            network_requests: Vec::new(),
            failure_context: None,
            duration_seconds: 0.0,
        }
    }

    /// Result for a run that could not start
    #[must_use]
    pub fn setup_error(test_name: impl Into<String>, error: &SanarError) -> Self {
        let mut result = Self::new(test_name);
        result.status = RunStatus::Error;
        result.message = format!("Setup failed: {error}");
        result.error_details = Some(error.to_string());
        result.error_class = Some(error.class());
        result
    }

    /// Whether the run passed
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Pass
    }

    /// Record a fatal error
    pub fn record_error(&mut self, error: &SanarError) {
        self.error_details = Some(error.to_string());
        self.error_class = Some(error.class());
    }

    /// Pretty JSON
    ///
    /// # Errors
    ///
    /// Serialization failure
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
