//! Result and error types for Sanar.
//!
//! Every error belongs to exactly one [`ErrorClass`]. The class decides
//! whether the replay engine may attempt selector healing.

use crate::oracle::OracleError;
use thiserror::Error;

/// Result type for Sanar operations
pub type SanarResult<T> = Result<T, SanarError>;

/// Failure classes used for healing and reporting decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed step parameters or unknown actions
    Input,
    /// Timeout, not-actionable, detached or missing element
    Interaction,
    /// Text, attribute, visibility, count or checked-state mismatch
    Assertion,
    /// Pixel comparison failed and was not overridden
    VisualMismatch,
    /// Oracle call failed or returned something unusable
    Oracle,
    /// Browser init, missing file, parse failure
    Setup,
    /// Snapshot could not be turned into a tree
    DomBuild,
}

impl ErrorClass {
    /// Label used in reports
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "InputError",
            Self::Interaction => "InteractionError",
            Self::Assertion => "AssertionError",
            Self::VisualMismatch => "VisualMismatchError",
            Self::Oracle => "OracleError",
            Self::Setup => "SetupError",
            Self::DomBuild => "DomBuildError",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in Sanar
#[derive(Debug, Error)]
pub enum SanarError {
    /// Step is structurally invalid
    #[error("Invalid step {step_id}: {message}")]
    InvalidStep {
        /// Step id
        step_id: u32,
        /// Error message
        message: String,
    },

    /// Required action parameter is absent or has the wrong type
    #[error("Step {step_id} ({action}) is missing parameter '{parameter}'")]
    MissingParameter {
        /// Step id
        step_id: u32,
        /// Action tag
        action: String,
        /// Parameter name
        parameter: String,
    },

    /// Action tag outside the closed vocabulary
    #[error("Unknown action '{action}' in step {step_id}")]
    UnknownAction {
        /// Step id
        step_id: u32,
        /// Offending tag
        action: String,
    },

    /// Operation timed out
    #[error("Timeout after {ms}ms waiting for {what}")]
    Timeout {
        /// What was awaited (selector or load state)
        what: String,
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Element exists but cannot receive the action
    #[error("Element '{selector}' is not actionable: {message}")]
    NotActionable {
        /// Selector used
        selector: String,
        /// Error message
        message: String,
    },

    /// Element was removed from the document mid-action
    #[error("Element '{selector}' is detached from the DOM")]
    Detached {
        /// Selector used
        selector: String,
    },

    /// Navigation did not complete
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// Target URL
        url: String,
        /// Error message
        message: String,
    },

    /// Selector resolved to nothing
    #[error("Element not found: {selector}")]
    ElementNotFound {
        /// Selector used
        selector: String,
    },

    /// Assertion failed
    #[error("Assertion failed: {message}")]
    Assertion {
        /// Error message
        message: String,
    },

    /// Pixel comparison exceeded threshold and was not overridden
    #[error("Visual mismatch for baseline '{baseline_id}': ratio {ratio:.4} > threshold {threshold:.4}")]
    VisualMismatch {
        /// Baseline id
        baseline_id: String,
        /// Mismatched pixel ratio
        ratio: f64,
        /// Allowed ratio
        threshold: f64,
    },

    /// Capture and baseline differ in size
    #[error("Visual dimension mismatch for baseline '{baseline_id}': baseline {baseline:?}, current {current:?}")]
    DimensionMismatch {
        /// Baseline id
        baseline_id: String,
        /// Baseline (width, height)
        baseline: (u32, u32),
        /// Current (width, height)
        current: (u32, u32),
    },

    /// Oracle failure
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Browser session failure outside any element interaction
    #[error("Browser error: {message}")]
    Browser {
        /// Error message
        message: String,
    },

    /// Browser launch failed
    #[error("Failed to launch browser: {message}")]
    BrowserLaunch {
        /// Error message
        message: String,
    },

    /// Test file does not exist
    #[error("Test file not found: {path}")]
    TestFileNotFound {
        /// Path that was looked up
        path: String,
    },

    /// Test file could not be parsed
    #[error("Failed to parse test file {path}: {message}")]
    TestFileParse {
        /// Path of the file
        path: String,
        /// Error message
        message: String,
    },

    /// Baseline missing or unreadable
    #[error("Baseline '{baseline_id}' unavailable: {message}")]
    Baseline {
        /// Baseline id
        baseline_id: String,
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Snapshot could not be built into a tree
    #[error("DOM build failed: {message}")]
    DomBuild {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image encode/decode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl SanarError {
    /// Failure class of this error
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidStep { .. } | Self::MissingParameter { .. } | Self::UnknownAction { .. } => {
                ErrorClass::Input
            }
            Self::Timeout { .. }
            | Self::NotActionable { .. }
            | Self::Detached { .. }
            | Self::Navigation { .. }
            | Self::ElementNotFound { .. } => ErrorClass::Interaction,
            Self::Assertion { .. } => ErrorClass::Assertion,
            Self::VisualMismatch { .. } | Self::DimensionMismatch { .. } => {
                ErrorClass::VisualMismatch
            }
            Self::Oracle(_) => ErrorClass::Oracle,
            Self::Browser { .. }
            | Self::BrowserLaunch { .. }
            | Self::TestFileNotFound { .. }
            | Self::TestFileParse { .. }
            | Self::Baseline { .. }
            | Self::Config { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Image(_) => ErrorClass::Setup,
            Self::DomBuild { .. } => ErrorClass::DomBuild,
        }
    }

    /// Whether selector healing may be attempted for this error.
    ///
    /// The engine additionally requires a selector on the step and healing
    /// to be enabled.
    #[must_use]
    pub const fn is_healable(&self) -> bool {
        matches!(self.class(), ErrorClass::Interaction)
    }

    /// Shorthand for an assertion failure
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
        }
    }

    /// Shorthand for a DOM build failure
    pub fn dom_build(message: impl Into<String>) -> Self {
        Self::DomBuild {
            message: message.into(),
        }
    }

    /// Shorthand for a browser session failure
    pub fn browser(message: impl Into<String>) -> Self {
        Self::Browser {
            message: message.into(),
        }
    }

    /// Shorthand for a configuration failure
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_interaction_errors_are_healable() {
        let errors = [
            SanarError::Timeout {
                what: "#a".into(),
                ms: 10,
            },
            SanarError::NotActionable {
                selector: "#a".into(),
                message: "covered".into(),
            },
            SanarError::Detached {
                selector: "#a".into(),
            },
            SanarError::ElementNotFound {
                selector: "#a".into(),
            },
        ];
        for err in errors {
            assert_eq!(err.class(), ErrorClass::Interaction);
            assert!(err.is_healable(), "{err} should be healable");
        }
    }

    #[test]
    fn test_content_failures_are_not_healable() {
        let errors = [
            SanarError::assertion("count 2 != 3"),
            SanarError::MissingParameter {
                step_id: 1,
                action: "type".into(),
                parameter: "text".into(),
            },
            SanarError::VisualMismatch {
                baseline_id: "home".into(),
                ratio: 0.5,
                threshold: 0.01,
            },
            SanarError::DimensionMismatch {
                baseline_id: "home".into(),
                baseline: (800, 600),
                current: (810, 600),
            },
            SanarError::Oracle(OracleError::EmptyResponse),
            SanarError::dom_build("no map"),
        ];
        for err in errors {
            assert!(!err.is_healable(), "{err} should not be healable");
        }
    }

    #[test]
    fn test_class_labels() {
        assert_eq!(ErrorClass::Input.to_string(), "InputError");
        assert_eq!(
            SanarError::config("bad").class().as_str(),
            "SetupError"
        );
        let io = SanarError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "x"));
        assert_eq!(io.class(), ErrorClass::Setup);
    }

    #[test]
    fn test_display_messages() {
        let err = SanarError::UnknownAction {
            step_id: 4,
            action: "hover".into(),
        };
        assert_eq!(err.to_string(), "Unknown action 'hover' in step 4");
        let err = SanarError::Timeout {
            what: "#go".into(),
            ms: 5000,
        };
        assert!(err.to_string().contains("5000ms"));
    }
}
