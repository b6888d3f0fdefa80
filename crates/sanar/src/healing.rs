//! Selector healing.
//!
//! Soft healing asks the oracle for one replacement selector, built from a
//! fresh screenshot and DOM outline, and only accepts it after counting its
//! matches on the live page. Hard healing gives up on the run and hands the
//! feature description to an external [`Recorder`].
//!
//! Every attempt, accepted or not, becomes a [`HealingAttempt`].

use crate::config::HealingMode;
use crate::dom::{serialize, ContextPurpose};
use crate::driver::{capture_dom_state, BrowserDriver};
use crate::oracle::{generate_typed, Oracle, OracleError};
use crate::result::{SanarError, SanarResult};
use crate::test_case::TestStep;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

/// How a candidate selector fared
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Validation {
    /// Candidate matched at least one element
    Accepted {
        /// Number of matches; the first is used when more than one
        matches: usize,
    },
    /// Candidate matched nothing
    NoMatches,
    /// Page rejected the selector
    Invalid {
        /// Driver message
        message: String,
    },
    /// Counting did not finish in time
    TimedOut,
    /// Oracle declined to propose a selector
    NoCandidate,
    /// Oracle call failed
    OracleFailed {
        /// Error text
        message: String,
    },
    /// Page state for the prompt could not be gathered
    ContextUnavailable {
        /// Error text
        message: String,
    },
    /// Run handed over to the recorder
    Delegated {
        /// Whether re-recording succeeded
        success: bool,
    },
}

impl Validation {
    /// Whether the candidate may be used
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// One logged healing attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingAttempt {
    /// Step id
    pub step_id: u32,
    /// Attempt number within the step, from 1
    pub attempt: u32,
    /// Soft or hard
    pub mode: HealingMode,
    /// Selector recorded in the test file
    pub original_selector: Option<String>,
    /// Selector that just failed
    pub failed_selector: Option<String>,
    /// Oracle proposal
    pub candidate_selector: Option<String>,
    /// Validation result
    pub validation: Validation,
    /// Oracle or recorder explanation
    pub reasoning: String,
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
}

impl HealingAttempt {
    /// Accepted replacement selector, if any
    #[must_use]
    pub fn healed_selector(&self) -> Option<&str> {
        if self.validation.is_accepted() {
            self.candidate_selector.as_deref()
        } else {
            None
        }
    }

    /// Whether the attempt produced a usable selector
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.healed_selector().is_some()
    }
}

/// Oracle reply shape for soft healing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSuggestion {
    /// Proposed selector, `None` when the oracle cannot tell
    #[serde(default)]
    pub new_selector: Option<String>,
    /// Why this selector
    #[serde(default)]
    pub reasoning: String,
}

impl SelectorSuggestion {
    /// JSON schema sent with the request
    #[must_use]
    pub fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "new_selector": {"type": ["string", "null"]},
                "reasoning": {"type": "string"}
            },
            "required": ["new_selector", "reasoning"],
            "additionalProperties": false
        })
    }
}

/// Failing step as seen by the healer
#[derive(Debug, Clone, Copy)]
pub struct HealRequest<'a> {
    /// Step being healed
    pub step: &'a TestStep,
    /// Selector from the test file
    pub original_selector: &'a str,
    /// Selector that just failed
    pub failed_selector: &'a str,
    /// The failure
    pub error: &'a SanarError,
    /// Attempt number, from 1
    pub attempt: u32,
}

fn healing_prompt(request: &HealRequest<'_>, url: &str, dom_context: &str) -> String {
    format!(
        r#"An automated UI test step failed, most likely because its selector no longer matches the page.
Find the element the step was meant to act on and propose a replacement selector.

Failed step
- Description: "{description}"
- Action: "{action}"
- Failed selector: `{failed}`
- Error: "{error}"

Current page
- URL: {url}
- The attached screenshot shows the page as it is now.
- HTML outline (interactive elements as `[index]`, static ones marked `(Static)`):
```html
{dom_context}
```

Rules
1. Propose a single CSS selector built from native attributes: id, name, data-testid, data-cy,
   aria-label, placeholder, visible text with its tag, or stable class combinations.
2. Never use `data-ai-id` or other debug-only attributes, generated class names, or positional
   selectors such as :nth-child unless combined with stable attributes.
3. If you cannot identify the element with confidence, set "new_selector" to null.

Reply with JSON only: {{"new_selector": "<selector or null>", "reasoning": "<why>"}}"#,
        description = request.step.description,
        action = request.step.action,
        failed = request.failed_selector,
        error = request.error,
    )
}

/// Soft healing: one oracle proposal per attempt, validated live
#[derive(Debug, Clone)]
pub struct SoftHealer {
    validation_timeout: Duration,
}

impl SoftHealer {
    /// Healer that gives selector counting `validation_timeout`
    #[must_use]
    pub const fn new(validation_timeout: Duration) -> Self {
        Self { validation_timeout }
    }

    fn attempt_record(&self, request: &HealRequest<'_>) -> HealingAttempt {
        HealingAttempt {
            step_id: request.step.step_id,
            attempt: request.attempt,
            mode: HealingMode::Soft,
            original_selector: Some(request.original_selector.to_string()),
            failed_selector: Some(request.failed_selector.to_string()),
            candidate_selector: None,
            validation: Validation::NoCandidate,
            reasoning: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// Make one healing attempt. Never fails; the outcome is in the record.
    pub async fn attempt(
        &self,
        driver: &dyn BrowserDriver,
        oracle: Option<&dyn Oracle>,
        request: &HealRequest<'_>,
    ) -> HealingAttempt {
        let mut record = self.attempt_record(request);
        info!(step_id = record.step_id, attempt = record.attempt, selector = request.failed_selector, "soft healing");

        let Some(oracle) = oracle else {
            record.validation = Validation::OracleFailed {
                message: OracleError::NotConfigured.to_string(),
            };
            record.reasoning = String::from("no oracle configured for healing");
            error!(step_id = record.step_id, "soft healing needs an oracle");
            return record;
        };

        let (url, screenshot, dom_context) = match gather_context(driver).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(step_id = record.step_id, error = %e, "healing context unavailable");
                record.validation = Validation::ContextUnavailable {
                    message: e.to_string(),
                };
                record.reasoning = format!("could not gather page context: {e}");
                record.timestamp = Utc::now();
                return record;
            }
        };

        let prompt = healing_prompt(request, &url, &dom_context);
        let suggestion = generate_typed::<SelectorSuggestion>(
            oracle,
            &SelectorSuggestion::schema(),
            &prompt,
            Some(&screenshot),
        )
        .await;

        let suggestion = match suggestion {
            Ok(s) => s,
            Err(e) => {
                warn!(step_id = record.step_id, error = %e, "oracle healing call failed");
                record.validation = Validation::OracleFailed {
                    message: e.to_string(),
                };
                record.reasoning = format!("oracle error: {e}");
                record.timestamp = Utc::now();
                return record;
            }
        };

        record.reasoning = suggestion.reasoning;
        let candidate = suggestion
            .new_selector
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"));
        let Some(candidate) = candidate else {
            warn!(step_id = record.step_id, "oracle proposed no selector");
            record.timestamp = Utc::now();
            return record;
        };

        record.validation = self.validate(driver, &candidate).await;
        record.candidate_selector = Some(candidate);
        record.timestamp = Utc::now();
        record
    }

    /// Count matches of `candidate` on the live page
    pub async fn validate(&self, driver: &dyn BrowserDriver, candidate: &str) -> Validation {
        match tokio::time::timeout(self.validation_timeout, driver.count(candidate)).await {
            Err(_) => {
                warn!(selector = candidate, "selector validation timed out");
                Validation::TimedOut
            }
            Ok(Err(e)) => {
                warn!(selector = candidate, error = %e, "selector rejected by page");
                Validation::Invalid {
                    message: e.to_string(),
                }
            }
            Ok(Ok(0)) => {
                warn!(selector = candidate, "candidate selector matches nothing");
                Validation::NoMatches
            }
            Ok(Ok(n)) => {
                if n > 1 {
                    warn!(selector = candidate, matches = n, "candidate selector is ambiguous; using first match");
                } else {
                    info!(selector = candidate, "candidate selector validated");
                }
                Validation::Accepted { matches: n }
            }
        }
    }
}

async fn gather_context(driver: &dyn BrowserDriver) -> SanarResult<(String, Vec<u8>, String)> {
    let url = driver.current_url().await?;
    let screenshot = driver.screenshot(None).await?;
    if screenshot.is_empty() {
        return Err(SanarError::browser("empty screenshot"));
    }
    let dom_context = match capture_dom_state(driver).await {
        Ok(state) => serialize(state.tree(), ContextPurpose::Verification).text,
        Err(e) => {
            warn!(error = %e, "DOM context unavailable for healing");
            String::from("DOM context could not be retrieved.")
        }
    };
    Ok((url, screenshot, dom_context))
}

/// What to re-record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRequest {
    /// Feature under test
    pub feature_description: String,
    /// Where the new test file should go
    pub output: PathBuf,
    /// Run the recorder's browser headless
    pub headless: bool,
}

/// Re-recording result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    /// Whether the recorder reported success
    pub success: bool,
    /// File written, when known
    pub output: Option<PathBuf>,
    /// Recorder message
    pub message: String,
}

/// External test recorder used by hard healing. Always starts its own
/// browser session.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Record `request.feature_description` into `request.output`
    async fn record(&self, request: &RecordRequest) -> SanarResult<RecordOutcome>;
}

/// Recorder run as an external program:
/// `<program> [args..] --feature <text> --output <path> [--headless]`
#[derive(Debug, Clone)]
pub struct CommandRecorder {
    program: String,
    args: Vec<String>,
}

impl CommandRecorder {
    /// Parse a command line such as `"recorder --model x"` (whitespace split)
    #[must_use]
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Program name
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Recorder for CommandRecorder {
    async fn record(&self, request: &RecordRequest) -> SanarResult<RecordOutcome> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--feature")
            .arg(&request.feature_description)
            .arg("--output")
            .arg(&request.output);
        if request.headless {
            cmd.arg("--headless");
        }
        info!(program = %self.program, output = %request.output.display(), "starting re-recording");
        let output = cmd.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let success = output.status.success();
        let message = if success {
            stdout.lines().last().unwrap_or("recorder finished").trim().to_string()
        } else {
            format!("recorder exited with {}: {}", output.status, stderr.trim())
        };
        Ok(RecordOutcome {
            success,
            output: success.then(|| request.output.clone()),
            message,
        })
    }
}

/// File the re-recorded test goes to: `<dir>/<stem>_healed_<timestamp>.json`
#[must_use]
pub fn healed_output_path(original: &Path) -> PathBuf {
    let stem = original
        .file_stem()
        .map_or_else(|| String::from("test"), |s| s.to_string_lossy().into_owned());
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let name = format!("{stem}_healed_{stamp}.json");
    original.parent().map_or_else(|| PathBuf::from(&name), |dir| dir.join(&name))
}

/// Hand the feature to `recorder` and log the attempt.
///
/// The caller must already have closed its own browser session.
pub async fn hard_heal(
    recorder: Option<&dyn Recorder>,
    request: &RecordRequest,
    step: &TestStep,
    failed_selector: Option<&str>,
) -> HealingAttempt {
    warn!(step_id = step.step_id, "hard healing: re-recording feature");
    let (success, reasoning) = match recorder {
        None => (false, String::from("no recorder configured")),
        Some(_) if request.feature_description.trim().is_empty() => {
            (false, String::from("test has no feature description to re-record"))
        }
        Some(recorder) => match recorder.record(request).await {
            Ok(outcome) => {
                if outcome.success {
                    info!(output = ?outcome.output, "re-recording finished");
                } else {
                    error!(message = %outcome.message, "re-recording failed");
                }
                (outcome.success, outcome.message)
            }
            Err(e) => {
                error!(error = %e, "recorder could not be started");
                (false, e.to_string())
            }
        },
    };
    HealingAttempt {
        step_id: step.step_id,
        attempt: 1,
        mode: HealingMode::Hard,
        original_selector: step.selector.clone(),
        failed_selector: failed_selector.map(str::to_string),
        candidate_selector: None,
        validation: Validation::Delegated { success },
        reasoning,
        timestamp: Utc::now(),
    }
}
