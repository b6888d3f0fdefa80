//! Replay engine: runs a recorded test step by step against one browser
//! session.
//!
//! ```text
//! PENDING ──► RUNNING ──ok──────────────────────────────► SUCCEEDED
//!                │
//!                │ error
//!                ▼
//!        healable + selector + healing on?
//!                │no                     │yes
//!                ▼                       ▼
//!          FAILED_FATAL         soft: HEALING ──retry ok──► SUCCEEDED
//!                ▲                       │ budget spent
//!                └───────────────────────┘
//!                                hard: abandon run ──► HEALING_TRIGGERED
//! ```
//!
//! Runs are fail-fast: the first fatal step ends the run and no later step
//! is attempted.

use crate::config::{EngineConfig, HealingMode};
use crate::dom::{serialize, ContextPurpose};
use crate::driver::{
    capture_dom_state, console_tail, BrowserDriver, Deadline, DriverFactory, ElementState, Viewport,
};
use crate::healing::{
    hard_heal, healed_output_path, CommandRecorder, HealRequest, RecordRequest, Recorder, SoftHealer,
    Validation,
};
use crate::oracle::{Oracle, OracleError, Verdict};
use crate::result::{SanarError, SanarResult};
use crate::run_result::{FailureContext, RunResult, RunStatus};
use crate::test_case::{StepAction, TestCase, TestStep};
use crate::visual::{diff_dir, BaselineStore, DiffOptions, VisualCheck, VisualComparator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Number of console problems kept on failure
const CONSOLE_TAIL: usize = 5;

/// How a step ended
enum StepEnd {
    Passed,
    Failed(SanarError),
    HealingTriggered(SanarError),
}

/// Replays test files against fresh browser sessions
pub struct ReplayEngine {
    config: EngineConfig,
    factory: Arc<dyn DriverFactory>,
    oracle: Option<Arc<dyn Oracle>>,
    recorder: Option<Arc<dyn Recorder>>,
    visual: VisualComparator,
    soft: SoftHealer,
}

impl std::fmt::Debug for ReplayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("config", &self.config)
            .field("oracle", &self.oracle.as_ref().map(|o| o.name().to_string()))
            .field("recorder", &self.recorder.is_some())
            .finish_non_exhaustive()
    }
}

impl ReplayEngine {
    /// Engine launching sessions from `factory`. The recorder defaults to
    /// `config.recorder_command`; no oracle is attached.
    pub fn new(config: EngineConfig, factory: Arc<dyn DriverFactory>) -> Self {
        let store = BaselineStore::new(&config.baseline_dir);
        let options = DiffOptions::default()
            .with_threshold(config.pixelmatch_threshold)
            .with_anti_aliasing(config.include_anti_aliasing);
        let visual = VisualComparator::new(store, options, diff_dir(&config.output_dir));
        let recorder = config
            .recorder_command
            .as_deref()
            .and_then(CommandRecorder::from_command_line)
            .map(|r| Arc::new(r) as Arc<dyn Recorder>);
        Self {
            soft: SoftHealer::new(config.selector_validation_timeout()),
            config,
            factory,
            oracle: None,
            recorder,
            visual,
        }
    }

    /// Attach the oracle used for healing and semantic checks
    #[must_use]
    pub fn with_oracle(mut self, oracle: Arc<dyn Oracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Replace the hard-healing recorder
    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Engine configuration
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load and run the test at `path`.
    ///
    /// A passing run that healed at least one selector rewrites the file
    /// with the new selectors.
    pub async fn run_file(&self, path: &Path) -> RunResult {
        let mut test = match TestCase::load(path) {
            Ok(test) => test,
            Err(e) => {
                error!(path = %path.display(), error = %e, "test file unusable");
                let name = path
                    .file_stem()
                    .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
                let mut result = RunResult::setup_error(name, &e);
                result.test_file = Some(path.to_path_buf());
                return result;
            }
        };
        let mut result = self.run(&mut test, Some(path)).await;
        if result.passed() && result.healed_steps_count > 0 {
            match test.save(path) {
                Ok(()) => {
                    info!(path = %path.display(), healed = result.healed_steps_count, "healed selectors saved");
                    result.healed_file_saved = true;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "could not save healed test file"),
            }
        }
        result
    }

    /// Run `test` in a new session.
    ///
    /// Healed selectors are written into `test.steps`; `source` is used
    /// to name the hard-healing output.
    pub async fn run(&self, test: &mut TestCase, source: Option<&Path>) -> RunResult {
        let started = Instant::now();
        let viewport = self.viewport_for(test);
        info!(
            test = %test.test_name,
            steps = test.steps.len(),
            healing = self.config.enable_healing,
            mode = %self.config.healing_mode,
            "starting run"
        );

        let mut driver = match self.factory.launch(&self.config.driver_config(viewport)).await {
            Ok(driver) => driver,
            Err(e) => {
                error!(error = %e, "browser session could not start");
                let mut result = RunResult::setup_error(&test.test_name, &e);
                result.test_file = source.map(Path::to_path_buf);
                result.duration_seconds = started.elapsed().as_secs_f64();
                return result;
            }
        };

        let mut result = RunResult::new(&test.test_name);
        result.test_file = source.map(Path::to_path_buf);
        let mut session_open = true;

        for index in 0..test.steps.len() {
            result.steps_executed = index + 1;
            let step = &mut test.steps[index];
            let span = info_span!("step", step_id = step.step_id, action = %step.action);
            let end = self
                .run_step(driver.as_mut(), step, &mut result)
                .instrument(span)
                .await;

            match end {
                StepEnd::Passed => {
                    if let Ok(wait) = Duration::try_from_secs_f64(step.wait_after_secs) {
                        if !wait.is_zero() {
                            debug!(step_id = step.step_id, wait_secs = wait.as_secs_f64(), "waiting after step");
                            tokio::time::sleep(wait).await;
                        }
                    }
                }
                StepEnd::Failed(e) => {
                    let step = step.clone();
                    error!(step_id = step.step_id, error = %e, "step failed, stopping run");
                    self.capture_failure(driver.as_ref(), &test.test_name, &step, &e, &mut result)
                        .await;
                    result.status = RunStatus::Fail;
                    result.message = format!("Test failed at step {}: {e}", step.step_id);
                    break;
                }
                StepEnd::HealingTriggered(e) => {
                    let step = step.clone();
                    warn!(step_id = step.step_id, error = %e, "abandoning run for re-recording");
                    self.capture_failure(driver.as_ref(), &test.test_name, &step, &e, &mut result)
                        .await;
                    self.collect_network(driver.as_ref(), &mut result).await;
                    close(driver.as_mut()).await;
                    session_open = false;

                    let output = source.map_or_else(
                        || default_recording_path(&self.config.output_dir, &test.test_name),
                        healed_output_path,
                    );
                    let request = RecordRequest {
                        feature_description: test.feature_description.clone(),
                        output,
                        headless: self.config.headless,
                    };
                    let attempt =
                        hard_heal(self.recorder.as_deref(), &request, &step, step.selector()).await;
                    let recorded = attempt.validation == Validation::Delegated { success: true };
                    result.healing_attempts.push(attempt);
                    result.status = RunStatus::HealingTriggered;
                    result.message = if recorded {
                        format!(
                            "Step {} failed; feature re-recorded to {}",
                            step.step_id,
                            request.output.display()
                        )
                    } else {
                        format!("Step {} failed; re-recording did not succeed", step.step_id)
                    };
                    break;
                }
            }
        }

        if result.failed_step.is_none() && result.status != RunStatus::HealingTriggered {
            result.status = RunStatus::Pass;
            result.message = if result.healed_steps_count > 0 {
                format!("Test passed with {} healed step(s)", result.healed_steps_count)
            } else {
                String::from("Test passed")
            };
        }

        if session_open {
            self.collect_network(driver.as_ref(), &mut result).await;
            close(driver.as_mut()).await;
        }
        result.duration_seconds = started.elapsed().as_secs_f64();
        info!(
            test = %result.test_name,
            status = %result.status,
            steps = result.steps_executed,
            healed = result.healed_steps_count,
            duration_secs = result.duration_seconds,
            "run finished"
        );
        result
    }

    fn viewport_for(&self, test: &TestCase) -> Viewport {
        if let Some(viewport) = self.config.viewport {
            return viewport;
        }
        let ids = test.baseline_ids();
        match self.visual.store().first_viewport(ids.iter().map(String::as_str)) {
            Some(viewport) => {
                info!(width = viewport.width, height = viewport.height, "viewport taken from baseline");
                viewport
            }
            None => Viewport::default(),
        }
    }

    fn healing_applies(&self, step: &TestStep, error: &SanarError) -> bool {
        self.config.enable_healing && step.selector().is_some() && error.is_healable()
    }

    async fn run_step(
        &self,
        driver: &mut dyn BrowserDriver,
        step: &mut TestStep,
        result: &mut RunResult,
    ) -> StepEnd {
        info!(description = %step.description, selector = step.selector().unwrap_or(""), "running step");
        let action = match StepAction::from_step(step) {
            Ok(action) => action,
            Err(e) => return StepEnd::Failed(e),
        };
        let selector = step.selector().map(str::to_string);
        let first = self.perform(driver, step, &action, selector.as_deref(), result).await;
        let error = match first {
            Ok(()) => {
                self.after_success(driver, &action, result).await;
                return StepEnd::Passed;
            }
            Err(e) => e,
        };

        if !self.healing_applies(step, &error) {
            if error.is_healable() && step.selector().is_some() {
                debug!(step_id = step.step_id, "healing disabled");
            }
            return StepEnd::Failed(error);
        }
        match self.config.healing_mode {
            HealingMode::Hard => StepEnd::HealingTriggered(error),
            HealingMode::Soft => match self.soft_heal(driver, step, &action, error, result).await {
                Ok(()) => {
                    self.after_success(driver, &action, result).await;
                    StepEnd::Passed
                }
                Err(e) => StepEnd::Failed(e),
            },
        }
    }

    async fn after_success(&self, driver: &dyn BrowserDriver, action: &StepAction, result: &mut RunResult) {
        if action.is_navigation() && self.config.capture_performance && result.performance_timing.is_none() {
            match driver.performance_timing().await {
                Ok(timing) => result.performance_timing = timing,
                Err(e) => warn!(error = %e, "performance timing unavailable"),
            }
        }
    }

    /// Ask for replacement selectors until one validates and the action
    /// passes with it, or the per-step budget is spent.
    async fn soft_heal(
        &self,
        driver: &mut dyn BrowserDriver,
        step: &mut TestStep,
        action: &StepAction,
        error: SanarError,
        result: &mut RunResult,
    ) -> SanarResult<()> {
        let original = step.selector().unwrap_or_default().to_string();
        let mut failed = original.clone();
        let mut last_error = error;

        for attempt in 1..=self.config.healing_retries_per_step {
            let request = HealRequest {
                step: &*step,
                original_selector: &original,
                failed_selector: &failed,
                error: &last_error,
                attempt,
            };
            let record = self.soft.attempt(driver, self.oracle.as_deref(), &request).await;
            let candidate = record.healed_selector().map(str::to_string);
            result.healing_attempts.push(record);
            let Some(candidate) = candidate else {
                continue;
            };

            match self.perform(driver, step, action, Some(&candidate), result).await {
                Ok(()) => {
                    info!(step_id = step.step_id, from = %original, to = %candidate, attempt, "step healed");
                    step.selector = Some(candidate);
                    result.healed_steps_count += 1;
                    return Ok(());
                }
                Err(e) if e.is_healable() => {
                    warn!(step_id = step.step_id, selector = %candidate, error = %e, "healed selector failed on retry");
                    failed = candidate;
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        warn!(
            step_id = step.step_id,
            retries = self.config.healing_retries_per_step,
            "healing retries exhausted"
        );
        Err(last_error)
    }

    async fn perform(
        &self,
        driver: &mut dyn BrowserDriver,
        step: &TestStep,
        action: &StepAction,
        selector: Option<&str>,
        result: &mut RunResult,
    ) -> SanarResult<()> {
        let timeout = self.config.action_timeout();
        let target = || {
            selector.ok_or_else(|| SanarError::InvalidStep {
                step_id: step.step_id,
                message: format!("action '{}' requires a selector", step.action),
            })
        };
        match action {
            StepAction::Navigate { url } => {
                info!(url = %url, "navigating");
                driver.navigate(url, self.config.navigation_timeout()).await
            }
            StepAction::Click => driver.click(target()?, timeout).await,
            StepAction::Type { text } => driver.type_text(target()?, text, timeout).await,
            StepAction::SetChecked(checked) => driver.set_checked(target()?, *checked, timeout).await,
            StepAction::Select(option) => driver.select_option(target()?, option, timeout).await,
            StepAction::Scroll(direction) => driver.scroll(*direction).await,
            StepAction::WaitForLoadState(state) => {
                driver.wait_for_load_state(*state, self.config.navigation_timeout()).await
            }
            StepAction::WaitForSelector { state, timeout_ms } => {
                let wait = timeout_ms.map_or(timeout, Duration::from_millis);
                driver.wait_for_selector(target()?, *state, wait).await
            }
            StepAction::AssertTextEquals(expected) => {
                self.assert_element(driver, target()?, |el| {
                    let actual = el.text.trim();
                    (actual == expected.trim())
                        .then_some(())
                        .ok_or_else(|| format!("text '{actual}' != expected '{expected}'"))
                })
                .await
            }
            StepAction::AssertTextContains(expected) => {
                self.assert_element(driver, target()?, |el| {
                    el.text
                        .contains(expected.as_str())
                        .then_some(())
                        .ok_or_else(|| format!("text '{}' does not contain '{expected}'", el.text.trim()))
                })
                .await
            }
            StepAction::AssertVisible => {
                self.assert_element(driver, target()?, |el| {
                    el.visible.then_some(()).ok_or_else(|| String::from("element is not visible"))
                })
                .await
            }
            StepAction::AssertHidden => self.assert_hidden(driver, target()?).await,
            StepAction::AssertAttributeEquals { name, expected } => {
                self.assert_element(driver, target()?, |el| match el.attributes.get(name) {
                    Some(actual) if actual == expected => Ok(()),
                    Some(actual) => Err(format!("attribute '{name}' is '{actual}', expected '{expected}'")),
                    None => Err(format!("attribute '{name}' is absent, expected '{expected}'")),
                })
                .await
            }
            StepAction::AssertElementCount(expected) => {
                self.assert_count(driver, target()?, *expected).await
            }
            StepAction::AssertChecked(expected) => {
                self.assert_element(driver, target()?, |el| {
                    (el.checked == *expected)
                        .then_some(())
                        .ok_or_else(|| format!("checked is {}, expected {expected}", el.checked))
                })
                .await
            }
            StepAction::AssertEnabled(expected) => {
                self.assert_element(driver, target()?, |el| {
                    (el.enabled == *expected)
                        .then_some(())
                        .ok_or_else(|| format!("enabled is {}, expected {expected}", el.enabled))
                })
                .await
            }
            StepAction::AssertVisualMatch {
                baseline_id,
                use_llm_fallback,
                pixel_threshold,
            } => {
                let check = VisualCheck {
                    step_id: step.step_id,
                    baseline_id: baseline_id.clone(),
                    element_selector: selector.map(str::to_string),
                    pixel_threshold: pixel_threshold.unwrap_or(self.config.pixel_threshold),
                    use_llm_fallback: *use_llm_fallback,
                };
                let outcome = self.visual.check(driver, self.oracle.as_deref(), &check).await?;
                result.visual_assertion_results.push(outcome.clone());
                if outcome.passed() {
                    Ok(())
                } else {
                    let error = outcome.to_error();
                    result.visual_failure_details = Some(outcome);
                    Err(error)
                }
            }
            StepAction::AssertLlmVerification => self.verify_with_oracle(driver, step).await,
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms.max(1))
    }

    /// Poll the first match of `selector` until `check` passes.
    ///
    /// No element before the deadline is an interaction timeout; an element
    /// that never satisfies `check` is an assertion failure.
    async fn assert_element<F>(&self, driver: &dyn BrowserDriver, selector: &str, check: F) -> SanarResult<()>
    where
        F: Fn(&ElementState) -> Result<(), String>,
    {
        let timeout = self.config.action_timeout();
        let deadline = Deadline::after(timeout);
        let mut mismatch = None;
        loop {
            match driver.query_element(selector).await? {
                Some(state) => match check(&state) {
                    Ok(()) => return Ok(()),
                    Err(message) => mismatch = Some(message),
                },
                None => mismatch = None,
            }
            if deadline.passed() {
                break;
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
        match mismatch {
            Some(message) => Err(SanarError::assertion(format!("{selector}: {message}"))),
            None => Err(SanarError::Timeout {
                what: selector.to_string(),
                ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn assert_hidden(&self, driver: &dyn BrowserDriver, selector: &str) -> SanarResult<()> {
        let deadline = Deadline::after(self.config.action_timeout());
        loop {
            match driver.query_element(selector).await? {
                Some(state) if state.visible => {}
                _ => return Ok(()),
            }
            if deadline.passed() {
                return Err(SanarError::assertion(format!("{selector}: element is still visible")));
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    async fn assert_count(&self, driver: &dyn BrowserDriver, selector: &str, expected: usize) -> SanarResult<()> {
        let deadline = Deadline::after(self.config.action_timeout());
        loop {
            let found = driver.count(selector).await?;
            if found == expected {
                return Ok(());
            }
            if deadline.passed() {
                return Err(SanarError::assertion(format!(
                    "{selector}: expected {expected} element(s), found {found}"
                )));
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    async fn verify_with_oracle(&self, driver: &dyn BrowserDriver, step: &TestStep) -> SanarResult<()> {
        let description = step.description.trim();
        if description.is_empty() {
            return Err(SanarError::MissingParameter {
                step_id: step.step_id,
                action: step.action.to_string(),
                parameter: String::from("description"),
            });
        }
        let Some(oracle) = self.oracle.as_deref() else {
            return Err(OracleError::NotConfigured.into());
        };
        let screenshot = driver.screenshot(None).await?;
        if screenshot.is_empty() {
            return Err(SanarError::browser("empty screenshot for verification"));
        }
        let url = driver.current_url().await.unwrap_or_default();
        let context = match capture_dom_state(driver).await {
            Ok(state) => serialize(state.tree(), ContextPurpose::Verification).text,
            Err(e) => {
                warn!(error = %e, "DOM context unavailable for verification");
                String::from("DOM context could not be retrieved.")
            }
        };

        let answer = oracle
            .generate_multimodal(&verification_prompt(description, &url, &context), &screenshot)
            .await?;
        match Verdict::parse(&answer) {
            Verdict::Yes => {
                info!(answer = %answer.trim(), "verification passed");
                Ok(())
            }
            Verdict::No => Err(SanarError::assertion(format!(
                "verification failed: condition '{description}' not met. Oracle: {}",
                answer.trim()
            ))),
            Verdict::Unclear => Err(SanarError::assertion(format!(
                "verification failed: unclear oracle answer: {}",
                answer.trim()
            ))),
        }
    }

    async fn capture_failure(
        &self,
        driver: &dyn BrowserDriver,
        test_name: &str,
        step: &TestStep,
        error: &SanarError,
        result: &mut RunResult,
    ) {
        result.failed_step = Some(step.clone());
        result.record_error(error);

        match driver.screenshot(None).await {
            Ok(png) if !png.is_empty() => {
                let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
                let path = self.config.output_dir.join(format!(
                    "failure_{}_step{}_{stamp}.png",
                    file_safe(test_name),
                    step.step_id
                ));
                match save_bytes(&path, &png) {
                    Ok(()) => {
                        info!(path = %path.display(), "failure screenshot saved");
                        result.screenshot_on_failure = Some(path);
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "could not save failure screenshot"),
                }
            }
            Ok(_) => warn!("failure screenshot was empty"),
            Err(e) => warn!(error = %e, "failure screenshot unavailable"),
        }

        match driver.console_messages().await {
            Ok(messages) => result.console_messages_on_failure = console_tail(&messages, CONSOLE_TAIL),
            Err(e) => warn!(error = %e, "console messages unavailable"),
        }

        result.failure_context = Some(FailureContext {
            url: driver.current_url().await.ok(),
            step_description: step.description.clone(),
            action: Some(step.action.to_string()),
            error_class: error.class(),
        });
    }

    async fn collect_network(&self, driver: &dyn BrowserDriver, result: &mut RunResult) {
        if !self.config.capture_network {
            return;
        }
        match driver.network_requests().await {
            Ok(requests) => result.network_requests = requests,
            Err(e) => warn!(error = %e, "network log unavailable"),
        }
    }
}

async fn close(driver: &mut dyn BrowserDriver) {
    if let Err(e) = driver.close().await {
        warn!(error = %e, "browser session did not close cleanly");
    }
}

fn save_bytes(path: &Path, bytes: &[u8]) -> SanarResult<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Test name reduced to characters safe in a file name
fn file_safe(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        String::from("test")
    } else {
        cleaned
    }
}

fn verification_prompt(description: &str, url: &str, context: &str) -> String {
    format!(
        r#"Look at the attached screenshot of a web page and the HTML outline below.

During the test, this condition had to hold: "{description}"
Current URL: {url}

HTML outline (interactive elements as `[index]`, static ones marked `(Static)`):
```html
{context}
```

Is the condition "{description}" met right now? Weigh the HTML outline above the screenshot, which may lag slightly behind it.
Content that is still loading but clearly on its way to satisfying the condition counts as met.

Answer with YES or NO first, then one sentence citing the evidence.
Example: YES - the 'Welcome, User!' message (Static s15) is present and visible at the top."#
    )
}

/// Where a healed re-recording of `test` would go when no source file is known
#[must_use]
pub fn default_recording_path(output_dir: &Path, test_name: &str) -> PathBuf {
    healed_output_path(&output_dir.join(format!("{}.json", file_safe(test_name))))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::driver::{ConsoleMessage, MockDriver, MockDriverFactory, MockElement, NetworkRequest};
    use crate::healing::RecordOutcome;
    use crate::oracle::MockOracle;
    use crate::result::ErrorClass;
    use crate::visual::{encode_png, BaselineMetadata};
    use image::{Rgba, RgbaImage};
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const URL: &str = "https://app.test/login";

    struct Fixture {
        dir: TempDir,
        driver: MockDriver,
        factory: MockDriverFactory,
    }

    impl Fixture {
        fn new() -> Self {
            let driver = MockDriver::new();
            driver.set_screenshot(vec![137, 80, 78, 71]);
            Self {
                dir: tempfile::tempdir().unwrap(),
                factory: MockDriverFactory::new(driver.clone()),
                driver,
            }
        }

        fn config(&self) -> EngineConfig {
            EngineConfig::new()
                .with_action_timeout_ms(100)
                .with_poll_interval_ms(10)
                .with_baseline_dir(self.dir.path().join("baselines"))
                .with_output_dir(self.dir.path().join("output"))
        }

        fn engine(&self, config: EngineConfig) -> ReplayEngine {
            ReplayEngine::new(config, Arc::new(self.factory.clone()))
        }

        fn write_test(&self, test: &serde_json::Value) -> PathBuf {
            let path = self.dir.path().join("login.json");
            std::fs::write(&path, serde_json::to_string_pretty(test).unwrap()).unwrap();
            path
        }
    }

    fn test_case(steps: serde_json::Value) -> serde_json::Value {
        json!({
            "test_name": "login",
            "feature_description": "User logs in with valid credentials",
            "recorded_at": "2026-01-01T10:00:00",
            "steps": steps
        })
    }

    fn parse(test: &serde_json::Value) -> TestCase {
        TestCase::from_json(&test.to_string(), "inline").unwrap()
    }

    fn login_steps(click_selector: &str) -> serde_json::Value {
        json!([
            {"step_id": 1, "action": "navigate", "description": "Open login page",
             "parameters": {"url": URL}, "selector": null, "wait_after_secs": 0},
            {"step_id": 2, "action": "type", "description": "Enter user name",
             "parameters": {"text": "alice"}, "selector": "#user", "wait_after_secs": 0},
            {"step_id": 3, "action": "click", "description": "Click the login button",
             "parameters": {}, "selector": click_selector, "wait_after_secs": 0}
        ])
    }

    mod flow_tests {
        use super::*;

        #[tokio::test]
        async fn test_all_steps_pass() {
            let fx = Fixture::new();
            fx.driver.add_element(MockElement::new("#user", "input"));
            fx.driver.add_element(MockElement::new("#login", "button"));
            fx.driver.set_performance_timing(json!({"loadEventEnd": 120}));
            fx.driver.push_request(NetworkRequest {
                url: URL.into(),
                method: "GET".into(),
                status: Some(200),
                resource_type: "document".into(),
            });
            let mut test = parse(&test_case(login_steps("#login")));
            let result = fx.engine(fx.config()).run(&mut test, None).await;

            assert_eq!(result.status, RunStatus::Pass);
            assert_eq!(result.steps_executed, 3);
            assert!(result.failed_step.is_none());
            assert_eq!(result.performance_timing, Some(json!({"loadEventEnd": 120})));
            assert_eq!(result.network_requests.len(), 1);
            assert!(fx.driver.is_closed());
            assert_eq!(
                fx.driver.history()[..3],
                [
                    format!("navigate:{URL}"),
                    "type:#user:alice".to_string(),
                    "click:#login".to_string()
                ]
            );
        }

        #[tokio::test]
        async fn test_fail_fast_stops_after_fatal_step() {
            let fx = Fixture::new();
            fx.driver.add_element(MockElement::new("#login", "button"));
            let mut test = parse(&test_case(json!([
                {"step_id": 1, "action": "navigate", "description": "Open",
                 "parameters": {"url": URL}},
                {"step_id": 2, "action": "click", "description": "Click missing",
                 "parameters": {}, "selector": "#missing"},
                {"step_id": 3, "action": "click", "description": "Never runs",
                 "parameters": {}, "selector": "#login"}
            ])));
            let result = fx.engine(fx.config()).run(&mut test, None).await;

            assert_eq!(result.status, RunStatus::Fail);
            assert_eq!(result.steps_executed, 2);
            assert_eq!(result.failed_step.as_ref().map(|s| s.step_id), Some(2));
            assert_eq!(result.error_class, Some(ErrorClass::Interaction));
            assert!(!fx.driver.was_called("click:#login"));
            assert!(result.healing_attempts.is_empty());
        }

        #[tokio::test]
        async fn test_launch_failure_is_setup_error() {
            let fx = Fixture::new();
            let engine = ReplayEngine::new(fx.config(), Arc::new(fx.factory.clone().failing()));
            let mut test = parse(&test_case(login_steps("#login")));
            let result = engine.run(&mut test, None).await;

            assert_eq!(result.status, RunStatus::Error);
            assert_eq!(result.steps_executed, 0);
            assert_eq!(result.error_class, Some(ErrorClass::Setup));
        }

        #[tokio::test]
        async fn test_missing_file_is_setup_error() {
            let fx = Fixture::new();
            let result = fx
                .engine(fx.config())
                .run_file(&fx.dir.path().join("nope.json"))
                .await;
            assert_eq!(result.status, RunStatus::Error);
            assert_eq!(result.test_name, "nope");
            assert!(fx.factory.launches().is_empty());
        }

        #[tokio::test]
        async fn test_missing_parameter_fails_without_healing() {
            let fx = Fixture::new();
            fx.driver.add_element(MockElement::new("#user", "input"));
            let oracle = MockOracle::new();
            let engine = fx
                .engine(fx.config().with_healing(HealingMode::Soft))
                .with_oracle(Arc::new(oracle.clone()));
            let mut test = parse(&test_case(json!([
                {"step_id": 1, "action": "type", "description": "Type", "parameters": {},
                 "selector": "#user"}
            ])));
            let result = engine.run(&mut test, None).await;
            assert_eq!(result.status, RunStatus::Fail);
            assert_eq!(result.error_class, Some(ErrorClass::Input));
            assert_eq!(oracle.call_count(), 0);
        }

        #[tokio::test]
        async fn test_failure_capture() {
            let fx = Fixture::new();
            fx.driver.push_console(ConsoleMessage::new("log", "ready"));
            for i in 0..7 {
                fx.driver.push_console(ConsoleMessage::new("error", format!("boom {i}")));
            }
            let mut test = parse(&test_case(login_steps("#login")));
            let result = fx.engine(fx.config()).run(&mut test, None).await;

            assert_eq!(result.status, RunStatus::Fail);
            let shot = result.screenshot_on_failure.as_ref().unwrap();
            assert!(shot.exists());
            let name = shot.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("failure_login_step2_"));
            assert_eq!(result.console_messages_on_failure.len(), 5);
            assert_eq!(result.console_messages_on_failure[4].text, "boom 6");
            let ctx = result.failure_context.as_ref().unwrap();
            assert_eq!(ctx.url.as_deref(), Some(URL));
            assert_eq!(ctx.step_description, "Enter user name");
        }

        #[tokio::test]
        async fn test_wait_after_is_applied() {
            let fx = Fixture::new();
            let mut test = parse(&test_case(json!([
                {"step_id": 1, "action": "navigate", "description": "Open",
                 "parameters": {"url": URL}, "wait_after_secs": 0.05}
            ])));
            let started = Instant::now();
            let result = fx.engine(fx.config()).run(&mut test, None).await;
            assert!(result.passed());
            assert!(started.elapsed() >= Duration::from_millis(50));
        }

        #[tokio::test]
        async fn test_oversized_wait_after_fails_as_input() {
            let fx = Fixture::new();
            let mut test = parse(&test_case(json!([
                {"step_id": 1, "action": "navigate", "description": "Open",
                 "parameters": {"url": URL}, "wait_after_secs": 1e300}
            ])));
            let result = fx.engine(fx.config()).run(&mut test, None).await;
            assert_eq!(result.status, RunStatus::Fail);
            assert_eq!(result.error_class, Some(ErrorClass::Input));
            assert_eq!(result.failed_step.as_ref().map(|s| s.step_id), Some(1));
        }
    }

    mod assertion_tests {
        use super::*;

        async fn run_single(fx: &Fixture, step: serde_json::Value) -> RunResult {
            let mut test = parse(&test_case(json!([step])));
            fx.engine(fx.config().with_healing(HealingMode::Soft))
                .with_oracle(Arc::new(MockOracle::new()))
                .run(&mut test, None)
                .await
        }

        #[tokio::test]
        async fn test_text_and_attribute_assertions() {
            let fx = Fixture::new();
            fx.driver.add_element(
                MockElement::new("#title", "h1")
                    .text("  Welcome back ")
                    .attr("aria-level", "1"),
            );
            for step in [
                json!({"step_id": 1, "action": "assert_text_equals", "description": "title",
                       "parameters": {"expected_text": "Welcome back"}, "selector": "#title"}),
                json!({"step_id": 1, "action": "assert_text_contains", "description": "title",
                       "parameters": {"expected_text": "Welcome"}, "selector": "#title"}),
                json!({"step_id": 1, "action": "assert_attribute_equals", "description": "level",
                       "parameters": {"attribute_name": "aria-level", "expected_value": "1"},
                       "selector": "#title"}),
                json!({"step_id": 1, "action": "assert_visible", "description": "shown",
                       "parameters": {}, "selector": "#title"}),
                json!({"step_id": 1, "action": "assert_hidden", "description": "gone",
                       "parameters": {}, "selector": "#spinner"}),
            ] {
                let result = run_single(&fx, step).await;
                assert!(result.passed(), "{}", result.message);
            }
        }

        #[tokio::test]
        async fn test_unbounded_action_timeout() {
            let fx = Fixture::new();
            fx.driver.add_element(MockElement::new("#title", "h1").text("Welcome"));
            fx.driver.add_element(MockElement::new("li.item", "li"));
            let engine = fx.engine(fx.config().with_action_timeout_ms(u64::MAX));
            let mut test = parse(&test_case(json!([
                {"step_id": 1, "action": "assert_text_equals", "description": "title",
                 "parameters": {"expected_text": "Welcome"}, "selector": "#title"},
                {"step_id": 2, "action": "assert_hidden", "description": "gone",
                 "parameters": {}, "selector": "#spinner"},
                {"step_id": 3, "action": "assert_element_count", "description": "one item",
                 "parameters": {"expected_count": 1}, "selector": "li.item"}
            ])));
            let result = engine.run(&mut test, None).await;
            assert!(result.passed(), "{}", result.message);
            assert_eq!(result.steps_executed, 3);
        }

        #[tokio::test]
        async fn test_content_mismatch_is_not_healed() {
            let fx = Fixture::new();
            fx.driver.add_element(MockElement::new("#title", "h1").text("Goodbye"));
            let result = run_single(
                &fx,
                json!({"step_id": 1, "action": "assert_text_equals", "description": "title",
                       "parameters": {"expected_text": "Welcome"}, "selector": "#title"}),
            )
            .await;
            assert_eq!(result.status, RunStatus::Fail);
            assert_eq!(result.error_class, Some(ErrorClass::Assertion));
            assert!(result.healing_attempts.is_empty());
        }

        #[tokio::test]
        async fn test_count_mismatch_is_never_healed() {
            let fx = Fixture::new();
            for _ in 0..2 {
                fx.driver.add_element(MockElement::new("li.item", "li"));
            }
            let result = run_single(
                &fx,
                json!({"step_id": 4, "action": "assert_element_count", "description": "three items",
                       "parameters": {"expected_count": 3}, "selector": "li.item"}),
            )
            .await;
            assert_eq!(result.status, RunStatus::Fail);
            assert_eq!(result.error_class, Some(ErrorClass::Assertion));
            assert!(result.error_details.unwrap().contains("found 2"));
            assert!(result.healing_attempts.is_empty());
        }

        #[tokio::test]
        async fn test_checked_and_enabled() {
            let fx = Fixture::new();
            fx.driver.add_element(MockElement::new("#terms", "input").checked(true));
            fx.driver.add_element(MockElement::new("#submit", "button").enabled(false));
            for step in [
                json!({"step_id": 1, "action": "assert_checked", "description": "terms",
                       "parameters": {}, "selector": "#terms"}),
                json!({"step_id": 1, "action": "assert_disabled", "description": "submit",
                       "parameters": {}, "selector": "#submit"}),
            ] {
                assert!(run_single(&fx, step).await.passed());
            }
            let result = run_single(
                &fx,
                json!({"step_id": 1, "action": "assert_not_checked", "description": "terms",
                       "parameters": {}, "selector": "#terms"}),
            )
            .await;
            assert_eq!(result.error_class, Some(ErrorClass::Assertion));
        }
    }

    mod soft_healing_tests {
        use super::*;

        fn suggestion(selector: &str) -> serde_json::Value {
            json!({"new_selector": selector, "reasoning": "stable test id on the login button"})
        }

        #[tokio::test]
        async fn test_heals_persists_and_rerun_needs_no_oracle() {
            let fx = Fixture::new();
            fx.driver.add_element(MockElement::new("#user", "input"));
            fx.driver.add_element(MockElement::new("[data-testid='login-btn']", "button"));
            let path = fx.write_test(&test_case(login_steps("#old-id")));

            let oracle = MockOracle::new().with_json(suggestion("[data-testid='login-btn']"));
            let engine = fx
                .engine(fx.config().with_healing(HealingMode::Soft))
                .with_oracle(Arc::new(oracle.clone()));
            let result = engine.run_file(&path).await;

            assert_eq!(result.status, RunStatus::Pass);
            assert_eq!(result.healed_steps_count, 1);
            assert!(result.healed_file_saved);
            assert_eq!(result.healing_attempts.len(), 1);
            assert_eq!(
                result.healing_attempts[0].validation,
                Validation::Accepted { matches: 1 }
            );
            assert_eq!(oracle.call_count(), 1);

            let saved = TestCase::load(&path).unwrap();
            assert_eq!(saved.steps[2].selector.as_deref(), Some("[data-testid='login-btn']"));
            assert_eq!(saved.steps[1].selector.as_deref(), Some("#user"));

            let quiet = MockOracle::new();
            let rerun = fx
                .engine(fx.config().with_healing(HealingMode::Soft))
                .with_oracle(Arc::new(quiet.clone()))
                .run_file(&path)
                .await;
            assert!(rerun.passed());
            assert_eq!(rerun.healed_steps_count, 0);
            assert!(!rerun.healed_file_saved);
            assert_eq!(quiet.call_count(), 0);
        }

        #[tokio::test]
        async fn test_retry_bound_keeps_original_selector() {
            let fx = Fixture::new();
            fx.driver.add_element(MockElement::new("#user", "input"));
            let path = fx.write_test(&test_case(login_steps("#old-id")));
            let oracle = MockOracle::new()
                .with_json(suggestion("#ghost-1"))
                .with_json(suggestion("#ghost-2"))
                .with_json(suggestion("#ghost-3"));
            let engine = fx
                .engine(fx.config().with_healing(HealingMode::Soft).with_retries(2))
                .with_oracle(Arc::new(oracle.clone()));
            let result = engine.run_file(&path).await;

            assert_eq!(result.status, RunStatus::Fail);
            assert_eq!(result.healing_attempts.len(), 2);
            assert!(result
                .healing_attempts
                .iter()
                .all(|a| a.validation == Validation::NoMatches));
            assert_eq!(oracle.call_count(), 2);
            assert_eq!(result.healed_steps_count, 0);
            assert!(!result.healed_file_saved);
            let saved = TestCase::load(&path).unwrap();
            assert_eq!(saved.steps[2].selector.as_deref(), Some("#old-id"));
        }

        #[tokio::test]
        async fn test_healing_disabled_makes_no_oracle_call() {
            let fx = Fixture::new();
            fx.driver.add_element(MockElement::new("#user", "input"));
            let oracle = MockOracle::new().with_json(suggestion("#login"));
            let engine = fx.engine(fx.config()).with_oracle(Arc::new(oracle.clone()));
            let mut test = parse(&test_case(login_steps("#old-id")));
            let result = engine.run(&mut test, None).await;
            assert_eq!(result.status, RunStatus::Fail);
            assert_eq!(oracle.call_count(), 0);
        }

        #[tokio::test]
        async fn test_healed_selector_written_into_test() {
            let fx = Fixture::new();
            fx.driver.add_element(MockElement::new("#user", "input"));
            fx.driver.add_element(MockElement::new("#login", "button"));
            let oracle = MockOracle::new().with_json(suggestion("#login"));
            let engine = fx
                .engine(fx.config().with_healing(HealingMode::Soft))
                .with_oracle(Arc::new(oracle));
            let mut test = parse(&test_case(login_steps("#old-id")));
            let result = engine.run(&mut test, None).await;
            assert!(result.passed());
            assert!(!result.healed_file_saved);
            assert_eq!(test.steps[2].selector.as_deref(), Some("#login"));
            assert!(fx.driver.was_called("count:#login"));
        }
    }

    mod hard_healing_tests {
        use super::*;

        #[derive(Debug, Default)]
        struct FakeRecorder {
            requests: Mutex<Vec<RecordRequest>>,
        }

        #[async_trait::async_trait]
        impl Recorder for FakeRecorder {
            async fn record(&self, request: &RecordRequest) -> SanarResult<RecordOutcome> {
                self.requests.lock().unwrap().push(request.clone());
                Ok(RecordOutcome {
                    success: true,
                    output: Some(request.output.clone()),
                    message: "recorded".into(),
                })
            }
        }

        #[tokio::test]
        async fn test_hard_healing_abandons_run() {
            let fx = Fixture::new();
            fx.driver.add_element(MockElement::new("#user", "input"));
            fx.driver.add_element(MockElement::new("#login", "button"));
            let path = fx.write_test(&test_case(json!([
                {"step_id": 1, "action": "navigate", "description": "Open", "parameters": {"url": URL}},
                {"step_id": 2, "action": "click", "description": "Click login",
                 "parameters": {}, "selector": "#old-id"},
                {"step_id": 3, "action": "click", "description": "Never runs",
                 "parameters": {}, "selector": "#login"}
            ])));
            let recorder = Arc::new(FakeRecorder::default());
            let oracle = MockOracle::new();
            let engine = fx
                .engine(fx.config().with_healing(HealingMode::Hard))
                .with_oracle(Arc::new(oracle.clone()))
                .with_recorder(recorder.clone());
            let result = engine.run_file(&path).await;

            assert_eq!(result.status, RunStatus::HealingTriggered);
            assert_eq!(result.steps_executed, 2);
            assert!(fx.driver.is_closed());
            assert!(!fx.driver.was_called("click:#login"));
            assert_eq!(oracle.call_count(), 0);
            assert_eq!(result.healing_attempts.len(), 1);
            assert_eq!(result.healing_attempts[0].mode, HealingMode::Hard);

            let requests = recorder.requests.lock().unwrap();
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].feature_description, "User logs in with valid credentials");
            let name = requests[0].output.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("login_healed_"));
        }

        #[tokio::test]
        async fn test_hard_mode_ignores_non_healable_failures() {
            let fx = Fixture::new();
            fx.driver.add_element(MockElement::new("#title", "h1").text("Other"));
            let recorder = Arc::new(FakeRecorder::default());
            let engine = fx
                .engine(fx.config().with_healing(HealingMode::Hard))
                .with_recorder(recorder.clone());
            let mut test = parse(&test_case(json!([
                {"step_id": 1, "action": "assert_text_equals", "description": "title",
                 "parameters": {"expected_text": "Welcome"}, "selector": "#title"}
            ])));
            let result = engine.run(&mut test, None).await;
            assert_eq!(result.status, RunStatus::Fail);
            assert!(recorder.requests.lock().unwrap().is_empty());
        }
    }

    mod visual_tests {
        use super::*;

        fn png(w: u32, h: u32) -> Vec<u8> {
            encode_png(&RgbaImage::from_pixel(w, h, Rgba([250, 250, 250, 255]))).unwrap()
        }

        fn save_baseline(fx: &Fixture, id: &str, png: &[u8], viewport: Option<Viewport>) {
            BaselineStore::new(fx.dir.path().join("baselines"))
                .save(
                    id,
                    png,
                    BaselineMetadata {
                        viewport_size: viewport,
                        ..BaselineMetadata::default()
                    },
                )
                .unwrap();
        }

        fn visual_step(id: &str) -> serde_json::Value {
            json!([
                {"step_id": 1, "action": "navigate", "description": "Open", "parameters": {"url": URL}},
                {"step_id": 2, "action": "assert_visual_match", "description": "Home looks right",
                 "parameters": {"baseline_id": id}, "selector": null}
            ])
        }

        #[tokio::test]
        async fn test_dimension_mismatch_fails_without_oracle() {
            let fx = Fixture::new();
            save_baseline(&fx, "home", &png(800, 600), None);
            fx.driver.set_screenshot(png(810, 600));
            let oracle = MockOracle::new().with_text("YES");
            let engine = fx
                .engine(fx.config().with_healing(HealingMode::Soft))
                .with_oracle(Arc::new(oracle.clone()));
            let mut test = parse(&test_case(visual_step("home")));
            let result = engine.run(&mut test, None).await;

            assert_eq!(result.status, RunStatus::Fail);
            assert_eq!(result.error_class, Some(ErrorClass::VisualMismatch));
            assert_eq!(oracle.call_count(), 0);
            assert!(result.healing_attempts.is_empty());
        }

        #[tokio::test]
        async fn test_matching_baseline_passes_and_is_reported() {
            let fx = Fixture::new();
            save_baseline(&fx, "home", &png(40, 30), None);
            fx.driver.set_screenshot(png(40, 30));
            let mut test = parse(&test_case(visual_step("home")));
            let result = fx.engine(fx.config()).run(&mut test, None).await;

            assert!(result.passed(), "{}", result.message);
            assert_eq!(result.visual_assertion_results.len(), 1);
            assert_eq!(result.visual_assertion_results[0].pixel_difference_ratio, 0.0);
            assert!(result.visual_failure_details.is_none());
        }

        #[tokio::test]
        async fn test_viewport_from_baseline_metadata() {
            let fx = Fixture::new();
            let viewport = Viewport {
                width: 1024,
                height: 768,
            };
            save_baseline(&fx, "home", &png(8, 8), Some(viewport));
            fx.driver.set_screenshot(png(8, 8));
            let mut test = parse(&test_case(visual_step("home")));
            fx.engine(fx.config()).run(&mut test, None).await;
            assert_eq!(fx.factory.launches()[0].viewport, viewport);

            let configured = fx.config().with_viewport(640, 480);
            fx.engine(configured).run(&mut test, None).await;
            assert_eq!(fx.factory.launches()[1].viewport.width, 640);
        }
    }

    mod verification_tests {
        use super::*;

        fn verify_step() -> serde_json::Value {
            json!([
                {"step_id": 1, "action": "navigate", "description": "Open", "parameters": {"url": URL}},
                {"step_id": 2, "action": "assert_llm_verification",
                 "description": "The welcome banner is visible", "parameters": {}}
            ])
        }

        #[tokio::test]
        async fn test_yes_passes_no_fails() {
            let fx = Fixture::new();
            let oracle = MockOracle::new()
                .with_text("YES - banner shown")
                .with_text("NO - banner missing");
            let engine = fx.engine(fx.config()).with_oracle(Arc::new(oracle.clone()));

            let mut test = parse(&test_case(verify_step()));
            assert!(engine.run(&mut test, None).await.passed());
            let prompt = oracle.last_prompt().unwrap();
            assert!(prompt.contains("The welcome banner is visible"));
            assert!(prompt.contains(URL));

            let result = engine.run(&mut test, None).await;
            assert_eq!(result.status, RunStatus::Fail);
            assert_eq!(result.error_class, Some(ErrorClass::Assertion));
        }

        #[tokio::test]
        async fn test_oracle_error_is_oracle_class() {
            let fx = Fixture::new();
            let oracle = MockOracle::new().with_text_error(OracleError::Http("down".into()));
            let engine = fx.engine(fx.config()).with_oracle(Arc::new(oracle));
            let mut test = parse(&test_case(verify_step()));
            let result = engine.run(&mut test, None).await;
            assert_eq!(result.error_class, Some(ErrorClass::Oracle));

            let without = fx.engine(fx.config());
            let result = without.run(&mut test, None).await;
            assert_eq!(result.error_class, Some(ErrorClass::Oracle));
        }
    }

    #[test]
    fn test_file_safe_names() {
        assert_eq!(file_safe("login flow/v2"), "login_flow_v2");
        assert_eq!(file_safe(""), "test");
        let path = default_recording_path(Path::new("out"), "my test");
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("my_test_healed_"));
    }
}
