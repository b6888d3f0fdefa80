//! Output formatting and reporting

use console::{style, Term};
use sanar::{RunResult, RunStatus, SerializedContext};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Result format on stdout
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// The full run result as JSON
    Json,
}

/// Writes user-facing lines
#[derive(Debug)]
pub struct Reporter {
    out: Term,
    err: Term,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl Reporter {
    /// Create a new reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            out: Term::stdout(),
            err: Term::stderr(),
            use_color,
            quiet,
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = if self.use_color {
            style("✓").green().bold().to_string()
        } else {
            "PASS".to_string()
        };
        let _ = self.out.write_line(&format!("{prefix} {message}"));
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // Failures print even in quiet mode
        let prefix = if self.use_color {
            style("✗").red().bold().to_string()
        } else {
            "FAIL".to_string()
        };
        let _ = self.err.write_line(&format!("{prefix} {message}"));
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = if self.use_color {
            style("ℹ").blue().bold().to_string()
        } else {
            "INFO".to_string()
        };
        let _ = self.out.write_line(&format!("{prefix} {message}"));
    }

    /// Print raw text to stdout, even in quiet mode
    pub fn raw(&self, text: &str) {
        let _ = self.out.write_line(text.trim_end_matches('\n'));
    }

    /// Print a run result in `format`
    ///
    /// # Errors
    ///
    /// JSON serialization failure
    pub fn run_result(&self, result: &RunResult, format: OutputFormat) -> serde_json::Result<()> {
        match format {
            OutputFormat::Json => self.raw(&result.to_json()?),
            OutputFormat::Text => {
                if self.quiet && result.passed() {
                    return Ok(());
                }
                self.raw(&render_run_text(result, self.use_color));
            }
        }
        Ok(())
    }
}

fn status_label(status: RunStatus, use_color: bool) -> String {
    if !use_color {
        return status.as_str().to_string();
    }
    match status {
        RunStatus::Pass => style(status.as_str()).green().bold().to_string(),
        RunStatus::HealingTriggered => style(status.as_str()).yellow().bold().to_string(),
        RunStatus::Fail | RunStatus::Error => style(status.as_str()).red().bold().to_string(),
    }
}

/// Human summary of a run
#[must_use]
pub fn render_run_text(result: &RunResult, use_color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {} ({} step(s), {:.2}s)",
        status_label(result.status, use_color),
        result.test_name,
        result.steps_executed,
        result.duration_seconds
    );
    let _ = writeln!(out, "  {}", result.message);

    if let Some(step) = &result.failed_step {
        let _ = writeln!(
            out,
            "  failed step {}: {} ({})",
            step.step_id, step.description, step.action
        );
        if let Some(selector) = step.selector() {
            let _ = writeln!(out, "  selector: {selector}");
        }
    }
    if let Some(class) = result.error_class {
        let _ = writeln!(out, "  error class: {class}");
    }
    if let Some(path) = &result.screenshot_on_failure {
        let _ = writeln!(out, "  screenshot: {}", path.display());
    }
    for message in &result.console_messages_on_failure {
        let _ = writeln!(out, "  console {}: {}", message.kind, message.text);
    }
    if !result.healing_attempts.is_empty() {
        let _ = writeln!(
            out,
            "  healing: {} attempt(s), {} step(s) healed{}",
            result.healing_attempts.len(),
            result.healed_steps_count,
            if result.healed_file_saved {
                ", test file updated"
            } else {
                ""
            }
        );
    }
    for visual in &result.visual_assertion_results {
        let _ = writeln!(
            out,
            "  visual {}: {} ({:.4} differing{})",
            visual.baseline_id,
            if visual.passed() { "match" } else { "mismatch" },
            visual.pixel_difference_ratio,
            if visual.llm_override { ", oracle override" } else { "" }
        );
    }
    out
}

/// Outline followed by the selector table
#[must_use]
pub fn render_inspect_text(context: &SerializedContext, selectors: &BTreeMap<u32, String>) -> String {
    let mut out = String::new();
    out.push_str(&context.text);
    if !context.text.ends_with('\n') {
        out.push('\n');
    }
    if context.truncated {
        out.push_str("(static text truncated)\n");
    }
    out.push('\n');
    let _ = writeln!(out, "{} interactive element(s)", selectors.len());
    for (index, selector) in selectors {
        let _ = writeln!(out, "[{index}] {selector}");
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use sanar::{ActionKind, ErrorClass, TestStep};
    use std::path::PathBuf;

    fn failed_result() -> RunResult {
        let mut result = RunResult::new("login");
        result.status = RunStatus::Fail;
        result.message = "Test failed at step 2: timeout".to_string();
        result.steps_executed = 2;
        result.failed_step =
            Some(TestStep::new(2, ActionKind::Click, "press submit").with_selector("#submit"));
        result.error_class = Some(ErrorClass::Interaction);
        result.screenshot_on_failure = Some(PathBuf::from("output/failure_login_step2.png"));
        result
    }

    mod run_text_tests {
        use super::*;

        #[test]
        fn test_plain_failure_summary() {
            let text = render_run_text(&failed_result(), false);
            assert!(text.starts_with("FAIL login (2 step(s)"));
            assert!(text.contains("failed step 2: press submit (click)"));
            assert!(text.contains("selector: #submit"));
            assert!(text.contains("failure_login_step2.png"));
        }

        #[test]
        fn test_pass_summary_has_no_failure_lines() {
            let mut result = RunResult::new("login");
            result.status = RunStatus::Pass;
            result.message = "Test passed".to_string();
            let text = render_run_text(&result, false);
            assert!(text.starts_with("PASS login"));
            assert!(!text.contains("failed step"));
        }
    }

    mod inspect_text_tests {
        use super::*;

        #[test]
        fn test_selector_table() {
            let context = SerializedContext {
                text: "[0]<button>Sign in</button>".to_string(),
                static_ids: BTreeMap::new(),
                truncated: false,
            };
            let mut selectors = BTreeMap::new();
            selectors.insert(0, "button#login".to_string());
            let text = render_inspect_text(&context, &selectors);
            assert!(text.contains("1 interactive element(s)"));
            assert!(text.contains("[0] button#login"));
        }
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Text);
    }
}
