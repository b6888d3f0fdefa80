//! Oracle: the external multimodal model consulted for healing and
//! semantic checks.
//!
//! Everything the oracle returns is advisory. Selectors it proposes are
//! counted on the live page before use, and yes/no verdicts go through
//! [`Verdict::parse`], which treats anything it cannot read as a failure.

#[cfg(feature = "llm")]
pub mod client;
pub mod throttle;

#[cfg(feature = "llm")]
pub use client::HttpOracle;
pub use throttle::{RateGate, Throttled};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;
use regex::Regex;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Errors from oracle calls
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Transport failure
    #[error("HTTP error: {0}")]
    Http(String),
    /// Server answered with an error status
    #[error("API error {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },
    /// No content in the response
    #[error("oracle returned an empty response")]
    EmptyResponse,
    /// Content present but not valid JSON
    #[error("unparseable oracle response: {0}")]
    Unparseable(String),
    /// No oracle endpoint configured
    #[error("no oracle configured")]
    NotConfigured,
    /// JSON did not match the requested shape
    #[error("oracle response does not match schema: {0}")]
    Schema(String),
}

/// Narrow interface to the oracle
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Ask for a JSON object shaped like `schema`, optionally with a PNG image
    async fn generate_json(
        &self,
        schema: &Value,
        prompt: &str,
        image: Option<&[u8]>,
    ) -> Result<Value, OracleError>;

    /// Ask a free-text question about a PNG image
    async fn generate_multimodal(&self, prompt: &str, image: &[u8]) -> Result<String, OracleError>;
}

#[async_trait]
impl<O: Oracle + ?Sized> Oracle for Arc<O> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn generate_json(
        &self,
        schema: &Value,
        prompt: &str,
        image: Option<&[u8]>,
    ) -> Result<Value, OracleError> {
        (**self).generate_json(schema, prompt, image).await
    }

    async fn generate_multimodal(&self, prompt: &str, image: &[u8]) -> Result<String, OracleError> {
        (**self).generate_multimodal(prompt, image).await
    }
}

/// [`Oracle::generate_json`] decoded into `T`.
///
/// # Errors
///
/// Oracle failure, or [`OracleError::Schema`] when the JSON does not fit `T`.
pub async fn generate_typed<T: DeserializeOwned>(
    oracle: &dyn Oracle,
    schema: &Value,
    prompt: &str,
    image: Option<&[u8]>,
) -> Result<T, OracleError> {
    let value = oracle.generate_json(schema, prompt, image).await?;
    serde_json::from_value(value).map_err(|e| OracleError::Schema(e.to_string()))
}

/// Outcome of a yes/no question
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Answer starts with YES
    Yes,
    /// Answer starts with NO
    No,
    /// Anything else
    Unclear,
}

impl Verdict {
    /// Read the leading YES/NO of an answer, ignoring case and leading
    /// markdown emphasis.
    #[must_use]
    pub fn parse(answer: &str) -> Self {
        let Some(re) = verdict_pattern() else {
            return Self::Unclear;
        };
        match re.captures(answer).and_then(|c| c.get(1)) {
            Some(m) if m.as_str().eq_ignore_ascii_case("yes") => Self::Yes,
            Some(_) => Self::No,
            None => Self::Unclear,
        }
    }

    /// Whether the verdict is an explicit yes
    #[must_use]
    pub const fn is_yes(&self) -> bool {
        matches!(self, Self::Yes)
    }
}

/// Leading yes/no after optional markdown emphasis, compiled once
fn verdict_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^[\s*_`#>]*(yes|no)\b").ok())
        .as_ref()
}

/// One recorded oracle call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleCall {
    /// `json` or `multimodal`
    pub kind: &'static str,
    /// Prompt text
    pub prompt: String,
    /// Whether an image was attached
    pub with_image: bool,
}

#[derive(Debug, Default)]
struct MockScript {
    json: VecDeque<Result<Value, OracleError>>,
    text: VecDeque<Result<String, OracleError>>,
    calls: Vec<OracleCall>,
}

/// Scripted oracle for tests.
///
/// Replies are consumed first-in first-out, separately for JSON and text
/// calls. An exhausted script answers [`OracleError::EmptyResponse`].
/// Clones share the same script.
#[derive(Debug, Clone, Default)]
pub struct MockOracle {
    script: Arc<Mutex<MockScript>>,
}

impl MockOracle {
    /// Oracle with an empty script
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, MockScript> {
        self.script.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue a JSON reply
    #[must_use]
    pub fn with_json(self, value: Value) -> Self {
        self.script().json.push_back(Ok(value));
        self
    }

    /// Queue a JSON-call failure
    #[must_use]
    pub fn with_json_error(self, error: OracleError) -> Self {
        self.script().json.push_back(Err(error));
        self
    }

    /// Queue a text reply
    #[must_use]
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.script().text.push_back(Ok(text.into()));
        self
    }

    /// Queue a text-call failure
    #[must_use]
    pub fn with_text_error(self, error: OracleError) -> Self {
        self.script().text.push_back(Err(error));
        self
    }

    /// Number of calls made so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.script().calls.len()
    }

    /// Calls made so far
    #[must_use]
    pub fn calls(&self) -> Vec<OracleCall> {
        self.script().calls.clone()
    }

    /// Prompt of the most recent call
    #[must_use]
    pub fn last_prompt(&self) -> Option<String> {
        self.script().calls.last().map(|c| c.prompt.clone())
    }
}

#[async_trait]
impl Oracle for MockOracle {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_json(
        &self,
        _schema: &Value,
        prompt: &str,
        image: Option<&[u8]>,
    ) -> Result<Value, OracleError> {
        let mut script = self.script();
        script.calls.push(OracleCall {
            kind: "json",
            prompt: prompt.to_string(),
            with_image: image.is_some(),
        });
        script.json.pop_front().unwrap_or(Err(OracleError::EmptyResponse))
    }

    async fn generate_multimodal(&self, prompt: &str, _image: &[u8]) -> Result<String, OracleError> {
        let mut script = self.script();
        script.calls.push(OracleCall {
            kind: "multimodal",
            prompt: prompt.to_string(),
            with_image: true,
        });
        script.text.pop_front().unwrap_or(Err(OracleError::EmptyResponse))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    mod verdict_tests {
        use super::*;

        #[test]
        fn test_yes_and_no() {
            assert_eq!(Verdict::parse("YES - equivalent"), Verdict::Yes);
            assert_eq!(Verdict::parse("  yes, the button is there"), Verdict::Yes);
            assert_eq!(Verdict::parse("**YES** looks fine"), Verdict::Yes);
            assert_eq!(Verdict::parse("NO - button missing"), Verdict::No);
            assert_eq!(Verdict::parse("No."), Verdict::No);
        }

        #[test]
        fn test_unclear() {
            assert_eq!(Verdict::parse(""), Verdict::Unclear);
            assert_eq!(Verdict::parse("Maybe, hard to tell"), Verdict::Unclear);
            assert_eq!(Verdict::parse("Yesterday the page differed"), Verdict::Unclear);
            assert_eq!(Verdict::parse("Nothing changed"), Verdict::Unclear);
            assert!(!Verdict::Unclear.is_yes());
        }

        #[test]
        fn test_pattern_is_shared_across_calls() {
            let first = verdict_pattern().unwrap();
            let second = verdict_pattern().unwrap();
            assert!(std::ptr::eq(first, second));
            for _ in 0..3 {
                assert_eq!(Verdict::parse("> _yes_"), Verdict::Yes);
            }
        }
    }

    mod mock_tests {
        use super::*;

        #[derive(Debug, serde::Deserialize)]
        struct Suggestion {
            new_selector: Option<String>,
        }

        #[tokio::test]
        async fn test_scripted_replies_in_order() {
            let oracle = MockOracle::new()
                .with_json(json!({"new_selector": "#a"}))
                .with_json(json!({"new_selector": null}))
                .with_text("YES");

            let first: Suggestion = generate_typed(&oracle, &json!({}), "p1", Some(b"png")).await.unwrap();
            assert_eq!(first.new_selector.as_deref(), Some("#a"));
            let second: Suggestion = generate_typed(&oracle, &json!({}), "p2", None).await.unwrap();
            assert!(second.new_selector.is_none());
            assert_eq!(oracle.generate_multimodal("p3", b"png").await.unwrap(), "YES");

            assert_eq!(oracle.call_count(), 3);
            let calls = oracle.calls();
            assert!(calls[0].with_image);
            assert!(!calls[1].with_image);
            assert_eq!(calls[2].kind, "multimodal");
            assert_eq!(oracle.last_prompt().as_deref(), Some("p3"));
        }

        #[tokio::test]
        async fn test_exhausted_script_is_an_error() {
            let oracle = MockOracle::new();
            let err = oracle.generate_multimodal("p", b"").await.unwrap_err();
            assert!(matches!(err, OracleError::EmptyResponse));
            assert_eq!(oracle.call_count(), 1);
        }

        #[tokio::test]
        async fn test_schema_mismatch() {
            let oracle = MockOracle::new().with_json(json!({"new_selector": 42}));
            let err = generate_typed::<Suggestion>(&oracle, &json!({}), "p", None)
                .await
                .unwrap_err();
            assert!(matches!(err, OracleError::Schema(_)));
        }

        #[tokio::test]
        async fn test_clones_share_script() {
            let oracle = MockOracle::new().with_text("NO");
            let shared: Arc<dyn Oracle> = Arc::new(oracle.clone());
            assert_eq!(shared.generate_multimodal("q", b"").await.unwrap(), "NO");
            assert_eq!(oracle.call_count(), 1);
        }
    }
}
