//! BrowserDriver - abstract browser session used by the replay engine
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ReplayEngine / HealingController / VisualRegression              │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  BrowserDriver (trait)            DriverFactory (trait)           │
//! │     ├── ChromiumDriver  (CDP via chromiumoxide, `browser`)        │
//! │     └── MockDriver      (scripted in-memory page, tests)          │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Selectors handed to a driver are already normalized: XPath carries an
//! explicit `xpath=` prefix, everything else is CSS with optional
//! `:text-is("...")` and `>>` chaining.

use crate::dom::{self, DomState};
use crate::result::{SanarError, SanarResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Viewport size in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Browser configuration for a driver session
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Run in headless mode
    pub headless: bool,
    /// Viewport size
    pub viewport: Viewport,
    /// Executable path override
    pub executable_path: Option<String>,
    /// Disable the Chromium sandbox
    pub no_sandbox: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            executable_path: None,
            no_sandbox: false,
        }
    }
}

impl DriverConfig {
    /// Create new config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set headless mode
    #[must_use]
    pub const fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set viewport dimensions
    #[must_use]
    pub const fn viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Viewport { width, height };
        self
    }

    /// Set the browser executable
    #[must_use]
    pub fn executable(mut self, path: impl Into<String>) -> Self {
        self.executable_path = Some(path.into());
        self
    }
}

/// Option to pick in a `<select>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectOption {
    /// Visible label
    Label(String),
    /// `value` attribute
    Value(String),
    /// Zero-based position
    Index(usize),
}

impl std::fmt::Display for SelectOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Label(l) => write!(f, "label={l}"),
            Self::Value(v) => write!(f, "value={v}"),
            Self::Index(i) => write!(f, "index={i}"),
        }
    }
}

/// Scroll direction, one viewport height per step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    /// Towards the top
    Up,
    /// Towards the bottom
    Down,
}

/// Page load states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    /// `load` event fired
    #[default]
    Load,
    /// `DOMContentLoaded` fired
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    /// No new requests for 500ms
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

impl LoadState {
    /// Name used in test files
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "domcontentloaded",
            Self::NetworkIdle => "networkidle",
        }
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element states for `wait_for_selector`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitState {
    /// Present in the DOM
    Attached,
    /// Absent from the DOM
    Detached,
    /// Present and visible
    #[default]
    Visible,
    /// Absent or not visible
    Hidden,
}

impl WaitState {
    /// Whether an element in `state` (or no element) satisfies this wait
    #[must_use]
    pub fn is_satisfied_by(&self, state: Option<&ElementState>) -> bool {
        match (self, state) {
            (Self::Attached, found) => found.is_some(),
            (Self::Detached, found) => found.is_none(),
            (Self::Visible, found) => found.is_some_and(|s| s.visible),
            (Self::Hidden, found) => found.map_or(true, |s| !s.visible),
        }
    }
}

impl std::fmt::Display for WaitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Attached => "attached",
            Self::Detached => "detached",
            Self::Visible => "visible",
            Self::Hidden => "hidden",
        };
        f.write_str(name)
    }
}

/// Observable state of the first element matching a selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementState {
    /// Lower-case tag name
    pub tag_name: String,
    /// Rendered text content
    pub text: String,
    /// Rendered and not hidden
    pub visible: bool,
    /// Not disabled
    pub enabled: bool,
    /// Checkbox/radio state
    pub checked: bool,
    /// Attribute map
    pub attributes: BTreeMap<String, String>,
}

/// Console entry captured from the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    /// `log`, `warning`, `error`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Message text
    pub text: String,
}

impl ConsoleMessage {
    /// Create a console entry
    #[must_use]
    pub fn new(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: text.into(),
        }
    }

    /// Error or warning level
    #[must_use]
    pub fn is_problem(&self) -> bool {
        matches!(self.kind.as_str(), "error" | "warning" | "warn")
    }
}

/// Network request observed during the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRequest {
    /// Request URL
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Response status, if known
    pub status: Option<u16>,
    /// Resource type (`document`, `script`, `fetch`, ...)
    pub resource_type: String,
}

/// Abstract browser session.
///
/// One session is owned by one run; nothing in it is shared across runs.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigate and wait for the load event
    async fn navigate(&mut self, url: &str, timeout: Duration) -> SanarResult<()>;

    /// Click the first match once it is actionable
    async fn click(&self, selector: &str, timeout: Duration) -> SanarResult<()>;

    /// Replace the value of an input
    async fn type_text(&self, selector: &str, text: &str, timeout: Duration) -> SanarResult<()>;

    /// Check or uncheck a checkbox/radio
    async fn set_checked(&self, selector: &str, checked: bool, timeout: Duration) -> SanarResult<()>;

    /// Pick an option in a `<select>`
    async fn select_option(
        &self,
        selector: &str,
        option: &SelectOption,
        timeout: Duration,
    ) -> SanarResult<()>;

    /// Scroll the page by one viewport
    async fn scroll(&self, direction: ScrollDirection) -> SanarResult<()>;

    /// Wait for a page load state
    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> SanarResult<()>;

    /// Wait until the selector reaches `state`
    async fn wait_for_selector(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> SanarResult<()>;

    /// Number of live matches, without waiting
    async fn count(&self, selector: &str) -> SanarResult<usize>;

    /// State of the first match, without waiting
    async fn query_element(&self, selector: &str) -> SanarResult<Option<ElementState>>;

    /// PNG screenshot of the full page, or of one element
    async fn screenshot(&self, element: Option<&str>) -> SanarResult<Vec<u8>>;

    /// Current page URL
    async fn current_url(&self) -> SanarResult<String>;

    /// Raw `{rootId, map}` snapshot from [`dom::SNAPSHOT_SCRIPT`]
    async fn dom_snapshot(&self) -> SanarResult<serde_json::Value>;

    /// Console messages since the session started
    async fn console_messages(&self) -> SanarResult<Vec<ConsoleMessage>>;

    /// Requests since the session started
    async fn network_requests(&self) -> SanarResult<Vec<NetworkRequest>>;

    /// Navigation timing of the current document
    async fn performance_timing(&self) -> SanarResult<Option<serde_json::Value>>;

    /// Tear down the session
    async fn close(&mut self) -> SanarResult<()>;
}

/// Creates fresh, independent sessions
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Launch a new session
    async fn launch(&self, config: &DriverConfig) -> SanarResult<Box<dyn BrowserDriver>>;
}

/// Capture a fresh [`DomState`] from the live page.
///
/// Blank pages give an empty `<body>` without running the snapshot script.
///
/// # Errors
///
/// [`SanarError::DomBuild`] if the script cannot run or returns no map.
pub async fn capture_dom_state(driver: &dyn BrowserDriver) -> SanarResult<DomState> {
    let url = driver.current_url().await.unwrap_or_default();
    if dom::is_blank_page(&url) {
        debug!(url = %url, "blank page, skipping snapshot");
        return Ok(DomState::empty());
    }
    let raw = driver
        .dom_snapshot()
        .await
        .map_err(|e| SanarError::dom_build(format!("snapshot script failed: {e}")))?;
    dom::build(&raw)
}

/// Last `limit` error/warning console entries
#[must_use]
pub fn console_tail(messages: &[ConsoleMessage], limit: usize) -> Vec<ConsoleMessage> {
    let problems: Vec<&ConsoleMessage> = messages.iter().filter(|m| m.is_problem()).collect();
    let start = problems.len().saturating_sub(limit);
    problems[start..].iter().map(|m| (*m).clone()).collect()
}

/// Point at which a poll loop gives up
///
/// A timeout too large for the clock yields a deadline that never passes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    pub(crate) fn passed(self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }
}

// =============================================================================
// MOCK DRIVER
// =============================================================================

/// Element on the scripted page
#[derive(Debug, Clone)]
pub struct MockElement {
    /// Selectors that resolve to this element
    pub selectors: Vec<String>,
    /// Reported state
    pub state: ElementState,
    /// Accepts clicks and input
    pub actionable: bool,
    /// Removed from the DOM while acting on it
    pub detached: bool,
    /// `<select>` options as (label, value)
    pub options: Vec<(String, String)>,
    /// Element screenshot
    pub screenshot: Option<Vec<u8>>,
}

impl MockElement {
    /// Visible, enabled element reachable through `selector`
    #[must_use]
    pub fn new(selector: impl Into<String>, tag_name: impl Into<String>) -> Self {
        Self {
            selectors: vec![selector.into()],
            state: ElementState {
                tag_name: tag_name.into(),
                visible: true,
                enabled: true,
                ..ElementState::default()
            },
            actionable: true,
            detached: false,
            options: Vec::new(),
            screenshot: None,
        }
    }

    /// Also reachable through `selector`
    #[must_use]
    pub fn alias(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }

    /// Set text content
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.state.text = text.into();
        self
    }

    /// Set an attribute
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.state.attributes.insert(name.into(), value.into());
        self
    }

    /// Set visibility
    #[must_use]
    pub const fn visible(mut self, visible: bool) -> Self {
        self.state.visible = visible;
        self
    }

    /// Set enabled state
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.state.enabled = enabled;
        self
    }

    /// Set checked state
    #[must_use]
    pub const fn checked(mut self, checked: bool) -> Self {
        self.state.checked = checked;
        self
    }

    /// Refuse actions
    #[must_use]
    pub const fn not_actionable(mut self) -> Self {
        self.actionable = false;
        self
    }

    /// Detach on action
    #[must_use]
    pub const fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Add a `<select>` option
    #[must_use]
    pub fn option(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((label.into(), value.into()));
        self
    }

    /// Screenshot returned for this element
    #[must_use]
    pub fn with_screenshot(mut self, png: Vec<u8>) -> Self {
        self.screenshot = Some(png);
        self
    }
}

#[derive(Debug, Default)]
struct MockPage {
    url: String,
    elements: Vec<MockElement>,
    snapshot: Option<serde_json::Value>,
    screenshot: Option<Vec<u8>>,
    console: Vec<ConsoleMessage>,
    network: Vec<NetworkRequest>,
    timing: Option<serde_json::Value>,
    failing_urls: Vec<String>,
    call_history: Vec<String>,
    closed: bool,
}

/// Mock driver for unit testing.
///
/// Clones share the same scripted page, so a test can keep a handle while
/// the engine owns the session.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    page: Arc<Mutex<MockPage>>,
}

impl MockDriver {
    /// Create new mock driver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn page(&self) -> MutexGuard<'_, MockPage> {
        self.page.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, call: String) {
        self.page().call_history.push(call);
    }

    /// Add a mock element
    pub fn add_element(&self, element: MockElement) {
        self.page().elements.push(element);
    }

    /// Remove every element reachable through `selector`
    pub fn remove_elements(&self, selector: &str) {
        self.page().elements.retain(|e| !e.selectors.iter().any(|s| s == selector));
    }

    /// Set the raw DOM snapshot
    pub fn set_dom_snapshot(&self, snapshot: serde_json::Value) {
        self.page().snapshot = Some(snapshot);
    }

    /// Set the full-page screenshot
    pub fn set_screenshot(&self, png: Vec<u8>) {
        self.page().screenshot = Some(png);
    }

    /// Append a console message
    pub fn push_console(&self, message: ConsoleMessage) {
        self.page().console.push(message);
    }

    /// Append a network request
    pub fn push_request(&self, request: NetworkRequest) {
        self.page().network.push(request);
    }

    /// Set navigation timing
    pub fn set_performance_timing(&self, timing: serde_json::Value) {
        self.page().timing = Some(timing);
    }

    /// Make navigation to `url` fail
    pub fn fail_navigation(&self, url: impl Into<String>) {
        self.page().failing_urls.push(url.into());
    }

    /// Current element state for `selector`
    #[must_use]
    pub fn element_state(&self, selector: &str) -> Option<ElementState> {
        self.page()
            .elements
            .iter()
            .find(|e| e.selectors.iter().any(|s| s == selector))
            .map(|e| e.state.clone())
    }

    /// Get call history
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.page().call_history.clone()
    }

    /// Check if method was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        self.page().call_history.iter().any(|c| c.starts_with(method))
    }

    /// Number of calls starting with `prefix`
    #[must_use]
    pub fn call_count(&self, prefix: &str) -> usize {
        self.page()
            .call_history
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Whether `close` ran
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.page().closed
    }

    /// Apply `f` to the first actionable match of `selector`
    fn act<F>(&self, selector: &str, timeout: Duration, f: F) -> SanarResult<()>
    where
        F: FnOnce(&mut MockElement) -> SanarResult<()>,
    {
        let mut page = self.page();
        let Some(element) = page
            .elements
            .iter_mut()
            .find(|e| e.selectors.iter().any(|s| s == selector))
        else {
            return Err(SanarError::Timeout {
                what: selector.to_string(),
                ms: timeout.as_millis() as u64,
            });
        };
        if element.detached {
            return Err(SanarError::Detached {
                selector: selector.to_string(),
            });
        }
        if !element.actionable || !element.state.visible || !element.state.enabled {
            return Err(SanarError::NotActionable {
                selector: selector.to_string(),
                message: String::from("element is not visible, enabled and stable"),
            });
        }
        f(element)
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> SanarResult<()> {
        self.record(format!("navigate:{url}"));
        let mut page = self.page();
        if page.failing_urls.iter().any(|u| u == url) {
            return Err(SanarError::Timeout {
                what: url.to_string(),
                ms: timeout.as_millis() as u64,
            });
        }
        page.url = url.to_string();
        Ok(())
    }

    async fn click(&self, selector: &str, timeout: Duration) -> SanarResult<()> {
        self.record(format!("click:{selector}"));
        self.act(selector, timeout, |_| Ok(()))
    }

    async fn type_text(&self, selector: &str, text: &str, timeout: Duration) -> SanarResult<()> {
        self.record(format!("type:{selector}:{text}"));
        self.act(selector, timeout, |el| {
            el.state.attributes.insert("value".into(), text.to_string());
            Ok(())
        })
    }

    async fn set_checked(&self, selector: &str, checked: bool, timeout: Duration) -> SanarResult<()> {
        let verb = if checked { "check" } else { "uncheck" };
        self.record(format!("{verb}:{selector}"));
        self.act(selector, timeout, |el| {
            el.state.checked = checked;
            Ok(())
        })
    }

    async fn select_option(
        &self,
        selector: &str,
        option: &SelectOption,
        timeout: Duration,
    ) -> SanarResult<()> {
        self.record(format!("select:{selector}:{option}"));
        self.act(selector, timeout, |el| {
            let picked = match option {
                SelectOption::Label(l) => el.options.iter().find(|(label, _)| label == l),
                SelectOption::Value(v) => el.options.iter().find(|(_, value)| value == v),
                SelectOption::Index(i) => el.options.get(*i),
            };
            let Some((_, value)) = picked.cloned() else {
                return Err(SanarError::NotActionable {
                    selector: selector.to_string(),
                    message: format!("no option matching {option}"),
                });
            };
            el.state.attributes.insert("value".into(), value);
            Ok(())
        })
    }

    async fn scroll(&self, direction: ScrollDirection) -> SanarResult<()> {
        self.record(format!("scroll:{direction:?}"));
        Ok(())
    }

    async fn wait_for_load_state(&self, state: LoadState, _timeout: Duration) -> SanarResult<()> {
        self.record(format!("wait_for_load_state:{state}"));
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> SanarResult<()> {
        self.record(format!("wait_for_selector:{selector}:{state}"));
        let current = self.element_state(selector);
        if state.is_satisfied_by(current.as_ref()) {
            Ok(())
        } else {
            Err(SanarError::Timeout {
                what: format!("{selector} to be {state}"),
                ms: timeout.as_millis() as u64,
            })
        }
    }

    async fn count(&self, selector: &str) -> SanarResult<usize> {
        self.record(format!("count:{selector}"));
        Ok(self
            .page()
            .elements
            .iter()
            .filter(|e| e.selectors.iter().any(|s| s == selector))
            .count())
    }

    async fn query_element(&self, selector: &str) -> SanarResult<Option<ElementState>> {
        Ok(self.element_state(selector))
    }

    async fn screenshot(&self, element: Option<&str>) -> SanarResult<Vec<u8>> {
        self.record(format!("screenshot:{}", element.unwrap_or("page")));
        let page = self.page();
        match element {
            None => Ok(page.screenshot.clone().unwrap_or_default()),
            Some(selector) => page
                .elements
                .iter()
                .find(|e| e.selectors.iter().any(|s| s == selector))
                .map(|e| e.screenshot.clone().unwrap_or_default())
                .ok_or_else(|| SanarError::ElementNotFound {
                    selector: selector.to_string(),
                }),
        }
    }

    async fn current_url(&self) -> SanarResult<String> {
        Ok(self.page().url.clone())
    }

    async fn dom_snapshot(&self) -> SanarResult<serde_json::Value> {
        self.record(String::from("dom_snapshot"));
        self.page()
            .snapshot
            .clone()
            .ok_or_else(|| SanarError::browser("no snapshot scripted"))
    }

    async fn console_messages(&self) -> SanarResult<Vec<ConsoleMessage>> {
        Ok(self.page().console.clone())
    }

    async fn network_requests(&self) -> SanarResult<Vec<NetworkRequest>> {
        Ok(self.page().network.clone())
    }

    async fn performance_timing(&self) -> SanarResult<Option<serde_json::Value>> {
        Ok(self.page().timing.clone())
    }

    async fn close(&mut self) -> SanarResult<()> {
        self.record(String::from("close"));
        self.page().closed = true;
        Ok(())
    }
}

/// Factory handing out sessions backed by one shared [`MockDriver`]
#[derive(Debug, Clone, Default)]
pub struct MockDriverFactory {
    driver: MockDriver,
    fail_launch: bool,
    launches: Arc<Mutex<Vec<DriverConfig>>>,
}

impl MockDriverFactory {
    /// Factory for `driver`
    #[must_use]
    pub fn new(driver: MockDriver) -> Self {
        Self {
            driver,
            fail_launch: false,
            launches: Arc::default(),
        }
    }

    /// Make every launch fail
    #[must_use]
    pub const fn failing(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    /// Configs of every launch so far
    #[must_use]
    pub fn launches(&self) -> Vec<DriverConfig> {
        self.launches
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DriverFactory for MockDriverFactory {
    async fn launch(&self, config: &DriverConfig) -> SanarResult<Box<dyn BrowserDriver>> {
        if let Ok(mut launches) = self.launches.lock() {
            launches.push(config.clone());
        }
        if self.fail_launch {
            warn!("mock browser launch refused");
            return Err(SanarError::BrowserLaunch {
                message: String::from("mock launch failure"),
            });
        }
        Ok(Box::new(self.driver.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(10);

    fn driver() -> MockDriver {
        let d = MockDriver::new();
        d.add_element(MockElement::new("#go", "button").text("Go").alias("button:text-is(\"Go\")"));
        d.add_element(MockElement::new("#terms", "input").attr("type", "checkbox"));
        d.add_element(
            MockElement::new("#country", "select")
                .option("Spain", "es")
                .option("France", "fr"),
        );
        d
    }

    mod deadline_tests {
        use super::*;

        #[test]
        fn test_zero_timeout_has_passed() {
            assert!(Deadline::after(Duration::ZERO).passed());
        }

        #[test]
        fn test_overflowing_timeout_never_passes() {
            let deadline = Deadline::after(Duration::MAX);
            assert!(!deadline.passed());
            assert!(!Deadline::after(Duration::from_millis(u64::MAX)).passed());
        }
    }

    mod mock_driver_tests {
        use super::*;

        #[tokio::test]
        async fn test_navigate_and_history() {
            let mut d = driver();
            d.navigate("https://example.com", T).await.unwrap();
            assert_eq!(d.current_url().await.unwrap(), "https://example.com");
            assert!(d.was_called("navigate"));
        }

        #[tokio::test]
        async fn test_missing_element_times_out() {
            let d = driver();
            let err = d.click("#nope", T).await.unwrap_err();
            assert!(matches!(err, SanarError::Timeout { .. }));
            assert!(err.is_healable());
        }

        #[tokio::test]
        async fn test_not_actionable_and_detached() {
            let d = MockDriver::new();
            d.add_element(MockElement::new("#covered", "button").not_actionable());
            d.add_element(MockElement::new("#gone", "button").detached());
            assert!(matches!(
                d.click("#covered", T).await.unwrap_err(),
                SanarError::NotActionable { .. }
            ));
            assert!(matches!(
                d.click("#gone", T).await.unwrap_err(),
                SanarError::Detached { .. }
            ));
        }

        #[tokio::test]
        async fn test_type_check_select() {
            let d = driver();
            d.type_text("#country", "x", T).await.unwrap();
            d.set_checked("#terms", true, T).await.unwrap();
            assert!(d.element_state("#terms").unwrap().checked);
            d.select_option("#country", &SelectOption::Label("France".into()), T)
                .await
                .unwrap();
            assert_eq!(
                d.element_state("#country").unwrap().attributes["value"],
                "fr"
            );
            d.select_option("#country", &SelectOption::Index(0), T).await.unwrap();
            assert_eq!(
                d.element_state("#country").unwrap().attributes["value"],
                "es"
            );
            assert!(d
                .select_option("#country", &SelectOption::Value("de".into()), T)
                .await
                .is_err());
        }

        #[tokio::test]
        async fn test_count_and_alias() {
            let d = driver();
            assert_eq!(d.count("#go").await.unwrap(), 1);
            assert_eq!(d.count("button:text-is(\"Go\")").await.unwrap(), 1);
            assert_eq!(d.count(".missing").await.unwrap(), 0);
        }

        #[tokio::test]
        async fn test_wait_for_selector_states() {
            let d = driver();
            d.wait_for_selector("#go", WaitState::Visible, T).await.unwrap();
            d.wait_for_selector("#nope", WaitState::Detached, T).await.unwrap();
            d.wait_for_selector("#nope", WaitState::Hidden, T).await.unwrap();
            assert!(d.wait_for_selector("#nope", WaitState::Attached, T).await.is_err());
        }

        #[tokio::test]
        async fn test_clones_share_state() {
            let d = driver();
            let mut owned = d.clone();
            owned.close().await.unwrap();
            assert!(d.is_closed());
        }
    }

    mod capture_tests {
        use super::*;
        use serde_json::json;

        #[tokio::test]
        async fn test_blank_page_skips_script() {
            let d = MockDriver::new();
            let state = capture_dom_state(&d).await.unwrap();
            assert!(state.selector_map().is_empty());
            assert!(!d.was_called("dom_snapshot"));
        }

        #[tokio::test]
        async fn test_snapshot_failure_is_dom_build_error() {
            let mut d = MockDriver::new();
            d.navigate("https://example.com", T).await.unwrap();
            let err = capture_dom_state(&d).await.unwrap_err();
            assert!(matches!(err, SanarError::DomBuild { .. }));
        }

        #[tokio::test]
        async fn test_capture_builds_tree() {
            let mut d = MockDriver::new();
            d.navigate("https://example.com", T).await.unwrap();
            d.set_dom_snapshot(json!({
                "rootId": "0",
                "map": {"0": {"tagName": "body", "children": ["1"]},
                        "1": {"tagName": "a", "highlightIndex": 0}}
            }));
            let state = capture_dom_state(&d).await.unwrap();
            assert_eq!(state.selector_map().len(), 1);
        }
    }

    #[test]
    fn test_console_tail_keeps_last_problems() {
        let messages: Vec<ConsoleMessage> = (0..8)
            .map(|i| ConsoleMessage::new(if i % 2 == 0 { "error" } else { "log" }, format!("m{i}")))
            .chain([ConsoleMessage::new("warning", "w")])
            .collect();
        let tail = console_tail(&messages, 5);
        let texts: Vec<&str> = tail.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m0", "m2", "m4", "m6", "w"]);
        let tail = console_tail(&messages, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].text, "w");
    }

    #[test]
    fn test_wait_state_and_load_state_names() {
        assert_eq!(LoadState::NetworkIdle.to_string(), "networkidle");
        let parsed: LoadState = serde_json::from_str("\"domcontentloaded\"").unwrap();
        assert_eq!(parsed, LoadState::DomContentLoaded);
        let hidden = ElementState::default();
        assert!(WaitState::Hidden.is_satisfied_by(Some(&hidden)));
        assert!(!WaitState::Visible.is_satisfied_by(None));
    }

    #[tokio::test]
    async fn test_failing_factory() {
        let factory = MockDriverFactory::new(MockDriver::new()).failing();
        let err = factory.launch(&DriverConfig::default()).await.err().unwrap();
        assert!(matches!(err, SanarError::BrowserLaunch { .. }));
        assert_eq!(factory.launches().len(), 1);
    }
}
