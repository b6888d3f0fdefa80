//! Chromium session over CDP (`browser` feature).
//!
//! Element work goes through a small in-page helper (`window.__sanar`)
//! that resolves CSS, `xpath=`, `:text-is("…")` and `>>` chains the same
//! way for every action. Waiting is done here, by polling the helper until
//! the element is actionable or the deadline passes.

use crate::dom::SNAPSHOT_SCRIPT;
use crate::driver::{
    BrowserDriver, ConsoleMessage, Deadline, DriverConfig, DriverFactory, ElementState, LoadState,
    NetworkRequest, ScrollDirection, SelectOption, WaitState,
};
use crate::result::{SanarError, SanarResult};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams, Viewport as ClipRect,
};
use chromiumoxide::page::Page as CdpPage;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const POLL: Duration = Duration::from_millis(50);
const NETWORK_IDLE: Duration = Duration::from_millis(500);

/// Installed once per document; resolves selectors and performs actions.
const HELPERS: &str = r#"window.__sanar = window.__sanar || (() => {
  const textOf = el => (el.innerText || el.textContent || '').replace(/\s+/g, ' ').trim();
  const queryPart = (roots, part) => {
    const m = part.match(/^(.*?):text-is\((["'])([\s\S]*)\2\)$/);
    const css = m ? (m[1].trim() || '*') : part;
    const out = [];
    for (const root of roots) {
      for (const el of root.querySelectorAll(css)) {
        if (!m || textOf(el) === m[3]) out.push(el);
      }
    }
    return out;
  };
  const resolveAll = sel => {
    if (sel.startsWith('xpath=')) {
      const snap = document.evaluate(sel.slice(6), document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
      const out = [];
      for (let i = 0; i < snap.snapshotLength; i++) out.push(snap.snapshotItem(i));
      return out;
    }
    let roots = [document];
    for (const part of sel.split('>>').map(p => p.trim()).filter(Boolean)) roots = queryPart(roots, part);
    return roots;
  };
  const first = sel => resolveAll(sel)[0] || null;
  const visible = el => {
    if (!el.isConnected) return false;
    const style = getComputedStyle(el);
    if (style.visibility === 'hidden' || style.display === 'none' || Number(style.opacity) === 0) return false;
    const r = el.getBoundingClientRect();
    return r.width > 0 && r.height > 0;
  };
  const state = sel => {
    const el = first(sel);
    if (!el) return null;
    const attributes = {};
    for (const a of el.attributes) attributes[a.name] = a.value;
    if ('value' in el && typeof el.value === 'string') attributes.value = el.value;
    return { tag_name: el.tagName.toLowerCase(), text: textOf(el), visible: visible(el),
             enabled: !el.disabled, checked: !!el.checked, attributes };
  };
  const actionable = sel => {
    const el = first(sel);
    if (!el) return 'missing';
    if (!visible(el)) return 'hidden';
    if (el.disabled) return 'disabled';
    return 'ok';
  };
  const act = (sel, f) => {
    const el = first(sel);
    if (!el || !el.isConnected) return 'detached';
    el.scrollIntoView({ block: 'center', inline: 'center' });
    return f(el);
  };
  const fire = (el, ...types) => types.forEach(t => el.dispatchEvent(new Event(t, { bubbles: true })));
  return {
    count: sel => resolveAll(sel).length,
    state, actionable,
    click: sel => act(sel, el => { el.click(); return 'ok'; }),
    fill: (sel, text) => act(sel, el => { el.focus(); el.value = text; fire(el, 'input', 'change'); return 'ok'; }),
    setChecked: (sel, on) => act(sel, el => { if (!!el.checked !== on) el.click(); return 'ok'; }),
    select: (sel, kind, value) => act(sel, el => {
      const opts = Array.from(el.options || []);
      const opt = kind === 'label' ? opts.find(o => o.label.trim() === value || o.text.trim() === value)
                : kind === 'value' ? opts.find(o => o.value === value)
                : opts[Number(value)];
      if (!opt) return 'no-option';
      el.value = opt.value;
      fire(el, 'input', 'change');
      return 'ok';
    }),
    rect: sel => {
      const el = first(sel);
      if (!el) return null;
      el.scrollIntoView({ block: 'center' });
      const r = el.getBoundingClientRect();
      return { x: r.left + window.scrollX, y: r.top + window.scrollY, width: r.width, height: r.height };
    },
  };
})();
"#;

/// Console capture, installed after every navigation.
const CONSOLE_HOOK: &str = r#"(() => {
  if (window.__sanarConsole) return true;
  window.__sanarConsole = [];
  const push = (type, text) => { try { window.__sanarConsole.push({ type, text }); } catch (e) {} };
  for (const level of ['log', 'info', 'warn', 'error', 'debug']) {
    const orig = console[level];
    console[level] = function (...args) {
      push(level === 'warn' ? 'warning' : level, args.map(a => {
        if (typeof a === 'string') return a;
        try { return JSON.stringify(a); } catch (e) { return String(a); }
      }).join(' '));
      return orig.apply(console, args);
    };
  }
  window.addEventListener('error', e => push('error', String(e.message)));
  window.addEventListener('unhandledrejection', e => push('error', 'Unhandled rejection: ' + String(e.reason)));
  return true;
})()"#;

const CONSOLE_DRAIN: &str = r#"(() => {
  const out = window.__sanarConsole || [];
  if (window.__sanarConsole) window.__sanarConsole = [];
  return out;
})()"#;

const NETWORK_DRAIN: &str = r#"(() => {
  const entries = performance.getEntries().filter(e => e.entryType === 'navigation' || e.entryType === 'resource');
  const seen = window.__sanarSeen || 0;
  window.__sanarSeen = entries.length;
  return entries.slice(seen).map(e => ({
    url: e.name,
    method: 'GET',
    status: e.responseStatus || null,
    resource_type: e.entryType === 'navigation' ? 'document' : (e.initiatorType || 'other'),
  }));
})()"#;

#[derive(Debug, Deserialize)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

fn cdp_error(context: &str, e: impl std::fmt::Display) -> SanarError {
    SanarError::browser(format!("{context}: {e}"))
}

fn js(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| String::from("\"\""))
}

/// Launches one Chromium per run
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumFactory;

#[async_trait]
impl DriverFactory for ChromiumFactory {
    async fn launch(&self, config: &DriverConfig) -> SanarResult<Box<dyn BrowserDriver>> {
        Ok(Box::new(ChromiumDriver::launch(config).await?))
    }
}

/// Chromium session driven over CDP
#[derive(Debug)]
pub struct ChromiumDriver {
    browser: Mutex<CdpBrowser>,
    page: CdpPage,
    handler: tokio::task::JoinHandle<()>,
    console: StdMutex<Vec<ConsoleMessage>>,
    network: StdMutex<Vec<NetworkRequest>>,
    closed: bool,
}

impl ChromiumDriver {
    /// Launch Chromium and open a blank page sized to the configured viewport.
    ///
    /// # Errors
    ///
    /// [`SanarError::BrowserLaunch`] if Chromium cannot start.
    pub async fn launch(config: &DriverConfig) -> SanarResult<Self> {
        let launch_error = |e: &dyn std::fmt::Display| SanarError::BrowserLaunch {
            message: e.to_string(),
        };
        let mut builder = CdpConfig::builder().window_size(config.viewport.width, config.viewport.height);
        if !config.headless {
            builder = builder.with_head();
        }
        if config.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = config.executable_path {
            builder = builder.chrome_executable(path);
        }
        let cdp_config = builder.build().map_err(|e| launch_error(&e))?;

        let (browser, mut handler) = CdpBrowser::launch(cdp_config).await.map_err(|e| launch_error(&e))?;
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(|e| launch_error(&e))?;
        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(config.viewport.width),
            i64::from(config.viewport.height),
            1.0,
            false,
        ))
        .await
        .map_err(|e| launch_error(&e))?;
        info!(
            headless = config.headless,
            width = config.viewport.width,
            height = config.viewport.height,
            "chromium session started"
        );

        Ok(Self {
            browser: Mutex::new(browser),
            page,
            handler: handle,
            console: StdMutex::new(Vec::new()),
            network: StdMutex::new(Vec::new()),
            closed: false,
        })
    }

    async fn eval<T: DeserializeOwned>(&self, expression: String) -> SanarResult<T> {
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(|e| cdp_error("script failed", e))?;
        result.into_value().map_err(|e| cdp_error("unexpected script result", e))
    }

    async fn helper<T: DeserializeOwned>(&self, call: &str) -> SanarResult<T> {
        self.eval(format!("{HELPERS}\nwindow.__sanar.{call}")).await
    }

    /// Poll until the first match is visible and enabled
    async fn wait_actionable(&self, selector: &str, timeout: Duration) -> SanarResult<()> {
        let deadline = Deadline::after(timeout);
        loop {
            let status: String = self.helper(&format!("actionable({})", js(selector))).await?;
            if status == "ok" {
                return Ok(());
            }
            if deadline.passed() {
                return Err(match status.as_str() {
                    "missing" => SanarError::Timeout {
                        what: selector.to_string(),
                        ms: timeout.as_millis() as u64,
                    },
                    other => SanarError::NotActionable {
                        selector: selector.to_string(),
                        message: format!("element is {other}"),
                    },
                });
            }
            tokio::time::sleep(POLL).await;
        }
    }

    /// Wait, then run one helper action and map its status
    async fn act(&self, selector: &str, call: String, timeout: Duration) -> SanarResult<()> {
        self.wait_actionable(selector, timeout).await?;
        let status: String = self.helper(&call).await?;
        match status.as_str() {
            "ok" => Ok(()),
            "detached" => Err(SanarError::Detached {
                selector: selector.to_string(),
            }),
            other => Err(SanarError::NotActionable {
                selector: selector.to_string(),
                message: other.to_string(),
            }),
        }
    }

    async fn ready_state(&self) -> SanarResult<String> {
        self.eval(String::from("document.readyState")).await
    }

    async fn drain_console(&self) {
        match self.eval::<Vec<ConsoleMessage>>(String::from(CONSOLE_DRAIN)).await {
            Ok(batch) => {
                if let Ok(mut console) = self.console.lock() {
                    console.extend(batch);
                }
            }
            Err(e) => debug!(error = %e, "console drain skipped"),
        }
    }

    async fn drain_network(&self) {
        match self.eval::<Vec<NetworkRequest>>(String::from(NETWORK_DRAIN)).await {
            Ok(batch) => {
                if let Ok(mut network) = self.network.lock() {
                    network.extend(batch);
                }
            }
            Err(e) => debug!(error = %e, "network drain skipped"),
        }
    }

    async fn capture(&self, clip: Option<ClipRect>) -> SanarResult<Vec<u8>> {
        let mut params = CaptureScreenshotParams::builder().format(CaptureScreenshotFormat::Png);
        if let Some(clip) = clip {
            params = params.clip(clip).capture_beyond_viewport(true);
        }
        let shot = self
            .page
            .execute(params.build())
            .await
            .map_err(|e| cdp_error("screenshot failed", e))?;

        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&shot.data)
            .map_err(|e| cdp_error("screenshot decode failed", e))
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> SanarResult<()> {
        self.drain_console().await;
        self.drain_network().await;
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Err(_) => {
                return Err(SanarError::Timeout {
                    what: format!("navigation to {url}"),
                    ms: timeout.as_millis() as u64,
                })
            }
            Ok(Err(e)) => {
                return Err(SanarError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
            Ok(Ok(_)) => {}
        }
        self.wait_for_load_state(LoadState::Load, timeout).await?;
        if let Err(e) = self.eval::<bool>(String::from(CONSOLE_HOOK)).await {
            warn!(error = %e, "console hook not installed");
        }
        Ok(())
    }

    async fn click(&self, selector: &str, timeout: Duration) -> SanarResult<()> {
        self.act(selector, format!("click({})", js(selector)), timeout).await
    }

    async fn type_text(&self, selector: &str, text: &str, timeout: Duration) -> SanarResult<()> {
        self.act(selector, format!("fill({}, {})", js(selector), js(text)), timeout)
            .await
    }

    async fn set_checked(&self, selector: &str, checked: bool, timeout: Duration) -> SanarResult<()> {
        self.act(selector, format!("setChecked({}, {checked})", js(selector)), timeout)
            .await
    }

    async fn select_option(
        &self,
        selector: &str,
        option: &SelectOption,
        timeout: Duration,
    ) -> SanarResult<()> {
        let (kind, value) = match option {
            SelectOption::Label(l) => ("label", l.clone()),
            SelectOption::Value(v) => ("value", v.clone()),
            SelectOption::Index(i) => ("index", i.to_string()),
        };
        let call = format!("select({}, {}, {})", js(selector), js(kind), js(&value));
        self.act(selector, call, timeout).await
    }

    async fn scroll(&self, direction: ScrollDirection) -> SanarResult<()> {
        let sign = match direction {
            ScrollDirection::Up => "-",
            ScrollDirection::Down => "",
        };
        self.eval::<serde_json::Value>(format!(
            "window.scrollBy(0, {sign}window.innerHeight); true"
        ))
        .await
        .map(|_| ())
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> SanarResult<()> {
        let deadline = Deadline::after(timeout);
        let mut quiet_since: Option<(Instant, usize)> = None;
        loop {
            let ready = self.ready_state().await?;
            let reached = match state {
                LoadState::DomContentLoaded => ready == "interactive" || ready == "complete",
                LoadState::Load => ready == "complete",
                LoadState::NetworkIdle if ready == "complete" => {
                    let entries: usize = self
                        .eval(String::from("performance.getEntriesByType('resource').length"))
                        .await?;
                    match quiet_since {
                        Some((since, seen)) if seen == entries => since.elapsed() >= NETWORK_IDLE,
                        _ => {
                            quiet_since = Some((Instant::now(), entries));
                            false
                        }
                    }
                }
                LoadState::NetworkIdle => false,
            };
            if reached {
                return Ok(());
            }
            if deadline.passed() {
                return Err(SanarError::Timeout {
                    what: format!("load state {state}"),
                    ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> SanarResult<()> {
        let deadline = Deadline::after(timeout);
        loop {
            let current = self.query_element(selector).await?;
            if state.is_satisfied_by(current.as_ref()) {
                return Ok(());
            }
            if deadline.passed() {
                return Err(SanarError::Timeout {
                    what: format!("{selector} to be {state}"),
                    ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn count(&self, selector: &str) -> SanarResult<usize> {
        self.helper(&format!("count({})", js(selector))).await
    }

    async fn query_element(&self, selector: &str) -> SanarResult<Option<ElementState>> {
        self.helper(&format!("state({})", js(selector))).await
    }

    async fn screenshot(&self, element: Option<&str>) -> SanarResult<Vec<u8>> {
        let Some(selector) = element else {
            return self.capture(None).await;
        };
        let rect: Option<Rect> = self.helper(&format!("rect({})", js(selector))).await?;
        let Some(rect) = rect else {
            return Err(SanarError::ElementNotFound {
                selector: selector.to_string(),
            });
        };
        self.capture(Some(ClipRect {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            scale: 1.0,
        }))
        .await
    }

    async fn current_url(&self) -> SanarResult<String> {
        let url = self.page.url().await.map_err(|e| cdp_error("url unavailable", e))?;
        Ok(url.unwrap_or_else(|| String::from("about:blank")))
    }

    async fn dom_snapshot(&self) -> SanarResult<serde_json::Value> {
        self.eval(String::from(SNAPSHOT_SCRIPT)).await
    }

    async fn console_messages(&self) -> SanarResult<Vec<ConsoleMessage>> {
        self.drain_console().await;
        Ok(self.console.lock().map(|c| c.clone()).unwrap_or_default())
    }

    async fn network_requests(&self) -> SanarResult<Vec<NetworkRequest>> {
        self.drain_network().await;
        Ok(self.network.lock().map(|n| n.clone()).unwrap_or_default())
    }

    async fn performance_timing(&self) -> SanarResult<Option<serde_json::Value>> {
        self.eval(String::from(
            "(() => { const t = window.performance && performance.timing; return t ? t.toJSON() : null; })()",
        ))
        .await
    }

    async fn close(&mut self) -> SanarResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await.map(|_| ());
        self.handler.abort();
        closed.map_err(|e| cdp_error("close failed", e))
    }
}
