//! Sanar: deterministic browser test replay with selector self-healing and
//! visual regression.
//!
//! Sanar (Spanish: "to heal") replays recorded UI tests step by step and
//! repairs them when the page drifts. A broken selector is handed to an
//! oracle together with a fresh screenshot and DOM outline; the proposal is
//! counted on the live page before it replaces the recorded one.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        SANAR Architecture                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  test.json ──► ReplayEngine ──► BrowserDriver (Chromium / Mock)  │
//! │                    │                    │                        │
//! │                    │ healable failure   │ snapshot               │
//! │                    ▼                    ▼                        │
//! │              SoftHealer ◄──── dom::build ──► dom::serialize      │
//! │                    │                                             │
//! │                    ▼                                             │
//! │                 Oracle ◄──── VisualComparator (stitched image)   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sanar::{EngineConfig, HealingMode, MockDriver, MockDriverFactory, ReplayEngine};
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let config = EngineConfig::new().with_healing(HealingMode::Soft);
//! let factory = Arc::new(MockDriverFactory::new(MockDriver::new()));
//! let engine = ReplayEngine::new(config, factory);
//! let result = engine.run_file("tests/login.json".as_ref()).await;
//! println!("{}: {}", result.status, result.message);
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

pub mod config;
pub mod dom;
pub mod driver;
pub mod engine;
pub mod healing;
pub mod oracle;
pub mod result;
pub mod run_result;
pub mod test_case;
pub mod visual;

/// Chromium over CDP
#[cfg(feature = "browser")]
pub mod chromium;

pub use config::{EngineConfig, HealingMode, OracleConfig};
pub use dom::{ContextPurpose, DomState, DomTree, SerializedContext};
pub use driver::{
    capture_dom_state, BrowserDriver, ConsoleMessage, DriverConfig, DriverFactory, ElementState,
    LoadState, MockDriver, MockDriverFactory, MockElement, NetworkRequest, ScrollDirection,
    SelectOption, Viewport, WaitState,
};
pub use engine::ReplayEngine;
pub use healing::{CommandRecorder, HealingAttempt, Recorder, SoftHealer, Validation};
pub use oracle::{MockOracle, Oracle, OracleError, RateGate, Throttled, Verdict};
pub use result::{ErrorClass, SanarError, SanarResult};
pub use run_result::{FailureContext, RunResult, RunStatus};
pub use test_case::{ActionKind, StepAction, TestCase, TestStep};
pub use visual::{BaselineMetadata, BaselineStore, VisualAssertionResult, VisualComparator};

#[cfg(feature = "browser")]
pub use chromium::{ChromiumDriver, ChromiumFactory};
#[cfg(feature = "llm")]
pub use oracle::HttpOracle;
