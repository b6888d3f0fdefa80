//! Command handlers

use crate::commands::{BaselineArgs, InspectArgs, RunArgs, SessionArgs, ValidateArgs};
use crate::error::{CliError, CliResult};
use crate::output::{render_inspect_text, Reporter};
use sanar::{
    capture_dom_state, dom, BaselineMetadata, BaselineStore, BrowserDriver, ContextPurpose,
    DriverFactory, EngineConfig, Oracle, OracleConfig, ReplayEngine, RunResult, StepAction,
    TestCase, Viewport,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Engine config from the optional file plus session flags
///
/// # Errors
///
/// Unreadable or invalid config file.
pub fn session_config(session: &SessionArgs) -> CliResult<EngineConfig> {
    let mut config = match &session.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::new(),
    };
    if session.headed {
        config = config.with_headless(false);
    }
    if let Some((width, height)) = session.viewport {
        config = config.with_viewport(width, height);
    }
    Ok(config)
}

/// Engine config for `run`: file values, then flags and environment
///
/// # Errors
///
/// Unreadable config file, or a combination that fails validation.
pub fn run_config(args: &RunArgs) -> CliResult<EngineConfig> {
    let mut config = session_config(&args.session)?;
    if let Some(mode) = args.heal {
        config = config.with_healing(mode.into());
    }
    if let Some(retries) = args.retries {
        if retries == 0 {
            return Err(CliError::invalid_argument("--retries must be at least 1"));
        }
        config = config.with_retries(retries);
    }
    if let Some(dir) = &args.baseline_dir {
        config = config.with_baseline_dir(dir.clone());
    }
    if let Some(dir) = &args.output_dir {
        config = config.with_output_dir(dir.clone());
    }
    if let Some(recorder) = &args.recorder {
        config = config.with_recorder_command(recorder.clone());
    }
    let oracle = args.oracle.apply(config.oracle.clone());
    config = config.with_oracle(oracle);
    config.validate()?;
    Ok(config)
}

/// Throttled oracle client, or `None` when no endpoint is set
///
/// # Errors
///
/// Client construction failure.
#[cfg(feature = "llm")]
pub fn build_oracle(config: &OracleConfig) -> CliResult<Option<Arc<dyn Oracle>>> {
    use sanar::{HttpOracle, RateGate, Throttled};

    if !config.is_configured() {
        debug!("no oracle endpoint configured");
        return Ok(None);
    }
    let client = HttpOracle::from_config(config)
        .map_err(|e| CliError::config(format!("oracle: {e}")))?;
    tracing::info!(base_url = client.base_url(), model = client.model(), "oracle configured");
    let gate = Arc::new(RateGate::new(config.min_interval()));
    Ok(Some(Arc::new(Throttled::new(client, gate))))
}

/// Throttled oracle client, or `None` when no endpoint is set
///
/// # Errors
///
/// Never; built without the `llm` feature.
#[cfg(not(feature = "llm"))]
pub fn build_oracle(config: &OracleConfig) -> CliResult<Option<Arc<dyn Oracle>>> {
    if config.is_configured() {
        warn!("oracle endpoint ignored: built without the llm feature");
    }
    Ok(None)
}

/// Factory for real browser sessions
///
/// # Errors
///
/// Built without the `browser` feature.
#[cfg(feature = "browser")]
pub fn driver_factory() -> CliResult<Arc<dyn DriverFactory>> {
    Ok(Arc::new(sanar::ChromiumFactory))
}

/// Factory for real browser sessions
///
/// # Errors
///
/// Built without the `browser` feature.
#[cfg(not(feature = "browser"))]
pub fn driver_factory() -> CliResult<Arc<dyn DriverFactory>> {
    Err(CliError::config(
        "browser support not enabled. Rebuild with --features browser",
    ))
}

/// Replay one test and print its result
///
/// # Errors
///
/// Setup problems, or [`CliError::TestExecution`] when the run did not pass.
pub async fn run(args: &RunArgs, reporter: &Reporter) -> CliResult<RunResult> {
    let config = run_config(args)?;
    let oracle = build_oracle(&config.oracle)?;
    if config.enable_healing && oracle.is_none() {
        warn!("healing enabled without an oracle; soft healing cannot propose selectors");
    }
    let factory = driver_factory()?;

    let mut engine = ReplayEngine::new(config, factory);
    if let Some(oracle) = oracle {
        engine = engine.with_oracle(oracle);
    }
    let result = engine.run_file(&args.test).await;
    reporter.run_result(&result, args.output)?;

    if result.passed() {
        Ok(result)
    } else {
        Err(CliError::test_execution(format!(
            "{}: {}",
            result.status, result.message
        )))
    }
}

fn session_viewport(config: &EngineConfig) -> Viewport {
    config.viewport.unwrap_or_default()
}

async fn open(
    factory: &dyn DriverFactory,
    config: &EngineConfig,
    url: &str,
) -> CliResult<Box<dyn BrowserDriver>> {
    let mut driver = factory
        .launch(&config.driver_config(session_viewport(config)))
        .await?;
    if let Err(e) = driver.navigate(url, config.navigation_timeout()).await {
        let _ = driver.close().await;
        return Err(e.into());
    }
    Ok(driver)
}

/// Print the outline and selector table for a live page
///
/// # Errors
///
/// Launch, navigation, or snapshot failure.
pub async fn inspect(args: &InspectArgs, reporter: &Reporter) -> CliResult<()> {
    let config = session_config(&args.session)?;
    let factory = driver_factory()?;
    inspect_with(factory.as_ref(), &config, args, reporter).await
}

/// [`inspect`] against a given factory
///
/// # Errors
///
/// Launch, navigation, or snapshot failure.
pub async fn inspect_with(
    factory: &dyn DriverFactory,
    config: &EngineConfig,
    args: &InspectArgs,
    reporter: &Reporter,
) -> CliResult<()> {
    let mut driver = open(factory, config, &args.url).await?;
    let state = capture_dom_state(driver.as_ref()).await;
    let _ = driver.close().await;
    let state = state?;

    let purpose = ContextPurpose::from(args.purpose);
    let context = dom::serialize(state.tree(), purpose);
    let selectors = state.selector_map_entries();
    debug!(
        interactive = selectors.len(),
        truncated = context.truncated,
        "page inspected"
    );

    if args.json {
        let value = serde_json::json!({
            "url": args.url,
            "purpose": purpose,
            "context": context.text,
            "truncated": context.truncated,
            "selector_map": selectors,
        });
        reporter.raw(&serde_json::to_string_pretty(&value)?);
    } else {
        reporter.raw(&render_inspect_text(&context, &selectors));
    }
    Ok(())
}

/// Capture a baseline image with its metadata
///
/// # Errors
///
/// Empty id, launch, navigation, screenshot, or write failure.
pub async fn baseline(args: &BaselineArgs, reporter: &Reporter) -> CliResult<PathBuf> {
    let config = session_config(&args.session)?;
    let factory = driver_factory()?;
    baseline_with(factory.as_ref(), &config, args, reporter).await
}

/// [`baseline`] against a given factory
///
/// # Errors
///
/// Empty id, launch, navigation, screenshot, or write failure.
pub async fn baseline_with(
    factory: &dyn DriverFactory,
    config: &EngineConfig,
    args: &BaselineArgs,
    reporter: &Reporter,
) -> CliResult<PathBuf> {
    let id = args.id.trim();
    if id.is_empty() || id.contains(['/', '\\']) {
        return Err(CliError::invalid_argument(format!(
            "baseline id '{}' must be a plain name",
            args.id
        )));
    }
    let store = BaselineStore::new(
        args.dir
            .clone()
            .unwrap_or_else(|| config.baseline_dir.clone()),
    );
    if store.exists(id) {
        warn!(baseline_id = id, "overwriting existing baseline");
    }

    let mut driver = open(factory, config, &args.url).await?;
    let captured = async {
        let png = driver.screenshot(args.selector.as_deref()).await?;
        let url = driver.current_url().await.ok();
        Ok::<_, sanar::SanarError>((png, url))
    }
    .await;
    let _ = driver.close().await;
    let (png, url) = captured?;

    let metadata = BaselineMetadata {
        url_captured: url.or_else(|| Some(args.url.clone())),
        selector_captured: args.selector.clone(),
        viewport_size: Some(session_viewport(config)),
        ..BaselineMetadata::default()
    };
    let path = store.save(id, &png, metadata)?;
    reporter.success(&format!("baseline '{id}' saved to {}", path.display()));
    Ok(path)
}

/// Load a test file and type-check every step
///
/// # Errors
///
/// Missing or malformed file, or a step with bad parameters.
pub fn validate(args: &ValidateArgs, reporter: &Reporter) -> CliResult<TestCase> {
    let test = TestCase::load(&args.test)?;
    let mut seen = std::collections::BTreeSet::new();
    for step in &test.steps {
        if !seen.insert(step.step_id) {
            return Err(CliError::invalid_argument(format!(
                "duplicate step_id {} in {}",
                step.step_id,
                args.test.display()
            )));
        }
        StepAction::from_step(step)?;
    }
    reporter.success(&format!(
        "{}: {} step(s) valid",
        test.test_name,
        test.steps.len()
    ));
    Ok(test)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::commands::{OracleArgs, PurposeArg};
    use crate::output::OutputFormat;
    use sanar::{HealingMode, MockDriver, MockDriverFactory, MockElement};
    use tempfile::TempDir;

    fn quiet() -> Reporter {
        Reporter::new(false, true)
    }

    fn run_args(test: PathBuf) -> RunArgs {
        RunArgs {
            test,
            heal: None,
            retries: None,
            output: OutputFormat::Json,
            baseline_dir: None,
            output_dir: None,
            recorder: None,
            session: SessionArgs::default(),
            oracle: OracleArgs::default(),
        }
    }

    fn png() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(4, 3, image::Rgba([200, 10, 10, 255]));
        sanar::visual::encode_png(&img).unwrap()
    }

    mod config_tests {
        use super::*;
        use crate::commands::HealArg;

        #[test]
        fn test_run_config_overrides() {
            let mut args = run_args(PathBuf::from("t.json"));
            args.heal = Some(HealArg::Hard);
            args.retries = Some(3);
            args.session.headed = true;
            args.session.viewport = Some((800, 600));
            let config = run_config(&args).unwrap();
            assert!(config.enable_healing);
            assert_eq!(config.healing_mode, HealingMode::Hard);
            assert_eq!(config.healing_retries_per_step, 3);
            assert!(!config.headless);
            assert_eq!(config.viewport, Some(Viewport { width: 800, height: 600 }));
        }

        #[test]
        fn test_zero_retries_rejected() {
            let mut args = run_args(PathBuf::from("t.json"));
            args.retries = Some(0);
            assert!(matches!(
                run_config(&args),
                Err(CliError::InvalidArgument { .. })
            ));
        }

        #[test]
        fn test_config_file_then_flags() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("sanar.yaml");
            std::fs::write(&path, "healing_retries_per_step: 2\nheadless: true\n").unwrap();
            let mut args = run_args(PathBuf::from("t.json"));
            args.session.config = Some(path);
            args.session.headed = true;
            let config = run_config(&args).unwrap();
            assert_eq!(config.healing_retries_per_step, 2);
            assert!(!config.headless);
        }

        #[test]
        fn test_missing_config_file() {
            let mut args = run_args(PathBuf::from("t.json"));
            args.session.config = Some(PathBuf::from("/nonexistent/sanar.yaml"));
            assert!(matches!(run_config(&args), Err(CliError::Sanar(_))));
        }

        #[test]
        fn test_unconfigured_oracle_is_none() {
            assert!(build_oracle(&OracleConfig::default()).unwrap().is_none());
        }
    }

    mod validate_tests {
        use super::*;

        fn write(dir: &TempDir, body: &str) -> PathBuf {
            let path = dir.path().join("case.json");
            std::fs::write(&path, body).unwrap();
            path
        }

        #[test]
        fn test_valid_file() {
            let dir = TempDir::new().unwrap();
            let path = write(
                &dir,
                r##"{"test_name":"login","steps":[
                    {"step_id":1,"action":"navigate","parameters":{"url":"https://example.com"}},
                    {"step_id":2,"action":"click","selector":"#go"}
                ]}"##,
            );
            let test = validate(&ValidateArgs { test: path }, &quiet()).unwrap();
            assert_eq!(test.steps.len(), 2);
        }

        #[test]
        fn test_missing_parameter() {
            let dir = TempDir::new().unwrap();
            let path = write(
                &dir,
                r#"{"test_name":"t","steps":[{"step_id":1,"action":"navigate","parameters":{}}]}"#,
            );
            assert!(validate(&ValidateArgs { test: path }, &quiet()).is_err());
        }

        #[test]
        fn test_duplicate_step_ids() {
            let dir = TempDir::new().unwrap();
            let path = write(
                &dir,
                r##"{"test_name":"t","steps":[
                    {"step_id":1,"action":"click","selector":"#a"},
                    {"step_id":1,"action":"click","selector":"#b"}
                ]}"##,
            );
            assert!(matches!(
                validate(&ValidateArgs { test: path }, &quiet()),
                Err(CliError::InvalidArgument { .. })
            ));
        }
    }

    mod browser_tests {
        use super::*;

        fn page() -> MockDriver {
            let driver = MockDriver::new();
            driver.add_element(MockElement::new("#hero", "div").with_screenshot(png()));
            driver.set_screenshot(png());
            driver
        }

        #[tokio::test]
        async fn test_baseline_saved_with_metadata() {
            let dir = TempDir::new().unwrap();
            let factory = MockDriverFactory::new(page());
            let config = EngineConfig::new().with_baseline_dir(dir.path());
            let args = BaselineArgs {
                url: "https://example.com".into(),
                id: "hero".into(),
                selector: Some("#hero".into()),
                dir: None,
                session: SessionArgs::default(),
            };
            let path = baseline_with(&factory, &config, &args, &quiet()).await.unwrap();
            assert!(path.exists());
            let meta = BaselineStore::new(dir.path()).metadata("hero").unwrap();
            assert_eq!(meta.selector_captured.as_deref(), Some("#hero"));
            assert_eq!(meta.viewport_size, Some(Viewport::default()));
        }

        #[tokio::test]
        async fn test_baseline_rejects_path_id() {
            let factory = MockDriverFactory::new(page());
            let args = BaselineArgs {
                url: "https://example.com".into(),
                id: "../escape".into(),
                selector: None,
                dir: None,
                session: SessionArgs::default(),
            };
            let err = baseline_with(&factory, &EngineConfig::new(), &args, &quiet())
                .await
                .unwrap_err();
            assert!(matches!(err, CliError::InvalidArgument { .. }));
        }

        #[tokio::test]
        async fn test_inspect_closes_session() {
            let driver = page();
            let factory = MockDriverFactory::new(driver.clone());
            let args = InspectArgs {
                url: "about:blank".into(),
                purpose: PurposeArg::Action,
                json: true,
                session: SessionArgs::default(),
            };
            inspect_with(&factory, &EngineConfig::new(), &args, &quiet())
                .await
                .unwrap();
            assert!(driver.is_closed());
        }
    }
}
