//! CLI command definitions using clap

use crate::config::LogFormat;
use crate::output::OutputFormat;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sanar::{ContextPurpose, HealingMode, OracleConfig};
use std::path::PathBuf;

/// Sanador: replay recorded browser tests, heal broken selectors, and
/// check pages against visual baselines
#[derive(Parser, Debug)]
#[command(name = "sanador")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Log format on stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a recorded test
    Run(RunArgs),

    /// Print the page outline and selector table the oracle would see
    Inspect(InspectArgs),

    /// Capture a visual baseline
    Baseline(BaselineArgs),

    /// Check a test file without launching a browser
    Validate(ValidateArgs),
}

/// Browser and config options shared by commands that open a page
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// Engine config file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Viewport as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_viewport)]
    pub viewport: Option<(u32, u32)>,
}

/// Oracle endpoint options, also read from the environment
#[derive(Args, Debug, Clone, Default)]
pub struct OracleArgs {
    /// Base URL of an OpenAI-compatible server
    #[arg(long, env = "SANAR_LLM_BASE_URL")]
    pub llm_base_url: Option<String>,

    /// Model name
    #[arg(long, env = "SANAR_LLM_MODEL")]
    pub llm_model: Option<String>,

    /// API key
    #[arg(long, env = "SANAR_LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,
}

impl OracleArgs {
    /// Overlay the flags onto `config`
    #[must_use]
    pub fn apply(&self, mut config: OracleConfig) -> OracleConfig {
        if let Some(url) = &self.llm_base_url {
            config.base_url = Some(url.clone());
        }
        if let Some(model) = &self.llm_model {
            config.model.clone_from(model);
        }
        if let Some(key) = &self.llm_api_key {
            config.api_key = Some(key.clone());
        }
        config
    }
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Test file (JSON)
    pub test: PathBuf,

    /// Enable healing in the given mode
    #[arg(long)]
    pub heal: Option<HealArg>,

    /// Oracle attempts per failing step
    #[arg(long)]
    pub retries: Option<u32>,

    /// Result format on stdout
    #[arg(short, long, default_value = "text")]
    pub output: OutputFormat,

    /// Directory for baselines
    #[arg(long)]
    pub baseline_dir: Option<PathBuf>,

    /// Directory for failure screenshots and re-recordings
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// External recorder for hard healing
    #[arg(long)]
    pub recorder: Option<String>,

    /// Browser options
    #[command(flatten)]
    pub session: SessionArgs,

    /// Oracle options
    #[command(flatten)]
    pub oracle: OracleArgs,
}

/// Arguments for the inspect command
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Page to open
    pub url: String,

    /// Which outline to render
    #[arg(short, long, default_value = "action")]
    pub purpose: PurposeArg,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,

    /// Browser options
    #[command(flatten)]
    pub session: SessionArgs,
}

/// Arguments for the baseline command
#[derive(Parser, Debug)]
pub struct BaselineArgs {
    /// Page to capture
    pub url: String,

    /// Baseline id
    #[arg(long)]
    pub id: String,

    /// Capture a single element instead of the full page
    #[arg(short, long)]
    pub selector: Option<String>,

    /// Directory for baselines
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Browser options
    #[command(flatten)]
    pub session: SessionArgs,
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Test file (JSON)
    pub test: PathBuf,
}

/// Healing mode flag
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealArg {
    /// Repair selectors in place
    Soft,
    /// Hand the test to the recorder
    Hard,
}

impl From<HealArg> for HealingMode {
    fn from(arg: HealArg) -> Self {
        match arg {
            HealArg::Soft => Self::Soft,
            HealArg::Hard => Self::Hard,
        }
    }
}

/// Outline purpose flag
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PurposeArg {
    /// Interactive elements plus nearby labels
    #[default]
    Action,
    /// Richer static text for yes/no checks
    Verification,
}

impl From<PurposeArg> for ContextPurpose {
    fn from(arg: PurposeArg) -> Self {
        match arg {
            PurposeArg::Action => Self::Action,
            PurposeArg::Verification => Self::Verification,
        }
    }
}

/// Color argument for CLI
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

fn parse_viewport(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let width: u32 = w.trim().parse().map_err(|_| format!("bad width '{w}'"))?;
    let height: u32 = h.trim().parse().map_err(|_| format!("bad height '{h}'"))?;
    if width == 0 || height == 0 {
        return Err("viewport must be non-zero".to_string());
    }
    Ok((width, height))
}
