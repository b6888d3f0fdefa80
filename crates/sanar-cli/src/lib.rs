//! Sanador CLI library
//!
//! Command-line front-end for the Sanar replay engine.
//!
//! ## Usage
//!
//! ```bash
//! sanador run tests/login.json --heal soft    # Replay, repairing selectors
//! sanador inspect https://example.com         # Show what the oracle sees
//! sanador baseline https://example.com --id home
//! sanador validate tests/login.json
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
mod error;
pub mod handlers;
mod output;

pub use commands::{
    BaselineArgs, Cli, ColorArg, Commands, HealArg, InspectArgs, OracleArgs, PurposeArg,
    RunArgs, SessionArgs, ValidateArgs,
};
pub use config::{CliConfig, ColorChoice, LogFormat, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{render_inspect_text, render_run_text, OutputFormat, Reporter};
