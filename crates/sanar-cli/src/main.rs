//! Sanador: replay recorded browser tests with selector healing
//!
//! ## Usage
//!
//! ```bash
//! sanador run tests/login.json                 # Replay once
//! sanador run tests/login.json --heal soft     # Repair broken selectors
//! sanador -v run tests/login.json -o json      # JSON result, engine logs
//! ```

use clap::Parser;
use sanador::{handlers, Cli, CliConfig, CliResult, Commands, LogFormat, Reporter, Verbosity};
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_tracing(&config);

    let reporter = Reporter::new(config.color.should_color(), config.verbosity.is_quiet());
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Run(args) => runtime
            .block_on(handlers::run(&args, &reporter))
            .map(|_| ()),
        Commands::Inspect(args) => runtime.block_on(handlers::inspect(&args, &reporter)),
        Commands::Baseline(args) => runtime
            .block_on(handlers::baseline(&args, &reporter))
            .map(|_| ()),
        Commands::Validate(args) => handlers::validate(&args, &reporter).map(|_| ()),
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(cli.color.clone().into())
        .with_log_format(cli.log_format)
}

/// `RUST_LOG` wins; otherwise the filter follows `-v`/`-q`.
fn init_tracing(config: &CliConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.verbosity.filter_directive()));
    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.log_format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(config.verbosity.is_debug())
                    .with_ansi(config.color.should_color()),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("warning: could not install log subscriber: {e}");
    }
}
