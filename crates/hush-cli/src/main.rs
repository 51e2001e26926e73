//! hush CLI entry point

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hush_cli::cli::formatter_for;
use hush_cli::{Cli, Config, ExitCode};
use hush_core::{CoreError, SignerError};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if cli.config.is_none() {
        if let Err(e) = Config::create_default_if_missing() {
            eprintln!("Warning: Could not create default config: {e}");
        }
    }

    let config = match Config::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Config error: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };
    let config = config.with_overrides(&cli.overrides());

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let formatter = formatter_for(&config);
    match cli.execute_with_config(config).await {
        Ok(code) => code.to_exit_code(),
        Err(e) => {
            let code = ExitCode::from_error(&e);
            if !is_silent(&e) {
                let out = formatter.format_error_with_code(&format!("{e:#}"), code);
                if !out.is_empty() {
                    eprintln!("{out}");
                }
            }
            code.to_exit_code()
        }
    }
}

fn is_silent(err: &anyhow::Error) -> bool {
    err.downcast_ref::<CoreError>().is_some_and(CoreError::is_silent)
        || err.downcast_ref::<SignerError>().is_some_and(SignerError::is_cancelled)
}
