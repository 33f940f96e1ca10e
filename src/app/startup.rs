//! Process startup: arguments, configuration, logging, then the command

use super::cli::args::Args;
use super::cli::config::{load_config, LogSettings};
use super::commands;
use crate::core::error_handling::{exit_code, log_error_with_context, ContextualError};
use crate::core::logging::init_logging;
use crate::core::styles::clap_styles;
use clap::{CommandFactory, FromArgMatches};

/// Parse arguments, load configuration, install logging and run the command
pub fn startup() {
    let args = parse_args();

    // Logging is not up yet, so configuration errors go straight to stderr
    let config = match load_config(args.config_file.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(exit_code(&e));
        }
    };

    let use_color = args.use_color(config.logging.color);
    colored::control::set_override(use_color);

    let logging = LogSettings::resolve(&args, &config.logging);
    if let Err(e) = init_logging(
        Some(&logging.level),
        logging.format.as_deref(),
        logging.file.as_deref(),
        use_color,
    ) {
        eprintln!("Error: failed to initialise logging: {}", e);
        std::process::exit(1);
    }
    log::debug!("Effective logging: {:?}", logging);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("FATAL: cannot start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    match runtime.block_on(commands::run(&args.command, &config, use_color)) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            log_error_with_context(&e, "Running command");
            if let Some(message) = e.user_message() {
                eprintln!("Error: {}", message);
            }
            std::process::exit(exit_code(&e));
        }
    }
}

/// Parse with help colours that follow `--color` / `--no-color` and the TTY
fn parse_args() -> Args {
    use std::io::IsTerminal;

    let raw: Vec<String> = std::env::args().collect();
    let color_hint = if raw.iter().any(|a| a == "--no-color") {
        false
    } else {
        raw.iter().any(|a| a == "--color") || std::io::stdout().is_terminal()
    };

    let matches = Args::command()
        .styles(clap_styles(color_hint))
        .get_matches_from(raw);
    Args::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
}
