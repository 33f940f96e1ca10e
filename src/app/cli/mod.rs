//! CLI argument parsing, configuration discovery and output formatting

pub mod args;
pub mod config;
pub mod display;
