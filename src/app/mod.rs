//! Command-line application

pub mod cli;
pub mod commands;
pub mod startup;
