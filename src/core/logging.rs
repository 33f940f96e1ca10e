//! Logging setup on top of flexi_logger
//!
//! The broker itself only talks to the `log` facade. This module installs the
//! process-wide backend for the binary and for anyone embedding the crate who
//! wants the same output shape.

use strum_macros::{AsRefStr, Display, EnumString};

// Dropping the handle stops file output, so it lives for the whole process
static LOGGER_HANDLE: std::sync::OnceLock<std::sync::Mutex<flexi_logger::LoggerHandle>> =
    std::sync::OnceLock::new();

/// Output shape for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum LogFormat {
    /// `timestamp LVL message`
    #[default]
    Text,
    /// `timestamp LVL message (broker/store.rs:42)`
    Ext,
    /// One compact JSON object per line
    Json,
}

/// Install the global logger.
///
/// `log_level` accepts any flexi_logger spec (`info`, `routemq::broker=debug`, ...).
/// Unknown formats fall back to `text`.
pub fn init_logging(
    log_level: Option<&str>,
    log_format: Option<&str>,
    log_file: Option<&str>,
    color_enabled: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    use flexi_logger::{FileSpec, Logger};

    let level_str = log_level.unwrap_or("info");
    let format = log_format
        .and_then(|f| f.parse::<LogFormat>().ok())
        .unwrap_or_default();

    let mut logger = Logger::try_with_str(level_str)?;

    logger = logger.format(formatter_for(format, color_enabled));

    if let Some(file_path) = log_file {
        let file_spec = FileSpec::try_from(std::path::Path::new(file_path))?;
        logger = logger.log_to_file(file_spec);
    }

    let handle = logger.start()?;
    let _ = LOGGER_HANDLE.set(std::sync::Mutex::new(handle));

    Ok(())
}

/// Map a `-v`/`-q` balance onto a level name
pub fn level_for_verbosity(verbosity: i8) -> &'static str {
    match verbosity {
        i8::MIN..=-2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn level_abbr(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "ERR",
        log::Level::Warn => "WRN",
        log::Level::Info => "INF",
        log::Level::Debug => "DBG",
        log::Level::Trace => "TRC",
    }
}

fn write_line(
    w: &mut dyn std::io::Write,
    now: &mut flexi_logger::DeferredNow,
    record: &log::Record,
    with_target: bool,
    color: bool,
) -> Result<(), std::io::Error> {
    use colored::Colorize;

    let stamp = now.format("%Y-%m-%d %H:%M:%S%.3f").to_string();
    let abbr = level_abbr(record.level());
    let target = with_target.then(|| format_target_as_path(record.target(), record.line()));

    if !color {
        write!(w, "{} {} {}", stamp, abbr, record.args())?;
        return match target {
            Some(target) => write!(w, " ({})", target),
            None => Ok(()),
        };
    }

    let level = match record.level() {
        log::Level::Error => abbr.red().bold(),
        log::Level::Warn => abbr.yellow(),
        log::Level::Info => abbr.green(),
        log::Level::Debug => abbr.blue(),
        log::Level::Trace => abbr.magenta(),
    };
    write!(w, "{} {} {}", stamp.dimmed(), level, record.args())?;
    match target {
        Some(target) => write!(w, " {}", format!("({})", target).dimmed()),
        None => Ok(()),
    }
}

type Formatter = fn(
    &mut dyn std::io::Write,
    &mut flexi_logger::DeferredNow,
    &log::Record,
) -> Result<(), std::io::Error>;

fn formatter_for(format: LogFormat, color: bool) -> Formatter {
    match (format, color) {
        (LogFormat::Json, _) => json_format,
        (LogFormat::Ext, true) => |w, now, record| write_line(w, now, record, true, true),
        (LogFormat::Ext, false) => |w, now, record| write_line(w, now, record, true, false),
        (LogFormat::Text, true) => |w, now, record| write_line(w, now, record, false, true),
        (LogFormat::Text, false) => |w, now, record| write_line(w, now, record, false, false),
    }
}

fn json_format(
    w: &mut dyn std::io::Write,
    now: &mut flexi_logger::DeferredNow,
    record: &log::Record,
) -> Result<(), std::io::Error> {
    let line = serde_json::json!({
        "timestamp": now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "level": level_abbr(record.level()),
        "message": record.args().to_string(),
        "target": format_target_as_path(record.target(), record.line()),
    });
    serde_json::to_writer(w, &line).map_err(std::io::Error::other)
}

// routemq::broker::store -> broker/store.rs:42
fn format_target_as_path(target: &str, line: Option<u32>) -> String {
    let path_like = match target.strip_prefix("routemq::") {
        Some(without_prefix) => without_prefix.replace("::", "/") + ".rs",
        None => target.replace("::", "/"),
    };

    match line {
        Some(line_num) => format!("{}:{}", path_like, line_num),
        None => path_like,
    }
}
