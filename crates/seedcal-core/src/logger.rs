//! Stderr logging for the `seedcal` tools.
//!
//! Records from the `seedcal*` crates pass at the level picked by
//! [`LogConfig`]; everything else is held to warnings. Plain lines look like
//! `[  0.412s  INFO seedcal_chart::locator] message`, JSON lines carry the same
//! fields as one object per line.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::Serialize;

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Prefix shared by the log targets of this workspace.
const OWN_TARGET: &str = "seedcal";

/// Level for records outside the workspace.
const FOREIGN_LEVEL: LevelFilter = LevelFilter::Warn;

/// Logging switches as given on the command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogConfig {
    /// 0 = info, 1 = debug, 2+ = trace.
    pub verbosity: u8,
    /// One JSON object per line instead of plain text.
    pub json: bool,
}

impl LogConfig {
    pub fn new(verbosity: u8, json: bool) -> Self {
        Self { verbosity, json }
    }

    pub fn level(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Filter for a record target.
    pub fn level_for(&self, target: &str) -> LevelFilter {
        if target.starts_with(OWN_TARGET) {
            self.level()
        } else {
            FOREIGN_LEVEL.min(self.level())
        }
    }

    /// `tracing` filter directives equivalent to [`level_for`](Self::level_for).
    pub fn directives(&self) -> String {
        format!("{FOREIGN_LEVEL},{OWN_TARGET}={}", self.level()).to_lowercase()
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    elapsed: f64,
    level: &'a str,
    target: &'a str,
    message: String,
}

fn format_line(
    config: &LogConfig,
    elapsed: f64,
    level: Level,
    target: &str,
    message: String,
) -> String {
    if config.json {
        let line = JsonLine {
            elapsed,
            level: level.as_str(),
            target,
            message,
        };
        match serde_json::to_string(&line) {
            Ok(s) => s,
            Err(e) => format!("{{\"level\":\"ERROR\",\"message\":\"log line: {e}\"}}"),
        }
    } else {
        format!("[{elapsed:7.3}s {level:>5} {target}] {message}")
    }
}

struct StderrLogger {
    config: LogConfig,
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.config.level_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(
            &self.config,
            self.started.elapsed().as_secs_f64(),
            record.level(),
            record.target(),
            record.args().to_string(),
        );
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger.
///
/// Only the first call installs anything; later calls return `Ok(())`.
pub fn init_logging(config: &LogConfig) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StderrLogger {
            config: *config,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(config.level());
    }
    Ok(())
}

/// Install a `tracing` subscriber. `RUST_LOG` overrides the filter derived
/// from `config`.
#[cfg(feature = "tracing")]
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directives()));
    if config.json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_only_workspace_levels() {
        let quiet = LogConfig::default();
        assert_eq!(quiet.level_for("seedcal_chart::locator"), LevelFilter::Info);
        assert_eq!(quiet.level_for("png::decoder"), LevelFilter::Warn);

        let loud = LogConfig::new(2, false);
        assert_eq!(loud.level_for("seedcal"), LevelFilter::Trace);
        assert_eq!(loud.level_for("png::decoder"), LevelFilter::Warn);
        assert_eq!(loud.directives(), "warn,seedcal=trace");
    }

    #[test]
    fn json_lines_carry_the_record_fields() {
        let line = format_line(
            &LogConfig::new(0, true),
            1.5,
            Level::Info,
            "seedcal_chart::locator",
            "chart \"A\" found".to_string(),
        );
        let v: serde_json::Value = serde_json::from_str(&line).expect("valid json");
        assert_eq!(v["level"], "INFO");
        assert_eq!(v["target"], "seedcal_chart::locator");
        assert_eq!(v["message"], "chart \"A\" found");
        assert_eq!(v["elapsed"], 1.5);
    }

    #[test]
    fn plain_lines_name_level_and_target() {
        let line = format_line(
            &LogConfig::default(),
            0.25,
            Level::Warn,
            "seedcal_segment",
            "no objects".to_string(),
        );
        assert_eq!(line, "[  0.250s  WARN seedcal_segment] no objects");
    }

    #[test]
    fn repeated_init_is_harmless() {
        assert!(init_logging(&LogConfig::new(0, true)).is_ok());
        assert!(init_logging(&LogConfig::new(1, false)).is_ok());
        log::warn!("logger installed");
    }
}
