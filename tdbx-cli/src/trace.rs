//! Logging setup for the `tdbx` binary: a rolling file appender plus a
//! colored stderr sink for warnings and above, the same `fern` +
//! `tracing-appender` combination the engine crate logs through via the
//! `log` facade.

use std::io::{BufWriter, Write};
use std::str::FromStr;

use anyhow::Result;
use log::LevelFilter;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

const MAX_LOG_FILES: usize = 10;

/// Installs the global logger, writing to `<dir>/tdbx.log` (rotated daily)
/// at `level`, and echoing `warn`/`error` records to stderr. Returns the
/// appender's flush guard; the caller must keep it alive for the process
/// lifetime or buffered log lines are dropped on exit.
pub fn init_logging(dir: &str, level: &str) -> Result<Box<dyn Drop + Send + Sync + 'static>> {
    let rolling = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("tdbx.log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)?;
    let (non_blocking, flush_guard) = tracing_appender::non_blocking(rolling);
    let buffered = BufWriter::with_capacity(64 * 1024, non_blocking);

    let file_dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} [{}] {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::from_str(level).unwrap_or(LevelFilter::Info))
        .chain(Box::new(buffered) as Box<dyn Write + Send>);

    let stderr_dispatch = fern::Dispatch::new()
        .level(LevelFilter::Warn)
        .format(|out, message, record| {
            out.finish(format_args!(
                "\x1B[{}m{}: {}\x1B[0m",
                fern::colors::Color::Yellow.to_fg_str(),
                record.level(),
                message
            ))
        })
        .chain(std::io::stderr());

    let result = fern::Dispatch::new()
        .chain(file_dispatch)
        .chain(stderr_dispatch)
        .apply();
    if result.is_err() {
        eprintln!("logger has already been set");
    }

    Ok(Box::new(flush_guard))
}
