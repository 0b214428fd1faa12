use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};

pub fn level_for(verbosity: u8) -> log::LevelFilter {
    match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

/// Logs to stderr, and also to `logfile` when given. The log file is appended
/// to, so it keeps the history of every scheduled run.
pub fn init(level: log::LevelFilter, logfile: Option<&Path>) -> Result<()> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {:<5} {} - {}",
                humantime::format_rfc3339_seconds(SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Some(logfile) = logfile {
        if let Some(parent) = logfile.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: '{}'", parent.display()))?;
        }
        dispatch = dispatch.chain(
            fern::log_file(logfile)
                .with_context(|| format!("Failed to open log file: '{}'", logfile.display()))?,
        );
    }

    dispatch.apply().context("Failed to set the logger")?;
    Ok(())
}
