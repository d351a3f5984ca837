//! Structured logging setup, mirroring the rolling-file convention used
//! throughout the rest of the ambient stack.

use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::fs;
use std::path::{Path, PathBuf};

const ENV_LOG_DIR: &str = "NEXUSTREE_LOG_DIR";
const ENV_LOG_LEVEL: &str = "NEXUSTREE_LOG_LEVEL";
const ENV_LOG_RETENTION: &str = "NEXUSTREE_LOG_RETENTION";

fn parse_level(s: &str) -> LevelFilter {
    match s.to_ascii_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Initializes a single rolling-file appender at `{base}/{name}_logs/{name}.log`.
///
/// # Errors
/// Returns an error if the log directory cannot be created or the appender
/// cannot be built.
pub fn init_for_db_in(base_dir: &Path, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut dir = PathBuf::from(base_dir);
    dir.push(format!("{name}_logs"));
    fs::create_dir_all(&dir)?;

    let retention: u32 = std::env::var(ENV_LOG_RETENTION)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(7);
    let level = std::env::var(ENV_LOG_LEVEL)
        .ok()
        .map(|v| parse_level(&v))
        .unwrap_or(LevelFilter::Info);

    let log_path = dir.join(format!("{name}.log"));
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", dir.join(format!("{name}.{{}}.log")).display()), retention)?;
    let trigger = SizeTrigger::new(10 * 1024 * 1024);
    let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));
    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}")))
        .build(log_path, Box::new(policy))?;

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(appender)))
        .build(Root::builder().appender("file").build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}

/// Initializes logging from the `NEXUSTREE_LOG_DIR` environment variable,
/// defaulting to the current directory and the name `nexustree` if unset.
///
/// # Errors
/// Returns an error if the underlying appender cannot be initialized.
pub fn configure_from_env() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::var(ENV_LOG_DIR).unwrap_or_else(|_| ".".to_string());
    init_for_db_in(Path::new(&dir), "nexustree")
}
