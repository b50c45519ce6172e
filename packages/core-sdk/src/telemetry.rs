use std::{fs::OpenOptions, path::PathBuf, sync::Mutex};

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/**
 * \brief Logging options, decided by the binary before anything else runs.
 */
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /** \brief Emit JSON lines instead of human-readable text. */
    pub json: bool,
    /** \brief Append to logs/iqac-ai.log instead of stderr. */
    pub to_file: bool,
}

/**
 * \brief Directory for log files; `IQAC_LOG_DIR` overrides the default `logs`.
 */
pub fn log_dir() -> PathBuf {
    std::env::var("IQAC_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("logs"))
}

/**
 * \brief Install the global tracing subscriber.
 * \details Filter comes from `RUST_LOG`, defaulting to `info`. A second call is a no-op.
 */
pub fn init(opts: &LogOptions) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = if opts.to_file {
        let dir = log_dir();
        std::fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("iqac-ai.log"))?;
        let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
        if opts.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        }
    } else {
        let builder = builder.with_writer(std::io::stderr);
        if opts.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        }
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
