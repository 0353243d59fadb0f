// src/utils/mod.rs
pub mod timing;

pub use timing::Timer;

use log::info;

/// Initializes the global logger: `[level][target] message` on stdout at
/// `info`, or at the level named by `RUST_LOG` when it parses. Fails if a
/// logger is already installed.
pub fn setup_logging() -> Result<(), fern::InitError> {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|v| v.trim().parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("rayon_core", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()?;
    info!("Logging initialized at {}.", level);
    Ok(())
}
