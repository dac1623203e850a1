//! Log output and live log level

use discovery_etcd::LogLevel;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, Registry};

/// Handle for changing the level of the installed subscriber
pub struct LogHandle {
    level: reload::Handle<LevelFilter, Registry>,
}

/// Install the global subscriber. Text output unless `LOG_FORMAT=json`.
pub fn init() -> LogHandle {
    let (level_layer, level) = reload::Layer::new(LevelFilter::INFO);

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let output = if json {
        fmt::layer()
            .json()
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(level_layer)
        .with(output)
        .init();

    LogHandle { level }
}

impl LogHandle {
    pub fn set_level(&self, level: LevelFilter) {
        if let Err(e) = self.level.reload(level) {
            warn!("Failed to change log level: {}", e);
        }
    }

    /// Apply the current level, then every change until `cancel` fires.
    pub fn follow(
        self,
        mut levels: watch::Receiver<LogLevel>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let LogLevel(initial) = *levels.borrow_and_update();
        self.set_level(initial);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    changed = levels.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let LogLevel(level) = *levels.borrow_and_update();
                        self.set_level(level);
                        info!("Log level set to {}", level);
                    }
                }
            }
        })
    }
}
