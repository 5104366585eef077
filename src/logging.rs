use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Route all events to stdout. Thread names are load-bearing here: every
/// service runs on a named thread, so the name identifies the subsystem.
pub fn init_stdout(max_level: Level) {
    let stdout = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_thread_names(true)
        .with_filter(LevelFilter::from_level(max_level));

    tracing_subscriber::registry().with(stdout).init();
}
