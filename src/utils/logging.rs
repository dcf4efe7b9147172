/// Initialize tracing/logging for the application.
///
/// This uses a simple `with_max_level` configuration based on `default_level`.
/// Unknown level names fall back to `info`.
pub fn init(default_level: &str) {
    // try_init so tests and the CLI can call this more than once
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(default_level))
        .with_target(false)
        .try_init();
}

/// Maps a configured level name onto a `tracing::Level`.
pub fn parse_level(name: &str) -> tracing::Level {
    match name.trim().to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}
