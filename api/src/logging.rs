use log::LevelFilter;
use std::sync::OnceLock;

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// Info by default, overridable through RUST_LOG
pub fn init() {
    LOGGER_INIT.get_or_init(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Info)
            .parse_default_env()
            .format_timestamp_millis()
            .init();
    });
}
