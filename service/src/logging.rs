use crate::config::{Config, RustEnv};
use log::{LevelFilter, SetLoggerError};
use simplelog::{self, ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// Dependencies whose logs are hidden unless the level is Trace.
/// Long-lived streams make hyper and axum especially chatty.
const FILTERED_MODULES: &[&str] = &[
    "tower",
    "tracing",
    "hyper",
    "axum",
    "reqwest",
    "eventsource_client",
];

pub struct Logger {}

impl Logger {
    /// Installs the global terminal logger for the service.
    ///
    /// Must be called once, before the broker or the router are built.
    pub fn init_logger(config: &Config) -> Result<(), SetLoggerError> {
        TermLogger::init(
            Self::convert_level_filter(config.log_level_filter),
            Self::build_log_config(Self::should_filter_dependencies(config.log_level_filter)),
            TerminalMode::Mixed,
            Self::color_choice(&config.runtime_env()),
        )
    }

    fn convert_level_filter(level: LevelFilter) -> simplelog::LevelFilter {
        match level {
            LevelFilter::Off => simplelog::LevelFilter::Off,
            LevelFilter::Error => simplelog::LevelFilter::Error,
            LevelFilter::Warn => simplelog::LevelFilter::Warn,
            LevelFilter::Info => simplelog::LevelFilter::Info,
            LevelFilter::Debug => simplelog::LevelFilter::Debug,
            LevelFilter::Trace => simplelog::LevelFilter::Trace,
        }
    }

    fn should_filter_dependencies(level: LevelFilter) -> bool {
        level != LevelFilter::Trace
    }

    /// Log collectors in deployed environments do not render ANSI colors.
    fn color_choice(env: &RustEnv) -> ColorChoice {
        match env {
            RustEnv::Development => ColorChoice::Auto,
            RustEnv::Staging | RustEnv::Production => ColorChoice::Never,
        }
    }

    fn build_log_config(apply_filters: bool) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();

        if apply_filters {
            for module in FILTERED_MODULES {
                builder.add_filter_ignore_str(module);
            }
        }

        builder.build()
    }
}
