//! Logger setup for the renderer binary, the rest of the crate only uses the `log` macros.

use env_logger::{Builder, Env};

/// Used when `RUST_LOG` is unset: renderer progress at info, dependencies only when they warn.
pub const DEFAULT_FILTER: &str = "warn,tangent_renderer=info";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub default_filter: String,
    pub show_module: bool, // Prefix records with the module path.
}

impl Default for LoggingConfig {
    fn default() -> Self {
        return Self {
            default_filter: DEFAULT_FILTER.to_string(),
            show_module: false,
        };
    }
}

fn builder(config: &LoggingConfig) -> Builder {
    let env = Env::default().default_filter_or(config.default_filter.as_str());
    let mut builder = Builder::from_env(env);
    builder.format_target(config.show_module);
    return builder;
}

/// Installs the global logger. Returns false if a logger was already installed, in which case
/// the call has no effect.
pub fn init_logging(config: LoggingConfig) -> bool {
    let installed = builder(&config).try_init().is_ok();
    if installed {
        log::debug!("logging initialized with default filter '{}'", config.default_filter);
    }
    return installed;
}
