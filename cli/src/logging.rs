//! Tracing / logging initialisation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How the CLI should log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level applied to every target without an override.
    #[serde(default = "default_level")]
    pub level: String,
    /// Per-crate level overrides, keyed by crate name (`feedindex-core`).
    #[serde(default)]
    pub targets: HashMap<String, String>,
    /// One JSON object per line instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "warn".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            targets: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Filter directives, e.g. `"warn,feedindex_core=debug"`.
    ///
    /// `RUST_LOG` takes precedence when set.
    fn directives(&self) -> String {
        if let Ok(env) = std::env::var(EnvFilter::DEFAULT_ENV) {
            if !env.is_empty() {
                return env;
            }
        }
        self.targets
            .iter()
            .fold(self.level.clone(), |mut acc, (target, level)| {
                acc.push_str(&format!(",{}={level}", target.replace('-', "_")));
                acc
            })
    }
}

/// Install the global subscriber. Call once, before any command runs.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_new(config.directives())
        .unwrap_or_else(|_| EnvFilter::new(default_level()));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
