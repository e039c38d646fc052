// Configuration module for jsapi
// Reads from environment variables with sensible defaults

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::warn;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding downloaded library files (JSAPI_CACHE_DIR)
    pub cache_dir: PathBuf,

    /// Upper bound on sandbox execution plus resolution, in seconds (JSAPI_EVAL_TIMEOUT_SECS)
    pub eval_timeout_secs: u64,

    /// Cap on the context-expansion window (JSAPI_MAX_EXPAND)
    pub max_expand: u32,

    /// Number of related methods attached to a single-method result (JSAPI_RELATED_LIMIT)
    pub related_limit: usize,

    /// Timeout for remote library downloads, in seconds (JSAPI_FETCH_TIMEOUT_SECS)
    pub fetch_timeout_secs: u64,

    /// Heap ceiling for one script runtime, in MiB (JSAPI_MEMORY_LIMIT_MB)
    pub memory_limit_mb: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("_libs"),
            eval_timeout_secs: 20,
            max_expand: 50,
            related_limit: 12,
            fetch_timeout_secs: 30,
            memory_limit_mb: 256,
        }
    }
}

fn read_var<T>(name: &str, target: &mut T)
where
    T: FromStr + std::fmt::Debug,
{
    let Ok(val) = env::var(name) else {
        return;
    };
    match val.parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(
            "invalid {} value: {}, using default: {:?}",
            name, val, target
        ),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(val) = env::var("JSAPI_CACHE_DIR") {
            if !val.trim().is_empty() {
                config.cache_dir = PathBuf::from(val);
            }
        }
        read_var("JSAPI_EVAL_TIMEOUT_SECS", &mut config.eval_timeout_secs);
        read_var("JSAPI_MAX_EXPAND", &mut config.max_expand);
        read_var("JSAPI_RELATED_LIMIT", &mut config.related_limit);
        read_var("JSAPI_FETCH_TIMEOUT_SECS", &mut config.fetch_timeout_secs);
        read_var("JSAPI_MEMORY_LIMIT_MB", &mut config.memory_limit_mb);

        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }
}
