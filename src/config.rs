use std::env;
use std::path::PathBuf;

/// Runtime configuration, handed to each component explicitly.
/// Nothing in the crate reads process-global state after construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path; ":memory:" for tests.
    pub database_path: String,
    /// Directory where media byte payloads live.
    pub media_root: PathBuf,
    /// bcrypt work factor for the slow credential hash.
    pub bcrypt_cost: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "chirp.db".to_string(),
            media_root: PathBuf::from("media"),
            bcrypt_cost: 10,
        }
    }
}

impl Config {
    /// Build a config from environment variables, falling back to defaults.
    /// Convenience for the embedding process; the library never calls this.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            media_root: env::var("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_root),
            bcrypt_cost: env::var("BCRYPT_COST")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bcrypt_cost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, "chirp.db");
        assert_eq!(config.bcrypt_cost, 10);
    }
}
