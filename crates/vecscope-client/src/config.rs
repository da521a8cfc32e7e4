use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use vecscope_common::protocol::ConsistencyLevel;
use vecscope_common::{Result, ScopeError};

use crate::discovery::DiscoveryOptions;

/// Engine tuning, loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows per page (default: 50)
    pub page_size: usize,
    /// Lifetime of cached pages and schemas (default: 5 minutes)
    pub cache_ttl_secs: u64,
    /// Entries per cache before the oldest is evicted
    pub cache_max_entries: usize,
    /// Quiet period before a search-text change triggers a load
    pub search_debounce_ms: u64,
    /// Failed client initializations before giving up
    pub max_init_attempts: u32,
    /// Largest `top_k` the over-fetch fallback may request
    pub max_overfetch: usize,
    /// History entries kept per namespace
    pub history_limit: usize,
    /// Read consistency requested on every query; backend default when unset
    pub consistency: Option<ConsistencyLevel>,
    pub discovery: DiscoveryOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            cache_ttl_secs: 300, // 5 minutes
            cache_max_entries: 500,
            search_debounce_ms: 500,
            max_init_attempts: 3,
            max_overfetch: 1200,
            history_limit: 50,
            consistency: None,
            discovery: DiscoveryOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Load config from a TOML file, with environment variable overrides.
    /// Falls back to defaults if the file is not found. VECSCOPE_CONFIG
    /// overrides the path.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut cfg_path = path.as_ref().to_path_buf();
        if let Ok(env_path) = env::var("VECSCOPE_CONFIG") {
            cfg_path = PathBuf::from(env_path);
        }
        Self::load_with(&cfg_path, |name| env::var(name).ok())
    }

    /// Parse a TOML document.
    pub fn from_toml(s: &str) -> Result<Self> {
        let cfg: EngineConfig = toml::from_str(s).map_err(|e| ScopeError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn load_with<F>(path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match fs::read_to_string(path) {
            Ok(s) => Self::from_toml(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => EngineConfig::default(),
            Err(e) => {
                return Err(ScopeError::Config(format!("cannot read {}: {e}", path.display())));
            }
        };
        cfg.apply_overrides(lookup);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply VECSCOPE_* overrides. Unparseable values are ignored.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("VECSCOPE_PAGE_SIZE")
            && let Ok(n) = v.parse()
        {
            self.page_size = n;
        }

        if let Some(v) = lookup("VECSCOPE_CACHE_TTL_SECS")
            && let Ok(n) = v.parse()
        {
            self.cache_ttl_secs = n;
        }

        if let Some(v) = lookup("VECSCOPE_DEBOUNCE_MS")
            && let Ok(n) = v.parse()
        {
            self.search_debounce_ms = n;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(ScopeError::Config("page_size must be at least 1".into()));
        }
        if self.max_overfetch < self.page_size {
            return Err(ScopeError::Config(format!(
                "max_overfetch ({}) must be at least page_size ({})",
                self.max_overfetch, self.page_size
            )));
        }
        if self.discovery.sample_size == 0 {
            return Err(ScopeError::Config("discovery.sample_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = EngineConfig::load_with(&dir.path().join("absent.toml"), no_env).expect("defaults");
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "page_size = 20\n\n[discovery]\nsample_size = 100").expect("write");

        let cfg = EngineConfig::load_with(file.path(), no_env).expect("valid config");
        assert_eq!(cfg.page_size, 20);
        assert_eq!(cfg.discovery.sample_size, 100);
        assert_eq!(cfg.discovery.max_unique_values, 100);
        assert_eq!(cfg.search_debounce_ms, 500);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("VECSCOPE_PAGE_SIZE", "10"),
            ("VECSCOPE_DEBOUNCE_MS", "soon"),
            ("VECSCOPE_CACHE_TTL_SECS", "60"),
        ]);
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = EngineConfig::load_with(&dir.path().join("absent.toml"), |name| {
            env.get(name).map(|v| v.to_string())
        })
        .expect("config");
        assert_eq!(cfg.page_size, 10);
        assert_eq!(cfg.cache_ttl_secs, 60);
        assert_eq!(cfg.search_debounce_ms, 500);
    }

    #[test]
    fn test_invalid_config() {
        assert!(EngineConfig::from_toml("page_size = 0").is_err());
        assert!(EngineConfig::from_toml("page_size = 100\nmax_overfetch = 10").is_err());
        assert!(EngineConfig::from_toml("page_size = \"many\"").is_err());
        assert!(EngineConfig::from_toml("consistency = \"sometimes\"").is_err());
    }

    #[test]
    fn test_consistency_level() {
        let cfg = EngineConfig::from_toml("consistency = \"strong\"").expect("valid config");
        assert_eq!(cfg.consistency, Some(ConsistencyLevel::Strong));
        assert_eq!(EngineConfig::default().consistency, None);
    }
}
