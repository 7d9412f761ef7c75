//! Worker configuration.

use std::path::Path;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ServiceWorkerError;

/// Cache generation shipped with the current site build.
pub const DEFAULT_CACHE_NAME: &str = "my-nextjs-pwa-cache-v9";

/// Routes seeded into the cache on install.
pub const DEFAULT_SEED_URLS: &[&str] = &[
    "/",
    "/photography",
    "/newsletter",
    "/project/jigsaw-presents",
    "/project/jigsaw-academy",
    "/blog/page/1",
    "/blog/page/2",
    "/manifest.json",
    "/images/favicon.ico",
];

/// Hosts treated as production. Entries may be bare host names or URLs.
pub const PRODUCTION_HOSTS: &[&str] = &["patrickprunty.com", "https://patrickprunty.com"];

const DEFAULT_ORIGIN: &str = "https://patrickprunty.com/";

/// Offline worker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name of the current cache generation
    pub cache_name: String,

    /// Origin the worker is installed on; seed paths resolve against it
    pub origin: Url,

    /// Root-relative paths cached on install
    pub seed_urls: Vec<String>,

    /// Seed the cache on install (production only)
    pub seed_on_install: bool,

    /// Path served when offline and the request itself is not cached
    pub offline_fallback: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            origin: default_origin(),
            seed_urls: DEFAULT_SEED_URLS.iter().map(|s| s.to_string()).collect(),
            seed_on_install: false,
            offline_fallback: "/".to_string(),
        }
    }
}

fn default_origin() -> Url {
    Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid URL")
}

impl WorkerConfig {
    /// Configuration for a worker served from `origin`, seeding only when
    /// the host is a known production host.
    pub fn for_origin(origin: Url) -> Self {
        let seed_on_install = origin.host_str().is_some_and(is_production_host);
        Self {
            origin,
            seed_on_install,
            ..Default::default()
        }
    }

    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ServiceWorkerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ServiceWorkerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            ServiceWorkerError::Config(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the worker cannot run with.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::Config("cache_name is empty".into()));
        }
        if self.origin.cannot_be_a_base() || self.origin.host_str().is_none() {
            return Err(ServiceWorkerError::Config(format!(
                "origin {} has no host",
                self.origin
            )));
        }
        self.fallback_url()?;
        Ok(())
    }

    /// Cache names that survive activation.
    pub fn whitelist(&self) -> HashSet<String> {
        let mut set = HashSet::new();
        set.insert(self.cache_name.clone());
        set
    }

    /// Resolve a root-relative path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, ServiceWorkerError> {
        Ok(self.origin.join(path)?)
    }

    /// The offline fallback page.
    pub fn fallback_url(&self) -> Result<Url, ServiceWorkerError> {
        self.resolve(&self.offline_fallback)
    }
}

/// Whether `host` is one of [`PRODUCTION_HOSTS`].
pub fn is_production_host(host: &str) -> bool {
    PRODUCTION_HOSTS.iter().any(|entry| {
        let known = Url::parse(entry)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| entry.to_string());
        known.eq_ignore_ascii_case(host)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.cache_name, DEFAULT_CACHE_NAME);
        assert_eq!(config.seed_urls.len(), DEFAULT_SEED_URLS.len());
        assert_eq!(config.seed_urls[0], "/");
        assert!(!config.seed_on_install);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_hosts() {
        assert!(is_production_host("patrickprunty.com"));
        assert!(is_production_host("PatrickPrunty.com"));
        assert!(!is_production_host("localhost"));
        assert!(!is_production_host("staging.patrickprunty.com"));
    }

    #[test]
    fn test_for_origin_gates_seeding() {
        let prod = WorkerConfig::for_origin(Url::parse("https://patrickprunty.com/").unwrap());
        assert!(prod.seed_on_install);

        let dev = WorkerConfig::for_origin(Url::parse("http://localhost:3000/").unwrap());
        assert!(!dev.seed_on_install);
        assert_eq!(dev.resolve("/photography").unwrap().as_str(), "http://localhost:3000/photography");
    }

    #[test]
    fn test_whitelist_has_only_current() {
        let config = WorkerConfig {
            cache_name: "v9".into(),
            ..Default::default()
        };
        let whitelist = config.whitelist();
        assert_eq!(whitelist.len(), 1);
        assert!(whitelist.contains("v9"));
        assert!(!whitelist.contains("v8"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: WorkerConfig =
            serde_json::from_str(r#"{"cache_name":"v10","seed_on_install":true}"#).unwrap();
        assert_eq!(config.cache_name, "v10");
        assert!(config.seed_on_install);
        assert_eq!(config.offline_fallback, "/");
        assert_eq!(config.origin.as_str(), DEFAULT_ORIGIN);
    }

    #[test]
    fn test_load_rejects_empty_cache_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.json");
        std::fs::write(&path, r#"{"cache_name":"  "}"#).unwrap();

        assert!(matches!(
            WorkerConfig::load(&path),
            Err(ServiceWorkerError::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = WorkerConfig::load(Path::new("/nonexistent/worker.json")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
