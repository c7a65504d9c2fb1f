//! Configuration loading.
//!
//! A single [`Config`] is constructed once at process start and passed by
//! reference into the build orchestrator, the renderer and the props store
//! client. Nothing else in the crate reads the process environment.
//!
//! The environment is consulted through a lookup closure so tests can feed
//! a fixed map instead of mutating process-wide state.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    APP_DIR, BUILD_REPORT_FILE, DEFAULT_ASSET_PREFIX, DEFAULT_HYDRATOR_MODULE,
    DEFAULT_PROPS_TIMEOUT, DEFAULT_RUNTIME, DIST_DIR, ENV_ASSET_PREFIX, ENV_BUILD_CONCURRENCY,
    ENV_BUNDLER, ENV_HYDRATOR_MODULE, ENV_PROPS_HOST, ENV_PROPS_PORT, ENV_PROPS_SOCKET,
    ENV_PROPS_TIMEOUT_MS, ENV_RUNTIME, PAGES_DIR, REGISTRY_FILE, RENDER_WORKER_FILE,
    SCRATCH_DIR, TMP_DIR,
};

/// Startup-time configuration failure. The process does not start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Neither a socket path nor a host/port pair is configured.
    #[error("props store transport not configured: set SCHORLE_PROPS_SOCKET or SCHORLE_PROPS_HOST and SCHORLE_PROPS_PORT")]
    MissingTransport,

    /// Both a socket path and host/port settings are configured.
    #[error("props store transport configured twice: SCHORLE_PROPS_SOCKET conflicts with SCHORLE_PROPS_HOST/SCHORLE_PROPS_PORT")]
    ConflictingTransport,

    /// Only one half of the host/port pair is present.
    #[error("incomplete TCP props store configuration: missing {0}")]
    IncompleteTcp(&'static str),

    /// The port is not a valid TCP port number.
    #[error("invalid SCHORLE_PROPS_PORT value {value:?}: {source}")]
    InvalidPort {
        /// Raw value.
        value: String,
        /// Parse error.
        #[source]
        source: std::num::ParseIntError,
    },

    /// A numeric override could not be parsed.
    #[error("invalid value {value:?} for {key}: {source}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
        /// Parse error.
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Where the props store listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropsTransport {
    /// Unix-domain socket path.
    Unix(PathBuf),
    /// TCP host and port.
    Tcp {
        /// Host name or address.
        host: String,
        /// Port number.
        port: u16,
    },
}

impl fmt::Display for PropsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
        }
    }
}

/// Props store client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropsStoreConfig {
    /// Selected transport.
    pub transport: PropsTransport,
    /// Upper bound on one lookup round trip.
    pub timeout: Duration,
}

impl PropsStoreConfig {
    /// Resolves the transport from environment-style lookups.
    ///
    /// Exactly one of the socket path or the complete host/port pair must
    /// be present.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let socket = non_empty(ENV_PROPS_SOCKET);
        let host = non_empty(ENV_PROPS_HOST);
        let port = non_empty(ENV_PROPS_PORT);

        let transport = match (socket, host, port) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(ConfigError::ConflictingTransport)
            }
            (Some(path), None, None) => PropsTransport::Unix(PathBuf::from(path)),
            (None, Some(host), Some(port)) => {
                let port = port
                    .trim()
                    .parse::<u16>()
                    .map_err(|source| ConfigError::InvalidPort {
                        value: port.clone(),
                        source,
                    })?;
                PropsTransport::Tcp { host, port }
            }
            (None, Some(_), None) => return Err(ConfigError::IncompleteTcp(ENV_PROPS_PORT)),
            (None, None, Some(_)) => return Err(ConfigError::IncompleteTcp(ENV_PROPS_HOST)),
            (None, None, None) => return Err(ConfigError::MissingTransport),
        };

        let timeout = match non_empty(ENV_PROPS_TIMEOUT_MS) {
            Some(raw) => Duration::from_millis(parse_number(ENV_PROPS_TIMEOUT_MS, &raw)?),
            None => DEFAULT_PROPS_TIMEOUT,
        };

        Ok(Self { transport, timeout })
    }
}

/// Process-wide configuration for the bridge.
#[derive(Debug, Clone)]
pub struct Config {
    /// Project root; every other path derives from it.
    pub project_root: PathBuf,
    /// Bundler executable.
    pub bundler: String,
    /// Server render runtime executable.
    pub runtime: String,
    /// Maximum concurrent bundler invocations.
    pub build_concurrency: usize,
    /// Public URL prefix of built assets.
    pub asset_prefix: String,
    /// Import specifier of the client hydrator.
    pub hydrator_module: String,
    /// Props store settings; only the render side requires them.
    pub props_store: Option<PropsStoreConfig>,
}

impl Config {
    /// Creates a configuration with defaults for the given project root.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            bundler: DEFAULT_RUNTIME.to_string(),
            runtime: DEFAULT_RUNTIME.to_string(),
            build_concurrency: default_concurrency(),
            asset_prefix: DEFAULT_ASSET_PREFIX.to_string(),
            hydrator_module: DEFAULT_HYDRATOR_MODULE.to_string(),
            props_store: None,
        }
    }

    /// Loads configuration for a build: defaults plus environment overrides.
    pub fn for_build(project_root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::new(project_root);
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Loads configuration for rendering, which also requires the props
    /// store transport.
    pub fn for_render(project_root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        Self::for_render_with(project_root, |key| std::env::var(key).ok())
    }

    /// Like [`Config::for_render`] with an explicit variable lookup.
    pub fn for_render_with<F>(
        project_root: impl Into<PathBuf>,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(project_root);
        config.apply_overrides(&lookup)?;
        config.props_store = Some(PropsStoreConfig::from_lookup(&lookup)?);
        Ok(config)
    }

    /// Convenience for tests: render configuration from a fixed map.
    pub fn for_render_from_map(
        project_root: impl Into<PathBuf>,
        vars: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        Self::for_render_with(project_root, |key| vars.get(key).cloned())
    }

    /// Applies environment-style overrides on top of the current values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bundler) = lookup(ENV_BUNDLER) {
            self.bundler = bundler;
        }

        if let Some(runtime) = lookup(ENV_RUNTIME) {
            self.runtime = runtime;
        }

        if let Some(raw) = lookup(ENV_BUILD_CONCURRENCY) {
            let value = parse_number(ENV_BUILD_CONCURRENCY, &raw)?;
            self.build_concurrency = usize::try_from(value.max(1)).unwrap_or(1);
        }

        if let Some(prefix) = lookup(ENV_ASSET_PREFIX) {
            self.asset_prefix = prefix.trim_end_matches('/').to_string();
        }

        if let Some(module) = lookup(ENV_HYDRATOR_MODULE) {
            self.hydrator_module = module;
        }

        Ok(())
    }

    /// `app/` under the project root.
    pub fn app_dir(&self) -> PathBuf {
        self.project_root.join(APP_DIR)
    }

    /// `app/pages/` under the project root.
    pub fn pages_dir(&self) -> PathBuf {
        self.app_dir().join(PAGES_DIR)
    }

    /// `.schorle/` under the project root.
    pub fn scratch_dir(&self) -> PathBuf {
        self.project_root.join(SCRATCH_DIR)
    }

    /// Build output root holding one directory per page.
    pub fn dist_dir(&self) -> PathBuf {
        self.scratch_dir().join(DIST_DIR)
    }

    /// Temporary root for generated entrypoints, removed after each batch.
    pub fn tmp_dir(&self) -> PathBuf {
        self.scratch_dir().join(TMP_DIR)
    }

    /// Generated client registry module.
    pub fn registry_path(&self) -> PathBuf {
        self.scratch_dir().join(REGISTRY_FILE)
    }

    /// Generated server render worker module.
    pub fn render_worker_path(&self) -> PathBuf {
        self.scratch_dir().join(RENDER_WORKER_FILE)
    }

    /// Aggregate build report.
    pub fn build_report_path(&self) -> PathBuf {
        self.scratch_dir().join(BUILD_REPORT_FILE)
    }

    /// Project root.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}

fn parse_number(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|source| ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            source,
        })
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_unix_transport() {
        let config =
            PropsStoreConfig::from_lookup(lookup_from(&[(ENV_PROPS_SOCKET, "/tmp/props.sock")]))
                .unwrap();
        assert_eq!(
            config.transport,
            PropsTransport::Unix(PathBuf::from("/tmp/props.sock"))
        );
        assert_eq!(config.timeout, DEFAULT_PROPS_TIMEOUT);
    }

    #[test]
    fn test_tcp_transport() {
        let config = PropsStoreConfig::from_lookup(lookup_from(&[
            (ENV_PROPS_HOST, "127.0.0.1"),
            (ENV_PROPS_PORT, "7070"),
            (ENV_PROPS_TIMEOUT_MS, "250"),
        ]))
        .unwrap();
        assert_eq!(
            config.transport,
            PropsTransport::Tcp {
                host: "127.0.0.1".to_string(),
                port: 7070
            }
        );
        assert_eq!(config.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_transport_is_error() {
        let err = PropsStoreConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTransport));
    }

    #[test]
    fn test_both_transports_is_error() {
        let err = PropsStoreConfig::from_lookup(lookup_from(&[
            (ENV_PROPS_SOCKET, "/tmp/props.sock"),
            (ENV_PROPS_HOST, "localhost"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingTransport));
    }

    #[test]
    fn test_partial_tcp_is_error() {
        let err = PropsStoreConfig::from_lookup(lookup_from(&[(ENV_PROPS_HOST, "localhost")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::IncompleteTcp(ENV_PROPS_PORT)));

        let err = PropsStoreConfig::from_lookup(lookup_from(&[(ENV_PROPS_PORT, "80")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::IncompleteTcp(ENV_PROPS_HOST)));
    }

    #[test]
    fn test_invalid_port_is_error() {
        let err = PropsStoreConfig::from_lookup(lookup_from(&[
            (ENV_PROPS_HOST, "localhost"),
            (ENV_PROPS_PORT, "http"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { ref value, .. } if value == "http"));
        assert!(err.to_string().contains("invalid digit"), "got {err}");
    }

    #[test]
    fn test_invalid_timeout_keeps_parse_error() {
        let err = PropsStoreConfig::from_lookup(lookup_from(&[
            (ENV_PROPS_SOCKET, "/tmp/props.sock"),
            (ENV_PROPS_TIMEOUT_MS, "soon"),
        ]))
        .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, ref value, .. } => {
                assert_eq!(key, ENV_PROPS_TIMEOUT_MS);
                assert_eq!(value, "soon");
                assert!(std::error::Error::source(&err).is_some());
            }
            other => panic!("expected invalid value, got {other:?}"),
        }
    }

    #[test]
    fn test_derived_paths() {
        let config = Config::new("/srv/site");
        assert_eq!(config.pages_dir(), PathBuf::from("/srv/site/app/pages"));
        assert_eq!(config.dist_dir(), PathBuf::from("/srv/site/.schorle/dist"));
        assert_eq!(config.tmp_dir(), PathBuf::from("/srv/site/.schorle/tmp"));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::new("/srv/site");
        config
            .apply_overrides(lookup_from(&[
                (ENV_BUNDLER, "/usr/local/bin/bun"),
                (ENV_BUILD_CONCURRENCY, "0"),
                (ENV_ASSET_PREFIX, "/static/"),
            ]))
            .unwrap();
        assert_eq!(config.bundler, "/usr/local/bin/bun");
        assert_eq!(config.build_concurrency, 1);
        assert_eq!(config.asset_prefix, "/static");
    }

    #[test]
    fn test_render_config_requires_transport() {
        let vars = HashMap::new();
        assert!(Config::for_render_from_map("/srv/site", &vars).is_err());
    }
}
