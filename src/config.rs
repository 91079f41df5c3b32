//! Configuration loading and types for mirrorgate.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, backend credentials, upstream endpoints, the
//! status page, the response cache, and logging.
//!
//! The configuration is loaded once at startup and never mutated; it is
//! threaded through [`crate::AppState`] rather than read from globals.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Backend accounts and the shared directory prefix.
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Base URLs of the third-party APIs.
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Status page settings.
    #[serde(default)]
    pub status: StatusConfig,

    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Outbound HTTP settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics endpoint).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// The shared secret that unlocks the status page.
    ///
    /// Falls back to the GitHub token when no dedicated secret is set.
    /// Returns `None` when both are empty, which disables the status page.
    pub fn status_secret(&self) -> Option<&str> {
        let secret = self.status.secret.trim();
        if !secret.is_empty() {
            return Some(secret);
        }
        let token = self.sources.github.token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds to wait for in-flight cache writes on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Backend accounts.
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    /// Directory inside every repository/bucket that holds the files.
    #[serde(default)]
    pub dir: String,

    /// Git ref used for raw and file endpoints.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// User-Agent sent to the Git hosts.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// GitHub repositories (one owner, one token, many repos).
    #[serde(default)]
    pub github: GithubConfig,

    /// GitLab projects, each with its own token.
    #[serde(default)]
    pub gitlab: Vec<GitlabAccountConfig>,

    /// R2 (S3-compatible) accounts.
    #[serde(default)]
    pub r2: Vec<R2AccountConfig>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            branch: default_branch(),
            user_agent: default_user_agent(),
            github: GithubConfig::default(),
            gitlab: Vec::new(),
            r2: Vec::new(),
        }
    }
}

/// GitHub configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubConfig {
    /// Owner of every listed repository.
    #[serde(default)]
    pub username: String,

    /// Personal access token (also the default status secret).
    #[serde(default, alias = "pat")]
    pub token: String,

    /// Repository names. Blank names are ignored.
    #[serde(default)]
    pub repos: Vec<String>,
}

/// One GitLab project.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitlabAccountConfig {
    /// Display name (also the fallback GitHub repository name).
    #[serde(default)]
    pub name: String,

    /// Numeric project ID.
    #[serde(default)]
    pub id: String,

    /// Private token.
    #[serde(default)]
    pub token: String,
}

/// One R2 account / bucket pair.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct R2AccountConfig {
    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Cloudflare account ID (first label of the endpoint host).
    #[serde(default)]
    pub account_id: String,

    /// Access key ID.
    #[serde(default)]
    pub access_key_id: String,

    /// Secret access key.
    #[serde(default)]
    pub secret_access_key: String,

    /// Bucket name.
    #[serde(default)]
    pub bucket: String,
}

/// Base URLs of the third-party APIs.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_github_api")]
    pub github_api: String,

    #[serde(default = "default_github_raw")]
    pub github_raw: String,

    #[serde(default = "default_gitlab_api")]
    pub gitlab_api: String,

    /// Storage domain appended to the account ID.
    #[serde(default = "default_r2_domain")]
    pub r2_domain: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            github_api: default_github_api(),
            github_raw: default_github_raw(),
            gitlab_api: default_gitlab_api(),
            r2_domain: default_r2_domain(),
        }
    }
}

/// Status page configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusConfig {
    /// Case-sensitive path segment that triggers the status report.
    #[serde(default, alias = "password")]
    pub secret: String,
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Whether successful content responses are cached.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lifetime in seconds, also advertised as `s-maxage`.
    #[serde(default = "default_max_age")]
    pub max_age: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age: default_max_age(),
        }
    }
}

/// Outbound HTTP configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_upstream_timeout")]
    pub timeout: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout: default_upstream_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_user_agent() -> String {
    "mirrorgate".to_string()
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_github_raw() -> String {
    "https://raw.githubusercontent.com".to_string()
}

fn default_gitlab_api() -> String {
    "https://gitlab.com/api/v4".to_string()
}

fn default_r2_domain() -> String {
    "r2.cloudflarestorage.com".to_string()
}

fn default_max_age() -> u64 {
    31_556_952 // one Gregorian year
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from YAML text. An empty document yields defaults.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.sources.branch, "main");
        assert_eq!(config.cache.max_age, 31_556_952);
        assert_eq!(config.endpoints.r2_domain, "r2.cloudflarestorage.com");
        assert!(config.sources.gitlab.is_empty());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
sources:
  dir: images
  github:
    username: octo
    token: ghp_secret
    repos: [pics-a, pics-b]
  gitlab:
    - {{ name: mirror-1, id: "123", token: glpat }}
  r2:
    - name: main
      account_id: acc
      access_key_id: AKID
      secret_access_key: SECRET
      bucket: assets
cache:
  max_age: 600
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.sources.dir, "images");
        assert_eq!(config.sources.github.repos, vec!["pics-a", "pics-b"]);
        assert_eq!(config.sources.gitlab[0].id, "123");
        assert_eq!(config.sources.r2[0].bucket, "assets");
        assert_eq!(config.cache.max_age, 600);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_status_secret_prefers_explicit_value() {
        let config = parse_config(
            "status: { secret: letmein }\nsources: { github: { token: ghp } }",
        )
        .unwrap();
        assert_eq!(config.status_secret(), Some("letmein"));
    }

    #[test]
    fn test_status_secret_falls_back_to_github_token() {
        let config = parse_config("sources: { github: { token: ghp } }").unwrap();
        assert_eq!(config.status_secret(), Some("ghp"));
    }

    #[test]
    fn test_status_secret_disabled_when_blank() {
        let config = parse_config("status: { secret: '  ' }").unwrap();
        assert_eq!(config.status_secret(), None);
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../mirrorgate.example.yaml")).unwrap();
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.sources.dir, "images");
        assert!(config.sources.r2.is_empty());
        assert_eq!(config.status_secret(), None);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(load_config("/nonexistent/mirrorgate.yaml").is_err());
    }
}
