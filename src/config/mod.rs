// Configuration module

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::logging::LogFormat;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub origin: OriginConfig,
    /// Supported locale codes; the first one is the default locale
    pub locales: Vec<String>,
    #[serde(default)]
    pub routing: RoutingConfig,
    pub redirects: RedirectsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Worker threads for the proxy service
    #[serde(default = "default_threads")]
    pub threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            threads: default_threads(),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

fn default_address() -> String {
    DEFAULT_LISTEN_ADDRESS.to_string()
}

fn default_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_threads() -> usize {
    DEFAULT_THREADS
}

/// The rendering origin every non-redirected request is forwarded to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    /// Connect/read/write timeout in seconds (default: 30)
    #[serde(default = "default_origin_timeout")]
    pub timeout_secs: u64,
}

fn default_origin_timeout() -> u64 {
    DEFAULT_ORIGIN_TIMEOUT_SECS
}

/// CMS preview handshake parameters and endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "default_preview_key_param")]
    pub key_param: String,
    #[serde(default = "default_preview_exit_param")]
    pub exit_param: String,
    #[serde(default = "default_preview_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_preview_exit_endpoint")]
    pub exit_endpoint: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            key_param: default_preview_key_param(),
            exit_param: default_preview_exit_param(),
            endpoint: default_preview_endpoint(),
            exit_endpoint: default_preview_exit_endpoint(),
        }
    }
}

fn default_preview_key_param() -> String {
    DEFAULT_PREVIEW_KEY_PARAM.to_string()
}

fn default_preview_exit_param() -> String {
    DEFAULT_PREVIEW_EXIT_PARAM.to_string()
}

fn default_preview_endpoint() -> String {
    DEFAULT_PREVIEW_ENDPOINT.to_string()
}

fn default_preview_exit_endpoint() -> String {
    DEFAULT_PREVIEW_EXIT_ENDPOINT.to_string()
}

/// Routing pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Paths under this prefix bypass the locale and smuggling rewrites
    #[serde(default = "default_docs_prefix")]
    pub docs_prefix: String,
    /// Framework-internal prefixes that never get a locale rewrite
    #[serde(default = "default_internal_prefixes")]
    pub internal_prefixes: Vec<String>,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default = "default_content_id_param")]
    pub content_id_param: String,
    #[serde(default = "default_content_endpoint")]
    pub content_endpoint: String,
    #[serde(default = "default_lang_param")]
    pub lang_param: String,
    /// Query parameters carried through the rewrite inside the path
    #[serde(default = "default_smuggled_params")]
    pub smuggled_params: Vec<String>,
    #[serde(default = "default_smuggled_max_length")]
    pub smuggled_max_length: usize,
    #[serde(default = "default_relative_ttl")]
    pub relative_redirect_ttl_secs: u64,
    #[serde(default = "default_absolute_ttl")]
    pub absolute_redirect_ttl_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            docs_prefix: default_docs_prefix(),
            internal_prefixes: default_internal_prefixes(),
            preview: PreviewConfig::default(),
            content_id_param: default_content_id_param(),
            content_endpoint: default_content_endpoint(),
            lang_param: default_lang_param(),
            smuggled_params: default_smuggled_params(),
            smuggled_max_length: default_smuggled_max_length(),
            relative_redirect_ttl_secs: default_relative_ttl(),
            absolute_redirect_ttl_secs: default_absolute_ttl(),
        }
    }
}

fn default_docs_prefix() -> String {
    DEFAULT_DOCS_PREFIX.to_string()
}

fn default_internal_prefixes() -> Vec<String> {
    DEFAULT_INTERNAL_PREFIXES.iter().map(|p| p.to_string()).collect()
}

fn default_content_id_param() -> String {
    DEFAULT_CONTENT_ID_PARAM.to_string()
}

fn default_content_endpoint() -> String {
    DEFAULT_CONTENT_ENDPOINT.to_string()
}

fn default_lang_param() -> String {
    DEFAULT_LANG_PARAM.to_string()
}

fn default_smuggled_params() -> Vec<String> {
    DEFAULT_SMUGGLED_PARAMS.iter().map(|p| p.to_string()).collect()
}

fn default_smuggled_max_length() -> usize {
    DEFAULT_SMUGGLED_MAX_LENGTH
}

fn default_relative_ttl() -> u64 {
    DEFAULT_RELATIVE_REDIRECT_TTL_SECS
}

fn default_absolute_ttl() -> u64 {
    DEFAULT_ABSOLUTE_REDIRECT_TTL_SECS
}

/// Redirect table persistence and refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
    #[serde(default = "default_filter_file")]
    pub filter_file: String,
    /// Target false positive rate of the bloom filter (default: 1e-4)
    #[serde(default = "default_false_positive_rate")]
    pub false_positive_rate: f64,
    /// Seconds between background refreshes; 0 disables them
    #[serde(default)]
    pub refresh_interval_secs: u64,
    /// Shared secret signing CMS rebuild webhooks; webhooks are refused
    /// when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    pub cms: CmsConfig,
}

impl Default for RedirectsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_file: default_snapshot_file(),
            filter_file: default_filter_file(),
            false_positive_rate: default_false_positive_rate(),
            refresh_interval_secs: 0,
            webhook_secret: None,
            cms: CmsConfig::default(),
        }
    }
}

impl RedirectsConfig {
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    pub fn filter_path(&self) -> PathBuf {
        self.data_dir.join(&self.filter_file)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_snapshot_file() -> String {
    DEFAULT_SNAPSHOT_FILE.to_string()
}

fn default_filter_file() -> String {
    DEFAULT_FILTER_FILE.to_string()
}

fn default_false_positive_rate() -> f64 {
    DEFAULT_FALSE_POSITIVE_RATE
}

/// CMS redirect endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmsConfig {
    pub base_url: String,
    #[serde(default = "default_cms_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_cms_api_key_header")]
    pub api_key_header: String,
    #[serde(default = "default_cms_timeout")]
    pub timeout_secs: u64,
}

impl Default for CmsConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            path: default_cms_path(),
            api_key: None,
            api_key_header: default_cms_api_key_header(),
            timeout_secs: default_cms_timeout(),
        }
    }
}

fn default_cms_path() -> String {
    DEFAULT_CMS_REDIRECTS_PATH.to_string()
}

fn default_cms_api_key_header() -> String {
    DEFAULT_CMS_API_KEY_HEADER.to_string()
}

fn default_cms_timeout() -> u64 {
    DEFAULT_CMS_TIMEOUT_SECS
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl Config {
    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, String> {
        // Replace ${VAR_NAME} with environment variable values
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").map_err(|e| e.to_string())?;

        // First, check that all referenced environment variables exist
        for caps in re.captures_iter(yaml) {
            let var_name = &caps[1];
            std::env::var(var_name).map_err(|_| {
                format!(
                    "Environment variable '{}' is referenced but not set",
                    var_name
                )
            })?;
        }

        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        });

        serde_yaml::from_str(&substituted).map_err(|e| e.to_string())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_yaml_with_env(&yaml)
    }

    pub fn default_locale(&self) -> Option<&str> {
        self.locales.first().map(String::as_str)
    }

    pub fn validate(&self) -> Result<(), String> {
        // Locales
        if self.locales.is_empty() {
            return Err("At least one locale must be configured".to_string());
        }
        let mut seen_locales = HashSet::new();
        for locale in &self.locales {
            if locale.is_empty() || locale.contains('/') {
                return Err(format!("Invalid locale code '{}'", locale));
            }
            if !seen_locales.insert(locale.as_str()) {
                return Err(format!("Duplicate locale '{}'", locale));
            }
        }

        // Origin
        if self.origin.host.is_empty() {
            return Err("Origin host cannot be empty".to_string());
        }
        if self.origin.port == 0 {
            return Err("Origin port cannot be 0".to_string());
        }
        if self.server.threads == 0 {
            return Err("Server threads must be greater than 0".to_string());
        }

        // Routing prefixes and endpoints must be absolute paths
        let routing = &self.routing;
        let paths = [
            ("routing.docs_prefix", &routing.docs_prefix),
            ("routing.content_endpoint", &routing.content_endpoint),
            ("routing.preview.endpoint", &routing.preview.endpoint),
            ("routing.preview.exit_endpoint", &routing.preview.exit_endpoint),
        ];
        for (name, value) in paths {
            if !value.starts_with('/') {
                return Err(format!("{} must start with '/' (got '{}')", name, value));
            }
        }
        for prefix in &routing.internal_prefixes {
            if !prefix.starts_with('/') {
                return Err(format!(
                    "routing.internal_prefixes entry must start with '/' (got '{}')",
                    prefix
                ));
            }
        }
        let params = [
            ("routing.content_id_param", &routing.content_id_param),
            ("routing.lang_param", &routing.lang_param),
            ("routing.preview.key_param", &routing.preview.key_param),
            ("routing.preview.exit_param", &routing.preview.exit_param),
        ];
        for (name, value) in params {
            if value.is_empty() {
                return Err(format!("{} cannot be empty", name));
            }
        }
        if routing.smuggled_max_length == 0 {
            return Err("routing.smuggled_max_length must be greater than 0".to_string());
        }
        if routing.relative_redirect_ttl_secs == 0 || routing.absolute_redirect_ttl_secs == 0 {
            return Err("Redirect cache TTLs must be greater than 0".to_string());
        }

        // Redirect table
        let redirects = &self.redirects;
        let rate = redirects.false_positive_rate;
        if !(rate > 0.0 && rate < 1.0) {
            return Err(format!(
                "redirects.false_positive_rate must be between 0 and 1 (got {})",
                rate
            ));
        }
        if redirects.snapshot_file.is_empty() || redirects.filter_file.is_empty() {
            return Err("Redirect artifact file names cannot be empty".to_string());
        }
        if redirects.snapshot_file == redirects.filter_file {
            return Err("Snapshot and filter must be stored in different files".to_string());
        }
        if !(redirects.cms.base_url.starts_with("http://")
            || redirects.cms.base_url.starts_with("https://"))
        {
            return Err(format!(
                "redirects.cms.base_url must be an http(s) URL (got '{}')",
                redirects.cms.base_url
            ));
        }
        if !redirects.cms.path.starts_with('/') {
            return Err("redirects.cms.path must start with '/'".to_string());
        }
        if redirects.cms.timeout_secs == 0 {
            return Err("redirects.cms.timeout_secs must be greater than 0".to_string());
        }
        if let Some(secret) = &redirects.webhook_secret {
            if secret.is_empty() {
                return Err("redirects.webhook_secret cannot be empty when set".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
origin:
  host: "render.internal"
  port: 3000
locales: ["en", "de", "fr"]
redirects:
  cms:
    base_url: "https://cms.example.com"
"#;

    #[test]
    fn test_config_can_be_loaded_from_file_path() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(MINIMAL.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.origin.host, "render.internal");
        assert_eq!(config.origin.port, 3000);
        assert_eq!(config.default_locale(), Some("en"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_are_applied() {
        let config = Config::from_yaml_with_env(MINIMAL).unwrap();

        assert_eq!(config.server.listen_addr(), "0.0.0.0:8080");
        assert_eq!(config.routing.docs_prefix, "/docs");
        assert_eq!(config.routing.internal_prefixes, vec!["/_next", "/api"]);
        assert_eq!(config.routing.preview.key_param, "previewKey");
        assert_eq!(config.routing.smuggled_params, vec!["audience", "region", "q"]);
        assert_eq!(config.routing.smuggled_max_length, 512);
        assert_eq!(config.routing.relative_redirect_ttl_secs, 600);
        assert_eq!(config.routing.absolute_redirect_ttl_secs, 3600);
        assert_eq!(config.redirects.false_positive_rate, 1e-4);
        assert_eq!(config.redirects.refresh_interval_secs, 0);
        assert_eq!(
            config.redirects.snapshot_path(),
            PathBuf::from("data/redirects.json")
        );
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("CMS_EDGE_TEST_API_KEY", "secret-key");
        let yaml = format!(
            "{}    api_key: \"${{CMS_EDGE_TEST_API_KEY}}\"\n",
            MINIMAL
        );
        let config = Config::from_yaml_with_env(&yaml).unwrap();
        assert_eq!(config.redirects.cms.api_key.as_deref(), Some("secret-key"));
    }

    #[test]
    fn test_missing_env_var_is_an_error() {
        let yaml = MINIMAL.replace("render.internal", "${CMS_EDGE_TEST_UNSET_VAR}");
        let err = Config::from_yaml_with_env(&yaml).unwrap_err();
        assert!(err.contains("CMS_EDGE_TEST_UNSET_VAR"));
    }

    #[test]
    fn test_validation_rejects_bad_locales() {
        let mut config = Config::from_yaml_with_env(MINIMAL).unwrap();
        config.locales.clear();
        assert!(config.validate().is_err());

        config.locales = vec!["en".to_string(), "en".to_string()];
        assert!(config.validate().unwrap_err().contains("Duplicate"));

        config.locales = vec!["en/us".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_relative_prefixes() {
        let mut config = Config::from_yaml_with_env(MINIMAL).unwrap();
        config.routing.docs_prefix = "docs".to_string();
        assert!(config.validate().unwrap_err().contains("docs_prefix"));

        let mut config = Config::from_yaml_with_env(MINIMAL).unwrap();
        config.routing.internal_prefixes.push("_next".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_redirect_settings() {
        let mut config = Config::from_yaml_with_env(MINIMAL).unwrap();
        config.redirects.false_positive_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml_with_env(MINIMAL).unwrap();
        config.redirects.cms.base_url = "cms.example.com".to_string();
        assert!(config.validate().unwrap_err().contains("base_url"));

        let mut config = Config::from_yaml_with_env(MINIMAL).unwrap();
        config.redirects.filter_file = config.redirects.snapshot_file.clone();
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml_with_env(MINIMAL).unwrap();
        config.routing.smuggled_max_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_origin_fails_to_parse() {
        let yaml = r#"
locales: ["en"]
redirects:
  cms:
    base_url: "https://cms.example.com"
"#;
        assert!(Config::from_yaml_with_env(yaml).is_err());
    }
}
