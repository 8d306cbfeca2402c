use config::{Config, ConfigError};
use serde::{Deserialize, Deserializer};
use std::env;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::stats::{LogStats, MetricsStats, NoopStats, Stats};

/// Environment variables that choose where settings come from rather than
/// being settings themselves
const CONTROL_KEYS: [&str; 2] = ["config_dir", "config_run_mode"];

static ENV_VAR_REFERENCE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("env var pattern is valid")
});

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub aws: AwsSettings,
    #[serde(default)]
    pub tagger: TaggerSettings,
    #[serde(default)]
    pub stats: StatsSettings,
}

/// AWS session configuration
///
/// All fields are optional; by default the standard AWS credential chain
/// is used (env vars, shared profile, IAM role).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AwsSettings {
    /// Optional: AWS access key ID (if not using IAM role)
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Optional: AWS secret access key (if not using IAM role)
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Optional: session token for temporary static credentials
    #[serde(default)]
    pub session_token: Option<String>,
    /// Shared config profile (ignored when static credentials are set)
    #[serde(default)]
    pub profile: Option<String>,
    /// Override the ECR endpoint (e.g. a LocalStack URL)
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_call_timeout_secs() -> u64 {
    30
}

/// Accept a count of seconds as a number (config files) or a string
/// (environment overrides, which are never type-parsed)
fn deserialize_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Secs {
        Number(u64),
        Text(String),
    }

    match Secs::deserialize(deserializer)? {
        Secs::Number(secs) => Ok(secs),
        Secs::Text(text) => text.trim().parse().map_err(|_| {
            serde::de::Error::custom(format!(
                "expected a number of seconds, found '{}'",
                text
            ))
        }),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TaggerSettings {
    /// Deadline for each remote registry call in seconds; 0 disables it
    /// Default: 30
    #[serde(
        default = "default_call_timeout_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub call_timeout_secs: u64,
}

impl Default for TaggerSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl TaggerSettings {
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}

/// Where failure counters go
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatsBackend {
    /// The `metrics` facade (requires the host to install a recorder)
    Metrics,
    /// One tracing event per increment
    #[default]
    Log,
    None,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StatsSettings {
    #[serde(default)]
    pub backend: StatsBackend,
    /// Prefix prepended to counter names (metrics backend only)
    #[serde(default)]
    pub prefix: Option<String>,
}

impl StatsSettings {
    pub fn build(&self) -> Arc<dyn Stats> {
        match self.backend {
            StatsBackend::Metrics => Arc::new(MetricsStats::new(self.prefix.clone())),
            StatsBackend::Log => Arc::new(LogStats),
            StatsBackend::None => Arc::new(NoopStats),
        }
    }
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        ENV_VAR_REFERENCE
            .replace_all(s, |caps: &regex::Captures| {
                let default_value = caps.get(2).map(|m| m.as_str());
                match env::var(&caps[1]) {
                    Ok(val) => val,
                    Err(_) => default_value.unwrap_or("").to_string(),
                }
            })
            .to_string()
    }

    /// Convert a config::Value to a serde_json::Value, performing environment variable substitution
    fn config_value_to_json(value: &config::Value) -> serde_json::Value {
        use config::ValueKind;

        match &value.kind {
            ValueKind::Nil => serde_json::Value::Null,
            ValueKind::Boolean(b) => serde_json::Value::Bool(*b),
            ValueKind::I64(i) => serde_json::Value::Number((*i).into()),
            ValueKind::I128(i) => serde_json::Value::Number((*i as i64).into()),
            ValueKind::U64(u) => serde_json::Value::Number((*u).into()),
            ValueKind::U128(u) => serde_json::Value::Number((*u as u64).into()),
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueKind::String(s) => {
                serde_json::Value::String(Self::substitute_env_vars_in_string(s))
            }
            ValueKind::Table(table) => serde_json::Value::Object(
                table
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::config_value_to_json(v)))
                    .collect(),
            ),
            ValueKind::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(Self::config_value_to_json).collect())
            }
        }
    }

    /// Add `<config_dir>/<name>.{toml,yaml,yml}` if one exists
    fn try_add_config_file(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        config_dir: &str,
        name: &str,
    ) -> config::ConfigBuilder<config::builder::DefaultState> {
        for ext in ["toml", "yaml", "yml"] {
            let path = format!("{}/{}.{}", config_dir, name, ext);
            if std::path::Path::new(&path).exists() {
                tracing::info!("Loading config file: {}", path);
                return builder.add_source(config::File::with_name(&path));
            }
        }

        tracing::debug!(
            "Optional config file not found: {}/{}.{{toml,yaml,yml}}",
            config_dir,
            name
        );
        builder
    }

    /// Load settings from `ECR_TAGGER_CONFIG_DIR` (default "config") for the
    /// run mode in `ECR_TAGGER_CONFIG_RUN_MODE` (default "development")
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode =
            env::var("ECR_TAGGER_CONFIG_RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = env::var("ECR_TAGGER_CONFIG_DIR").unwrap_or_else(|_| "config".into());
        Self::load(&config_dir, &run_mode)
    }

    /// Load settings from an explicit directory and run mode
    ///
    /// Files are layered default → run mode → local, all optional, and
    /// `ECR_TAGGER_<SECTION>__<KEY>` environment variables override them.
    /// Override values are taken verbatim as strings.
    pub fn load(config_dir: &str, run_mode: &str) -> Result<Self, ConfigError> {
        let (settings, unused_fields) = Self::load_with_env(config_dir, run_mode, None)?;
        for field in &unused_fields {
            tracing::warn!("Unknown configuration field: {}", field);
        }
        Ok(settings)
    }

    /// Load settings, reading overrides from `env_source` instead of the
    /// process environment when given
    ///
    /// Returns the settings together with the configuration keys that
    /// matched no field.
    fn load_with_env(
        config_dir: &str,
        run_mode: &str,
        env_source: Option<config::Map<String, String>>,
    ) -> Result<(Self, Vec<String>), ConfigError> {
        let mut builder = Config::builder();
        for name in ["default", run_mode, "local"] {
            builder = Self::try_add_config_file(builder, config_dir, name);
        }
        builder = builder.add_source(
            config::Environment::with_prefix("ECR_TAGGER")
                .prefix_separator("_")
                .separator("__")
                .source(env_source),
        );

        let config = builder.build()?;
        let mut root_value = config
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;
        for key in CONTROL_KEYS {
            root_value.remove(key);
        }

        let json_value = serde_json::Value::Object(
            root_value
                .iter()
                .map(|(k, v)| (k.clone(), Self::config_value_to_json(v)))
                .collect(),
        );

        let mut unused_fields = Vec::new();
        let settings: Settings = serde_ignored::deserialize(json_value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        settings.validate()?;
        Ok((settings, unused_fields))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.aws.access_key_id.is_some() != self.aws.secret_access_key.is_some() {
            return Err(ConfigError::Message(
                "aws.access_key_id and aws.secret_access_key must be set together".to_string(),
            ));
        }
        if let Some(url) = &self.aws.endpoint_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Message(format!(
                    "aws.endpoint_url must be an http(s) URL. Got: '{}'",
                    url
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn load_yaml(contents: &str) -> Result<Settings, ConfigError> {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("default.yaml"), contents).unwrap();
        Settings::load(temp_dir.path().to_str().unwrap(), "test")
    }

    fn load_with_vars(vars: &[(&str, &str)]) -> Result<(Settings, Vec<String>), ConfigError> {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("default.toml"),
            "[aws]\nprofile = \"default\"\n",
        )
        .unwrap();
        let env_source = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::load_with_env(temp_dir.path().to_str().unwrap(), "test", Some(env_source))
    }

    #[test]
    fn test_substitute_env_vars_in_string_basic() {
        env::set_var("ECR_TAGGER_TEST_VAR", "test_value");
        let result = Settings::substitute_env_vars_in_string("${ECR_TAGGER_TEST_VAR}");
        assert_eq!(result, "test_value");
        env::remove_var("ECR_TAGGER_TEST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_in_string_with_default() {
        env::remove_var("ECR_TAGGER_MISSING_VAR");
        let result =
            Settings::substitute_env_vars_in_string("${ECR_TAGGER_MISSING_VAR:-default_value}");
        assert_eq!(result, "default_value");
    }

    #[test]
    fn test_substitute_env_vars_in_string_no_substitution() {
        let result = Settings::substitute_env_vars_in_string("plain_value");
        assert_eq!(result, "plain_value");
    }

    #[test]
    fn test_defaults_without_config_files() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load(temp_dir.path().to_str().unwrap(), "test").unwrap();

        assert_eq!(settings.tagger.call_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(settings.stats.backend, StatsBackend::Log);
        assert!(settings.aws.access_key_id.is_none());
    }

    #[test]
    fn test_load_yaml() {
        let settings = load_yaml(
            r#"
aws:
  profile: "ci"
  endpoint_url: "http://localhost:4566"
tagger:
  call_timeout_secs: 0
stats:
  backend: "metrics"
  prefix: "cd"
"#,
        )
        .unwrap();

        assert_eq!(settings.aws.profile.as_deref(), Some("ci"));
        assert_eq!(settings.tagger.call_timeout(), None);
        assert_eq!(settings.stats.backend, StatsBackend::Metrics);
        assert_eq!(settings.stats.prefix.as_deref(), Some("cd"));
    }

    #[test]
    fn test_run_mode_overrides_default() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("default.toml"),
            "[tagger]\ncall_timeout_secs = 10\n",
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("production.toml"),
            "[tagger]\ncall_timeout_secs = 60\n",
        )
        .unwrap();

        let settings = Settings::load(temp_dir.path().to_str().unwrap(), "production").unwrap();
        assert_eq!(settings.tagger.call_timeout_secs, 60);
    }

    #[test]
    fn test_unused_fields_do_not_fail() {
        let result = load_yaml(
            r#"
tagger:
  call_timeout_secs: 5
  unknown_field: "should trigger warning"
unknown_top_level: "also unknown"
"#,
        );
        assert!(
            result.is_ok(),
            "Config should load despite unknown fields: {:?}",
            result.err()
        );
    }

    #[test]
    fn test_partial_static_credentials_rejected() {
        let result = load_yaml(
            r#"
aws:
  access_key_id: "AKIAEXAMPLE"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_endpoint_url_rejected() {
        let result = load_yaml(
            r#"
aws:
  endpoint_url: "localhost:4566"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_stats_backend_none() {
        let settings = load_yaml("stats:\n  backend: none\n").unwrap();
        assert_eq!(settings.stats.backend, StatsBackend::None);
        // NoopStats accepts increments silently
        settings.stats.build().inc_count("ecr.batchget.web.failure");
    }

    #[test]
    fn test_env_override_keeps_numeric_looking_strings() {
        let (settings, _) = load_with_vars(&[
            ("ECR_TAGGER_AWS__PROFILE", "123456789012"),
            ("ECR_TAGGER_AWS__ACCESS_KEY_ID", "123456"),
            ("ECR_TAGGER_AWS__SECRET_ACCESS_KEY", "true"),
            ("ECR_TAGGER_STATS__PREFIX", "2024"),
        ])
        .unwrap();

        assert_eq!(settings.aws.profile.as_deref(), Some("123456789012"));
        assert_eq!(settings.aws.access_key_id.as_deref(), Some("123456"));
        assert_eq!(settings.aws.secret_access_key.as_deref(), Some("true"));
        assert_eq!(settings.stats.prefix.as_deref(), Some("2024"));
    }

    #[test]
    fn test_env_override_of_call_timeout() {
        let (settings, _) = load_with_vars(&[("ECR_TAGGER_TAGGER__CALL_TIMEOUT_SECS", "7")]).unwrap();
        assert_eq!(settings.tagger.call_timeout(), Some(Duration::from_secs(7)));

        let result = load_with_vars(&[("ECR_TAGGER_TAGGER__CALL_TIMEOUT_SECS", "soon")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_location_vars_are_not_settings() {
        let (settings, unused_fields) = load_with_vars(&[
            ("ECR_TAGGER_CONFIG_DIR", "/etc/ecr-tagger"),
            ("ECR_TAGGER_CONFIG_RUN_MODE", "production"),
            ("ECR_TAGGER_STATS__BACKEND", "none"),
        ])
        .unwrap();

        assert!(unused_fields.is_empty(), "unexpected: {:?}", unused_fields);
        assert_eq!(settings.aws.profile.as_deref(), Some("default"));
        assert_eq!(settings.stats.backend, StatsBackend::None);
    }

    #[test]
    fn test_unknown_env_override_is_reported() {
        let (_, unused_fields) = load_with_vars(&[("ECR_TAGGER_TAGGER__RETRIES", "3")]).unwrap();
        assert_eq!(unused_fields, vec!["tagger.retries"]);
    }
}
