use config::{Config, ConfigError};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::keys::KeyCacheConfig;
use crate::trust::pattern::SubjectPattern;
use crate::trust::role::{PolicyStatement, Role, TrustCondition};
use crate::trust::store::RoleSet;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    #[serde(default)]
    pub keys: KeySettings,
    #[serde(default)]
    pub roles: Vec<RoleConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Public URL of this broker; used as the issuer of session tokens
    pub public_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// HMAC secret for session token signing (base64-encoded, minimum 32 bytes)
    /// Generate with: openssl rand -base64 32
    pub signing_secret: String,

    /// Reject identity tokens whose jti has already been exchanged
    #[serde(default = "default_replay_protection")]
    pub replay_protection: bool,
}

fn default_replay_protection() -> bool {
    true
}

/// JWKS cache tuning. The defaults match common IdP rotation cadence: keys
/// are served from cache for an hour and never past a day.
#[derive(Debug, Deserialize, Clone)]
pub struct KeySettings {
    #[serde(default = "default_soft_ttl_secs")]
    pub soft_ttl_secs: u64,
    #[serde(default = "default_hard_ttl_secs")]
    pub hard_ttl_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_soft_ttl_secs() -> u64 {
    3600
}

fn default_hard_ttl_secs() -> u64 {
    86400
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    2
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            soft_ttl_secs: default_soft_ttl_secs(),
            hard_ttl_secs: default_hard_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl KeySettings {
    pub fn cache_config(&self) -> KeyCacheConfig {
        KeyCacheConfig {
            soft_ttl: Duration::from_secs(self.soft_ttl_secs),
            hard_ttl: Duration::from_secs(self.hard_ttl_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoleConfig {
    pub name: String,

    /// Maximum credential lifetime in seconds (default: 3600)
    #[serde(default = "default_max_session_duration_secs")]
    pub max_session_duration_secs: u64,

    pub trust_conditions: Vec<TrustConditionConfig>,

    #[serde(default)]
    pub permission_policy: Vec<PolicyStatement>,
}

fn default_max_session_duration_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrustConditionConfig {
    pub issuer: String,
    pub audience: String,
    pub subject: String,
}

impl RoleConfig {
    /// Compile into an evaluable role, validating every subject pattern.
    pub fn compile(&self) -> anyhow::Result<Role> {
        let mut conditions = Vec::with_capacity(self.trust_conditions.len());
        for condition in &self.trust_conditions {
            let subject = SubjectPattern::compile(&condition.subject).map_err(|err| {
                anyhow::anyhow!(
                    "role '{}': invalid subject pattern '{}': {}",
                    self.name,
                    condition.subject,
                    err
                )
            })?;
            conditions.push(TrustCondition {
                issuer: condition.issuer.clone(),
                audience: condition.audience.clone(),
                subject,
            });
        }
        Ok(Role {
            name: self.name.clone(),
            trust_conditions: conditions,
            permission_policy: self.permission_policy.clone(),
            max_session: Duration::from_secs(self.max_session_duration_secs),
        })
    }
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        let re = regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();

        re.replace_all(s, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match env::var(var_name) {
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
            ValueKind::Table(table) => {
                let mut map = serde_json::Map::new();
                for (k, v) in table.iter() {
                    map.insert(k.clone(), Self::config_value_to_json(v));
                }
                serde_json::Value::Object(map)
            }
            ValueKind::Array(arr) => {
                let vec: Vec<serde_json::Value> =
                    arr.iter().map(Self::config_value_to_json).collect();
                serde_json::Value::Array(vec)
            }
        }
    }

    /// Try to add a config file with multiple extension attempts (.toml, .yaml, .yml)
    /// Returns Ok(true) if a file was loaded, Ok(false) if no file found (when not required)
    fn try_add_config_file(
        builder: &mut config::ConfigBuilder<config::builder::DefaultState>,
        config_dir: &str,
        name: &str,
        required: bool,
    ) -> Result<bool, ConfigError> {
        let extensions = ["toml", "yaml", "yml"];

        for ext in extensions {
            let path = format!("{}/{}.{}", config_dir, name, ext);
            if std::path::Path::new(&path).exists() {
                tracing::info!("Loading config file: {}", path);
                *builder = builder
                    .clone()
                    .add_source(config::File::with_name(&format!("{}/{}", config_dir, name)));
                return Ok(true);
            }
        }

        if required {
            Err(ConfigError::Message(format!(
                "Required config file not found: {}/{}.{{toml,yaml,yml}}",
                config_dir, name
            )))
        } else {
            tracing::debug!(
                "Optional config file not found: {}/{}.{{toml,yaml,yml}}",
                config_dir,
                name
            );
            Ok(false)
        }
    }

    pub fn new() -> Result<Self, ConfigError> {
        let run_mode =
            env::var("TRUSTGATE_CONFIG_RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = env::var("TRUSTGATE_CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let mut builder = Config::builder();

        // Load config files in order, trying both .toml and .yaml/.yml extensions

        // 1. Load default config (required)
        Self::try_add_config_file(&mut builder, &config_dir, "default", true)?;

        // 2. Load environment-specific config (optional)
        Self::try_add_config_file(&mut builder, &config_dir, &run_mode, false)?;

        // 3. Load local config (optional, not checked into git)
        Self::try_add_config_file(&mut builder, &config_dir, "local", false)?;

        let config = builder.build()?;

        // Convert to JSON with env var substitution in string values
        let root_value = config
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;

        let mut json_map = serde_json::Map::new();
        for (k, v) in root_value.iter() {
            json_map.insert(k.clone(), Self::config_value_to_json(v));
        }
        let json_value = serde_json::Value::Object(json_map);

        // Deserialize from JSON value and collect unused fields
        let mut unused_fields = Vec::new();
        let mut settings: Settings = serde_ignored::deserialize(json_value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field: {}", field);
        }

        // TRUSTGATE_SIGNING_SECRET takes precedence over the config file, so
        // the secret never has to live on disk.
        if let Ok(secret) = env::var("TRUSTGATE_SIGNING_SECRET") {
            if !secret.is_empty() {
                settings.broker.signing_secret = secret;
            }
        }

        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.signing_secret.is_empty() {
            return Err(ConfigError::Message(
                "Signing secret not configured. Set TRUSTGATE_SIGNING_SECRET or [broker] signing_secret in config. Generate with: openssl rand -base64 32".to_string()
            ));
        }

        if self.keys.hard_ttl_secs < self.keys.soft_ttl_secs {
            return Err(ConfigError::Message(format!(
                "[keys] hard_ttl_secs ({}) must not be smaller than soft_ttl_secs ({})",
                self.keys.hard_ttl_secs, self.keys.soft_ttl_secs
            )));
        }

        for role in &self.roles {
            if role.trust_conditions.is_empty() {
                return Err(ConfigError::Message(format!(
                    "Role '{}' has no trust conditions and could never be assumed",
                    role.name
                )));
            }
            for condition in &role.trust_conditions {
                let issuer = url::Url::parse(&condition.issuer).map_err(|e| {
                    ConfigError::Message(format!(
                        "Role '{}': invalid issuer URL '{}': {}",
                        role.name, condition.issuer, e
                    ))
                })?;
                if issuer.scheme() != "https" && issuer.scheme() != "http" {
                    return Err(ConfigError::Message(format!(
                        "Role '{}': issuer '{}' must be an http(s) URL",
                        role.name, condition.issuer
                    )));
                }
                if condition.audience.is_empty() {
                    return Err(ConfigError::Message(format!(
                        "Role '{}' has a trust condition with an empty audience",
                        role.name
                    )));
                }
            }
        }

        // Patterns and duplicate names are caught here rather than at first use
        self.compile_roles()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(())
    }

    /// Compile all configured roles into an evaluable snapshot.
    pub fn compile_roles(&self) -> anyhow::Result<RoleSet> {
        let roles = self
            .roles
            .iter()
            .map(RoleConfig::compile)
            .collect::<anyhow::Result<Vec<_>>>()?;
        RoleSet::new(roles)
    }
}
