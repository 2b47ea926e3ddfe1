//! Shared configuration for provisync tools.
//!
//! TOML profiles and resource definitions, credential resolution
//! (env + keyring + plaintext), and translation to the runtime types in
//! `provisync_core` (`ClientContext`, `SubscriptionConfig`, `RestPollSource`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use provisync_api::poll::expand_template;
use provisync_api::{FieldKind, FieldSchema};
use provisync_core::{
    ClientContext, ResourceLayout, RestPollSource, StalePolicy, SubscriptionConfig, TlsMode,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const KEYRING_SERVICE: &str = "provisync";
const ENV_PREFIX: &str = "PROVISYNC_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },

    #[error("resource type '{name}' is not defined (add a [resources.{name}] table)")]
    UnknownResource { name: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,

    /// Resource types, keyed by the name used on the command line.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
            resources: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named backend profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// REST base URL (e.g., "https://dash.example.com/api/v1").
    pub base_url: String,

    /// Base for relative stream paths when push lives elsewhere
    /// (e.g., "wss://push.example.com/"). Defaults to `base_url`.
    pub stream_base: Option<String>,

    /// Bearer token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the token.
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,
}

/// How one resource type is synced.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResourceConfig {
    /// Push endpoint path; `{id}` is replaced by the resource id.
    pub stream_path: String,

    /// REST snapshot path; `{id}` is replaced by the resource id.
    pub poll_path: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    #[serde(default)]
    pub stale_policy: StalePolicy,

    #[serde(default = "default_children_field")]
    pub children_field: String,

    #[serde(default = "default_key_field")]
    pub key_field: String,

    pub timestamp_field: Option<String>,

    /// Required top-level fields of a snapshot and their JSON kind.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldKind>,

    /// Required fields of each child payload.
    #[serde(default)]
    pub child_fields: BTreeMap<String, FieldKind>,
}

fn default_poll_interval() -> u64 {
    10
}
fn default_stale_after() -> u64 {
    60
}
fn default_children_field() -> String {
    "children".into()
}
fn default_key_field() -> String {
    "id".into()
}

impl Config {
    /// Starter config written by `config init`.
    pub fn sample(base_url: &str) -> Self {
        let mut cfg = Self::default();
        cfg.profiles.insert(
            "default".into(),
            Profile {
                base_url: base_url.into(),
                token_env: Some("PROVISYNC_TOKEN".into()),
                ..Profile::default()
            },
        );
        cfg.resources.insert(
            "session".into(),
            ResourceConfig {
                stream_path: "stream/sessions/{id}".into(),
                poll_path: "sessions/{id}".into(),
                poll_interval_secs: default_poll_interval(),
                stale_after_secs: default_stale_after(),
                stale_policy: StalePolicy::default(),
                children_field: default_children_field(),
                key_field: default_key_field(),
                timestamp_field: Some("updated_at".into()),
                fields: BTreeMap::from([("children".to_owned(), FieldKind::Array)]),
                child_fields: BTreeMap::new(),
            },
        );
        cfg
    }

    /// Pick a profile by name, falling back to `default_profile`.
    /// Profile to use: `name`, else `default_profile`, else `"default"`.
    pub fn profile_name(&self, name: Option<&str>) -> String {
        name.or(self.default_profile.as_deref())
            .unwrap_or("default")
            .to_owned()
    }

    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = self.profile_name(name);
        match self.profiles.get(&name) {
            Some(profile) => Ok((name, profile)),
            None => Err(ConfigError::ProfileNotFound { name }),
        }
    }

    pub fn resource(&self, name: &str) -> Result<&ResourceConfig, ConfigError> {
        self.resources
            .get(name)
            .ok_or_else(|| ConfigError::UnknownResource { name: name.into() })
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "provisync", "provisync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("provisync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` merged with `PROVISYNC_`-prefixed environment variables.
///
/// Nested keys use a double underscore: `PROVISYNC_DEFAULTS__TIMEOUT=5`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Where a resolved token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Env,
    Keyring,
    Plaintext,
}

/// Resolve the bearer token: `token_env` → keyring → plaintext.
///
/// `None` means the profile runs unauthenticated.
pub fn resolve_token(
    profile: &Profile,
    profile_name: &str,
) -> Option<(SecretString, TokenSource)> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some((SecretString::from(val), TokenSource::Env));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name)) {
        if let Ok(secret) = entry.get_password() {
            return Some((SecretString::from(secret), TokenSource::Keyring));
        }
    }

    // 3. Plaintext in config
    profile
        .token
        .as_ref()
        .map(|token| (SecretString::from(token.clone()), TokenSource::Plaintext))
}

/// Store a token in the system keyring for `profile_name`.
pub fn store_token(profile_name: &str, token: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name))?;
    entry.set_password(token)?;
    Ok(())
}

fn keyring_user(profile_name: &str) -> String {
    format!("{profile_name}/token")
}

// ── Translation to runtime types ────────────────────────────────────

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}

/// Build the `ClientContext` for a profile.
///
/// `insecure` in the profile wins over `defaults.insecure`; a `ca_cert`
/// switches to custom-CA verification.
pub fn profile_to_context(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ClientContext, ConfigError> {
    let base_url = parse_url("base_url", &profile.base_url)?;

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    let timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    let mut context = ClientContext::new(base_url).with_tls(tls).with_timeout(timeout);
    if let Some((token, _)) = resolve_token(profile, profile_name) {
        context = context.with_token(token);
    }
    Ok(context)
}

fn field_schema(fields: &BTreeMap<String, FieldKind>) -> Option<FieldSchema> {
    let schema = fields
        .iter()
        .fold(FieldSchema::new(), |schema, (name, kind)| {
            schema.required(name.clone(), *kind)
        });
    (!schema.is_empty()).then_some(schema)
}

impl ResourceConfig {
    fn layout(&self) -> ResourceLayout {
        ResourceLayout {
            children_field: self.children_field.clone(),
            key_field: self.key_field.clone(),
            timestamp_field: self.timestamp_field.clone(),
        }
    }

    /// Resolve the push endpoint for one resource.
    pub fn stream_endpoint(
        &self,
        profile: &Profile,
        context: &ClientContext,
        resource_id: &str,
    ) -> Result<Url, ConfigError> {
        let path = expand_template(&self.stream_path, resource_id).map_err(|e| {
            ConfigError::Validation {
                field: "resource id".into(),
                reason: e.to_string(),
            }
        })?;
        let mut base = context.clone();
        if let Some(ref stream_base) = profile.stream_base {
            base.base_url = parse_url("stream_base", stream_base)?;
        }
        base.resolve(&path).map_err(|e| ConfigError::Validation {
            field: "stream_path".into(),
            reason: e.to_string(),
        })
    }

    /// Build the runtime subscription config for one resource.
    pub fn subscription_config(
        &self,
        profile: &Profile,
        context: &ClientContext,
        resource_id: &str,
    ) -> Result<SubscriptionConfig, ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Validation {
                field: "poll_interval_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }

        let endpoint = self.stream_endpoint(profile, context, resource_id)?;
        let mut config = SubscriptionConfig::new(endpoint)
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs))
            .with_stale_after(Duration::from_secs(self.stale_after_secs))
            .with_stale_policy(self.stale_policy)
            .with_layout(self.layout());
        if let Some(schema) = field_schema(&self.fields) {
            config = config.with_schema(Arc::new(schema));
        }
        if let Some(schema) = field_schema(&self.child_fields) {
            config = config.with_child_schema(Arc::new(schema));
        }
        Ok(config)
    }

    /// REST poll source for this resource type.
    pub fn poll_source(&self, context: Arc<ClientContext>) -> Result<RestPollSource, ConfigError> {
        RestPollSource::new(context, self.poll_path.clone()).map_err(|e| ConfigError::Validation {
            field: "poll_path".into(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;
    use secrecy::ExposeSecret;

    const SAMPLE: &str = r#"
default_profile = "lab"

[defaults]
timeout = 12

[profiles.lab]
base_url = "https://dash.lab.test/api/v1"
stream_base = "wss://push.lab.test/"
token = "plain-secret"
token_env = "PROVISYNC_TEST_TOKEN_THAT_IS_NEVER_SET"

[resources.session]
stream_path = "ws/sessions/{id}"
poll_path = "sessions/{id}"
poll_interval_secs = 5
stale_policy = "resnapshot"
timestamp_field = "updated_at"

[resources.session.fields]
title = "string"
children = "array"
"#;

    /// Run `f` with the sample written to a jailed directory.
    ///
    /// The jail serialises tests that touch the environment and restores it
    /// afterwards, so overrides set by one test never leak into another.
    fn with_sample(f: impl FnOnce(&mut Jail, &Path) -> figment::error::Result<()>) {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("config.toml", SAMPLE)?;
            let path = jail.directory().join("config.toml");
            f(jail, &path)
        });
    }

    #[test]
    fn loads_profiles_and_resources_with_defaults() {
        with_sample(|_, path| {
            let cfg = load_config_from(path).unwrap();

            assert_eq!(cfg.defaults.timeout, 12);
            assert_eq!(cfg.defaults.output, "table");

            let (name, profile) = cfg.profile(None).unwrap();
            assert_eq!(name, "lab");
            assert_eq!(profile.stream_base.as_deref(), Some("wss://push.lab.test/"));

            let session = cfg.resource("session").unwrap();
            assert_eq!(session.poll_interval_secs, 5);
            assert_eq!(session.stale_after_secs, 60);
            assert_eq!(session.stale_policy, StalePolicy::Resnapshot);
            assert_eq!(session.children_field, "children");
            assert_eq!(session.fields.get("title"), Some(&FieldKind::String));
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file_values() {
        with_sample(|jail, path| {
            jail.set_env("PROVISYNC_DEFAULTS__TIMEOUT", "5");
            jail.set_env("PROVISYNC_PROFILES__LAB__BASE_URL", "https://override.lab.test/api");
            jail.set_env("PROVISYNC_RESOURCES__SESSION__STALE_POLICY", "reconnect");

            let cfg = load_config_from(path).unwrap();
            assert_eq!(cfg.defaults.timeout, 5);

            let (name, profile) = cfg.profile(None).unwrap();
            assert_eq!(profile.base_url, "https://override.lab.test/api");
            // Untouched keys keep their file values.
            assert_eq!(profile.stream_base.as_deref(), Some("wss://push.lab.test/"));

            let session = cfg.resource("session").unwrap();
            assert_eq!(session.stale_policy, StalePolicy::Reconnect);
            assert_eq!(session.poll_interval_secs, 5);

            let context = profile_to_context(profile, &name, &cfg.defaults).unwrap();
            assert_eq!(context.timeout, Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn token_env_wins_over_plaintext() {
        with_sample(|jail, path| {
            let cfg = load_config_from(path).unwrap();
            let (name, profile) = cfg.profile(None).unwrap();
            let profile = Profile {
                token_env: Some("LAB_TOKEN".into()),
                ..profile.clone()
            };

            let (_, source) = resolve_token(&profile, &name).unwrap();
            assert_eq!(source, TokenSource::Plaintext);

            jail.set_env("LAB_TOKEN", "from-env");
            let (token, source) = resolve_token(&profile, &name).unwrap();
            assert_eq!(source, TokenSource::Env);
            assert_eq!(token.expose_secret(), "from-env");

            let context = profile_to_context(&profile, &name, &cfg.defaults).unwrap();
            assert_eq!(context.authorization().as_deref(), Some("Bearer from-env"));
            Ok(())
        });
    }

    #[test]
    fn missing_profile_and_resource_are_errors() {
        with_sample(|_, path| {
            let cfg = load_config_from(path).unwrap();
            assert!(matches!(
                cfg.profile(Some("prod")),
                Err(ConfigError::ProfileNotFound { .. })
            ));
            assert!(matches!(
                cfg.resource("device"),
                Err(ConfigError::UnknownResource { .. })
            ));
            Ok(())
        });
    }

    #[test]
    fn builds_runtime_config_from_profile_and_resource() {
        with_sample(|_, path| {
            let cfg = load_config_from(path).unwrap();
            let (name, profile) = cfg.profile(None).unwrap();
            let context = profile_to_context(profile, &name, &cfg.defaults).unwrap();

            assert_eq!(context.timeout, Duration::from_secs(12));
            assert_eq!(context.tls, TlsMode::System);
            assert_eq!(context.authorization().as_deref(), Some("Bearer plain-secret"));

            let session = cfg.resource("session").unwrap();
            let sub = session.subscription_config(profile, &context, "sess-42").unwrap();
            assert_eq!(sub.stream_endpoint.as_str(), "wss://push.lab.test/ws/sessions/sess-42");
            assert_eq!(sub.poll_interval, Duration::from_secs(5));
            assert_eq!(sub.stale_policy, StalePolicy::Resnapshot);
            assert_eq!(sub.layout.timestamp_field.as_deref(), Some("updated_at"));
            assert!(sub.schema.is_some());
            assert!(sub.child_schema.is_none());

            let escaped = session.subscription_config(profile, &context, "a/b").unwrap();
            assert_eq!(escaped.stream_endpoint.path(), "/ws/sessions/a%2Fb");
            assert!(matches!(
                session.subscription_config(profile, &context, ".."),
                Err(ConfigError::Validation { .. })
            ));

            let poll = session.poll_source(Arc::new(context)).unwrap();
            assert_eq!(
                poll.url_for("sess-42").unwrap().as_str(),
                "https://dash.lab.test/api/v1/sessions/sess-42"
            );
            Ok(())
        });
    }

    #[test]
    fn insecure_overrides_custom_ca() {
        let profile = Profile {
            base_url: "https://dash.lab.test".into(),
            ca_cert: Some("/etc/provisync/ca.pem".into()),
            insecure: Some(true),
            ..Profile::default()
        };
        let ctx = profile_to_context(&profile, "t", &Defaults::default()).unwrap();
        assert_eq!(ctx.tls, TlsMode::DangerAcceptInvalid);

        let profile = Profile {
            insecure: None,
            ..profile
        };
        let ctx = profile_to_context(&profile, "t", &Defaults::default()).unwrap();
        assert_eq!(ctx.tls, TlsMode::CustomCa("/etc/provisync/ca.pem".into()));
    }

    #[test]
    fn bad_base_url_is_a_validation_error() {
        let profile = Profile {
            base_url: "not a url".into(),
            ..Profile::default()
        };
        let err = profile_to_context(&profile, "t", &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "base_url"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let cfg = Config::sample("https://dash.lab.test/api");
        let (name, profile) = cfg.profile(None).unwrap();
        let context = profile_to_context(profile, &name, &cfg.defaults).unwrap();
        let mut session = cfg.resource("session").unwrap().clone();
        session.poll_interval_secs = 0;
        assert!(session.subscription_config(profile, &context, "x").is_err());
    }

    #[test]
    fn saved_sample_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let sample = Config::sample("https://dash.lab.test/api");

        save_config_to(&sample, &path).unwrap();
        Jail::expect_with(|jail| {
            jail.clear_env();
            assert_eq!(load_config_from(&path).unwrap(), sample);
            Ok(())
        });
    }
}
