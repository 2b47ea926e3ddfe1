//! CLI configuration: thin wrapper around `provisync_config` shared types.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--base-url, --token, --insecure, --timeout).

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use provisync_core::{ClientContext, RestPollSource, SubscriptionConfig, TlsMode};

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use provisync_config::{
    Config, ConfigError, Profile, ResourceConfig, config_path, load_config, save_config,
    store_token,
};

/// Everything a resource command needs to talk to the backend.
pub struct Resolved {
    pub profile_name: String,
    pub profile: Profile,
    pub resource: ResourceConfig,
    pub context: Arc<ClientContext>,
}

impl Resolved {
    pub fn subscription_config(&self, resource_id: &str) -> Result<SubscriptionConfig, CliError> {
        Ok(self
            .resource
            .subscription_config(&self.profile, &self.context, resource_id)?)
    }

    pub fn poll_source(&self) -> Result<RestPollSource, CliError> {
        Ok(self.resource.poll_source(Arc::clone(&self.context))?)
    }
}

/// Load the config file and resolve profile + resource type, applying
/// CLI flag overrides on top of the profile.
pub fn resolve(global: &GlobalOpts, resource_type: &str) -> Result<Resolved, CliError> {
    let path = config_path();
    if !path.exists() {
        return Err(CliError::NoConfig {
            path: path.display().to_string(),
        });
    }
    let cfg = load_config()?;
    let (profile_name, mut profile) = match cfg.profile(global.profile.as_deref()) {
        Ok((name, profile)) => (name, profile.clone()),
        // A base URL on the command line is enough to run without a profile.
        Err(ConfigError::ProfileNotFound { name }) if global.base_url.is_some() => {
            (name, Profile::default())
        }
        Err(ConfigError::ProfileNotFound { name }) => {
            return Err(CliError::ProfileNotFound {
                name,
                available: cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", "),
            });
        }
        Err(other) => return Err(other.into()),
    };
    if let Some(ref url) = global.base_url {
        profile.base_url.clone_from(url);
    }

    let resource = cfg.resource(resource_type)?.clone();
    let context = apply_overrides(
        provisync_config::profile_to_context(&profile, &profile_name, &cfg.defaults)?,
        global,
    );

    Ok(Resolved {
        profile_name,
        profile,
        resource,
        context: Arc::new(context),
    })
}

/// Flag overrides take priority over profile values.
fn apply_overrides(mut context: ClientContext, global: &GlobalOpts) -> ClientContext {
    if let Some(ref token) = global.token {
        context = context.with_token(SecretString::from(token.clone()));
    }
    if global.insecure {
        context = context.with_tls(TlsMode::DangerAcceptInvalid);
    }
    if let Some(secs) = global.timeout {
        context = context.with_timeout(Duration::from_secs(secs));
    }
    context
}
