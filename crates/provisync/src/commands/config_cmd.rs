//! Config subcommand handlers.

use std::fmt::Write;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking sensitive fields.
fn format_config_redacted(cfg: &Config) -> Result<String, CliError> {
    let mut redacted = cfg.clone();
    for profile in redacted.profiles.values_mut() {
        if profile.token.is_some() {
            profile.token = Some("****".into());
        }
    }
    toml::to_string_pretty(&redacted).map_err(|e| CliError::Internal(e.to_string()))
}

fn describe_profiles(cfg: &Config) -> String {
    let mut out = String::new();
    for (name, profile) in &cfg.profiles {
        let marker = if cfg.default_profile.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        let source = match provisync_config::resolve_token(profile, name) {
            Some((_, source)) => format!("{source:?}").to_lowercase(),
            None => "none".into(),
        };
        let _ = writeln!(out, "{marker} {name}: {} (token: {source})", profile.base_url);
    }
    out
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let path = config::config_path();
            if !path.exists() {
                return Err(CliError::NoConfig {
                    path: path.display().to_string(),
                });
            }
            let cfg = config::load_config()?;
            output::print_output(&format_config_redacted(&cfg)?, global.quiet);
            output::print_output(describe_profiles(&cfg).trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Init { base_url, force } => {
            let path = config::config_path();
            if path.exists() && !force {
                return Err(CliError::Validation {
                    field: "config".into(),
                    reason: format!("{} already exists (use --force to overwrite)", path.display()),
                });
            }
            url::Url::parse(&base_url).map_err(|e| CliError::Validation {
                field: "--base-url".into(),
                reason: e.to_string(),
            })?;

            let written = config::save_config(&Config::sample(&base_url))?;
            output::print_output(
                &format!("Wrote {}", written.display()),
                global.quiet,
            );
            Ok(())
        }

        ConfigCommand::SetToken { profile, token } => {
            let name = match profile {
                Some(name) => name,
                None => {
                    let cfg = config::load_config().unwrap_or_default();
                    cfg.profile_name(global.profile.as_deref())
                }
            };
            config::store_token(&name, &token)?;
            output::print_output(
                &format!("Stored token for profile '{name}' in the system keyring"),
                global.quiet,
            );
            Ok(())
        }
    }
}
