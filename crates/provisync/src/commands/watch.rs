//! `provisync watch`: render a live view until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use owo_colors::OwoColorize;
use provisync_core::{ErrorEnvelope, LiveSync, StalePolicy, SubscriptionConfig};

use crate::cli::{GlobalOpts, OutputFormat, StalePolicyArg, WatchArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

fn apply_overrides(mut cfg: SubscriptionConfig, args: &WatchArgs) -> SubscriptionConfig {
    if let Some(secs) = args.poll_interval {
        cfg = cfg.with_poll_interval(Duration::from_secs(secs));
    }
    if let Some(secs) = args.stale_after {
        cfg = cfg.with_stale_after(Duration::from_secs(secs));
    }
    if let Some(policy) = args.stale_policy {
        cfg = cfg.with_stale_policy(match policy {
            StalePolicyArg::Passive => StalePolicy::Passive,
            StalePolicyArg::Resnapshot => StalePolicy::Resnapshot,
            StalePolicyArg::Reconnect => StalePolicy::Reconnect,
        });
    }
    if args.no_initial_snapshot {
        cfg = cfg.with_initial_snapshot(false);
    }
    cfg
}

fn report_error(err: &ErrorEnvelope, color: bool) {
    let code = if color {
        err.code.red().to_string()
    } else {
        err.code.clone()
    };
    match err.retry_after() {
        Some(wait) => eprintln!(
            "backend error {code}: {} (retry after {})",
            err.message,
            humantime::format_duration(wait)
        ),
        None => eprintln!("backend error {code}: {}", err.message),
    }
}

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if args.poll_interval == Some(0) {
        return Err(CliError::Validation {
            field: "--poll-interval".into(),
            reason: "must be greater than zero".into(),
        });
    }

    let resolved = config::resolve(global, &args.resource_type)?;
    let sub_config = apply_overrides(resolved.subscription_config(&args.id)?, &args);
    let sync = LiveSync::builder()
        .context(Arc::clone(&resolved.context))
        .poll_source(Arc::new(resolved.poll_source()?))
        .build()?;

    tracing::info!(
        endpoint = %sub_config.stream_endpoint,
        policy = %sub_config.stale_policy,
        "watching {} '{}'",
        args.resource_type,
        args.id
    );
    let mut sub = sync.subscribe(args.id.clone(), sub_config)?;

    let color = output::should_color(global.color);
    let separate = matches!(global.output, OutputFormat::Table);
    let mut last_error: Option<ErrorEnvelope> = None;
    let mut rendered = 0usize;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            biased;
            _ = &mut ctrl_c => break,
            changed = sub.changed() => {
                if !changed {
                    break;
                }

                let error = sub.last_error();
                if let Some(ref err) = error {
                    if last_error.as_ref() != Some(err) {
                        report_error(err, color);
                    }
                }
                last_error = error;

                let view = sub.data();
                let out = output::render_view(
                    global.output,
                    &view,
                    &sub.current_state(),
                    sub.freshness(),
                    sync.clock().now(),
                    color,
                )?;
                if separate && rendered > 0 && !global.quiet {
                    println!();
                }
                output::print_output(&out, global.quiet);

                rendered += 1;
                if args.count.is_some_and(|n| rendered >= n) {
                    break;
                }
            }
        }
    }

    sub.unsubscribe();
    tracing::debug!(diagnostics = ?sync.diagnostics(), "watch finished");
    Ok(())
}
