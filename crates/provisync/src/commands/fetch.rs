//! `provisync fetch`: one REST snapshot, printed as a decoded envelope.

use std::sync::Arc;

use provisync_core::{CoreError, DecodedEnvelope, LiveSync};

use crate::cli::{FetchArgs, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: FetchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let resolved = config::resolve(global, &args.resource_type)?;
    let poll = resolved.poll_source()?;
    let sync = LiveSync::builder()
        .context(Arc::clone(&resolved.context))
        .poll_source(Arc::new(poll))
        .build()?;

    tracing::debug!(profile = %resolved.profile_name, id = %args.id, "fetching snapshot");
    let envelope = sync.fetch(&args.id).await?;
    output::print_output(&output::render_structured(global.output, &envelope)?, global.quiet);

    // The body is printed either way; a business error still sets the exit code.
    match envelope {
        DecodedEnvelope::Success(_) => Ok(()),
        DecodedEnvelope::Error(e) => Err(CoreError::Rejected(e).into()),
    }
}
