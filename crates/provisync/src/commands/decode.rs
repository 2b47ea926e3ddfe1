//! `provisync decode`: classify an envelope body offline.

use std::io::Read;
use std::path::Path;

use provisync_api::envelope;
use provisync_api::event::{FrameOutcome, decode_frame};
use serde::Serialize;

use crate::cli::{DecodeArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum FrameReport {
    Event(provisync_api::StreamEvent),
    Rejected(provisync_api::ErrorEnvelope),
    Dropped { reason: String },
}

fn read_input(file: Option<&Path>) -> Result<String, CliError> {
    match file {
        Some(path) if path != Path::new("-") => Ok(std::fs::read_to_string(path)?),
        _ => {
            let mut body = String::new();
            std::io::stdin().read_to_string(&mut body)?;
            Ok(body)
        }
    }
}

pub fn handle(args: &DecodeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let body = read_input(args.file.as_deref())?;

    let rendered = if args.event {
        let report = match decode_frame(&body) {
            FrameOutcome::Event(event) => FrameReport::Event(event),
            FrameOutcome::Rejected(err) => FrameReport::Rejected(err),
            FrameOutcome::Dropped { reason } => FrameReport::Dropped { reason },
        };
        output::render_structured(global.output, &report)?
    } else {
        output::render_structured(global.output, &envelope::decode(&body))?
    };

    output::print_output(&rendered, global.quiet);
    Ok(())
}
