//! Output formatting: table, JSON, YAML, plain.
//!
//! Renders resource views and envelopes in the format selected by
//! `--output`. Table uses `tabled`, structured formats use serde, plain
//! emits one child key per line.

use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use provisync_core::{ConnectionState, Freshness, ResourceView};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

// ── Rows ─────────────────────────────────────────────────────────────

#[derive(Tabled)]
struct ChildRow {
    #[tabled(rename = "KEY")]
    key: String,
    #[tabled(rename = "UPDATED")]
    updated: String,
    #[tabled(rename = "DATA")]
    data: String,
}

const DATA_PREVIEW: usize = 60;

fn preview(value: &serde_json::Value) -> String {
    let text = value.to_string();
    if text.chars().count() <= DATA_PREVIEW {
        return text;
    }
    let cut: String = text.chars().take(DATA_PREVIEW - 1).collect();
    format!("{cut}…")
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Serializable summary of one watch update.
#[derive(Serialize)]
pub struct WatchFrame<'a> {
    pub state: String,
    pub freshness: Freshness,
    pub view: &'a ResourceView,
}

/// Render a structured value in a non-table format.
pub fn render_structured<T: Serialize + ?Sized>(
    format: OutputFormat,
    data: &T,
) -> Result<String, CliError> {
    Ok(match format {
        OutputFormat::Json | OutputFormat::Table | OutputFormat::Plain => {
            serde_json::to_string_pretty(data)?
        }
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Yaml => serde_yaml::to_string(data).map_err(|e| CliError::Internal(e.to_string()))?,
    })
}

/// Render one view in the chosen format.
pub fn render_view(
    format: OutputFormat,
    view: &ResourceView,
    state: &ConnectionState,
    freshness: Freshness,
    now: DateTime<Utc>,
    color: bool,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Table => Ok(render_view_table(view, state, freshness, now, color)),
        OutputFormat::Plain => Ok(view
            .children
            .keys()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")),
        structured => render_structured(
            structured,
            &WatchFrame {
                state: state.to_string(),
                freshness,
                view,
            },
        ),
    }
}

fn render_view_table(
    view: &ResourceView,
    state: &ConnectionState,
    freshness: Freshness,
    now: DateTime<Utc>,
    color: bool,
) -> String {
    let state_text = state.to_string();
    let state_text = match (color, state) {
        (false, _) => state_text,
        (true, ConnectionState::Connected) => state_text.green().to_string(),
        (true, ConnectionState::Idle) => state_text.dimmed().to_string(),
        (true, _) => state_text.yellow().to_string(),
    };

    let fresh_text = describe_freshness(freshness, now);
    let fresh_text = if color && freshness.is_stale {
        fresh_text.red().to_string()
    } else {
        fresh_text
    };

    let mut header = format!(
        "{}  [{state_text}]  {fresh_text}  rev {}",
        view.resource_id, view.revision
    );
    for (name, value) in &view.fields {
        header.push_str(&format!("\n  {name}: {}", preview(value)));
    }

    let rows: Vec<ChildRow> = view
        .children
        .iter()
        .map(|(key, entry)| ChildRow {
            key: key.to_string(),
            updated: entry.updated_at.format("%H:%M:%S").to_string(),
            data: preview(&entry.data),
        })
        .collect();

    if rows.is_empty() {
        return format!("{header}\n  (no children)");
    }
    format!("{header}\n{}", Table::new(rows).with(Style::rounded()))
}

fn describe_freshness(freshness: Freshness, now: DateTime<Utc>) -> String {
    let Some(source) = freshness.source else {
        return "no data yet".into();
    };
    let age = freshness.age(now).unwrap_or(Duration::ZERO);
    // Whole seconds read better than humantime's sub-second parts.
    let age = Duration::from_secs(age.as_secs());
    let label = if freshness.is_stale { "stale" } else { "fresh" };
    format!("{label} via {source}, {} ago", humantime::format_duration(age))
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}
