use std::io::{self, Write};

use crossterm::style::{Color, Stylize};
use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RunResult};
use crate::assembly::SampleState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_run(result: &RunResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        write_run(&mut stdout, result)
    }
}

/// Human-readable run summary.
pub fn write_run<W: Write>(out: &mut W, result: &RunResult) -> io::Result<()> {
    let summary = &result.summary;
    writeln!(
        out,
        "{}",
        format!("kira-seqprep run {}", summary.run_id).with(Color::Cyan)
    )?;
    writeln!(
        out,
        "{}",
        format!("  samples ready: {}", summary.succeeded).with(Color::Green)
    )?;
    if summary.excluded > 0 {
        writeln!(
            out,
            "{}",
            format!("  samples excluded: {}", summary.excluded).with(Color::Yellow)
        )?;
    }
    for sample in &summary.samples {
        match sample.state {
            SampleState::Succeeded => {
                writeln!(out, "  {} {} ({})", "ok".green(), sample.name, sample.layout)?;
            }
            SampleState::Excluded => {
                let stage = sample.stage.as_deref().unwrap_or("-");
                let reason = sample.reason.as_deref().unwrap_or("-");
                writeln!(
                    out,
                    "  {} {} ({}) [{stage}] {reason}",
                    "excluded".red(),
                    sample.name,
                    sample.layout
                )?;
            }
        }
    }
    for rejected in &summary.rejected {
        writeln!(
            out,
            "  {} {}: {}",
            "rejected".red(),
            rejected.reference,
            rejected.reason
        )?;
    }
    if let Some(artifacts) = &summary.artifacts {
        writeln!(out, "  sample sheet: {}", artifacts.sample_sheet.display())?;
        writeln!(out, "  workflow config: {}", artifacts.workflow_config.display())?;
    }
    if let Some(action) = result.engine {
        writeln!(out, "  workflow: {}", format!("{action:?}").to_lowercase())?;
    }
    Ok(())
}

/// Forwards progress events to the tracing subscriber.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => tracing::info!("{}", event.message),
        }
    }
}

pub struct SilentSink;

impl ProgressSink for SilentSink {
    fn event(&self, _event: ProgressEvent) {}
}
