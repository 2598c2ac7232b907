use std::io::{self, Write};

use serde::Serialize;

use crate::app::{GatherReport, HarvesterInfo, ImportResult, ProgressEvent, ProgressSink, RunReport};
use crate::store::HarvestObject;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

impl OutputMode {
    pub fn sink(self) -> &'static dyn ProgressSink {
        match self {
            OutputMode::Interactive => &TracingSink,
            OutputMode::NonInteractive => &JsonOutput,
        }
    }
}

/// Result of the fetch stage for one object.
#[derive(Debug, Clone, Serialize)]
pub struct FetchSummary<'a> {
    pub object_id: &'a str,
    pub guid: &'a str,
    pub state: String,
}

impl<'a> From<&'a HarvestObject> for FetchSummary<'a> {
    fn from(object: &'a HarvestObject) -> Self {
        Self {
            object_id: &object.id,
            guid: &object.guid,
            state: object.state.to_string(),
        }
    }
}

/// Queue listing without the serialized payloads.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectListing<'a> {
    pub id: &'a str,
    pub guid: &'a str,
    pub job_id: &'a str,
    pub state: String,
    pub error: Option<&'a str>,
    pub updated_at: &'a str,
}

impl<'a> From<&'a HarvestObject> for ObjectListing<'a> {
    fn from(object: &'a HarvestObject) -> Self {
        Self {
            id: &object.id,
            guid: &object.guid,
            job_id: &object.job_id,
            state: object.state.to_string(),
            error: object.error.as_deref(),
            updated_at: &object.updated_at,
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_info(info: &HarvesterInfo) -> io::Result<()> {
        Self::print_json(info)
    }

    pub fn print_gather(report: &GatherReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_fetch(object: &HarvestObject) -> io::Result<()> {
        Self::print_json(&FetchSummary::from(object))
    }

    pub fn print_import(result: &ImportResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_run(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_objects(objects: &[HarvestObject]) -> io::Result<()> {
        let listing: Vec<ObjectListing<'_>> = objects.iter().map(ObjectListing::from).collect();
        Self::print_json(&listing)
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

/// Forwards progress to the log on stderr.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => tracing::info!("{}", event.message),
        }
    }
}
