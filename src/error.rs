use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("cannot read metadata workbook: {0}")]
    SourceRead(String),

    #[error("cannot list bucket contents under {prefix}: {message}")]
    RemoteList { prefix: String, message: String },

    #[error("unknown dataset category in id: {0}")]
    UnknownCategory(String),

    #[error("invalid dataset id: {0}")]
    InvalidDatasetId(String),

    #[error("S3 request failed: {0}")]
    S3Http(String),

    #[error("S3 returned status {status}: {message}")]
    S3Status { status: u16, message: String },

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("{entity} not found in catalog: {id}")]
    CatalogNotFound { entity: String, id: String },

    #[error("{entity} already exists in catalog: {id}")]
    CatalogConflict { entity: String, id: String },

    #[error("catalog write failed: {0}")]
    CatalogWrite(String),

    #[error("missing config file foph-harvest.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing configuration value: {0}")]
    MissingSetting(&'static str),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid harvest object payload: {0}")]
    Payload(String),

    #[error("harvest object not found: {0}")]
    ObjectNotFound(String),

    #[error("harvest object {id} is {found}, expected {expected}")]
    InvalidState {
        id: String,
        expected: String,
        found: String,
    },

    #[error("another import is in progress for {0}")]
    ImportInProgress(String),
}

impl HarvestError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HarvestError::CatalogNotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, HarvestError::CatalogConflict { .. })
    }
}
