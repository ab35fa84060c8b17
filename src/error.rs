use thiserror::Error;

use crate::core::task::FlowId;
use crate::orchestration::FlowError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task '{task}' depends on a handle from flow {handle_flow}, not from this flow")]
    ForeignTaskHandle { task: String, handle_flow: FlowId },

    #[error("Task '{task}' depends on an unregistered task")]
    UnknownDependency { task: String },

    #[error("Task '{0}' is already registered in this flow")]
    DuplicateTask(String),

    #[error("Cycle detected at task: {0}")]
    CyclicDependency(String),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, Error>;
