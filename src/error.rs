use camino::Utf8PathBuf;
use thiserror::Error;

pub use anyhow::Error as RuntimeError;

use crate::task::InputType;

/// Errors raised by the task model: definition validation, instance
/// construction, description, and execution.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Missing required inputs {0:?}")]
    MissingInputs(Vec<String>),

    #[error("Task '{task}' does not declare an input named '{input}'")]
    UnknownInput { task: &'static str, input: String },

    #[error("A task cannot define an input named '{0}'")]
    ReservedInput(String),

    #[error("Duplicate input '{0}' in task definition")]
    DuplicateInput(String),

    #[error("Duplicate output '{0}' in task definition")]
    DuplicateOutput(String),

    #[error("Task definition '{0}' has no computation function")]
    MissingComputation(&'static str),

    #[error("A bare value was supplied for task '{0}', which declares more than one input")]
    BarePositional(&'static str),

    #[error(transparent)]
    Cast(#[from] CastError),

    #[error("Array data length {got} does not match shape {shape:?}")]
    ArrayShape { shape: Vec<usize>, got: usize },

    #[error("Task '{task}' returned {got}, expected outputs {expected:?}")]
    ShapeMismatch {
        task: &'static str,
        expected: Vec<String>,
        got: String,
    },

    #[error("Task '{0}' depends on itself")]
    Cycle(&'static str),

    #[error("Couldn't access the task description file.\n{0}")]
    DescriptionIo(#[from] std::io::Error),

    #[error("Couldn't parse the task description.\n{0}")]
    DescriptionParse(#[from] serde_json::Error),

    #[error("Task description does not hold a task name and an input mapping")]
    DescriptionShape,

    #[error("Task description names an unregistered task type '{0}'")]
    UnknownTask(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Task '{0}':\n{1}")]
    Computation(&'static str, anyhow::Error),
}

/// No candidate type in an input's accepted-type list converted the supplied
/// value.
#[derive(Debug, Error)]
#[error("Unable to cast input '{input}' value {value} to any of {accepted:?}")]
pub struct CastError {
    pub input: String,
    pub value: String,
    pub accepted: Vec<InputType>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Couldn't access the datastore.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Path '{0}' lies outside the datastore root '{1}'")]
    OutsideRoot(Utf8PathBuf, Utf8PathBuf),

    #[error("Path is not valid UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't convert a JSON artifact.\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Couldn't write a CBOR artifact.\n{0}")]
    CborSer(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("Couldn't read a CBOR artifact.\n{0}")]
    CborDe(#[from] ciborium::de::Error<std::io::Error>),

    #[error("A {0} value cannot be stored as an artifact")]
    Unstorable(&'static str),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Couldn't write the run record.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't serialize the run record.\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Repository has uncommitted changes; commit them or disable recording")]
    DirtyRepository,

    #[error("Couldn't query the repository.\n{0}")]
    Git(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read the project configuration.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't parse the project configuration.\n{0}")]
    Parse(#[from] serde_json::Error),

    #[error("Input and output datastores must be different")]
    SameRoots,

    #[error("Datastore path '{0}' exists but is not a directory")]
    NotADirectory(Utf8PathBuf),

    #[error("Datastore path '{0}' is not writable")]
    NotWritable(Utf8PathBuf),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
