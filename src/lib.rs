#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod cache;
mod config;
mod describe;
mod error;
mod registry;
mod resolve;
mod store;
mod task;
#[cfg(feature = "cli")]
pub mod ui;
mod value;

pub use crate::config::{CONFIG_FILE, Project, ProjectConfig};
pub use crate::describe::{Fingerprint, describe};
pub use crate::error::{
    CastError, ConfigError, RegistryError, RuntimeError, StoreError, TaskError,
};
pub use crate::registry::{Outcome, Registry, RunRecord};
pub use crate::store::{DataFile, Format, Store};
pub use crate::task::{
    InputType, OutputMap, OutputSpec, Outputs, Params, Task, TaskSet, TaskSpec, TaskSpecBuilder,
};
pub use crate::value::{ArrayNd, Distribution, FileRef, Opaque, TypeRef, Value};
