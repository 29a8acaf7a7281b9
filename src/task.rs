//! The task data model.
//!
//! A [`TaskSpec`] is immutable, process-wide metadata: the typed input
//! signature, the ordered output list, and the computation function. A
//! [`Task`] is a per-invocation instance holding raw inputs; its canonical
//! description, loaded inputs, and result are populated lazily and at most
//! once.

use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex, OnceLock};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::config::Project;
use crate::describe::Fingerprint;
use crate::error::{CastError, TaskError};
use crate::resolve::{DescribePass, ExecutePass};
use crate::store::{DataFile, Format, Store};
use crate::value::{FileRef, Value};
use crate::{cache, registry};

/// Input names used internally for run metadata; a task cannot declare them.
const RESERVED_INPUTS: [&str; 2] = ["reason", "cache_result"];

/// The types an input may accept. Casting a supplied value tries each
/// declared candidate in order and keeps the first that converts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    Bool,
    Int,
    Float,
    Str,
    File,
    Task,
    Any,
}

#[derive(Debug, Clone)]
pub(crate) struct InputSpec {
    pub name: String,
    pub accepts: Vec<InputType>,
    pub default: Option<Value>,
}

/// A declared output: its name and the storage format of its artifact.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub name: String,
    pub format: Format,
}

/// Resolved inputs passed to a computation, and the form results take after
/// output-shape validation.
pub type OutputMap = BTreeMap<String, Value>;

/// The return shape of a computation: either a mapping whose keys must match
/// the declared output names exactly, or a tuple matching the declared arity.
#[derive(Debug, Clone, PartialEq)]
pub enum Outputs {
    Named(OutputMap),
    Positional(Vec<Value>),
}

impl Outputs {
    pub fn named<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Outputs::Named(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    pub fn positional<V>(values: impl IntoIterator<Item = V>) -> Self
    where
        V: Into<Value>,
    {
        Outputs::Positional(values.into_iter().map(Into::into).collect())
    }
}

type ComputeFn = Arc<dyn Fn(&OutputMap) -> anyhow::Result<Outputs> + Send + Sync>;

/// Static definition of a task type. Built once with [`TaskSpec::builder`]
/// and shared between instances through an `Arc`.
pub struct TaskSpec {
    name: &'static str,
    inputs: Vec<InputSpec>,
    outputs: Vec<OutputSpec>,
    cache_in_memory: bool,
    run: ComputeFn,
}

impl TaskSpec {
    pub fn builder(name: &'static str) -> TaskSpecBuilder {
        TaskSpecBuilder {
            name,
            inputs: Vec::new(),
            outputs: Vec::new(),
            cache_in_memory: false,
            run: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }

    fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|input| input.name == name)
    }

    pub(crate) fn compute(&self, inputs: &OutputMap) -> anyhow::Result<Outputs> {
        (self.run)(inputs)
    }

    pub(crate) fn cache_in_memory(&self) -> bool {
        self.cache_in_memory
    }

    /// Validates the shape of a computation's return value against the
    /// declared outputs and reduces it to a named mapping.
    pub(crate) fn normalize_outputs(&self, outputs: Outputs) -> Result<OutputMap, TaskError> {
        let declared: Vec<String> = self.outputs.iter().map(|o| o.name.clone()).collect();
        match outputs {
            Outputs::Named(map) => {
                let keys: Vec<&String> = map.keys().collect();
                let matches = keys.len() == declared.len()
                    && declared.iter().all(|name| map.contains_key(name));
                if !matches {
                    return Err(TaskError::ShapeMismatch {
                        task: self.name,
                        expected: declared,
                        got: format!("a mapping with keys {keys:?}"),
                    });
                }
                Ok(map)
            }
            Outputs::Positional(values) => {
                if values.len() != declared.len() {
                    return Err(TaskError::ShapeMismatch {
                        task: self.name,
                        expected: declared,
                        got: format!("{} positional values", values.len()),
                    });
                }
                Ok(declared.into_iter().zip(values).collect())
            }
        }
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TaskSpec`]. Validation happens in [`finish`](Self::finish):
/// reserved or duplicate input names, duplicate outputs, and a missing
/// computation are definition errors.
pub struct TaskSpecBuilder {
    name: &'static str,
    inputs: Vec<InputSpec>,
    outputs: Vec<OutputSpec>,
    cache_in_memory: bool,
    run: Option<ComputeFn>,
}

impl TaskSpecBuilder {
    pub fn input(mut self, name: impl Into<String>, accepts: &[InputType]) -> Self {
        self.inputs.push(InputSpec {
            name: name.into(),
            accepts: accepts.to_vec(),
            default: None,
        });
        self
    }

    pub fn input_with_default(
        mut self,
        name: impl Into<String>,
        accepts: &[InputType],
        default: impl Into<Value>,
    ) -> Self {
        self.inputs.push(InputSpec {
            name: name.into(),
            accepts: accepts.to_vec(),
            default: Some(default.into()),
        });
        self
    }

    /// Declares an output. Outputs are ordered by declaration; the order is
    /// significant because positional results zip against it.
    pub fn output(mut self, name: impl Into<String>, format: Format) -> Self {
        self.outputs.push(OutputSpec {
            name: name.into(),
            format,
        });
        self
    }

    /// Keep results in process memory and serve repeated `run` calls on the
    /// same instance without touching the store.
    pub fn cache_in_memory(mut self, enabled: bool) -> Self {
        self.cache_in_memory = enabled;
        self
    }

    pub fn run<F>(mut self, run: F) -> Self
    where
        F: Fn(&OutputMap) -> anyhow::Result<Outputs> + Send + Sync + 'static,
    {
        self.run = Some(Arc::new(run));
        self
    }

    pub fn finish(self) -> Result<Arc<TaskSpec>, TaskError> {
        for input in &self.inputs {
            if RESERVED_INPUTS.contains(&input.name.as_str()) {
                return Err(TaskError::ReservedInput(input.name.clone()));
            }
            let count = self.inputs.iter().filter(|i| i.name == input.name).count();
            if count > 1 {
                return Err(TaskError::DuplicateInput(input.name.clone()));
            }
        }
        for output in &self.outputs {
            let count = self
                .outputs
                .iter()
                .filter(|o| o.name == output.name)
                .count();
            if count > 1 {
                return Err(TaskError::DuplicateOutput(output.name.clone()));
            }
        }
        let run = self
            .run
            .ok_or(TaskError::MissingComputation(self.name))?;
        Ok(Arc::new(TaskSpec {
            name: self.name,
            inputs: self.inputs,
            outputs: self.outputs,
            cache_in_memory: self.cache_in_memory,
            run,
        }))
    }
}

/// Raw parameters accepted by task construction.
#[derive(Debug, Clone)]
pub enum Params {
    /// An explicit input mapping.
    Map(BTreeMap<String, Value>),
    /// A parameter file holding the input mapping as JSON.
    Path(Utf8PathBuf),
    /// A bare value, allowed only for tasks with a single input.
    Bare(Value),
    /// An already-constructed instance; construction returns it unchanged.
    Task(Task),
}

impl Params {
    pub fn map<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Params::Map(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    pub fn path(path: impl Into<Utf8PathBuf>) -> Self {
        Params::Path(path.into())
    }

    pub fn bare(value: impl Into<Value>) -> Self {
        Params::Bare(value.into())
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::Map(BTreeMap::new())
    }
}

impl From<Task> for Params {
    fn from(task: Task) -> Self {
        Params::Task(task)
    }
}

enum ResultSlot {
    NotComputed,
    Done(OutputMap),
}

struct TaskInner {
    spec: Arc<TaskSpec>,
    raw: BTreeMap<String, Value>,
    reason: Mutex<Option<String>>,
    desc: OnceLock<serde_json::Value>,
    loaded: Mutex<Option<OutputMap>>,
    result: Mutex<ResultSlot>,
}

/// A task instance: a cheap, shared handle over the raw inputs and the
/// lazily-populated description and result slots.
///
/// Two instances with equal canonical descriptions are interchangeable for
/// caching purposes; equality of the handles themselves is identity.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Constructs an instance of `spec` from raw parameters.
    ///
    /// The final input set is the declared defaults overridden by `params`.
    /// Constructing from an existing instance of the same spec returns that
    /// instance unchanged, so task results pass transparently downstream.
    pub fn new(spec: &Arc<TaskSpec>, params: Params) -> Result<Task, TaskError> {
        Self::with_overrides(spec, params, BTreeMap::new())
    }

    /// Like [`new`](Self::new), with keyword-style overrides applied on top
    /// of `params`.
    pub fn with_overrides(
        spec: &Arc<TaskSpec>,
        params: Params,
        overrides: BTreeMap<String, Value>,
    ) -> Result<Task, TaskError> {
        let supplied: BTreeMap<String, Value> = match params {
            Params::Task(task) => {
                if Arc::ptr_eq(&task.inner.spec, spec) {
                    return Ok(task);
                }
                // An instance of another task type is a nested dependency.
                Self::bare_inputs(spec, Value::Task(task))?
            }
            Params::Map(map) => map,
            Params::Path(path) => {
                let text = fs::read_to_string(&path)?;
                let json: serde_json::Value = serde_json::from_str(&text)?;
                let object = json.as_object().ok_or(TaskError::DescriptionShape)?;
                object
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::from_json(value)))
                    .collect()
            }
            Params::Bare(value) => Self::bare_inputs(spec, value)?,
        };

        let mut inputs = BTreeMap::new();
        for input in &spec.inputs {
            if let Some(default) = &input.default {
                inputs.insert(input.name.clone(), default.clone());
            }
        }
        for (name, value) in supplied.into_iter().chain(overrides) {
            let Some(input) = spec.input(&name) else {
                return Err(TaskError::UnknownInput {
                    task: spec.name,
                    input: name,
                });
            };
            inputs.insert(name, cast(&input.name, value, &input.accepts)?);
        }

        let missing: Vec<String> = spec
            .inputs
            .iter()
            .filter(|input| input.default.is_none() && !inputs.contains_key(&input.name))
            .map(|input| input.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(TaskError::MissingInputs(missing));
        }

        Ok(Task {
            inner: Arc::new(TaskInner {
                spec: spec.clone(),
                raw: inputs,
                reason: Mutex::new(None),
                desc: OnceLock::new(),
                loaded: Mutex::new(None),
                result: Mutex::new(ResultSlot::NotComputed),
            }),
        })
    }

    fn bare_inputs(
        spec: &Arc<TaskSpec>,
        value: Value,
    ) -> Result<BTreeMap<String, Value>, TaskError> {
        let [input] = spec.inputs.as_slice() else {
            return Err(TaskError::BarePositional(spec.name));
        };
        let value = cast(&input.name, value, &input.accepts)?;
        Ok(BTreeMap::from([(input.name.clone(), value)]))
    }

    /// Reconstructs a task from a saved description. Nested task descriptions
    /// become nested instances; the round trip preserves the fingerprint.
    pub fn load(specs: &TaskSet, path: &Utf8Path) -> Result<Task, TaskError> {
        let text = fs::read_to_string(path)?;
        let json: serde_json::Value = serde_json::from_str(&text)?;
        Self::from_desc(specs, &json)
    }

    pub(crate) fn from_desc(
        specs: &TaskSet,
        desc: &serde_json::Value,
    ) -> Result<Task, TaskError> {
        let object = desc.as_object().ok_or(TaskError::DescriptionShape)?;
        let name = object
            .get("taskname")
            .and_then(|v| v.as_str())
            .ok_or(TaskError::DescriptionShape)?;
        let spec = specs
            .get(name)
            .ok_or_else(|| TaskError::UnknownTask(name.to_string()))?;
        let inputs = object
            .get("inputs")
            .and_then(|v| v.as_object())
            .ok_or(TaskError::DescriptionShape)?;

        let mut map = BTreeMap::new();
        for (key, value) in inputs {
            map.insert(key.clone(), value_from_desc(specs, value)?);
        }
        Task::new(spec, Params::Map(map))
    }

    pub fn name(&self) -> &'static str {
        self.inner.spec.name
    }

    pub fn spec(&self) -> &Arc<TaskSpec> {
        &self.inner.spec
    }

    /// Sets the free-text reason recorded with the run. Not part of the
    /// fingerprint.
    pub fn set_reason(&self, reason: impl Into<String>) {
        *self.inner.reason.lock().unwrap() = Some(reason.into());
    }

    pub(crate) fn reason(&self) -> Option<String> {
        self.inner.reason.lock().unwrap().clone()
    }

    /// Identity of this instance within a resolution pass.
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// The normalized input descriptor set which feeds the description
    /// engine. File references resolve to dereferenced, store-relative
    /// paths, so a repointed symlink yields a different task.
    pub fn descriptors(&self, store: &Store) -> Result<BTreeMap<String, Value>, TaskError> {
        let mut descriptors = BTreeMap::new();
        for (name, value) in &self.inner.raw {
            let descriptor = match value {
                Value::File(file) => {
                    let resolved = store.dereference(&file.filename)?;
                    Value::File(FileRef::new(resolved))
                }
                other => other.clone(),
            };
            descriptors.insert(name.clone(), descriptor);
        }
        Ok(descriptors)
    }

    /// Store-relative, dereferenced handles for every file input.
    pub fn input_files(&self, store: &Store) -> Result<Vec<DataFile>, TaskError> {
        let mut files = Vec::new();
        for value in self.inner.raw.values() {
            if let Value::File(file) = value {
                let resolved = store.dereference(&file.filename)?;
                files.push(DataFile::new(resolved, store));
            }
        }
        Ok(files)
    }

    /// The canonical description: `{"taskname": ..., "inputs": ...}`.
    /// Computed once per instance and cached.
    pub fn description(&self, store: &Store) -> Result<serde_json::Value, TaskError> {
        DescribePass::new(store).task(self)
    }

    /// The cache and storage key derived from the canonical description.
    pub fn fingerprint(&self, store: &Store) -> Result<Fingerprint, TaskError> {
        Ok(Fingerprint::of(&self.description(store)?))
    }

    pub(crate) fn cached_description(&self) -> Option<serde_json::Value> {
        self.inner.desc.get().cloned()
    }

    pub(crate) fn cache_description(&self, desc: serde_json::Value) -> serde_json::Value {
        self.inner.desc.get_or_init(|| desc).clone()
    }

    /// Saves the canonical description to a file readable by
    /// [`Task::load`].
    pub fn save_description(&self, store: &Store, path: &Utf8Path) -> Result<(), TaskError> {
        let desc = self.description(store)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_string_pretty(&desc)?)?;
        Ok(())
    }

    /// Resolves every input to a value suitable for the computation: plain
    /// values pass through, file inputs load from the input store, nested
    /// tasks run or fetch their cached result. Memoized per instance.
    pub fn load_inputs(&self, project: &Project) -> Result<OutputMap, TaskError> {
        let mut pass = ExecutePass::new(project);
        self.load_inputs_with(&mut pass)
    }

    pub(crate) fn load_inputs_with(
        &self,
        pass: &mut ExecutePass<'_>,
    ) -> Result<OutputMap, TaskError> {
        if let Some(loaded) = &*self.inner.loaded.lock().unwrap() {
            return Ok(loaded.clone());
        }
        let mut loaded = BTreeMap::new();
        for (name, value) in &self.inner.raw {
            loaded.insert(name.clone(), pass.resolve_input(value)?);
        }
        *self.inner.loaded.lock().unwrap() = Some(loaded.clone());
        Ok(loaded)
    }

    /// Runs the task, or returns a previously stored result.
    ///
    /// Dependencies resolve depth-first; this call blocks until the task and
    /// every transitively-required computation complete.
    pub fn run(&self, project: &Project) -> Result<OutputMap, TaskError> {
        ExecutePass::new(project).task(self)
    }

    pub(crate) fn run_or_fetch(
        &self,
        project: &Project,
        pass: &mut ExecutePass<'_>,
    ) -> Result<OutputMap, TaskError> {
        if self.inner.spec.cache_in_memory()
            && let ResultSlot::Done(outputs) = &*self.inner.result.lock().unwrap()
        {
            debug!(task = self.name(), "In-memory cache hit");
            return Ok(outputs.clone());
        }

        let fingerprint = self.fingerprint(&project.input_store)?;
        if let Some(outputs) = cache::lookup(&project.output_store, &self.inner.spec, &fingerprint)?
        {
            debug!(task = self.name(), %fingerprint, "Stored result reused");
            self.materialize(outputs.clone());
            return Ok(outputs);
        }

        let inputs = self.load_inputs_with(pass)?;
        let record = match &project.registry {
            Some(registry) if project.record => {
                Some(registry.start(self.name(), &fingerprint, self.reason())?)
            }
            _ => None,
        };

        let result = (|| -> Result<OutputMap, TaskError> {
            let raw = self
                .inner
                .spec
                .compute(&inputs)
                .map_err(|err| TaskError::Computation(self.name(), err))?;
            let outputs = self.inner.spec.normalize_outputs(raw)?;
            for output in self.inner.spec.outputs() {
                let path = cache::output_path(&self.inner.spec, &fingerprint, output);
                if let Some(value) = outputs.get(&output.name) {
                    project.output_store.save(&path, value, output.format)?;
                }
            }
            Ok(outputs)
        })();

        if let (Some(registry), Some(record)) = (&project.registry, record) {
            let outcome = match &result {
                Ok(_) => registry::Outcome::Completed,
                Err(_) => registry::Outcome::Failed,
            };
            registry.finish(record, outcome)?;
        }

        let outputs = result?;
        self.materialize(outputs.clone());
        Ok(outputs)
    }

    /// Transitions the result slot from not-computed to materialized. The
    /// first materialization wins; later ones are no-ops.
    fn materialize(&self, outputs: OutputMap) {
        let mut slot = self.inner.result.lock().unwrap();
        if matches!(*slot, ResultSlot::NotComputed) {
            *slot = ResultSlot::Done(outputs);
        }
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.inner.spec.name)
    }
}

fn value_from_desc(specs: &TaskSet, json: &serde_json::Value) -> Result<Value, TaskError> {
    if let Some(object) = json.as_object()
        && object.contains_key("taskname")
        && object.contains_key("inputs")
    {
        return Ok(Value::Task(Task::from_desc(specs, json)?));
    }
    Ok(Value::from_json(json))
}

/// Attempts each accepted type in order, keeping the first conversion that
/// succeeds. Nested tasks and file references pass for any type: they stand
/// in for a result or file content only known at execution time.
fn cast(input: &str, value: Value, accepts: &[InputType]) -> Result<Value, CastError> {
    if let Value::Task(_) | Value::File(_) = value {
        return Ok(value);
    }
    for ty in accepts {
        if let Some(cast) = try_cast(&value, *ty) {
            return Ok(cast);
        }
    }
    Err(CastError {
        input: input.to_string(),
        value: format!("{value:?}"),
        accepted: accepts.to_vec(),
    })
}

fn try_cast(value: &Value, ty: InputType) -> Option<Value> {
    match (ty, value) {
        (InputType::Any, _) => Some(value.clone()),
        (InputType::Bool, Value::Bool(_)) => Some(value.clone()),
        (InputType::Int, Value::Int(_)) => Some(value.clone()),
        (InputType::Int, Value::Float(f)) => Some(Value::Int(*f as i64)),
        (InputType::Int, Value::Bool(b)) => Some(Value::Int(*b as i64)),
        (InputType::Int, Value::Str(s)) => s.parse().ok().map(Value::Int),
        (InputType::Float, Value::Float(_)) => Some(value.clone()),
        (InputType::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
        (InputType::Float, Value::Str(s)) => s.parse().ok().map(Value::Float),
        (InputType::Str, Value::Str(_)) => Some(value.clone()),
        (InputType::File, Value::Str(s)) => Some(Value::File(FileRef::new(s.clone()))),
        _ => None,
    }
}

/// Name-indexed collection of task specs, used to reconstruct instances from
/// saved descriptions.
#[derive(Default)]
pub struct TaskSet {
    specs: BTreeMap<&'static str, Arc<TaskSpec>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: Arc<TaskSpec>) -> &mut Self {
        self.specs.insert(spec.name(), spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TaskSpec>> {
        self.specs.get(name)
    }
}

impl FromIterator<Arc<TaskSpec>> for TaskSet {
    fn from_iter<I: IntoIterator<Item = Arc<TaskSpec>>>(iter: I) -> Self {
        let mut set = TaskSet::new();
        for spec in iter {
            set.register(spec);
        }
        set
    }
}
