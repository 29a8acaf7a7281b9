use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde_json::json;

use crate::error::StoreError;
use crate::task::Task;

/// The closed universe of values a task input or output may hold.
///
/// Every kind has a deterministic canonical description (see
/// [`describe`](crate::describe::describe)); the `Opaque` variant is the
/// explicit escape hatch for values the description engine cannot reproduce
/// faithfully, and describing one emits a reproducibility warning instead of
/// failing.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// An ordered sequence, described as a plain list.
    Seq(Vec<Value>),
    /// A multi-dimensional numeric array, described as nested lists.
    Array(ArrayNd),
    /// A string-keyed record with deterministic (lexicographic) key order.
    Map(BTreeMap<String, Value>),
    /// A reference to a file by name, resolved against the input datastore.
    File(FileRef),
    /// A not-yet-executed task standing in for its future result.
    Task(Task),
    /// A type, described by its fully-qualified name.
    Type(TypeRef),
    /// A statistical distribution with a special-cased description.
    Dist(Distribution),
    /// Anything else, carried as a best-effort textual representation.
    Opaque(Opaque),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Seq(_) => "sequence",
            Value::Array(_) => "array",
            Value::Map(_) => "mapping",
            Value::File(_) => "file",
            Value::Task(_) => "task",
            Value::Type(_) => "type",
            Value::Dist(_) => "distribution",
            Value::Opaque(_) => "opaque",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Converts the data subset of the value universe to plain JSON.
    ///
    /// Tasks, files, types and other reference-like values have a canonical
    /// *description*, but no storable payload; asking to store one is an
    /// error rather than a silent lossy write.
    pub(crate) fn to_json(&self) -> Result<serde_json::Value, StoreError> {
        match self {
            Value::Null => Ok(serde_json::Value::Null),
            Value::Bool(b) => Ok(json!(b)),
            Value::Int(i) => Ok(json!(i)),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or(StoreError::Unstorable("non-finite float")),
            Value::Str(s) => Ok(json!(s)),
            Value::Seq(items) => items
                .iter()
                .map(Value::to_json)
                .collect::<Result<Vec<_>, _>>()
                .map(serde_json::Value::Array),
            Value::Array(array) => Ok(array.to_nested()),
            Value::Map(map) => {
                let mut object = serde_json::Map::new();
                for (key, value) in map {
                    object.insert(key.clone(), value.to_json()?);
                }
                Ok(serde_json::Value::Object(object))
            }
            other => Err(StoreError::Unstorable(other.kind())),
        }
    }

    /// Reads a value back from plain JSON. Objects carrying the `File` tag
    /// become file references; everything else maps structurally.
    pub(crate) fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Seq(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(object) => {
                if let Some(filename) = file_tag(object) {
                    return Value::File(FileRef::new(filename));
                }
                Value::Map(
                    object
                        .iter()
                        .map(|(key, value)| (key.clone(), Value::from_json(value)))
                        .collect(),
                )
            }
        }
    }
}

fn file_tag(object: &serde_json::Map<String, serde_json::Value>) -> Option<&str> {
    match (object.get("type"), object.get("filename")) {
        (Some(tag), Some(filename)) if tag == "File" => filename.as_str(),
        _ => None,
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<FileRef> for Value {
    fn from(value: FileRef) -> Self {
        Value::File(value)
    }
}

impl From<Task> for Value {
    fn from(value: Task) -> Self {
        Value::Task(value)
    }
}

/// A dependency which is a filename.
///
/// This is a lightweight reference; the materialized on-disk handle with a
/// store root is [`DataFile`](crate::store::DataFile).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub filename: Utf8PathBuf,
}

impl FileRef {
    pub fn new(filename: impl Into<Utf8PathBuf>) -> Self {
        Self {
            filename: filename.into(),
        }
    }

    /// The tagged record this reference serializes to.
    pub(crate) fn desc(&self) -> serde_json::Value {
        json!({ "type": "File", "filename": self.filename.as_str() })
    }
}

impl std::fmt::Display for FileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "File({})", self.filename)
    }
}

/// A type used as a task input, described by its fully-qualified name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub name: String,
}

impl TypeRef {
    pub fn of<T: ?Sized>() -> Self {
        Self {
            name: std::any::type_name::<T>().to_string(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Names containing closure markers are synthesized per-compilation and
    /// are not stable across builds.
    pub(crate) fn is_synthetic(&self) -> bool {
        self.name.contains("{{closure}}")
    }
}

/// A dense n-dimensional numeric array. The canonical description flattens it
/// to nested lists, so `[[1, 2], [3, 4]]` and a reshaped copy describe
/// identically.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayNd {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl ArrayNd {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, crate::error::TaskError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(crate::error::TaskError::ArrayShape {
                shape,
                got: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Nested-list JSON form, one level per dimension.
    pub(crate) fn to_nested(&self) -> serde_json::Value {
        fn build(shape: &[usize], data: &[f64]) -> serde_json::Value {
            match shape {
                [] | [_] => serde_json::Value::Array(
                    data.iter()
                        .map(|f| {
                            serde_json::Number::from_f64(*f)
                                .map(serde_json::Value::Number)
                                .unwrap_or(serde_json::Value::Null)
                        })
                        .collect(),
                ),
                [n, rest @ ..] => {
                    let stride = data.len() / n.max(&1);
                    serde_json::Value::Array(
                        data.chunks(stride.max(1))
                            .map(|chunk| build(rest, chunk))
                            .collect(),
                    )
                }
            }
        }
        build(&self.shape, &self.data)
    }
}

/// Distribution values whose default representation would embed a memory
/// address; these get explicit, reproducible descriptions instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Distribution {
    /// The multivariate normal family itself (not parametrized).
    MultivariateNormal,
    /// A frozen multivariate normal with fixed parameters.
    MultivariateNormalFrozen { mean: Vec<f64>, cov: Vec<Vec<f64>> },
    /// Any other distribution, described by its textual form with a warning.
    Other { name: String, repr: String },
}

/// Fallback wrapper for values outside the supported universe. Describing one
/// produces its textual representation and a non-reproducibility warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opaque {
    pub type_name: String,
    pub repr: String,
}

impl Opaque {
    pub fn new(type_name: impl Into<String>, repr: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            repr: repr.into(),
        }
    }
}
