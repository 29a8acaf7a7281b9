//! The canonical description engine.
//!
//! A description is a JSON-safe tree which is a pure function of the value it
//! describes: no memory addresses, no wall-clock time, no iteration-order
//! accidents. Mapping keys serialize in lexicographic order, so two logically
//! identical mappings always produce the same text. The fingerprint of a task
//! is the BLAKE3 hash of the canonical JSON text of its description.

use serde_json::json;
use tracing::warn;

use crate::error::TaskError;
use crate::resolve::DescribePass;
use crate::store::Store;
use crate::value::{Distribution, Value};

/// A 32-byte BLAKE3 hash of a canonical description.
///
/// This is the cache and storage key: it locates previously stored results
/// and names output artifacts reproducibly across runs and machines.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint([u8; 32]);

impl<T> From<T> for Fingerprint
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Fingerprint(value.into())
    }
}

impl Fingerprint {
    /// Hashes the canonical JSON text of a description.
    pub fn of(desc: &serde_json::Value) -> Self {
        let text = desc.to_string();
        blake3::Hasher::new()
            .update(text.as_bytes())
            .finalize()
            .into()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = vec![0u8; 64];

        for (i, &byte) in self.0.iter().enumerate() {
            acc[i * 2] = HEX[(byte >> 4) as usize];
            acc[i * 2 + 1] = HEX[(byte & 0xF) as usize];
        }

        String::from_utf8(acc).expect("hex digits are valid UTF-8")
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Produces the canonical description of a value.
///
/// Total over the value universe: unsupported kinds degrade to a warned
/// textual form instead of failing, because a hard error here would make
/// entire task types impossible to fingerprint. The only fatal outcome is a
/// dependency cycle among nested tasks.
pub fn describe(store: &Store, value: &Value) -> Result<serde_json::Value, TaskError> {
    let mut pass = DescribePass::new(store);
    describe_value(value, &mut pass)
}

pub(crate) fn describe_value(
    value: &Value,
    pass: &mut DescribePass<'_>,
) -> Result<serde_json::Value, TaskError> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(json!(b)),
        Value::Int(i) => Ok(json!(i)),
        Value::Float(f) => Ok(describe_float(*f)),
        Value::Str(s) => Ok(json!(s)),
        Value::Seq(items) => items
            .iter()
            .map(|item| describe_value(item, pass))
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array),
        Value::Array(array) => Ok(array.to_nested()),
        Value::Map(map) => {
            // serde_json maps sort keys, which keeps the output independent
            // of insertion order.
            let mut object = serde_json::Map::new();
            for (key, value) in map {
                if key == "type" {
                    warn!(
                        "The mapping key 'type' is reserved for tagged records \
                         and may collide with file references"
                    );
                }
                object.insert(key.clone(), describe_value(value, pass)?);
            }
            Ok(serde_json::Value::Object(object))
        }
        Value::File(file) => Ok(file.desc()),
        Value::Task(task) => pass.task(task),
        Value::Type(ty) => {
            if ty.is_synthetic() {
                warn!(
                    name = %ty.name,
                    "Type is synthesized per-compilation and its description \
                     is not reproducible"
                );
            }
            Ok(json!(ty.name))
        }
        Value::Dist(dist) => Ok(describe_dist(dist)),
        Value::Opaque(opaque) => {
            warn!(
                type_name = %opaque.type_name,
                "Falling back to the textual representation; make sure task \
                 fingerprints stay unique and reproducible"
            );
            Ok(json!(opaque.repr))
        }
    }
}

fn describe_float(f: f64) -> serde_json::Value {
    match serde_json::Number::from_f64(f) {
        Some(n) => serde_json::Value::Number(n),
        None => {
            warn!("Non-finite float described as text");
            json!(format!("{f}"))
        }
    }
}

fn describe_dist(dist: &Distribution) -> serde_json::Value {
    match dist {
        Distribution::MultivariateNormal => json!("multivariate_normal"),
        Distribution::MultivariateNormalFrozen { mean, cov } => {
            json!(format!("multivariate_normal(mean={mean:?}, cov={cov:?})"))
        }
        Distribution::Other { name, repr } => {
            warn!(
                %name,
                "Distribution has no special-cased description; the textual \
                 form may not be reproducible"
            );
            json!(repr)
        }
    }
}
