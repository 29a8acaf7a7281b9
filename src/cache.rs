//! Locating stored results by fingerprint.

use camino::Utf8PathBuf;

use crate::describe::Fingerprint;
use crate::error::StoreError;
use crate::store::Store;
use crate::task::{OutputMap, OutputSpec, TaskSpec};

/// The store-relative path of one output artifact:
/// `<taskname>/<fingerprint>_<output>.<ext>`.
pub(crate) fn output_path(
    spec: &TaskSpec,
    fingerprint: &Fingerprint,
    output: &OutputSpec,
) -> Utf8PathBuf {
    Utf8PathBuf::from(spec.name()).join(format!(
        "{}_{}.{}",
        fingerprint.to_hex(),
        output.name,
        output.format.ext()
    ))
}

/// Looks up a stored result. A hit requires *every* declared output artifact
/// to be present; a partial set counts as a miss, so interrupted runs never
/// resurface incomplete results.
pub(crate) fn lookup(
    store: &Store,
    spec: &TaskSpec,
    fingerprint: &Fingerprint,
) -> Result<Option<OutputMap>, StoreError> {
    let paths: Vec<_> = spec
        .outputs()
        .iter()
        .map(|output| (output, output_path(spec, fingerprint, output)))
        .collect();
    if !paths.iter().all(|(_, path)| store.exists(path)) {
        return Ok(None);
    }
    let mut outputs = OutputMap::new();
    for (output, path) in paths {
        outputs.insert(output.name.clone(), store.load(&path, output.format)?);
    }
    Ok(Some(outputs))
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;
    use crate::store::Format;
    use crate::task::{InputType, Outputs};
    use crate::value::Value;

    fn pair_spec() -> std::sync::Arc<TaskSpec> {
        TaskSpec::builder("Pair")
            .input("x", &[InputType::Int])
            .output("first", Format::Json)
            .output("second", Format::Json)
            .run(|_| Ok(Outputs::positional([Value::Int(1), Value::Int(2)])))
            .finish()
            .unwrap()
    }

    #[test]
    fn test_partial_outputs_count_as_miss() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).unwrap();
        let spec = pair_spec();
        let fingerprint = Fingerprint::of(&serde_json::json!({ "taskname": "Pair" }));

        let first = output_path(&spec, &fingerprint, &spec.outputs()[0]);
        store.save(&first, &Value::Int(1), Format::Json).unwrap();
        assert!(lookup(&store, &spec, &fingerprint).unwrap().is_none());

        let second = output_path(&spec, &fingerprint, &spec.outputs()[1]);
        store.save(&second, &Value::Int(2), Format::Json).unwrap();
        let outputs = lookup(&store, &spec, &fingerprint).unwrap().unwrap();
        assert_eq!(outputs["first"], Value::Int(1));
        assert_eq!(outputs["second"], Value::Int(2));
    }

    #[test]
    fn test_output_path_shape() {
        let spec = pair_spec();
        let fingerprint = Fingerprint::default();
        let path = output_path(&spec, &fingerprint, &spec.outputs()[0]);
        assert_eq!(
            path.as_str(),
            format!("Pair/{}_first.json", fingerprint.to_hex())
        );
    }
}
