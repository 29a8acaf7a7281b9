//! File-backed datastores.
//!
//! A [`Store`] roots every artifact path under a single directory. Paths
//! handed around the crate are store-relative and symlink-free; the store is
//! the one place that touches the filesystem layout.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::trace;

use crate::error::StoreError;
use crate::value::Value;

/// Serialization format of a stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Cbor,
}

impl Format {
    pub fn ext(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Cbor => "cbor",
        }
    }

    /// Picks the format matching a file extension, defaulting to JSON.
    pub fn from_ext(ext: Option<&str>) -> Self {
        match ext {
            Some("cbor") => Format::Cbor,
            _ => Format::Json,
        }
    }
}

/// A datastore rooted at a directory. The root is canonicalized on open, so
/// relative paths computed against it are stable.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Utf8Path>) -> Result<Store, StoreError> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        Ok(Store {
            root: root.canonicalize_utf8()?,
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Absolute location of a store path. Absolute inputs pass through.
    pub fn full_path(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.root.join(path)
        }
    }

    /// The store-relative form of a path, which must lie under the root.
    pub fn relative(&self, path: &Utf8Path) -> Result<Utf8PathBuf, StoreError> {
        let full = self.full_path(path);
        full.strip_prefix(&self.root)
            .map(Utf8Path::to_owned)
            .map_err(|_| StoreError::OutsideRoot(full.clone(), self.root.clone()))
    }

    /// Resolves symlinks down to the real file and returns the store-relative
    /// path. Descriptions use this form, so repointing a symlink changes the
    /// fingerprint of every task that reads through it.
    pub fn dereference(&self, path: &Utf8Path) -> Result<Utf8PathBuf, StoreError> {
        let resolved = self.full_path(path).canonicalize_utf8()?;
        self.relative(&resolved)
    }

    pub fn exists(&self, path: &Utf8Path) -> bool {
        self.full_path(path).exists()
    }

    pub fn load(&self, path: &Utf8Path, format: Format) -> Result<Value, StoreError> {
        let full = self.full_path(path);
        trace!(path = %full, "Loading artifact");
        let json: serde_json::Value = match format {
            Format::Json => serde_json::from_str(&fs::read_to_string(&full)?)?,
            Format::Cbor => ciborium::from_reader(fs::File::open(&full)?)?,
        };
        Ok(Value::from_json(&json))
    }

    /// Persists a value. The write goes to a sibling temporary file first and
    /// moves into place with a rename, so concurrent readers never observe a
    /// half-written artifact.
    pub fn save(&self, path: &Utf8Path, value: &Value, format: Format) -> Result<(), StoreError> {
        let full = self.full_path(path);
        if let Some(dir) = full.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = value.to_json()?;
        let staging = full.with_extension(format!("{}.tmp", format.ext()));
        match format {
            Format::Json => fs::write(&staging, serde_json::to_string(&json)?)?,
            Format::Cbor => ciborium::into_writer(&json, fs::File::create(&staging)?)?,
        }
        fs::rename(&staging, &full)?;
        trace!(path = %full, "Artifact written");
        Ok(())
    }
}

/// A materialized file inside a store: the store-relative, dereferenced path
/// together with the root it resolves against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    relative: Utf8PathBuf,
    root: Utf8PathBuf,
}

impl DataFile {
    pub fn new(relative: impl Into<Utf8PathBuf>, store: &Store) -> Self {
        Self {
            relative: relative.into(),
            root: store.root().to_owned(),
        }
    }

    pub fn relative(&self) -> &Utf8Path {
        &self.relative
    }

    pub fn full_path(&self) -> Utf8PathBuf {
        self.root.join(&self.relative)
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use super::*;

    fn temp_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_json_round_trip() {
        let (_dir, store) = temp_store();
        let value = Value::Map(BTreeMap::from([
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Float(2.5)),
        ]));
        let path = Utf8Path::new("artifacts/out.json");
        store.save(path, &value, Format::Json).unwrap();
        assert_eq!(store.load(path, Format::Json).unwrap(), value);
    }

    #[test]
    fn test_cbor_round_trip() {
        let (_dir, store) = temp_store();
        let value = Value::Seq(vec![Value::Int(1), Value::Str("two".into())]);
        let path = Utf8Path::new("out.cbor");
        store.save(path, &value, Format::Cbor).unwrap();
        assert_eq!(store.load(path, Format::Cbor).unwrap(), value);
    }

    #[test]
    fn test_no_staging_file_left_behind() {
        let (_dir, store) = temp_store();
        let path = Utf8Path::new("out.json");
        store.save(path, &Value::Int(1), Format::Json).unwrap();
        assert!(store.exists(path));
        assert!(!store.exists(Utf8Path::new("out.json.tmp")));
    }

    #[test]
    fn test_outside_root_rejected() {
        let (_dir, store) = temp_store();
        let result = store.relative(Utf8Path::new("/etc/passwd"));
        assert!(matches!(result, Err(StoreError::OutsideRoot(..))));
    }

    #[cfg(unix)]
    #[test]
    fn test_dereference_resolves_symlinks() {
        let (_dir, store) = temp_store();
        store
            .save(Utf8Path::new("real.json"), &Value::Int(1), Format::Json)
            .unwrap();
        std::os::unix::fs::symlink(
            store.full_path(Utf8Path::new("real.json")),
            store.full_path(Utf8Path::new("link.json")),
        )
        .unwrap();
        assert_eq!(
            store.dereference(Utf8Path::new("link.json")).unwrap(),
            Utf8PathBuf::from("real.json")
        );
    }
}
