//! Filesystem bootstrap for the registry.
//!
//! A schema directory (the `SCHEMA_DIR` environment variable) contains:
//!
//! - `schemas.json` — the persisted `name → schema_id` mapping;
//! - `<name>.schema.json` — the schema document for each mapped name;
//! - `<name>.attrs.json` — the optional id-allocation ledger for the name.

use crate::{AllocationDocument, AttributeCache, Error, SchemaDocument, Snapshot};
use forma_models::SchemaId;
use std::collections::BTreeMap;
use std::path::Path;

/// Load a complete Snapshot from a schema directory.
pub fn load_dir(dir: &Path) -> Result<Snapshot, Error> {
    let mapping: BTreeMap<String, SchemaId> = read_json(&dir.join("schemas.json"))?;

    let mut snapshot = Snapshot::default();
    for (name, schema_id) in mapping {
        let (doc, allocation) = load_documents(dir, &name)?;
        if doc.name != name {
            return Err(Error::SchemaUnknown(format!(
                "{name} (document names itself {:?})",
                doc.name
            )));
        }
        snapshot.insert(AttributeCache::build(schema_id, &doc, &allocation)?)?;
    }

    tracing::info!(schemas = snapshot.len(), dir = %dir.display(), "loaded schema directory");
    Ok(snapshot)
}

/// Load one schema's document pair. The allocation ledger is optional: a
/// schema seen for the first time has no persisted assignments yet.
pub fn load_documents(dir: &Path, name: &str) -> Result<(SchemaDocument, AllocationDocument), Error> {
    let doc: SchemaDocument = read_json(&dir.join(format!("{name}.schema.json")))?;

    let attrs_path = dir.join(format!("{name}.attrs.json"));
    let allocation = if attrs_path.exists() {
        read_json(&attrs_path)?
    } else {
        AllocationDocument::default()
    };

    Ok((doc, allocation))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let bytes = std::fs::read(path).map_err(|err| Error::Io {
        path: path.to_owned(),
        err,
    })?;
    serde_json::from_slice(&bytes).map_err(|err| Error::Parse {
        path: path.to_owned(),
        err,
    })
}
