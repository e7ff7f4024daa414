use crate::{AllocationDocument, Error, SchemaDocument};
use forma_models::{
    path_crosses_array, AttrId, AttributeMetadata, HotColumn, SchemaId, ValueType,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// AttributeCache is the read-only per-schema view served by the registry:
/// the authoritative binding from JSON paths to attribute metadata, plus the
/// full id-allocation ledger. Instances are immutable once built; reloads
/// produce new instances rather than mutating ones already handed out.
#[derive(Debug, Clone)]
pub struct AttributeCache {
    schema_id: SchemaId,
    name: String,
    version: u32,
    by_path: BTreeMap<String, AttributeMetadata>,
    by_id: HashMap<AttrId, String>,
    required: BTreeSet<String>,
    allocation: BTreeMap<String, AttrId>,
    json_schema: Option<serde_json::Value>,
}

impl AttributeCache {
    /// Merge a schema document with its persisted allocation ledger.
    ///
    /// Ids pinned by the document and ids recorded in the ledger must agree;
    /// a disagreement fails the load rather than silently renumbering.
    /// Paths new to both documents are sorted lexicographically and receive
    /// `max_existing_id + 1, +2, …`. Ledger paths absent from the document
    /// keep their ids as tombstones.
    pub fn build(
        schema_id: SchemaId,
        doc: &SchemaDocument,
        allocation: &AllocationDocument,
    ) -> Result<Self, Error> {
        let schema = &doc.name;
        let mut assigned = allocation.assigned.clone();

        let mut ids_in_use: HashMap<AttrId, String> = HashMap::new();
        for (path, &id) in &assigned {
            if let Some(first) = ids_in_use.insert(id, path.clone()) {
                return Err(Error::AttributeIdReused {
                    schema: schema.clone(),
                    id,
                    first,
                    second: path.clone(),
                });
            }
        }

        // Reconcile ids pinned by the schema document against the ledger.
        for decl in &doc.attributes {
            let Some(pinned) = decl.attribute_id else {
                continue;
            };
            match assigned.get(&decl.path) {
                Some(&recorded) if recorded != pinned => {
                    return Err(Error::AttributeIdConflict {
                        schema: schema.clone(),
                        path: decl.path.clone(),
                        declared: pinned,
                        recorded,
                    });
                }
                Some(_) => {}
                None => {
                    if let Some(first) = ids_in_use.insert(pinned, decl.path.clone()) {
                        return Err(Error::AttributeIdReused {
                            schema: schema.clone(),
                            id: pinned,
                            first,
                            second: decl.path.clone(),
                        });
                    }
                    assigned.insert(decl.path.clone(), pinned);
                }
            }
        }

        // Deterministic assignment for newly discovered paths.
        let newcomers: BTreeSet<&str> = doc
            .attributes
            .iter()
            .map(|decl| decl.path.as_str())
            .filter(|path| !assigned.contains_key(*path))
            .collect();

        let mut next = match assigned.values().max() {
            Some(max) => max.next().ok_or_else(|| Error::IdSpaceExhausted {
                schema: schema.clone(),
            })?,
            None => AttrId::new(0).expect("zero is a valid attribute id"),
        };
        for path in newcomers {
            assigned.insert(path.to_string(), next);
            ids_in_use.insert(next, path.to_string());
            next = next.next().ok_or_else(|| Error::IdSpaceExhausted {
                schema: schema.clone(),
            })?;
        }

        // Materialize metadata, validating the binding invariants.
        let mut by_path = BTreeMap::new();
        let mut by_id = HashMap::new();
        let mut bound_columns: HashMap<HotColumn, String> = HashMap::new();

        for decl in &doc.attributes {
            let id = assigned[&decl.path];
            let binding = decl.binding();

            if let Some(binding) = &binding {
                if path_crosses_array(&decl.path) {
                    return Err(Error::BoundInsideArray {
                        schema: schema.clone(),
                        path: decl.path.clone(),
                        column: binding.column,
                    });
                }
                if !binding.compatible_with(decl.value_type) {
                    return Err(Error::IncompatibleBinding {
                        schema: schema.clone(),
                        path: decl.path.clone(),
                        value_type: decl.value_type,
                        column: binding.column,
                        encoding: binding.encoding,
                    });
                }
                if let Some(first) = bound_columns.insert(binding.column, decl.path.clone()) {
                    return Err(Error::ColumnReused {
                        schema: schema.clone(),
                        column: binding.column,
                        first,
                        second: decl.path.clone(),
                    });
                }
            }

            let meta = AttributeMetadata::new(id, decl.path.clone(), decl.value_type, binding);
            by_id.insert(id, decl.path.clone());
            if by_path.insert(decl.path.clone(), meta).is_some() {
                return Err(Error::DuplicatePath {
                    schema: schema.clone(),
                    path: decl.path.clone(),
                });
            }
        }

        Ok(Self {
            schema_id,
            name: doc.name.clone(),
            version: doc.version,
            by_path,
            by_id,
            required: doc.required.iter().cloned().collect(),
            allocation: assigned,
            json_schema: doc.json_schema.clone(),
        })
    }

    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn attribute(&self, path: &str) -> Option<&AttributeMetadata> {
        self.by_path.get(path)
    }

    pub fn attribute_by_id(&self, id: AttrId) -> Option<&AttributeMetadata> {
        self.by_id.get(&id).and_then(|path| self.by_path.get(path))
    }

    /// All live attributes, in lexicographic path order.
    pub fn attributes(&self) -> impl Iterator<Item = &AttributeMetadata> + '_ {
        self.by_path.values()
    }

    /// The text-typed attributes, the candidate set for cross-schema search.
    pub fn text_attributes(&self) -> impl Iterator<Item = &AttributeMetadata> + '_ {
        self.attributes()
            .filter(|meta| meta.value_type == ValueType::Text)
    }

    pub fn required(&self) -> &BTreeSet<String> {
        &self.required
    }

    /// The full allocation ledger, including tombstoned paths. This is what
    /// gets persisted back as the next AllocationDocument.
    pub fn allocation(&self) -> &BTreeMap<String, AttrId> {
        &self.allocation
    }

    pub fn json_schema(&self) -> Option<&serde_json::Value> {
        self.json_schema.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::AttributeDecl;
    use forma_models::{Encoding, HotColumn};
    use pretty_assertions::assert_eq;

    fn decl(path: &str, value_type: ValueType) -> AttributeDecl {
        AttributeDecl {
            path: path.to_string(),
            attribute_id: None,
            value_type,
            column: None,
            encoding: None,
        }
    }

    fn doc(attributes: Vec<AttributeDecl>) -> SchemaDocument {
        SchemaDocument {
            name: "lead".to_string(),
            version: 1,
            required: Vec::new(),
            attributes,
            json_schema: None,
        }
    }

    fn schema_id() -> SchemaId {
        SchemaId::new(1).unwrap()
    }

    fn attr(id: i16) -> AttrId {
        AttrId::new(id).unwrap()
    }

    #[test]
    fn new_paths_are_assigned_in_lexicographic_order() {
        let cache = AttributeCache::build(
            schema_id(),
            &doc(vec![
                decl("status", ValueType::Text),
                decl("amount", ValueType::Double),
                decl("contact.email", ValueType::Text),
            ]),
            &AllocationDocument::default(),
        )
        .unwrap();

        assert_eq!(cache.attribute("amount").unwrap().id, attr(0));
        assert_eq!(cache.attribute("contact.email").unwrap().id, attr(1));
        assert_eq!(cache.attribute("status").unwrap().id, attr(2));
    }

    #[test]
    fn assignment_continues_from_the_ledger_maximum() {
        let mut allocation = AllocationDocument::default();
        allocation.assigned.insert("status".to_string(), attr(11));
        allocation.assigned.insert("dropped".to_string(), attr(12));

        let cache = AttributeCache::build(
            schema_id(),
            &doc(vec![
                decl("status", ValueType::Text),
                decl("amount", ValueType::Double),
            ]),
            &allocation,
        )
        .unwrap();

        // `dropped` is tombstoned: absent from lookups, present in the ledger.
        assert_eq!(cache.attribute("status").unwrap().id, attr(11));
        assert_eq!(cache.attribute("amount").unwrap().id, attr(13));
        assert!(cache.attribute("dropped").is_none());
        assert_eq!(cache.allocation()["dropped"], attr(12));
    }

    #[test]
    fn id_disagreement_fails_loudly() {
        let mut allocation = AllocationDocument::default();
        allocation.assigned.insert("status".to_string(), attr(11));

        let mut pinned = decl("status", ValueType::Text);
        pinned.attribute_id = Some(attr(3));

        let err = AttributeCache::build(schema_id(), &doc(vec![pinned]), &allocation).unwrap_err();
        assert!(matches!(err, Error::AttributeIdConflict { .. }), "{err}");
    }

    #[test]
    fn duplicate_pinned_ids_fail() {
        let mut a = decl("a", ValueType::Text);
        a.attribute_id = Some(attr(1));
        let mut b = decl("b", ValueType::Text);
        b.attribute_id = Some(attr(1));

        let err =
            AttributeCache::build(schema_id(), &doc(vec![a, b]), &AllocationDocument::default())
                .unwrap_err();
        assert!(matches!(err, Error::AttributeIdReused { .. }), "{err}");
    }

    #[test]
    fn exclusive_column_bindings() {
        let mut a = decl("a", ValueType::Text);
        a.column = Some(HotColumn::Text01);
        let mut b = decl("b", ValueType::Text);
        b.column = Some(HotColumn::Text01);

        let err =
            AttributeCache::build(schema_id(), &doc(vec![a, b]), &AllocationDocument::default())
                .unwrap_err();
        assert!(matches!(err, Error::ColumnReused { .. }), "{err}");
    }

    #[test]
    fn array_paths_cannot_bind_columns() {
        let mut inside = decl("items[].id", ValueType::Text);
        inside.column = Some(HotColumn::Text01);

        let err = AttributeCache::build(
            schema_id(),
            &doc(vec![inside]),
            &AllocationDocument::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::BoundInsideArray { .. }), "{err}");
    }

    #[test]
    fn incompatible_binding_is_rejected() {
        let mut bad = decl("when", ValueType::Datetime);
        bad.column = Some(HotColumn::Bigint01);
        // Datetime over bigint requires an explicit unix_ms encoding.
        let err = AttributeCache::build(
            schema_id(),
            &doc(vec![bad]),
            &AllocationDocument::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::IncompatibleBinding { .. }), "{err}");

        let mut good = decl("when", ValueType::Datetime);
        good.column = Some(HotColumn::Bigint01);
        good.encoding = Some(Encoding::UnixMs);
        AttributeCache::build(
            schema_id(),
            &doc(vec![good]),
            &AllocationDocument::default(),
        )
        .unwrap();
    }

    #[test]
    fn lookups_are_symmetric() {
        let cache = AttributeCache::build(
            schema_id(),
            &doc(vec![
                decl("status", ValueType::Text),
                decl("amount", ValueType::Double),
            ]),
            &AllocationDocument::default(),
        )
        .unwrap();

        for meta in cache.attributes() {
            assert_eq!(cache.attribute_by_id(meta.id).unwrap().path, meta.path);
        }
    }
}
