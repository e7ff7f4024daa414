use forma_models::{AttrId, Encoding, HotColumn, SchemaId, ValueType};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

mod cache;
mod document;
pub mod fs;

pub use cache::AttributeCache;
pub use document::{AllocationDocument, AttributeDecl, SchemaDocument};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown schema {0:?}")]
    SchemaUnknown(String),
    #[error("unknown schema id {0}")]
    SchemaIdUnknown(SchemaId),
    #[error("duplicate schema name {0:?}")]
    DuplicateSchemaName(String),
    #[error("schema id {0} is used by more than one schema")]
    DuplicateSchemaId(SchemaId),
    #[error(
        "schema {schema:?}: attribute id for {path:?} disagrees between documents \
         (document pins {declared}, ledger records {recorded})"
    )]
    AttributeIdConflict {
        schema: String,
        path: String,
        declared: AttrId,
        recorded: AttrId,
    },
    #[error("schema {schema:?}: attribute id {id} is assigned to both {first:?} and {second:?}")]
    AttributeIdReused {
        schema: String,
        id: AttrId,
        first: String,
        second: String,
    },
    #[error("schema {schema:?}: attribute {path:?} is declared twice")]
    DuplicatePath { schema: String, path: String },
    #[error("schema {schema:?}: column {column} is bound by both {first:?} and {second:?}")]
    ColumnReused {
        schema: String,
        column: HotColumn,
        first: String,
        second: String,
    },
    #[error("schema {schema:?}: attribute {path:?} crosses an array and cannot bind {column}")]
    BoundInsideArray {
        schema: String,
        path: String,
        column: HotColumn,
    },
    #[error(
        "schema {schema:?}: attribute {path:?} of type {value_type} cannot bind {column} \
         with encoding {encoding:?}"
    )]
    IncompatibleBinding {
        schema: String,
        path: String,
        value_type: ValueType,
        column: HotColumn,
        encoding: Encoding,
    },
    #[error("schema {schema:?}: attribute id space is exhausted")]
    IdSpaceExhausted { schema: String },
    #[error("failed to read {path}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to parse {path}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        err: serde_json::Error,
    },
}

/// Snapshot is one immutable generation of the registry: every schema's
/// AttributeCache, indexed by name and by id.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    by_name: BTreeMap<String, Arc<AttributeCache>>,
    by_id: HashMap<SchemaId, Arc<AttributeCache>>,
}

impl Snapshot {
    pub fn insert(&mut self, cache: AttributeCache) -> Result<(), Error> {
        if self.by_name.contains_key(cache.name()) {
            return Err(Error::DuplicateSchemaName(cache.name().to_string()));
        }
        if self.by_id.contains_key(&cache.schema_id()) {
            return Err(Error::DuplicateSchemaId(cache.schema_id()));
        }
        let cache = Arc::new(cache);
        self.by_name.insert(cache.name().to_string(), cache.clone());
        self.by_id.insert(cache.schema_id(), cache);
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> Result<Arc<AttributeCache>, Error> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| Error::SchemaUnknown(name.to_string()))
    }

    pub fn get_by_id(&self, id: SchemaId) -> Result<Arc<AttributeCache>, Error> {
        self.by_id
            .get(&id)
            .cloned()
            .ok_or(Error::SchemaIdUnknown(id))
    }

    /// Schema names in stable (lexicographic) order.
    pub fn schema_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.by_name.keys().map(String::as_str)
    }

    pub fn caches(&self) -> impl Iterator<Item = &Arc<AttributeCache>> + '_ {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Registry is the process-wide handle over the current Snapshot.
///
/// Lookups clone out `Arc`s, so holders keep the generation they captured;
/// `swap` publishes a new generation atomically without disturbing them.
/// Request paths never mutate the registry.
#[derive(Debug)]
pub struct Registry {
    inner: RwLock<Arc<Snapshot>>,
}

impl Registry {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            inner: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Build every cache from `(schema_id, document, allocation)` triples.
    pub fn from_documents<'a, I>(documents: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (SchemaId, &'a SchemaDocument, &'a AllocationDocument)>,
    {
        let mut snapshot = Snapshot::default();
        for (schema_id, doc, allocation) in documents {
            snapshot.insert(AttributeCache::build(schema_id, doc, allocation)?)?;
        }
        Ok(Self::new(snapshot))
    }

    pub fn get_by_name(&self, name: &str) -> Result<Arc<AttributeCache>, Error> {
        self.snapshot().get_by_name(name)
    }

    pub fn get_by_id(&self, id: SchemaId) -> Result<Arc<AttributeCache>, Error> {
        self.snapshot().get_by_id(id)
    }

    pub fn list_schemas(&self) -> Vec<String> {
        self.snapshot()
            .schema_names()
            .map(str::to_string)
            .collect()
    }

    /// The current generation. Callers hold it for the duration of one
    /// request so every lookup within the request is consistent.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.read().unwrap().clone()
    }

    /// Atomically publish a new generation. In-flight holders of the old
    /// snapshot are unaffected.
    pub fn swap(&self, snapshot: Snapshot) {
        let generation = Arc::new(snapshot);
        *self.inner.write().unwrap() = generation;
    }
}
