use crate::Error;
use forma_models::{EavTuple, HotValues, Scalar, ARRAY_MARKER};
use forma_registry::AttributeCache;
use serde_json::{Map, Value};

/// Rebuild the nested JSON document of one record from its hot row cells and
/// EAV tuples.
///
/// Array elements are placed at the exact positions recorded in
/// `array_indices`; intermediate positions that no tuple names are filled
/// with `null`. Tuples for attribute ids or index shapes the cache does not
/// recognise are dropped rather than failing the whole record, since they can
/// be left behind by newer writers.
pub fn from_rows(
    cache: &AttributeCache,
    hot: &HotValues,
    eav: &[EavTuple],
) -> Result<Value, Error> {
    let mut root = Value::Object(Map::new());

    // Bound attributes come straight out of their hot cells.
    for meta in cache.attributes() {
        let Some(binding) = &meta.binding else {
            continue;
        };
        let Some(cell) = hot.get(binding.column) else {
            continue;
        };
        let scalar = binding
            .decode(&cell, meta.value_type)
            .map_err(|err| Error::Coerce {
                path: meta.path.clone(),
                err,
            })?;
        place(&mut root, &segments(&meta.path), &[], scalar.to_json());
    }

    for tuple in eav {
        let Some(meta) = cache.attribute_by_id(tuple.attr_id) else {
            tracing::warn!(
                schema = cache.name(),
                attr_id = tuple.attr_id.as_i16(),
                "dropping eav tuple for unknown attribute id"
            );
            continue;
        };
        let Some(indices) = tuple.indices() else {
            tracing::warn!(
                schema = cache.name(),
                path = %meta.path,
                indices = %tuple.array_indices,
                "dropping eav tuple with malformed array indices"
            );
            continue;
        };
        let scalar = Scalar::from_eav(
            meta.value_type,
            tuple.value_text.as_deref(),
            tuple.value_numeric,
        )
        .map_err(|err| Error::Coerce {
            path: meta.path.clone(),
            err,
        })?;

        let segments = segments(&meta.path);
        let depth: usize = segments.iter().map(|s| s.arrays).sum();
        if depth != indices.len() {
            tracing::warn!(
                schema = cache.name(),
                path = %meta.path,
                indices = %tuple.array_indices,
                "dropping eav tuple whose indices do not match the path shape"
            );
            continue;
        }
        place(&mut root, &segments, &indices, scalar.to_json());
    }

    Ok(root)
}

struct Segment<'p> {
    key: &'p str,
    // Array levels crossed at this segment: one per trailing `[]` marker.
    arrays: usize,
}

fn segments(path: &str) -> Vec<Segment<'_>> {
    path.split('.')
        .map(|raw| {
            let mut key = raw;
            let mut arrays = 0;
            while let Some(stripped) = key.strip_suffix(ARRAY_MARKER) {
                key = stripped;
                arrays += 1;
            }
            Segment { key, arrays }
        })
        .collect()
}

fn place(node: &mut Value, segments: &[Segment<'_>], indices: &[usize], leaf: Value) {
    let Some((segment, rest)) = segments.split_first() else {
        *node = leaf;
        return;
    };

    let map = as_object(node);
    let mut slot = map.entry(segment.key.to_string()).or_insert(Value::Null);
    let mut indices = indices;

    for _ in 0..segment.arrays {
        let (&position, remaining) = indices
            .split_first()
            .expect("index arity was checked against the path shape");
        let items = as_array(slot);
        while items.len() <= position {
            items.push(Value::Null);
        }
        slot = &mut items[position];
        indices = remaining;
    }

    place(slot, rest, indices, leaf);
}

fn as_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    node.as_object_mut().expect("node was just made an object")
}

fn as_array(node: &mut Value) -> &mut Vec<Value> {
    if !node.is_array() {
        *node = Value::Array(Vec::new());
    }
    node.as_array_mut().expect("node was just made an array")
}
