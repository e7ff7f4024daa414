use crate::Error;
use forma_models::{EavTuple, HotValues, Scalar, ARRAY_MARKER};
use forma_registry::AttributeCache;
use serde_json::Value;

/// How to treat leaf paths the schema does not know about.
/// Lenient dropping is the default so that newer writers can add attributes
/// before every reader's metadata catches up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Strictness {
    Lenient,
    Strict,
}

/// The flattened form of one record: bound hot-column cells plus the EAV
/// tuples for everything else.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Flattened {
    pub hot: HotValues,
    pub eav: Vec<EavTuple>,
}

/// Flatten a nested JSON record into attribute tuples.
///
/// Leaves are addressed by their canonical path: object keys joined with
/// `.`, and `[]` appended to a segment for each array level it crosses.
/// Array positions along the way are collected into the tuple's
/// `array_indices`. `null` leaves are skipped entirely.
pub fn to_attributes(
    cache: &AttributeCache,
    document: &Value,
    strictness: Strictness,
) -> Result<Flattened, Error> {
    let Value::Object(map) = document else {
        return Err(Error::RootNotObject);
    };

    let mut out = Flattened::default();
    let mut path = String::new();
    let mut indices = Vec::new();

    for (key, child) in map {
        walk(cache, strictness, &mut path, &mut indices, key, child, &mut out)?;
    }
    Ok(out)
}

fn walk(
    cache: &AttributeCache,
    strictness: Strictness,
    path: &mut String,
    indices: &mut Vec<usize>,
    key: &str,
    value: &Value,
    out: &mut Flattened,
) -> Result<(), Error> {
    let parent_len = path.len();
    if !path.is_empty() {
        path.push('.');
    }
    path.push_str(key);

    descend(cache, strictness, path, indices, value, out)?;

    path.truncate(parent_len);
    Ok(())
}

fn descend(
    cache: &AttributeCache,
    strictness: Strictness,
    path: &mut String,
    indices: &mut Vec<usize>,
    value: &Value,
    out: &mut Flattened,
) -> Result<(), Error> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                walk(cache, strictness, path, indices, key, child, out)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            path.push_str(ARRAY_MARKER);
            for (position, child) in items.iter().enumerate() {
                indices.push(position);
                descend(cache, strictness, path, indices, child, out)?;
                indices.pop();
            }
            path.truncate(path.len() - ARRAY_MARKER.len());
            Ok(())
        }
        Value::Null => Ok(()),
        leaf => emit(cache, strictness, path, indices, leaf, out),
    }
}

fn emit(
    cache: &AttributeCache,
    strictness: Strictness,
    path: &str,
    indices: &[usize],
    leaf: &Value,
    out: &mut Flattened,
) -> Result<(), Error> {
    let Some(meta) = cache.attribute(path) else {
        return match strictness {
            Strictness::Strict => Err(Error::UnknownAttribute {
                path: path.to_string(),
            }),
            Strictness::Lenient => {
                tracing::debug!(schema = cache.name(), path, "dropping unknown attribute");
                Ok(())
            }
        };
    };

    let scalar = Scalar::from_json(meta.value_type, leaf).map_err(|err| Error::Coerce {
        path: path.to_string(),
        err,
    })?;

    match &meta.binding {
        Some(binding) if indices.is_empty() => {
            let cell = binding.encode(&scalar).map_err(|err| Error::Coerce {
                path: path.to_string(),
                err,
            })?;
            out.hot
                .set(binding.column, cell)
                .map_err(|err| Error::Column {
                    path: path.to_string(),
                    err,
                })
        }
        Some(binding) => Err(Error::BoundUnderArray {
            path: path.to_string(),
            column: binding.column,
        }),
        None => {
            out.eav.push(EavTuple::new(meta.id, indices, &scalar));
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lead_cache;
    use forma_models::{AttrId, HotColumn, HotValue};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn attr(cache: &AttributeCache, path: &str) -> AttrId {
        cache.attribute(path).unwrap().id
    }

    #[test]
    fn scalars_split_between_hot_and_eav() {
        let cache = lead_cache();
        let flat = to_attributes(
            &cache,
            &json!({"status": "hot", "amount": 150.0}),
            Strictness::Lenient,
        )
        .unwrap();

        assert_eq!(
            flat.hot.get(HotColumn::Double01),
            Some(HotValue::Double(150.0))
        );
        assert_eq!(
            flat.eav,
            vec![EavTuple {
                attr_id: attr(&cache, "status"),
                array_indices: String::new(),
                value_text: Some("hot".to_string()),
                value_numeric: None,
            }]
        );
    }

    #[test]
    fn array_elements_carry_their_indices() {
        let cache = lead_cache();
        let flat = to_attributes(
            &cache,
            &json!({"items": [{"id": "a"}, {"id": "b"}]}),
            Strictness::Lenient,
        )
        .unwrap();

        let id = attr(&cache, "items[].id");
        assert_eq!(
            flat.eav,
            vec![
                EavTuple {
                    attr_id: id,
                    array_indices: "0".to_string(),
                    value_text: Some("a".to_string()),
                    value_numeric: None,
                },
                EavTuple {
                    attr_id: id,
                    array_indices: "1".to_string(),
                    value_text: Some("b".to_string()),
                    value_numeric: None,
                },
            ]
        );
    }

    #[test]
    fn scalar_arrays_use_the_bare_marker_path() {
        let cache = lead_cache();
        let flat = to_attributes(&cache, &json!({"tags": ["x", "y"]}), Strictness::Lenient).unwrap();
        assert_eq!(flat.eav.len(), 2);
        assert_eq!(flat.eav[0].attr_id, attr(&cache, "tags[]"));
        assert_eq!(flat.eav[1].array_indices, "1");
    }

    #[test]
    fn null_leaves_are_skipped_and_empty_strings_kept() {
        let cache = lead_cache();
        let flat = to_attributes(
            &cache,
            &json!({"status": "", "amount": null}),
            Strictness::Lenient,
        )
        .unwrap();

        assert!(flat.hot.is_empty());
        assert_eq!(flat.eav[0].value_text.as_deref(), Some(""));
    }

    #[test]
    fn unknown_paths_drop_or_fail_by_strictness() {
        let cache = lead_cache();
        let doc = json!({"status": "hot", "novelty": 3});

        let flat = to_attributes(&cache, &doc, Strictness::Lenient).unwrap();
        assert_eq!(flat.eav.len(), 1);

        let err = to_attributes(&cache, &doc, Strictness::Strict).unwrap_err();
        assert!(matches!(err, Error::UnknownAttribute { path } if path == "novelty"));
    }

    #[test]
    fn coercion_failures_name_the_path() {
        let cache = lead_cache();
        let err = to_attributes(
            &cache,
            &json!({"contact": {"email": 42}}),
            Strictness::Lenient,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Coerce { path, .. } if path == "contact.email"));
    }

    #[test]
    fn non_object_roots_are_rejected() {
        let cache = lead_cache();
        assert!(matches!(
            to_attributes(&cache, &json!([1, 2]), Strictness::Lenient),
            Err(Error::RootNotObject)
        ));
    }
}
