//! Resources: identity plus a nested, path-addressable property tree.
//!
//! Property mutations go through [`Resource::set_property`],
//! [`Resource::append_property`], and [`Resource::remove_property`], all
//! keyed by [`PropertyPath`]. [`Resource::walk_properties`] visits every
//! leaf with its full path; mutations requested by the visitor are applied
//! after the traversal so the walk never observes its own edits.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::PropertyError;
use crate::id::ResourceId;
use crate::path::{PathSegment, PropertyPath};
use crate::value::Value;

/// A concrete (or abstract) node in the resource graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Value>,
    /// Set when the resource is imported rather than managed; holds the
    /// provider-side identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported: Option<String>,
}

/// Decision returned by a [`Resource::walk_properties`] visitor for each leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyVisit {
    Keep,
    Set(Value),
    Remove,
}

impl Resource {
    pub fn new(id: ResourceId) -> Self {
        Resource {
            id,
            properties: IndexMap::new(),
            imported: None,
        }
    }

    /// Reads the value at `path`, if the slot exists.
    pub fn get_property(&self, path: &PropertyPath) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        let root = match first {
            PathSegment::Field(name) | PathSegment::Key(name) => self.properties.get(name)?,
            PathSegment::Index(_) => return None,
        };
        descend(root, rest)
    }

    /// Writes `value` at `path`, creating intermediate maps for field and
    /// key segments that do not exist yet. List indexes must already exist
    /// (or equal the list length, which appends).
    pub fn set_property(&mut self, path: &PropertyPath, value: Value) -> Result<(), PropertyError> {
        let (first, rest) = split_root(&self.id, path)?;
        let slot = self
            .properties
            .entry(first.to_string())
            .or_insert(Value::Null);
        write_at(slot, rest, value, &self.id, path)
    }

    /// Appends `value` to the list at `path` (creating the list if the slot
    /// is null or absent). Appending an equal value fails with
    /// [`PropertyError::UniqueViolation`]; merging a map into a map inserts
    /// all entries.
    pub fn append_property(
        &mut self,
        path: &PropertyPath,
        value: Value,
    ) -> Result<(), PropertyError> {
        let (first, rest) = split_root(&self.id, path)?;
        let slot = self
            .properties
            .entry(first.to_string())
            .or_insert(Value::Null);
        let slot = descend_mut_creating(slot, rest, &self.id, path)?;
        match slot {
            Value::Null => {
                *slot = Value::List(vec![value]);
                Ok(())
            }
            Value::List(items) => {
                if items.contains(&value) {
                    return Err(PropertyError::UniqueViolation {
                        resource: self.id.clone(),
                        path: path.to_string(),
                    });
                }
                items.push(value);
                Ok(())
            }
            Value::Map(entries) => match value {
                Value::Map(new_entries) => {
                    entries.extend(new_entries);
                    Ok(())
                }
                other => Err(PropertyError::TypeMismatch {
                    resource: self.id.clone(),
                    path: path.to_string(),
                    expected: "map".to_string(),
                    actual: other.type_name().to_string(),
                }),
            },
            other => Err(PropertyError::TypeMismatch {
                resource: self.id.clone(),
                path: path.to_string(),
                expected: "list".to_string(),
                actual: other.type_name().to_string(),
            }),
        }
    }

    /// Removes the slot at `path`. With `value`, removes only the matching
    /// element from the list at `path` instead.
    pub fn remove_property(
        &mut self,
        path: &PropertyPath,
        value: Option<&Value>,
    ) -> Result<(), PropertyError> {
        if let Some(value) = value {
            let id = self.id.clone();
            let slot = self
                .get_property_mut(path)
                .ok_or_else(|| PropertyError::PathNotFound {
                    resource: id.clone(),
                    path: path.to_string(),
                })?;
            return match slot {
                Value::List(items) => {
                    let before = items.len();
                    items.retain(|item| item != value);
                    if items.len() == before {
                        Err(PropertyError::PathNotFound {
                            resource: id.clone(),
                            path: path.to_string(),
                        })
                    } else {
                        Ok(())
                    }
                }
                other => Err(PropertyError::TypeMismatch {
                    resource: id,
                    path: path.to_string(),
                    expected: "list".to_string(),
                    actual: other.type_name().to_string(),
                }),
            };
        }

        let segments = path.segments();
        let (first, rest) = split_root(&self.id, path)?;
        if rest.is_empty() {
            self.properties
                .shift_remove(first)
                .map(|_| ())
                .ok_or_else(|| PropertyError::PathNotFound {
                    resource: self.id.clone(),
                    path: path.to_string(),
                })
        } else {
            let parent_path = PropertyPath(segments[..segments.len() - 1].to_vec());
            let last = segments.last().cloned();
            let id = self.id.clone();
            let parent = self
                .get_property_mut(&parent_path)
                .ok_or_else(|| PropertyError::PathNotFound {
                    resource: id.clone(),
                    path: path.to_string(),
                })?;
            let removed = match (parent, last) {
                (Value::Map(entries), Some(PathSegment::Field(k) | PathSegment::Key(k))) => {
                    entries.shift_remove(&k).is_some()
                }
                (Value::List(items), Some(PathSegment::Index(i))) if i < items.len() => {
                    items.remove(i);
                    true
                }
                _ => false,
            };
            if removed {
                Ok(())
            } else {
                Err(PropertyError::PathNotFound {
                    resource: self.id.clone(),
                    path: path.to_string(),
                })
            }
        }
    }

    fn get_property_mut(&mut self, path: &PropertyPath) -> Option<&mut Value> {
        let (first, rest) = path.segments().split_first()?;
        let root = match first {
            PathSegment::Field(name) | PathSegment::Key(name) => self.properties.get_mut(name)?,
            PathSegment::Index(_) => return None,
        };
        descend_mut(root, rest)
    }

    /// Visits every leaf property (scalars, ids, refs, and empty containers)
    /// with its full path. Mutations returned by the visitor are collected
    /// and applied after the traversal completes.
    pub fn walk_properties<F>(&mut self, mut visitor: F) -> Result<(), PropertyError>
    where
        F: FnMut(&PropertyPath, &Value) -> PropertyVisit,
    {
        let mut sets: Vec<(PropertyPath, Value)> = Vec::new();
        let mut removes: Vec<PropertyPath> = Vec::new();
        for (name, value) in &self.properties {
            let path = PropertyPath(vec![PathSegment::Field(name.clone())]);
            walk_value(&path, value, &mut visitor, &mut sets, &mut removes);
        }
        // Removes run in reverse traversal order so that deleting one list
        // element never shifts the index of a later pending delete.
        removes.sort_by(|a, b| compare_segments(b.segments(), a.segments()));
        for path in removes {
            self.remove_property(&path, None)?;
        }
        for (path, value) in sets {
            self.set_property(&path, value)?;
        }
        Ok(())
    }

    /// Rewrites every embedded reference to `old` so it points at `new`.
    pub fn rewrite_references(&mut self, old: &ResourceId, new: &ResourceId) {
        for value in self.properties.values_mut() {
            value.rewrite_id(old, new);
        }
    }

    /// Drops every reference to `removed`: list elements are deleted and
    /// scalar slots are removed outright.
    pub fn remove_references(&mut self, removed: &ResourceId) -> Result<(), PropertyError> {
        let target = removed.clone();
        self.walk_properties(|_, value| {
            let refs = value.referenced_ids();
            if refs.iter().any(|id| **id == target) {
                PropertyVisit::Remove
            } else {
                PropertyVisit::Keep
            }
        })
    }
}

fn split_root<'a>(
    id: &ResourceId,
    path: &'a PropertyPath,
) -> Result<(&'a str, &'a [PathSegment]), PropertyError> {
    match path.segments().split_first() {
        Some((PathSegment::Field(name) | PathSegment::Key(name), rest)) => Ok((name, rest)),
        _ => Err(PropertyError::InvalidPath {
            path: path.to_string(),
        }),
    }
}

fn descend<'a>(mut current: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    for segment in segments {
        current = match (current, segment) {
            (Value::Map(entries), PathSegment::Field(k) | PathSegment::Key(k)) => entries.get(k)?,
            (Value::List(items), PathSegment::Index(i)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

fn descend_mut<'a>(mut current: &'a mut Value, segments: &[PathSegment]) -> Option<&'a mut Value> {
    for segment in segments {
        current = match (current, segment) {
            (Value::Map(entries), PathSegment::Field(k) | PathSegment::Key(k)) => {
                entries.get_mut(k)?
            }
            (Value::List(items), PathSegment::Index(i)) => items.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Like [`descend_mut`] but materializes missing maps for field/key segments
/// (null slots become maps). List indexes are never created implicitly.
fn descend_mut_creating<'a>(
    mut current: &'a mut Value,
    segments: &[PathSegment],
    id: &ResourceId,
    full_path: &PropertyPath,
) -> Result<&'a mut Value, PropertyError> {
    for segment in segments {
        match segment {
            PathSegment::Field(k) | PathSegment::Key(k) => {
                if current.is_null() {
                    *current = Value::Map(IndexMap::new());
                }
                current = match current {
                    Value::Map(entries) => entries.entry(k.clone()).or_insert(Value::Null),
                    other => {
                        return Err(PropertyError::TypeMismatch {
                            resource: id.clone(),
                            path: full_path.to_string(),
                            expected: "map".to_string(),
                            actual: other.type_name().to_string(),
                        })
                    }
                };
            }
            PathSegment::Index(i) => {
                current = match current {
                    Value::List(items) => {
                        if *i < items.len() {
                            &mut items[*i]
                        } else {
                            return Err(PropertyError::PathNotFound {
                                resource: id.clone(),
                                path: full_path.to_string(),
                            });
                        }
                    }
                    Value::Null => {
                        return Err(PropertyError::PathNotFound {
                            resource: id.clone(),
                            path: full_path.to_string(),
                        })
                    }
                    other => {
                        return Err(PropertyError::TypeMismatch {
                            resource: id.clone(),
                            path: full_path.to_string(),
                            expected: "list".to_string(),
                            actual: other.type_name().to_string(),
                        })
                    }
                };
            }
        }
    }
    Ok(current)
}

fn write_at(
    slot: &mut Value,
    segments: &[PathSegment],
    value: Value,
    id: &ResourceId,
    full_path: &PropertyPath,
) -> Result<(), PropertyError> {
    match segments.split_last() {
        None => {
            *slot = value;
            Ok(())
        }
        Some((last, parents)) => {
            let parent = descend_mut_creating(slot, parents, id, full_path)?;
            match last {
                PathSegment::Field(k) | PathSegment::Key(k) => {
                    if parent.is_null() {
                        *parent = Value::Map(IndexMap::new());
                    }
                    match parent {
                        Value::Map(entries) => {
                            entries.insert(k.clone(), value);
                            Ok(())
                        }
                        other => Err(PropertyError::TypeMismatch {
                            resource: id.clone(),
                            path: full_path.to_string(),
                            expected: "map".to_string(),
                            actual: other.type_name().to_string(),
                        }),
                    }
                }
                PathSegment::Index(i) => {
                    if parent.is_null() {
                        *parent = Value::List(Vec::new());
                    }
                    match parent {
                        Value::List(items) if *i < items.len() => {
                            items[*i] = value;
                            Ok(())
                        }
                        Value::List(items) if *i == items.len() => {
                            items.push(value);
                            Ok(())
                        }
                        Value::List(_) => Err(PropertyError::PathNotFound {
                            resource: id.clone(),
                            path: full_path.to_string(),
                        }),
                        other => Err(PropertyError::TypeMismatch {
                            resource: id.clone(),
                            path: full_path.to_string(),
                            expected: "list".to_string(),
                            actual: other.type_name().to_string(),
                        }),
                    }
                }
            }
        }
    }
}

fn compare_segments(a: &[PathSegment], b: &[PathSegment]) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    for (sa, sb) in a.iter().zip(b.iter()) {
        let ord = match (sa, sb) {
            (PathSegment::Index(ia), PathSegment::Index(ib)) => ia.cmp(ib),
            (
                PathSegment::Field(ka) | PathSegment::Key(ka),
                PathSegment::Field(kb) | PathSegment::Key(kb),
            ) => ka.cmp(kb),
            (PathSegment::Index(_), _) => Ordering::Less,
            (_, PathSegment::Index(_)) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn walk_value<F>(
    path: &PropertyPath,
    value: &Value,
    visitor: &mut F,
    sets: &mut Vec<(PropertyPath, Value)>,
    removes: &mut Vec<PropertyPath>,
) where
    F: FnMut(&PropertyPath, &Value) -> PropertyVisit,
{
    match value {
        Value::List(items) if !items.is_empty() => {
            for (i, item) in items.iter().enumerate() {
                walk_value(&path.join(PathSegment::Index(i)), item, visitor, sets, removes);
            }
        }
        Value::Map(entries) if !entries.is_empty() => {
            for (key, item) in entries {
                walk_value(
                    &path.join(PathSegment::Key(key.clone())),
                    item,
                    visitor,
                    sets,
                    removes,
                );
            }
        }
        leaf => match visitor(path, leaf) {
            PropertyVisit::Keep => {}
            PropertyVisit::Set(new_value) => sets.push((path.clone(), new_value)),
            PropertyVisit::Remove => removes.push(path.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(name: &str) -> Resource {
        Resource::new(ResourceId::new("aws", "lambda_function", "", name))
    }

    #[test]
    fn set_and_get_nested() {
        let mut r = resource("api");
        r.set_property(
            &"EnvironmentVariables[\"DB_HOST\"]".parse().unwrap(),
            Value::from("localhost"),
        )
        .unwrap();
        let got = r
            .get_property(&"EnvironmentVariables[\"DB_HOST\"]".parse().unwrap())
            .unwrap();
        assert_eq!(got.as_str(), Some("localhost"));
    }

    #[test]
    fn set_creates_intermediate_maps() {
        let mut r = resource("api");
        r.set_property(&"a.b.c".parse().unwrap(), Value::Int(1))
            .unwrap();
        assert_eq!(
            r.get_property(&"a.b.c".parse().unwrap()),
            Some(&Value::Int(1))
        );
    }

    #[test]
    fn append_builds_list_and_rejects_duplicates() {
        let mut r = resource("api");
        let path: PropertyPath = "Subnets".parse().unwrap();
        let subnet: ResourceId = "aws:subnet:vpc:private0".parse().unwrap();
        r.append_property(&path, Value::Id(subnet.clone())).unwrap();
        let err = r.append_property(&path, Value::Id(subnet)).unwrap_err();
        assert!(matches!(err, PropertyError::UniqueViolation { .. }));
    }

    #[test]
    fn set_list_index_out_of_bounds() {
        let mut r = resource("api");
        let err = r
            .set_property(&"Subnets[3]".parse().unwrap(), Value::Int(1))
            .unwrap_err();
        assert!(matches!(err, PropertyError::PathNotFound { .. }));
    }

    #[test]
    fn remove_list_element_by_value() {
        let mut r = resource("api");
        let path: PropertyPath = "Subnets".parse().unwrap();
        r.append_property(&path, Value::from("a")).unwrap();
        r.append_property(&path, Value::from("b")).unwrap();
        r.remove_property(&path, Some(&Value::from("a"))).unwrap();
        assert_eq!(r.get_property(&path).unwrap().as_list().unwrap().len(), 1);
    }

    #[test]
    fn walk_visits_leaves_with_paths() {
        let mut r = resource("api");
        r.set_property(&"MemorySize".parse().unwrap(), Value::Int(512))
            .unwrap();
        r.append_property(&"Subnets".parse().unwrap(), Value::from("a"))
            .unwrap();
        let mut seen = Vec::new();
        r.walk_properties(|path, _| {
            seen.push(path.to_string());
            PropertyVisit::Keep
        })
        .unwrap();
        assert_eq!(seen, vec!["MemorySize", "Subnets[0]"]);
    }

    #[test]
    fn walk_mutations_apply_after_traversal() {
        let mut r = resource("api");
        r.set_property(&"Timeout".parse().unwrap(), Value::Int(3))
            .unwrap();
        r.walk_properties(|path, value| {
            // The walk sees the original value even while a set is pending.
            assert_eq!(value, &Value::Int(3));
            PropertyVisit::Set(Value::Int(30))
        })
        .unwrap();
        assert_eq!(
            r.get_property(&"Timeout".parse().unwrap()),
            Some(&Value::Int(30))
        );
    }

    #[test]
    fn remove_references_deletes_list_entries_and_nulls_scalars() {
        let mut r = resource("api");
        let gone: ResourceId = "aws:subnet:vpc:private0".parse().unwrap();
        let kept: ResourceId = "aws:subnet:vpc:private1".parse().unwrap();
        r.append_property(&"Subnets".parse().unwrap(), Value::Id(gone.clone()))
            .unwrap();
        r.append_property(&"Subnets".parse().unwrap(), Value::Id(kept.clone()))
            .unwrap();
        r.set_property(&"Primary".parse().unwrap(), Value::Id(gone.clone()))
            .unwrap();
        r.remove_references(&gone).unwrap();
        assert_eq!(
            r.get_property(&"Subnets".parse().unwrap()).unwrap(),
            &Value::List(vec![Value::Id(kept)])
        );
        assert!(r.get_property(&"Primary".parse().unwrap()).is_none());
    }
}
