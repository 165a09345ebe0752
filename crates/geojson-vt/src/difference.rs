//! Incremental source updates
//!
//! A [`SourceDiff`] describes additions, removals and in-place updates of GeoJSON features
//! by id. Applying it produces a new source set plus the list of features whose tiles
//! must be invalidated, the input set is never mutated.

use crate::convert::{convert_feature, convert_geometry};
use crate::wrap::wrap;
use crate::{Feature, FeatureId, JsonObject, Options, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// A set of changes to apply to the source data of an index
#[derive(Debug, Clone, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(default, rename_all = "camelCase")
)]
pub struct SourceDiff {
    /// Remove every feature before applying the rest of the diff
    pub remove_all: bool,
    /// Ids of the features to remove
    pub remove: Vec<FeatureId>,
    /// Features to add, replacing existing features with the same id
    pub add: Vec<geojson::Feature>,
    /// Per-feature geometry and property changes
    pub update: Vec<FeatureDiff>,
}

impl SourceDiff {
    /// Whether applying the diff would change nothing
    pub fn is_empty(&self) -> bool {
        !self.remove_all
            && self.remove.is_empty()
            && self.add.is_empty()
            && self.update.iter().all(FeatureDiff::is_empty)
    }
}

/// Changes to a single feature, identified by id
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct FeatureDiff {
    pub id: FeatureId,
    #[cfg_attr(feature = "serde", serde(default))]
    pub new_geometry: Option<geojson::Geometry>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub add_or_update_properties: Vec<PropertyUpdate>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub remove_properties: Vec<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub remove_all_properties: bool,
}

impl FeatureDiff {
    /// An update of `id` that changes nothing yet
    pub fn new(id: impl Into<FeatureId>) -> Self {
        Self {
            id: id.into(),
            new_geometry: None,
            add_or_update_properties: Vec::new(),
            remove_properties: Vec::new(),
            remove_all_properties: false,
        }
    }

    /// Whether the update changes the feature's properties
    pub fn changes_properties(&self) -> bool {
        self.remove_all_properties
            || !self.remove_properties.is_empty()
            || !self.add_or_update_properties.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.new_geometry.is_none() && !self.changes_properties()
    }

    /// Fold a later update of the same feature into this one
    ///
    /// The result has the same effect as applying `self` and then `later`.
    fn merge(&mut self, later: &FeatureDiff) {
        if let Some(geometry) = &later.new_geometry {
            self.new_geometry = Some(geometry.clone());
        }
        if later.remove_all_properties {
            self.remove_all_properties = true;
            self.remove_properties.clear();
            self.add_or_update_properties.clear();
        }
        for key in &later.remove_properties {
            self.add_or_update_properties.retain(|p| &p.key != key);
            if !self.remove_properties.contains(key) {
                self.remove_properties.push(key.clone());
            }
        }
        for update in &later.add_or_update_properties {
            self.add_or_update_properties.retain(|p| p.key != update.key);
            self.add_or_update_properties.push(update.clone());
        }
    }
}

/// A property to set on a feature
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PropertyUpdate {
    pub key: String,
    pub value: serde_json::Value,
}

/// Apply the property changes of `diff` to a property map
///
/// All properties are removed first if requested, then the listed keys, then the
/// updates are written.
pub fn apply_property_updates(tags: Option<&JsonObject>, diff: &FeatureDiff) -> JsonObject {
    let mut tags = if diff.remove_all_properties {
        JsonObject::new()
    } else {
        tags.cloned().unwrap_or_default()
    };
    for key in &diff.remove_properties {
        tags.remove(key);
    }
    for update in &diff.add_or_update_properties {
        tags.insert(update.key.clone(), update.value.clone());
    }
    tags
}

/// Combine two diffs into one with the same effect as applying `existing` then `new`
///
/// A removal cancels earlier additions and updates of the same id and is kept in the
/// result. An addition cancels earlier removals and updates of the same id. An update
/// of a feature added by `existing` is folded into that addition.
pub fn merge_source_diffs(existing: &SourceDiff, new: &SourceDiff) -> SourceDiff {
    #[cfg(feature = "profiling")]
    profiling::scope!("merge_source_diffs");

    let mut merged = if new.remove_all {
        SourceDiff {
            remove_all: true,
            ..Default::default()
        }
    } else {
        existing.clone()
    };

    for id in &new.remove {
        merged.add.retain(|f| !has_id(f, id));
        merged.update.retain(|u| &u.id != id);
        if !merged.remove.contains(id) {
            merged.remove.push(id.clone());
        }
    }

    for feature in &new.add {
        if let Some(id) = feature.id.clone().map(FeatureId::from) {
            merged.add.retain(|f| !has_id(f, &id));
            merged.update.retain(|u| u.id != id);
            merged.remove.retain(|r| r != &id);
        }
        merged.add.push(feature.clone());
    }

    for update in &new.update {
        if let Some(added) = merged.add.iter_mut().find(|f| has_id(f, &update.id)) {
            if let Some(geometry) = &update.new_geometry {
                added.geometry = Some(geometry.clone());
            }
            if update.changes_properties() {
                added.properties = Some(apply_property_updates(added.properties.as_ref(), update));
            }
        } else if let Some(pending) = merged.update.iter_mut().find(|u| u.id == update.id) {
            pending.merge(update);
        } else {
            merged.update.push(update.clone());
        }
    }

    merged
}

#[inline]
fn has_id(feature: &geojson::Feature, id: &FeatureId) -> bool {
    feature
        .id
        .clone()
        .is_some_and(|fid| &FeatureId::from(fid) == id)
}

/// Apply a diff to a source feature set
///
/// Returns the new source set and the affected features: every removed feature, both
/// the old and new versions of updated features, and every added feature. The steps run
/// in order: remove all, remove by id, update, add.
pub fn apply_source_diff(
    source: &[Arc<Feature>],
    diff: &SourceDiff,
    options: &Options,
) -> Result<(Vec<Arc<Feature>>, Vec<Arc<Feature>>)> {
    #[cfg(feature = "profiling")]
    profiling::scope!("apply_source_diff");

    let mut source = source.to_vec();
    let mut affected = Vec::new();

    if diff.remove_all {
        affected.append(&mut source);
    }

    if !diff.remove.is_empty() {
        let remove: HashSet<&FeatureId> = diff.remove.iter().collect();
        source.retain(|feature| match &feature.id {
            Some(id) if remove.contains(id) => {
                affected.push(feature.clone());
                false
            }
            _ => true,
        });
    }

    for update in diff.update.iter().filter(|u| !u.is_empty()) {
        apply_update(&mut source, &mut affected, update, options)?;
    }

    // Generated ids continue after the highest id in use
    let mut next_id = source
        .iter()
        .filter_map(|f| f.id.as_ref().and_then(FeatureId::as_u64))
        .max()
        .map_or(0, |max| max + 1);

    for feature in &diff.add {
        let mut converted = Vec::new();
        convert_feature(&mut converted, feature, options, Some(next_id as usize))?;
        if options.generate_id {
            next_id += 1;
        }
        let Some(first) = converted.first() else {
            continue;
        };

        // Replace existing features with the same id
        if let Some(id) = first.id.clone() {
            source.retain(|f| {
                if f.id.as_ref() == Some(&id) {
                    affected.push(f.clone());
                    false
                } else {
                    true
                }
            });
        }

        let added = wrap(converted.into_iter().map(Arc::new).collect(), options);
        affected.extend(added.iter().cloned());
        source.extend(added);
    }

    Ok((source, affected))
}

/// Apply one feature update to every source feature carrying its id
fn apply_update(
    source: &mut Vec<Arc<Feature>>,
    affected: &mut Vec<Arc<Feature>>,
    update: &FeatureDiff,
    options: &Options,
) -> Result<()> {
    let Some(first) = source.iter().position(|f| f.id.as_ref() == Some(&update.id)) else {
        return Ok(());
    };

    match &update.new_geometry {
        Some(geometry) => {
            let tags = if update.changes_properties() {
                Some(apply_property_updates(source[first].tags.as_ref(), update))
            } else {
                source[first].tags.clone()
            };
            let mut converted = Vec::new();
            convert_geometry(
                &mut converted,
                geometry,
                Some(update.id.clone()),
                tags.as_ref(),
                options,
            )?;
            let replaced = wrap(converted.into_iter().map(Arc::new).collect(), options);

            // Old copies go away, the new ones take the place of the first
            source.retain(|f| {
                if f.id.as_ref() == Some(&update.id) {
                    affected.push(f.clone());
                    false
                } else {
                    true
                }
            });
            affected.extend(replaced.iter().cloned());
            source.splice(first..first, replaced);
        }
        None => {
            for feature in source.iter_mut() {
                if feature.id.as_ref() != Some(&update.id) {
                    continue;
                }
                affected.push(feature.clone());
                let tags = apply_property_updates(feature.tags.as_ref(), update);
                let updated = Arc::new(Feature {
                    tags: Some(tags),
                    ..(**feature).clone()
                });
                affected.push(updated.clone());
                *feature = updated;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Geometry;
    use crate::convert::convert;
    use serde_json::json;

    fn feature(id: u64, lon: f64, lat: f64) -> geojson::Feature {
        json!({
            "type": "Feature",
            "id": id,
            "properties": {"name": format!("f{}", id)},
            "geometry": {"type": "Point", "coordinates": [lon, lat]}
        })
        .to_string()
        .parse()
        .unwrap()
    }

    fn source(features: Vec<geojson::Feature>, options: &Options) -> Vec<Arc<Feature>> {
        let data = geojson::GeoJson::FeatureCollection(geojson::FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        });
        convert(&data, options)
            .unwrap()
            .into_iter()
            .map(Arc::new)
            .collect()
    }

    fn ids(features: &[Arc<Feature>]) -> Vec<u64> {
        features
            .iter()
            .map(|f| f.id.as_ref().and_then(FeatureId::as_u64).unwrap())
            .collect()
    }

    fn set(key: &str, value: serde_json::Value) -> PropertyUpdate {
        PropertyUpdate {
            key: key.to_string(),
            value,
        }
    }

    #[test]
    fn test_remove_all_and_remove() {
        let options = Options::default();
        let src = source(vec![feature(1, 0.0, 0.0), feature(2, 10.0, 0.0)], &options);

        let diff = SourceDiff {
            remove: vec![1u64.into()],
            ..Default::default()
        };
        let (updated, affected) = apply_source_diff(&src, &diff, &options).unwrap();
        assert_eq!(ids(&updated), vec![2]);
        assert_eq!(ids(&affected), vec![1]);
        // Untouched features are shared
        assert!(Arc::ptr_eq(&updated[0], &src[1]));

        let diff = SourceDiff {
            remove_all: true,
            ..Default::default()
        };
        let (updated, affected) = apply_source_diff(&src, &diff, &options).unwrap();
        assert!(updated.is_empty());
        assert_eq!(affected.len(), 2);
    }

    #[test]
    fn test_add_replaces_same_id() {
        let options = Options::default();
        let src = source(vec![feature(1, 0.0, 0.0), feature(2, 10.0, 0.0)], &options);

        let diff = SourceDiff {
            add: vec![feature(1, 20.0, 0.0), feature(3, 30.0, 0.0)],
            ..Default::default()
        };
        let (updated, affected) = apply_source_diff(&src, &diff, &options).unwrap();
        assert_eq!(ids(&updated), vec![2, 1, 3]);
        // Old 1, new 1, new 3
        assert_eq!(ids(&affected), vec![1, 1, 3]);
        assert!(affected[0].min_x < affected[1].min_x);
    }

    #[test]
    fn test_add_with_generated_ids() {
        let options = Options {
            generate_id: true,
            ..Default::default()
        };
        let src = source(vec![feature(7, 0.0, 0.0), feature(8, 10.0, 0.0)], &options);
        assert_eq!(ids(&src), vec![0, 1]);

        let diff = SourceDiff {
            add: vec![feature(7, 20.0, 0.0), feature(8, 30.0, 0.0)],
            ..Default::default()
        };
        let (updated, _) = apply_source_diff(&src, &diff, &options).unwrap();
        assert_eq!(ids(&updated), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_update_geometry_and_properties() {
        let options = Options::default();
        let src = source(vec![feature(1, 0.0, 0.0), feature(2, 10.0, 0.0)], &options);

        let mut update = FeatureDiff::new(1u64);
        update.new_geometry = Some(geojson::Geometry::new(geojson::Value::Point(vec![90.0, 0.0])));
        update.add_or_update_properties = vec![set("size", json!(3))];
        let diff = SourceDiff {
            update: vec![update],
            ..Default::default()
        };

        let (updated, affected) = apply_source_diff(&src, &diff, &options).unwrap();
        assert_eq!(ids(&updated), vec![1, 2]);
        assert_eq!(affected.len(), 2);
        let moved = &updated[0];
        assert!((moved.min_x - 0.75).abs() < 1e-12);
        let tags = moved.tags.as_ref().unwrap();
        assert_eq!(tags["name"], json!("f1"));
        assert_eq!(tags["size"], json!(3));
        // The original set is left alone
        assert!((src[0].min_x - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_update_properties_only_keeps_geometry() {
        let options = Options::default();
        let src = source(vec![feature(1, 0.0, 0.0)], &options);

        let mut update = FeatureDiff::new(1u64);
        update.remove_all_properties = true;
        update.add_or_update_properties = vec![set("a", json!(true))];
        let diff = SourceDiff {
            update: vec![update],
            ..Default::default()
        };
        let (updated, affected) = apply_source_diff(&src, &diff, &options).unwrap();
        assert_eq!(updated[0].geometry, src[0].geometry);
        assert!(matches!(updated[0].geometry, Geometry::Point(_)));
        let tags = updated[0].tags.as_ref().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags["a"], json!(true));
        assert_eq!(affected.len(), 2);
    }

    #[test]
    fn test_update_of_unknown_id_is_ignored() {
        let options = Options::default();
        let src = source(vec![feature(1, 0.0, 0.0)], &options);
        let mut update = FeatureDiff::new(9u64);
        update.remove_all_properties = true;
        let diff = SourceDiff {
            update: vec![update],
            ..Default::default()
        };
        let (updated, affected) = apply_source_diff(&src, &diff, &options).unwrap();
        assert_eq!(updated.len(), 1);
        assert!(affected.is_empty());
    }

    #[test]
    fn test_apply_property_updates() {
        let mut tags = JsonObject::new();
        tags.insert("a".into(), json!(1));
        tags.insert("b".into(), json!(2));

        let mut diff = FeatureDiff::new("x");
        diff.remove_properties = vec!["a".into()];
        diff.add_or_update_properties = vec![set("b", json!(3)), set("c", json!(4))];
        let result = apply_property_updates(Some(&tags), &diff);
        assert_eq!(serde_json::Value::Object(result), json!({"b": 3, "c": 4}));
    }

    #[test]
    fn test_merge_add_then_remove_keeps_remove() {
        let existing = SourceDiff {
            add: vec![feature(1, 0.0, 0.0)],
            ..Default::default()
        };
        let new = SourceDiff {
            remove: vec![1u64.into()],
            ..Default::default()
        };
        let merged = merge_source_diffs(&existing, &new);
        assert!(merged.add.is_empty());
        assert_eq!(merged.remove, vec![FeatureId::from(1u64)]);
    }

    #[test]
    fn test_merge_remove_then_add_keeps_add() {
        let existing = SourceDiff {
            remove: vec![1u64.into()],
            ..Default::default()
        };
        let new = SourceDiff {
            add: vec![feature(1, 0.0, 0.0)],
            ..Default::default()
        };
        let merged = merge_source_diffs(&existing, &new);
        assert!(merged.remove.is_empty());
        assert_eq!(merged.add.len(), 1);
    }

    #[test]
    fn test_merge_remove_all_drops_earlier_changes() {
        let existing = SourceDiff {
            add: vec![feature(1, 0.0, 0.0)],
            remove: vec![2u64.into()],
            update: vec![FeatureDiff::new(3u64)],
            ..Default::default()
        };
        let new = SourceDiff {
            remove_all: true,
            add: vec![feature(4, 0.0, 0.0)],
            ..Default::default()
        };
        let merged = merge_source_diffs(&existing, &new);
        assert!(merged.remove_all);
        assert!(merged.remove.is_empty());
        assert!(merged.update.is_empty());
        assert_eq!(merged.add.len(), 1);
        assert!(has_id(&merged.add[0], &FeatureId::from(4u64)));
    }

    #[test]
    fn test_merge_updates() {
        let mut first = FeatureDiff::new(1u64);
        first.add_or_update_properties = vec![set("a", json!(1)), set("b", json!(1))];
        let mut second = FeatureDiff::new(1u64);
        second.remove_properties = vec!["a".into()];
        second.add_or_update_properties = vec![set("b", json!(2))];
        second.new_geometry = Some(geojson::Geometry::new(geojson::Value::Point(vec![1.0, 1.0])));

        let existing = SourceDiff {
            update: vec![first],
            ..Default::default()
        };
        let new = SourceDiff {
            update: vec![second],
            ..Default::default()
        };
        let merged = merge_source_diffs(&existing, &new);
        assert_eq!(merged.update.len(), 1);
        let update = &merged.update[0];
        assert!(update.new_geometry.is_some());
        assert_eq!(update.add_or_update_properties, vec![set("b", json!(2))]);
        assert_eq!(update.remove_properties, vec!["a".to_string()]);
    }

    #[test]
    fn test_merge_update_into_add() {
        let existing = SourceDiff {
            add: vec![feature(1, 0.0, 0.0)],
            ..Default::default()
        };
        let mut update = FeatureDiff::new(1u64);
        update.add_or_update_properties = vec![set("name", json!("renamed"))];
        let new = SourceDiff {
            update: vec![update],
            ..Default::default()
        };
        let merged = merge_source_diffs(&existing, &new);
        assert!(merged.update.is_empty());
        let props = merged.add[0].properties.as_ref().unwrap();
        assert_eq!(props["name"], json!("renamed"));
    }

    #[test]
    fn test_is_empty() {
        assert!(SourceDiff::default().is_empty());
        let diff = SourceDiff {
            update: vec![FeatureDiff::new(1u64)],
            ..Default::default()
        };
        assert!(diff.is_empty());
        let diff = SourceDiff {
            remove_all: true,
            ..Default::default()
        };
        assert!(!diff.is_empty());
    }
}
