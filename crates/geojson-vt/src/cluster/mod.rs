//! Hierarchical point clustering
//!
//! Points are indexed into one KD-tree per zoom level, built bottom-up: every level
//! clusters the records of the level below it, so each record links to the cluster that
//! swallowed it one zoom up.
//!
//! # Cluster ids
//!
//! A cluster id packs the index of the record the cluster grew from and its zoom level:
//! `(origin_index << 5) + (zoom + 1) + num_points`. Offsetting by the number of input
//! points keeps cluster ids apart from point indices. With zoom levels up to 30 and at most
//! [`MAX_POINTS`] points the encoding fits a `u64`.

mod kdbush;

pub use kdbush::KdBush;

use crate::projection::{project_x, project_y, unproject_x, unproject_y};
use crate::transform::round_half_up;
use crate::{
    ClusterOptions, Feature, FeatureId, Geometry, JsonObject, Result, Tile, TileFeature,
    TileGeometry, VtError, feature_to_geojson,
};

use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// Maximum number of points a cluster index accepts
pub const MAX_POINTS: usize = 1 << 47;

/// A point accepted by the cluster index
#[derive(Debug, Clone)]
enum ClusterPoint {
    /// GeoJSON point feature
    GeoJson {
        feature: geojson::Feature,
        x: f64,
        y: f64,
    },
    /// Projected point feature from a tile index source
    Internal(Arc<Feature>),
}

impl ClusterPoint {
    fn from_geojson(feature: geojson::Feature) -> Option<Self> {
        let (lng, lat) = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(geojson::Value::Point(coords)) if coords.len() >= 2 => (coords[0], coords[1]),
            _ => return None,
        };
        Some(Self::GeoJson {
            feature,
            x: project_x(lng),
            y: project_y(lat),
        })
    }

    fn from_internal(feature: &Arc<Feature>) -> Option<Self> {
        matches!(feature.geometry, Geometry::Point(_)).then(|| Self::Internal(feature.clone()))
    }

    /// Projected coordinates
    fn coords(&self) -> (f64, f64) {
        match self {
            Self::GeoJson { x, y, .. } => (*x, *y),
            Self::Internal(feature) => match &feature.geometry {
                Geometry::Point(v) => (v.x, v.y),
                _ => (feature.min_x, feature.min_y),
            },
        }
    }

    fn properties(&self) -> Option<&JsonObject> {
        match self {
            Self::GeoJson { feature, .. } => feature.properties.as_ref(),
            Self::Internal(feature) => feature.tags.as_ref(),
        }
    }

    fn id(&self) -> Option<FeatureId> {
        match self {
            Self::GeoJson { feature, .. } => feature.id.clone().map(FeatureId::from),
            Self::Internal(feature) => feature.id.clone(),
        }
    }

    fn to_geojson(&self) -> geojson::Feature {
        match self {
            Self::GeoJson { feature, .. } => feature.clone(),
            Self::Internal(feature) => feature_to_geojson(feature),
        }
    }
}

/// A point or cluster in the tree of one zoom level
#[derive(Debug, Clone, Copy)]
struct ClusterRecord {
    x: f64,
    y: f64,
    /// Last zoom the record was processed at, `u8::MAX` before clustering
    zoom: u8,
    /// Index of the source point, or the cluster id
    id: u64,
    /// Id of the cluster this record was merged into one zoom up
    parent: Option<u64>,
    num_points: u64,
    /// Index into the reduced cluster properties
    prop_index: Option<usize>,
}

impl ClusterRecord {
    #[inline]
    fn is_cluster(&self) -> bool {
        self.num_points > 1
    }
}

#[derive(Debug, Clone, Default)]
struct ClusterTree {
    index: KdBush,
    data: Vec<ClusterRecord>,
}

impl ClusterTree {
    fn new(data: Vec<ClusterRecord>, node_size: usize) -> Self {
        let mut index = KdBush::with_capacity(data.len(), node_size);
        for record in &data {
            index.add(record.x, record.y);
        }
        index.finish();
        Self { index, data }
    }
}

/// Zoom-indexed point clustering
#[derive(Debug, Clone)]
pub struct Supercluster {
    options: ClusterOptions,
    /// One tree per zoom level up to `max_zoom + 1`, the last one holding the raw points
    trees: Vec<ClusterTree>,
    points: Vec<ClusterPoint>,
    /// Properties accumulated by the `reduce` callback
    cluster_props: Vec<JsonObject>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Supercluster {
    /// Create an empty cluster index
    pub fn new(options: ClusterOptions) -> Result<Self> {
        options.validate()?;
        let trees = vec![ClusterTree::default(); options.max_zoom as usize + 2];
        Ok(Self {
            options,
            trees,
            points: Vec::new(),
            cluster_props: Vec::new(),
        })
    }

    #[inline]
    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// Number of points loaded
    #[inline]
    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// Load GeoJSON features and build the index
    ///
    /// Features that are not points are skipped.
    pub fn load(&mut self, features: Vec<geojson::Feature>) -> Result<&mut Self> {
        let points = features
            .into_iter()
            .filter_map(ClusterPoint::from_geojson)
            .collect();
        self.load_points(points)
    }

    /// Load the point features of a tile index source and build the index
    pub fn load_internal(&mut self, features: &[Arc<Feature>]) -> Result<&mut Self> {
        let points = features.iter().filter_map(ClusterPoint::from_internal).collect();
        self.load_points(points)
    }

    fn load_points(&mut self, points: Vec<ClusterPoint>) -> Result<&mut Self> {
        #[cfg(feature = "profiling")]
        profiling::scope!("supercluster::load");

        if points.len() > MAX_POINTS {
            return Err(VtError::TooManyPoints {
                count: points.len(),
                max: MAX_POINTS,
            });
        }

        let log = self.options.log;
        let (min_zoom, max_zoom) = (self.options.min_zoom, self.options.max_zoom);
        let total = Instant::now();

        self.points = points;
        self.cluster_props.clear();
        self.trees = vec![ClusterTree::default(); max_zoom as usize + 2];

        // Generate a record for each point and index input points into a KD-tree
        let data = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let (x, y) = p.coords();
                ClusterRecord {
                    x: x as f32 as f64,
                    y: y as f32 as f64,
                    zoom: u8::MAX,
                    id: i as u64,
                    parent: None,
                    num_points: 1,
                    prop_index: None,
                }
            })
            .collect();
        self.trees[max_zoom as usize + 1] = ClusterTree::new(data, self.options.node_size);

        if log {
            tracing::info!("prepare {} points took {:?}", self.points.len(), total.elapsed());
        }

        // Cluster points on max zoom, then cluster the results on the previous zoom, etc.
        for z in (min_zoom..=max_zoom).rev() {
            let start = Instant::now();
            let z = z as usize;

            let (lower, upper) = self.trees.split_at_mut(z + 1);
            let next = cluster(
                &mut upper[0],
                z as u8,
                &self.options,
                &self.points,
                &mut self.cluster_props,
            );
            lower[z] = ClusterTree::new(next, self.options.node_size);

            if log {
                tracing::info!(
                    "z{}: {} clusters in {:?}",
                    z,
                    lower[z].data.len(),
                    start.elapsed()
                );
            }
        }

        if log {
            tracing::info!("total time {:?}", total.elapsed());
        }
        Ok(self)
    }

    /// Clusters and points within a bounding box at a zoom level
    ///
    /// `bbox` is `[west, south, east, north]` in degrees. Boxes crossing the antimeridian
    /// are queried as two halves.
    pub fn get_clusters(&self, bbox: [f64; 4], zoom: f64) -> Vec<geojson::Feature> {
        let mut min_lng = crate::projection::normalize_lng(bbox[0]);
        let min_lat = bbox[1].clamp(-90.0, 90.0);
        let mut max_lng = if bbox[2] == 180.0 {
            180.0
        } else {
            crate::projection::normalize_lng(bbox[2])
        };
        let max_lat = bbox[3].clamp(-90.0, 90.0);

        if bbox[2] - bbox[0] >= 360.0 {
            min_lng = -180.0;
            max_lng = 180.0;
        } else if min_lng > max_lng {
            let mut eastern = self.get_clusters([min_lng, min_lat, 180.0, max_lat], zoom);
            let western = self.get_clusters([-180.0, min_lat, max_lng, max_lat], zoom);
            eastern.extend(western);
            return eastern;
        }

        let Some(tree) = self.trees.get(self.limit_zoom(zoom)) else {
            return Vec::new();
        };
        tree.index
            .range(
                project_x(min_lng),
                project_y(max_lat),
                project_x(max_lng),
                project_y(min_lat),
            )
            .into_iter()
            .map(|i| self.record_to_geojson(&tree.data[i]))
            .collect()
    }

    /// Immediate children of a cluster, clusters or points, one zoom level down
    pub fn get_children(&self, cluster_id: u64) -> Result<Vec<geojson::Feature>> {
        Ok(self
            .child_records(cluster_id)?
            .iter()
            .map(|record| self.record_to_geojson(record))
            .collect())
    }

    /// Points under a cluster, skipping `offset` points and returning at most `limit`
    pub fn get_leaves(
        &self,
        cluster_id: u64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<geojson::Feature>> {
        let mut leaves = Vec::new();
        if limit > 0 {
            self.append_leaves(&mut leaves, cluster_id, limit, offset, 0)?;
        }
        Ok(leaves)
    }

    /// Zoom level at which a cluster breaks up into several children
    pub fn get_cluster_expansion_zoom(&self, mut cluster_id: u64) -> Result<u8> {
        let mut expansion_zoom = self.origin_zoom(cluster_id)?.saturating_sub(1) as u8;

        while expansion_zoom <= self.options.max_zoom {
            let children = self.child_records(cluster_id)?;
            expansion_zoom += 1;
            match children.as_slice() {
                [only] if only.is_cluster() => cluster_id = only.id,
                _ => break,
            }
        }
        Ok(expansion_zoom)
    }

    /// A tile of clusters and points, in tile-local coordinates
    ///
    /// Points within the cluster radius outside the tile are included, also across the
    /// antimeridian.
    pub fn get_tile(&self, z: u8, x: u32, y: u32) -> Tile {
        #[cfg(feature = "profiling")]
        profiling::scope!("supercluster::get_tile");

        let mut tile = Tile::empty(z, x, y);
        let Some(tree) = self.trees.get(self.limit_zoom(z as f64)) else {
            return tile;
        };

        let z2 = (1u64 << z) as f64;
        let p = self.options.radius / self.options.extent;
        let (xf, yf) = (x as f64, y as f64);
        let top = (yf - p) / z2;
        let bottom = (yf + 1.0 + p) / z2;

        let ids = tree.index.range((xf - p) / z2, top, (xf + 1.0 + p) / z2, bottom);
        self.add_tile_features(&mut tile, tree, &ids, xf, yf, z2);

        if x == 0 {
            let ids = tree.index.range(1.0 - p / z2, top, 1.0, bottom);
            self.add_tile_features(&mut tile, tree, &ids, z2, yf, z2);
        }
        if xf == z2 - 1.0 {
            let ids = tree.index.range(0.0, top, p / z2, bottom);
            self.add_tile_features(&mut tile, tree, &ids, -1.0, yf, z2);
        }

        tile.num_features = tile.features.len();
        tile.num_points = tile.features.len();
        tile.num_simplified = tile.features.len();
        tile
    }

    fn add_tile_features(
        &self,
        tile: &mut Tile,
        tree: &ClusterTree,
        ids: &[usize],
        x: f64,
        y: f64,
        z2: f64,
    ) {
        let extent = self.options.extent;
        for &i in ids {
            let record = &tree.data[i];
            let point = (!record.is_cluster()).then(|| &self.points[record.id as usize]);

            let (tags, (px, py)) = match point {
                None => (
                    Some(cluster_properties(record, &self.cluster_props)),
                    (record.x, record.y),
                ),
                Some(point) => (point.properties().cloned(), point.coords()),
            };

            let id = match point {
                Some(point) if !self.options.generate_id => point.id(),
                // Clusters and generated ids use the record id
                _ => Some(FeatureId::from(record.id)),
            };

            tile.features.push(TileFeature {
                id,
                tags,
                geometry: TileGeometry::Point(vec![[
                    round_half_up(extent * (px * z2 - x)),
                    round_half_up(extent * (py * z2 - y)),
                ]]),
            });
        }
    }

    fn append_leaves(
        &self,
        result: &mut Vec<geojson::Feature>,
        cluster_id: u64,
        limit: usize,
        offset: usize,
        mut skipped: usize,
    ) -> Result<usize> {
        for child in self.child_records(cluster_id)? {
            if child.is_cluster() {
                let count = child.num_points as usize;
                if skipped + count <= offset {
                    // Skip the whole cluster
                    skipped += count;
                } else {
                    skipped = self.append_leaves(result, child.id, limit, offset, skipped)?;
                }
            } else if skipped < offset {
                // Skip a single point
                skipped += 1;
            } else {
                result.push(self.points[child.id as usize].to_geojson());
            }
            if result.len() == limit {
                break;
            }
        }
        Ok(skipped)
    }

    fn child_records(&self, cluster_id: u64) -> Result<Vec<ClusterRecord>> {
        let origin_id = self.origin_id(cluster_id)?;
        let origin_zoom = self.origin_zoom(cluster_id)?;
        let not_found = || VtError::ClusterNotFound(cluster_id);

        let tree = self.trees.get(origin_zoom).ok_or_else(not_found)?;
        let origin = tree.data.get(origin_id).ok_or_else(not_found)?;

        let r = self.options.radius
            / (self.options.extent * 2f64.powi(origin_zoom as i32 - 1));
        let children: Vec<ClusterRecord> = tree
            .index
            .within(origin.x, origin.y, r)
            .into_iter()
            .map(|i| tree.data[i])
            .filter(|record| record.parent == Some(cluster_id))
            .collect();

        if children.is_empty() {
            return Err(not_found());
        }
        Ok(children)
    }

    fn record_to_geojson(&self, record: &ClusterRecord) -> geojson::Feature {
        if !record.is_cluster() {
            return self.points[record.id as usize].to_geojson();
        }
        geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::Point(vec![
                unproject_x(record.x),
                unproject_y(record.y),
            ]))),
            id: Some(geojson::feature::Id::Number(record.id.into())),
            properties: Some(cluster_properties(record, &self.cluster_props)),
            foreign_members: None,
        }
    }

    /// Index of the record a cluster originated from
    #[inline]
    fn origin_id(&self, cluster_id: u64) -> Result<usize> {
        self.encoded(cluster_id).map(|v| (v >> 5) as usize)
    }

    /// Zoom level (plus one) of the tree a cluster originated from
    #[inline]
    fn origin_zoom(&self, cluster_id: u64) -> Result<usize> {
        self.encoded(cluster_id).map(|v| (v % 32) as usize)
    }

    #[inline]
    fn encoded(&self, cluster_id: u64) -> Result<u64> {
        cluster_id
            .checked_sub(self.points.len() as u64)
            .ok_or(VtError::ClusterNotFound(cluster_id))
    }

    #[inline]
    fn limit_zoom(&self, zoom: f64) -> usize {
        zoom.floor()
            .min(self.options.max_zoom as f64 + 1.0)
            .max(self.options.min_zoom as f64) as usize
    }
}

/// Cluster the records of `tree` at `zoom`, returning the records of the next tree
///
/// Records of `tree` are marked with the zoom they were processed at and linked to the
/// cluster they were merged into.
fn cluster(
    tree: &mut ClusterTree,
    zoom: u8,
    options: &ClusterOptions,
    points: &[ClusterPoint],
    cluster_props: &mut Vec<JsonObject>,
) -> Vec<ClusterRecord> {
    let r = options.radius / (options.extent * 2f64.powi(zoom as i32));
    let ClusterTree { index, data } = tree;
    let mut next = Vec::new();

    // Properties a record contributes to `reduce`
    let mapped = |record: &ClusterRecord, cluster_props: &[JsonObject]| -> JsonObject {
        if record.is_cluster() {
            record
                .prop_index
                .and_then(|i| cluster_props.get(i))
                .cloned()
                .unwrap_or_default()
        } else {
            options.map_properties(points[record.id as usize].properties())
        }
    };

    for i in 0..data.len() {
        // Skip points already visited at this zoom level
        if data[i].zoom <= zoom {
            continue;
        }
        data[i].zoom = zoom;

        let ClusterRecord { x, y, .. } = data[i];
        let neighbor_ids = index.within(x, y, r);

        let num_points_origin = data[i].num_points;
        let num_points = num_points_origin
            + neighbor_ids
                .iter()
                .filter(|&&k| data[k].zoom > zoom)
                .map(|&k| data[k].num_points)
                .sum::<u64>();

        // Merge if there are neighbours and enough points to form a cluster
        if num_points > num_points_origin && num_points as usize >= options.min_points {
            let mut wx = x * num_points_origin as f64;
            let mut wy = y * num_points_origin as f64;
            let mut prop_index = None;

            let id = ((i as u64) << 5) + (zoom as u64 + 1) + points.len() as u64;

            for &k in &neighbor_ids {
                if data[k].zoom <= zoom {
                    continue;
                }
                data[k].zoom = zoom;

                let weight = data[k].num_points as f64;
                wx += data[k].x * weight;
                wy += data[k].y * weight;
                data[k].parent = Some(id);

                if let Some(reduce) = &options.reduce {
                    let index = *prop_index.get_or_insert_with(|| {
                        let initial = mapped(&data[i], cluster_props);
                        cluster_props.push(initial);
                        cluster_props.len() - 1
                    });
                    let props = mapped(&data[k], cluster_props);
                    reduce(&mut cluster_props[index], &props);
                }
            }

            data[i].parent = Some(id);
            next.push(ClusterRecord {
                x: wx / num_points as f64,
                y: wy / num_points as f64,
                zoom: u8::MAX,
                id,
                parent: None,
                num_points,
                prop_index,
            });
        } else {
            // Leave the points unclustered
            next.push(data[i]);

            if num_points > 1 {
                for &k in &neighbor_ids {
                    if data[k].zoom <= zoom {
                        continue;
                    }
                    data[k].zoom = zoom;
                    next.push(data[k]);
                }
            }
        }
    }
    next
}

/// Properties of a cluster feature, reduced properties first
fn cluster_properties(record: &ClusterRecord, cluster_props: &[JsonObject]) -> JsonObject {
    let count = record.num_points;
    let abbreviated = if count >= 10_000 {
        json!(format!("{}k", round_half_up(count as f64 / 1000.0)))
    } else if count >= 1000 {
        json!(format!("{}k", round_half_up(count as f64 / 100.0) as f64 / 10.0))
    } else {
        json!(count)
    };

    let mut properties = record
        .prop_index
        .and_then(|i| cluster_props.get(i))
        .cloned()
        .unwrap_or_default();
    properties.insert("cluster".to_string(), json!(true));
    properties.insert("cluster_id".to_string(), json!(record.id));
    properties.insert("point_count".to_string(), json!(count));
    properties.insert("point_count_abbreviated".to_string(), abbreviated);
    properties
}
