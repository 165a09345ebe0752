//! Tile creation from projected features
//!
//! A tile keeps the features that touch it, simplified for its zoom level. Coordinates
//! stay in normalized Mercator space until the tile is transformed (see `transform`).

use crate::{Feature, FeatureId, Geometry, JsonObject, Options, Path};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Geometry of a tile feature, rings are lists of `[x, y]` pairs
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TileGeometry<T> {
    Point(Vec<[T; 2]>),
    LineString(Vec<Vec<[T; 2]>>),
    Polygon(Vec<Vec<[T; 2]>>),
}

impl<T> TileGeometry<T> {
    /// Vector tile geometry type: 1 point, 2 line, 3 polygon
    pub fn type_code(&self) -> u8 {
        match self {
            Self::Point(_) => 1,
            Self::LineString(_) => 2,
            Self::Polygon(_) => 3,
        }
    }
}

/// A simplified feature inside a tile
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TileFeature<T> {
    pub id: Option<FeatureId>,
    pub tags: Option<JsonObject>,
    pub geometry: TileGeometry<T>,
}

impl<T> TileFeature<T> {
    #[inline]
    pub fn type_code(&self) -> u8 {
        self.geometry.type_code()
    }
}

/// A tile and its build statistics
///
/// `Tile<f64>` holds normalized coordinates, `Tile<i64>` (the default) holds tile-local
/// coordinates in `[-buffer, extent + buffer]`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Tile<T = i64> {
    pub x: u32,
    pub y: u32,
    pub z: u8,
    pub features: Vec<TileFeature<T>>,
    /// Projected bounding box of the source features
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    /// Number of vertices in the source features
    pub num_points: usize,
    /// Number of vertices kept after simplification
    pub num_simplified: usize,
    /// Number of source features
    pub num_features: usize,
}

impl<T> Tile<T> {
    /// An empty tile with an inverted bounding box
    pub(crate) fn empty(z: u8, x: u32, y: u32) -> Self {
        Self {
            x,
            y,
            z,
            features: Vec::new(),
            min_x: 2.0,
            min_y: 1.0,
            max_x: -1.0,
            max_y: 0.0,
            num_points: 0,
            num_simplified: 0,
            num_features: 0,
        }
    }
}

/// Build a tile out of features already clipped to it
pub(crate) fn create_tile(
    features: &[impl AsRef<Feature>],
    z: u8,
    x: u32,
    y: u32,
    options: &Options,
) -> Tile<f64> {
    #[cfg(feature = "profiling")]
    profiling::scope!("create_tile");

    let tolerance = if z == options.max_zoom {
        0.0
    } else {
        options.tolerance / ((1u64 << z) as f64 * options.extent as f64)
    };

    let mut tile = Tile::empty(z, x, y);
    tile.num_features = features.len();

    for feature in features {
        add_feature(&mut tile, feature.as_ref(), tolerance, options);
    }
    tile
}

fn add_feature(tile: &mut Tile<f64>, feature: &Feature, tolerance: f64, options: &Options) {
    tile.min_x = tile.min_x.min(feature.min_x);
    tile.min_y = tile.min_y.min(feature.min_y);
    tile.max_x = tile.max_x.max(feature.max_x);
    tile.max_y = tile.max_y.max(feature.max_y);

    let mut tags = feature.tags.clone();
    let geometry = match &feature.geometry {
        Geometry::Point(p) => {
            tile.num_points += 1;
            tile.num_simplified += 1;
            TileGeometry::Point(vec![[p.x, p.y]])
        }
        Geometry::MultiPoint(points) => {
            tile.num_points += points.len();
            tile.num_simplified += points.len();
            if points.is_empty() {
                return;
            }
            TileGeometry::Point(points.iter().map(|p| [p.x, p.y]).collect())
        }
        Geometry::LineString(line) => {
            let mut rings = Vec::new();
            add_line(&mut rings, line, tile, tolerance, false, false);
            if options.line_metrics {
                let tags = tags.get_or_insert_with(JsonObject::new);
                tags.insert(
                    "mapbox_clip_start".to_string(),
                    (line.start / line.size).into(),
                );
                tags.insert("mapbox_clip_end".to_string(), (line.end / line.size).into());
            }
            TileGeometry::LineString(rings)
        }
        Geometry::MultiLineString(lines) => {
            let mut rings = Vec::new();
            for line in lines {
                add_line(&mut rings, line, tile, tolerance, false, false);
            }
            TileGeometry::LineString(rings)
        }
        Geometry::Polygon(polygon) => {
            let mut rings = Vec::new();
            for (i, ring) in polygon.iter().enumerate() {
                add_line(&mut rings, ring, tile, tolerance, true, i == 0);
            }
            TileGeometry::Polygon(rings)
        }
        Geometry::MultiPolygon(polygons) => {
            let mut rings = Vec::new();
            for polygon in polygons {
                for (i, ring) in polygon.iter().enumerate() {
                    add_line(&mut rings, ring, tile, tolerance, true, i == 0);
                }
            }
            TileGeometry::Polygon(rings)
        }
    };

    let is_empty = match &geometry {
        TileGeometry::Point(points) => points.is_empty(),
        TileGeometry::LineString(rings) | TileGeometry::Polygon(rings) => rings.is_empty(),
    };
    if is_empty {
        return;
    }

    tile.features.push(TileFeature {
        id: feature.id.clone(),
        tags,
        geometry,
    });
}

/// Simplify a path for the tile tolerance and append it to `result`
///
/// Paths smaller than the tolerance (length for lines, area for rings) are dropped whole.
fn add_line(
    result: &mut Vec<Vec<[f64; 2]>>,
    path: &Path,
    tile: &mut Tile<f64>,
    tolerance: f64,
    is_polygon: bool,
    is_outer: bool,
) {
    let sq_tolerance = tolerance * tolerance;

    if tolerance > 0.0 && path.size < if is_polygon { sq_tolerance } else { tolerance } {
        tile.num_points += path.len();
        return;
    }

    let mut ring = Vec::with_capacity(path.len());
    for p in &path.points {
        if tolerance == 0.0 || p.importance > sq_tolerance {
            tile.num_simplified += 1;
            ring.push([p.x, p.y]);
        }
        tile.num_points += 1;
    }

    if is_polygon {
        rewind(&mut ring, is_outer);
    }

    result.push(ring);
}

/// Orient a ring: outer rings and holes get opposite windings
fn rewind(ring: &mut [[f64; 2]], clockwise: bool) {
    let n = ring.len();
    if n == 0 {
        return;
    }

    let mut area = 0.0;
    let mut j = n - 1;
    for i in 0..n {
        area += (ring[i][0] - ring[j][0]) * (ring[i][1] + ring[j][1]);
        j = i;
    }

    if (area > 0.0) == clockwise {
        ring.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vertex;
    use std::sync::Arc;

    fn path(coords: &[(f64, f64)], importance: f64) -> Path {
        let mut points: Vec<Vertex> = coords
            .iter()
            .map(|&(x, y)| Vertex::new(x, y, importance))
            .collect();
        if let Some(p) = points.first_mut() {
            p.importance = 1.0;
        }
        if let Some(p) = points.last_mut() {
            p.importance = 1.0;
        }
        Path {
            points,
            size: 1.0,
            start: 0.0,
            end: 1.0,
        }
    }

    fn signed_area(ring: &[[f64; 2]]) -> f64 {
        let mut area = 0.0;
        let mut j = ring.len() - 1;
        for i in 0..ring.len() {
            area += (ring[i][0] - ring[j][0]) * (ring[i][1] + ring[j][1]);
            j = i;
        }
        area
    }

    #[test]
    fn test_point_tile() {
        let features = vec![Arc::new(Feature::new(
            Some(3u64.into()),
            Geometry::Point(Vertex::new(0.5, 0.5, 0.0)),
            None,
        ))];
        let tile = create_tile(&features, 0, 0, 0, &Options::default());
        assert_eq!(tile.num_features, 1);
        assert_eq!(tile.num_points, 1);
        assert_eq!(tile.num_simplified, 1);
        assert_eq!(tile.features[0].type_code(), 1);
        assert_eq!(tile.features[0].id, Some(3u64.into()));
        assert_eq!((tile.min_x, tile.max_x), (0.5, 0.5));
    }

    #[test]
    fn test_simplification_filters_by_importance() {
        let line = path(&[(0.1, 0.1), (0.2, 0.1), (0.3, 0.1)], 1e-12);
        let features = vec![Feature::new(None, Geometry::LineString(line), None)];
        let features: Vec<Arc<Feature>> = features.into_iter().map(Arc::new).collect();

        // The middle vertex is below the z0 tolerance
        let tile = create_tile(&features, 0, 0, 0, &Options::default());
        let TileGeometry::LineString(rings) = &tile.features[0].geometry else {
            panic!("expected a line");
        };
        assert_eq!(rings[0].len(), 2);
        assert_eq!(tile.num_points, 3);
        assert_eq!(tile.num_simplified, 2);

        // No simplification at max zoom
        let options = Options {
            max_zoom: 0,
            ..Default::default()
        };
        let tile = create_tile(&features, 0, 0, 0, &options);
        let TileGeometry::LineString(rings) = &tile.features[0].geometry else {
            panic!("expected a line");
        };
        assert_eq!(rings[0].len(), 3);
    }

    #[test]
    fn test_tiny_rings_are_dropped() {
        let mut ring = path(&[(0.1, 0.1), (0.1, 0.1), (0.1, 0.1), (0.1, 0.1)], 0.0);
        ring.size = 0.0;
        let features = vec![Arc::new(Feature::new(None, Geometry::Polygon(vec![ring]), None))];
        let tile = create_tile(&features, 0, 0, 0, &Options::default());
        assert!(tile.features.is_empty());
        assert_eq!(tile.num_points, 4);
        assert_eq!(tile.num_features, 1);
    }

    #[test]
    fn test_rewind_outer_and_hole() {
        let outer = path(&[(0.0, 0.0), (0.0, 0.5), (0.5, 0.5), (0.5, 0.0), (0.0, 0.0)], 1.0);
        let hole = path(&[(0.1, 0.1), (0.1, 0.2), (0.2, 0.2), (0.2, 0.1), (0.1, 0.1)], 1.0);
        let features = vec![Arc::new(Feature::new(
            None,
            Geometry::Polygon(vec![outer, hole]),
            None,
        ))];
        let options = Options {
            max_zoom: 0,
            ..Default::default()
        };
        let tile = create_tile(&features, 0, 0, 0, &options);
        let TileGeometry::Polygon(rings) = &tile.features[0].geometry else {
            panic!("expected a polygon");
        };
        // Outer ring and hole end up with opposite orientations
        assert!(signed_area(&rings[0]) < 0.0);
        assert!(signed_area(&rings[1]) > 0.0);
    }

    #[test]
    fn test_line_metrics_tags() {
        let mut line = path(&[(0.1, 0.1), (0.3, 0.1)], 1.0);
        line.size = 4.0;
        line.start = 1.0;
        line.end = 3.0;
        let features = vec![Arc::new(Feature::new(None, Geometry::LineString(line), None))];
        let options = Options {
            line_metrics: true,
            ..Default::default()
        };
        let tile = create_tile(&features, 0, 0, 0, &options);
        let tags = tile.features[0].tags.as_ref().unwrap();
        assert_eq!(tags["mapbox_clip_start"], serde_json::json!(0.25));
        assert_eq!(tags["mapbox_clip_end"], serde_json::json!(0.75));
    }

    #[test]
    fn test_multipolygon_rings_are_flattened() {
        let a = path(&[(0.0, 0.0), (0.0, 0.1), (0.1, 0.1), (0.0, 0.0)], 1.0);
        let b = path(&[(0.5, 0.5), (0.5, 0.6), (0.6, 0.6), (0.5, 0.5)], 1.0);
        let features = vec![Arc::new(Feature::new(
            None,
            Geometry::MultiPolygon(vec![vec![a], vec![b]]),
            None,
        ))];
        let options = Options {
            max_zoom: 0,
            ..Default::default()
        };
        let tile = create_tile(&features, 0, 0, 0, &options);
        assert_eq!(tile.features[0].type_code(), 3);
        let TileGeometry::Polygon(rings) = &tile.features[0].geometry else {
            panic!("expected a polygon");
        };
        assert_eq!(rings.len(), 2);
    }
}
