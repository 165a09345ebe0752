//! Normalized Mercator to tile-local integer coordinates

use crate::{Tile, TileFeature, TileGeometry};

/// Rescale a tile into `extent` units relative to its own origin
pub(crate) fn transform_tile(tile: Tile<f64>, extent: u32) -> Tile<i64> {
    #[cfg(feature = "profiling")]
    profiling::scope!("transform_tile");

    let z2 = (1u64 << tile.z) as f64;
    let (tx, ty) = (tile.x as f64, tile.y as f64);
    let extent = extent as f64;
    let point = |p: &[f64; 2]| transform_point(p, extent, z2, tx, ty);
    let rings = |rings: Vec<Vec<[f64; 2]>>| -> Vec<Vec<[i64; 2]>> {
        rings
            .iter()
            .map(|ring| ring.iter().map(point).collect())
            .collect()
    };

    let features = tile
        .features
        .into_iter()
        .map(|f| TileFeature {
            id: f.id,
            tags: f.tags,
            geometry: match f.geometry {
                TileGeometry::Point(points) => {
                    TileGeometry::Point(points.iter().map(point).collect())
                }
                TileGeometry::LineString(lines) => TileGeometry::LineString(rings(lines)),
                TileGeometry::Polygon(polygon) => TileGeometry::Polygon(rings(polygon)),
            },
        })
        .collect();

    Tile {
        x: tile.x,
        y: tile.y,
        z: tile.z,
        features,
        min_x: tile.min_x,
        min_y: tile.min_y,
        max_x: tile.max_x,
        max_y: tile.max_y,
        num_points: tile.num_points,
        num_simplified: tile.num_simplified,
        num_features: tile.num_features,
    }
}

#[inline]
pub(crate) fn transform_point(p: &[f64; 2], extent: f64, z2: f64, tx: f64, ty: f64) -> [i64; 2] {
    [
        round_half_up(extent * (p[0] * z2 - tx)),
        round_half_up(extent * (p[1] * z2 - ty)),
    ]
}

/// Round to the nearest integer, halves towards positive infinity
#[inline]
pub(crate) fn round_half_up(v: f64) -> i64 {
    let floor = v.floor();
    if v - floor >= 0.5 {
        floor as i64 + 1
    } else {
        floor as i64
    }
}
