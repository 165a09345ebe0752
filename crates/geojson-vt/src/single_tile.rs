//! One-shot tile generation without an index

use crate::clip::{Axis, clip};
use crate::convert::convert;
use crate::tile::create_tile;
use crate::transform::transform_tile;
use crate::wrap::wrap;
use crate::{Feature, GeoJsonToTileOptions, MAX_TILE_ZOOM, Result, Tile};

use geojson::GeoJson;
use std::sync::Arc;

/// Build a single tile straight from GeoJSON
///
/// Useful when only one tile is needed or the data is already limited to the tile's area.
/// Nothing is cached.
///
/// # Arguments
///
/// * `data` - Feature, feature collection or bare geometry
/// * `z`, `x`, `y` - Tile coordinates
/// * `options` - Tiling options, `wrap` and `clip` control antimeridian wrapping and
///   clipping to the buffered tile bounds (line metrics imply clipping)
///
/// # Returns
///
/// The transformed tile, or `None` when clipping leaves nothing or `z` is above 24
pub fn geojson_to_tile(
    data: &GeoJson,
    z: u8,
    x: u32,
    y: u32,
    options: &GeoJsonToTileOptions,
) -> Result<Option<Tile>> {
    #[cfg(feature = "profiling")]
    profiling::scope!("geojson_to_tile");

    if z > MAX_TILE_ZOOM {
        return Ok(None);
    }
    let tiling = &options.options;

    let mut features: Vec<Arc<Feature>> =
        convert(data, tiling)?.into_iter().map(Arc::new).collect();
    if options.wrap {
        features = wrap(features, tiling);
    }

    if options.clip || tiling.line_metrics {
        let scale = (1u64 << z) as f64;
        let buffer = tiling.buffer_ratio();
        let line_metrics = tiling.line_metrics;

        let band = |features: &[Arc<Feature>], start: f64, axis: Axis| {
            let (start, end) = (start - buffer, start + 1.0 + buffer);
            clip(features, scale, start, end, axis, -1.0, 2.0, line_metrics)
        };
        let left = band(&features, x as f64, Axis::X).unwrap_or_default();
        match band(&left, y as f64, Axis::Y) {
            Some(clipped) => features = clipped,
            None => return Ok(None),
        }
    }

    let tile = create_tile(&features, z, x, y, tiling);
    Ok(Some(transform_tile(tile, tiling.extent)))
}
