//! GeoJSON VT - Vector tiles from GeoJSON, on the fly
//!
//! This library slices arbitrary GeoJSON into simplified, clipped vector tiles for rendering
//! at multiple zoom levels. Tiles are built eagerly down to a configurable index depth and
//! lazily below it, the source data can be updated incrementally with minimal cache
//! invalidation, and point data can alternatively be served through a zoom-indexed cluster
//! index.
//!
//! # Architecture
//!
//! - **[`projection`]**: WGS84 to normalized spherical Mercator and back
//! - **[`Feature`]**: Internal projected geometry with per-vertex simplification importance
//! - **[`TileIndex`]**: Quadtree tile cache with lazy drill-down and bbox-based invalidation
//! - **[`Supercluster`]**: Per-zoom KD-tree forest for hierarchical point clustering
//! - **[`GeoJsonVt`]**: High-level index tying conversion, wrapping, tiling and updates together
//!
//! # Threading
//!
//! Every operation runs to completion on the calling thread. An index has exactly one owner
//! of its mutable state; tiles handed out by [`GeoJsonVt::get_tile`] are immutable snapshots
//! behind an [`Arc`](std::sync::Arc) and stay valid after later updates.

mod clip;
pub mod cluster;
mod convert;
mod deconvert;
mod difference;
mod feature;
mod geojson_vt;
mod options;
pub mod projection;
mod simplify;
mod single_tile;
mod tile;
mod tile_index;
mod transform;
mod vector_tile;
mod wrap;

// Public API exports
pub use cluster::Supercluster;
pub use deconvert::{convert_to_geojson, feature_to_geojson};
pub use difference::{
    FeatureDiff, PropertyUpdate, SourceDiff, apply_property_updates, apply_source_diff,
    merge_source_diffs,
};
pub use feature::{Feature, FeatureId, Geometry, JsonObject, Path, Vertex};
pub use geojson_vt::GeoJsonVt;
pub use options::{ClusterOptions, GeoJsonToTileOptions, MapFn, Options, ReduceFn};
pub use single_tile::geojson_to_tile;
pub use tile::{Tile, TileFeature, TileGeometry};
pub use tile_index::{CachedTile, TileIndex, to_id};
pub use vector_tile::{FeatureWrapper, GEOJSON_TILE_LAYER_NAME, GeoJsonWrapper};

/// Highest zoom level a tile can be requested at
pub const MAX_TILE_ZOOM: u8 = 24;

/// Error types for the tiling and clustering indices
#[derive(Debug, thiserror::Error)]
pub enum VtError {
    #[error("maxZoom should be in the 0-{max} range, got {got}")]
    InvalidMaxZoom { got: u8, max: u8 },

    #[error("promoteId and generateId cannot be used together")]
    PromoteAndGenerateId,

    #[error("Invalid cluster options: {0}")]
    InvalidClusterOptions(String),

    #[error("Invalid GeoJSON: {0}")]
    InvalidGeoJson(String),

    #[error("GeoJSON parsing error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("Cannot {operation} when the index is not updateable")]
    NotUpdateable { operation: &'static str },

    #[error("No cluster with the specified id: {0}")]
    ClusterNotFound(u64),

    #[error("Too many points for the cluster index: {count} (max {max})")]
    TooManyPoints { count: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, VtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn() -> Options = Options::default;
        let _: fn() -> ClusterOptions = ClusterOptions::default;
        let _: fn(u8, u32, u32) -> u64 = to_id;
    }

    #[test]
    fn test_error_messages() {
        let err = VtError::InvalidMaxZoom { got: 25, max: 24 };
        assert_eq!(err.to_string(), "maxZoom should be in the 0-24 range, got 25");

        let err = VtError::NotUpdateable {
            operation: "update data",
        };
        assert!(err.to_string().contains("not updateable"));
    }
}
