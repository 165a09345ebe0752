//! Index configuration

use crate::{JsonObject, MAX_TILE_ZOOM, Result, VtError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Highest cluster zoom whose `zoom + 1` still fits the 5-bit zoom field of a cluster id
pub const MAX_CLUSTER_ZOOM: u8 = 30;

/// Merges the properties of a clustered point (second argument) into the accumulated
/// properties of its cluster (first argument)
pub type ReduceFn = Arc<dyn Fn(&mut JsonObject, &JsonObject) + Send + Sync>;

/// Extracts the properties a point contributes to `reduce`
pub type MapFn = Arc<dyn Fn(Option<&JsonObject>) -> JsonObject + Send + Sync>;

/// Configuration for the tile index
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct Options {
    /// Max zoom to preserve detail on (0-24). Default: 14
    pub max_zoom: u8,
    /// Max zoom in the initial tile index. Default: 5
    pub index_max_zoom: u8,
    /// Max number of points per tile in the initial tile index. Default: 100000
    pub index_max_points: usize,
    /// Simplification tolerance, higher means simpler. Default: 3
    pub tolerance: f64,
    /// Tile extent. Default: 4096
    pub extent: u32,
    /// Tile buffer on each side, in extent units. Default: 64
    pub buffer: u32,
    /// Whether to calculate line metrics (`mapbox_clip_start`/`mapbox_clip_end` tags)
    pub line_metrics: bool,
    /// Name of a feature property to promote to the feature id
    pub promote_id: Option<String>,
    /// Whether to generate feature ids from the input order. Cannot be combined with `promote_id`
    pub generate_id: bool,
    /// Whether to keep a copy of the source so the data can be updated later
    pub updateable: bool,
    /// Logging level: 0 is silent, 1 logs the build summary, 2 logs every tile
    pub debug: u8,
    /// Whether to serve clustered points instead of tiled geometry
    pub cluster: bool,
    /// Options for the cluster index, used when `cluster` is set
    pub cluster_options: ClusterOptions,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Default for Options {
    fn default() -> Self {
        Self {
            max_zoom: 14,
            index_max_zoom: 5,
            index_max_points: 100_000,
            tolerance: 3.0,
            extent: 4096,
            buffer: 64,
            line_metrics: false,
            promote_id: None,
            generate_id: false,
            updateable: false,
            debug: 0,
            cluster: false,
            cluster_options: ClusterOptions::default(),
        }
    }
}

impl Options {
    /// Check the options for conflicting or out-of-range settings
    pub fn validate(&self) -> Result<()> {
        if self.max_zoom > MAX_TILE_ZOOM {
            return Err(VtError::InvalidMaxZoom {
                got: self.max_zoom,
                max: MAX_TILE_ZOOM,
            });
        }
        if self.promote_id.is_some() && self.generate_id {
            return Err(VtError::PromoteAndGenerateId);
        }
        if self.cluster {
            self.cluster_options.validate()?;
        }
        Ok(())
    }

    /// Tile buffer as a fraction of the tile size
    #[inline]
    pub(crate) fn buffer_ratio(&self) -> f64 {
        self.buffer as f64 / self.extent as f64
    }
}

/// Configuration for the cluster index
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct ClusterOptions {
    /// Min zoom to generate clusters on. Default: 0
    pub min_zoom: u8,
    /// Max zoom level to cluster the points on. Default: 16
    pub max_zoom: u8,
    /// Minimum points to form a cluster. Default: 2
    pub min_points: usize,
    /// Cluster radius in pixels. Default: 40
    pub radius: f64,
    /// Tile extent, the radius is calculated relative to it. Default: 512
    pub extent: f64,
    /// Size of the KD-tree leaf node, affects performance. Default: 64
    pub node_size: usize,
    /// Whether to log timing info
    pub log: bool,
    /// Whether to generate numeric ids for input features in vector tiles
    pub generate_id: bool,
    /// Accumulates cluster properties
    #[cfg_attr(feature = "serde", serde(skip))]
    pub reduce: Option<ReduceFn>,
    /// Properties to use for individual points when running the reducer.
    /// Defaults to a copy of the point properties.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub map: Option<MapFn>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            min_zoom: 0,
            max_zoom: 16,
            min_points: 2,
            radius: 40.0,
            extent: 512.0,
            node_size: 64,
            log: false,
            generate_id: false,
            reduce: None,
            map: None,
        }
    }
}

impl ClusterOptions {
    /// Check that zoom levels fit the cluster id encoding
    pub fn validate(&self) -> Result<()> {
        if self.max_zoom > MAX_CLUSTER_ZOOM {
            return Err(VtError::InvalidClusterOptions(format!(
                "maxZoom should be in the 0-{} range, got {}",
                MAX_CLUSTER_ZOOM, self.max_zoom
            )));
        }
        if self.min_zoom > self.max_zoom {
            return Err(VtError::InvalidClusterOptions(format!(
                "minZoom ({}) is greater than maxZoom ({})",
                self.min_zoom, self.max_zoom
            )));
        }
        if self.node_size == 0 {
            return Err(VtError::InvalidClusterOptions(
                "nodeSize must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Properties a point contributes to `reduce`
    pub(crate) fn map_properties(&self, properties: Option<&JsonObject>) -> JsonObject {
        match &self.map {
            Some(map) => map(properties),
            None => properties.cloned().unwrap_or_default(),
        }
    }
}

impl fmt::Debug for ClusterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterOptions")
            .field("min_zoom", &self.min_zoom)
            .field("max_zoom", &self.max_zoom)
            .field("min_points", &self.min_points)
            .field("radius", &self.radius)
            .field("extent", &self.extent)
            .field("node_size", &self.node_size)
            .field("log", &self.log)
            .field("generate_id", &self.generate_id)
            .field("reduce", &self.reduce.as_ref().map(|_| "Fn"))
            .field("map", &self.map.as_ref().map(|_| "Fn"))
            .finish()
    }
}

/// Configuration for [`geojson_to_tile`](crate::geojson_to_tile)
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct GeoJsonToTileOptions {
    /// Tiling options. Only `max_zoom`, `tolerance`, `extent`, `buffer`,
    /// `line_metrics`, `promote_id` and `generate_id` are relevant here.
    pub options: Options,
    /// Whether to duplicate geometry across the antimeridian
    pub wrap: bool,
    /// Whether to clip geometry to the tile and its buffer
    pub clip: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let options = Options::default();
        assert_eq!(options.max_zoom, 14);
        assert_eq!(options.index_max_zoom, 5);
        assert_eq!(options.index_max_points, 100_000);
        assert_eq!(options.tolerance, 3.0);
        assert_eq!(options.extent, 4096);
        assert_eq!(options.buffer, 64);
        assert!(!options.line_metrics && !options.generate_id && !options.updateable);
        assert!(options.promote_id.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_cluster_options_default() {
        let options = ClusterOptions::default();
        assert_eq!(options.min_zoom, 0);
        assert_eq!(options.max_zoom, 16);
        assert_eq!(options.min_points, 2);
        assert_eq!(options.radius, 40.0);
        assert_eq!(options.extent, 512.0);
        assert_eq!(options.node_size, 64);
        assert!(options.reduce.is_none() && options.map.is_none());
    }

    #[test]
    fn test_max_zoom_out_of_range() {
        let options = Options {
            max_zoom: 25,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(VtError::InvalidMaxZoom { got: 25, .. })
        ));
    }

    #[test]
    fn test_promote_and_generate_id_conflict() {
        let options = Options {
            promote_id: Some("name".to_string()),
            generate_id: true,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(VtError::PromoteAndGenerateId)
        ));
    }

    #[test]
    fn test_cluster_zoom_limits() {
        let too_deep = Options {
            cluster: true,
            cluster_options: ClusterOptions {
                max_zoom: 31,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(too_deep.validate().is_err());

        // Cluster options are only checked when clustering is enabled
        let disabled = Options {
            cluster: false,
            ..too_deep
        };
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn test_map_properties_defaults_to_copy() {
        let options = ClusterOptions::default();
        let mut props = JsonObject::new();
        props.insert("a".to_string(), 1.into());
        assert_eq!(options.map_properties(Some(&props)), props);
        assert!(options.map_properties(None).is_empty());

        let options = ClusterOptions {
            map: Some(Arc::new(|_| JsonObject::new())),
            ..Default::default()
        };
        assert!(options.map_properties(Some(&props)).is_empty());
    }
}
