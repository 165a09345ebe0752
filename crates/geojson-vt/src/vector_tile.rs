//! Vector-tile-like view over tile features
//!
//! Renderers that consume decoded vector tiles expect layers exposing `version`, `extent`,
//! `len` and indexed features with `load_geometry`. [`GeoJsonWrapper`] presents the
//! features of a [`Tile`] as a single such layer, no encoding involved.

use crate::{JsonObject, Tile, TileFeature, TileGeometry};

use geo::Point;

/// Name of the only layer of a wrapped tile
pub const GEOJSON_TILE_LAYER_NAME: &str = "_geojsonTileLayer";

/// A tile's features seen as one vector tile layer
#[derive(Debug, Clone, Copy)]
pub struct GeoJsonWrapper<'a> {
    features: &'a [TileFeature<i64>],
    pub name: &'static str,
    pub version: u32,
    pub extent: u32,
}

impl<'a> GeoJsonWrapper<'a> {
    /// Wrap features with an explicit layer version and extent
    pub fn new(features: &'a [TileFeature<i64>], version: u32, extent: u32) -> Self {
        Self {
            features,
            name: GEOJSON_TILE_LAYER_NAME,
            version,
            extent,
        }
    }

    /// Wrap the features of a tile, as a version 2 layer
    pub fn from_tile(tile: &'a Tile, extent: u32) -> Self {
        Self::new(&tile.features, 2, extent)
    }

    /// The layer with the given name, this wrapper being the only one
    pub fn layer(&self, name: &str) -> Option<&Self> {
        (name == self.name).then_some(self)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn feature(&self, i: usize) -> Option<FeatureWrapper<'a>> {
        self.features.get(i).map(|feature| FeatureWrapper {
            feature,
            extent: self.extent,
        })
    }

    pub fn features(&self) -> impl Iterator<Item = FeatureWrapper<'a>> + '_ {
        (0..self.len()).filter_map(|i| self.feature(i))
    }
}

impl<'a> From<&'a Tile> for GeoJsonWrapper<'a> {
    fn from(tile: &'a Tile) -> Self {
        Self::new(&tile.features, 1, 4096)
    }
}

/// A tile feature seen as a vector tile feature
#[derive(Debug, Clone, Copy)]
pub struct FeatureWrapper<'a> {
    feature: &'a TileFeature<i64>,
    pub extent: u32,
}

impl FeatureWrapper<'_> {
    /// Geometry type: 1 point, 2 line, 3 polygon
    #[inline]
    pub fn type_code(&self) -> u8 {
        self.feature.type_code()
    }

    /// Feature properties, empty when the feature has none
    pub fn properties(&self) -> JsonObject {
        self.feature.tags.clone().unwrap_or_default()
    }

    /// Integer id of the feature
    ///
    /// Vector tiles only allow integer ids: string ids are parsed from their leading
    /// digits, other ids are dropped.
    pub fn id(&self) -> Option<i64> {
        match self.feature.id.as_ref()?.to_json() {
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
            serde_json::Value::String(s) => parse_leading_int(&s),
            _ => None,
        }
    }

    /// Rings of points, all points of a point feature forming a single ring
    pub fn load_geometry(&self) -> Vec<Vec<Point<i64>>> {
        let ring = |ring: &Vec<[i64; 2]>| ring.iter().map(|&[x, y]| Point::new(x, y)).collect();
        match &self.feature.geometry {
            TileGeometry::Point(points) => vec![ring(points)],
            TileGeometry::LineString(rings) | TileGeometry::Polygon(rings) => {
                rings.iter().map(ring).collect()
            }
        }
    }
}

/// Parse an optionally signed decimal integer at the start of `s`, ignoring what follows
fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let digits_start = usize::from(s.starts_with(['-', '+']));
    let end = s[digits_start..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(s.len(), |i| i + digits_start);
    if end == digits_start {
        return None;
    }
    s[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FeatureId;
    use serde_json::json;

    fn feature(id: Option<FeatureId>, geometry: TileGeometry<i64>) -> TileFeature<i64> {
        let mut tags = JsonObject::new();
        tags.insert("hello".into(), json!("world"));
        TileFeature {
            id,
            tags: Some(tags),
            geometry,
        }
    }

    #[test]
    fn test_line_string() {
        let features = vec![feature(None, TileGeometry::LineString(vec![vec![[0, 0], [10, 10]]]))];
        let layer = GeoJsonWrapper::new(&features, 1, 4096);
        let f = layer.feature(0).unwrap();
        assert_eq!(f.type_code(), 2);
        assert_eq!(f.load_geometry(), vec![vec![Point::new(0, 0), Point::new(10, 10)]]);
        assert_eq!(serde_json::Value::Object(f.properties()), json!({"hello": "world"}));
        assert!(layer.feature(1).is_none());
    }

    #[test]
    fn test_points_form_one_ring() {
        let features = vec![feature(None, TileGeometry::Point(vec![[0, 1], [2, 3]]))];
        let layer = GeoJsonWrapper::new(&features, 1, 4096);
        assert_eq!(
            layer.feature(0).unwrap().load_geometry(),
            vec![vec![Point::new(0, 1), Point::new(2, 3)]]
        );
    }

    #[test]
    fn test_ids() {
        let point = || TileGeometry::Point(vec![[0, 0]]);
        let features = vec![
            feature(Some("42".into()), point()),
            feature(Some(123u64.into()), point()),
            feature(Some("abc".into()), point()),
            feature(None, point()),
            feature(Some("-7px".into()), point()),
        ];
        let layer = GeoJsonWrapper::new(&features, 1, 4096);
        let ids: Vec<_> = layer.features().map(|f| f.id()).collect();
        assert_eq!(ids, vec![Some(42), Some(123), None, None, Some(-7)]);
    }

    #[test]
    fn test_wrap_tile_from_index() {
        let data: geojson::GeoJson = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"name": "test"},
                "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}
            }]
        })
        .to_string()
        .parse()
        .unwrap();
        let options = crate::Options {
            extent: 8192,
            ..Default::default()
        };
        let mut index = crate::GeoJsonVt::new(&data, options).unwrap();
        let tile = index.get_tile(0, 0, 0).unwrap();

        let wrapper = GeoJsonWrapper::from_tile(&tile, 8192);
        let layer = wrapper.layer(GEOJSON_TILE_LAYER_NAME).unwrap();
        assert_eq!(layer.version, 2);
        assert_eq!(layer.extent, 8192);
        assert_eq!(layer.len(), 1);
        assert_eq!(
            layer.feature(0).unwrap().load_geometry(),
            vec![vec![Point::new(4096, 4096)]]
        );
        assert!(wrapper.layer("other").is_none());

        let default = GeoJsonWrapper::from(&*tile);
        assert_eq!((default.version, default.extent), (1, 4096));
    }
}
