//! Internal feature representation
//!
//! Features are stored in normalized Mercator coordinates. Every vertex of a path carries
//! an importance value assigned once by the simplifier, so that simplifying for a given
//! zoom is a single filter pass instead of a re-run of Douglas-Peucker.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Property map of a GeoJSON feature
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Identifier of a feature, either numeric or textual as allowed by GeoJSON
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(untagged))]
pub enum FeatureId {
    Number(serde_json::Number),
    String(String),
}

impl FeatureId {
    /// Read an id out of a JSON value (used for `promoteId`)
    ///
    /// Only strings and numbers are valid identifiers.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => Some(Self::Number(n.clone())),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    /// The id as an unsigned integer, if it is one
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => n.as_u64(),
            Self::String(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<u64> for FeatureId {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for FeatureId {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for FeatureId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FeatureId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<geojson::feature::Id> for FeatureId {
    fn from(value: geojson::feature::Id) -> Self {
        match value {
            geojson::feature::Id::Number(n) => Self::Number(n),
            geojson::feature::Id::String(s) => Self::String(s),
        }
    }
}

impl From<&FeatureId> for geojson::feature::Id {
    fn from(value: &FeatureId) -> Self {
        match value {
            FeatureId::Number(n) => geojson::feature::Id::Number(n.clone()),
            FeatureId::String(s) => geojson::feature::Id::String(s.clone()),
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

/// A projected vertex
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
    /// Squared deviation at which the simplifier kept this vertex.
    /// Path endpoints and clip intersections carry 1 so they always survive.
    pub importance: f64,
}

impl Vertex {
    #[inline]
    pub fn new(x: f64, y: f64, importance: f64) -> Self {
        Self { x, y, importance }
    }
}

/// A line or ring with its cumulative metrics
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Path {
    pub points: Vec<Vertex>,
    /// Length for lines, absolute area for rings
    pub size: f64,
    /// Distance along the original line where this piece starts
    pub start: f64,
    /// Distance along the original line where this piece ends
    pub end: f64,
}

impl Path {
    /// A new empty path carrying the metrics of `self`
    pub(crate) fn empty_like(&self) -> Self {
        Self {
            points: Vec::new(),
            size: self.size,
            start: self.start,
            end: self.end,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Projected geometry of a feature
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Point(Vertex),
    MultiPoint(Vec<Vertex>),
    LineString(Path),
    MultiLineString(Vec<Path>),
    Polygon(Vec<Path>),
    MultiPolygon(Vec<Vec<Path>>),
}

impl Geometry {
    /// GeoJSON type name of this geometry
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Point(_) => "Point",
            Self::MultiPoint(_) => "MultiPoint",
            Self::LineString(_) => "LineString",
            Self::MultiLineString(_) => "MultiLineString",
            Self::Polygon(_) => "Polygon",
            Self::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Apply `f` to every vertex
    pub(crate) fn map_vertices(&self, f: impl Fn(&Vertex) -> Vertex) -> Self {
        let path = |p: &Path| Path {
            points: p.points.iter().map(&f).collect(),
            ..p.empty_like()
        };
        match self {
            Self::Point(v) => Self::Point(f(v)),
            Self::MultiPoint(points) => Self::MultiPoint(points.iter().map(&f).collect()),
            Self::LineString(line) => Self::LineString(path(line)),
            Self::MultiLineString(lines) => Self::MultiLineString(lines.iter().map(path).collect()),
            Self::Polygon(rings) => Self::Polygon(rings.iter().map(path).collect()),
            Self::MultiPolygon(polygons) => Self::MultiPolygon(
                polygons
                    .iter()
                    .map(|rings| rings.iter().map(path).collect())
                    .collect(),
            ),
        }
    }
}

/// A feature converted to normalized Mercator space
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub id: Option<FeatureId>,
    pub geometry: Geometry,
    pub tags: Option<JsonObject>,
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Feature {
    /// Create a feature and compute its bounding box
    ///
    /// Only the outer ring of polygons contributes to the bounding box, holes are assumed
    /// to be contained in it.
    pub fn new(id: Option<FeatureId>, geometry: Geometry, tags: Option<JsonObject>) -> Self {
        let mut feature = Self {
            id,
            geometry,
            tags,
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        feature.calc_bbox();
        feature
    }

    fn calc_bbox(&mut self) {
        let mut bbox = [self.min_x, self.min_y, self.max_x, self.max_y];
        let mut extend = |points: &[Vertex]| {
            for p in points {
                bbox[0] = bbox[0].min(p.x);
                bbox[1] = bbox[1].min(p.y);
                bbox[2] = bbox[2].max(p.x);
                bbox[3] = bbox[3].max(p.y);
            }
        };
        match &self.geometry {
            Geometry::Point(p) => extend(std::slice::from_ref(p)),
            Geometry::MultiPoint(points) => extend(points),
            Geometry::LineString(line) => extend(&line.points),
            Geometry::MultiLineString(lines) => lines.iter().for_each(|l| extend(&l.points)),
            Geometry::Polygon(rings) => {
                if let Some(outer) = rings.first() {
                    extend(&outer.points);
                }
            }
            Geometry::MultiPolygon(polygons) => {
                for outer in polygons.iter().filter_map(|rings| rings.first()) {
                    extend(&outer.points);
                }
            }
        }
        [self.min_x, self.min_y, self.max_x, self.max_y] = bbox;
    }

    /// Bounding box as a rectangle, `None` for a feature without vertices
    pub fn bbox(&self) -> Option<geo::Rect<f64>> {
        (self.min_x <= self.max_x && self.min_y <= self.max_y).then(|| {
            geo::Rect::new(
                geo::Coord {
                    x: self.min_x,
                    y: self.min_y,
                },
                geo::Coord {
                    x: self.max_x,
                    y: self.max_y,
                },
            )
        })
    }
}
