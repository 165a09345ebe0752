//! Internal feature to GeoJSON conversion

use crate::projection::{unproject_x, unproject_y};
use crate::{Feature, Geometry, Path, Vertex};

use geojson::{FeatureCollection, GeoJson, Position, Value};
use std::sync::Arc;

/// Convert internal features back to a GeoJSON feature collection
pub fn convert_to_geojson(features: &[Arc<Feature>]) -> GeoJson {
    GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features: features.iter().map(|f| feature_to_geojson(f)).collect(),
        foreign_members: None,
    })
}

/// Convert a single internal feature back to GeoJSON
pub fn feature_to_geojson(feature: &Feature) -> geojson::Feature {
    let value = match &feature.geometry {
        Geometry::Point(p) => Value::Point(unproject(p)),
        Geometry::MultiPoint(points) => Value::MultiPoint(points.iter().map(unproject).collect()),
        Geometry::LineString(line) => Value::LineString(unproject_path(line)),
        Geometry::MultiLineString(lines) => {
            Value::MultiLineString(lines.iter().map(unproject_path).collect())
        }
        Geometry::Polygon(rings) => Value::Polygon(rings.iter().map(unproject_path).collect()),
        Geometry::MultiPolygon(polygons) => Value::MultiPolygon(
            polygons
                .iter()
                .map(|rings| rings.iter().map(unproject_path).collect())
                .collect(),
        ),
    };

    geojson::Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(value)),
        id: feature.id.as_ref().map(Into::into),
        properties: feature.tags.clone(),
        foreign_members: None,
    }
}

#[inline]
fn unproject(v: &Vertex) -> Position {
    vec![unproject_x(v.x), unproject_y(v.y)]
}

fn unproject_path(path: &Path) -> Vec<Position> {
    path.points.iter().map(unproject).collect()
}
