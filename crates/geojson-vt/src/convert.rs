//! GeoJSON to internal feature conversion
//!
//! Walks any GeoJSON object, projects its coordinates to normalized Mercator and annotates
//! every path with Douglas-Peucker importance values.

use crate::projection::{project_x, project_y};
use crate::simplify::simplify;
use crate::{Feature, FeatureId, Geometry, JsonObject, Options, Path, Result, Vertex, VtError};

use geojson::{GeoJson, Position, Value};

/// Convert a GeoJSON object into projected features
pub(crate) fn convert(data: &GeoJson, options: &Options) -> Result<Vec<Feature>> {
    #[cfg(feature = "profiling")]
    profiling::scope!("convert");

    let mut features = Vec::new();
    match data {
        GeoJson::FeatureCollection(collection) => {
            for (index, feature) in collection.features.iter().enumerate() {
                convert_feature(&mut features, feature, options, Some(index))?;
            }
        }
        GeoJson::Feature(feature) => convert_feature(&mut features, feature, options, None)?,
        GeoJson::Geometry(geometry) => {
            let id = options.generate_id.then(|| FeatureId::from(0u64));
            convert_geometry(&mut features, geometry, id, None, options)?;
        }
    }
    Ok(features)
}

/// Convert a single GeoJSON feature, `index` being its position in its collection
pub(crate) fn convert_feature(
    features: &mut Vec<Feature>,
    feature: &geojson::Feature,
    options: &Options,
    index: Option<usize>,
) -> Result<()> {
    let Some(geometry) = &feature.geometry else {
        return Ok(());
    };
    let id = feature_id(feature, options, index);
    convert_geometry(features, geometry, id, feature.properties.as_ref(), options)
}

/// Resolve the id of a feature: promoted property, then generated index, then literal id
pub(crate) fn feature_id(
    feature: &geojson::Feature,
    options: &Options,
    index: Option<usize>,
) -> Option<FeatureId> {
    if let Some(key) = &options.promote_id {
        return feature
            .properties
            .as_ref()
            .and_then(|props| props.get(key))
            .and_then(FeatureId::from_json);
    }
    if options.generate_id {
        return Some(FeatureId::from(index.unwrap_or(0) as u64));
    }
    feature.id.clone().map(FeatureId::from)
}

/// Convert a geometry with an already resolved id
///
/// Geometry collections are flattened into one feature per member, all sharing the
/// same id and properties.
pub(crate) fn convert_geometry(
    features: &mut Vec<Feature>,
    geometry: &geojson::Geometry,
    id: Option<FeatureId>,
    tags: Option<&JsonObject>,
    options: &Options,
) -> Result<()> {
    let tolerance = (options.tolerance
        / ((1u64 << options.max_zoom) as f64 * options.extent as f64))
        .powi(2);
    let mut push = |geometry: Geometry| {
        features.push(Feature::new(id.clone(), geometry, tags.cloned()));
    };

    match &geometry.value {
        Value::Point(coords) if !coords.is_empty() => {
            push(Geometry::Point(convert_point(coords)?));
        }
        Value::MultiPoint(points) if !points.is_empty() => {
            let points = points
                .iter()
                .map(convert_point)
                .collect::<Result<Vec<_>>>()?;
            push(Geometry::MultiPoint(points));
        }
        Value::LineString(coords) if !coords.is_empty() => {
            push(Geometry::LineString(convert_line(coords, tolerance, false)?));
        }
        Value::MultiLineString(lines) if !lines.is_empty() => {
            let lines = convert_lines(lines, tolerance, false)?;
            if options.line_metrics {
                // Explode into line strings to track metrics
                for line in lines {
                    push(Geometry::LineString(line));
                }
            } else {
                push(Geometry::MultiLineString(lines));
            }
        }
        Value::Polygon(rings) if !rings.is_empty() => {
            push(Geometry::Polygon(convert_lines(rings, tolerance, true)?));
        }
        Value::MultiPolygon(polygons) if !polygons.is_empty() => {
            let polygons = polygons
                .iter()
                .map(|rings| convert_lines(rings, tolerance, true))
                .collect::<Result<Vec<_>>>()?;
            push(Geometry::MultiPolygon(polygons));
        }
        Value::GeometryCollection(geometries) => {
            for geometry in geometries {
                convert_geometry(features, geometry, id.clone(), tags, options)?;
            }
        }
        // Missing coordinates are skipped silently
        _ => {}
    }
    Ok(())
}

fn convert_point(coords: &Position) -> Result<Vertex> {
    match coords.as_slice() {
        [lon, lat, ..] => Ok(Vertex::new(project_x(*lon), project_y(*lat), 0.0)),
        _ => Err(VtError::InvalidGeoJson(format!(
            "position needs at least two coordinates, got {:?}",
            coords
        ))),
    }
}

/// Project a line or ring and annotate it for simplification
///
/// The path size is the length for lines and the absolute area for rings.
fn convert_line(ring: &[Position], tolerance: f64, is_polygon: bool) -> Result<Path> {
    let mut points: Vec<Vertex> = Vec::with_capacity(ring.len());
    let mut size = 0.0;

    for coords in ring {
        let p = convert_point(coords)?;
        if let Some(prev) = points.last() {
            if is_polygon {
                size += (prev.x * p.y - p.x * prev.y) / 2.0;
            } else {
                size += ((p.x - prev.x).powi(2) + (p.y - prev.y).powi(2)).sqrt();
            }
        }
        points.push(p);
    }

    if let Some(last) = points.len().checked_sub(1) {
        points[0].importance = 1.0;
        if tolerance > 0.0 && last > 0 {
            simplify(&mut points, 0, last, tolerance);
        }
        points[last].importance = 1.0;
    }

    let size = f64::abs(size);
    Ok(Path {
        points,
        size,
        start: 0.0,
        end: size,
    })
}

fn convert_lines(rings: &[Vec<Position>], tolerance: f64, is_polygon: bool) -> Result<Vec<Path>> {
    rings
        .iter()
        .map(|ring| convert_line(ring, tolerance, is_polygon))
        .collect()
}
