//! Axis-parallel feature clipping
//!
//! Clips features between two vertical or horizontal lines:
//!
//! ```text
//!     |        |
//!  ___|___     |     /
//! /   |   \____|____/
//!     |        |
//! ```

use crate::{Feature, Geometry, Path, Vertex};
use std::sync::Arc;

/// Axis a clip range applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Axis {
    X,
    Y,
}

impl Axis {
    #[inline]
    fn of(self, v: &Vertex) -> f64 {
        match self {
            Axis::X => v.x,
            Axis::Y => v.y,
        }
    }

    #[inline]
    fn range(self, f: &Feature) -> (f64, f64) {
        match self {
            Axis::X => (f.min_x, f.max_x),
            Axis::Y => (f.min_y, f.max_y),
        }
    }
}

/// Clip `features` to `[start / scale, end / scale)` along `axis`
///
/// `min_all` and `max_all` bound all features along the axis and allow accepting or
/// rejecting the whole set at once. Returns `None` when nothing is left.
#[allow(clippy::too_many_arguments)]
pub(crate) fn clip(
    features: &[Arc<Feature>],
    scale: f64,
    start: f64,
    end: f64,
    axis: Axis,
    min_all: f64,
    max_all: f64,
    line_metrics: bool,
) -> Option<Vec<Arc<Feature>>> {
    #[cfg(feature = "profiling")]
    profiling::scope!("clip");

    let start = start / scale;
    let end = end / scale;

    if min_all >= start && max_all < end {
        return Some(features.to_vec());
    }
    if max_all < start || min_all >= end {
        return None;
    }

    let mut clipped = Vec::new();

    for feature in features {
        let (min, max) = axis.range(feature);

        if min >= start && max < end {
            clipped.push(feature.clone());
            continue;
        }
        if max < start || min >= end {
            continue;
        }

        let id = &feature.id;
        let mut push = |geometry: Geometry| {
            clipped.push(Arc::new(Feature::new(
                id.clone(),
                geometry,
                feature.tags.clone(),
            )));
        };

        match &feature.geometry {
            Geometry::Point(p) => {
                if within(axis.of(p), start, end) {
                    push(Geometry::Point(*p));
                }
            }
            Geometry::MultiPoint(points) => {
                let mut kept: Vec<Vertex> = points
                    .iter()
                    .filter(|p| within(axis.of(p), start, end))
                    .copied()
                    .collect();
                match kept.len() {
                    0 => {}
                    1 => push(Geometry::Point(kept.remove(0))),
                    _ => push(Geometry::MultiPoint(kept)),
                }
            }
            Geometry::LineString(line) => {
                let mut pieces = Vec::new();
                clip_line(line, &mut pieces, start, end, axis, false, line_metrics);
                if line_metrics {
                    for piece in pieces {
                        push(Geometry::LineString(piece));
                    }
                } else if pieces.len() > 1 {
                    push(Geometry::MultiLineString(pieces));
                } else if let Some(piece) = pieces.pop() {
                    push(Geometry::LineString(piece));
                }
            }
            Geometry::MultiLineString(lines) => {
                let mut pieces = clip_lines(lines, start, end, axis, false);
                if pieces.len() == 1 {
                    if let Some(piece) = pieces.pop() {
                        push(Geometry::LineString(piece));
                    }
                } else if !pieces.is_empty() {
                    push(Geometry::MultiLineString(pieces));
                }
            }
            Geometry::Polygon(rings) => {
                let rings = clip_lines(rings, start, end, axis, true);
                if !rings.is_empty() {
                    push(Geometry::Polygon(rings));
                }
            }
            Geometry::MultiPolygon(polygons) => {
                let polygons: Vec<Vec<Path>> = polygons
                    .iter()
                    .map(|rings| clip_lines(rings, start, end, axis, true))
                    .filter(|rings| !rings.is_empty())
                    .collect();
                if !polygons.is_empty() {
                    push(Geometry::MultiPolygon(polygons));
                }
            }
        }
    }

    (!clipped.is_empty()).then_some(clipped)
}

#[inline]
fn within(a: f64, start: f64, end: f64) -> bool {
    a >= start && a <= end
}

fn clip_lines(lines: &[Path], start: f64, end: f64, axis: Axis, is_polygon: bool) -> Vec<Path> {
    let mut out = Vec::new();
    for line in lines {
        clip_line(line, &mut out, start, end, axis, is_polygon, false);
    }
    out
}

/// Clip a single path, pushing the resulting pieces to `out`
///
/// Lines are cut into a new piece every time they leave the range. Rings stay a single
/// piece and get closed if clipping separated their endpoints.
fn clip_line(
    line: &Path,
    out: &mut Vec<Path>,
    start: f64,
    end: f64,
    axis: Axis,
    is_polygon: bool,
    track_metrics: bool,
) {
    let Some(last) = line.points.last() else {
        return;
    };

    let mut slice = line.empty_like();
    let mut len = line.start;

    for pair in line.points.windows(2) {
        let (pa, pb) = (&pair[0], &pair[1]);
        let a = axis.of(pa);
        let b = axis.of(pb);
        let mut exited = None;
        let seg_len = if track_metrics {
            ((pa.x - pb.x).powi(2) + (pa.y - pb.y).powi(2)).sqrt()
        } else {
            0.0
        };

        if a < start {
            // ---|-->  | (line enters the clip region from the left)
            if b > start {
                let t = intersect(&mut slice, pa, pb, start, axis);
                if track_metrics {
                    slice.start = len + seg_len * t;
                }
            }
        } else if a > end {
            // |  <--|--- (line enters the clip region from the right)
            if b < end {
                let t = intersect(&mut slice, pa, pb, end, axis);
                if track_metrics {
                    slice.start = len + seg_len * t;
                }
            }
        } else {
            slice.points.push(*pa);
        }

        if b < start && a >= start {
            // <--|---  | or <--|-----|--- (line exits the clip region on the left)
            exited = Some(intersect(&mut slice, pa, pb, start, axis));
        }
        if b > end && a <= end {
            // |  ---|--> or ---|-----|--> (line exits the clip region on the right)
            exited = Some(intersect(&mut slice, pa, pb, end, axis));
        }

        if let (false, Some(t)) = (is_polygon, exited) {
            if track_metrics {
                slice.end = len + seg_len * t;
            }
            out.push(std::mem::replace(&mut slice, line.empty_like()));
        }

        len += seg_len;
    }

    // Add the last point
    if within(axis.of(last), start, end) {
        slice.points.push(*last);
    }

    // Close the ring if its endpoints are not the same after clipping
    if is_polygon && slice.points.len() >= 2 {
        let first = slice.points[0];
        let last = slice.points[slice.points.len() - 1];
        if first.x != last.x || first.y != last.y {
            slice.points.push(first);
        }
    }

    if !slice.points.is_empty() {
        out.push(slice);
    }
}

/// Push the intersection of `a`-`b` with the line `axis = k` and return its position along the segment
#[inline]
fn intersect(out: &mut Path, a: &Vertex, b: &Vertex, k: f64, axis: Axis) -> f64 {
    match axis {
        Axis::X => {
            let t = (k - a.x) / (b.x - a.x);
            out.points.push(Vertex::new(k, a.y + (b.y - a.y) * t, 1.0));
            t
        }
        Axis::Y => {
            let t = (k - a.y) / (b.y - a.y);
            out.points.push(Vertex::new(a.x + (b.x - a.x) * t, k, 1.0));
            t
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(coords: &[(f64, f64)]) -> Path {
        Path {
            points: coords.iter().map(|&(x, y)| Vertex::new(x, y, 0.0)).collect(),
            ..Default::default()
        }
    }

    fn coords(path: &Path) -> Vec<(f64, f64)> {
        path.points.iter().map(|p| (p.x, p.y)).collect()
    }

    fn feature(geometry: Geometry) -> Arc<Feature> {
        Arc::new(Feature::new(Some(1u64.into()), geometry, None))
    }

    fn clip_x(features: &[Arc<Feature>], start: f64, end: f64) -> Option<Vec<Arc<Feature>>> {
        clip(features, 1.0, start, end, Axis::X, -1.0, 2.0, false)
    }

    #[test]
    fn test_clip_polyline() {
        let line = path(&[
            (0.0, 0.0), (50.0, 0.0), (50.0, 10.0), (20.0, 10.0), (20.0, 20.0), (30.0, 20.0),
            (30.0, 30.0), (50.0, 30.0), (50.0, 40.0), (25.0, 40.0), (25.0, 50.0), (0.0, 50.0),
            (0.0, 60.0), (25.0, 60.0),
        ]);
        let features = vec![feature(Geometry::LineString(line))];
        let clipped = clip(&features, 1.0, 10.0, 40.0, Axis::X, -1.0e9, 1.0e9, false).unwrap();

        assert_eq!(clipped.len(), 1);
        let Geometry::MultiLineString(pieces) = &clipped[0].geometry else {
            panic!("expected a multi line string");
        };
        assert_eq!(
            coords(&pieces[0]),
            vec![(10.0, 0.0), (40.0, 0.0)]
        );
        assert_eq!(
            coords(&pieces[1]),
            vec![(40.0, 10.0), (20.0, 10.0), (20.0, 20.0), (30.0, 20.0), (30.0, 30.0), (40.0, 30.0)]
        );
        assert_eq!(coords(&pieces[2]), vec![(40.0, 40.0), (25.0, 40.0), (25.0, 50.0), (10.0, 50.0)]);
        assert_eq!(coords(&pieces[3]), vec![(10.0, 60.0), (25.0, 60.0)]);
        // Intersections always survive simplification
        assert_eq!(pieces[0].points[0].importance, 1.0);
    }

    #[test]
    fn test_clip_polygon_closes_ring() {
        let ring = path(&[
            (0.0, 0.0), (50.0, 0.0), (50.0, 10.0), (20.0, 10.0), (20.0, 20.0), (30.0, 20.0),
            (30.0, 30.0), (50.0, 30.0), (50.0, 40.0), (25.0, 40.0), (25.0, 50.0), (0.0, 50.0),
            (0.0, 60.0), (25.0, 60.0), (0.0, 0.0),
        ]);
        let features = vec![feature(Geometry::Polygon(vec![ring]))];
        let clipped = clip(&features, 1.0, 10.0, 40.0, Axis::X, -1.0e9, 1.0e9, false).unwrap();

        let Geometry::Polygon(rings) = &clipped[0].geometry else {
            panic!("expected a polygon");
        };
        assert_eq!(rings.len(), 1);
        let ring = coords(&rings[0]);
        assert_eq!(ring.first(), ring.last());
        assert_eq!(
            ring,
            vec![
                (10.0, 0.0), (40.0, 0.0), (40.0, 10.0), (20.0, 10.0), (20.0, 20.0), (30.0, 20.0),
                (30.0, 30.0), (40.0, 30.0), (40.0, 40.0), (25.0, 40.0), (25.0, 50.0), (10.0, 50.0),
                (10.0, 60.0), (25.0, 60.0), (10.0, 24.0), (10.0, 0.0),
            ]
        );
    }

    #[test]
    fn test_clip_points() {
        let points: Vec<Vertex> = [(0.0, 0.0), (50.0, 0.0), (50.0, 10.0), (20.0, 10.0), (20.0, 20.0)]
            .iter()
            .map(|&(x, y)| Vertex::new(x, y, 0.0))
            .collect();
        let features = vec![feature(Geometry::MultiPoint(points))];
        let clipped = clip(&features, 1.0, 10.0, 40.0, Axis::X, -1.0e9, 1.0e9, false).unwrap();
        let Geometry::MultiPoint(kept) = &clipped[0].geometry else {
            panic!("expected a multi point");
        };
        let kept: Vec<(f64, f64)> = kept.iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(kept, vec![(20.0, 10.0), (20.0, 20.0)]);
    }

    #[test]
    fn test_single_remaining_point_becomes_point() {
        let points = vec![Vertex::new(0.1, 0.5, 0.0), Vertex::new(0.9, 0.5, 0.0)];
        let features = vec![feature(Geometry::MultiPoint(points))];
        let clipped = clip_x(&features, 0.0, 0.5).unwrap();
        assert!(matches!(clipped[0].geometry, Geometry::Point(_)));
    }

    #[test]
    fn test_trivial_accept_and_reject() {
        let features = vec![feature(Geometry::Point(Vertex::new(0.5, 0.5, 0.0)))];
        // Whole set inside
        let accepted = clip(&features, 1.0, 0.0, 1.0, Axis::X, 0.5, 0.5, false).unwrap();
        assert!(Arc::ptr_eq(&accepted[0], &features[0]));
        // Whole set outside
        assert!(clip(&features, 1.0, 0.6, 1.0, Axis::X, 0.5, 0.5, false).is_none());
        // Feature outside, set bounds overlapping
        assert!(clip_x(&features, 0.6, 1.0).is_none());
    }

    #[test]
    fn test_scale_divides_range() {
        let features = vec![feature(Geometry::Point(Vertex::new(0.3, 0.5, 0.0)))];
        // [1, 2) / 4 = [0.25, 0.5)
        let clipped = clip(&features, 4.0, 1.0, 2.0, Axis::X, -1.0, 2.0, false).unwrap();
        assert_eq!(clipped.len(), 1);
    }

    #[test]
    fn test_line_metrics_interpolated() {
        let mut line = path(&[(0.0, 0.5), (1.0, 0.5)]);
        line.size = 1.0;
        line.end = 1.0;
        let features = vec![feature(Geometry::LineString(line))];
        let clipped = clip(&features, 1.0, 0.25, 0.5, Axis::X, -1.0, 2.0, true).unwrap();
        let Geometry::LineString(piece) = &clipped[0].geometry else {
            panic!("expected a line");
        };
        assert!((piece.start - 0.25).abs() < 1e-12);
        assert!((piece.end - 0.5).abs() < 1e-12);
        assert_eq!(piece.size, 1.0);
    }

    #[test]
    fn test_clip_partition() {
        // Clipping [0, 0.5) and [0.5, 1) covers the same points as [0, 1)
        let points: Vec<Vertex> = (0..10)
            .map(|i| Vertex::new(0.05 + i as f64 * 0.1, 0.5, 0.0))
            .collect();
        let features = vec![feature(Geometry::MultiPoint(points))];
        let count = |r: Option<Vec<Arc<Feature>>>| match r.as_deref() {
            Some([f]) => match &f.geometry {
                Geometry::MultiPoint(p) => p.len(),
                Geometry::Point(_) => 1,
                _ => 0,
            },
            _ => 0,
        };
        let left = count(clip_x(&features, 0.0, 0.5));
        let right = count(clip_x(&features, 0.5, 1.0));
        let all = count(clip_x(&features, 0.0, 1.0));
        assert_eq!(left + right, all);
        assert_eq!(all, 10);
    }
}
