//! Douglas-Peucker importance annotation
//!
//! Instead of removing points, the simplifier records on every retained vertex the squared
//! distance it deviated from the chord when it was picked. Simplifying for a tolerance `t`
//! then means keeping the vertices whose importance exceeds `t²`.

use crate::Vertex;

/// Annotate `points[first..=last]` with importance values
///
/// Interior points that never exceed `sq_tolerance` keep their current importance (0 after
/// conversion). Endpoints are left untouched; callers pin them to 1.
pub(crate) fn simplify(points: &mut [Vertex], first: usize, last: usize, sq_tolerance: f64) {
    let mut max_sq_dist = sq_tolerance;
    let mid = first + (last - first) / 2;
    let mut min_pos_to_mid = last - first;
    let mut index = None;

    let a = points[first];
    let b = points[last];

    for i in first + 1..last {
        let d = sq_seg_dist(&points[i], &a, &b);
        if d > max_sq_dist {
            index = Some(i);
            max_sq_dist = d;
        } else if d == max_sq_dist {
            // Prefer a pivot close to the middle to keep recursion shallow on degenerate input
            let pos_to_mid = i.abs_diff(mid);
            if pos_to_mid < min_pos_to_mid {
                index = Some(i);
                min_pos_to_mid = pos_to_mid;
            }
        }
    }

    if let Some(index) = index.filter(|_| max_sq_dist > sq_tolerance) {
        if index - first > 1 {
            simplify(points, first, index, sq_tolerance);
        }
        points[index].importance = max_sq_dist;
        if last - index > 1 {
            simplify(points, index, last, sq_tolerance);
        }
    }
}

/// Squared distance from `p` to the segment `a`-`b`
#[inline]
fn sq_seg_dist(p: &Vertex, a: &Vertex, b: &Vertex) -> f64 {
    let (mut x, mut y) = (a.x, a.y);
    let mut dx = b.x - x;
    let mut dy = b.y - y;

    if dx != 0.0 || dy != 0.0 {
        let t = ((p.x - x) * dx + (p.y - y) * dy) / (dx * dx + dy * dy);
        if t > 1.0 {
            x = b.x;
            y = b.y;
        } else if t > 0.0 {
            x += dx * t;
            y += dy * t;
        }
    }

    dx = p.x - x;
    dy = p.y - y;
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertices(coords: &[(f64, f64)]) -> Vec<Vertex> {
        coords.iter().map(|&(x, y)| Vertex::new(x, y, 0.0)).collect()
    }

    #[test]
    fn test_collinear_points_keep_zero_importance() {
        let mut points = vertices(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]);
        simplify(&mut points, 0, 3, 0.0);
        assert!(points.iter().all(|p| p.importance == 0.0));
    }

    #[test]
    fn test_peak_gets_squared_distance() {
        let mut points = vertices(&[(0.0, 0.0), (1.0, 2.0), (2.0, 0.0)]);
        simplify(&mut points, 0, 2, 0.0);
        assert!((points[1].importance - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_tolerance_filters_small_deviations() {
        let mut points = vertices(&[(0.0, 0.0), (1.0, 0.1), (2.0, 0.0), (3.0, 5.0), (4.0, 0.0)]);
        simplify(&mut points, 0, 4, 1.0);
        // The spike survives, the small wiggle does not
        assert!(points[3].importance > 1.0);
        assert_eq!(points[1].importance, 0.0);
    }

    #[test]
    fn test_nested_importance_is_recorded() {
        let mut points = vertices(&[(0.0, 0.0), (1.0, 2.0), (2.0, 0.0), (3.0, 3.0), (4.0, 0.0)]);
        simplify(&mut points, 0, 4, 0.0);
        // (3,3) is picked first against the long chord, (1,2) later against a shorter one
        assert!(points[3].importance > points[1].importance);
        assert!(points[1].importance > 0.0);
    }

    #[test]
    fn test_segment_distance_beyond_endpoints() {
        let a = Vertex::new(0.0, 0.0, 0.0);
        let b = Vertex::new(1.0, 0.0, 0.0);
        assert!((sq_seg_dist(&Vertex::new(2.0, 0.0, 0.0), &a, &b) - 1.0).abs() < 1e-12);
        assert!((sq_seg_dist(&Vertex::new(-1.0, 1.0, 0.0), &a, &b) - 2.0).abs() < 1e-12);
        assert!((sq_seg_dist(&Vertex::new(0.5, 3.0, 0.0), &a, &b) - 9.0).abs() < 1e-12);
    }
}
