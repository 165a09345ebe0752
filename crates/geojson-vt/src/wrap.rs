//! Antimeridian wrapping
//!
//! Geometry within a buffer of the ±180° meridian is duplicated onto the other side of
//! the world so tiles on both edges render it continuously.

use crate::clip::{Axis, clip};
use crate::{Feature, Options, Vertex};
use std::sync::Arc;

/// Add shifted copies of the features that cross or approach the antimeridian
///
/// Returns the input unchanged when nothing needs wrapping.
pub(crate) fn wrap(features: Vec<Arc<Feature>>, options: &Options) -> Vec<Arc<Feature>> {
    #[cfg(feature = "profiling")]
    profiling::scope!("wrap");

    let buffer = options.buffer_ratio();
    let line_metrics = options.line_metrics;
    let band = |start: f64, end: f64| {
        clip(&features, 1.0, start, end, Axis::X, -1.0, 2.0, line_metrics)
    };

    // Left and right world copies
    let left = band(-1.0 - buffer, buffer);
    let right = band(1.0 - buffer, 2.0 + buffer);

    if left.is_none() && right.is_none() {
        return features;
    }

    // Center world copy
    let center = band(-buffer, 1.0 + buffer).unwrap_or_default();

    let mut merged = Vec::with_capacity(center.len());
    if let Some(left) = left {
        merged.extend(shift_features(&left, 1.0));
    }
    merged.extend(center);
    if let Some(right) = right {
        merged.extend(shift_features(&right, -1.0));
    }
    merged
}

fn shift_features(features: &[Arc<Feature>], offset: f64) -> impl Iterator<Item = Arc<Feature>> + '_ {
    features.iter().map(move |f| {
        let geometry = f
            .geometry
            .map_vertices(|v| Vertex::new(v.x + offset, v.y, v.importance));
        Arc::new(Feature::new(f.id.clone(), geometry, f.tags.clone()))
    })
}
