//! Coordinate conversions between WGS84 and normalized spherical Mercator
//!
//! Normalized Mercator maps the whole world onto the unit square: x grows eastwards from
//! 0 at -180° to 1 at 180°, y grows southwards from 0 at the northern limit to 1 at the
//! southern limit. Every tile computation in this crate happens in this space.

use std::f64::consts::PI;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Convert a longitude in degrees to normalized Mercator x
#[inline(always)]
pub fn project_x(lon: f64) -> f64 {
    lon / 360.0 + 0.5
}

/// Convert a latitude in degrees to normalized Mercator y
///
/// # Arguments
/// * `lat` - Latitude in degrees
///
/// # Returns
/// The y coordinate, clamped to `[0, 1]` so that the poles map to the square's edges
#[inline(always)]
pub fn project_y(lat: f64) -> f64 {
    let sin = (lat * PI / 180.0).sin();
    let y = 0.5 - 0.25 * ((1.0 + sin) / (1.0 - sin)).ln() / PI;
    y.clamp(0.0, 1.0)
}

/// Convert normalized Mercator x back to a longitude in degrees
#[inline(always)]
pub fn unproject_x(x: f64) -> f64 {
    (x - 0.5) * 360.0
}

/// Convert normalized Mercator y back to a latitude in degrees
#[inline(always)]
pub fn unproject_y(y: f64) -> f64 {
    let y2 = (0.5 - y) * 2.0 * PI;
    (2.0 * y2.exp().atan() - PI / 2.0) * 180.0 / PI
}

/// Wrap a longitude into `[-180, 180]`
#[inline]
pub fn normalize_lng(lng: f64) -> f64 {
    ((lng + 180.0) % 360.0 + 360.0) % 360.0 - 180.0
}
