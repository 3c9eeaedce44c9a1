//! Great-circle distance used by the `location:` directive and the
//! structured geo filter.

/// Mean Earth radius (IUGG), kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Haversine distance in kilometers between two `(lon, lat)` points.
///
/// Argument order follows the store's column order (`center_lon`,
/// `center_lat`), not the usual lat-first convention.
pub fn distance_km(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair above 1.0 for antipodal points.
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_KM * c
}
