//! Great-circle distance and ETA helpers.

use crate::errors::{DonationError, Result};
use crate::types::GeoPoint;

/// Mean earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two coordinates, in kilometres.
pub fn distance_km(a: &GeoPoint, b: &GeoPoint) -> Result<f64> {
    a.validate()?;
    b.validate()?;

    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    Ok(EARTH_RADIUS_KM * c)
}

/// Minutes to cover `distance_km` at `speed_kmh`, rounded to the nearest minute.
///
/// Zero distance yields `0`, which callers render as "arrived".
pub fn eta_minutes(distance_km: f64, speed_kmh: f64) -> Result<u32> {
    if !speed_kmh.is_finite() || speed_kmh <= 0.0 {
        return Err(DonationError::InvalidSpeed(speed_kmh));
    }
    if !distance_km.is_finite() || distance_km < 0.0 {
        return Err(DonationError::InvalidDistance(distance_km));
    }
    if distance_km == 0.0 {
        return Ok(0);
    }
    let minutes = (distance_km / speed_kmh * 60.0).round();
    Ok(minutes.min(f64::from(u32::MAX)) as u32)
}

/// Move from `from` towards `to` by at most `max_km`, landing on `to` when it
/// is within reach. Interpolates linearly in degree space, which is adequate
/// at city scale.
pub fn step_towards(from: &GeoPoint, to: &GeoPoint, max_km: f64) -> Result<GeoPoint> {
    if !max_km.is_finite() || max_km < 0.0 {
        return Err(DonationError::InvalidDistance(max_km));
    }
    let remaining = distance_km(from, to)?;
    if remaining <= max_km || remaining == 0.0 {
        return Ok(*to);
    }
    let fraction = max_km / remaining;
    Ok(GeoPoint::new(
        from.lat + (to.lat - from.lat) * fraction,
        from.lng + (to.lng - from.lng) * fraction,
    ))
}
