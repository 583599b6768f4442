use std::fmt;

use glam::DVec3;

use crate::error::Result;
use crate::message::UtmZone;
use crate::utm::{geodetic_to_utm, utm_to_geodetic};

pub const DATUM: &str = "WGS84";

/// The application's single UTM frame.
///
/// It has two states: it has a zone and origin, or it does not. The origin can
/// be set once; later attempts succeed only if they match. A local offset is
/// applied to all point data so that rendering works with small coordinates.
///
/// The local (render) frame has x = easting, y = altitude, z = -northing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UtmCoordinateSystem {
    zone: Option<UtmZone>,
    offset: DVec3,
}

impl UtmCoordinateSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_origin(&self) -> bool {
        self.zone.is_some()
    }

    pub fn zone(&self) -> Option<UtmZone> {
        self.zone
    }

    pub fn offset(&self) -> DVec3 {
        self.offset
    }

    /// `10N`, or empty before the origin is set.
    pub fn zone_string(&self) -> String {
        self.zone.map(|z| z.to_string()).unwrap_or_default()
    }

    pub fn zone_match(&self, number: u8, northern_hemisphere: bool) -> bool {
        self.zone
            .map_or(false, |z| z.number() == number && z.is_northern() == northern_hemisphere)
    }

    /// Set the origin once. Returns false if an origin exists and differs.
    pub fn set_origin(&mut self, number: u8, northern_hemisphere: bool, offset: DVec3) -> bool {
        if self.has_origin() {
            return self.offset == offset && self.zone_match(number, northern_hemisphere);
        }

        let zone = match UtmZone::new(number, northern_hemisphere) {
            Ok(zone) => zone,
            Err(_) => {
                // Legacy producers emit zone 0; keep loading in the fallback zone.
                tracing::warn!(
                    zone_number = number,
                    northern_hemisphere,
                    "Invalid UTM zone on first tile; falling back to {}",
                    UtmZone::FALLBACK
                );
                UtmZone::FALLBACK
            }
        };

        self.zone = Some(zone);
        self.offset = offset;
        tracing::info!(zone = %zone, offset = ?offset, "UTM origin set");
        true
    }

    pub fn utm_to_local(&self, utm: DVec3) -> DVec3 {
        let t = utm - self.offset;
        DVec3::new(t.x, t.z, -t.y)
    }

    pub fn local_to_utm(&self, p: DVec3) -> DVec3 {
        DVec3::new(p.x, -p.z, p.y) + self.offset
    }

    /// Local point to `(longitude, latitude, altitude)`.
    pub fn local_to_lng_lat_alt(&self, p: DVec3) -> Result<DVec3> {
        let utm = self.local_to_utm(p);
        let zone = self.zone.unwrap_or(UtmZone::FALLBACK);
        let (lat, lng) = utm_to_geodetic(utm.x, utm.y, zone)?;
        Ok(DVec3::new(lng, lat, utm.z))
    }

    /// `(longitude, latitude, altitude)` to a local point, projected in this
    /// system's zone even when the position lies in a neighbouring zone.
    pub fn lng_lat_alt_to_local(&self, lng_lat_alt: DVec3) -> Result<DVec3> {
        let zone = self.zone.unwrap_or(UtmZone::FALLBACK);
        let mut utm = geodetic_to_utm(lng_lat_alt.y, lng_lat_alt.x, Some(zone.number()))?;

        // Projection picks the false northing from the latitude; keep the zone's.
        if zone.is_northern() && lng_lat_alt.y < 0.0 {
            utm.northing -= crate::utm::FALSE_NORTHING_SOUTH;
        } else if !zone.is_northern() && lng_lat_alt.y >= 0.0 {
            utm.northing += crate::utm::FALSE_NORTHING_SOUTH;
        }

        Ok(self.utm_to_local(DVec3::new(utm.easting, utm.northing, lng_lat_alt.z)))
    }
}

impl fmt::Display for UtmCoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UtmCoordinateSystem(UTM Zone: {}, offset: [{},{},{}])",
            self.zone_string(),
            self.offset.x,
            self.offset.y,
            self.offset.z
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_is_set_once() {
        let mut cs = UtmCoordinateSystem::new();
        assert!(!cs.has_origin());
        assert_eq!(cs.zone_string(), "");

        let offset = DVec3::new(552_000.0, 4_182_000.0, 0.0);
        assert!(cs.set_origin(10, true, offset));
        assert_eq!(cs.zone_string(), "10N");

        assert!(cs.set_origin(10, true, offset));
        assert!(!cs.set_origin(11, true, offset));
        assert!(!cs.set_origin(10, true, DVec3::ZERO));
        assert_eq!(cs.offset(), offset);
    }

    #[test]
    fn test_invalid_first_zone_falls_back() {
        let mut cs = UtmCoordinateSystem::new();
        assert!(cs.set_origin(0, false, DVec3::ZERO));
        assert!(cs.zone_match(18, true));
    }

    #[test]
    fn test_local_frame_axes() {
        let mut cs = UtmCoordinateSystem::new();
        cs.set_origin(10, true, DVec3::new(100.0, 200.0, 10.0));

        let local = cs.utm_to_local(DVec3::new(101.0, 203.0, 12.0));
        assert_eq!(local, DVec3::new(1.0, 2.0, -3.0));
        assert_eq!(cs.local_to_utm(local), DVec3::new(101.0, 203.0, 12.0));
    }

    #[test]
    fn test_geodetic_through_local_frame() {
        let mut cs = UtmCoordinateSystem::new();
        cs.set_origin(18, true, DVec3::new(323_000.0, 4_307_000.0, 0.0));

        let lla = DVec3::new(-77.03, 38.9, 15.0);
        let local = cs.lng_lat_alt_to_local(lla).unwrap();
        let back = cs.local_to_lng_lat_alt(local).unwrap();

        assert!((back - lla).abs().max_element() < 1e-7, "{back:?}");
    }
}
