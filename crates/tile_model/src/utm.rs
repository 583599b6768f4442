//! UTM <-> geodetic conversion on the WGS-84 ellipsoid.
//!
//! Series expansions after Snyder, "Map Projections: A Working Manual"
//! (USGS PP 1395), accurate to well below a millimetre inside a zone.

use utmt::wgs84;

use crate::error::{ModelError, Result};
use crate::message::UtmZone;

/// Central meridian scale factor.
pub const K0: f64 = 0.9996;
pub const FALSE_EASTING: f64 = 500_000.0;
pub const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

const E: f64 = wgs84::E2;
const E2: f64 = E * E;
const E3: f64 = E2 * E;
const E_P2: f64 = wgs84::E2P;

const M1: f64 = 1.0 - E / 4.0 - 3.0 * E2 / 64.0 - 5.0 * E3 / 256.0;
const M2: f64 = 3.0 * E / 8.0 + 3.0 * E2 / 32.0 + 45.0 * E3 / 1024.0;
const M3: f64 = 15.0 * E2 / 256.0 + 45.0 * E3 / 1024.0;
const M4: f64 = 35.0 * E3 / 3072.0;

/// Easting/northing in metres within `zone`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtmPosition {
    pub easting: f64,
    pub northing: f64,
    pub zone: UtmZone,
}

/// Longitude of the central meridian of a zone, in degrees.
#[inline]
pub fn central_longitude(zone_number: u8) -> f64 {
    (zone_number as f64 - 1.0) * 6.0 - 180.0 + 3.0
}

/// Standard zone for a position, including the Norway and Svalbard exceptions.
pub fn zone_number_for(lat_deg: f64, lon_deg: f64) -> u8 {
    if (56.0..64.0).contains(&lat_deg) && (3.0..12.0).contains(&lon_deg) {
        return 32;
    }

    if (72.0..=84.0).contains(&lat_deg) && lon_deg >= 0.0 {
        if lon_deg < 9.0 {
            return 31;
        } else if lon_deg < 21.0 {
            return 33;
        } else if lon_deg < 33.0 {
            return 35;
        } else if lon_deg < 42.0 {
            return 37;
        }
    }

    (((lon_deg + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u8
}

/// Project a geodetic position. `force_zone` overrides the standard zone so
/// that data near a zone boundary can stay in a single Cartesian frame.
pub fn geodetic_to_utm(lat_deg: f64, lon_deg: f64, force_zone: Option<u8>) -> Result<UtmPosition> {
    if !(-80.0..=84.0).contains(&lat_deg) || !(-180.0..=180.0).contains(&lon_deg) {
        return Err(ModelError::OutOfUtmRange(lat_deg, lon_deg));
    }

    let zone_number = force_zone.unwrap_or_else(|| zone_number_for(lat_deg, lon_deg));
    let zone = UtmZone::new(zone_number, lat_deg >= 0.0)?;

    let lat = lat_deg.to_radians();
    let (lat_sin, lat_cos) = lat.sin_cos();
    let lat_tan = lat_sin / lat_cos;
    let lat_tan2 = lat_tan * lat_tan;
    let lat_tan4 = lat_tan2 * lat_tan2;

    let n = wgs84::A / (1.0 - E * lat_sin * lat_sin).sqrt();
    let c = E_P2 * lat_cos * lat_cos;

    let mut dlon = (lon_deg - central_longitude(zone_number)).to_radians();
    // Keep the difference in [-pi, pi] for forced zones across the antimeridian.
    dlon = (dlon + std::f64::consts::PI).rem_euclid(std::f64::consts::TAU) - std::f64::consts::PI;

    let a = lat_cos * dlon;
    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a3 * a;
    let a5 = a4 * a;
    let a6 = a5 * a;

    let m = wgs84::A
        * (M1 * lat - M2 * (2.0 * lat).sin() + M3 * (4.0 * lat).sin() - M4 * (6.0 * lat).sin());

    let easting = K0
        * n
        * (a + a3 / 6.0 * (1.0 - lat_tan2 + c)
            + a5 / 120.0 * (5.0 - 18.0 * lat_tan2 + lat_tan4 + 72.0 * c - 58.0 * E_P2))
        + FALSE_EASTING;

    let mut northing = K0
        * (m + n
            * lat_tan
            * (a2 / 2.0
                + a4 / 24.0 * (5.0 - lat_tan2 + 9.0 * c + 4.0 * c * c)
                + a6 / 720.0 * (61.0 - 58.0 * lat_tan2 + lat_tan4 + 600.0 * c - 330.0 * E_P2)));

    if lat_deg < 0.0 {
        northing += FALSE_NORTHING_SOUTH;
    }

    Ok(UtmPosition {
        easting,
        northing,
        zone,
    })
}

/// Inverse projection; returns `(lat_deg, lon_deg)`.
pub fn utm_to_geodetic(easting: f64, northing: f64, zone: UtmZone) -> Result<(f64, f64)> {
    if !(100_000.0..1_000_000.0).contains(&easting) || !(0.0..=10_000_000.0).contains(&northing) {
        return Err(ModelError::OutOfUtmRange(easting, northing));
    }

    let sqrt_e = (1.0 - E).sqrt();
    let e1 = (1.0 - sqrt_e) / (1.0 + sqrt_e);
    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_3 * e1;
    let e1_5 = e1_4 * e1;

    let p2 = 3.0 / 2.0 * e1 - 27.0 / 32.0 * e1_3 + 269.0 / 512.0 * e1_5;
    let p3 = 21.0 / 16.0 * e1_2 - 55.0 / 32.0 * e1_4;
    let p4 = 151.0 / 96.0 * e1_3 - 417.0 / 128.0 * e1_5;
    let p5 = 1097.0 / 512.0 * e1_4;

    let x = easting - FALSE_EASTING;
    let y = if zone.is_northern() {
        northing
    } else {
        northing - FALSE_NORTHING_SOUTH
    };

    let m = y / K0;
    let mu = m / (wgs84::A * M1);

    let p_rad = mu
        + p2 * (2.0 * mu).sin()
        + p3 * (4.0 * mu).sin()
        + p4 * (6.0 * mu).sin()
        + p5 * (8.0 * mu).sin();

    let (p_sin, p_cos) = p_rad.sin_cos();
    let p_tan = p_sin / p_cos;
    let p_tan2 = p_tan * p_tan;
    let p_tan4 = p_tan2 * p_tan2;

    let ep_sin = 1.0 - E * p_sin * p_sin;
    let n = wgs84::A / ep_sin.sqrt();
    let r = (1.0 - E) / ep_sin;

    let c = E_P2 * p_cos * p_cos;
    let c2 = c * c;

    let d = x / (n * K0);
    let d2 = d * d;
    let d3 = d2 * d;
    let d4 = d3 * d;
    let d5 = d4 * d;
    let d6 = d5 * d;

    let lat = p_rad
        - (p_tan / r)
            * (d2 / 2.0 - d4 / 24.0 * (5.0 + 3.0 * p_tan2 + 10.0 * c - 4.0 * c2 - 9.0 * E_P2)
                + d6 / 720.0
                    * (61.0 + 90.0 * p_tan2 + 298.0 * c + 45.0 * p_tan4 - 252.0 * E_P2 - 3.0 * c2));

    let lon = (d - d3 / 6.0 * (1.0 + 2.0 * p_tan2 + c)
        + d5 / 120.0 * (5.0 - 2.0 * c + 28.0 * p_tan2 - 3.0 * c2 + 8.0 * E_P2 + 24.0 * p_tan4))
        / p_cos;

    Ok((
        lat.to_degrees(),
        lon.to_degrees() + central_longitude(zone.number()),
    ))
}
