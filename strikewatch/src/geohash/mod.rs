//! Geohash cell encoding and geometry.
//!
//! Provides conversions between geographic coordinates (latitude/longitude)
//! and base32 geohash cells, the tile scheme used by the public strike feed to
//! partition its topics.
//!
//! A geohash of precision `p` names a rectangular cell; each additional
//! character subdivides the parent cell into 32 children, alternating
//! longitude and latitude bits (longitude first).

mod cover;

pub use cover::{coverage, search_box, BoundingBox, GeohashCover, MAX_COVER_CELLS};

use thiserror::Error;

/// Base32 alphabet used by geohash (no `a`, `i`, `l`, `o`).
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Coarsest supported precision.
pub const MIN_PRECISION: u8 = 1;

/// Finest supported precision.
pub const MAX_PRECISION: u8 = 12;

/// Errors from geohash conversions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeohashError {
    /// Latitude outside -90..=90.
    #[error("Invalid latitude: {0}")]
    InvalidLatitude(f64),

    /// Longitude outside -180..=180.
    #[error("Invalid longitude: {0}")]
    InvalidLongitude(f64),

    /// Precision outside 1..=12.
    #[error("Invalid precision: {0}")]
    InvalidPrecision(u8),

    /// Geohash string contains a character outside the base32 alphabet.
    #[error("Invalid geohash character '{0}'")]
    InvalidCharacter(char),
}

/// Encodes a coordinate into a geohash cell of the given precision.
///
/// # Arguments
///
/// * `lat` - Latitude in degrees (-90.0 to 90.0)
/// * `lon` - Longitude in degrees (-180.0 to 180.0)
/// * `precision` - Number of geohash characters (1 to 12)
#[inline]
pub fn encode(lat: f64, lon: f64, precision: u8) -> Result<String, GeohashError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(GeohashError::InvalidLatitude(lat));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(GeohashError::InvalidLongitude(lon));
    }
    if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
        return Err(GeohashError::InvalidPrecision(precision));
    }

    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lon_lo, mut lon_hi) = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision as usize);
    let mut even = true;

    for _ in 0..precision {
        let mut index = 0usize;
        for _ in 0..5 {
            index <<= 1;
            if even {
                let mid = (lon_lo + lon_hi) / 2.0;
                if lon >= mid {
                    index |= 1;
                    lon_lo = mid;
                } else {
                    lon_hi = mid;
                }
            } else {
                let mid = (lat_lo + lat_hi) / 2.0;
                if lat >= mid {
                    index |= 1;
                    lat_lo = mid;
                } else {
                    lat_hi = mid;
                }
            }
            even = !even;
        }
        hash.push(BASE32[index] as char);
    }

    Ok(hash)
}

/// Decodes a geohash into the bounding box of its cell.
pub fn cell_bounds(hash: &str) -> Result<BoundingBox, GeohashError> {
    let (mut south, mut north) = (-90.0_f64, 90.0_f64);
    let (mut west, mut east) = (-180.0_f64, 180.0_f64);
    let mut even = true;

    for c in hash.chars() {
        let index = base32_index(c)?;
        for bit in (0..5).rev() {
            let set = (index >> bit) & 1 == 1;
            if even {
                let mid = (west + east) / 2.0;
                if set {
                    west = mid;
                } else {
                    east = mid;
                }
            } else {
                let mid = (south + north) / 2.0;
                if set {
                    south = mid;
                } else {
                    north = mid;
                }
            }
            even = !even;
        }
    }

    Ok(BoundingBox::new(south, west, north, east))
}

/// Returns the cells adjacent to `hash` at the same precision.
///
/// Up to eight neighbours are returned. Cells beyond the poles do not exist,
/// so polar cells have fewer neighbours; longitude wraps at the antimeridian.
pub fn neighbors(hash: &str) -> Result<Vec<String>, GeohashError> {
    let precision = hash.len() as u8;
    let bounds = cell_bounds(hash)?;
    let (center_lat, center_lon) = bounds.center();
    let height = bounds.north - bounds.south;
    let width = bounds.east - bounds.west;

    let mut result = Vec::with_capacity(8);
    for d_lat in [-1.0, 0.0, 1.0] {
        for d_lon in [-1.0, 0.0, 1.0] {
            if d_lat == 0.0 && d_lon == 0.0 {
                continue;
            }

            let lat = center_lat + d_lat * height;
            if !(-90.0..=90.0).contains(&lat) {
                continue;
            }
            let lon = wrap_longitude(center_lon + d_lon * width);

            let neighbor = encode(lat, lon, precision)?;
            if neighbor != hash && !result.contains(&neighbor) {
                result.push(neighbor);
            }
        }
    }

    Ok(result)
}

fn base32_index(c: char) -> Result<usize, GeohashError> {
    BASE32
        .iter()
        .position(|&b| b as char == c)
        .ok_or(GeohashError::InvalidCharacter(c))
}

fn wrap_longitude(lon: f64) -> f64 {
    if lon >= 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}
