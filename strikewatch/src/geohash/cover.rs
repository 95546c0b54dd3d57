//! Geohash tile cover for a circular region.
//!
//! Converts a center point and radius into the smallest useful set of geohash
//! cells whose union overlaps the region. The cover decides which strike topics
//! get subscribed, so it trades resolution against subscription count: the
//! finest precision whose cover stays within [`MAX_COVER_CELLS`] wins.

use std::collections::BTreeSet;
use std::f64::consts::PI;

use super::{cell_bounds, encode, neighbors, GeohashError, MAX_PRECISION, MIN_PRECISION};

/// Maximum number of cells a cover may contain.
pub const MAX_COVER_CELLS: usize = 9;

/// Degrees of latitude per kilometre (40 000 km meridian circumference).
const LAT_DEGREES_PER_KM: f64 = 360.0 / 40_000.0;

/// Axis-aligned geographic box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Southern edge latitude
    pub south: f64,
    /// Western edge longitude
    pub west: f64,
    /// Northern edge latitude
    pub north: f64,
    /// Eastern edge longitude
    pub east: f64,
}

impl BoundingBox {
    /// Create a new bounding box.
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    /// Center point as (latitude, longitude).
    pub fn center(&self) -> (f64, f64) {
        ((self.south + self.north) / 2.0, (self.west + self.east) / 2.0)
    }

    /// Returns true if both boxes share interior area.
    ///
    /// Intervals are open: boxes that only touch along an edge do not overlap.
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        intervals_overlap(self.south, self.north, other.south, other.north)
            && intervals_overlap(self.west, self.east, other.west, other.east)
    }
}

fn intervals_overlap(a1: f64, a2: f64, b1: f64, b2: f64) -> bool {
    a1 < b2 && a2 > b1
}

/// Result of a cover computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeohashCover {
    /// Precision shared by every cell in the cover.
    pub precision: u8,
    /// Cells in lexical order.
    pub cells: BTreeSet<String>,
}

impl GeohashCover {
    /// Number of cells in the cover.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns true if the cover has no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Iterate over the cells.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(String::as_str)
    }
}

/// Approximates the circle around a point with a degree-space box.
///
/// Uses a fixed degrees-per-km ratio for latitude, widened by `1 / cos(lat)`
/// for longitude.
pub fn search_box(lat: f64, lon: f64, radius_km: f64) -> BoundingBox {
    let lat_delta = radius_km * LAT_DEGREES_PER_KM;
    let lon_delta = lat_delta / (lat * PI / 180.0).cos();
    BoundingBox::new(lat - lat_delta, lon - lon_delta, lat + lat_delta, lon + lon_delta)
}

/// Computes the geohash cover of a circular region.
///
/// Precisions are tried from coarsest to finest. At each level the center
/// cell is flood-filled through neighbours whose bounds overlap the search
/// box. The last level whose cover has at most [`MAX_COVER_CELLS`] cells is
/// returned; the search stops at the first level that exceeds the cap.
///
/// A zero or negative radius yields the center cell at [`MAX_PRECISION`].
///
/// # Arguments
///
/// * `lat` - Latitude of the center in degrees (-90.0 to 90.0)
/// * `lon` - Longitude of the center in degrees (-180.0 to 180.0)
/// * `radius_km` - Radius of the region in kilometres
pub fn coverage(lat: f64, lon: f64, radius_km: f64) -> Result<GeohashCover, GeohashError> {
    let bounds = search_box(lat, lon, radius_km);
    let mut best: Option<GeohashCover> = None;

    for precision in MIN_PRECISION..=MAX_PRECISION {
        match flood_fill(lat, lon, &bounds, precision, MAX_COVER_CELLS)? {
            Some(cells) => best = Some(GeohashCover { precision, cells }),
            None => break,
        }
    }

    match best {
        Some(cover) => Ok(cover),
        // Even the coarsest level exceeded the cap: fall back to its center cell
        None => Ok(GeohashCover {
            precision: MIN_PRECISION,
            cells: BTreeSet::from([encode(lat, lon, MIN_PRECISION)?]),
        }),
    }
}

/// Flood-fills cells at one precision.
///
/// Returns `None` as soon as more than `cap` cells have been visited.
fn flood_fill(
    lat: f64,
    lon: f64,
    bounds: &BoundingBox,
    precision: u8,
    cap: usize,
) -> Result<Option<BTreeSet<String>>, GeohashError> {
    let center = encode(lat, lon, precision)?;

    let mut visited = BTreeSet::from([center.clone()]);
    let mut stack = vec![center];

    while let Some(current) = stack.pop() {
        for neighbor in neighbors(&current)? {
            if visited.contains(&neighbor) {
                continue;
            }
            if !cell_bounds(&neighbor)?.overlaps(bounds) {
                continue;
            }
            visited.insert(neighbor.clone());
            if visited.len() > cap {
                return Ok(None);
            }
            stack.push(neighbor);
        }
    }

    Ok(Some(visited))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_overlap_is_open_interval() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let touching = BoundingBox::new(1.0, 0.0, 2.0, 1.0);
        let crossing = BoundingBox::new(0.5, 0.5, 2.0, 2.0);
        assert!(!a.overlaps(&touching));
        assert!(a.overlaps(&crossing));
        assert!(crossing.overlaps(&a));
    }

    #[test]
    fn test_search_box_widens_longitude_away_from_equator() {
        let equator = search_box(0.0, 0.0, 100.0);
        let north = search_box(60.0, 0.0, 100.0);
        assert!((equator.north - 0.9).abs() < 1e-9);
        assert!((equator.east - 0.9).abs() < 1e-9);
        assert!((north.east - 1.8).abs() < 1e-6, "cos(60°) halves the span");
    }

    #[test]
    fn test_cover_at_null_island() {
        // Four first-level quadrants meet at (0, 0)
        let cover = coverage(0.0, 0.0, 50.0).unwrap();
        assert_eq!(cover.precision, 3);
        assert_eq!(cover.cells, cells(&["7zz", "ebp", "kpb", "s00"]));
    }

    #[test]
    fn test_cover_warsaw_small_radius() {
        let cover = coverage(52.2, 21.0, 10.0).unwrap();
        assert_eq!(cover.precision, 4);
        assert_eq!(cover.cells, cells(&["u3qb", "u3qc", "u3r0", "u3r1"]));
    }

    #[test]
    fn test_cover_zero_radius_is_center_cell() {
        let cover = coverage(0.0, 0.0, 0.0).unwrap();
        assert_eq!(cover.precision, MAX_PRECISION);
        assert_eq!(cover.cells, cells(&["s00000000000"]));
    }

    #[test]
    fn test_cover_negative_radius_is_center_cell() {
        let cover = coverage(0.0, 0.0, -5.0).unwrap();
        assert_eq!(cover.len(), 1);
        assert!(cover.cells.contains(&encode(0.0, 0.0, cover.precision).unwrap()));
    }

    #[test]
    fn test_cover_keeps_previous_level_when_next_exceeds_cap() {
        let cover = coverage(40.0, -74.0, 25.0).unwrap();
        assert_eq!(cover.precision, 4);
        assert_eq!(cover.len(), 9);

        // The next level really is over the cap
        let bounds = search_box(40.0, -74.0, 25.0);
        let next = flood_fill(40.0, -74.0, &bounds, 5, MAX_COVER_CELLS).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn test_cover_rejects_invalid_center() {
        assert!(coverage(95.0, 0.0, 10.0).is_err());
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_cover_is_bounded_and_contains_center(
                lat in -80.0..80.0_f64,
                lon in -180.0..180.0_f64,
                radius in 0.0..500.0_f64
            ) {
                let cover = coverage(lat, lon, radius)?;
                prop_assert!(!cover.is_empty());
                prop_assert!(cover.len() <= MAX_COVER_CELLS);
                prop_assert!(cover.cells.contains(&encode(lat, lon, cover.precision)?));
                prop_assert!(cover.iter().all(|c| c.len() == cover.precision as usize));
            }

            #[test]
            fn test_cover_precision_is_largest_valid(
                lat in -80.0..80.0_f64,
                lon in -180.0..180.0_f64,
                radius in 0.1..500.0_f64
            ) {
                let cover = coverage(lat, lon, radius)?;
                if cover.precision < MAX_PRECISION {
                    let bounds = search_box(lat, lon, radius);
                    let next = flood_fill(lat, lon, &bounds, cover.precision + 1, MAX_COVER_CELLS)?;
                    prop_assert!(next.is_none(), "finer level {} also fits", cover.precision + 1);
                }
            }
        }
    }
}
