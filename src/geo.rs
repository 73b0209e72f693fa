//! Planar-approximated polygon area and the coordinate encodings used on the wire.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// One rai is 1600 m².
pub const SQ_METERS_PER_RAI: f64 = 1600.0;

/// A WGS84 position in decimal degrees.
///
/// Serialized as a `[lat, lng]` pair, which is the shape the field app keeps
/// in local storage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// `[lng, lat]`, the axis order GeoJSON and PostGIS expect.
    pub fn to_lng_lat(self) -> [f64; 2] {
        [self.lng, self.lat]
    }

    pub fn from_lng_lat(pair: [f64; 2]) -> Self {
        Self {
            lat: pair[1],
            lng: pair[0],
        }
    }
}

impl From<(f64, f64)> for Coordinate {
    fn from((lat, lng): (f64, f64)) -> Self {
        Self { lat, lng }
    }
}

impl From<Coordinate> for (f64, f64) {
    fn from(c: Coordinate) -> Self {
        (c.lat, c.lng)
    }
}

/// Area of a geodetic polygon in square meters.
///
/// Spherical-excess approximation: each edge contributes its longitude span
/// weighted by the sines of its endpoint latitudes, scaled by R²/2. The ring
/// is closed implicitly. Fewer than three points yields 0, and the result is
/// independent of winding direction.
pub fn area_sq_meters(points: &[Coordinate]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }

    let mut sum = 0.0;
    for (i, p1) in points.iter().enumerate() {
        let p2 = &points[(i + 1) % points.len()];
        let lat1 = p1.lat.to_radians();
        let lat2 = p2.lat.to_radians();
        let lng1 = p1.lng.to_radians();
        let lng2 = p2.lng.to_radians();
        sum += (lng2 - lng1) * (2.0 + lat1.sin() + lat2.sin());
    }

    (sum * EARTH_RADIUS_METERS * EARTH_RADIUS_METERS / 2.0).abs()
}

pub fn sq_meters_to_rai(area_sq_meters: f64) -> f64 {
    area_sq_meters / SQ_METERS_PER_RAI
}

/// Formats a coordinate as WKT, longitude first.
pub fn format_point(coordinate: Coordinate) -> String {
    format!("POINT({} {})", coordinate.lng, coordinate.lat)
}

/// Parses `POINT(lng lat)`, optionally prefixed with `SRID=4326;`.
pub fn parse_point(wkt: &str) -> Option<Coordinate> {
    let wkt = match wkt.split_once(';') {
        Some((srid, rest)) if srid.trim_start().starts_with("SRID=") => rest,
        _ => wkt,
    };
    let coords = wkt
        .trim()
        .strip_prefix("POINT")
        .map(str::trim_start)
        .and_then(|s| s.strip_prefix('('))
        .and_then(|s| s.strip_suffix(')'))?;
    let parts: Vec<&str> = coords.split_whitespace().collect();
    if parts.len() != 2 {
        return None;
    }
    match (parts[0].parse::<f64>(), parts[1].parse::<f64>()) {
        (Ok(lng), Ok(lat)) => Some(Coordinate { lat, lng }),
        _ => None,
    }
}

/// Builds a closed `[lng, lat]` ring: the first vertex is repeated at the end.
pub fn to_closed_ring(points: &[Coordinate]) -> Vec<[f64; 2]> {
    let mut ring: Vec<[f64; 2]> = points.iter().map(|p| p.to_lng_lat()).collect();
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
        if ring.len() > 1 && first != last {
            ring.push(first);
        }
    }
    ring
}

/// Inverse of [`to_closed_ring`]; drops the closing vertex if present.
pub fn from_ring(ring: &[[f64; 2]]) -> Vec<Coordinate> {
    let mut points: Vec<Coordinate> = ring.iter().copied().map(Coordinate::from_lng_lat).collect();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

/// Great-circle distance in kilometers.
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(lat: f64, lng: f64, side_deg: f64) -> Vec<Coordinate> {
        vec![
            Coordinate::new(lat, lng),
            Coordinate::new(lat, lng + side_deg),
            Coordinate::new(lat + side_deg, lng + side_deg),
            Coordinate::new(lat + side_deg, lng),
        ]
    }

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn test_fewer_than_three_points_is_zero() {
        assert_eq!(area_sq_meters(&[]), 0.0);
        assert_eq!(area_sq_meters(&[Coordinate::new(14.0, 100.0)]), 0.0);
        assert_eq!(
            area_sq_meters(&[Coordinate::new(14.0, 100.0), Coordinate::new(14.1, 100.1)]),
            0.0
        );
    }

    #[test]
    fn test_identical_points_are_zero() {
        let p = Coordinate::new(14.5, 100.5);
        assert_eq!(area_sq_meters(&[p, p, p, p]), 0.0);
    }

    #[test]
    fn test_collinear_points_are_zero() {
        let along_parallel = vec![
            Coordinate::new(14.0, 100.0),
            Coordinate::new(14.0, 100.001),
            Coordinate::new(14.0, 100.002),
        ];
        let along_meridian = vec![
            Coordinate::new(14.0, 100.0),
            Coordinate::new(14.001, 100.0),
            Coordinate::new(14.002, 100.0),
        ];
        assert!(area_sq_meters(&along_parallel) < 1e-6);
        assert!(area_sq_meters(&along_meridian) < 1e-6);

        let diagonal = vec![
            Coordinate::new(14.0, 100.0),
            Coordinate::new(14.0001, 100.0001),
            Coordinate::new(14.0002, 100.0002),
        ];
        let area = area_sq_meters(&diagonal);
        assert!(area >= 0.0);
        assert!(area < 0.01, "diagonal collinear area was {area}");
    }

    #[test]
    fn test_winding_and_rotation_invariance() {
        let points = vec![
            Coordinate::new(14.00, 100.00),
            Coordinate::new(14.00, 100.01),
            Coordinate::new(14.02, 100.015),
            Coordinate::new(14.01, 99.995),
        ];
        let base = area_sq_meters(&points);
        assert!(base > 0.0);

        let mut reversed = points.clone();
        reversed.reverse();
        assert!(approx_eq(base, area_sq_meters(&reversed)));

        for shift in 1..points.len() {
            let mut rotated = points.clone();
            rotated.rotate_left(shift);
            assert!(approx_eq(base, area_sq_meters(&rotated)));
        }
    }

    #[test]
    fn test_small_square_matches_flat_earth() {
        for lat in [0.0, 14.0, 45.0] {
            let side: f64 = 0.001;
            let side_m = side.to_radians() * EARTH_RADIUS_METERS;
            let flat = side_m * side_m * (lat + side / 2.0_f64).to_radians().cos();
            let area = area_sq_meters(&square(lat, 100.0, side));
            let rel = (area - flat).abs() / flat;
            assert!(rel < 0.01, "lat {lat}: {area} vs {flat}");
        }
    }

    #[test]
    fn test_rai_conversion() {
        assert_eq!(sq_meters_to_rai(3200.0), 2.0);
        assert_eq!(sq_meters_to_rai(0.0), 0.0);
    }

    #[test]
    fn test_point_wkt() {
        let c = Coordinate::new(13.75, 100.5);
        assert_eq!(format_point(c), "POINT(100.5 13.75)");
        assert_eq!(parse_point("POINT(100.5 13.75)"), Some(c));
        assert_eq!(parse_point("SRID=4326;POINT(100.5 13.75)"), Some(c));
        assert_eq!(parse_point("POINT (100.5 13.75)"), Some(c));
        assert_eq!(parse_point("POINT(100.5)"), None);
        assert_eq!(parse_point("LINESTRING(0 0, 1 1)"), None);
    }

    #[test]
    fn test_ring_is_closed_and_lng_first() {
        let points = square(14.0, 100.0, 0.01);
        let ring = to_closed_ring(&points);
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], [100.0, 14.0]);
        assert_eq!(ring.first(), ring.last());
        assert_eq!(from_ring(&ring), points);
    }

    #[test]
    fn test_haversine() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 1.0);
        assert!((haversine_km(a, b) - 111.19).abs() < 0.1);
    }
}
