//! Geohash and great-circle helpers

use std::collections::BTreeSet;

/// Precision of stored geohashes (~3.7 cm cells)
pub const GEOHASH_PRECISION: usize = 12;

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Upper bound on prefix scans issued for one bounding box
const MAX_COVER_CELLS: usize = 64;

/// Whether `lat`/`lon` are valid WGS84 coordinates
pub fn valid_coordinates(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Standard base32 geohash of a point
pub fn encode(lat: f64, lon: f64, precision: usize) -> String {
    let (mut lat_lo, mut lat_hi) = (-90.0f64, 90.0f64);
    let (mut lon_lo, mut lon_hi) = (-180.0f64, 180.0f64);
    let mut out = String::with_capacity(precision);
    let mut even = true;
    let mut bits = 0u8;
    let mut ch = 0usize;
    while out.len() < precision {
        if even {
            let mid = (lon_lo + lon_hi) / 2.0;
            if lon >= mid {
                ch = (ch << 1) | 1;
                lon_lo = mid;
            } else {
                ch <<= 1;
                lon_hi = mid;
            }
        } else {
            let mid = (lat_lo + lat_hi) / 2.0;
            if lat >= mid {
                ch = (ch << 1) | 1;
                lat_lo = mid;
            } else {
                ch <<= 1;
                lat_hi = mid;
            }
        }
        even = !even;
        bits += 1;
        if bits == 5 {
            out.push(BASE32[ch] as char);
            bits = 0;
            ch = 0;
        }
    }
    out
}

/// Center of a geohash cell; `None` on invalid characters
pub fn decode(hash: &str) -> Option<(f64, f64)> {
    let (mut lat_lo, mut lat_hi) = (-90.0f64, 90.0f64);
    let (mut lon_lo, mut lon_hi) = (-180.0f64, 180.0f64);
    let mut even = true;
    for c in hash.bytes() {
        let idx = BASE32.iter().position(|&b| b == c)?;
        for shift in (0..5).rev() {
            let bit = (idx >> shift) & 1 == 1;
            if even {
                let mid = (lon_lo + lon_hi) / 2.0;
                if bit {
                    lon_lo = mid;
                } else {
                    lon_hi = mid;
                }
            } else {
                let mid = (lat_lo + lat_hi) / 2.0;
                if bit {
                    lat_lo = mid;
                } else {
                    lat_hi = mid;
                }
            }
            even = !even;
        }
    }
    Some(((lat_lo + lat_hi) / 2.0, (lon_lo + lon_hi) / 2.0))
}

/// Cell height and width in degrees at `precision`
fn cell_size(precision: usize) -> (f64, f64) {
    let total_bits = precision * 5;
    let lon_bits = (total_bits + 1) / 2;
    let lat_bits = total_bits / 2;
    (180.0 / (1u64 << lat_bits) as f64, 360.0 / (1u64 << lon_bits) as f64)
}

/// Geohash prefixes whose cells together cover the box.
///
/// Picks the finest precision that needs at most a bounded number of cells.
pub fn covering_prefixes(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Vec<String> {
    let mut precision = 1;
    for p in (1..=8).rev() {
        let (h, w) = cell_size(p);
        let rows = ((max_lat - min_lat) / h).ceil() as usize + 1;
        let cols = ((max_lon - min_lon) / w).ceil() as usize + 1;
        if rows.saturating_mul(cols) <= MAX_COVER_CELLS {
            precision = p;
            break;
        }
    }
    let (h, w) = cell_size(precision);
    let mut cells = BTreeSet::new();
    let mut lat = min_lat;
    loop {
        let mut lon = min_lon;
        loop {
            cells.insert(encode(lat, lon, precision));
            if lon >= max_lon {
                break;
            }
            lon = (lon + w).min(max_lon);
        }
        if lat >= max_lat {
            break;
        }
        lat = (lat + h).min(max_lat);
    }
    cells.into_iter().collect()
}

/// Great-circle distance in kilometres
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = (lat2 - lat1).to_radians();
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Bounding boxes `(min_lat, max_lat, min_lon, max_lon)` that together
/// cover a circle.
///
/// The longitude half-width is the exact extent of a spherical cap,
/// `asin(sin(r) / cos(lat))`. A circle reaching a pole covers every
/// longitude. One crossing the antimeridian is split into two boxes.
pub fn radius_boxes(lat: f64, lon: f64, radius_km: f64) -> Vec<(f64, f64, f64, f64)> {
    // Slack for rounding, far below geohash precision
    const EPS: f64 = 1e-9;
    let angle = radius_km / EARTH_RADIUS_KM;
    let dlat = angle.to_degrees() + EPS;
    let (min_lat, max_lat) = ((lat - dlat).max(-90.0), (lat + dlat).min(90.0));
    if angle >= std::f64::consts::FRAC_PI_2 || min_lat <= -90.0 || max_lat >= 90.0 {
        return vec![(min_lat, max_lat, -180.0, 180.0)];
    }
    let ratio = angle.sin() / lat.to_radians().cos();
    if ratio >= 1.0 {
        return vec![(min_lat, max_lat, -180.0, 180.0)];
    }
    let dlon = ratio.asin().to_degrees() + EPS;
    let (west, east) = (lon - dlon, lon + dlon);
    if west < -180.0 {
        vec![(min_lat, max_lat, west + 360.0, 180.0), (min_lat, max_lat, -180.0, east)]
    } else if east > 180.0 {
        vec![(min_lat, max_lat, west, 180.0), (min_lat, max_lat, -180.0, east - 360.0)]
    } else {
        vec![(min_lat, max_lat, west, east)]
    }
}
