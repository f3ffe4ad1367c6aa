//! Conversions between the geodetic and projected coordinate systems seen in
//! captured location data.
//!
//! Only the pairs in the conversion table are supported. Every other pair,
//! identical systems, or [`CoordinateSystem::Unknown`] fail immediately.

use std::f64::consts::PI;

/// Semi-major axis of the Krasovsky 1940 ellipsoid.
const AXIS: f64 = 6378245.0;
/// First eccentricity squared of the same ellipsoid.
const ECCENTRICITY: f64 = 0.006_693_421_622_965_943_23;
/// Half circumference used by the Web Mercator projection.
const MERCATOR_HALF: f64 = 20037508.34;

/// Coordinate system named by a rule's `Coordinate` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CoordinateSystem {
    Wgs84,
    Gcj02,
    Bd09,
    Mercator,
    MapBar,
    Sogou,
    #[default]
    Unknown,
}

impl CoordinateSystem {
    /// Parse a rule attribute value such as `GCJ02_COORDINATE`.
    pub fn from_attribute(value: &str) -> Self {
        match value {
            "WGS84_COORDINATE" => CoordinateSystem::Wgs84,
            "GCJ02_COORDINATE" => CoordinateSystem::Gcj02,
            "BD09_COORDINATE" => CoordinateSystem::Bd09,
            "MERCATOR_COORDINATE" => CoordinateSystem::Mercator,
            "MAPBAR_COORDINATE" => CoordinateSystem::MapBar,
            "SOUGOU_COORDINATE" => CoordinateSystem::Sogou,
            _ => CoordinateSystem::Unknown,
        }
    }
}

type Converter = fn(f64, f64) -> Option<(f64, f64)>;

/// The supported from/to table.
fn converter(from: CoordinateSystem, to: CoordinateSystem) -> Option<Converter> {
    use CoordinateSystem::*;
    let f: Converter = match (from, to) {
        (Wgs84, Gcj02) => wgs84_to_gcj02,
        (Wgs84, Bd09) => wgs84_to_bd09,
        (Wgs84, Mercator) => wgs84_to_mercator,
        (Gcj02, Wgs84) => gcj02_to_wgs84,
        (Gcj02, Bd09) => gcj02_to_bd09,
        (Bd09, Wgs84) => bd09_to_wgs84,
        (Bd09, Gcj02) => bd09_to_gcj02,
        (Mercator, Wgs84) => mercator_to_wgs84,
        (MapBar, Wgs84) => mapbar_to_wgs84,
        (MapBar, Bd09) => mapbar_to_bd09,
        (Sogou, Wgs84) => sogou_to_wgs84,
        _ => return None,
    };
    Some(f)
}

/// Convert a numeric lon/lat pair.
pub fn convert(
    from: CoordinateSystem,
    to: CoordinateSystem,
    lon: f64,
    lat: f64,
) -> Option<(f64, f64)> {
    if from == to || from == CoordinateSystem::Unknown || to == CoordinateSystem::Unknown {
        return None;
    }
    converter(from, to).and_then(|f| f(lon, lat))
}

/// Convert a lon/lat pair given as decimal strings. The result is formatted
/// with six decimals.
///
/// ```rust
/// use pie_extractor::matcher::coordinate::{convert_str, CoordinateSystem};
///
/// let (lon, lat) = convert_str(
///     CoordinateSystem::Gcj02,
///     CoordinateSystem::Bd09,
///     "116.397128",
///     "39.916527",
/// )
/// .unwrap();
/// assert!(lon.starts_with("116.40"));
/// assert!(lat.starts_with("39.92"));
/// ```
pub fn convert_str(
    from: CoordinateSystem,
    to: CoordinateSystem,
    lon: &str,
    lat: &str,
) -> Option<(String, String)> {
    let lon: f64 = lon.trim().parse().ok()?;
    let lat: f64 = lat.trim().parse().ok()?;
    let (x, y) = convert(from, to, lon, lat)?;
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    Some((format!("{x:.6}"), format!("{y:.6}")))
}

pub fn is_out_of_china(lon: f64, lat: f64) -> bool {
    !((73.33..=135.05).contains(&lon) && (3.51..=53.33).contains(&lat))
}

fn transform_lat(x: f64, y: f64) -> f64 {
    let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
    ret
}

fn transform_lng(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
    ret
}

/// Offset between WGS84 and GCJ02 at a point, as (d_lon, d_lat).
fn china_offset(lon: f64, lat: f64) -> (f64, f64) {
    let d_lat = transform_lat(lon - 105.0, lat - 35.0);
    let d_lng = transform_lng(lon - 105.0, lat - 35.0);
    let rad_lat = lat / 180.0 * PI;
    let magic = 1.0 - ECCENTRICITY * rad_lat.sin() * rad_lat.sin();
    let sqrt_magic = magic.sqrt();
    let d_lat = (d_lat * 180.0) / ((AXIS * (1.0 - ECCENTRICITY)) / (magic * sqrt_magic) * PI);
    let d_lng = (d_lng * 180.0) / (AXIS / sqrt_magic * rad_lat.cos() * PI);
    (d_lng, d_lat)
}

/// Refuses points outside mainland China.
fn wgs84_to_gcj02(lon: f64, lat: f64) -> Option<(f64, f64)> {
    if is_out_of_china(lon, lat) {
        return None;
    }
    let (d_lng, d_lat) = china_offset(lon, lat);
    Some((lon + d_lng, lat + d_lat))
}

/// Points outside mainland China pass through unchanged.
fn gcj02_to_wgs84(lon: f64, lat: f64) -> Option<(f64, f64)> {
    if is_out_of_china(lon, lat) {
        return Some((lon, lat));
    }
    let (d_lng, d_lat) = china_offset(lon, lat);
    Some((lon - d_lng, lat - d_lat))
}

fn gcj02_to_bd09(lon: f64, lat: f64) -> Option<(f64, f64)> {
    let z = (lon * lon + lat * lat).sqrt() + 0.00002 * (lat * PI).sin();
    let theta = lat.atan2(lon) + 0.000003 * (lon * PI).cos();
    Some((z * theta.cos() + 0.0065, z * theta.sin() + 0.006))
}

fn bd09_to_gcj02(lon: f64, lat: f64) -> Option<(f64, f64)> {
    let x = lon - 0.0065;
    let y = lat - 0.006;
    let z = (x * x + y * y).sqrt() - 0.00002 * (y * PI).sin();
    let theta = y.atan2(x) - 0.000003 * (x * PI).cos();
    Some((z * theta.cos(), z * theta.sin()))
}

fn wgs84_to_bd09(lon: f64, lat: f64) -> Option<(f64, f64)> {
    let (x, y) = wgs84_to_gcj02(lon, lat)?;
    gcj02_to_bd09(x, y)
}

fn bd09_to_wgs84(lon: f64, lat: f64) -> Option<(f64, f64)> {
    let (x, y) = bd09_to_gcj02(lon, lat)?;
    gcj02_to_wgs84(x, y)
}

fn wgs84_to_mercator(lon: f64, lat: f64) -> Option<(f64, f64)> {
    let x = lon * MERCATOR_HALF / 180.0;
    let y = ((90.0 + lat) * PI / 360.0).tan().ln() / (PI / 180.0);
    Some((x, y * MERCATOR_HALF / 180.0))
}

fn mercator_to_wgs84(x: f64, y: f64) -> Option<(f64, f64)> {
    let lon = x / MERCATOR_HALF * 180.0;
    let lat = y / MERCATOR_HALF * 180.0;
    let lat = 180.0 / PI * (2.0 * (lat * PI / 180.0).exp().atan() - PI / 2.0);
    Some((lon, lat))
}

/// Empirical MapBar correction, computed on integer units of 1e-5 degree.
fn mapbar_to_wgs84(lon: f64, lat: f64) -> Option<(f64, f64)> {
    let lng = ((lon * 100000.0).trunc() % 36_000_000.0).trunc();
    let lat = ((lat * 100000.0).trunc() % 36_000_000.0).trunc();

    let lng1 = (-((lat / 100000.0).cos() * (lng / 18000.0)
        + (lng / 100000.0).sin() * (lat / 9000.0))
        + lng)
        .trunc();
    let lat1 = (-((lat / 100000.0).sin() * (lng / 18000.0)
        + (lng / 100000.0).cos() * (lat / 9000.0))
        + lat)
        .trunc();
    let lng2 = (-((lat1 / 100000.0).cos() * (lng1 / 18000.0)
        + (lng1 / 100000.0).sin() * (lat1 / 9000.0))
        + lng
        + if lng > 0.0 { 1.0 } else { -1.0 })
    .trunc();
    let lat2 = (-((lat1 / 100000.0).sin() * (lng1 / 18000.0)
        + (lng1 / 100000.0).cos() * (lat1 / 9000.0))
        + lat
        + if lat > 0.0 { 1.0 } else { -1.0 })
    .trunc();

    Some((lng2 / 100000.0, lat2 / 100000.0))
}

fn mapbar_to_bd09(lon: f64, lat: f64) -> Option<(f64, f64)> {
    let (x, y) = mapbar_to_wgs84(lon, lat)?;
    wgs84_to_bd09(x, y)
}

/// Sogou Mercator band coefficients, one row per latitude band.
const SOGOU_BANDS: [[f64; 10]; 6] = [
    [
        1.410526172116255E-008,
        8.98305509648872E-006,
        -1.9939833816331,
        200.98243831067961,
        -187.2403703815547,
        91.608751666984304,
        -23.38765649603339,
        2.57121317296198,
        -0.03801003308653,
        17337981.199999999,
    ],
    [
        -7.435856389565537E-009,
        8.983055097726239E-006,
        -0.78625201886289,
        96.326875997598464,
        -1.85204757529826,
        -59.369359054858769,
        47.400335492967372,
        -16.50741931063887,
        2.28786674699375,
        10260144.859999999,
    ],
    [
        -3.030883460898826E-008,
        8.98305509983578E-006,
        0.30071316287616,
        59.742936184422767,
        7.357984074871,
        -25.383710026647449,
        13.45380521110908,
        -3.29883767235584,
        0.32710905363475,
        6856817.3700000001,
    ],
    [
        -1.981981304930552E-008,
        8.983055099779535E-006,
        0.03278182852591,
        40.316785277057441,
        0.65659298677277,
        -4.44255534477492,
        0.85341911805263,
        0.12923347998204,
        -0.04625736007561,
        4482777.0599999996,
    ],
    [
        3.09191371068437E-009,
        8.983055096812155E-006,
        6.995724061999999E-005,
        23.109343041449009,
        -0.00023663490511,
        -0.6321817810242,
        -0.00663494467273,
        0.03430082397953,
        -0.00466043876332,
        2555164.3999999999,
    ],
    [
        2.890871144776878E-009,
        8.983055095805407E-006,
        -3.068298E-008,
        7.47137025468032,
        -3.53937994E-006,
        -0.02145144861037,
        -1.234426596E-005,
        0.00010322952773,
        -3.23890364E-006,
        826088.5,
    ],
];

/// Lower latitude bound of each band in Mercator meters.
const SOGOU_BAND_EDGES: [f64; 6] = [
    12890594.86,
    8362377.87,
    5591021.0,
    3481989.83,
    1678043.12,
    0.0,
];

fn sogou_to_wgs84(x: f64, y: f64) -> Option<(f64, f64)> {
    let abs_x = x.abs();
    let abs_y = y.abs();
    let band = SOGOU_BAND_EDGES
        .iter()
        .position(|&edge| abs_y > edge)
        .map(|idx| &SOGOU_BANDS[idx])
        .unwrap_or(&SOGOU_BANDS[0]);

    let lon = band[0] + band[1] * abs_x;
    let d = abs_y / band[9];
    let lat = band[2]
        + band[3] * d
        + band[4] * d.powi(2)
        + band[5] * d.powi(3)
        + band[6] * d.powi(4)
        + band[7] * d.powi(5)
        + band[8] * d.powi(6);

    Some((lon.copysign(x), if y < 0.0 { -lat } else { lat }))
}
