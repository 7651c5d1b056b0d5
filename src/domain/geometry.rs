// Geometry extents, bounding boxes and zoom requests
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dataset::Record;

pub const GEOGRAPHIC_CRS: &str = "EPSG:4326";
pub const DEFAULT_MAX_ZOOM: u8 = 6;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),
}

/// `[minx, miny, maxx, maxy]`. A box with `minx > maxx` wraps the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self {
            minx,
            miny,
            maxx,
            maxy,
        }
    }

    pub fn world() -> Self {
        Self::new(-180.0, -90.0, 180.0, 90.0)
    }

    pub fn is_wrapped(&self) -> bool {
        self.minx > self.maxx
    }

    /// Continuous box for view fitting: a wrapped box has its left edge
    /// moved one world-width west.
    pub fn unwrapped(&self) -> Self {
        if self.is_wrapped() {
            Self::new(self.minx - 360.0, self.miny, self.maxx, self.maxy)
        } else {
            *self
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.minx, self.miny, self.maxx, self.maxy]
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([minx, miny, maxx, maxy]: [f64; 4]) -> Self {
        Self::new(minx, miny, maxx, maxy)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(bbox: BoundingBox) -> Self {
        bbox.to_array()
    }
}

/// Where to pan/zoom: a single coordinate or an area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Extent {
    Point([f64; 2]),
    Bounds(BoundingBox),
}

/// Argument of the zoom-to hook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoomRequest {
    pub extent: Extent,
    pub fit_extent: Option<BoundingBox>,
    pub max_zoom: u8,
}

impl ZoomRequest {
    pub fn new(extent: Extent) -> Self {
        let fit_extent = match extent {
            Extent::Bounds(bbox) => Some(bbox.unwrapped()),
            Extent::Point(_) => None,
        };
        Self {
            extent,
            fit_extent,
            max_zoom: DEFAULT_MAX_ZOOM,
        }
    }
}

/// GeoJSON geometry, reduced to the shapes that have an extent here.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawGeometry")]
pub enum Geometry {
    Point([f64; 2]),
    Polygon(Vec<Vec<[f64; 2]>>),
    MultiPolygon(Vec<Vec<Vec<[f64; 2]>>>),
    Other(String),
}

#[derive(Deserialize)]
struct RawGeometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

impl TryFrom<RawGeometry> for Geometry {
    type Error = String;

    fn try_from(raw: RawGeometry) -> Result<Self, Self::Error> {
        let geometry = match raw.kind.as_str() {
            "Point" => {
                let position: Vec<f64> = parse_coordinates(raw.coordinates)?;
                Geometry::Point(to_pair(&position)?)
            }
            "Polygon" => {
                let rings: Vec<Vec<Vec<f64>>> = parse_coordinates(raw.coordinates)?;
                Geometry::Polygon(to_rings(&rings)?)
            }
            "MultiPolygon" => {
                let polygons: Vec<Vec<Vec<Vec<f64>>>> = parse_coordinates(raw.coordinates)?;
                let polygons = polygons
                    .iter()
                    .map(|rings| to_rings(rings))
                    .collect::<Result<Vec<_>, _>>()?;
                Geometry::MultiPolygon(polygons)
            }
            other => Geometry::Other(other.to_string()),
        };
        Ok(geometry)
    }
}

fn parse_coordinates<T: serde::de::DeserializeOwned>(coordinates: Value) -> Result<T, String> {
    serde_json::from_value(coordinates).map_err(|e| format!("invalid coordinates: {}", e))
}

fn to_pair(position: &[f64]) -> Result<[f64; 2], String> {
    match position {
        [x, y, ..] => Ok([*x, *y]),
        _ => Err(format!("position needs two ordinates, got {}", position.len())),
    }
}

fn to_rings(rings: &[Vec<Vec<f64>>]) -> Result<Vec<Vec<[f64; 2]>>, String> {
    rings
        .iter()
        .map(|ring| ring.iter().map(|p| to_pair(p)).collect::<Result<Vec<_>, _>>())
        .collect()
}

/// A GeoJSON feature as served by the vector layer endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: Record,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureCollection {
    #[serde(default)]
    pub features: Vec<Feature>,
}

/// Extent of a geometry: points yield themselves, (multi)polygons their
/// bounding box, anything else has no extent.
pub fn extent_of(geometry: &Geometry) -> Option<Extent> {
    match geometry {
        Geometry::Point(position) => Some(Extent::Point(*position)),
        Geometry::Polygon(rings) => {
            let points: Vec<[f64; 2]> = rings.iter().flatten().copied().collect();
            compute_bbox(&points).map(Extent::Bounds)
        }
        Geometry::MultiPolygon(polygons) => {
            let points: Vec<[f64; 2]> = polygons.iter().flatten().flatten().copied().collect();
            compute_bbox(&points).map(Extent::Bounds)
        }
        Geometry::Other(_) => None,
    }
}

fn compute_bbox(points: &[[f64; 2]]) -> Option<BoundingBox> {
    if points.is_empty() {
        return None;
    }
    let (miny, maxy) = min_max(points.iter().map(|p| p[1]));

    let left: Vec<f64> = points.iter().map(|p| p[0]).filter(|x| *x < 0.0).collect();
    let right: Vec<f64> = points.iter().map(|p| p[0]).filter(|x| *x >= 0.0).collect();
    if !left.is_empty() && !right.is_empty() {
        let (minx_left, maxx_left) = min_max(left.iter().copied());
        let (minx_right, maxx_right) = min_max(right.iter().copied());
        let center_left = minx_left + (maxx_left - minx_left) / 2.0;
        let center_right = minx_right + (maxx_right - minx_right) / 2.0;
        // Both halves hug the antimeridian: the shape wraps the date line.
        if center_right > 90.0 && center_left < -90.0 {
            return Some(BoundingBox::new(minx_right, miny, maxx_left, maxy));
        }
    }

    let (minx, maxx) = min_max(points.iter().map(|p| p[0]));
    Some(BoundingBox::new(minx, miny, maxx, maxy))
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
        (min.min(v), max.max(v))
    })
}

/// Parses a `bbox` location value. Four numbers are a plain box; eight
/// numbers are a box split at the date line and are joined back into one
/// wrapped box. Anything else means the whole world.
pub fn parse_bbox_string(value: &str) -> BoundingBox {
    let numbers: Result<Vec<f64>, _> = value.split(',').map(|v| v.trim().parse::<f64>()).collect();
    match numbers.as_deref() {
        Ok([minx, miny, maxx, maxy]) => BoundingBox::new(*minx, *miny, *maxx, *maxy),
        Ok([_, miny, maxx, maxy, minx, _, _, _]) => BoundingBox::new(*minx, *miny, *maxx, *maxy),
        _ => BoundingBox::world(),
    }
}

/// Reprojection collaborator used when formatting map extents.
pub trait ViewportProjection: Send + Sync {
    /// Normalises `bounds` to the projection's world, splitting it in two
    /// when it crosses the date line.
    fn viewport_extents(&self, bounds: &BoundingBox, crs: &str) -> Result<Vec<BoundingBox>, GeometryError>;

    fn reproject_bbox(&self, bbox: &BoundingBox, from: &str, to: &str) -> Result<BoundingBox, GeometryError>;
}

/// Formats `bounds` as geographic coordinates with four decimals, comma
/// joined; eight numbers come out when the viewport is split.
pub fn format_bbox_string(
    bounds: &BoundingBox,
    crs: &str,
    projection: &dyn ViewportProjection,
) -> Result<String, GeometryError> {
    let extents = projection.viewport_extents(bounds, crs)?;
    let extents = if crs == GEOGRAPHIC_CRS {
        extents
    } else {
        extents
            .iter()
            .map(|extent| projection.reproject_bbox(extent, crs, GEOGRAPHIC_CRS))
            .collect::<Result<Vec<_>, _>>()?
    };
    let values: Vec<String> = extents
        .iter()
        .flat_map(|extent| extent.to_array())
        .map(|value| format!("{:.4}", value))
        .collect();
    Ok(values.join(","))
}
