// Viewport normalisation and reprojection between geographic and web mercator
use std::f64::consts::PI;

use crate::domain::geometry::{BoundingBox, GeometryError, ViewportProjection, GEOGRAPHIC_CRS};

pub const WEB_MERCATOR_CRS: &str = "EPSG:3857";

const EARTH_RADIUS: f64 = 6378137.0;
const MERCATOR_HALF_WORLD: f64 = PI * EARTH_RADIUS;
const MERCATOR_MAX_LATITUDE: f64 = 85.0511287798066;

/// Supports `EPSG:4326` and `EPSG:3857`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercatorProjection;

fn half_world(crs: &str) -> Result<f64, GeometryError> {
    match crs {
        GEOGRAPHIC_CRS => Ok(180.0),
        WEB_MERCATOR_CRS => Ok(MERCATOR_HALF_WORLD),
        other => Err(GeometryError::UnsupportedCrs(other.to_string())),
    }
}

fn to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MERCATOR_MAX_LATITUDE, MERCATOR_MAX_LATITUDE);
    let x = lon * MERCATOR_HALF_WORLD / 180.0;
    let y = ((90.0 + lat) * PI / 360.0).tan().ln() * EARTH_RADIUS;
    (x, y)
}

fn to_geographic(x: f64, y: f64) -> (f64, f64) {
    let lon = x / MERCATOR_HALF_WORLD * 180.0;
    let lat = (y / EARTH_RADIUS).exp().atan() * 360.0 / PI - 90.0;
    (lon, lat)
}

impl ViewportProjection for WebMercatorProjection {
    fn viewport_extents(&self, bounds: &BoundingBox, crs: &str) -> Result<Vec<BoundingBox>, GeometryError> {
        let half = half_world(crs)?;
        let world = half * 2.0;
        let width = bounds.maxx - bounds.minx;
        if width >= world {
            return Ok(vec![BoundingBox::new(-half, bounds.miny, half, bounds.maxy)]);
        }

        let minx = (bounds.minx + half).rem_euclid(world) - half;
        let maxx = minx + width;
        if maxx <= half {
            return Ok(vec![BoundingBox::new(minx, bounds.miny, maxx, bounds.maxy)]);
        }
        Ok(vec![
            BoundingBox::new(-half, bounds.miny, maxx - world, bounds.maxy),
            BoundingBox::new(minx, bounds.miny, half, bounds.maxy),
        ])
    }

    fn reproject_bbox(&self, bbox: &BoundingBox, from: &str, to: &str) -> Result<BoundingBox, GeometryError> {
        half_world(from)?;
        half_world(to)?;
        if from == to {
            return Ok(*bbox);
        }
        let convert: fn(f64, f64) -> (f64, f64) = if from == GEOGRAPHIC_CRS { to_mercator } else { to_geographic };
        let (minx, miny) = convert(bbox.minx, bbox.miny);
        let (maxx, maxy) = convert(bbox.maxx, bbox.maxy);
        Ok(BoundingBox::new(minx, miny, maxx, maxy))
    }
}
