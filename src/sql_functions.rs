use crate::error::{GeoflowError, Result};
use crate::geometry::{Extent, Geometry, bounds_of, gpkg_blob_srid, gpkg_blob_wkb};
use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, LineStringTrait, MultiLineStringTrait,
    MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait,
};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, Error};
use wkb::reader::Wkb;

/// Register all spatial SQL helper functions in the provided connection.
///
/// This is the function surface the crate's query rewrites depend on:
/// envelope components for extent computation and the R*Tree triggers,
/// `ST_SRID` for metadata access and `ST_Transform` for reprojection.
pub fn register_spatial_functions(conn: &Connection) -> Result<()> {
    register_st_minx(conn)?;
    register_st_miny(conn)?;
    register_st_maxx(conn)?;
    register_st_maxy(conn)?;
    register_st_isempty(conn)?;
    register_st_srid(conn)?;
    register_st_transform(conn)?;
    Ok(())
}

pub(crate) fn register_st_minx(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MinX", |b| b.min_x)
}

pub(crate) fn register_st_miny(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MinY", |b| b.min_y)
}

pub(crate) fn register_st_maxx(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MaxX", |b| b.max_x)
}

pub(crate) fn register_st_maxy(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MaxY", |b| b.max_y)
}

pub(crate) fn register_st_isempty(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_IsEmpty",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let wkb = match wkb_from_ctx(ctx)? {
                Some(wkb) => wkb,
                None => return Ok(None),
            };
            let is_empty = bounds_of(&wkb).is_none();
            Ok(Some(i64::from(is_empty)))
        },
    )?;
    Ok(())
}

pub(crate) fn register_st_srid(conn: &Connection) -> Result<()> {
    conn.create_scalar_function("ST_SRID", 1, FunctionFlags::SQLITE_DETERMINISTIC, |ctx| {
        match ctx.get_raw(0) {
            ValueRef::Null => Ok(None),
            ValueRef::Blob(blob) => {
                let srid = gpkg_blob_srid(blob)
                    .map_err(|err| Error::UserFunctionError(Box::new(err)))?;
                Ok(Some(i64::from(srid)))
            }
            _ => Err(Error::InvalidFunctionParameterType(0, Type::Blob)),
        }
    })?;
    Ok(())
}

pub(crate) fn register_st_transform(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_Transform",
        2,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let blob = match ctx.get_raw(0) {
                ValueRef::Null => return Ok(None),
                ValueRef::Blob(blob) => blob,
                _ => return Err(Error::InvalidFunctionParameterType(0, Type::Blob)),
            };
            let target: i64 = ctx.get(1)?;
            let target = u32::try_from(target)
                .map_err(|_| Error::InvalidFunctionParameterType(1, Type::Integer))?;

            transform_blob(blob, target).map_err(|err| Error::UserFunctionError(Box::new(err)))
        },
    )?;
    Ok(())
}

fn register_bounds_component<F>(conn: &Connection, name: &str, f: F) -> Result<()>
where
    F: Fn(Extent) -> f64 + Copy + Send + Sync + 'static,
{
    conn.create_scalar_function(name, 1, FunctionFlags::SQLITE_DETERMINISTIC, move |ctx| {
        let wkb = match wkb_from_ctx(ctx)? {
            Some(wkb) => wkb,
            None => return Ok(None),
        };
        Ok(bounds_of(&wkb).map(f))
    })?;
    Ok(())
}

fn wkb_from_ctx<'a>(ctx: &'a Context<'a>) -> std::result::Result<Option<Wkb<'a>>, Error> {
    let value = ctx.get_raw(0);
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(blob) => {
            let wkb = gpkg_blob_wkb(blob).map_err(|err| Error::UserFunctionError(Box::new(err)))?;
            Ok(Some(wkb))
        }
        _ => Err(Error::InvalidFunctionParameterType(0, Type::Blob)),
    }
}

fn transform_blob(blob: &[u8], target: u32) -> Result<Option<Vec<u8>>> {
    let source = gpkg_blob_srid(blob)?;
    if source == target {
        return Ok(Some(blob.to_vec()));
    }

    let map: fn(f64, f64) -> (f64, f64) = match (source, target) {
        (4326, 3857) => wgs84_to_mercator,
        (3857, 4326) => mercator_to_wgs84,
        (from, to) => return Err(GeoflowError::UnsupportedTransform { from, to }),
    };

    let wkb = gpkg_blob_wkb(blob)?;
    let transformed = map_geometry_coords(&wkb, map)?;
    let geom = Geometry::from_geo(&transformed, target)?;
    Ok(Some(geom.into_bytes()))
}

const EARTH_RADIUS: f64 = 6_378_137.0;

// Closed-form spherical Mercator, the only pair the crate converts itself.
fn wgs84_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

fn mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

/// Rebuild a geometry with every XY coordinate passed through `map`.
/// Z and M ordinates are not carried; only XY geometries can be
/// transformed.
fn map_geometry_coords<G>(geom: &G, map: fn(f64, f64) -> (f64, f64)) -> Result<geo_types::Geometry<f64>>
where
    G: GeometryTrait<T = f64>,
{
    use geo_traits::Dimensions;
    use geo_traits::GeometryType as GeoType;

    if !matches!(geom.dim(), Dimensions::Xy | Dimensions::Unknown(2)) {
        return Err(GeoflowError::UnsupportedGeometryType(
            "transform of geometries with Z or M ordinates".to_string(),
        ));
    }

    let mapped = match geom.as_type() {
        GeoType::Point(point) => {
            let coord = point.coord().ok_or_else(|| {
                GeoflowError::UnsupportedGeometryType("transform of an empty point".to_string())
            })?;
            let (x, y) = map(coord.x_y().0, coord.x_y().1);
            geo_types::Geometry::Point(geo_types::Point::new(x, y))
        }
        GeoType::LineString(line) => {
            geo_types::Geometry::LineString(map_line_string(line, map))
        }
        GeoType::Polygon(poly) => geo_types::Geometry::Polygon(map_polygon(poly, map)),
        GeoType::MultiPoint(multi) => {
            let mut points = Vec::with_capacity(multi.num_points());
            for point in multi.points() {
                if let Some(coord) = point.coord() {
                    let (cx, cy) = coord.x_y();
                    let (x, y) = map(cx, cy);
                    points.push(geo_types::Point::new(x, y));
                }
            }
            geo_types::Geometry::MultiPoint(geo_types::MultiPoint::new(points))
        }
        GeoType::MultiLineString(multi) => {
            let lines = multi
                .line_strings()
                .map(|line| map_line_string(&line, map))
                .collect();
            geo_types::Geometry::MultiLineString(geo_types::MultiLineString::new(lines))
        }
        GeoType::MultiPolygon(multi) => {
            let polygons = multi
                .polygons()
                .map(|poly| map_polygon(&poly, map))
                .collect();
            geo_types::Geometry::MultiPolygon(geo_types::MultiPolygon::new(polygons))
        }
        GeoType::GeometryCollection(collection) => {
            let mut members = Vec::with_capacity(collection.num_geometries());
            for sub_geom in collection.geometries() {
                members.push(map_geometry_coords(&sub_geom, map)?);
            }
            geo_types::Geometry::GeometryCollection(geo_types::GeometryCollection::from(members))
        }
        GeoType::Rect(_) | GeoType::Triangle(_) | GeoType::Line(_) => {
            // No GeoPackage geometry types should reach here.
            unreachable!()
        }
    };

    Ok(mapped)
}

fn map_line_string<L>(line: &L, map: fn(f64, f64) -> (f64, f64)) -> geo_types::LineString<f64>
where
    L: LineStringTrait<T = f64>,
{
    let coords = line
        .coords()
        .map(|coord| {
            let (cx, cy) = coord.x_y();
            let (x, y) = map(cx, cy);
            geo_types::Coord { x, y }
        })
        .collect();
    geo_types::LineString::new(coords)
}

fn map_polygon<P>(poly: &P, map: fn(f64, f64) -> (f64, f64)) -> geo_types::Polygon<f64>
where
    P: PolygonTrait<T = f64>,
{
    let exterior = match poly.exterior() {
        Some(ring) => map_line_string(&ring, map),
        None => geo_types::LineString::new(Vec::new()),
    };
    let interiors = poly
        .interiors()
        .map(|ring| map_line_string(&ring, map))
        .collect();
    geo_types::Polygon::new(exterior, interiors)
}

#[cfg(test)]
mod tests {
    use super::{mercator_to_wgs84, register_spatial_functions, wgs84_to_mercator};
    use crate::Result;
    use crate::geometry::Geometry;
    use geo_types::{LineString, Point};
    use rusqlite::{Connection, params};

    fn blob_from_geometry<G: geo_traits::GeometryTrait<T = f64>>(
        geometry: &G,
        srid: u32,
    ) -> Result<Vec<u8>> {
        Ok(Geometry::from_geo(geometry, srid)?.into_bytes())
    }

    #[test]
    fn st_bounds_for_point() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let point = Point::new(1.5, -2.0);
        let blob = blob_from_geometry(&point, 4326)?;

        let (minx, maxx, miny, maxy, empty): (f64, f64, f64, f64, i64) = conn.query_row(
            "SELECT ST_MinX(?1), ST_MaxX(?1), ST_MinY(?1), ST_MaxY(?1), ST_IsEmpty(?1)",
            params![blob],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )?;

        assert_eq!(minx, 1.5);
        assert_eq!(maxx, 1.5);
        assert_eq!(miny, -2.0);
        assert_eq!(maxy, -2.0);
        assert_eq!(empty, 0);
        Ok(())
    }

    #[test]
    fn st_is_empty_for_empty_linestring() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let line: LineString<f64> = LineString::new(Vec::new());
        let blob = blob_from_geometry(&line, 4326)?;

        let (minx, empty): (Option<f64>, i64) =
            conn.query_row("SELECT ST_MinX(?1), ST_IsEmpty(?1)", params![blob], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;

        assert!(minx.is_none());
        assert_eq!(empty, 1);
        Ok(())
    }

    #[test]
    fn st_srid_reads_header() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let blob = blob_from_geometry(&Point::new(0.0, 0.0), 3857)?;
        let srid: i64 = conn.query_row("SELECT ST_SRID(?1)", params![blob], |row| row.get(0))?;
        assert_eq!(srid, 3857);
        Ok(())
    }

    #[test]
    fn st_transform_same_srid_is_identity() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let blob = blob_from_geometry(&Point::new(2.0, 48.0), 4326)?;
        let out: Vec<u8> = conn.query_row(
            "SELECT ST_Transform(?1, 4326)",
            params![blob],
            |row| row.get(0),
        )?;
        assert_eq!(out, blob);
        Ok(())
    }

    #[test]
    fn st_transform_wgs84_to_mercator_and_back() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let blob = blob_from_geometry(&Point::new(2.0, 48.0), 4326)?;
        let (srid, out): (i64, Vec<u8>) = conn.query_row(
            "SELECT ST_SRID(ST_Transform(?1, 3857)), ST_Transform(ST_Transform(?1, 3857), 4326)",
            params![blob],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(srid, 3857);

        let roundtrip = Geometry::from_gpkg_blob(out)?;
        let bounds = roundtrip.bounds()?.expect("point bounds");
        assert!((bounds.min_x - 2.0).abs() < 1e-9);
        assert!((bounds.min_y - 48.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn st_transform_rejects_unknown_pair() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;

        let blob = blob_from_geometry(&Point::new(0.0, 0.0), 4326)?;
        let result: rusqlite::Result<Vec<u8>> = conn.query_row(
            "SELECT ST_Transform(?1, 2154)",
            params![blob],
            |row| row.get(0),
        );
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn mercator_formulas_roundtrip() {
        let (x, y) = wgs84_to_mercator(2.35, 48.85);
        let (lon, lat) = mercator_to_wgs84(x, y);
        assert!((lon - 2.35).abs() < 1e-9);
        assert!((lat - 48.85).abs() < 1e-9);
    }

    #[test]
    fn mercator_origin_is_zero() {
        let (x, y) = wgs84_to_mercator(0.0, 0.0);
        assert!(x.abs() < 1e-9);
        assert!(y.abs() < 1e-9);
    }
}
