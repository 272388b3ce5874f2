use crate::error::{GeoflowError, Result};
use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, LineStringTrait, MultiLineStringTrait,
    MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait,
};
use wkb::reader::Wkb;

/// Bounding box of one or more geometries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub(crate) fn merge(&mut self, other: Extent) {
        self.min_x = self.min_x.min(other.min_x);
        self.max_x = self.max_x.max(other.max_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_y = self.max_y.max(other.max_y);
    }
}

// cf. https://www.geopackage.org/spec140/index.html#gpb_format
const HEADER_LEN: usize = 8;
const MAGIC: [u8; 2] = [0x47, 0x50];

/// Owned geometry value as stored in the database: a GeoPackage blob
/// carrying an SRID header in front of the WKB body.
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    data: Vec<u8>,
}

impl Geometry {
    /// Wrap a raw GeoPackage blob, validating the fixed header.
    pub fn from_gpkg_blob(data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(GeoflowError::InvalidGeometryLength {
                len: data.len(),
                minimum: HEADER_LEN,
            });
        }
        if data[0..2] != MAGIC {
            return Err(GeoflowError::InvalidGeometryFlags(data[0]));
        }
        // Reject invalid envelope codes up front so accessors stay simple.
        envelope_size(data[3])?;
        Ok(Self { data })
    }

    /// Encode any geo-traits geometry as a GeoPackage blob with the given SRID.
    pub fn from_geo<G>(geometry: &G, srid: u32) -> Result<Self>
    where
        G: GeometryTrait<T = f64>,
    {
        let mut wkb_buf = Vec::new();
        wkb::writer::write_geometry(&mut wkb_buf, geometry, &Default::default())?;

        let mut data = Vec::with_capacity(wkb_buf.len() + HEADER_LEN);
        data.extend_from_slice(&[
            MAGIC[0], MAGIC[1],
            0x00u8, // version
            0x01u8, // flags (little endian SRS ID, no envelope)
        ]);
        data.extend_from_slice(&srid.to_le_bytes());
        data.extend_from_slice(&wkb_buf);

        Ok(Self { data })
    }

    /// The SRID recorded in the blob header.
    pub fn srid(&self) -> u32 {
        let bytes: [u8; 4] = self.data[4..8].try_into().expect("validated header");
        if self.data[3] & 0b0000_0001 == 1 {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        }
    }

    /// Borrow the WKB body, skipping header and envelope.
    pub fn wkb(&self) -> Result<Wkb<'_>> {
        let offset = HEADER_LEN + envelope_size(self.data[3])?;
        if self.data.len() < offset {
            return Err(GeoflowError::InvalidGeometryLength {
                len: self.data.len(),
                minimum: offset,
            });
        }
        Ok(Wkb::try_new(&self.data[offset..])?)
    }

    pub fn geometry_type(&self) -> Result<wkb::reader::GeometryType> {
        Ok(self.wkb()?.geometry_type())
    }

    pub fn dimension(&self) -> Result<wkb::reader::Dimension> {
        Ok(self.wkb()?.dimension())
    }

    /// Envelope computed from the WKB body; `None` for an empty geometry.
    pub fn bounds(&self) -> Result<Option<Extent>> {
        Ok(bounds_of(&self.wkb()?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Borrow the WKB body out of a raw GeoPackage blob without copying.
pub(crate) fn gpkg_blob_wkb(blob: &[u8]) -> Result<Wkb<'_>> {
    if blob.len() < HEADER_LEN {
        return Err(GeoflowError::InvalidGeometryLength {
            len: blob.len(),
            minimum: HEADER_LEN,
        });
    }
    let offset = HEADER_LEN + envelope_size(blob[3])?;
    if blob.len() < offset {
        return Err(GeoflowError::InvalidGeometryLength {
            len: blob.len(),
            minimum: offset,
        });
    }
    Ok(Wkb::try_new(&blob[offset..])?)
}

pub(crate) fn gpkg_blob_srid(blob: &[u8]) -> Result<u32> {
    if blob.len() < HEADER_LEN {
        return Err(GeoflowError::InvalidGeometryLength {
            len: blob.len(),
            minimum: HEADER_LEN,
        });
    }
    let bytes: [u8; 4] = blob[4..8].try_into().expect("length checked");
    if blob[3] & 0b0000_0001 == 1 {
        Ok(u32::from_le_bytes(bytes))
    } else {
        Ok(u32::from_be_bytes(bytes))
    }
}

fn envelope_size(flags: u8) -> Result<usize> {
    match flags & 0b00001110 {
        0b00000000 => Ok(0),  // no envelope
        0b00000010 => Ok(32), // [minx, maxx, miny, maxy]
        0b00000100 => Ok(48), // [minx, maxx, miny, maxy, minz, maxz]
        0b00000110 => Ok(48), // [minx, maxx, miny, maxy, minm, maxm]
        0b00001000 => Ok(64), // [minx, maxx, miny, maxy, minz, maxz, minm, maxm]
        _ => Err(GeoflowError::InvalidGeometryFlags(flags)),
    }
}

/// Walk any geo-traits geometry and accumulate its XY bounds.
pub(crate) fn bounds_of<G: GeometryTrait<T = f64>>(geom: &G) -> Option<Extent> {
    use geo_traits::GeometryType as GeoType;

    let mut bounds: Option<Extent> = None;
    match geom.as_type() {
        GeoType::Point(point) => {
            if let Some(coord) = point.coord() {
                add_coord(&mut bounds, &coord);
            }
        }
        GeoType::LineString(line) => {
            for coord in line.coords() {
                add_coord(&mut bounds, &coord);
            }
        }
        GeoType::Polygon(poly) => {
            if let Some(ring) = poly.exterior() {
                add_line_string(&mut bounds, &ring);
            }
            for ring in poly.interiors() {
                add_line_string(&mut bounds, &ring);
            }
        }
        GeoType::MultiPoint(multi) => {
            for point in multi.points() {
                if let Some(coord) = point.coord() {
                    add_coord(&mut bounds, &coord);
                }
            }
        }
        GeoType::MultiLineString(multi) => {
            for line in multi.line_strings() {
                add_line_string(&mut bounds, &line);
            }
        }
        GeoType::MultiPolygon(multi) => {
            for poly in multi.polygons() {
                if let Some(ring) = poly.exterior() {
                    add_line_string(&mut bounds, &ring);
                }
                for ring in poly.interiors() {
                    add_line_string(&mut bounds, &ring);
                }
            }
        }
        GeoType::GeometryCollection(collection) => {
            for sub_geom in collection.geometries() {
                if let Some(sub_bounds) = bounds_of(&sub_geom) {
                    merge_bounds(&mut bounds, sub_bounds);
                }
            }
        }
        GeoType::Rect(_) | GeoType::Triangle(_) | GeoType::Line(_) => {
            // No GeoPackage geometry types should reach here.
            unreachable!()
        }
    }

    bounds
}

fn add_line_string<L: LineStringTrait<T = f64>>(bounds: &mut Option<Extent>, line: &L) {
    for coord in line.coords() {
        add_coord(bounds, &coord);
    }
}

fn add_coord<C: CoordTrait<T = f64>>(bounds: &mut Option<Extent>, coord: &C) {
    let (x, y) = coord.x_y();
    let coord_extent = Extent {
        min_x: x,
        max_x: x,
        min_y: y,
        max_y: y,
    };
    merge_bounds(bounds, coord_extent);
}

fn merge_bounds(bounds: &mut Option<Extent>, other: Extent) {
    match bounds {
        Some(existing) => existing.merge(other),
        None => *bounds = Some(other),
    }
}
