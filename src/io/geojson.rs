use crate::datasource::DataSource;
use crate::error::{GeoflowError, Result};
use crate::geometry::Geometry;
use crate::table::Table;
use crate::types::{ColumnSpec, ColumnType, Value};
use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, LineStringTrait, MultiLineStringTrait,
    MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait,
};
use serde_json::{json, Map};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

const DEFAULT_SRID: u32 = 4326; // GeoJSON is WGS 84 by definition

/// Write the table as a GeoJSON FeatureCollection. The first geometry
/// column becomes the feature geometry (`null` when the table has
/// none), every other column a property.
pub(super) fn export(table: &Table<'_>, geometry_columns: &[String], path: &Path) -> Result<()> {
    let geometry_column = geometry_columns.first().map(String::as_str);

    let mut features = Vec::new();
    for row in table.rows()? {
        let row = row?;

        let geometry_json = match geometry_column {
            Some(column) => match row.value(column) {
                Some(Value::Blob(bytes)) => {
                    let geom = Geometry::from_gpkg_blob(bytes.clone())?;
                    geometry_to_json(&geom.wkb()?)?
                }
                _ => serde_json::Value::Null,
            },
            None => serde_json::Value::Null,
        };

        let mut properties = Map::new();
        for (idx, spec) in table.columns().iter().enumerate() {
            if Some(spec.name.as_str()) == geometry_column {
                continue;
            }
            let value = row.value_at(idx).unwrap_or(&Value::Null);
            properties.insert(spec.name.clone(), value_to_json(value));
        }

        features.push(json!({
            "type": "Feature",
            "geometry": geometry_json,
            "properties": properties,
        }));
    }

    let collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });

    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, &collection)?;
    Ok(())
}

/// Read a GeoJSON FeatureCollection into a new spatial table with an
/// SRID of 4326. Property columns are inferred from the first feature.
pub(super) fn import(ds: &DataSource, path: &Path, table_name: &str) -> Result<()> {
    let reader = BufReader::new(File::open(path)?);
    let document: serde_json::Value = serde_json::from_reader(reader)?;

    let features = document
        .get("features")
        .and_then(|features| features.as_array())
        .ok_or_else(|| {
            GeoflowError::Message(format!(
                "not a GeoJSON FeatureCollection: {}",
                path.display()
            ))
        })?;

    let columns = infer_property_columns(features);
    let geometry_type = infer_geometry_type(features)?;

    let layer = ds.create_spatial_table(
        table_name,
        "geom",
        geometry_type,
        wkb::reader::Dimension::Xy,
        DEFAULT_SRID,
        &columns,
    )?;

    let mut imported = 0usize;
    for feature in features {
        let geometry_json = feature.get("geometry").unwrap_or(&serde_json::Value::Null);
        if geometry_json.is_null() {
            tracing::warn!(table_name, "skipping feature with null geometry");
            continue;
        }
        let geometry = json_to_geometry(geometry_json)?;

        let empty = Map::new();
        let properties = feature
            .get("properties")
            .and_then(|properties| properties.as_object())
            .unwrap_or(&empty);
        let values = columns.iter().map(|spec| {
            properties
                .get(&spec.name)
                .map(json_to_value)
                .unwrap_or(Value::Null)
        });

        layer.insert(geometry, values.collect::<Vec<Value>>())?;
        imported += 1;
    }

    tracing::debug!(table_name, features = imported, "geojson import finished");
    Ok(())
}

fn infer_property_columns(features: &[serde_json::Value]) -> Vec<ColumnSpec> {
    let Some(properties) = features
        .first()
        .and_then(|feature| feature.get("properties"))
        .and_then(|properties| properties.as_object())
    else {
        return Vec::new();
    };

    properties
        .iter()
        .map(|(name, value)| {
            let column_type = match value {
                serde_json::Value::Bool(_) => ColumnType::Boolean,
                serde_json::Value::Number(number) if number.is_i64() => ColumnType::Integer,
                serde_json::Value::Number(_) => ColumnType::Double,
                _ => ColumnType::Varchar,
            };
            ColumnSpec {
                name: name.clone(),
                column_type,
            }
        })
        .collect()
}

fn infer_geometry_type(features: &[serde_json::Value]) -> Result<wkb::reader::GeometryType> {
    let mut found: Option<&str> = None;
    for feature in features {
        let Some(type_name) = feature
            .get("geometry")
            .and_then(|geometry| geometry.get("type"))
            .and_then(|type_name| type_name.as_str())
        else {
            continue;
        };
        match found {
            None => found = Some(type_name),
            // Mixed geometry types degrade to the generic type.
            Some(existing) if existing != type_name => {
                return Ok(wkb::reader::GeometryType::GeometryCollection);
            }
            Some(_) => {}
        }
    }

    match found {
        None => Ok(wkb::reader::GeometryType::GeometryCollection),
        Some(type_name) => geometry_type_from_geojson(type_name),
    }
}

fn geometry_type_from_geojson(type_name: &str) -> Result<wkb::reader::GeometryType> {
    match type_name {
        "Point" => Ok(wkb::reader::GeometryType::Point),
        "LineString" => Ok(wkb::reader::GeometryType::LineString),
        "Polygon" => Ok(wkb::reader::GeometryType::Polygon),
        "MultiPoint" => Ok(wkb::reader::GeometryType::MultiPoint),
        "MultiLineString" => Ok(wkb::reader::GeometryType::MultiLineString),
        "MultiPolygon" => Ok(wkb::reader::GeometryType::MultiPolygon),
        "GeometryCollection" => Ok(wkb::reader::GeometryType::GeometryCollection),
        other => Err(GeoflowError::UnsupportedGeometryType(other.to_string())),
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(value) => json!(value),
        Value::Real(value) => serde_json::Number::from_f64(*value)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(value) => json!(value),
        Value::Blob(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2);
            for byte in bytes {
                hex.push_str(&format!("{byte:02x}"));
            }
            json!(hex)
        }
    }
}

fn json_to_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(value) => Value::from(*value),
        serde_json::Value::Number(number) => match number.as_i64() {
            Some(value) => Value::Integer(value),
            None => Value::Real(number.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(value) => Value::Text(value.clone()),
        // Nested structures are kept as their JSON text.
        other => Value::Text(other.to_string()),
    }
}

fn geometry_to_json<G: GeometryTrait<T = f64>>(geom: &G) -> Result<serde_json::Value> {
    use geo_traits::GeometryType as GeoType;

    let value = match geom.as_type() {
        GeoType::Point(point) => match point.coord() {
            Some(coord) => json!({ "type": "Point", "coordinates": [coord.x_y().0, coord.x_y().1] }),
            None => serde_json::Value::Null,
        },
        GeoType::LineString(line) => {
            json!({ "type": "LineString", "coordinates": line_coords(line) })
        }
        GeoType::Polygon(poly) => {
            json!({ "type": "Polygon", "coordinates": polygon_rings(poly) })
        }
        GeoType::MultiPoint(multi) => {
            let coordinates = multi
                .points()
                .filter_map(|point| point.coord().map(|coord| {
                    let (x, y) = coord.x_y();
                    json!([x, y])
                }))
                .collect::<Vec<serde_json::Value>>();
            json!({ "type": "MultiPoint", "coordinates": coordinates })
        }
        GeoType::MultiLineString(multi) => {
            let coordinates = multi
                .line_strings()
                .map(|line| line_coords(&line))
                .collect::<Vec<serde_json::Value>>();
            json!({ "type": "MultiLineString", "coordinates": coordinates })
        }
        GeoType::MultiPolygon(multi) => {
            let coordinates = multi
                .polygons()
                .map(|poly| polygon_rings(&poly))
                .collect::<Vec<serde_json::Value>>();
            json!({ "type": "MultiPolygon", "coordinates": coordinates })
        }
        GeoType::GeometryCollection(collection) => {
            let mut geometries = Vec::with_capacity(collection.num_geometries());
            for member in collection.geometries() {
                geometries.push(geometry_to_json(&member)?);
            }
            json!({ "type": "GeometryCollection", "geometries": geometries })
        }
        GeoType::Rect(_) | GeoType::Triangle(_) | GeoType::Line(_) => {
            // No GeoPackage geometry types should reach here.
            unreachable!()
        }
    };
    Ok(value)
}

fn line_coords<L: LineStringTrait<T = f64>>(line: &L) -> serde_json::Value {
    let coordinates = line
        .coords()
        .map(|coord| {
            let (x, y) = coord.x_y();
            json!([x, y])
        })
        .collect::<Vec<serde_json::Value>>();
    serde_json::Value::Array(coordinates)
}

fn polygon_rings<P: PolygonTrait<T = f64>>(poly: &P) -> serde_json::Value {
    let mut rings = Vec::new();
    if let Some(ring) = poly.exterior() {
        rings.push(line_coords(&ring));
    }
    for ring in poly.interiors() {
        rings.push(line_coords(&ring));
    }
    serde_json::Value::Array(rings)
}

fn json_to_geometry(value: &serde_json::Value) -> Result<geo_types::Geometry<f64>> {
    let type_name = value
        .get("type")
        .and_then(|type_name| type_name.as_str())
        .ok_or_else(|| GeoflowError::Message("GeoJSON geometry has no type".to_string()))?;

    let geometry = match type_name {
        "Point" => {
            let (x, y) = coord_pair(coordinates_of(value)?)?;
            geo_types::Geometry::Point(geo_types::Point::new(x, y))
        }
        "LineString" => {
            geo_types::Geometry::LineString(line_string_from(coordinates_of(value)?)?)
        }
        "Polygon" => geo_types::Geometry::Polygon(polygon_from(coordinates_of(value)?)?),
        "MultiPoint" => {
            let points = array_of(coordinates_of(value)?)?
                .iter()
                .map(|point| {
                    let (x, y) = coord_pair(point)?;
                    Ok(geo_types::Point::new(x, y))
                })
                .collect::<Result<Vec<geo_types::Point<f64>>>>()?;
            geo_types::Geometry::MultiPoint(geo_types::MultiPoint::new(points))
        }
        "MultiLineString" => {
            let lines = array_of(coordinates_of(value)?)?
                .iter()
                .map(line_string_from)
                .collect::<Result<Vec<geo_types::LineString<f64>>>>()?;
            geo_types::Geometry::MultiLineString(geo_types::MultiLineString::new(lines))
        }
        "MultiPolygon" => {
            let polygons = array_of(coordinates_of(value)?)?
                .iter()
                .map(polygon_from)
                .collect::<Result<Vec<geo_types::Polygon<f64>>>>()?;
            geo_types::Geometry::MultiPolygon(geo_types::MultiPolygon::new(polygons))
        }
        "GeometryCollection" => {
            let members = value
                .get("geometries")
                .and_then(|geometries| geometries.as_array())
                .ok_or_else(|| {
                    GeoflowError::Message("GeometryCollection has no geometries".to_string())
                })?
                .iter()
                .map(json_to_geometry)
                .collect::<Result<Vec<geo_types::Geometry<f64>>>>()?;
            geo_types::Geometry::GeometryCollection(geo_types::GeometryCollection::from(members))
        }
        other => return Err(GeoflowError::UnsupportedGeometryType(other.to_string())),
    };
    Ok(geometry)
}

fn coordinates_of(value: &serde_json::Value) -> Result<&serde_json::Value> {
    value.get("coordinates").ok_or_else(|| {
        GeoflowError::Message("GeoJSON geometry has no coordinates".to_string())
    })
}

fn array_of(value: &serde_json::Value) -> Result<&Vec<serde_json::Value>> {
    value
        .as_array()
        .ok_or_else(|| GeoflowError::Message("expected a GeoJSON coordinate array".to_string()))
}

fn coord_pair(value: &serde_json::Value) -> Result<(f64, f64)> {
    let pair = array_of(value)?;
    if pair.len() < 2 {
        return Err(GeoflowError::Message(
            "GeoJSON position needs two ordinates".to_string(),
        ));
    }
    let x = pair[0]
        .as_f64()
        .ok_or_else(|| GeoflowError::Message("non-numeric ordinate".to_string()))?;
    let y = pair[1]
        .as_f64()
        .ok_or_else(|| GeoflowError::Message("non-numeric ordinate".to_string()))?;
    Ok((x, y))
}

fn line_string_from(value: &serde_json::Value) -> Result<geo_types::LineString<f64>> {
    let coords = array_of(value)?
        .iter()
        .map(|position| {
            let (x, y) = coord_pair(position)?;
            Ok(geo_types::Coord { x, y })
        })
        .collect::<Result<Vec<geo_types::Coord<f64>>>>()?;
    Ok(geo_types::LineString::new(coords))
}

fn polygon_from(value: &serde_json::Value) -> Result<geo_types::Polygon<f64>> {
    let mut rings = array_of(value)?
        .iter()
        .map(line_string_from)
        .collect::<Result<Vec<geo_types::LineString<f64>>>>()?;
    if rings.is_empty() {
        return Ok(geo_types::Polygon::new(
            geo_types::LineString::new(Vec::new()),
            Vec::new(),
        ));
    }
    let exterior = rings.remove(0);
    Ok(geo_types::Polygon::new(exterior, rings))
}

#[cfg(test)]
mod tests {
    use crate::io::{ExportOptions, ImportOptions};
    use crate::types::{ColumnSpec, ColumnType, Value};
    use crate::DataSource;
    use geo_types::Point;

    #[test]
    fn geojson_roundtrip_keeps_features_and_srid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("places.geojson");

        let ds = DataSource::create_in_memory().expect("data source");
        let layer = ds
            .create_spatial_table(
                "places",
                "geom",
                wkb::reader::GeometryType::Point,
                wkb::reader::Dimension::Xy,
                4326,
                &[
                    ColumnSpec {
                        name: "name".to_string(),
                        column_type: ColumnType::Varchar,
                    },
                    ColumnSpec {
                        name: "population".to_string(),
                        column_type: ColumnType::Integer,
                    },
                ],
            )
            .expect("spatial table");
        layer
            .insert(
                Point::new(2.35, 48.85),
                [Value::from("paris"), Value::from(2_100_000_i64)],
            )
            .expect("insert");
        layer
            .insert(
                Point::new(-0.12, 51.5),
                [Value::from("london"), Value::from(8_800_000_i64)],
            )
            .expect("insert");

        layer.save(&path, ExportOptions::default()).expect("save");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"FeatureCollection\""));
        assert!(text.contains("\"paris\""));

        let imported = ds
            .import(&path, "places_copy", ImportOptions::default())
            .expect("import");
        assert!(imported.is_spatial());
        let copy = imported.as_spatial().expect("spatial");
        assert_eq!(copy.srid().expect("srid"), 4326);
        assert_eq!(copy.row_count().expect("count"), 2);

        let row = copy.first().expect("fetch").expect("row");
        let name: String = row.get("name").expect("name");
        let population: i64 = row.get("population").expect("population");
        assert_eq!(name, "paris");
        assert_eq!(population, 2_100_000);

        let geom = row.geometry("geom").expect("geometry");
        let bounds = geom.bounds().expect("bounds").expect("point");
        assert!((bounds.min_x - 2.35).abs() < 1e-9);
        assert!((bounds.min_y - 48.85).abs() < 1e-9);
    }

    #[test]
    fn plain_table_exports_null_geometry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plain.geojson");

        let ds = DataSource::create_in_memory().expect("data source");
        ds.execute_batch(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
             INSERT INTO notes (body) VALUES ('hello');",
        )
        .expect("seed");

        ds.table("notes")
            .expect("table")
            .save(&path, ExportOptions::default())
            .expect("save");

        let document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        let features = document["features"].as_array().expect("features");
        assert_eq!(features.len(), 1);
        assert!(features[0]["geometry"].is_null());
        assert_eq!(features[0]["properties"]["body"], "hello");
    }

    #[test]
    fn import_rejects_non_feature_collection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.geojson");
        std::fs::write(&path, "{\"type\": \"Point\", \"coordinates\": [0, 0]}")
            .expect("write");

        let ds = DataSource::create_in_memory().expect("data source");
        let err = ds
            .import(&path, "broken", ImportOptions::default())
            .expect_err("not a collection");
        assert!(matches!(err, crate::GeoflowError::Message(_)));
    }
}
