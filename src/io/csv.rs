use crate::datasource::DataSource;
use crate::error::{GeoflowError, Result};
use crate::geometry::Geometry;
use crate::table::Table;
use crate::types::{ColumnSpec, ColumnType, Value};
use csv::{ReaderBuilder, WriterBuilder};
use std::fmt::Write as _;
use std::path::Path;

/// Write the table as delimited text: a header row, then one record
/// per row. Geometry columns are serialized as WKT, other blobs as hex.
pub(super) fn export(
    table: &Table<'_>,
    geometry_columns: &[String],
    path: &Path,
    delimiter: u8,
) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(delimiter).from_path(path)?;
    writer.write_record(table.column_names())?;

    for row in table.rows()? {
        let row = row?;
        let mut record = Vec::with_capacity(table.columns().len());
        for (idx, spec) in table.columns().iter().enumerate() {
            let value = row.value_at(idx).unwrap_or(&Value::Null);
            let is_geometry = geometry_columns.iter().any(|name| *name == spec.name);
            record.push(cell_to_string(value, is_geometry)?);
        }
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

fn cell_to_string(value: &Value, is_geometry: bool) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Integer(value) => Ok(value.to_string()),
        Value::Real(value) => Ok(value.to_string()),
        Value::Text(value) => Ok(value.clone()),
        Value::Blob(bytes) if is_geometry => {
            let geom = Geometry::from_gpkg_blob(bytes.clone())?;
            let wkb = geom.wkb()?;
            let mut wkt = String::new();
            wkt::to_wkt::write_geometry(&mut wkt, &wkb)
                .map_err(|err| GeoflowError::Message(format!("wkt encoding failed: {err}")))?;
            Ok(wkt)
        }
        Value::Blob(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2);
            for byte in bytes {
                let _ = write!(hex, "{byte:02x}");
            }
            Ok(hex)
        }
    }
}

/// Read delimited text into a new TEXT-columned table named after the
/// header row. Empty fields become NULL; any typing beyond that is the
/// caller's job.
pub(super) fn import(ds: &DataSource, path: &Path, table_name: &str, delimiter: u8) -> Result<()> {
    let mut reader = ReaderBuilder::new().delimiter(delimiter).from_path(path)?;
    let headers = reader.headers()?.clone();

    let columns = headers
        .iter()
        .map(|name| ColumnSpec {
            name: name.to_string(),
            column_type: ColumnType::Varchar,
        })
        .collect::<Vec<ColumnSpec>>();
    let table = ds.create_table(table_name, &columns)?;

    let mut imported = 0usize;
    for record in reader.records() {
        let record = record?;
        let values = record.iter().map(|field| {
            if field.is_empty() {
                Value::Null
            } else {
                Value::from(field)
            }
        });
        table.insert(values)?;
        imported += 1;
    }

    tracing::debug!(table_name, rows = imported, "csv import finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::io::{ExportOptions, ImportOptions};
    use crate::types::{ColumnSpec, ColumnType, Value};
    use crate::{DataSource, GeoflowError};
    use geo_types::Point;

    fn sample_ds() -> DataSource {
        let ds = DataSource::create_in_memory().expect("data source");
        ds.execute_batch(
            "CREATE TABLE readings (id INTEGER PRIMARY KEY, station TEXT, level DOUBLE);
             INSERT INTO readings (station, level) VALUES ('a', 1.5), ('b', NULL);",
        )
        .expect("seed");
        ds
    }

    #[test]
    fn csv_roundtrip_preserves_shape() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("readings.csv");

        let ds = sample_ds();
        let table = ds.table("readings").expect("table");
        table.save(&path, ExportOptions::default()).expect("save");

        let text = std::fs::read_to_string(&path).expect("read");
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("id,station,level"));
        assert_eq!(lines.next(), Some("1,a,1.5"));
        assert_eq!(lines.next(), Some("2,b,"));

        let imported = ds
            .import(&path, "readings_copy", ImportOptions::default())
            .expect("import");
        assert!(!imported.is_spatial());
        let copy = imported.table();
        assert_eq!(copy.row_count().expect("count"), 2);
        assert!(copy.has_column("station", ColumnType::Varchar));
        // CSV import is untyped: everything lands as text.
        assert!(copy.has_column("level", ColumnType::Varchar));
    }

    #[test]
    fn export_refuses_to_clobber_without_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("readings.csv");
        std::fs::write(&path, "stale").expect("pre-existing file");

        let ds = sample_ds();
        let table = ds.table("readings").expect("table");
        let err = table
            .save(&path, ExportOptions::default())
            .expect_err("no overwrite");
        assert!(matches!(err, GeoflowError::Io(_)));

        table
            .save(&path, ExportOptions { overwrite: true })
            .expect("overwrite");
        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.starts_with("id,station,level"));
    }

    #[test]
    fn import_refuses_existing_table_without_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("readings.csv");

        let ds = sample_ds();
        ds.table("readings")
            .expect("table")
            .save(&path, ExportOptions::default())
            .expect("save");

        let err = ds
            .import(&path, "readings", ImportOptions::default())
            .expect_err("table exists");
        assert!(matches!(err, GeoflowError::TableAlreadyExists { .. }));

        ds.import(&path, "readings", ImportOptions { overwrite: true })
            .expect("overwrite import");
    }

    #[test]
    fn tsv_uses_tab_delimiter() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("readings.tsv");

        let ds = sample_ds();
        ds.table("readings")
            .expect("table")
            .save(&path, ExportOptions::default())
            .expect("save");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.starts_with("id\tstation\tlevel"));
    }

    #[test]
    fn spatial_export_writes_wkt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("places.csv");

        let ds = DataSource::create_in_memory().expect("data source");
        let layer = ds
            .create_spatial_table(
                "places",
                "geom",
                wkb::reader::GeometryType::Point,
                wkb::reader::Dimension::Xy,
                4326,
                &[ColumnSpec {
                    name: "name".to_string(),
                    column_type: ColumnType::Varchar,
                }],
            )
            .expect("spatial table");
        layer
            .insert(Point::new(1.0, 2.0), [Value::from("origin")])
            .expect("insert");

        layer.save(&path, ExportOptions::default()).expect("save");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("POINT(1 2)") || text.contains("POINT (1 2)"));
        assert!(text.contains("origin"));
    }
}
