use crate::datasource::DataSource;
use crate::error::{GeoflowError, Result};
use crate::geometry::{Extent, Geometry};
use crate::io::{self, ExportOptions};
use crate::table::{Row, RowIterator, Table};
use crate::types::{ColumnSpec, ColumnType, Value};
use geo_traits::GeometryTrait;
use rusqlite::params_from_iter;
use std::path::Path;

/// A [`Table`] with at least one geometry-typed column.
///
/// Geometry columns and the SRID come from the `gpkg_geometry_columns`
/// catalog when the wrapper has a stable location; for raw query
/// results they are discovered from declared column types and the SRID
/// is unknown unless carried forward by [`SpatialTable::reproject`].
#[derive(Debug)]
pub struct SpatialTable<'a> {
    table: Table<'a>,
    geometry_columns: Vec<String>,
    srid: Option<u32>,
    geometry_type: Option<wkb::reader::GeometryType>,
    geometry_dimension: Option<wkb::reader::Dimension>,
}

impl<'a> SpatialTable<'a> {
    pub(crate) fn named(ds: &'a DataSource, table_name: &str) -> Result<Self> {
        let mut table = Table::named(ds, table_name)?;

        if let Some(meta) = ds.geometry_meta(table_name)? {
            table.set_column_type(&meta.column, ColumnType::Geometry);
            return Ok(Self {
                table,
                geometry_columns: vec![meta.column],
                srid: Some(meta.srid),
                geometry_type: Some(meta.geometry_type),
                geometry_dimension: Some(meta.dimension),
            });
        }

        // Not in the catalog: fall back to explicitly geometry-typed
        // column declarations.
        let geometry_columns = ds.declared_geometry_columns(table_name)?;
        if geometry_columns.is_empty() {
            return Err(GeoflowError::MissingGeometryColumn {
                table_name: table_name.to_string(),
            });
        }
        for column in &geometry_columns {
            table.set_column_type(column, ColumnType::Geometry);
        }
        Ok(Self {
            table,
            geometry_columns,
            srid: None,
            geometry_type: None,
            geometry_dimension: None,
        })
    }

    pub(crate) fn from_query(ds: &'a DataSource, sql: &str) -> Result<Self> {
        let mut table = Table::from_query(ds, sql)?;
        let geometry_columns = ds.query_geometry_columns(sql)?;
        if geometry_columns.is_empty() {
            return Err(GeoflowError::MissingGeometryColumn {
                table_name: "query result".to_string(),
            });
        }
        for column in &geometry_columns {
            table.set_column_type(column, ColumnType::Geometry);
        }
        Ok(Self {
            table,
            geometry_columns,
            srid: None,
            geometry_type: None,
            geometry_dimension: None,
        })
    }

    pub fn table(&self) -> &Table<'a> {
        &self.table
    }

    pub fn into_table(self) -> Table<'a> {
        self.table
    }

    pub fn name(&self) -> Option<&str> {
        self.table.name()
    }

    pub fn select_sql(&self) -> String {
        self.table.select_sql()
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        self.table.columns()
    }

    pub fn has_column(&self, column_name: &str, column_type: ColumnType) -> bool {
        self.table.has_column(column_name, column_type)
    }

    pub fn row_count(&self) -> Result<usize> {
        self.table.row_count()
    }

    pub fn rows(&self) -> Result<RowIterator<'a>> {
        self.table.rows()
    }

    pub fn first(&self) -> Result<Option<Row>> {
        self.table.first()
    }

    /// Names of the geometry-typed columns, first column first.
    pub fn geometry_columns(&self) -> &[String] {
        &self.geometry_columns
    }

    /// The first geometry column, the one SRID metadata is attached to.
    pub fn geometry_column(&self) -> &str {
        &self.geometry_columns[0]
    }

    pub fn geometry_type(&self) -> Option<wkb::reader::GeometryType> {
        self.geometry_type
    }

    pub fn geometry_dimension(&self) -> Option<wkb::reader::Dimension> {
        self.geometry_dimension
    }

    /// SRID of the first geometry column.
    ///
    /// Known for catalog-backed tables and for tables derived with
    /// [`SpatialTable::reproject`]; a plain query result has no SRID
    /// metadata to consult and fails with a typed error.
    pub fn srid(&self) -> Result<u32> {
        match self.srid {
            Some(srid) => Ok(srid),
            None => match self.table.name() {
                Some(name) => Err(GeoflowError::Message(format!(
                    "no SRS recorded in gpkg_geometry_columns for table: {name}"
                ))),
                None => Err(GeoflowError::NoTableLocation {
                    operation: "srid lookup",
                }),
            },
        }
    }

    /// Envelope of the first geometry column across all rows, computed
    /// in SQL through the registered envelope functions.
    pub fn extent(&self) -> Result<Option<Extent>> {
        let column = self.geometry_column();
        let sql = format!(
            r#"SELECT MIN(ST_MinX("{c}")), MIN(ST_MinY("{c}")), MAX(ST_MaxX("{c}")), MAX(ST_MaxY("{c}")) FROM ({sql})"#,
            c = column,
            sql = self.select_sql(),
        );

        let bounds: (Option<f64>, Option<f64>, Option<f64>, Option<f64>) = self
            .table
            .data_source()
            .connection()
            .query_row(&sql, [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;

        Ok(match bounds {
            (Some(min_x), Some(min_y), Some(max_x), Some(max_y)) => Some(Extent {
                min_x,
                min_y,
                max_x,
                max_y,
            }),
            _ => None,
        })
    }

    /// Reproject by query rewrite: every geometry column is wrapped in
    /// `ST_Transform` and aliased back to its name, and a new lazy
    /// wrapper over the rewritten SQL is returned with the target SRID
    /// recorded. No geometry is touched until the result is iterated,
    /// and this wrapper is left unchanged.
    pub fn reproject(&self, srid: u32) -> Result<SpatialTable<'a>> {
        let projected = self
            .table
            .columns()
            .iter()
            .map(|spec| {
                if self.geometry_columns.contains(&spec.name) {
                    format!(r#"ST_Transform("{c}", {srid}) AS "{c}""#, c = spec.name)
                } else {
                    format!(r#""{}""#, spec.name)
                }
            })
            .collect::<Vec<String>>()
            .join(", ");
        let sql = format!("SELECT {projected} FROM ({})", self.select_sql());

        let mut table = Table::from_query(self.table.data_source(), &sql)?;
        for column in &self.geometry_columns {
            table.set_column_type(column, ColumnType::Geometry);
        }

        Ok(SpatialTable {
            table,
            geometry_columns: self.geometry_columns.clone(),
            srid: Some(srid),
            geometry_type: self.geometry_type,
            geometry_dimension: self.geometry_dimension,
        })
    }

    /// Insert a feature: the geometry is encoded as a GeoPackage blob
    /// stamped with this table's SRID, properties cover the remaining
    /// non-key columns in order.
    pub fn insert<G, P>(&self, geometry: G, properties: P) -> Result<()>
    where
        G: GeometryTrait<T = f64>,
        P: IntoIterator<Item = Value>,
    {
        self.table.ensure_writable()?;
        let table_name = self.table.location("insert")?;
        let geom = Geometry::from_geo(&geometry, self.srid()?)?;

        let mut columns = Vec::with_capacity(self.table.columns().len());
        columns.push(self.geometry_column().to_string());
        columns.extend(self.property_columns().map(str::to_string));

        let quoted = columns
            .iter()
            .map(|name| format!(r#""{}""#, name))
            .collect::<Vec<String>>()
            .join(",");
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<String>>()
            .join(",");
        let sql = format!(r#"INSERT INTO "{table_name}" ({quoted}) VALUES ({placeholders})"#);

        let params = std::iter::once(Value::Blob(geom.into_bytes())).chain(properties);
        let mut stmt = self
            .table
            .data_source()
            .connection()
            .prepare_cached(&sql)?;
        stmt.execute(params_from_iter(params))?;
        Ok(())
    }

    /// Update the feature with the given primary key value.
    pub fn update<G, P>(&self, geometry: G, properties: P, id: i64) -> Result<()>
    where
        G: GeometryTrait<T = f64>,
        P: IntoIterator<Item = Value>,
    {
        self.table.ensure_writable()?;
        let table_name = self.table.location("update")?;
        let primary_key = self.table.primary_key().ok_or_else(|| {
            GeoflowError::Message(format!(
                "no primary key column to update by for table: {table_name}"
            ))
        })?;
        let geom = Geometry::from_geo(&geometry, self.srid()?)?;

        let mut columns = Vec::with_capacity(self.table.columns().len());
        columns.push(self.geometry_column().to_string());
        columns.extend(self.property_columns().map(str::to_string));

        let assignments = columns
            .iter()
            .enumerate()
            .map(|(idx, name)| format!(r#""{}"=?{}"#, name, idx + 1))
            .collect::<Vec<String>>()
            .join(",");
        let id_idx = columns.len() + 1;
        let sql = format!(
            r#"UPDATE "{table_name}" SET {assignments} WHERE "{primary_key}"=?{id_idx}"#
        );

        let params = std::iter::once(Value::Blob(geom.into_bytes()))
            .chain(properties)
            .chain(std::iter::once(Value::Integer(id)));
        let mut stmt = self
            .table
            .data_source()
            .connection()
            .prepare_cached(&sql)?;
        stmt.execute(params_from_iter(params))?;
        Ok(())
    }

    /// Export to a file; the driver is selected by the file extension.
    pub fn save<P: AsRef<Path>>(&self, path: P, options: ExportOptions) -> Result<()> {
        io::export_table(&self.table, &self.geometry_columns, path.as_ref(), options)
    }

    pub fn to_ascii(&self, max_rows: usize) -> Result<String> {
        self.table.to_ascii(max_rows)
    }

    pub fn to_html(&self, max_rows: usize) -> Result<String> {
        self.table.to_html(max_rows)
    }

    /// Non-key, non-geometry columns in declaration order.
    fn property_columns(&self) -> impl Iterator<Item = &str> {
        let primary_key = self.table.primary_key();
        self.table
            .columns()
            .iter()
            .map(|spec| spec.name.as_str())
            .filter(move |name| {
                Some(*name) != primary_key && !self.geometry_columns.iter().any(|g| g == name)
            })
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{ColumnSpec, ColumnType, Value};
    use crate::{DataSource, GeoflowError};
    use geo_types::Point;

    fn spatial_ds() -> DataSource {
        let ds = DataSource::create_in_memory().expect("in-memory data source");
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
            .insert(Point::new(2.35, 48.85), [Value::from("paris")])
            .expect("insert");
        layer
            .insert(Point::new(-0.12, 51.5), [Value::from("london")])
            .expect("insert");
        ds
    }

    #[test]
    fn named_spatial_table_reads_catalog_metadata() {
        let ds = spatial_ds();
        let table = ds.spatial_table("places").expect("spatial table");

        assert_eq!(table.geometry_column(), "geom");
        assert_eq!(table.srid().expect("srid"), 4326);
        assert_eq!(
            table.geometry_type(),
            Some(wkb::reader::GeometryType::Point)
        );
        assert!(table.has_column("geom", ColumnType::Geometry));
        assert_eq!(table.row_count().expect("count"), 2);
    }

    #[test]
    fn plain_table_is_not_spatial() {
        let ds = spatial_ds();
        ds.execute_batch("CREATE TABLE plain (id INTEGER PRIMARY KEY, v TEXT);")
            .expect("ddl");
        let err = ds.spatial_table("plain").expect_err("no geometry");
        assert!(matches!(err, GeoflowError::MissingGeometryColumn { .. }));
    }

    #[test]
    fn rows_decode_geometry_with_srid() {
        let ds = spatial_ds();
        let table = ds.spatial_table("places").expect("spatial table");

        let row = table.first().expect("fetch").expect("row");
        let geom = row.geometry("geom").expect("geometry");
        assert_eq!(geom.srid(), 4326);
        assert_eq!(
            geom.geometry_type().expect("type"),
            wkb::reader::GeometryType::Point
        );
    }

    #[test]
    fn extent_covers_all_features() {
        let ds = spatial_ds();
        let table = ds.spatial_table("places").expect("spatial table");

        let extent = table.extent().expect("extent").expect("non-empty");
        assert_eq!(extent.min_x, -0.12);
        assert_eq!(extent.max_x, 2.35);
        assert_eq!(extent.min_y, 48.85);
        assert_eq!(extent.max_y, 51.5);
    }

    #[test]
    fn empty_table_has_no_extent() {
        let ds = spatial_ds();
        let table = ds.spatial_table("places").expect("spatial table");
        table.table().delete_all().expect("truncate");
        assert!(table.extent().expect("extent").is_none());
    }

    #[test]
    fn reproject_is_a_rewrite_preserving_row_count() {
        let ds = spatial_ds();
        let table = ds.spatial_table("places").expect("spatial table");

        let reprojected = table.reproject(3857).expect("reproject");

        // Same cardinality, new SRID on the derived wrapper, original
        // untouched.
        assert_eq!(
            reprojected.row_count().expect("count"),
            table.row_count().expect("count")
        );
        assert_eq!(reprojected.srid().expect("srid"), 3857);
        assert_eq!(table.srid().expect("srid"), 4326);

        // Geometry values report the new SRID too.
        let row = reprojected.first().expect("fetch").expect("row");
        let geom = row.geometry("geom").expect("geometry");
        assert_eq!(geom.srid(), 3857);

        // Coordinates actually moved out of degree range.
        let bounds = geom.bounds().expect("bounds").expect("point");
        assert!(bounds.min_x.abs() > 1_000.0);
    }

    #[test]
    fn reprojected_query_keeps_geometry_typing() {
        let ds = spatial_ds();
        let table = ds.spatial_table("places").expect("spatial table");
        let reprojected = table.reproject(3857).expect("reproject");

        assert!(reprojected.has_column("geom", ColumnType::Geometry));
        assert_eq!(reprojected.name(), None);
    }

    #[test]
    fn spatial_query_without_srid_fails_typed() {
        let ds = spatial_ds();
        let table = ds
            .spatial_query("SELECT geom, name FROM places")
            .expect("spatial query");
        let err = table.srid().expect_err("no location");
        assert!(matches!(
            err,
            GeoflowError::NoTableLocation {
                operation: "srid lookup"
            }
        ));
    }

    #[test]
    fn update_moves_feature() {
        let ds = spatial_ds();
        let table = ds.spatial_table("places").expect("spatial table");

        table
            .update(Point::new(13.4, 52.5), [Value::from("berlin")], 1)
            .expect("update");

        let row = table.first().expect("fetch").expect("row");
        let name: String = row.get("name").expect("name");
        assert_eq!(name, "berlin");
        let bounds = row
            .geometry("geom")
            .expect("geometry")
            .bounds()
            .expect("bounds")
            .expect("point");
        assert_eq!(bounds.min_x, 13.4);
        assert_eq!(bounds.min_y, 52.5);
    }
}
