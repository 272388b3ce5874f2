use crate::catalog_sql::{
    SQL_INSERT_GPKG_CONTENTS, SQL_INSERT_GPKG_GEOMETRY_COLUMNS, SQL_LIST_SPATIAL_TABLES,
    SQL_LIST_USER_TABLES, SQL_SELECT_GEOMETRY_COLUMN_META, SQL_TABLE_EXISTS,
    execute_rtree_sqls, initialize_catalog, rtree_drop_sql, sql_create_table,
    sql_delete_contents_rows, sql_drop_table, sql_table_columns,
};
use crate::conversions::{
    column_type_from_str, column_type_to_str, dimension_from_zm, dimension_to_zm,
    geometry_type_from_str, geometry_type_to_str,
};
use crate::error::{GeoflowError, Result};
use crate::io::{self, ImportOptions};
use crate::query::QueryBuilder;
use crate::sql_functions::register_spatial_functions;
use crate::table::{SpatialTable, Table};
use crate::types::{ColumnSpec, ColumnType, ResolvedColumns};
use rusqlite::OpenFlags;
use std::collections::HashSet;
use std::path::Path;

/// Catalog metadata of one spatial table's geometry column.
#[derive(Clone, Debug)]
pub(crate) struct GeometryMeta {
    pub(crate) column: String,
    pub(crate) geometry_type: wkb::reader::GeometryType,
    pub(crate) dimension: wkb::reader::Dimension,
    pub(crate) srid: u32,
}

/// Either wrapper a table lookup can produce, decided by the
/// has-geometry-column check.
#[derive(Debug)]
pub enum DataSet<'a> {
    Table(Table<'a>),
    Spatial(SpatialTable<'a>),
}

impl<'a> DataSet<'a> {
    pub fn is_spatial(&self) -> bool {
        matches!(self, Self::Spatial(_))
    }

    /// The plain-table view, available for both variants.
    pub fn table(&self) -> &Table<'a> {
        match self {
            Self::Table(table) => table,
            Self::Spatial(spatial) => spatial.table(),
        }
    }

    pub fn as_spatial(&self) -> Option<&SpatialTable<'a>> {
        match self {
            Self::Table(_) => None,
            Self::Spatial(spatial) => Some(spatial),
        }
    }

    pub fn into_table(self) -> Table<'a> {
        match self {
            Self::Table(table) => table,
            Self::Spatial(spatial) => spatial.into_table(),
        }
    }
}

/// Connection wrapper and entry point of the data-access layer.
#[derive(Debug)]
pub struct DataSource {
    conn: rusqlite::Connection,
    read_only: bool,
}

impl DataSource {
    /// Create a new database file, initializing the GeoPackage catalog.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(GeoflowError::Message(format!(
                "database file already exists: {}",
                path.display()
            )));
        }

        let conn = rusqlite::Connection::open(path)?;
        initialize_catalog(&conn)?;
        register_spatial_functions(&conn)?;

        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Create a transient in-memory database with the catalog initialized.
    pub fn create_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        initialize_catalog(&conn)?;
        register_spatial_functions(&conn)?;

        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Open an existing database file for read/write.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GeoflowError::Message(format!(
                "database file does not exist: {}",
                path.display()
            )));
        }

        let conn = rusqlite::Connection::open(path)?;
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Open an existing database file without write access.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = rusqlite::Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn,
            read_only: true,
        })
    }

    /// Execute a single statement, returning the affected row count.
    pub fn execute(&self, sql: &str) -> Result<usize> {
        Ok(self.conn.execute(sql, [])?)
    }

    /// Execute a batch of semicolon-separated statements.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Wrap a named table, checking existence against the catalog.
    pub fn table(&self, table_name: &str) -> Result<Table<'_>> {
        Table::named(self, table_name)
    }

    /// Wrap a named table that must have a geometry column.
    pub fn spatial_table(&self, table_name: &str) -> Result<SpatialTable<'_>> {
        SpatialTable::named(self, table_name)
    }

    /// Wrap a named table, picking the spatial wrapper when a geometry
    /// column is found.
    pub fn dataset(&self, table_name: &str) -> Result<DataSet<'_>> {
        if !self.table_exists(table_name)? {
            return Err(GeoflowError::NoSuchTable {
                table_name: table_name.to_string(),
            });
        }

        let is_spatial = self.geometry_meta(table_name)?.is_some()
            || !self.declared_geometry_columns(table_name)?.is_empty();
        if is_spatial {
            Ok(DataSet::Spatial(SpatialTable::named(self, table_name)?))
        } else {
            Ok(DataSet::Table(Table::named(self, table_name)?))
        }
    }

    /// Wrap a raw SELECT statement.
    pub fn query(&self, sql: &str) -> Result<Table<'_>> {
        Table::from_query(self, sql)
    }

    /// Wrap a raw SELECT statement whose result must carry geometry.
    pub fn spatial_query(&self, sql: &str) -> Result<SpatialTable<'_>> {
        SpatialTable::from_query(self, sql)
    }

    /// Entry to the fluent query DSL.
    pub fn select<I, S>(&self, columns: I) -> QueryBuilder<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        QueryBuilder::new(self, columns)
    }

    /// Names of user tables, excluding catalog and index bookkeeping.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(SQL_LIST_USER_TABLES)?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Names of the tables registered as feature tables in the catalog.
    pub fn spatial_table_names(&self) -> Result<Vec<String>> {
        if !self.table_exists("gpkg_contents")? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(SQL_LIST_SPATIAL_TABLES)?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn has_table(&self, table_name: &str) -> Result<bool> {
        self.table_exists(table_name)
    }

    /// Attach another database file under a schema name, making its
    /// tables addressable as `schema.table`.
    pub fn attach<P: AsRef<Path>>(&self, path: P, schema: &str) -> Result<()> {
        let sql = format!(
            r#"ATTACH DATABASE '{}' AS "{}""#,
            path.as_ref().display(),
            schema
        );
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    pub fn detach(&self, schema: &str) -> Result<()> {
        let sql = format!(r#"DETACH DATABASE "{}""#, schema);
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    /// Create a plain table from column specs.
    pub fn create_table(&self, table_name: &str, columns: &[ColumnSpec]) -> Result<Table<'_>> {
        self.ensure_writable()?;
        if self.table_exists(table_name)? {
            return Err(GeoflowError::TableAlreadyExists {
                table_name: table_name.to_string(),
            });
        }

        let column_defs = columns
            .iter()
            .map(|spec| format!(r#""{}" {}"#, spec.name, column_type_to_str(spec.column_type)))
            .collect::<Vec<String>>()
            .join(", ");
        self.conn
            .execute_batch(&sql_create_table(table_name, &column_defs))?;

        Table::named(self, table_name)
    }

    /// Create a spatial table: feature table with an autoincrement key,
    /// catalog rows and an R*Tree index kept current by triggers.
    pub fn create_spatial_table(
        &self,
        table_name: &str,
        geometry_column: &str,
        geometry_type: wkb::reader::GeometryType,
        geometry_dimension: wkb::reader::Dimension,
        srid: u32,
        other_columns: &[ColumnSpec],
    ) -> Result<SpatialTable<'_>> {
        self.ensure_writable()?;
        if self.table_exists(table_name)? {
            return Err(GeoflowError::TableAlreadyExists {
                table_name: table_name.to_string(),
            });
        }

        let srs_exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM gpkg_spatial_ref_sys WHERE srs_id = ?1)",
            rusqlite::params![srid],
            |row| row.get(0),
        )?;
        if srs_exists == 0 {
            return Err(GeoflowError::MissingSpatialRefSysId { srs_id: srid });
        }

        let geometry_type_name = geometry_type_to_str(geometry_type);
        let (z, m) = dimension_to_zm(geometry_dimension);

        let mut column_defs = Vec::with_capacity(other_columns.len() + 2);
        column_defs.push("fid INTEGER PRIMARY KEY AUTOINCREMENT".to_string());
        column_defs.push(format!(r#""{}" {}"#, geometry_column, geometry_type_name));
        for spec in other_columns {
            let col_type = column_type_to_str(spec.column_type);
            column_defs.push(format!(r#""{}" {col_type}"#, spec.name));
        }

        self.conn
            .execute_batch(&sql_create_table(table_name, &column_defs.join(", ")))?;

        self.conn.execute(
            SQL_INSERT_GPKG_CONTENTS,
            rusqlite::params![table_name, table_name, srid],
        )?;
        self.conn.execute(
            SQL_INSERT_GPKG_GEOMETRY_COLUMNS,
            rusqlite::params![table_name, geometry_column, geometry_type_name, srid, z, m],
        )?;

        execute_rtree_sqls(&self.conn, table_name, geometry_column, "fid")?;

        SpatialTable::named(self, table_name)
    }

    /// Drop a table, removing catalog rows and the R*Tree index when
    /// the table was spatial.
    pub fn drop_table(&self, table_name: &str) -> Result<()> {
        self.ensure_writable()?;
        if !self.table_exists(table_name)? {
            return Err(GeoflowError::NoSuchTable {
                table_name: table_name.to_string(),
            });
        }

        if let Some(meta) = self.geometry_meta(table_name)? {
            self.conn
                .execute_batch(&rtree_drop_sql(table_name, &meta.column))?;
            self.conn
                .execute_batch(&sql_delete_contents_rows(table_name))?;
        }
        self.conn.execute_batch(&sql_drop_table(table_name))?;
        Ok(())
    }

    /// Expert-only: register a spatial reference system in
    /// `gpkg_spatial_ref_sys`. Callers must supply authoritative WKT;
    /// no validation is performed.
    pub fn register_srs(
        &self,
        srs_name: &str,
        srs_id: i32,
        organization: &str,
        organization_coordsys_id: i32,
        definition: &str,
        description: &str,
    ) -> Result<()> {
        self.ensure_writable()?;

        self.conn.execute(
            "INSERT INTO gpkg_spatial_ref_sys \
            (srs_name, srs_id, organization, organization_coordsys_id, definition, description) \
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                srs_name,
                srs_id,
                organization,
                organization_coordsys_id,
                definition,
                description
            ],
        )?;
        Ok(())
    }

    /// Import a file into a new table; the driver is selected by the
    /// file extension.
    pub fn import<P: AsRef<Path>>(
        &self,
        path: P,
        table_name: &str,
        options: ImportOptions,
    ) -> Result<DataSet<'_>> {
        io::import_file(self, path.as_ref(), table_name, options)
    }

    pub(crate) fn connection(&self) -> &rusqlite::Connection {
        &self.conn
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(GeoflowError::ReadOnly);
        }
        Ok(())
    }

    pub(crate) fn table_exists(&self, table_name: &str) -> Result<bool> {
        let exists: i64 = self
            .conn
            .query_row(SQL_TABLE_EXISTS, rusqlite::params![table_name], |row| {
                row.get(0)
            })?;
        Ok(exists != 0)
    }

    /// Resolve the table columns, mapping declared SQL types.
    pub(crate) fn resolved_columns(&self, table_name: &str) -> Result<ResolvedColumns> {
        let query = sql_table_columns(table_name);
        let mut stmt = self.conn.prepare(&query)?;

        let rows = stmt
            .query_map([], |row| {
                let name: String = row.get(0)?;
                let declared: String = row.get(1)?;
                let pk: i32 = row.get(2)?;
                Ok((name, declared, pk != 0))
            })?
            .collect::<std::result::Result<Vec<(String, String, bool)>, _>>()?;

        let mut primary_key: Option<String> = None;
        let mut specs = Vec::with_capacity(rows.len());
        for (name, declared, is_primary_key) in rows {
            if is_primary_key {
                if primary_key.is_some() {
                    return Err(GeoflowError::Message(format!(
                        "composite primary keys are not supported for table: {table_name}"
                    )));
                }
                primary_key = Some(name.clone());
            }
            let column_type = column_type_from_str(&declared).unwrap_or(ColumnType::Any);
            specs.push(ColumnSpec { name, column_type });
        }

        Ok(ResolvedColumns { primary_key, specs })
    }

    /// Geometry column metadata from the catalog, `None` when the table
    /// is not registered (or no catalog exists in this file).
    pub(crate) fn geometry_meta(&self, table_name: &str) -> Result<Option<GeometryMeta>> {
        if !self.table_exists("gpkg_geometry_columns")? {
            return Ok(None);
        }

        let mut stmt = self.conn.prepare(SQL_SELECT_GEOMETRY_COLUMN_META)?;
        let mut rows = stmt.query([table_name])?;
        let row = match rows.next()? {
            Some(row) => row,
            None => return Ok(None),
        };

        let column: String = row.get(0)?;
        let geometry_type_str: String = row.get(1)?;
        let z: i8 = row.get(2)?;
        let m: i8 = row.get(3)?;
        let srid: u32 = row.get(4)?;

        Ok(Some(GeometryMeta {
            column,
            geometry_type: geometry_type_from_str(&geometry_type_str)?,
            dimension: dimension_from_zm(z, m)?,
            srid,
        }))
    }

    /// Columns of a named table whose declared type is an explicit
    /// geometry type name.
    pub(crate) fn declared_geometry_columns(&self, table_name: &str) -> Result<Vec<String>> {
        let query = sql_table_columns(table_name);
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map([], |row| {
                let name: String = row.get(0)?;
                let declared: String = row.get(1)?;
                Ok((name, declared))
            })?
            .collect::<std::result::Result<Vec<(String, String)>, _>>()?;

        Ok(rows
            .into_iter()
            .filter(|(_, declared)| geometry_type_from_str(declared).is_ok())
            .map(|(name, _)| name)
            .collect())
    }

    /// Geometry columns of a raw query result, discovered from an empty
    /// dry run. Declared geometry type names are authoritative; a BLOB
    /// declaration counts only when the column name is a known geometry
    /// column in the catalog.
    pub(crate) fn query_geometry_columns(&self, sql: &str) -> Result<Vec<String>> {
        let known = self.catalog_geometry_column_names()?;
        let stmt = self.conn.prepare(sql)?;

        let mut columns = Vec::new();
        for column in stmt.columns() {
            let Some(declared) = column.decl_type() else {
                continue;
            };
            if geometry_type_from_str(declared).is_ok()
                || (declared.eq_ignore_ascii_case("BLOB") && known.contains(column.name()))
            {
                columns.push(column.name().to_string());
            }
        }
        Ok(columns)
    }

    fn catalog_geometry_column_names(&self) -> Result<HashSet<String>> {
        if !self.table_exists("gpkg_geometry_columns")? {
            return Ok(HashSet::new());
        }
        let mut stmt = self
            .conn
            .prepare("SELECT column_name FROM gpkg_geometry_columns")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::DataSource;
    use crate::error::GeoflowError;
    use crate::types::{ColumnSpec, ColumnType, Value};
    use geo_types::Point;

    #[test]
    fn create_fails_if_file_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("exists.gpkg");
        std::fs::write(&path, []).expect("create file");

        let err = DataSource::create(&path).expect_err("existing file should fail");
        match err {
            GeoflowError::Message(message) => assert!(message.contains("already exists")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn open_fails_if_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.gpkg");

        let err = DataSource::open(&path).expect_err("missing file should fail");
        match err {
            GeoflowError::Message(message) => assert!(message.contains("does not exist")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn dataset_picks_the_wrapper_by_geometry_check() {
        let ds = DataSource::create_in_memory().expect("data source");
        ds.execute_batch("CREATE TABLE plain (id INTEGER PRIMARY KEY, v TEXT);")
            .expect("ddl");
        ds.create_spatial_table(
            "spots",
            "geom",
            wkb::reader::GeometryType::Point,
            wkb::reader::Dimension::Xy,
            4326,
            &[],
        )
        .expect("spatial");

        assert!(!ds.dataset("plain").expect("plain").is_spatial());
        assert!(ds.dataset("spots").expect("spots").is_spatial());
    }

    #[test]
    fn spatial_table_requires_registered_srs() {
        let ds = DataSource::create_in_memory().expect("data source");
        let err = ds
            .create_spatial_table(
                "missing_srs",
                "geom",
                wkb::reader::GeometryType::Point,
                wkb::reader::Dimension::Xy,
                9999,
                &[],
            )
            .expect_err("missing srs should fail");
        assert!(matches!(
            err,
            GeoflowError::MissingSpatialRefSysId { srs_id: 9999 }
        ));
    }

    #[test]
    fn register_srs_unlocks_new_srids() {
        let ds = DataSource::create_in_memory().expect("data source");
        ds.register_srs(
            "WGS 84 / Pseudo-Mercator",
            3857,
            "EPSG",
            3857,
            "PROJCS[\"WGS 84 / Pseudo-Mercator\"]",
            "Web Mercator",
        )
        .expect("register srs");

        ds.create_spatial_table(
            "mercator_spots",
            "geom",
            wkb::reader::GeometryType::Point,
            wkb::reader::Dimension::Xy,
            3857,
            &[],
        )
        .expect("spatial table in 3857");
    }

    #[test]
    fn drop_table_cleans_catalog_rows() {
        let ds = DataSource::create_in_memory().expect("data source");
        ds.create_spatial_table(
            "doomed",
            "geom",
            wkb::reader::GeometryType::Point,
            wkb::reader::Dimension::Xy,
            4326,
            &[],
        )
        .expect("spatial");

        ds.drop_table("doomed").expect("drop");
        assert!(!ds.has_table("doomed").expect("exists"));
        assert!(!ds.has_table("rtree_doomed_geom").expect("exists"));
        let count: i64 = ds
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM gpkg_contents WHERE table_name = 'doomed'",
                [],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn table_names_hide_bookkeeping() {
        let ds = DataSource::create_in_memory().expect("data source");
        ds.create_spatial_table(
            "spots",
            "geom",
            wkb::reader::GeometryType::Point,
            wkb::reader::Dimension::Xy,
            4326,
            &[],
        )
        .expect("spatial");
        ds.execute_batch("CREATE TABLE plain (id INTEGER PRIMARY KEY);")
            .expect("ddl");

        let names = ds.table_names().expect("names");
        assert_eq!(names, vec!["plain", "spots"]);
        assert_eq!(ds.spatial_table_names().expect("spatial"), vec!["spots"]);
    }

    #[test]
    fn attach_makes_external_tables_addressable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let external_path = dir.path().join("external.gpkg");
        {
            let external = DataSource::create(&external_path).expect("external");
            external
                .execute_batch(
                    "CREATE TABLE shared (id INTEGER PRIMARY KEY, v TEXT);
                     INSERT INTO shared (v) VALUES ('one'), ('two');",
                )
                .expect("seed");
        }

        let ds = DataSource::create_in_memory().expect("data source");
        ds.attach(&external_path, "ext").expect("attach");

        let table = ds.query("SELECT v FROM ext.shared ORDER BY id").expect("query");
        assert_eq!(table.row_count().expect("count"), 2);

        ds.detach("ext").expect("detach");
        assert!(ds.query("SELECT v FROM ext.shared").is_err());
    }

    #[test]
    fn rtree_index_follows_feature_changes() {
        let ds = DataSource::create_in_memory().expect("data source");
        let layer = ds
            .create_spatial_table(
                "tracked",
                "geom",
                wkb::reader::GeometryType::Point,
                wkb::reader::Dimension::Xy,
                4326,
                &[ColumnSpec {
                    name: "label".to_string(),
                    column_type: ColumnType::Varchar,
                }],
            )
            .expect("spatial");

        layer
            .insert(Point::new(1.5, -2.0), [Value::from("a")])
            .expect("insert");
        let id = ds.connection().last_insert_rowid();

        let (minx, maxy): (f64, f64) = ds
            .connection()
            .query_row(
                "SELECT minx, maxy FROM rtree_tracked_geom WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("rtree row");
        assert_eq!(minx, 1.5);
        assert_eq!(maxy, -2.0);

        layer
            .update(Point::new(-4.0, 6.25), [Value::from("b")], id)
            .expect("update");
        let (minx, maxy): (f64, f64) = ds
            .connection()
            .query_row(
                "SELECT minx, maxy FROM rtree_tracked_geom WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("rtree row");
        assert_eq!(minx, -4.0);
        assert_eq!(maxy, 6.25);
    }
}
