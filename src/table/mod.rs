mod iterator;
mod row;
mod spatial;

pub use iterator::RowIterator;
pub use row::Row;
pub use spatial::SpatialTable;

use crate::catalog_sql::{sql_count, sql_insert_row, sql_select_all};
use crate::conversions::column_type_from_str;
use crate::datasource::DataSource;
use crate::error::{GeoflowError, Result};
use crate::io::{self, ExportOptions};
use crate::printer;
use crate::query::QueryBuilder;
use crate::types::{ColumnSpec, ColumnType, Value};
use rusqlite::params_from_iter;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Where a table wrapper gets its rows from.
#[derive(Clone, Debug)]
pub(crate) enum TableSource {
    /// A named table or view in the database.
    Named(String),
    /// A raw SELECT with no stable location.
    Query(String),
}

/// A lazily-iterated view over a named table or a raw query result.
///
/// The wrapper never caches rows: every call to [`Table::rows`] prepares
/// a fresh statement, so iteration always reflects the current database
/// state. Column specs are resolved once, at construction.
#[derive(Debug)]
pub struct Table<'a> {
    ds: &'a DataSource,
    source: TableSource,
    columns: Vec<ColumnSpec>,
    primary_key: Option<String>,
    index_by_name: Arc<HashMap<String, usize>>,
}

impl<'a> Table<'a> {
    pub(crate) fn named(ds: &'a DataSource, table_name: &str) -> Result<Self> {
        if !ds.table_exists(table_name)? {
            return Err(GeoflowError::NoSuchTable {
                table_name: table_name.to_string(),
            });
        }

        let resolved = ds.resolved_columns(table_name)?;
        let index_by_name = Arc::new(build_index(&resolved.specs));
        Ok(Self {
            ds,
            source: TableSource::Named(table_name.to_string()),
            columns: resolved.specs,
            primary_key: resolved.primary_key,
            index_by_name,
        })
    }

    /// Wrap a raw SELECT. Preparing the statement doubles as an empty
    /// dry run: invalid SQL fails here, not at first iteration.
    pub(crate) fn from_query(ds: &'a DataSource, sql: &str) -> Result<Self> {
        let columns = {
            let stmt = ds.connection().prepare(sql)?;
            stmt.columns()
                .iter()
                .map(|column| ColumnSpec {
                    name: column.name().to_string(),
                    column_type: column
                        .decl_type()
                        .and_then(column_type_from_str)
                        .unwrap_or(ColumnType::Any),
                })
                .collect::<Vec<ColumnSpec>>()
        };

        let index_by_name = Arc::new(build_index(&columns));
        Ok(Self {
            ds,
            source: TableSource::Query(sql.to_string()),
            columns,
            primary_key: None,
            index_by_name,
        })
    }

    /// The table name, or `None` for a query-backed wrapper.
    pub fn name(&self) -> Option<&str> {
        match &self.source {
            TableSource::Named(name) => Some(name),
            TableSource::Query(_) => None,
        }
    }

    /// The SELECT statement backing this wrapper.
    pub fn select_sql(&self) -> String {
        match &self.source {
            TableSource::Named(name) => sql_select_all(name),
            TableSource::Query(sql) => sql.clone(),
        }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|spec| spec.name.as_str()).collect()
    }

    pub fn column_type(&self, column_name: &str) -> Option<ColumnType> {
        self.index_by_name
            .get(column_name)
            .map(|idx| self.columns[*idx].column_type)
    }

    /// Schema validation helper: does the named column exist with this type?
    pub fn has_column(&self, column_name: &str, column_type: ColumnType) -> bool {
        self.column_type(column_name) == Some(column_type)
    }

    /// Mapping from column name to host-side type for all columns.
    pub fn column_types(&self) -> HashMap<String, ColumnType> {
        self.columns
            .iter()
            .map(|spec| (spec.name.clone(), spec.column_type))
            .collect()
    }

    pub(crate) fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    pub(crate) fn data_source(&self) -> &'a DataSource {
        self.ds
    }

    pub(crate) fn set_column_type(&mut self, column_name: &str, column_type: ColumnType) {
        if let Some(idx) = self.index_by_name.get(column_name) {
            self.columns[*idx].column_type = column_type;
        }
    }

    /// Number of rows behind this wrapper, via `SELECT COUNT(*)`.
    pub fn row_count(&self) -> Result<usize> {
        let count: i64 =
            self.ds
                .connection()
                .query_row(&sql_count(&self.select_sql()), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Stream the rows. The total row count is computed once up front so
    /// the iterator's remaining length is always exact.
    pub fn rows(&self) -> Result<RowIterator<'a>> {
        // Key-ordered iteration keeps the windowed fetches stable.
        let select_sql = match (&self.source, self.primary_key.as_deref()) {
            (TableSource::Named(name), Some(primary_key)) => {
                format!(r#"SELECT * FROM "{name}" ORDER BY "{primary_key}""#)
            }
            _ => self.select_sql(),
        };
        RowIterator::new(
            self.ds,
            &select_sql,
            self.columns.len(),
            Arc::clone(&self.index_by_name),
        )
    }

    /// The first row, or `None` for an empty table.
    pub fn first(&self) -> Result<Option<Row>> {
        self.rows()?.next().transpose()
    }

    /// Insert a row of positional values covering every non-key column.
    pub fn insert<P>(&self, values: P) -> Result<()>
    where
        P: IntoIterator<Item = Value>,
    {
        self.ensure_writable()?;
        let table_name = self.location("insert")?;

        let columns = self.writable_columns();
        let quoted = columns
            .iter()
            .map(|name| format!(r#""{}""#, name))
            .collect::<Vec<String>>()
            .join(",");
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<String>>()
            .join(",");
        let sql = sql_insert_row(table_name, &quoted, &placeholders);

        let mut stmt = self.ds.connection().prepare_cached(&sql)?;
        stmt.execute(params_from_iter(values))?;
        Ok(())
    }

    /// Update the row with the given primary key value, positional
    /// values covering every non-key column.
    pub fn update<P>(&self, values: P, id: i64) -> Result<()>
    where
        P: IntoIterator<Item = Value>,
    {
        self.ensure_writable()?;
        let table_name = self.location("update")?;
        let primary_key = self.primary_key.as_deref().ok_or_else(|| {
            GeoflowError::Message(format!(
                "no primary key column to update by for table: {table_name}"
            ))
        })?;

        let columns = self.writable_columns();
        let assignments = columns
            .iter()
            .enumerate()
            .map(|(idx, name)| format!(r#""{}"=?{}"#, name, idx + 1))
            .collect::<Vec<String>>()
            .join(",");
        let id_idx = columns.len() + 1;
        let sql = format!(
            r#"UPDATE "{}" SET {} WHERE "{}"=?{}"#,
            table_name, assignments, primary_key, id_idx
        );

        let params = values
            .into_iter()
            .chain(std::iter::once(Value::Integer(id)));
        let mut stmt = self.ds.connection().prepare_cached(&sql)?;
        stmt.execute(params_from_iter(params))?;
        Ok(())
    }

    /// Remove all rows; returns how many were deleted.
    pub fn delete_all(&self) -> Result<usize> {
        self.ensure_writable()?;
        let table_name = self.location("delete_all")?;
        let sql = format!(r#"DELETE FROM "{}""#, table_name);
        Ok(self.ds.connection().execute(&sql, [])?)
    }

    /// Start a derived query over this wrapper's rows.
    pub fn select<I, S>(&self, columns: I) -> QueryBuilder<'a>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let builder = QueryBuilder::new(self.ds, columns);
        match &self.source {
            TableSource::Named(name) => builder.from(name),
            TableSource::Query(sql) => builder.from_subquery(sql),
        }
    }

    /// Export to a file; the driver is selected by the file extension.
    pub fn save<P: AsRef<Path>>(&self, path: P, options: ExportOptions) -> Result<()> {
        io::export_table(self, &[], path.as_ref(), options)
    }

    pub fn to_ascii(&self, max_rows: usize) -> Result<String> {
        printer::render_ascii(self, max_rows)
    }

    pub fn to_html(&self, max_rows: usize) -> Result<String> {
        printer::render_html(self, max_rows)
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.ds.is_read_only() {
            return Err(GeoflowError::ReadOnly);
        }
        Ok(())
    }

    pub(crate) fn location(&self, operation: &'static str) -> Result<&str> {
        match &self.source {
            TableSource::Named(name) => Ok(name),
            TableSource::Query(_) => Err(GeoflowError::NoTableLocation { operation }),
        }
    }

    fn writable_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|spec| Some(spec.name.as_str()) != self.primary_key.as_deref())
            .map(|spec| spec.name.as_str())
            .collect()
    }
}

fn build_index(columns: &[ColumnSpec]) -> HashMap<String, usize> {
    let mut index = HashMap::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        index.insert(column.name.clone(), idx);
    }
    index
}
